//! The worker scheduler: borrows an operator and two users from the
//! pools, builds and submits one wrapped transfer, records a reporter
//! event, and hands everything back.

use crate::eth::{derive_user_secret, EthError, EthKeypair, LegacyTransaction};
use crate::evm_loader::{self, transaction_count, ProbeError, TreasuryPool};
use crate::keystore::OperatorSigner;
use crate::pool::Pool;
use crate::report::{
    EventSink, Failure, ReporterService, SubmitEvent, Summary, REQUEST_TYPE_SOLANA,
    SEND_EVENT_NAME,
};
use crate::rpc::{retry, BlockhashCache, ClientError, RpcClient};
use crate::solana::message::Message;
use crate::solana::pubkey::PubkeyError;
use crate::solana::transaction::Transaction;
use crate::solana::{Pubkey, Signer};
use chrono::Utc;
use log::*;
use rand::{thread_rng, Rng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{sleep, Builder};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const PROBE_ATTEMPTS: usize = 5;
pub const PROBE_BACKOFF: Duration = Duration::from_secs(1);
const SEND_ATTEMPTS: usize = 3;
const SEND_BACKOFF: Duration = Duration::from_millis(500);

/// Transfer values are drawn uniformly from [1, MAX_TRANSFER_VALUE].
const MAX_TRANSFER_VALUE: u64 = 10_000;

/// An operator with its derived companion account and treasury pool,
/// handed out to one worker at a time.
pub struct Operator {
    pub signer: OperatorSigner,
    pub companion: Pubkey,
    pub treasury: TreasuryPool,
}

/// A user: an Ethereum keypair, its companion account, and the nonce the
/// workload tracks client-side once probed.
pub struct EthUser {
    pub keypair: EthKeypair,
    pub account: Pubkey,
    pub nonce: Option<u64>,
}

/// Everything the workers share: the two pools, the blockhash cache, and
/// the shutdown flag.
pub struct Runtime {
    pub operators: Pool<Operator>,
    pub users: Pool<EthUser>,
    pub blockhash: BlockhashCache,
    pub exit: AtomicBool,
}

/// The per-submission knobs copied into every worker.
#[derive(Debug, Clone, Copy)]
pub struct TransferParams {
    pub evm_loader_id: Pubkey,
    pub chain_id: u64,
    pub units: u32,
    pub additional_fee: u32,
    pub heap_frame: u32,
    /// Poll `getSignatureStatuses` once every Nth success; 0 disables.
    pub sample_confirmations: usize,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl SubmitError {
    fn failure(&self) -> Failure {
        let category = match self {
            SubmitError::Probe(ProbeError::AccountAbsent(_)) => "account-absent",
            SubmitError::Probe(ProbeError::ShortRecord { .. }) => "short-record",
            SubmitError::Probe(ProbeError::Client(err)) | SubmitError::Client(err) => {
                if err.is_transient() {
                    "transient"
                } else if matches!(err, ClientError::Malformed(_)) {
                    "malformed-response"
                } else {
                    "rejected"
                }
            }
        };
        Failure {
            category: category.to_string(),
            message: self.to_string(),
        }
    }
}

/// Pairs each loaded signer with its companion account and a treasury
/// pool at the operator's global key index.
pub fn prepare_operators(
    signers: Vec<OperatorSigner>,
    offset: usize,
    treasury_base: &Pubkey,
    evm_loader_id: &Pubkey,
) -> Result<Vec<Operator>, PubkeyError> {
    signers
        .into_iter()
        .enumerate()
        .map(|(i, signer)| {
            let treasury =
                TreasuryPool::derive(treasury_base, evm_loader_id, (offset + i) as u32)?;
            let (companion, _bump) =
                evm_loader::companion_address(&signer.eth_address, evm_loader_id);
            Ok(Operator {
                signer,
                companion,
                treasury,
            })
        })
        .collect()
}

/// Derives `count` users from the base secret starting at `offset`.
pub fn prepare_users(
    base_secret: &[u8; 32],
    offset: usize,
    count: usize,
    evm_loader_id: &Pubkey,
) -> Result<Vec<EthUser>, EthError> {
    (0..count)
        .map(|i| {
            let secret = derive_user_secret(base_secret, (offset + i) as u64);
            let keypair = EthKeypair::from_secret_bytes(&secret)?;
            let (account, _bump) = evm_loader::companion_address(&keypair.address, evm_loader_id);
            Ok(EthUser {
                keypair,
                account,
                nonce: None,
            })
        })
        .collect()
}

/// Logs each operator's lamport balance so starved operators are visible
/// before the run starts.
pub fn log_operator_balances(client: &RpcClient, operators: &[Operator]) {
    for operator in operators {
        let account = operator.signer.keypair.pubkey();
        match client.get_balance(&account) {
            Ok(balance) => info!("operator {} balance {} lamports", account, balance),
            Err(err) => warn!("operator {} balance check failed: {}", account, err),
        }
    }
}

fn submit_transfer(
    client: &RpcClient,
    runtime: &Runtime,
    params: &TransferParams,
    sender: &mut EthUser,
    receiver: &EthUser,
    operator: &Operator,
) -> Result<(String, usize), SubmitError> {
    let nonce = match sender.nonce {
        Some(nonce) => nonce,
        None => transaction_count(client, &sender.account, PROBE_ATTEMPTS, PROBE_BACKOFF)?,
    };

    let eth_tx = LegacyTransaction {
        nonce,
        gas_price: 0,
        gas_limit: evm_loader::TRANSFER_GAS_LIMIT,
        to: receiver.keypair.address,
        value: thread_rng().gen_range(1, MAX_TRANSFER_VALUE + 1) as u128,
        data: vec![],
    };
    let signed = eth_tx.sign(&sender.keypair, params.chain_id);
    sender.nonce = Some(nonce + 1);

    let operator_account = operator.signer.keypair.pubkey();
    let instruction = evm_loader::execute_from_instruction(
        &operator_account,
        &operator.companion,
        &operator.treasury,
        &params.evm_loader_id,
        &signed.rlp_bytes(),
        &[sender.account, receiver.account],
    );
    let instructions = evm_loader::with_compute_budget(
        params.units,
        params.additional_fee,
        params.heap_frame,
        instruction,
    );
    let message = Message::new(&instructions, Some(&operator_account));
    let mut transaction = Transaction::new_unsigned(message);

    let signature = retry(SEND_ATTEMPTS, SEND_BACKOFF, || {
        let blockhash = runtime.blockhash.recent_blockhash()?;
        transaction.sign(&[&operator.signer.keypair], blockhash);
        client.send_transaction(&transaction)
    })?;
    Ok((signature, transaction.serialize().len()))
}

fn worker_loop(
    client: &RpcClient,
    runtime: &Runtime,
    params: &TransferParams,
    sink: &EventSink,
) {
    let mut successes = 0usize;
    while !runtime.exit.load(Ordering::Relaxed) {
        let mut sender = runtime.users.take();
        let receiver = runtime.users.take();
        let operator = runtime.operators.take();

        let start_time = Utc::now();
        let timer = Instant::now();
        let result = submit_transfer(client, runtime, params, &mut sender, &receiver, &operator);
        let response_time = timer.elapsed();

        let mut context = Some(sender.keypair.address.to_string());
        let event = match result {
            Ok((signature, response_length)) => {
                successes += 1;
                if params.sample_confirmations > 0 && successes % params.sample_confirmations == 0
                {
                    match client.get_signature_status(&signature) {
                        Ok(status) => {
                            context = Some(format!(
                                "{} status={}",
                                sender.keypair.address,
                                status.as_deref().unwrap_or("unknown"),
                            ));
                        }
                        Err(err) => debug!("status poll for {} failed: {}", signature, err),
                    }
                }
                SubmitEvent {
                    request_type: REQUEST_TYPE_SOLANA,
                    name: SEND_EVENT_NAME,
                    start_time,
                    response_time,
                    response_length,
                    context,
                    response: Some(signature),
                    exception: None,
                }
            }
            Err(err) => SubmitEvent {
                request_type: REQUEST_TYPE_SOLANA,
                name: SEND_EVENT_NAME,
                start_time,
                response_time,
                response_length: 0,
                context,
                response: None,
                exception: Some(err.failure()),
            },
        };
        sink.fire(event);

        runtime.users.give(sender);
        runtime.users.give(receiver);
        runtime.operators.give(operator);
    }
}

/// Runs `threads` workers until the shutdown flag is set (or `duration`
/// elapses, when non-zero) and returns the aggregated summary.
pub fn do_bench(
    client: Arc<RpcClient>,
    runtime: Arc<Runtime>,
    params: TransferParams,
    threads: usize,
    duration: Duration,
) -> Summary {
    let (reporter, sink) = ReporterService::new();

    if duration > Duration::from_secs(0) {
        let runtime = runtime.clone();
        Builder::new()
            .name("neonBenchTimer".to_string())
            .spawn(move || {
                sleep(duration);
                runtime.exit.store(true, Ordering::Relaxed);
            })
            .expect("spawn timer thread");
    }

    info!(
        "starting {} sender threads over {} operators and {} users",
        threads,
        runtime.operators.capacity(),
        runtime.users.capacity(),
    );
    let workers: Vec<_> = (0..threads)
        .map(|i| {
            let client = client.clone();
            let runtime = runtime.clone();
            let sink = sink.clone();
            Builder::new()
                .name(format!("neonBenchSender-{}", i))
                .spawn(move || worker_loop(&client, &runtime, &params, &sink))
                .expect("spawn sender thread")
        })
        .collect();

    for worker in workers {
        if let Err(err) = worker.join() {
            error!("sender thread panicked: {:?}", err);
        }
    }
    drop(sink);
    reporter.join().unwrap_or_default()
}
