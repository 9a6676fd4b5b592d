mod bench;
mod cli;
mod eth;
mod evm_loader;
mod keystore;
mod pool;
mod report;
mod rpc;
mod solana;

use crate::bench::{do_bench, prepare_operators, prepare_users, Runtime, TransferParams};
use crate::pool::Pool;
use crate::rpc::{BlockhashCache, RpcClient};
use log::*;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("info")).init();

    let matches = cli::build_args(env!("CARGO_PKG_VERSION")).get_matches();
    let config = cli::parse_args(&matches).unwrap_or_else(|err| {
        eprintln!("{}", err);
        exit(1);
    });

    // parse_args only admits known networks
    let treasury_base = evm_loader::treasury_base(&config.network)
        .expect("network validated at argument parsing");

    let signers = keystore::load_operators(
        &config.operator_dir,
        config.operator_offset,
        config.operator_count,
    )
    .unwrap_or_else(|err| {
        eprintln!("{}", err);
        exit(1);
    });
    let operators = prepare_operators(
        signers,
        config.operator_offset,
        &treasury_base,
        &config.evm_loader,
    )
    .unwrap_or_else(|err| {
        eprintln!("operator treasury derivation failed: {}", err);
        exit(1);
    });

    let users = prepare_users(
        &config.base_user_secret,
        config.user_offset,
        config.user_count,
        &config.evm_loader,
    )
    .unwrap_or_else(|err| {
        eprintln!("user key derivation failed: {}", err);
        exit(1);
    });

    info!(
        "targeting {} ({}), program {}, chain id {}",
        config.json_rpc_url, config.network, config.evm_loader, config.chain_id
    );
    let client = Arc::new(RpcClient::new_with_timeout(
        config.json_rpc_url.clone(),
        config.rpc_timeout,
    ));
    bench::log_operator_balances(&client, &operators);

    let runtime = Arc::new(Runtime {
        operators: Pool::new(operators),
        users: Pool::new(users),
        blockhash: BlockhashCache::new(client.clone()),
        exit: AtomicBool::new(false),
    });

    {
        let runtime = runtime.clone();
        ctrlc::set_handler(move || {
            info!("interrupt received, draining workers");
            runtime.exit.store(true, Ordering::Relaxed);
        })
        .unwrap_or_else(|err| {
            eprintln!("failed to install interrupt handler: {}", err);
            exit(1);
        });
    }

    let params = TransferParams {
        evm_loader_id: config.evm_loader,
        chain_id: config.chain_id,
        units: config.units,
        additional_fee: config.additional_fee,
        heap_frame: config.heap_frame,
        sample_confirmations: config.sample_confirmations,
    };
    let summary = do_bench(client, runtime, params, config.threads, config.duration);

    if summary.total() > 0 && summary.total_failures() == summary.total() {
        eprintln!("every submission failed");
        exit(1);
    }
}
