//! The client-side half of the EVM execution program: address
//! derivations, the on-chain account layout, instruction builders, and
//! the nonce probe.

use crate::eth::EthAddress;
use crate::rpc::{ClientError, CommitmentLevel, RpcClient};
use crate::solana::instruction::{AccountMeta, Instruction};
use crate::solana::Pubkey;
use byteorder::{ByteOrder, LittleEndian};
use log::*;
use std::thread::sleep;
use std::time::Duration;
use thiserror::Error;

/// Version tag prefixed to every companion-account seed.
pub const ACCOUNT_SEED_VERSION: u8 = 2;

/// Gas sentinel carried by every generated transfer; the execution
/// program meters compute on the Solana side, not through eth gas.
pub const TRANSFER_GAS_LIMIT: u64 = 9_999_999_999;

pub const DEFAULT_UNITS: u32 = 500_000;
pub const DEFAULT_ADDITIONAL_FEE: u32 = 0;
pub const DEFAULT_HEAP_FRAME: u32 = 256 * 1024;

/// Instruction tag understood by the execution program: run the embedded
/// rlp-encoded transaction in a single instruction.
const EXECUTE_FROM_INSTRUCTION_TAG: u8 = 0x1f;

const REQUEST_UNITS_TAG: u8 = 0;
const REQUEST_HEAP_FRAME_TAG: u8 = 1;

const TREASURY_SEED_PREFIX: &str = "collateral_seed_";

pub fn system_program_id() -> Pubkey {
    Pubkey::new_from_array([0u8; 32])
}

/// ComputeBudget111111111111111111111111111111
pub fn compute_budget_id() -> Pubkey {
    Pubkey::new_from_array([
        3, 6, 70, 111, 229, 33, 23, 50, 255, 236, 173, 186, 114, 195, 155, 231, 188, 140, 229,
        187, 197, 247, 18, 107, 44, 67, 155, 58, 64, 0, 0, 0,
    ])
}

/// Base address the treasury pools of a deployment are derived from.
pub fn treasury_base(network: &str) -> Option<Pubkey> {
    match network {
        // 7SBdHNeF9FFYySEoszpjZXXQsAiwa5Lzpsz6nUJWusEx
        "devnet" => Some(Pubkey::new_from_array([
            95, 153, 167, 248, 209, 5, 84, 48, 48, 28, 142, 245, 179, 194, 12, 27, 82, 86, 214,
            80, 55, 212, 196, 188, 254, 105, 89, 249, 161, 131, 47, 1,
        ])),
        // 4sW3SZDJB7qXUyCYKA7pFL8eCTfm3REr8oSiKkww7MaT
        "night-stand" => Some(Pubkey::new_from_array([
            57, 130, 240, 112, 130, 156, 17, 226, 1, 207, 80, 59, 247, 198, 125, 33, 1, 37, 51,
            117, 3, 59, 48, 193, 232, 99, 183, 157, 30, 144, 153, 52,
        ])),
        _ => None,
    }
}

/// The companion account mirroring an Ethereum address under the
/// execution program's seed scheme.
pub fn companion_address(eth_address: &EthAddress, evm_loader_id: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(
        &[&[ACCOUNT_SEED_VERSION], eth_address.as_bytes()],
        evm_loader_id,
    )
}

/// A per-index fee/collateral sink, paired 1:1 with an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreasuryPool {
    pub index: u32,
    pub account: Pubkey,
    /// Little-endian index bytes, embedded verbatim in instruction data.
    pub buffer: [u8; 4],
}

impl TreasuryPool {
    pub fn derive(
        base: &Pubkey,
        evm_loader_id: &Pubkey,
        index: u32,
    ) -> Result<Self, crate::solana::pubkey::PubkeyError> {
        let seed = format!("{}{}", TREASURY_SEED_PREFIX, index);
        let account = Pubkey::create_with_seed(base, &seed, evm_loader_id)?;
        let mut buffer = [0u8; 4];
        LittleEndian::write_u32(&mut buffer, index);
        Ok(Self {
            index,
            account,
            buffer,
        })
    }
}

/// Fixed layout of a companion account's data.
pub const ACCOUNT_RECORD_LEN: usize = 71;
const ETH_ADDRESS_OFFSET: usize = 1;
const TX_COUNT_OFFSET: usize = 22;

/// The fields of the on-chain companion record the workload reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub eth_address: EthAddress,
    pub tx_count: u64,
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("account {0} not found")]
    AccountAbsent(Pubkey),
    #[error("account record too short: {len} bytes")]
    ShortRecord { len: usize },
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl AccountRecord {
    pub fn decode(data: &[u8]) -> Result<Self, ProbeError> {
        if data.len() < ACCOUNT_RECORD_LEN {
            return Err(ProbeError::ShortRecord { len: data.len() });
        }
        let mut eth_address = [0u8; 20];
        eth_address.copy_from_slice(&data[ETH_ADDRESS_OFFSET..ETH_ADDRESS_OFFSET + 20]);
        Ok(Self {
            eth_address: EthAddress(eth_address),
            tx_count: LittleEndian::read_u64(&data[TX_COUNT_OFFSET..TX_COUNT_OFFSET + 8]),
        })
    }

    /// Writes the tx counter back at its record offset.
    pub fn encode_tx_count(tx_count: u64, data: &mut [u8]) {
        LittleEndian::write_u64(&mut data[TX_COUNT_OFFSET..TX_COUNT_OFFSET + 8], tx_count);
    }
}

/// Reads the current transaction counter of a companion account.
///
/// The account may trail transaction submission at confirmed commitment,
/// so a missing or transient response is retried a few times before the
/// account is declared absent.
pub fn transaction_count(
    client: &RpcClient,
    account: &Pubkey,
    attempts: usize,
    backoff: Duration,
) -> Result<u64, ProbeError> {
    for attempt in 0..attempts {
        match client.get_account_data(account, CommitmentLevel::Confirmed) {
            Ok(Some(data)) => return Ok(AccountRecord::decode(&data)?.tx_count),
            Ok(None) => {
                debug!("account {} not yet visible (attempt {})", account, attempt);
            }
            Err(err) if err.is_transient() => {
                debug!("probe of {} failed (attempt {}): {}", account, attempt, err);
            }
            Err(err) => return Err(err.into()),
        }
        if attempt + 1 < attempts {
            sleep(backoff);
        }
    }
    Err(ProbeError::AccountAbsent(*account))
}

fn u32_le(value: u32) -> [u8; 4] {
    let mut buffer = [0u8; 4];
    LittleEndian::write_u32(&mut buffer, value);
    buffer
}

/// Compute-budget request for `units` compute units and an additional fee.
pub fn request_units(units: u32, additional_fee: u32) -> Instruction {
    let mut data = Vec::with_capacity(9);
    data.push(REQUEST_UNITS_TAG);
    data.extend_from_slice(&u32_le(units));
    data.extend_from_slice(&u32_le(additional_fee));
    Instruction::new_with_bytes(compute_budget_id(), &data, vec![])
}

/// Compute-budget request for a transaction-wide heap frame of `bytes`.
pub fn request_heap_frame(bytes: u32) -> Instruction {
    let mut data = Vec::with_capacity(5);
    data.push(REQUEST_HEAP_FRAME_TAG);
    data.extend_from_slice(&u32_le(bytes));
    Instruction::new_with_bytes(compute_budget_id(), &data, vec![])
}

/// The execute-from-instruction wrapper around a raw eth transaction.
///
/// Account ordering is part of the program contract and must not change:
/// operator, treasury, operator companion, system program, the execution
/// program itself, then the touched companion accounts (sender first).
pub fn execute_from_instruction(
    operator: &Pubkey,
    operator_companion: &Pubkey,
    treasury: &TreasuryPool,
    evm_loader_id: &Pubkey,
    eth_tx_rlp: &[u8],
    additional_companions: &[Pubkey],
) -> Instruction {
    let mut data = Vec::with_capacity(5 + eth_tx_rlp.len());
    data.push(EXECUTE_FROM_INSTRUCTION_TAG);
    data.extend_from_slice(&treasury.buffer);
    data.extend_from_slice(eth_tx_rlp);

    let mut accounts = vec![
        AccountMeta::new(*operator, true),
        AccountMeta::new(treasury.account, false),
        AccountMeta::new(*operator_companion, false),
        AccountMeta::new(system_program_id(), false),
        AccountMeta::new_readonly(*evm_loader_id, false),
    ];
    accounts.extend(
        additional_companions
            .iter()
            .map(|account| AccountMeta::new(*account, false)),
    );
    Instruction::new_with_bytes(*evm_loader_id, &data, accounts)
}

/// Prepends the compute-budget preamble. A request whose parameter is
/// zero is omitted.
pub fn with_compute_budget(
    units: u32,
    additional_fee: u32,
    heap_frame: u32,
    instruction: Instruction,
) -> Vec<Instruction> {
    let mut instructions = Vec::with_capacity(3);
    if units > 0 {
        instructions.push(request_units(units, additional_fee));
    }
    if heap_frame > 0 {
        instructions.push(request_heap_frame(heap_frame));
    }
    instructions.push(instruction);
    instructions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solana::pubkey::bytes_are_curve_point;

    fn evm_loader_id() -> Pubkey {
        "53DfF883gyixYNXnM7s5xhdeyV8mVk9T4i2hGV9vG9io".parse().unwrap()
    }

    #[test]
    fn test_program_ids() {
        assert_eq!(
            system_program_id().to_string(),
            "11111111111111111111111111111111"
        );
        assert_eq!(
            compute_budget_id().to_string(),
            "ComputeBudget111111111111111111111111111111"
        );
        assert_eq!(
            treasury_base("devnet").unwrap().to_string(),
            "7SBdHNeF9FFYySEoszpjZXXQsAiwa5Lzpsz6nUJWusEx"
        );
        assert_eq!(
            treasury_base("night-stand").unwrap().to_string(),
            "4sW3SZDJB7qXUyCYKA7pFL8eCTfm3REr8oSiKkww7MaT"
        );
        assert_eq!(treasury_base("mainnet"), None);
    }

    #[test]
    fn test_companion_address_deterministic() {
        let eth_address: EthAddress = "0xc26286eebe70b838545855325d45b123149c3ca4"
            .parse()
            .unwrap();
        let (account, bump) = companion_address(&eth_address, &evm_loader_id());
        let (account2, bump2) = companion_address(&eth_address, &evm_loader_id());
        assert_eq!((account, bump), (account2, bump2));
        assert!(!bytes_are_curve_point(account.to_bytes()));

        // different address, different companion
        let other: EthAddress = "0x0000000000000000000000000000000000000001"
            .parse()
            .unwrap();
        assert_ne!(companion_address(&other, &evm_loader_id()).0, account);
    }

    #[test]
    fn test_treasury_derivation() {
        let base = treasury_base("night-stand").unwrap();
        let pool = TreasuryPool::derive(&base, &evm_loader_id(), 2).unwrap();
        assert_eq!(pool.index, 2);
        assert_eq!(pool.buffer, [2, 0, 0, 0]);
        assert_eq!(
            pool,
            TreasuryPool::derive(&base, &evm_loader_id(), 2).unwrap()
        );
        assert_ne!(
            pool.account,
            TreasuryPool::derive(&base, &evm_loader_id(), 3).unwrap().account
        );
    }

    #[test]
    fn test_account_record_round_trip() {
        let mut data = vec![0u8; ACCOUNT_RECORD_LEN];
        data[ETH_ADDRESS_OFFSET..ETH_ADDRESS_OFFSET + 20].copy_from_slice(&[0xabu8; 20]);
        AccountRecord::encode_tx_count(0x0102_0304_0506_0708, &mut data);

        let record = AccountRecord::decode(&data).unwrap();
        assert_eq!(record.tx_count, 0x0102_0304_0506_0708);
        assert_eq!(record.eth_address, EthAddress([0xab; 20]));
        assert_eq!(&data[TX_COUNT_OFFSET..TX_COUNT_OFFSET + 8], &[8, 7, 6, 5, 4, 3, 2, 1]);

        // re-encoding the consumed field reproduces the exact bytes
        let mut reencoded = data.clone();
        AccountRecord::encode_tx_count(record.tx_count, &mut reencoded);
        assert_eq!(reencoded, data);

        assert!(matches!(
            AccountRecord::decode(&data[..ACCOUNT_RECORD_LEN - 1]),
            Err(ProbeError::ShortRecord { len: 70 })
        ));
    }

    #[test]
    fn test_compute_budget_data() {
        let ix = request_units(500_000, 0);
        assert_eq!(ix.program_id, compute_budget_id());
        assert_eq!(ix.data, vec![0, 0x20, 0xa1, 0x07, 0x00, 0, 0, 0, 0]);

        let ix = request_heap_frame(256 * 1024);
        assert_eq!(ix.data, vec![1, 0x00, 0x00, 0x04, 0x00]);
    }

    #[test]
    fn test_execute_instruction_layout() {
        let operator = Pubkey::new_unique();
        let operator_companion = Pubkey::new_unique();
        let sender = Pubkey::new_unique();
        let receiver = Pubkey::new_unique();
        let base = treasury_base("night-stand").unwrap();
        let treasury = TreasuryPool::derive(&base, &evm_loader_id(), 2).unwrap();
        let rlp = vec![0xf8, 0x6b, 0x07];

        let ix = execute_from_instruction(
            &operator,
            &operator_companion,
            &treasury,
            &evm_loader_id(),
            &rlp,
            &[sender, receiver],
        );

        assert_eq!(&ix.data[..5], &[0x1f, 0x02, 0x00, 0x00, 0x00]);
        assert_eq!(&ix.data[5..], &rlp[..]);

        let metas = &ix.accounts;
        assert_eq!(metas.len(), 7);
        assert!(metas[0].is_signer && metas[0].is_writable);
        assert_eq!(metas[0].pubkey, operator);
        assert_eq!(metas[1].pubkey, treasury.account);
        assert_eq!(metas[2].pubkey, operator_companion);
        assert_eq!(metas[3].pubkey, system_program_id());
        assert!(metas[3].is_writable);
        assert_eq!(metas[4].pubkey, evm_loader_id());
        assert!(!metas[4].is_writable && !metas[4].is_signer);
        assert_eq!(metas[5].pubkey, sender);
        assert_eq!(metas[6].pubkey, receiver);
        assert!(metas[1..4].iter().chain(&metas[5..]).all(|m| m.is_writable && !m.is_signer));
    }

    #[test]
    fn test_with_compute_budget_omits_zeroed() {
        let ix = Instruction::new_with_bytes(evm_loader_id(), &[0x1f], vec![]);
        assert_eq!(
            with_compute_budget(DEFAULT_UNITS, DEFAULT_ADDITIONAL_FEE, DEFAULT_HEAP_FRAME, ix.clone()).len(),
            3
        );
        assert_eq!(with_compute_budget(0, 0, DEFAULT_HEAP_FRAME, ix.clone()).len(), 2);
        assert_eq!(with_compute_budget(DEFAULT_UNITS, 0, 0, ix.clone()).len(), 2);
        let only = with_compute_budget(0, 0, 0, ix.clone());
        assert_eq!(only.len(), 1);
        assert_eq!(only[0], ix);
    }

    #[test]
    fn test_probe_reads_tx_count() {
        use crate::rpc::{MockSender, RpcRequest};
        use serde_json::json;

        let mut data = vec![0u8; ACCOUNT_RECORD_LEN];
        AccountRecord::encode_tx_count(42, &mut data);
        let sender = MockSender::new("succeeds".to_string());
        sender.add_mock(
            RpcRequest::GetAccountInfo,
            json!({
                "context": {"slot": 1},
                "value": {"data": [base64::encode(&data), "base64"], "lamports": 1},
            }),
        );
        let client = RpcClient::new_sender(sender);
        let count =
            transaction_count(&client, &Pubkey::new_unique(), 5, Duration::from_millis(0))
                .unwrap();
        assert_eq!(count, 42);
    }

    #[test]
    fn test_probe_absent_account() {
        let client = RpcClient::new_mock("succeeds".to_string());
        let err = transaction_count(&client, &Pubkey::new_unique(), 2, Duration::from_millis(0))
            .unwrap_err();
        assert!(matches!(err, ProbeError::AccountAbsent(_)));
    }
}
