use crate::evm_loader::{self, treasury_base};
use crate::solana::Pubkey;
use clap::{crate_description, crate_name, App, Arg, ArgMatches};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Chain id the execution environment is deployed with.
pub const DEFAULT_CHAIN_ID: u64 = 111;

pub const DEFAULT_NETWORK: &str = "night-stand";

/// Base secret user keys are derived from when none is given.
const DEFAULT_BASE_USER_SECRET: [u8; 32] = [
    0xc2, 0x62, 0x86, 0xee, 0xbe, 0x70, 0xb8, 0x38, 0x54, 0x58, 0x55, 0x32, 0x5d, 0x45, 0xb1,
    0x23, 0x14, 0x9c, 0x3c, 0xa4, 0xa5, 0x0e, 0x98, 0xb1, 0xfe, 0x7c, 0x78, 0x87, 0xe3, 0x32,
    0x7a, 0xa8,
];

/// Holds the configuration for a single run of the workload
#[derive(Debug, PartialEq, Eq)]
pub struct Config {
    pub json_rpc_url: String,
    pub evm_loader: Pubkey,
    pub chain_id: u64,
    pub network: String,
    pub operator_dir: PathBuf,
    pub operator_offset: usize,
    pub operator_count: usize,
    pub user_offset: usize,
    pub user_count: usize,
    pub base_user_secret: [u8; 32],
    pub threads: usize,
    /// Zero means run until interrupted.
    pub duration: Duration,
    pub units: u32,
    pub additional_fee: u32,
    pub heap_frame: u32,
    pub rpc_timeout: Duration,
    pub sample_confirmations: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            json_rpc_url: "http://127.0.0.1:8899".to_string(),
            evm_loader: Pubkey::default(),
            chain_id: DEFAULT_CHAIN_ID,
            network: DEFAULT_NETWORK.to_string(),
            operator_dir: PathBuf::from("operator-keypairs"),
            operator_offset: 0,
            operator_count: 8,
            user_offset: 0,
            user_count: 100,
            base_user_secret: DEFAULT_BASE_USER_SECRET,
            threads: 4,
            duration: Duration::from_secs(0),
            units: evm_loader::DEFAULT_UNITS,
            additional_fee: evm_loader::DEFAULT_ADDITIONAL_FEE,
            heap_frame: evm_loader::DEFAULT_HEAP_FRAME,
            rpc_timeout: Duration::from_secs(30),
            sample_confirmations: 0,
        }
    }
}

/// Defines and builds the CLI args for a run of the workload
pub fn build_args<'a>(version: &'_ str) -> App<'a, '_> {
    App::new(crate_name!())
        .about(crate_description!())
        .version(version)
        .arg(
            Arg::with_name("json_rpc_url")
                .short("u")
                .long("url")
                .value_name("URL")
                .takes_value(true)
                .help("JSON RPC URL of the target node"),
        )
        .arg(
            Arg::with_name("evm_loader")
                .long("evm-loader")
                .value_name("PUBKEY")
                .takes_value(true)
                .help("Address of the deployed execution program"),
        )
        .arg(
            Arg::with_name("chain_id")
                .long("chain-id")
                .value_name("NUM")
                .takes_value(true)
                .help("EIP-155 chain id the execution environment expects"),
        )
        .arg(
            Arg::with_name("network")
                .long("network")
                .value_name("NAME")
                .takes_value(true)
                .help("Deployment name selecting the treasury base [devnet, night-stand]"),
        )
        .arg(
            Arg::with_name("operator_dir")
                .long("operator-keys")
                .value_name("DIR")
                .takes_value(true)
                .help("Directory holding operator id{N}.json key files"),
        )
        .arg(
            Arg::with_name("operator_offset")
                .long("operators-offset")
                .value_name("NUM")
                .takes_value(true)
                .help("Index of the first operator key file to load"),
        )
        .arg(
            Arg::with_name("operator_count")
                .long("operators-count")
                .value_name("NUM")
                .takes_value(true)
                .help("Number of operator key files to load"),
        )
        .arg(
            Arg::with_name("user_offset")
                .long("users-offset")
                .value_name("NUM")
                .takes_value(true)
                .help("Index of the first derived user"),
        )
        .arg(
            Arg::with_name("user_count")
                .long("users-count")
                .value_name("NUM")
                .takes_value(true)
                .help("Number of users to derive; senders and receivers are drawn from this set"),
        )
        .arg(
            Arg::with_name("base_user_secret")
                .long("base-user-secret")
                .value_name("HEX")
                .takes_value(true)
                .help("32-byte hex secret user keys are derived from"),
        )
        .arg(
            Arg::with_name("threads")
                .short("t")
                .long("threads")
                .value_name("NUM")
                .takes_value(true)
                .help("Number of sender threads"),
        )
        .arg(
            Arg::with_name("duration")
                .long("duration")
                .value_name("SECS")
                .takes_value(true)
                .help("Seconds to run the workload, then exit; default is forever"),
        )
        .arg(
            Arg::with_name("units")
                .long("units")
                .value_name("NUM")
                .takes_value(true)
                .help("Compute units requested per transaction; 0 omits the request"),
        )
        .arg(
            Arg::with_name("additional_fee")
                .long("additional-fee")
                .value_name("NUM")
                .takes_value(true)
                .help("Additional fee attached to the compute unit request"),
        )
        .arg(
            Arg::with_name("heap_frame")
                .long("heap-frame")
                .value_name("BYTES")
                .takes_value(true)
                .help("Heap frame requested per transaction; 0 omits the request"),
        )
        .arg(
            Arg::with_name("rpc_timeout")
                .long("rpc-timeout")
                .value_name("SECS")
                .takes_value(true)
                .help("HTTP timeout of a single RPC request"),
        )
        .arg(
            Arg::with_name("sample_confirmations")
                .long("sample-confirmations")
                .value_name("NUM")
                .takes_value(true)
                .help("Poll the status of every Nth accepted transaction; 0 disables polling"),
        )
}

fn parse_field<T: FromStr>(value: &str, error: &'static str) -> Result<T, &'static str> {
    value.parse().map_err(|_| error)
}

/// Flag value if given, environment variable otherwise.
fn value_or_env(matches: &ArgMatches, name: &str, env_key: &str) -> Option<String> {
    matches
        .value_of(name)
        .map(str::to_string)
        .or_else(|| env::var(env_key).ok())
}

fn parse_hex32(value: &str) -> Option<[u8; 32]> {
    let hex = value.strip_prefix("0x").unwrap_or(value);
    if hex.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16).ok()?;
    }
    Some(out)
}

/// Parses a clap `ArgMatches` structure into a `Config`
pub fn parse_args(matches: &ArgMatches) -> Result<Config, &'static str> {
    let mut args = Config::default();

    if let Some(url) = matches.value_of("json_rpc_url") {
        args.json_rpc_url = url.to_string();
    }

    match matches.value_of("evm_loader") {
        Some(value) => {
            args.evm_loader = value.parse().map_err(|_| "can't parse evm-loader")?;
        }
        None => return Err("--evm-loader is required"),
    }

    if let Some(value) = matches.value_of("chain_id") {
        args.chain_id = parse_field(value, "can't parse chain-id")?;
    }

    if let Some(network) = value_or_env(matches, "network", "NETWORK") {
        args.network = network;
    }
    if treasury_base(&args.network).is_none() {
        return Err("unknown network, expected devnet or night-stand");
    }

    if let Some(dir) = matches.value_of("operator_dir") {
        args.operator_dir = PathBuf::from(dir);
    }
    if let Some(value) = value_or_env(matches, "operator_offset", "OPERATORS_OFFSET") {
        args.operator_offset = parse_field(&value, "can't parse operators-offset")?;
    }
    if let Some(value) = value_or_env(matches, "operator_count", "OPERATORS_COUNT") {
        args.operator_count = parse_field(&value, "can't parse operators-count")?;
    }
    if args.operator_count == 0 {
        return Err("operators-count must be at least 1");
    }

    if let Some(value) = value_or_env(matches, "user_offset", "USERS_OFFSET") {
        args.user_offset = parse_field(&value, "can't parse users-offset")?;
    }
    if let Some(value) = value_or_env(matches, "user_count", "USERS_COUNT") {
        args.user_count = parse_field(&value, "can't parse users-count")?;
    }

    if let Some(value) = matches.value_of("base_user_secret") {
        args.base_user_secret =
            parse_hex32(value).ok_or("can't parse base-user-secret, expected 32 hex bytes")?;
    }

    if let Some(value) = matches.value_of("threads") {
        args.threads = parse_field(value, "can't parse threads")?;
    }
    if args.threads == 0 {
        return Err("threads must be at least 1");
    }
    // every worker holds a distinct sender and receiver while it submits;
    // fewer users than that starves the pool and wedges the run
    if args.user_count < 2 * args.threads {
        return Err("users-count must be at least twice threads");
    }

    if let Some(value) = matches.value_of("duration") {
        args.duration = Duration::from_secs(parse_field(value, "can't parse duration")?);
    }

    if let Some(value) = matches.value_of("units") {
        args.units = parse_field(value, "can't parse units")?;
    }
    if let Some(value) = matches.value_of("additional_fee") {
        args.additional_fee = parse_field(value, "can't parse additional-fee")?;
    }
    if let Some(value) = matches.value_of("heap_frame") {
        args.heap_frame = parse_field(value, "can't parse heap-frame")?;
    }

    if let Some(value) = matches.value_of("rpc_timeout") {
        args.rpc_timeout = Duration::from_secs(parse_field(value, "can't parse rpc-timeout")?);
    }

    if let Some(value) = matches.value_of("sample_confirmations") {
        args.sample_confirmations = parse_field(value, "can't parse sample-confirmations")?;
    }

    Ok(args)
}
