//! Command line and `cashd.conf` handling.

use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use cashd_chainstate::IndexConfig;
use cashd_consensus::upgrades::NetworkUpgrade;
use cashd_consensus::{chain_params, ChainParams, Network, UpgradeIndex};
use cashd_log::{Format, Level, LogConfig};

use crate::policy::{parse_fee_rate, MempoolPolicy, DEFAULT_MIN_RELAY_TX_FEE};

const DEFAULT_DATA_DIR: &str = "data";
const CONF_FILE_NAME: &str = "cashd.conf";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backend {
    Memory,
    Fjall,
}

impl Backend {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "memory" => Some(Self::Memory),
            "fjall" => Some(Self::Fjall),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub backend: Backend,
    pub data_dir: PathBuf,
    pub conf_path: PathBuf,
    pub network: Network,
    pub require_standard: bool,
    pub min_relay_fee_per_kb: i64,
    pub graviton_activation_time: Option<i64>,
    pub replay_protection_activation_time: Option<i64>,
    pub indexes: IndexConfig,
    pub rpc_addr: SocketAddr,
    pub log: LogConfig,
}

impl Config {
    /// Network parameters with the activation-time overrides applied.
    pub fn chain_params(&self) -> ChainParams {
        let mut params = chain_params(self.network);
        if let Some(time) = self.graviton_activation_time {
            params
                .consensus
                .set_activation(UpgradeIndex::Graviton, NetworkUpgrade::at_time(time));
        }
        if let Some(time) = self.replay_protection_activation_time {
            params
                .consensus
                .set_activation(UpgradeIndex::ReplayProtection, NetworkUpgrade::at_time(time));
        }
        params
    }

    pub fn mempool_policy(&self) -> MempoolPolicy {
        MempoolPolicy::standard(self.min_relay_fee_per_kb, self.require_standard)
    }
}

pub enum CliAction {
    Run(Config),
    PrintHelp,
    PrintVersion,
}

pub fn parse_args() -> Result<CliAction, String> {
    parse_args_from(std::env::args().skip(1))
}

pub fn parse_args_from<I>(raw_args: I) -> Result<CliAction, String>
where
    I: IntoIterator<Item = String>,
{
    let mut backend = Backend::Fjall;
    let mut backend_set = false;
    let mut data_dir: Option<PathBuf> = None;
    let mut conf_path: Option<PathBuf> = None;
    let mut network = Network::Mainnet;
    let mut network_set = false;
    let mut require_standard: Option<bool> = None;
    let mut min_relay_fee_per_kb = DEFAULT_MIN_RELAY_TX_FEE;
    let mut min_relay_fee_per_kb_set = false;
    let mut graviton_activation_time: Option<i64> = None;
    let mut replay_protection_activation_time: Option<i64> = None;
    let mut spent_index: Option<bool> = None;
    let mut address_index: Option<bool> = None;
    let mut timestamp_index: Option<bool> = None;
    let mut rpc_addr: Option<SocketAddr> = None;
    let mut log_level = Level::Info;
    let mut log_level_set = false;
    let mut log_format = Format::Text;
    let mut log_format_set = false;
    let mut log_timestamps = true;
    let mut log_timestamps_set = false;
    let mut categories = 0u32;
    let mut categories_set = false;

    let mut args = raw_args.into_iter();
    while let Some(raw) = args.next() {
        let (arg, inline) = match raw.split_once('=') {
            Some((name, value)) => (name.to_string(), Some(value.to_string())),
            None => (raw, None),
        };
        let mut value_for = |name: &str| -> Result<String, String> {
            match inline.clone() {
                Some(value) => Ok(value),
                None => args
                    .next()
                    .ok_or_else(|| format!("missing value for {name}\n{}", usage())),
            }
        };
        match arg.as_str() {
            "--backend" => {
                let value = value_for("--backend")?;
                backend = Backend::parse(&value)
                    .ok_or_else(|| format!("invalid backend '{value}'\n{}", usage()))?;
                backend_set = true;
            }
            "--datadir" | "--data-dir" => {
                data_dir = Some(PathBuf::from(value_for("--datadir")?));
            }
            "--conf" => {
                conf_path = Some(PathBuf::from(value_for("--conf")?));
            }
            "--network" => {
                let value = value_for("--network")?;
                network = Network::parse(&value)
                    .ok_or_else(|| format!("invalid network '{value}'\n{}", usage()))?;
                network_set = true;
            }
            "--testnet" => {
                network = Network::Testnet;
                network_set = true;
            }
            "--regtest" => {
                network = Network::Regtest;
                network_set = true;
            }
            "--acceptnonstdtxn" => {
                let value = inline.clone().unwrap_or_else(|| "1".to_string());
                let accept = parse_conf_bool(&value)
                    .ok_or_else(|| format!("invalid acceptnonstdtxn '{value}'\n{}", usage()))?;
                require_standard = Some(!accept);
            }
            "--minrelaytxfee" => {
                let value = value_for("--minrelaytxfee")?;
                min_relay_fee_per_kb = parse_fee_rate(&value)
                    .ok_or_else(|| format!("invalid minrelaytxfee '{value}'\n{}", usage()))?;
                min_relay_fee_per_kb_set = true;
            }
            "--gravitonactivationtime" => {
                let value = value_for("--gravitonactivationtime")?;
                graviton_activation_time = Some(parse_time(&value, "gravitonactivationtime")?);
            }
            "--replayprotectionactivationtime" => {
                let value = value_for("--replayprotectionactivationtime")?;
                replay_protection_activation_time =
                    Some(parse_time(&value, "replayprotectionactivationtime")?);
            }
            "--spentindex" => spent_index = Some(flag_value(inline.as_deref(), "spentindex")?),
            "--addressindex" => address_index = Some(flag_value(inline.as_deref(), "addressindex")?),
            "--timestampindex" => {
                timestamp_index = Some(flag_value(inline.as_deref(), "timestampindex")?)
            }
            "--rpcbind" => {
                let value = value_for("--rpcbind")?;
                rpc_addr = Some(
                    parse_socket_addr(&value, 0)
                        .ok_or_else(|| format!("invalid rpcbind '{value}'\n{}", usage()))?,
                );
            }
            "--loglevel" | "--log-level" => {
                let value = value_for("--loglevel")?;
                log_level = Level::parse(&value)
                    .ok_or_else(|| format!("invalid log level '{value}'\n{}", usage()))?;
                log_level_set = true;
            }
            "--logformat" | "--log-format" => {
                let value = value_for("--logformat")?;
                log_format = Format::parse(&value)
                    .ok_or_else(|| format!("invalid log format '{value}'\n{}", usage()))?;
                log_format_set = true;
            }
            "--logtimestamps" => {
                log_timestamps = flag_value(inline.as_deref(), "logtimestamps")?;
                log_timestamps_set = true;
            }
            "--no-logtimestamps" => {
                log_timestamps = false;
                log_timestamps_set = true;
            }
            "--debug" => {
                let value = value_for("--debug")?;
                categories |= cashd_log::parse_categories(&value)
                    .map_err(|err| format!("{err}\n{}", usage()))?;
                categories_set = true;
            }
            "--help" | "-h" => return Ok(CliAction::PrintHelp),
            "--version" | "-V" => return Ok(CliAction::PrintVersion),
            other => return Err(format!("unknown argument '{other}'\n{}", usage())),
        }
    }

    let data_dir = data_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let conf_file = conf_path.unwrap_or_else(|| data_dir.join(CONF_FILE_NAME));
    if let Some(conf) = load_conf(&conf_file)? {
        let last = |key: &str| conf.get(key).and_then(|values| values.last()).cloned();
        let conf_bool = |key: &str| -> Result<Option<bool>, String> {
            match last(key) {
                Some(raw) => parse_conf_bool(&raw).map(Some).ok_or_else(|| {
                    format!("invalid {key} value '{raw}' in {}", conf_file.display())
                }),
                None => Ok(None),
            }
        };

        if !network_set {
            if conf_bool("regtest")? == Some(true) {
                network = Network::Regtest;
            } else if conf_bool("testnet")? == Some(true) {
                network = Network::Testnet;
            }
        }
        if !backend_set {
            if let Some(raw) = last("backend") {
                backend = Backend::parse(&raw).ok_or_else(|| {
                    format!("invalid backend '{raw}' in {}", conf_file.display())
                })?;
            }
        }
        if require_standard.is_none() {
            require_standard = conf_bool("acceptnonstdtxn")?.map(|accept| !accept);
        }
        if !min_relay_fee_per_kb_set {
            if let Some(raw) = last("minrelaytxfee") {
                min_relay_fee_per_kb = parse_fee_rate(&raw).ok_or_else(|| {
                    format!("invalid minrelaytxfee '{raw}' in {}", conf_file.display())
                })?;
            }
        }
        if graviton_activation_time.is_none() {
            if let Some(raw) = last("gravitonactivationtime") {
                graviton_activation_time = Some(parse_time(&raw, "gravitonactivationtime")?);
            }
        }
        if replay_protection_activation_time.is_none() {
            if let Some(raw) = last("replayprotectionactivationtime") {
                replay_protection_activation_time =
                    Some(parse_time(&raw, "replayprotectionactivationtime")?);
            }
        }
        if spent_index.is_none() {
            spent_index = conf_bool("spentindex")?;
        }
        if address_index.is_none() {
            address_index = conf_bool("addressindex")?;
        }
        if timestamp_index.is_none() {
            timestamp_index = conf_bool("timestampindex")?;
        }
        if rpc_addr.is_none() {
            if let Some(raw) = last("rpcbind") {
                rpc_addr = Some(parse_socket_addr(&raw, 0).ok_or_else(|| {
                    format!("invalid rpcbind '{raw}' in {}", conf_file.display())
                })?);
            }
        }
        if !log_level_set {
            if let Some(raw) = last("loglevel") {
                log_level = Level::parse(&raw).ok_or_else(|| {
                    format!("invalid loglevel '{raw}' in {}", conf_file.display())
                })?;
            }
        }
        if !log_format_set {
            if let Some(raw) = last("logformat") {
                log_format = Format::parse(&raw).ok_or_else(|| {
                    format!("invalid logformat '{raw}' in {}", conf_file.display())
                })?;
            }
        }
        if !log_timestamps_set {
            if let Some(value) = conf_bool("logtimestamps")? {
                log_timestamps = value;
            }
        }
        if !categories_set {
            for raw in conf.get("debug").into_iter().flatten() {
                categories |= cashd_log::parse_categories(raw)
                    .map_err(|err| format!("{err} in {}", conf_file.display()))?;
            }
        }
    }

    let params = chain_params(network);
    let rpc_addr = match rpc_addr {
        Some(addr) if addr.port() == 0 => SocketAddr::new(addr.ip(), params.rpc_port),
        Some(addr) => addr,
        None => SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), params.rpc_port),
    };
    let indexes = IndexConfig {
        spent: spent_index.unwrap_or(false),
        address: address_index.unwrap_or(false),
        timestamp: timestamp_index.unwrap_or(false),
    };

    Ok(CliAction::Run(Config {
        backend,
        data_dir,
        conf_path: conf_file,
        network,
        require_standard: require_standard.unwrap_or(network != Network::Regtest),
        min_relay_fee_per_kb,
        graviton_activation_time,
        replay_protection_activation_time,
        indexes,
        rpc_addr,
        log: LogConfig {
            level: log_level,
            format: log_format,
            timestamps: log_timestamps,
            categories,
        },
    }))
}

pub fn load_conf(path: &Path) -> Result<Option<HashMap<String, Vec<String>>>, String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(format!("failed to read {}: {err}", path.display())),
    };

    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for raw_line in contents.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(idx) = line.find('#') {
            line = line[..idx].trim();
        }
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    Ok(Some(out))
}

pub fn parse_conf_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return Some(true);
    }
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn flag_value(inline: Option<&str>, name: &str) -> Result<bool, String> {
    match inline {
        None => Ok(true),
        Some(raw) => parse_conf_bool(raw).ok_or_else(|| format!("invalid {name} value '{raw}'")),
    }
}

fn parse_time(raw: &str, name: &str) -> Result<i64, String> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| format!("invalid {name} '{raw}'"))
}

fn parse_socket_addr(value: &str, default_port: u16) -> Option<SocketAddr> {
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Some(addr);
    }
    value
        .parse::<IpAddr>()
        .ok()
        .map(|ip| SocketAddr::new(ip, default_port))
}

pub fn usage() -> String {
    [
        "Usage:",
        "  cashd [options]",
        "",
        "Options:",
        "  --help, -h  Print this help and exit",
        "  --version, -V  Print version and exit",
        "  --backend  Storage backend to use (memory|fjall) (default: fjall)",
        "  --datadir  Base data directory (default: ./data)",
        "  --conf  Config file path (default: <datadir>/cashd.conf)",
        "  --network  Network to use (main|test|regtest) (default: main)",
        "  --testnet  Alias for --network test",
        "  --regtest  Alias for --network regtest",
        "  --acceptnonstdtxn=<0|1>  Relay and mine non-standard transactions (default: 1 on regtest, 0 otherwise)",
        "  --minrelaytxfee  Minimum relay fee rate in BCH/kB (default: 0.00001)",
        "  --gravitonactivationtime  Override the graviton activation median time",
        "  --replayprotectionactivationtime  Override the replay protection activation median time",
        "  --spentindex  Maintain the spent index (getspentinfo, getblockdeltas)",
        "  --addressindex  Maintain the address index (getaddressdeltas, getaddressutxos)",
        "  --timestampindex  Maintain the block timestamp index (getblockhashes)",
        "  --rpcbind  JSON-RPC listen address (default: 127.0.0.1:<network rpc port>)",
        "  --loglevel  Log verbosity (error|warn|info|debug|trace) (default: info)",
        "  --logformat  Log output format (text|json) (default: text)",
        "  --logtimestamps=<0|1>  Timestamps in text logs (default: 1)",
        "  --no-logtimestamps  Disable timestamps in text logs",
        "  --debug  Comma separated debug categories (script,mempool,index,reorg,rpc,db|all)",
    ]
    .join("\n")
}
