//! cashd node: mempool, relay policy, transaction oracle and JSON-RPC.

pub mod config;
pub mod mempool;
pub mod node;
pub mod oracle;
pub mod policy;
pub mod rpc;

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use cashd_chainstate::ChainState;
use cashd_log::{log_info, log_warn};
use cashd_storage::fjall::FjallStore;
use cashd_storage::memory::MemoryStore;
use cashd_storage::KeyValueStore;
use fs2::FileExt;

use crate::config::{parse_args, usage, Backend, CliAction, Config};
use crate::node::Node;

const DATA_DIR_LOCK_FILE_NAME: &str = ".lock";

pub async fn run_entry() -> Result<(), String> {
    match parse_args()? {
        CliAction::PrintHelp => {
            println!("{}", usage());
            Ok(())
        }
        CliAction::PrintVersion => {
            println!("cashd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliAction::Run(config) => run_with_config(config).await,
    }
}

async fn run_with_config(config: Config) -> Result<(), String> {
    cashd_log::init(config.log);
    log_info!(
        "Startup: backend={:?}, network={}, data_dir={}",
        config.backend,
        config.network.as_str(),
        config.data_dir.display()
    );

    fs::create_dir_all(&config.data_dir).map_err(|err| err.to_string())?;
    let _data_dir_lock = lock_data_dir(&config.data_dir)?;

    match config.backend {
        Backend::Memory => {
            log_warn!("memory backend selected; chain state is discarded on exit");
            serve(config, Arc::new(MemoryStore::new())).await
        }
        Backend::Fjall => {
            let db_path = config.data_dir.join("db");
            let store = FjallStore::open(&db_path).map_err(|err| {
                format!("failed to open database {}: {err}", db_path.display())
            })?;
            serve(config, Arc::new(store)).await
        }
    }
}

async fn serve<S: KeyValueStore + Send + Sync + 'static>(
    config: Config,
    store: Arc<S>,
) -> Result<(), String> {
    let chain = ChainState::new(store, config.chain_params(), config.indexes);
    let node = Arc::new(Node::new(chain, config.mempool_policy()));
    let purged = node.startup().map_err(|err| err.to_string())?;
    if purged > 0 {
        log_info!("Startup: dropped {purged} stale mempool spend records");
    }
    match node.chain().best_block().map_err(|err| err.to_string())? {
        Some(tip) => log_info!("Startup: tip at height {}", tip.height),
        None => log_info!("Startup: empty chain"),
    }

    let result = tokio::select! {
        result = rpc::serve_rpc(config.rpc_addr, Arc::clone(&node)) => result,
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| format!("failed to listen for shutdown signal: {err}"))?;
            log_info!("Shutdown requested");
            Ok(())
        }
    };
    node.chain().flush().map_err(|err| err.to_string())?;
    result
}

struct DataDirLock {
    _file: File,
}

fn lock_data_dir(data_dir: &Path) -> Result<DataDirLock, String> {
    let lock_path = data_dir.join(DATA_DIR_LOCK_FILE_NAME);
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|err| format!("failed to open lock file {}: {err}", lock_path.display()))?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={}", std::process::id());
            let _ = file.flush();
            Ok(DataDirLock { _file: file })
        }
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
            let mut holder = String::new();
            let _ = File::open(&lock_path).and_then(|mut reader| reader.read_to_string(&mut holder));
            let holder = holder.trim();
            let suffix = if holder.is_empty() {
                String::new()
            } else {
                format!(" ({holder})")
            };
            Err(format!(
                "data dir {} is already locked (another cashd instance may be running); lock file {}{suffix}",
                data_dir.display(),
                lock_path.display()
            ))
        }
        Err(err) => Err(format!(
            "failed to lock data dir {} (lock file {}): {err}",
            data_dir.display(),
            lock_path.display()
        )),
    }
}
