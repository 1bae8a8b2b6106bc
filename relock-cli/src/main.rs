use std::process::{Command, ExitCode};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use tracing::error;

use relock_core::handle::LockHandle;
use relock_core::store::KeyValueStore;
use relock_core::store_sqlite::SqliteStore;
use relock_core::types::{LockOptions, LockRecord};

/// Exit code when the lock could not be acquired in time (EX_TEMPFAIL).
const EXIT_LOCK_BUSY: u8 = 75;

#[derive(Parser)]
#[command(
    name = "relock",
    about = "relock — run commands under a shared-store distributed lock",
    version
)]
struct Cli {
    /// Path to the SQLite lock store shared by all contenders
    #[arg(long, default_value = "relock.db", env = "RELOCK_STORE", global = true)]
    store: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire the lock, run a command, then release
    Run {
        /// Lock key naming the protected resource
        #[arg(short, long)]
        key: String,

        /// Lock TTL in milliseconds (abandoned-holder fencing)
        #[arg(long, default_value_t = 60_000)]
        ttl_ms: u64,

        /// Maximum time to wait for acquisition, in milliseconds
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,

        /// Command to run while holding the lock
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Show the current lock record for a key
    Inspect {
        #[arg(short, long)]
        key: String,
    },

    /// Forcibly delete a lock record (operator override)
    Clear {
        #[arg(short, long)]
        key: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let store = match SqliteStore::open(&cli.store) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(store = %cli.store, error = %err, "cannot open lock store");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Run {
            key,
            ttl_ms,
            timeout_ms,
            command,
        } => run(store, &key, ttl_ms, timeout_ms, &command),
        Commands::Inspect { key } => inspect(store, &key),
        Commands::Clear { key } => clear(store, &key),
    }
}

fn run(
    store: Arc<SqliteStore>,
    key: &str,
    ttl_ms: u64,
    timeout_ms: u64,
    command: &[String],
) -> ExitCode {
    let options = LockOptions::default()
        .with_ttl(Duration::from_millis(ttl_ms))
        .with_acquire_timeout(Duration::from_millis(timeout_ms));
    let mut handle = LockHandle::with_options(store, key, options);

    match handle.acquire() {
        Ok(true) => {}
        Ok(false) => {
            // The protected command must not run without the lock.
            error!(key, timeout_ms, "lock busy, giving up");
            return ExitCode::from(EXIT_LOCK_BUSY);
        }
        Err(err) => {
            error!(key, error = %err, "lock acquisition failed");
            return ExitCode::FAILURE;
        }
    }

    let status = Command::new(&command[0]).args(&command[1..]).status();
    let exit = match status {
        Ok(status) => match status.code() {
            Some(code) if (0..=255).contains(&code) => ExitCode::from(code as u8),
            _ => ExitCode::FAILURE,
        },
        Err(err) => {
            error!(command = %command[0], error = %err, "failed to spawn command");
            ExitCode::FAILURE
        }
    };

    if let Err(err) = handle.release() {
        error!(key, error = %err, "failed to release lock");
    }
    exit
}

fn inspect(store: Arc<SqliteStore>, key: &str) -> ExitCode {
    match store.get(key) {
        Ok(Some(raw)) => match LockRecord::parse(&raw) {
            Some(record) => {
                let expired = record.is_expired(epoch_ms());
                println!(
                    "{}",
                    serde_json::json!({
                        "key": key,
                        "held": true,
                        "expires_at_ms": record.expires_at_ms,
                        "owner": record.owner,
                        "expired": expired,
                    })
                );
                ExitCode::SUCCESS
            }
            None => {
                println!(
                    "{}",
                    serde_json::json!({ "key": key, "held": true, "raw": raw, "unparseable": true })
                );
                ExitCode::SUCCESS
            }
        },
        Ok(None) => {
            println!("{}", serde_json::json!({ "key": key, "held": false }));
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(key, error = %err, "failed to read lock record");
            ExitCode::FAILURE
        }
    }
}

fn clear(store: Arc<SqliteStore>, key: &str) -> ExitCode {
    match store.delete(key) {
        Ok(removed) => {
            println!("{}", serde_json::json!({ "key": key, "removed": removed }));
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(key, error = %err, "failed to clear lock record");
            ExitCode::FAILURE
        }
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
