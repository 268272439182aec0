/* Coinjoin Coordinator
 * Written by the Coinjoin Coordinator developers
 *
 * To the extent possible under law, the author(s) have dedicated all
 * copyright and related and neighboring rights to this software to
 * the public domain worldwide. This software is distributed without
 * any warranty.
 *
 * You should have received a copy of the CC0 Public Domain Dedication
 * along with this software.
 * If not, see <http://creativecommons.org/publicdomain/zero/1.0/>.
 */

//! # Coinjoin Coordinator
//!
//! Loads the configuration and the prison, connects to bitcoind and runs
//! the coordinator. JSON-RPC calls are read from stdin one per line, and
//! each response is written to stdout as one line. Whatever carries the
//! calls to participants sits in front of that.
//!

use std::io::{self, BufRead, Write};
use std::process;
use std::thread;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use coinjoin_coordinator::bitcoind::{Bitcoind, RpcError};
use coinjoin_coordinator::coinjoin::arena::{Arena, SystemClock};
use coinjoin_coordinator::coinjoin::credential::BalanceIssuerFactory;
use coinjoin_coordinator::coinjoin::prison::{PersistError, Prison};
use coinjoin_coordinator::coinjoin::server::{Handle, Server};
use coinjoin_coordinator::rpc_server::handle_json;
use coinjoin_coordinator::user_data::{config_path, load_configuration, prison_path, ConfigError};

#[derive(Debug, thiserror::Error)]
enum StartupError {
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error("loading prison: {0}")]
  Prison(#[from] PersistError),
  #[error(transparent)]
  Rpc(#[from] RpcError),
  #[error("spawning coordinator thread: {0}")]
  Io(#[from] io::Error),
}

fn serve_stdin(handle: &Handle) -> io::Result<()> {
  let stdin = io::stdin();
  let stdout = io::stdout();
  for line in stdin.lock().lines() {
    let line = line?;
    if line.trim().is_empty() {
      continue;
    }
    let response = handle_json(&line, handle);
    let mut out = stdout.lock();
    serde_json::to_writer(&mut out, &response)?;
    out.write_all(b"\n")?;
    out.flush()?;
  }
  Ok(())
}

fn run() -> Result<(), StartupError> {
  let config = load_configuration(&config_path()?)?;
  let network = config.network;
  info!("Starting coordinator for {}.", network);

  let prison_path = prison_path(network)?;
  let prison = Prison::load(&prison_path, config.coordinator.release_from_prison_after())?;
  info!("Loaded {} inmates from {}.", prison.len(), prison_path.display());

  let bitcoind = Bitcoind::new(&config.bitcoind, config.coordinator.fallback_fee_rate())?;
  let tick_period = Duration::from_secs(config.coordinator.tick_period_secs);
  let issuers = BalanceIssuerFactory::new(config.coordinator.credential_count);
  let arena = Arena::new(config.coordinator,
                         prison,
                         Box::new(bitcoind),
                         Box::new(issuers),
                         Box::new(SystemClock));

  let (server, handle) = Server::new(arena, tick_period, Some(prison_path));
  let coordinator = thread::Builder::new()
    .name(format!("coordinator-{}", network))
    .spawn(move || server.run())?;

  if let Err(e) = serve_stdin(&handle) {
    error!("Reading requests: {}", e);
  }
  info!("Input closed, shutting down.");
  let _ = handle.shutdown();
  if coordinator.join().is_err() {
    error!("Coordinator thread panicked.");
  }
  Ok(())
}

/// Entry point
fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(io::stderr)
    .init();

  if let Err(e) = run() {
    error!("Failed to start: {}", e);
    process::exit(1);
  }
}
