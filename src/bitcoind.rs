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

//! # Bitcoin Daemon
//!
//! The coordinator needs two things from the network: a fee estimate when
//! it opens a round, and a way to broadcast the finished coinjoin. Both go
//! through bitcoind's JSON-RPC interface.

use std::str::FromStr;

use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{FeeRate, Transaction, Txid};
use serde::Deserialize;
use serde_json::value::to_raw_value;
use tracing::{debug, warn};

use crate::user_data::BitcoindConfig;

/// Failure talking to bitcoind
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
  /// Could not set up the client
  #[error("connecting to bitcoind: {0}")]
  Connect(String),
  /// The call failed, in transport or on the node
  #[error("bitcoind call failed: {0}")]
  Call(#[from] jsonrpc::Error),
  /// Could not encode call parameters
  #[error("encoding parameters: {0}")]
  Params(#[from] serde_json::Error),
  /// The node answered with something we did not expect
  #[error("unexpected response from bitcoind: {0}")]
  Response(String),
}

/// What the coordinator needs from the node
pub trait BitcoinRpc: Send {
  /// Fee rate for confirmation within `target` blocks
  fn estimate_fee_rate(&self, target: u16) -> Result<FeeRate, RpcError>;

  /// Broadcasts a transaction
  fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, RpcError>;
}

#[derive(Deserialize)]
struct EstimateSmartFee {
  feerate: Option<f64>,
  #[serde(default)]
  errors: Vec<String>,
}

/// Converts bitcoind's BTC/kvB to a fee rate, never below the relay minimum
pub fn fee_rate_from_btc_per_kvb(btc_per_kvb: f64) -> FeeRate {
  let sat_per_kvb = (btc_per_kvb * 100_000_000.0).round().max(0.0) as u64;
  FeeRate::from_sat_per_kwu(sat_per_kvb / 4).max(FeeRate::BROADCAST_MIN)
}

/// A bitcoind JSON-RPC client
pub struct Bitcoind {
  client: jsonrpc::Client,
  fallback_fee_rate: FeeRate,
}

impl Bitcoind {
  /// Constructor. `fallback_fee_rate` is used when the node has no
  /// estimate, as on a fresh regtest chain.
  pub fn new(config: &BitcoindConfig, fallback_fee_rate: FeeRate) -> Result<Bitcoind, RpcError> {
    let client = jsonrpc::Client::simple_http(&config.url, config.user.clone(), config.password.clone())
      .map_err(|e| RpcError::Connect(e.to_string()))?;
    Ok(Bitcoind { client, fallback_fee_rate })
  }
}

impl BitcoinRpc for Bitcoind {
  fn estimate_fee_rate(&self, target: u16) -> Result<FeeRate, RpcError> {
    let params = to_raw_value(&(target, "CONSERVATIVE"))?;
    let estimate: EstimateSmartFee = self.client.call("estimatesmartfee", Some(&*params))?;
    match estimate.feerate {
      Some(btc_per_kvb) => {
        let fee_rate = fee_rate_from_btc_per_kvb(btc_per_kvb);
        debug!("Fee estimate for {} blocks: {} sat/vB", target, fee_rate.to_sat_per_vb_ceil());
        Ok(fee_rate)
      }
      None => {
        warn!("No fee estimate for {} blocks ({}), using fallback of {} sat/vB.",
              target, estimate.errors.join("; "), self.fallback_fee_rate.to_sat_per_vb_ceil());
        Ok(self.fallback_fee_rate)
      }
    }
  }

  fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, RpcError> {
    let params = to_raw_value(&[serialize_hex(tx)])?;
    let txid: String = self.client.call("sendrawtransaction", Some(&*params))?;
    Txid::from_str(&txid).map_err(|e| RpcError::Response(format!("txid {}: {}", txid, e)))
  }
}
