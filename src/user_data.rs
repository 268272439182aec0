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

//! # User data handling
//!
//! Functions for storing and reading data from disk are here
//!

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bitcoin::hashes::Hash;
use bitcoin::{Amount, FeeRate, Network, ScriptBuf, WPubkeyHash};
use serde::{Deserialize, Serialize};
use time::Duration;
use tracing::{info, warn};

use crate::coinjoin::round::RoundParameters;
use crate::coinjoin::script::ScriptType;
use crate::constants::*;

const APP_NAME: &str = "coinjoin-coordinator";

/// Failure to locate or read the configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  /// Could not determine the XDG directories
  #[error("locating user directories: {0}")]
  Xdg(#[from] xdg::BaseDirectoriesError),
  /// Could not read the file
  #[error("reading configuration: {0}")]
  Io(#[from] io::Error),
  /// The file is not valid TOML, or has fields of the wrong type
  #[error("failed to parse configuration file: {0}")]
  Parse(#[from] toml::de::Error),
  /// The file parsed but the values make no sense together
  #[error("invalid configuration: {0}")]
  Invalid(String),
}

/// Returns a path to the user's configuration file on disk
pub fn config_path() -> Result<PathBuf, ConfigError> {
  let dirs = xdg::BaseDirectories::with_prefix(APP_NAME)?;
  Ok(dirs.place_config_file("coordinator.toml")?)
}

/// Returns a path to the prison file on disk
pub fn prison_path(network: Network) -> Result<PathBuf, ConfigError> {
  let dirs = xdg::BaseDirectories::with_prefix(APP_NAME)?;
  Ok(dirs.place_data_file(format!("prison.{}.json", network))?)
}

/// How to reach bitcoind
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BitcoindConfig {
  /// JSON-RPC url
  pub url: String,
  /// RPC user name
  pub user: Option<String>,
  /// RPC password
  pub password: Option<String>,
}

impl Default for BitcoindConfig {
  fn default() -> BitcoindConfig {
    BitcoindConfig { url: DEFAULT_BITCOIND_URL.to_owned(), user: None, password: None }
  }
}

/// Round policy
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
  /// Seconds between two ticks
  pub tick_period_secs: u64,
  /// Confirmation target for fee estimation, in blocks
  pub confirmation_target: u16,
  /// Fee rate to use when bitcoind has no estimate, in sat/vB
  pub fallback_fee_rate_sat_per_vb: u64,
  /// Fewest inputs a round may proceed with
  pub min_input_count_by_round: usize,
  /// Most inputs in a round
  pub max_input_count_by_round: usize,
  /// Most coins one Alice may register
  pub max_inputs_per_alice: usize,
  /// Smallest registrable value, in sat
  pub min_registrable_amount: u64,
  /// Largest registrable value, in sat
  pub max_registrable_amount: u64,
  /// Vsize budget of each Alice
  pub per_alice_vsize_allocation: u64,
  /// Input registration timeout of ordinary rounds, in s
  pub standard_input_registration_timeout_secs: u64,
  /// Input registration timeout of blame rounds, in s
  pub blame_input_registration_timeout_secs: u64,
  /// Connection confirmation timeout, in s
  pub connection_confirmation_timeout_secs: u64,
  /// Output registration timeout, in s
  pub output_registration_timeout_secs: u64,
  /// Transaction signing timeout, in s
  pub transaction_signing_timeout_secs: u64,
  /// Seconds after which banned coins are released. Bans are permanent
  /// if unset.
  pub release_from_prison_after_secs: Option<u64>,
  /// Where unclaimed value goes
  pub blame_script: ScriptBuf,
  /// Identifier bound into ownership proofs
  pub coordinator_identifier: String,
  /// Credentials per credential request
  pub credential_count: usize,
}

impl Default for CoordinatorConfig {
  fn default() -> CoordinatorConfig {
    CoordinatorConfig {
      tick_period_secs: DEFAULT_TICK_PERIOD,
      confirmation_target: DEFAULT_CONFIRMATION_TARGET,
      fallback_fee_rate_sat_per_vb: DEFAULT_FALLBACK_FEE_RATE,
      min_input_count_by_round: DEFAULT_MIN_INPUT_COUNT,
      max_input_count_by_round: DEFAULT_MAX_INPUT_COUNT,
      max_inputs_per_alice: DEFAULT_MAX_INPUTS_PER_ALICE,
      min_registrable_amount: DEFAULT_MIN_REGISTRABLE_AMOUNT,
      max_registrable_amount: DEFAULT_MAX_REGISTRABLE_AMOUNT,
      per_alice_vsize_allocation: DEFAULT_PER_ALICE_VSIZE_ALLOCATION,
      standard_input_registration_timeout_secs: DEFAULT_INPUT_REGISTRATION_TIMEOUT,
      blame_input_registration_timeout_secs: DEFAULT_BLAME_INPUT_REGISTRATION_TIMEOUT,
      connection_confirmation_timeout_secs: DEFAULT_CONNECTION_CONFIRMATION_TIMEOUT,
      output_registration_timeout_secs: DEFAULT_OUTPUT_REGISTRATION_TIMEOUT,
      transaction_signing_timeout_secs: DEFAULT_TRANSACTION_SIGNING_TIMEOUT,
      release_from_prison_after_secs: None,
      // Operators must set their own
      blame_script: unspendable_blame_script(),
      coordinator_identifier: DEFAULT_COORDINATOR_IDENTIFIER.to_owned(),
      credential_count: DEFAULT_CREDENTIAL_COUNT,
    }
  }
}

/// Placeholder for the coordinator's own script: nobody has the key
fn unspendable_blame_script() -> ScriptBuf {
  ScriptBuf::new_p2wpkh(&WPubkeyHash::all_zeros())
}

fn secs(n: u64) -> Duration {
  Duration::seconds(n.min(i64::MAX as u64) as i64)
}

impl CoordinatorConfig {
  /// Whether unclaimed value would go to the unspendable placeholder
  /// script rather than one the operator controls
  pub fn uses_placeholder_blame_script(&self) -> bool {
    self.blame_script == unspendable_blame_script()
  }

  /// Fee rate used when estimation fails
  pub fn fallback_fee_rate(&self) -> FeeRate {
    FeeRate::from_sat_per_vb(self.fallback_fee_rate_sat_per_vb).unwrap_or(FeeRate::BROADCAST_MIN)
  }

  /// How long banned coins stay banned, if not forever
  pub fn release_from_prison_after(&self) -> Option<Duration> {
    self.release_from_prison_after_secs.map(secs)
  }

  /// Parameters of a new round at `fee_rate`
  pub fn round_parameters(&self, fee_rate: FeeRate, blame: bool) -> RoundParameters {
    let input_registration_timeout = if blame {
      self.blame_input_registration_timeout_secs
    } else {
      self.standard_input_registration_timeout_secs
    };
    RoundParameters {
      fee_rate,
      min_input_count: self.min_input_count_by_round,
      max_input_count: self.max_input_count_by_round,
      max_inputs_per_alice: self.max_inputs_per_alice,
      min_registrable_amount: Amount::from_sat(self.min_registrable_amount),
      max_registrable_amount: Amount::from_sat(self.max_registrable_amount),
      per_alice_vsize_allocation: self.per_alice_vsize_allocation,
      input_registration_timeout: secs(input_registration_timeout),
      connection_confirmation_timeout: secs(self.connection_confirmation_timeout_secs),
      output_registration_timeout: secs(self.output_registration_timeout_secs),
      transaction_signing_timeout: secs(self.transaction_signing_timeout_secs),
    }
  }

  /// Checks that the values make sense together
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.min_input_count_by_round == 0 {
      return Err(ConfigError::Invalid("min_input_count_by_round must be positive".to_owned()));
    }
    if self.min_input_count_by_round > self.max_input_count_by_round {
      return Err(ConfigError::Invalid("min_input_count_by_round exceeds max_input_count_by_round".to_owned()));
    }
    if self.max_inputs_per_alice == 0 {
      return Err(ConfigError::Invalid("max_inputs_per_alice must be positive".to_owned()));
    }
    if self.min_registrable_amount > self.max_registrable_amount {
      return Err(ConfigError::Invalid("min_registrable_amount exceeds max_registrable_amount".to_owned()));
    }
    if self.max_registrable_amount > Amount::MAX_MONEY.to_sat() {
      return Err(ConfigError::Invalid("max_registrable_amount exceeds the money supply".to_owned()));
    }
    if self.per_alice_vsize_allocation < P2WPKH_INPUT_VSIZE + P2WPKH_OUTPUT_VSIZE {
      return Err(ConfigError::Invalid(format!(
        "per_alice_vsize_allocation must fit at least one input and one output ({} vbytes)",
        P2WPKH_INPUT_VSIZE + P2WPKH_OUTPUT_VSIZE
      )));
    }
    if self.credential_count == 0 {
      return Err(ConfigError::Invalid("credential_count must be positive".to_owned()));
    }
    if !ScriptType::classify(&self.blame_script).is_standard() {
      return Err(ConfigError::Invalid("blame_script is not a standard output script".to_owned()));
    }
    if self.tick_period_secs == 0 {
      return Err(ConfigError::Invalid("tick_period_secs must be positive".to_owned()));
    }
    Ok(())
  }
}

/// User's global program configuration
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// The network bitcoind is on
  pub network: Network,
  /// How to reach bitcoind
  pub bitcoind: BitcoindConfig,
  /// Round policy
  pub coordinator: CoordinatorConfig,
}

impl Default for Config {
  fn default() -> Config {
    Config {
      network: Network::Regtest,
      bitcoind: BitcoindConfig::default(),
      coordinator: CoordinatorConfig::default(),
    }
  }
}

fn read_configuration(path: &Path) -> Result<Config, ConfigError> {
  let contents = fs::read_to_string(path)?;
  let config: Config = toml::from_str(&contents)?;
  Ok(config)
}

/// Parses a configuration file. A missing file gives the defaults; anything
/// else wrong with it is an error, since the user must've made a mistake.
pub fn load_configuration(path: &Path) -> Result<Config, ConfigError> {
  let config = match read_configuration(path) {
    Ok(config) => {
      info!("Loaded configuration from {}.", path.display());
      config
    }
    Err(ConfigError::Io(ref e)) if e.kind() == io::ErrorKind::NotFound => {
      info!("Did not find {}, using default configuration.", path.display());
      Config::default()
    }
    Err(e) => return Err(e),
  };
  config.coordinator.validate()?;
  if config.coordinator.uses_placeholder_blame_script() {
    warn!("No blame_script configured: unclaimed output value will be burned. Set coordinator.blame_script.");
  }
  Ok(config)
}
