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

//! # Prison
//!
//! Coins whose owners disrupted a round. An imprisoned coin cannot register
//! in any round until it is released, which only happens when a release
//! period is configured and has elapsed.
//!

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use bitcoin::OutPoint;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

use crate::coinjoin::participant::Alice;
use crate::coinjoin::round::RoundId;

/// Failure to load or save the prison
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
  /// Filesystem error
  #[error("prison file: {0}")]
  Io(#[from] io::Error),
  /// The prison file was not valid
  #[error("prison file contents: {0}")]
  Json(#[from] serde_json::Error),
}

/// A banned coin
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Inmate {
  /// The coin
  pub outpoint: OutPoint,
  /// Round in which the coin's owner last misbehaved
  pub last_disruptive_round: RoundId,
  /// When the coin was imprisoned
  #[serde(with = "time::serde::rfc3339")]
  pub started: OffsetDateTime,
}

/// The banned-coin ledger
#[derive(Clone, Debug, Default)]
pub struct Prison {
  inmates: HashMap<OutPoint, Inmate>,
  release_after: Option<Duration>,
}

impl Prison {
  /// Constructs an empty prison. With `release_after` set, inmates are
  /// released that long after imprisonment; otherwise bans are permanent.
  pub fn new(release_after: Option<Duration>) -> Prison {
    Prison { inmates: HashMap::new(), release_after }
  }

  /// Imprisons every coin of `alice` for misbehaving in `round`
  pub fn note(&mut self, alice: &Alice, round: RoundId, now: OffsetDateTime) {
    for coin in alice.coins() {
      self.punish(coin.outpoint, round, now);
    }
  }

  /// Imprisons one coin
  pub fn punish(&mut self, outpoint: OutPoint, round: RoundId, now: OffsetDateTime) {
    debug!(round = %round, %outpoint, "imprisoning coin");
    self.inmates.insert(outpoint, Inmate { outpoint, last_disruptive_round: round, started: now });
  }

  /// Whether `outpoint` is banned at `now`
  pub fn is_banned(&self, outpoint: &OutPoint, now: OffsetDateTime) -> bool {
    match self.inmates.get(outpoint) {
      Some(inmate) => !self.is_released(inmate, now),
      None => false,
    }
  }

  /// Looks up an inmate
  pub fn get(&self, outpoint: &OutPoint) -> Option<&Inmate> {
    self.inmates.get(outpoint)
  }

  /// Number of inmates
  pub fn len(&self) -> usize {
    self.inmates.len()
  }

  /// Whether nobody is imprisoned
  pub fn is_empty(&self) -> bool {
    self.inmates.is_empty()
  }

  fn is_released(&self, inmate: &Inmate, now: OffsetDateTime) -> bool {
    match self.release_after {
      Some(period) => inmate.started + period <= now,
      None => false,
    }
  }

  /// Drops every inmate whose sentence is over, returning how many
  pub fn release_expired(&mut self, now: OffsetDateTime) -> usize {
    let release_after = match self.release_after {
      Some(period) => period,
      None => return 0,
    };
    let before = self.inmates.len();
    self.inmates.retain(|_, inmate| inmate.started + release_after > now);
    let released = before - self.inmates.len();
    if released > 0 {
      info!("Released {} coins from prison.", released);
    }
    released
  }

  /// Loads a prison from disk; a missing file is an empty prison
  pub fn load(path: &Path, release_after: Option<Duration>) -> Result<Prison, PersistError> {
    let file = match File::open(path) {
      Ok(file) => file,
      Err(ref e) if e.kind() == io::ErrorKind::NotFound => {
        info!("Did not find {}, starting with an empty prison.", path.display());
        return Ok(Prison::new(release_after));
      }
      Err(e) => return Err(e.into()),
    };
    let inmates: Vec<Inmate> = serde_json::from_reader(BufReader::new(file))?;
    info!("Loaded {} inmates from {}.", inmates.len(), path.display());
    Ok(Prison {
      inmates: inmates.into_iter().map(|inmate| (inmate.outpoint, inmate)).collect(),
      release_after,
    })
  }

  /// Saves the prison to disk, replacing the file atomically
  pub fn save(&self, path: &Path) -> Result<(), PersistError> {
    let mut inmates: Vec<&Inmate> = self.inmates.values().collect();
    inmates.sort_by_key(|inmate| inmate.started);

    let tmp_path = path.with_extension("tmp");
    {
      let mut writer = BufWriter::new(File::create(&tmp_path)?);
      serde_json::to_writer_pretty(&mut writer, &inmates)?;
      writer.flush()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use bitcoin::hashes::Hash;
  use bitcoin::{Amount, OutPoint, ScriptBuf, Txid, WPubkeyHash};
  use time::{Duration, OffsetDateTime};

  use super::*;
  use crate::coinjoin::participant::{AliceId, Coin};

  fn outpoint(n: u8) -> OutPoint {
    OutPoint::new(Txid::from_byte_array([n; 32]), n as u32)
  }

  fn alice(coins: &[u8]) -> Alice {
    let script = ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([1; 20]));
    let coins = coins.iter().map(|&n| Coin::new(outpoint(n), Amount::from_sat(10_000), script.clone())).collect();
    Alice::new(AliceId(7), coins, OffsetDateTime::UNIX_EPOCH)
  }

  #[test]
  fn note_bans_all_coins() {
    let now = OffsetDateTime::UNIX_EPOCH;
    let mut prison = Prison::new(None);
    prison.note(&alice(&[1, 2]), RoundId(9), now);
    assert_eq!(prison.len(), 2);
    assert!(prison.is_banned(&outpoint(1), now));
    assert!(prison.is_banned(&outpoint(2), now + Duration::days(3650)));
    assert!(!prison.is_banned(&outpoint(3), now));
    assert_eq!(prison.get(&outpoint(1)).unwrap().last_disruptive_round, RoundId(9));
    assert_eq!(prison.release_expired(now + Duration::days(3650)), 0);
  }

  #[test]
  fn release_after_period() {
    let now = OffsetDateTime::UNIX_EPOCH;
    let mut prison = Prison::new(Some(Duration::hours(1)));
    prison.punish(outpoint(1), RoundId(1), now);
    prison.punish(outpoint(2), RoundId(1), now + Duration::minutes(30));
    assert!(prison.is_banned(&outpoint(1), now + Duration::minutes(59)));
    assert!(!prison.is_banned(&outpoint(1), now + Duration::hours(1)));

    assert_eq!(prison.release_expired(now + Duration::hours(1)), 1);
    assert!(prison.get(&outpoint(1)).is_none());
    assert!(prison.is_banned(&outpoint(2), now + Duration::hours(1)));
  }

  #[test]
  fn save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prison.json");

    let loaded = Prison::load(&path, None).unwrap();
    assert!(loaded.is_empty());

    let now = OffsetDateTime::from_unix_timestamp(1_600_000_000).unwrap();
    let mut prison = Prison::new(None);
    prison.note(&alice(&[4, 5]), RoundId(0xabc), now);
    prison.save(&path).unwrap();

    let loaded = Prison::load(&path, None).unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded.get(&outpoint(4)), prison.get(&outpoint(4)));
    assert!(loaded.is_banned(&outpoint(5), now));
  }

  #[test]
  fn load_rejects_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prison.json");
    fs::write(&path, "not json").unwrap();
    assert!(matches!(Prison::load(&path, None), Err(PersistError::Json(_))));
  }
}
