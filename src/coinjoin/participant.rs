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

//! # Participants
//!
//! Alices register inputs, Bobs register outputs. Neither knows about the
//! other: the only link is the credentials, which the coordinator never sees
//! in the clear.

use bitcoin::{Amount, FeeRate, OutPoint, ScriptBuf, TxOut};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::coinjoin::script::ScriptType;

hex_id!(
  /// Identifier of an Alice, unique within its round
  AliceId
);

/// Fee for `vsize` vbytes at `fee_rate`, in sat
pub fn fee_for_vsize(fee_rate: FeeRate, vsize: u64) -> i64 {
  fee_rate.fee_vb(vsize).unwrap_or(Amount::MAX_MONEY).to_sat() as i64
}

/// An unspent output offered as a coinjoin input
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Coin {
  /// The output being spent
  pub outpoint: OutPoint,
  /// Its value and script
  pub txout: TxOut,
}

impl Coin {
  /// Constructs a coin
  pub fn new(outpoint: OutPoint, value: Amount, script_pubkey: ScriptBuf) -> Coin {
    Coin { outpoint, txout: TxOut { value, script_pubkey } }
  }

  /// Value of the coin
  pub fn amount(&self) -> Amount {
    self.txout.value
  }

  /// Type of the coin's script
  pub fn script_type(&self) -> ScriptType {
    ScriptType::classify(&self.txout.script_pubkey)
  }
}

/// An input-side participant
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Alice {
  id: AliceId,
  coins: Vec<Coin>,
  deadline: OffsetDateTime,
  confirmed_connection: bool,
}

impl Alice {
  /// Constructs a new, unconfirmed Alice
  pub fn new(id: AliceId, coins: Vec<Coin>, deadline: OffsetDateTime) -> Alice {
    Alice { id, coins, deadline, confirmed_connection: false }
  }

  /// The Alice's id
  pub fn id(&self) -> AliceId {
    self.id
  }

  /// Registered coins
  pub fn coins(&self) -> &[Coin] {
    &self.coins
  }

  /// Whether `outpoint` is one of this Alice's coins
  pub fn owns(&self, outpoint: &OutPoint) -> bool {
    self.coins.iter().any(|coin| coin.outpoint == *outpoint)
  }

  /// Time after which the Alice is dropped if still in input registration
  pub fn deadline(&self) -> OffsetDateTime {
    self.deadline
  }

  /// Moves the deadline to `timeout` after `now`
  pub fn set_deadline_relative_to(&mut self, now: OffsetDateTime, timeout: Duration) {
    self.deadline = now + timeout;
  }

  /// Whether the Alice has confirmed its connection
  pub fn is_confirmed(&self) -> bool {
    self.confirmed_connection
  }

  /// Records that the Alice confirmed its connection
  pub fn confirm_connection(&mut self) {
    self.confirmed_connection = true;
  }

  /// Sum of the coin values, saturating at `u64::MAX` sat
  pub fn total_input_amount(&self) -> Amount {
    Amount::from_sat(self.coins.iter().fold(0u64, |acc, coin| acc.saturating_add(coin.amount().to_sat())))
  }

  /// Vsize of spending all the coins. Only coins of supported script
  /// types are ever registered.
  pub fn total_input_vsize(&self) -> u64 {
    self.coins.iter().filter_map(|coin| coin.script_type().input_vsize()).sum()
  }

  /// Amount credentials the Alice may request: coin values minus the fee
  /// for spending them
  pub fn remaining_amount_credentials(&self, fee_rate: FeeRate) -> i64 {
    let total = i64::try_from(self.total_input_amount().to_sat()).unwrap_or(i64::MAX);
    total.saturating_sub(fee_for_vsize(fee_rate, self.total_input_vsize()))
  }

  /// Vsize credentials the Alice may request: its allocation minus what
  /// its inputs use
  pub fn remaining_vsize_credentials(&self, vsize_allocation: u64) -> i64 {
    vsize_allocation as i64 - self.total_input_vsize() as i64
  }
}

/// An output-side participant
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Bob {
  script: ScriptBuf,
  credential_amount: i64,
  output_vsize: u64,
}

impl Bob {
  /// Constructs a Bob, or `None` if outputs of the script's type are not
  /// supported
  pub fn new(script: ScriptBuf, credential_amount: i64) -> Option<Bob> {
    let output_vsize = ScriptType::classify(&script).output_vsize()?;
    Some(Bob { script, credential_amount, output_vsize })
  }

  /// The destination script
  pub fn script(&self) -> &ScriptBuf {
    &self.script
  }

  /// Value of the amount credentials this Bob redeemed
  pub fn credential_amount(&self) -> i64 {
    self.credential_amount
  }

  /// Vsize credentials the output costs
  pub fn output_vsize(&self) -> u64 {
    self.output_vsize
  }

  /// Value the output will carry: the redeemed amount minus the fee for
  /// the output itself
  pub fn output_amount(&self, fee_rate: FeeRate) -> i64 {
    self.credential_amount.saturating_sub(fee_for_vsize(fee_rate, self.output_vsize))
  }
}
