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

//! # Rounds
//!
//! A round is one run of the protocol, producing (at most) one coinjoin
//! transaction. It moves forward through the phases in order and never
//! back. It does not move by itself: the arena looks at it on every tick
//! and decides whether a phase is finished.
//!

use std::collections::{BTreeMap, HashMap, HashSet};

use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{absolute, Amount, FeeRate, OutPoint, Sequence, Transaction, TxIn, TxOut, Witness};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::{error, info};

use crate::coinjoin::credential::CredentialIssuer;
use crate::coinjoin::participant::{Alice, AliceId, Bob, Coin};
use crate::coinjoin::script::{verify_p2wpkh_witness, ScriptType};

hex_id!(
  /// Identifier of a round
  RoundId
);

/// Current phase of a round
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum Phase {
  /// Alices register coins
  InputRegistration,
  /// Alices prove they are still around and get their real credentials
  ConnectionConfirmation,
  /// Bobs redeem credentials for outputs
  OutputRegistration,
  /// Alices sign the assembled transaction
  TransactionSigning,
  /// The transaction was broadcast. Terminal.
  TransactionBroadcasting,
}

/// Parameters fixed when a round is created
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RoundParameters {
  /// Fee rate every input and output pays for itself
  pub fee_rate: FeeRate,
  /// Fewest inputs the round may proceed with
  pub min_input_count: usize,
  /// Most inputs the round accepts
  pub max_input_count: usize,
  /// Most coins a single Alice may register
  pub max_inputs_per_alice: usize,
  /// Smallest input total or output value accepted
  pub min_registrable_amount: Amount,
  /// Largest input total or output value accepted
  pub max_registrable_amount: Amount,
  /// Vsize budget of each Alice, covering its inputs and outputs
  pub per_alice_vsize_allocation: u64,
  /// How long input registration stays open
  pub input_registration_timeout: Duration,
  /// How long Alices have to confirm their connection
  pub connection_confirmation_timeout: Duration,
  /// How long Bobs have to register outputs
  pub output_registration_timeout: Duration,
  /// How long Alices have to sign
  pub transaction_signing_timeout: Duration,
}

impl RoundParameters {
  /// Timeout of `phase`, if it has one
  pub fn timeout(&self, phase: Phase) -> Option<Duration> {
    match phase {
      Phase::InputRegistration => Some(self.input_registration_timeout),
      Phase::ConnectionConfirmation => Some(self.connection_confirmation_timeout),
      Phase::OutputRegistration => Some(self.output_registration_timeout),
      Phase::TransactionSigning => Some(self.transaction_signing_timeout),
      Phase::TransactionBroadcasting => None,
    }
  }
}

/// Where a blame round came from, and who may join it
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BlameOrigin {
  /// The round which failed
  pub round: RoundId,
  /// Coins of the Alices which behaved
  pub whitelist: HashSet<OutPoint>,
}

/// Failure to apply a witness
#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum SigningError {
  /// There is no coinjoin yet
  #[error("transaction is not assembled")]
  NotAssembled,
  /// The transaction has no such input
  #[error("input index {0} out of range")]
  IndexOutOfRange(usize),
  /// The input spends a coin nobody registered
  #[error("input {0} does not spend a registered coin")]
  UnknownCoin(usize),
  /// The witness does not verify
  #[error("invalid witness for input {0}")]
  InvalidWitness(usize),
}

/// Adds `out`, consolidating it into an output paying the same script if
/// there is one. Returns whether it was appended as a new output.
fn add_output(outputs: &mut Vec<TxOut>, out: TxOut) -> bool {
  match outputs.iter_mut().find(|existing| existing.script_pubkey == out.script_pubkey) {
    Some(existing) => {
      existing.value = existing.value.checked_add(out.value).unwrap_or(Amount::MAX_MONEY);
      false
    }
    None => {
      outputs.push(out);
      true
    }
  }
}

/// One run of the protocol
pub struct Round {
  id: RoundId,
  phase: Phase,
  phase_started: BTreeMap<Phase, OffsetDateTime>,
  params: RoundParameters,
  blame_origin: Option<BlameOrigin>,
  amount_issuer: Box<dyn CredentialIssuer>,
  vsize_issuer: Box<dyn CredentialIssuer>,
  alices: Vec<Alice>,
  bobs: Vec<Bob>,
  coinjoin: Option<Transaction>,
}

impl Round {
  /// Creates a round in input registration
  pub fn new(id: RoundId,
             params: RoundParameters,
             amount_issuer: Box<dyn CredentialIssuer>,
             vsize_issuer: Box<dyn CredentialIssuer>,
             blame_origin: Option<BlameOrigin>,
             now: OffsetDateTime)
             -> Round {
    let mut phase_started = BTreeMap::new();
    phase_started.insert(Phase::InputRegistration, now);
    Round {
      id,
      phase: Phase::InputRegistration,
      phase_started,
      params,
      blame_origin,
      amount_issuer,
      vsize_issuer,
      alices: vec![],
      bobs: vec![],
      coinjoin: None,
    }
  }

  /// Retrieves the immutable ID of the round
  pub fn id(&self) -> RoundId {
    self.id
  }

  /// Current phase
  pub fn phase(&self) -> Phase {
    self.phase
  }

  /// Parameters of the round
  pub fn params(&self) -> &RoundParameters {
    &self.params
  }

  /// Whether this is a blame round
  pub fn is_blame_round(&self) -> bool {
    self.blame_origin.is_some()
  }

  /// The failed round this blame round retries, if any
  pub fn blame_of(&self) -> Option<RoundId> {
    self.blame_origin.as_ref().map(|origin| origin.round)
  }

  /// Whether `outpoint` may register here. Ordinary rounds accept anything.
  pub fn is_whitelisted(&self, outpoint: &OutPoint) -> bool {
    match self.blame_origin {
      Some(ref origin) => origin.whitelist.contains(outpoint),
      None => true,
    }
  }

  /// Moves to `phase`. Phases never go backwards; an attempt to do so is
  /// a bug and is ignored.
  pub fn set_phase(&mut self, phase: Phase, now: OffsetDateTime) {
    if phase <= self.phase {
      error!(round = %self.id, from = ?self.phase, to = ?phase, "refusing phase regression");
      return;
    }
    info!(round = %self.id, "Phase changed: {:?} -> {:?}", self.phase, phase);
    self.phase = phase;
    self.phase_started.insert(phase, now);
  }

  /// When the current phase started
  pub fn phase_started(&self) -> OffsetDateTime {
    // Every phase we are in has a start time
    self.phase_started.get(&self.phase).copied().unwrap_or(OffsetDateTime::UNIX_EPOCH)
  }

  /// Whether the current phase's timeout has passed
  pub fn phase_timed_out(&self, now: OffsetDateTime) -> bool {
    match self.params.timeout(self.phase) {
      Some(timeout) => self.phase_started() + timeout < now,
      None => false,
    }
  }

  /// Whether input registration is over: the phase moved on, the round is
  /// full, or registration has been open too long
  pub fn is_input_registration_ended(&self, now: OffsetDateTime) -> bool {
    if self.phase > Phase::InputRegistration {
      return true;
    }
    if self.input_count() >= self.params.max_input_count {
      return true;
    }
    self.phase_timed_out(now)
  }

  /// Number of registered coins, over all Alices
  pub fn input_count(&self) -> usize {
    self.alices.iter().map(|alice| alice.coins().len()).sum()
  }

  /// Whether enough coins are registered to proceed
  pub fn has_enough_inputs(&self) -> bool {
    self.input_count() >= self.params.min_input_count
  }

  /// Registered Alices
  pub fn alices(&self) -> &[Alice] {
    &self.alices
  }

  /// Adds an Alice
  pub fn add_alice(&mut self, alice: Alice) {
    self.alices.push(alice);
  }

  /// Looks up an Alice
  pub fn alice(&self, id: AliceId) -> Option<&Alice> {
    self.alices.iter().find(|alice| alice.id() == id)
  }

  /// Looks up an Alice
  pub fn alice_mut(&mut self, id: AliceId) -> Option<&mut Alice> {
    self.alices.iter_mut().find(|alice| alice.id() == id)
  }

  /// Removes all Alices matching `pred`, returning them
  pub fn remove_alices<F: FnMut(&Alice) -> bool>(&mut self, mut pred: F) -> Vec<Alice> {
    let (removed, kept): (Vec<Alice>, Vec<Alice>) = self.alices.drain(..).partition(|alice| pred(alice));
    self.alices = kept;
    removed
  }

  /// Whether some Alice already registered `outpoint`
  pub fn is_registered(&self, outpoint: &OutPoint) -> bool {
    self.alices.iter().any(|alice| alice.owns(outpoint))
  }

  fn registered_coin(&self, outpoint: &OutPoint) -> Option<&Coin> {
    self.alices.iter().flat_map(|alice| alice.coins()).find(|coin| coin.outpoint == *outpoint)
  }

  /// Registered Bobs
  pub fn bobs(&self) -> &[Bob] {
    &self.bobs
  }

  /// Adds a Bob
  pub fn add_bob(&mut self, bob: Bob) {
    self.bobs.push(bob);
  }

  /// Total amount credentials the Alices are entitled to
  pub fn alices_remaining_amount(&self) -> i64 {
    self.alices.iter().map(|alice| alice.remaining_amount_credentials(self.params.fee_rate)).sum()
  }

  /// Total amount credentials the Bobs redeemed
  pub fn bobs_amount(&self) -> i64 {
    self.bobs.iter().map(Bob::credential_amount).sum()
  }

  /// The amount credential issuer
  pub fn amount_issuer(&self) -> &dyn CredentialIssuer {
    &*self.amount_issuer
  }

  /// The amount credential issuer
  pub fn amount_issuer_mut(&mut self) -> &mut dyn CredentialIssuer {
    &mut *self.amount_issuer
  }

  /// The vsize credential issuer
  pub fn vsize_issuer(&self) -> &dyn CredentialIssuer {
    &*self.vsize_issuer
  }

  /// The vsize credential issuer
  pub fn vsize_issuer_mut(&mut self) -> &mut dyn CredentialIssuer {
    &mut *self.vsize_issuer
  }

  /// The coinjoin, once assembled
  pub fn coinjoin(&self) -> Option<&Transaction> {
    self.coinjoin.as_ref()
  }

  /// Assembles the coinjoin from the registered coins and outputs. Outputs
  /// paying the same script are merged. Inputs and outputs are shuffled and
  /// then sorted by decreasing value, so equal values end up in random
  /// order. `leftover`, if any, goes last unless it pays the script of an
  /// existing output, in which case the two are merged.
  pub fn build_coinjoin<R: Rng + ?Sized>(&mut self, leftover: Option<TxOut>, rng: &mut R) {
    let fee_rate = self.params.fee_rate;

    let mut coins: Vec<&Coin> = self.alices.iter().flat_map(|alice| alice.coins()).collect();
    coins.shuffle(rng);
    coins.sort_by(|a, b| b.amount().cmp(&a.amount()));

    let mut outputs: Vec<TxOut> = Vec::with_capacity(self.bobs.len() + 1);
    for bob in self.bobs.iter() {
      let value = Amount::from_sat(bob.output_amount(fee_rate).max(0) as u64);
      add_output(&mut outputs, TxOut { value, script_pubkey: bob.script().clone() });
    }
    outputs.shuffle(rng);
    outputs.sort_by(|a, b| b.value.cmp(&a.value));
    if let Some(leftover) = leftover {
      if !add_output(&mut outputs, leftover) {
        outputs.sort_by(|a, b| b.value.cmp(&a.value));
      }
    }

    let tx = Transaction {
      version: Version::TWO,
      lock_time: absolute::LockTime::ZERO,
      input: coins.iter().map(|coin| TxIn {
        previous_output: coin.outpoint,
        sequence: Sequence::MAX,
        ..TxIn::default()
      }).collect(),
      output: outputs,
    };
    self.coinjoin = Some(tx);
  }

  /// Applies `witness` to input `index` if it verifies against the coin
  /// the input spends. Returns `Ok(false)` without checking anything if
  /// the input already has a witness. On error the transaction is
  /// unchanged.
  pub fn sign_input(&mut self, index: usize, witness: Witness) -> Result<bool, SigningError> {
    let tx = self.coinjoin.as_ref().ok_or(SigningError::NotAssembled)?;
    let input = tx.input.get(index).ok_or(SigningError::IndexOutOfRange(index))?;
    if !input.witness.is_empty() {
      return Ok(false);
    }
    let coin = self.registered_coin(&input.previous_output).ok_or(SigningError::UnknownCoin(index))?;
    let key_hash = match coin.script_type() {
      ScriptType::P2wpkh(hash) => hash,
      _ => return Err(SigningError::InvalidWitness(index)),
    };

    let mut scratch = tx.clone();
    scratch.input[index].witness = witness;
    let sighash = SighashCache::new(&scratch)
      .p2wpkh_signature_hash(index, &coin.txout.script_pubkey, coin.amount(), EcdsaSighashType::All)
      .map_err(|_| SigningError::InvalidWitness(index))?;
    if !verify_p2wpkh_witness(&scratch.input[index].witness, &key_hash, sighash.to_byte_array()) {
      return Err(SigningError::InvalidWitness(index));
    }

    self.coinjoin = Some(scratch);
    Ok(true)
  }

  /// Whether every input has a witness
  pub fn is_fully_signed(&self) -> bool {
    match self.coinjoin {
      Some(ref tx) => tx.input.iter().all(|input| !input.witness.is_empty()),
      None => false,
    }
  }

  /// Coins whose inputs have no witness yet
  pub fn unsigned_outpoints(&self) -> HashSet<OutPoint> {
    match self.coinjoin {
      Some(ref tx) => tx.input.iter()
        .filter(|input| input.witness.is_empty())
        .map(|input| input.previous_output)
        .collect(),
      None => HashSet::new(),
    }
  }

  /// Logs what the coinjoin looks like before it goes out
  pub fn log_diagnostics(&self) {
    let tx = match self.coinjoin {
      Some(ref tx) => tx,
      None => return,
    };
    let input_sum: u64 = self.alices.iter().map(|alice| alice.total_input_amount().to_sat()).sum();
    let output_sum: u64 = tx.output.iter().map(|out| out.value.to_sat()).sum();
    let fee = input_sum.saturating_sub(output_sum);
    let vsize = tx.vsize() as u64;

    let mut value_counts: HashMap<Amount, usize> = HashMap::new();
    for out in tx.output.iter() {
      *value_counts.entry(out.value).or_insert(0) += 1;
    }
    let mut indistinguishable: Vec<(Amount, usize)> = value_counts.into_iter().filter(|&(_, n)| n > 1).collect();
    indistinguishable.sort();
    let indistinguishable: Vec<String> = indistinguishable.iter()
      .map(|&(value, n)| format!("{} sat x{}", value.to_sat(), n))
      .collect();

    info!(
      round = %self.id,
      inputs = tx.input.len(),
      outputs = tx.output.len(),
      size = tx.total_size(),
      vsize,
      fee,
      fee_rate = fee / vsize.max(1),
      target_fee_rate = self.params.fee_rate.to_sat_per_vb_floor(),
      "Coinjoin ready. Indistinguishable outputs: [{}]",
      indistinguishable.join(", ")
    );
  }

  /// Status snapshot
  pub fn state(&self) -> RoundState {
    RoundState {
      id: self.id,
      phase: self.phase,
      blame_of: self.blame_of(),
      fee_rate_sat_per_kwu: self.params.fee_rate.to_sat_per_kwu(),
      input_count: self.input_count(),
      phase_started: self.phase_started(),
      coinjoin: match self.phase {
        Phase::TransactionSigning | Phase::TransactionBroadcasting => self.coinjoin.as_ref().map(serialize_hex),
        _ => None,
      },
    }
  }
}

/// Publicly visible state of a round
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RoundState {
  /// Round id
  pub id: RoundId,
  /// Current phase
  pub phase: Phase,
  /// For blame rounds, the round which failed
  pub blame_of: Option<RoundId>,
  /// Fee rate, in sat/kwu
  pub fee_rate_sat_per_kwu: u64,
  /// Number of registered coins
  pub input_count: usize,
  /// When the current phase started
  #[serde(with = "time::serde::rfc3339")]
  pub phase_started: OffsetDateTime,
  /// The coinjoin, hex-encoded, once it is to be signed
  pub coinjoin: Option<String>,
}

#[cfg(test)]
mod tests {
  use bitcoin::hashes::Hash;
  use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
  use bitcoin::sighash::{EcdsaSighashType, SighashCache};
  use bitcoin::{ecdsa, Amount, CompressedPublicKey, FeeRate, OutPoint, ScriptBuf, Txid, Witness};
  use rand::rngs::StdRng;
  use rand::SeedableRng;
  use time::{Duration, OffsetDateTime};

  use super::*;
  use crate::coinjoin::credential::{BalanceIssuer, CredentialKind};
  use crate::coinjoin::participant::{Alice, AliceId, Bob, Coin};

  fn params() -> RoundParameters {
    RoundParameters {
      fee_rate: FeeRate::from_sat_per_vb_unchecked(10),
      min_input_count: 2,
      max_input_count: 4,
      max_inputs_per_alice: 2,
      min_registrable_amount: Amount::from_sat(5_000),
      max_registrable_amount: Amount::from_sat(100_000_000),
      per_alice_vsize_allocation: 255,
      input_registration_timeout: Duration::seconds(120),
      connection_confirmation_timeout: Duration::seconds(60),
      output_registration_timeout: Duration::seconds(60),
      transaction_signing_timeout: Duration::seconds(60),
    }
  }

  fn round(now: OffsetDateTime) -> Round {
    Round::new(RoundId(1),
               params(),
               Box::new(BalanceIssuer::new(CredentialKind::Amount, 2, 1_000_000_000)),
               Box::new(BalanceIssuer::new(CredentialKind::Vsize, 2, 255)),
               None,
               now)
  }

  fn key(n: u8) -> SecretKey {
    SecretKey::from_slice(&[n; 32]).unwrap()
  }

  fn script_for(key: &SecretKey) -> ScriptBuf {
    let secp = Secp256k1::new();
    let pk = CompressedPublicKey(key.public_key(&secp));
    ScriptBuf::new_p2wpkh(&pk.wpubkey_hash())
  }

  fn coin(n: u8, sat: u64) -> Coin {
    Coin::new(OutPoint::new(Txid::from_byte_array([n; 32]), 0), Amount::from_sat(sat), script_for(&key(n)))
  }

  fn sign(tx: &Transaction, index: usize, coin: &Coin, key: &SecretKey) -> Witness {
    let secp = Secp256k1::new();
    let sighash = SighashCache::new(tx)
      .p2wpkh_signature_hash(index, &coin.txout.script_pubkey, coin.amount(), EcdsaSighashType::All)
      .unwrap();
    let msg = Message::from_digest(sighash.to_byte_array());
    let sig = ecdsa::Signature::sighash_all(secp.sign_ecdsa(&msg, key));
    Witness::p2wpkh(&sig, &key.public_key(&secp))
  }

  #[test]
  fn phases_never_regress() {
    let start = OffsetDateTime::UNIX_EPOCH;
    let mut round = round(start);
    round.set_phase(Phase::OutputRegistration, start + Duration::seconds(1));
    assert_eq!(round.phase(), Phase::OutputRegistration);
    round.set_phase(Phase::ConnectionConfirmation, start + Duration::seconds(2));
    assert_eq!(round.phase(), Phase::OutputRegistration);
    assert_eq!(round.phase_started(), start + Duration::seconds(1));
  }

  #[test]
  fn input_registration_end() {
    let start = OffsetDateTime::UNIX_EPOCH;
    let mut round = round(start);
    assert!(!round.is_input_registration_ended(start + Duration::seconds(120)));
    assert!(round.is_input_registration_ended(start + Duration::seconds(121)));

    round.add_alice(Alice::new(AliceId(1), vec![coin(1, 10_000), coin(2, 10_000)], start));
    assert!(!round.is_input_registration_ended(start));
    round.add_alice(Alice::new(AliceId(2), vec![coin(3, 10_000), coin(4, 10_000)], start));
    assert_eq!(round.input_count(), 4);
    assert!(round.is_input_registration_ended(start));
  }

  #[test]
  fn remove_alices_by_predicate() {
    let start = OffsetDateTime::UNIX_EPOCH;
    let mut round = round(start);
    round.add_alice(Alice::new(AliceId(1), vec![coin(1, 10_000)], start));
    round.add_alice(Alice::new(AliceId(2), vec![coin(2, 10_000)], start));
    let removed = round.remove_alices(|alice| alice.id() == AliceId(1));
    assert_eq!(removed.len(), 1);
    assert!(round.alice(AliceId(1)).is_none());
    assert!(round.alice(AliceId(2)).is_some());
    assert!(round.is_registered(&coin(2, 0).outpoint));
  }

  #[test]
  fn build_merges_and_sorts() {
    let start = OffsetDateTime::UNIX_EPOCH;
    let mut round = round(start);
    round.add_alice(Alice::new(AliceId(1), vec![coin(1, 30_000), coin(2, 50_000)], start));
    round.add_alice(Alice::new(AliceId(2), vec![coin(3, 40_000)], start));
    let shared = script_for(&key(9));
    round.add_bob(Bob::new(shared.clone(), 20_000).unwrap());
    round.add_bob(Bob::new(shared.clone(), 20_000).unwrap());
    round.add_bob(Bob::new(script_for(&key(8)), 60_000).unwrap());

    let leftover = TxOut { value: Amount::from_sat(6_000), script_pubkey: script_for(&key(7)) };
    round.build_coinjoin(Some(leftover.clone()), &mut StdRng::seed_from_u64(1));

    let tx = round.coinjoin().unwrap();
    let inputs: Vec<OutPoint> = tx.input.iter().map(|input| input.previous_output).collect();
    assert_eq!(inputs, vec![coin(2, 0).outpoint, coin(3, 0).outpoint, coin(1, 0).outpoint]);
    assert!(tx.input.iter().all(|input| input.witness.is_empty()));

    assert_eq!(tx.output.len(), 3);
    assert_eq!(tx.output[0].value, Amount::from_sat(60_000 - 310));
    assert_eq!(tx.output[1].value, Amount::from_sat(2 * (20_000 - 310)));
    assert_eq!(tx.output[1].script_pubkey, shared);
    assert_eq!(tx.output[2], leftover);
  }

  #[test]
  fn leftover_merges_with_output_to_same_script() {
    let start = OffsetDateTime::UNIX_EPOCH;
    let mut round = round(start);
    round.add_alice(Alice::new(AliceId(1), vec![coin(1, 90_000)], start));
    let coordinator = script_for(&key(7));
    round.add_bob(Bob::new(script_for(&key(8)), 50_000).unwrap());
    round.add_bob(Bob::new(coordinator.clone(), 10_000).unwrap());

    let leftover = TxOut { value: Amount::from_sat(45_000), script_pubkey: coordinator.clone() };
    round.build_coinjoin(Some(leftover), &mut StdRng::seed_from_u64(1));

    let tx = round.coinjoin().unwrap();
    assert_eq!(tx.output.len(), 2);
    assert_eq!(tx.output[0], TxOut { value: Amount::from_sat(10_000 - 310 + 45_000), script_pubkey: coordinator });
    assert_eq!(tx.output[1].value, Amount::from_sat(50_000 - 310));
  }

  #[test]
  fn sign_input_verifies_against_coin() {
    let start = OffsetDateTime::UNIX_EPOCH;
    let mut round = round(start);
    round.add_alice(Alice::new(AliceId(1), vec![coin(1, 30_000)], start));
    round.add_alice(Alice::new(AliceId(2), vec![coin(2, 50_000)], start));
    round.add_bob(Bob::new(script_for(&key(9)), 70_000).unwrap());
    round.build_coinjoin(None, &mut StdRng::seed_from_u64(1));

    let tx = round.coinjoin().unwrap().clone();
    // Sorted by value: coin 2 first
    assert_eq!(tx.input[0].previous_output, coin(2, 0).outpoint);

    // Signed with the wrong key: rejected, nothing applied
    let bad = sign(&tx, 0, &coin(2, 50_000), &key(1));
    assert_eq!(round.sign_input(0, bad), Err(SigningError::InvalidWitness(0)));
    assert!(round.coinjoin().unwrap().input[0].witness.is_empty());

    // Signed for the wrong value: rejected
    let bad = sign(&tx, 0, &coin(2, 49_999), &key(2));
    assert_eq!(round.sign_input(0, bad), Err(SigningError::InvalidWitness(0)));

    let good = sign(&tx, 0, &coin(2, 50_000), &key(2));
    assert_eq!(round.sign_input(0, good.clone()), Ok(true));
    assert_eq!(round.sign_input(0, good), Ok(false));
    assert!(!round.is_fully_signed());
    assert_eq!(round.unsigned_outpoints(), [coin(1, 0).outpoint].into_iter().collect());

    assert_eq!(round.sign_input(2, Witness::new()), Err(SigningError::IndexOutOfRange(2)));
    let good = sign(&tx, 1, &coin(1, 30_000), &key(1));
    assert_eq!(round.sign_input(1, good), Ok(true));
    assert!(round.is_fully_signed());
  }

  #[test]
  fn state_shows_coinjoin_only_when_signing() {
    let start = OffsetDateTime::UNIX_EPOCH;
    let mut round = round(start);
    round.add_alice(Alice::new(AliceId(1), vec![coin(1, 30_000)], start));
    round.build_coinjoin(None, &mut StdRng::seed_from_u64(1));
    assert_eq!(round.state().coinjoin, None);
    round.set_phase(Phase::TransactionSigning, start);
    let state = round.state();
    assert!(state.coinjoin.is_some());
    assert_eq!(state.input_count, 1);
    assert_eq!(state.fee_rate_sat_per_kwu, 2_500);
  }
}
