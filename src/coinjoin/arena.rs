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

//! # Arena
//!
//! The set of live rounds. Rounds change in exactly two ways: through the
//! protocol operations participants call, and through [`Arena::step`], which
//! runs periodically and moves rounds on when a phase is complete or has
//! timed out. Both take `&mut self`, so nothing ever sees a round halfway
//! through an update.
//!
//! Within a step, phases are resolved from last to first. A round therefore
//! moves at most one phase per step.
//!

use std::collections::{BTreeMap, HashSet};

use bitcoin::{Amount, FeeRate, ScriptBuf, TxOut, Witness};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::bitcoind::BitcoinRpc;
use crate::coinjoin::credential::{CredentialKind, CredentialsRequest, CredentialsResponse,
                                  IssuerError, IssuerFactory};
use crate::coinjoin::ownership::{CoinJoinInputCommitmentData, OwnershipProof};
use crate::coinjoin::participant::{Alice, AliceId, Bob, Coin};
use crate::coinjoin::prison::Prison;
use crate::coinjoin::round::{BlameOrigin, Phase, Round, RoundId, RoundState, SigningError};
use crate::coinjoin::script::ScriptType;
use crate::coinjoin::{ProtocolError, ProtocolErrorCode};
use crate::user_data::CoordinatorConfig;

/// Source of the current time
pub trait Clock: Send {
  /// The current time
  fn now(&self) -> OffsetDateTime;
}

/// The system clock, in UTC
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> OffsetDateTime {
    OffsetDateTime::now_utc()
  }
}

/// One coin offered for registration
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct InputRegistration {
  /// The coin
  pub coin: Coin,
  /// Proof that the registrant controls the coin's script, committing to
  /// this round
  pub ownership_proof: OwnershipProof,
}

/// Request to register an Alice
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct InputsRegistrationRequest {
  /// Round to join
  pub round_id: RoundId,
  /// Coins to register
  pub inputs: Vec<InputRegistration>,
  /// Requests for zero-valued amount credentials
  pub zero_amount_credential_requests: CredentialsRequest,
  /// Requests for zero-valued vsize credentials
  pub zero_vsize_credential_requests: CredentialsRequest,
}

/// A registered Alice's id and its null credentials
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct InputsRegistrationResponse {
  /// Id of the new Alice
  pub alice_id: AliceId,
  /// Zero-valued amount credentials
  pub amount_credentials: CredentialsResponse,
  /// Zero-valued vsize credentials
  pub vsize_credentials: CredentialsResponse,
}

/// Request to confirm an Alice is still there
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ConnectionConfirmationRequest {
  /// Round the Alice is in
  pub round_id: RoundId,
  /// The Alice
  pub alice_id: AliceId,
  /// Requests for zero-valued amount credentials
  pub zero_amount_credential_requests: CredentialsRequest,
  /// Requests for the Alice's remaining amount
  pub real_amount_credential_requests: CredentialsRequest,
  /// Requests for zero-valued vsize credentials
  pub zero_vsize_credential_requests: CredentialsRequest,
  /// Requests for the Alice's remaining vsize
  pub real_vsize_credential_requests: CredentialsRequest,
}

/// Credentials issued on connection confirmation. The real ones are only
/// issued once the round is in connection confirmation.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ConnectionConfirmationResponse {
  /// Zero-valued amount credentials
  pub zero_amount_credentials: CredentialsResponse,
  /// Zero-valued vsize credentials
  pub zero_vsize_credentials: CredentialsResponse,
  /// Amount credentials worth the Alice's remaining amount
  pub real_amount_credentials: Option<CredentialsResponse>,
  /// Vsize credentials worth the Alice's remaining vsize
  pub real_vsize_credentials: Option<CredentialsResponse>,
}

/// Request to register a Bob
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct OutputRegistrationRequest {
  /// Round to register in
  pub round_id: RoundId,
  /// Destination script
  pub script: ScriptBuf,
  /// Amount credentials redeemed; the delta is minus the credential amount
  pub amount_credential_requests: CredentialsRequest,
  /// Vsize credentials redeemed; the delta is minus the output's vsize
  pub vsize_credential_requests: CredentialsRequest,
}

/// Change credentials issued for a Bob
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct OutputRegistrationResponse {
  /// Amount credentials
  pub amount_credentials: CredentialsResponse,
  /// Vsize credentials
  pub vsize_credentials: CredentialsResponse,
}

/// Request to unregister an Alice
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct InputsRemovalRequest {
  /// Round the Alice is in
  pub round_id: RoundId,
  /// The Alice
  pub alice_id: AliceId,
}

/// A witness for one input of the coinjoin
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct InputWitnessPair {
  /// Index of the input
  pub input_index: u32,
  /// Its witness
  pub witness: Witness,
}

/// Request to sign inputs of the coinjoin
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TransactionSignaturesRequest {
  /// Round being signed
  pub round_id: RoundId,
  /// Witnesses
  pub witnesses: Vec<InputWitnessPair>,
}

fn round_not_found(id: RoundId) -> ProtocolError {
  ProtocolError::new(ProtocolErrorCode::RoundNotFound, format!("Round ({}) not found.", id))
}

fn wrong_phase(round: &Round) -> ProtocolError {
  ProtocolError::new(ProtocolErrorCode::WrongPhase,
                     format!("Round ({}): Wrong phase ({:?}).", round.id(), round.phase()))
}

fn alice_not_found(round: RoundId, alice: AliceId) -> ProtocolError {
  ProtocolError::new(ProtocolErrorCode::AliceNotFound,
                     format!("Round ({}): Alice ({}) not found.", round, alice))
}

fn credential_error(round: RoundId, e: IssuerError) -> ProtocolError {
  ProtocolError::new(ProtocolErrorCode::InvalidCredentialRequests, format!("Round ({}): {}", round, e))
}

/// The set of live rounds, plus the prison
pub struct Arena {
  config: CoordinatorConfig,
  rounds: BTreeMap<RoundId, Round>,
  prison: Prison,
  rpc: Box<dyn BitcoinRpc>,
  issuers: Box<dyn IssuerFactory>,
  clock: Box<dyn Clock>,
  rng: StdRng,
}

impl Arena {
  /// Constructor. No rounds exist until the first step.
  pub fn new(config: CoordinatorConfig,
             prison: Prison,
             rpc: Box<dyn BitcoinRpc>,
             issuers: Box<dyn IssuerFactory>,
             clock: Box<dyn Clock>)
             -> Arena {
    Arena {
      config,
      rounds: BTreeMap::new(),
      prison,
      rpc,
      issuers,
      clock,
      rng: StdRng::from_entropy(),
    }
  }

  /// The round policy
  pub fn config(&self) -> &CoordinatorConfig {
    &self.config
  }

  /// The prison
  pub fn prison(&self) -> &Prison {
    &self.prison
  }

  /// Looks up a live round
  pub fn round(&self, id: RoundId) -> Option<&Round> {
    self.rounds.get(&id)
  }

  /// All live rounds
  pub fn rounds(&self) -> impl Iterator<Item = &Round> {
    self.rounds.values()
  }

  /// Status snapshot of every live round
  pub fn round_states(&self) -> Vec<RoundState> {
    self.rounds.values().map(Round::state).collect()
  }

  /// Advances every round whose phase is complete or timed out, and makes
  /// sure a round is open for registration
  pub fn step(&mut self) {
    let now = self.clock.now();
    self.retire_broadcast_rounds();
    self.prison.release_expired(now);
    self.timeout_alices(now);
    self.step_transaction_signing(now);
    self.step_output_registration(now);
    self.step_connection_confirmation(now);
    self.step_input_registration(now);
    self.create_rounds(now);
  }

  fn rounds_in(&self, phase: Phase) -> Vec<RoundId> {
    self.rounds.values().filter(|round| round.phase() == phase).map(Round::id).collect()
  }

  fn destroy_round(&mut self, id: RoundId, reason: &str) {
    if let Some(round) = self.rounds.remove(&id) {
      info!(round = %id, "Round destroyed: {} ({} inputs, {} needed).",
            reason, round.input_count(), round.params().min_input_count);
    }
  }

  fn retire_broadcast_rounds(&mut self) {
    for id in self.rounds_in(Phase::TransactionBroadcasting) {
      debug!(round = %id, "retiring broadcast round");
      self.rounds.remove(&id);
    }
  }

  fn timeout_alices(&mut self, now: OffsetDateTime) {
    for round in self.rounds.values_mut() {
      if round.is_input_registration_ended(now) {
        continue;
      }
      let removed = round.remove_alices(|alice| alice.deadline() < now);
      for alice in removed.iter() {
        info!(round = %round.id(), "Alice ({}) timed out during input registration.", alice.id());
      }
    }
  }

  fn step_transaction_signing(&mut self, now: OffsetDateTime) {
    let mut failed = vec![];
    for id in self.rounds_in(Phase::TransactionSigning) {
      let round = match self.rounds.get_mut(&id) {
        Some(round) => round,
        None => continue,
      };
      if round.is_fully_signed() {
        round.log_diagnostics();
        let result = match round.coinjoin() {
          Some(tx) => self.rpc.send_raw_transaction(tx),
          None => continue,
        };
        match result {
          Ok(txid) => {
            info!(round = %id, %txid, "Coinjoin broadcast.");
            round.set_phase(Phase::TransactionBroadcasting, now);
          }
          Err(e) => {
            warn!(round = %id, "Broadcast failed: {}", e);
            failed.push(id);
          }
        }
      } else if round.phase_timed_out(now) {
        warn!(round = %id, "Signing timed out with {} unsigned inputs.", round.unsigned_outpoints().len());
        failed.push(id);
      }
    }
    for id in failed {
      self.fail_transaction_signing(id, now);
    }
  }

  /// Destroys a round which did not get broadcast, imprisoning the Alices
  /// which did not sign. If the rest are enough, they get a blame round.
  fn fail_transaction_signing(&mut self, id: RoundId, now: OffsetDateTime) {
    let mut round = match self.rounds.remove(&id) {
      Some(round) => round,
      None => return,
    };
    let unsigned = round.unsigned_outpoints();
    let offenders = round.remove_alices(|alice| alice.coins().iter().any(|coin| unsigned.contains(&coin.outpoint)));
    for alice in offenders.iter() {
      self.prison.note(alice, id, now);
    }
    if !offenders.is_empty() {
      info!(round = %id, "{} Alices failed to sign and were imprisoned.", offenders.len());
    }

    if !round.has_enough_inputs() {
      info!(round = %id, "Round destroyed: not enough inputs left for a blame round ({} inputs, {} needed).",
            round.input_count(), round.params().min_input_count);
      return;
    }
    let whitelist: HashSet<_> = round.alices().iter()
      .flat_map(|alice| alice.coins())
      .map(|coin| coin.outpoint)
      .collect();
    let fee_rate = match self.rpc.estimate_fee_rate(self.config.confirmation_target) {
      Ok(fee_rate) => fee_rate,
      Err(e) => {
        warn!(round = %id, "Fee estimation failed ({}), blame round keeps the old fee rate.", e);
        round.params().fee_rate
      }
    };
    let blame_id = self.create_round(fee_rate, Some(BlameOrigin { round: id, whitelist }), now);
    info!(round = %blame_id, blame_of = %id, "Blame round created.");
  }

  fn step_output_registration(&mut self, now: OffsetDateTime) {
    for round in self.rounds.values_mut() {
      if round.phase() != Phase::OutputRegistration {
        continue;
      }
      let diff = round.alices_remaining_amount() - round.bobs_amount();
      if diff != 0 && !round.phase_timed_out(now) {
        continue;
      }
      if diff < 0 {
        // The issuer never lets Bobs redeem more than Alices were issued
        error!(round = %round.id(), "Outputs exceed inputs by {} sat.", -diff);
      }

      let leftover = if diff > round.params().min_registrable_amount.to_sat() as i64 {
        info!(round = %round.id(), "{} sat were not claimed and go to the coordinator.", diff);
        Some(TxOut { value: Amount::from_sat(diff as u64), script_pubkey: self.config.blame_script.clone() })
      } else {
        None
      };
      round.build_coinjoin(leftover, &mut self.rng);
      round.set_phase(Phase::TransactionSigning, now);
    }
  }

  fn step_connection_confirmation(&mut self, now: OffsetDateTime) {
    let mut destroy = vec![];
    for round in self.rounds.values_mut() {
      if round.phase() != Phase::ConnectionConfirmation {
        continue;
      }
      if round.alices().iter().all(Alice::is_confirmed) {
        round.set_phase(Phase::OutputRegistration, now);
      } else if round.phase_timed_out(now) {
        let id = round.id();
        let removed = round.remove_alices(|alice| !alice.is_confirmed());
        for alice in removed.iter() {
          self.prison.note(alice, id, now);
        }
        info!(round = %id, "{} Alices did not confirm their connection and were imprisoned.", removed.len());

        if round.has_enough_inputs() {
          round.set_phase(Phase::OutputRegistration, now);
        } else {
          destroy.push(id);
        }
      }
    }
    for id in destroy {
      self.destroy_round(id, "not enough inputs after connection confirmation");
    }
  }

  fn step_input_registration(&mut self, now: OffsetDateTime) {
    let mut destroy = vec![];
    for round in self.rounds.values_mut() {
      if round.phase() != Phase::InputRegistration || !round.is_input_registration_ended(now) {
        continue;
      }
      if round.has_enough_inputs() {
        round.set_phase(Phase::ConnectionConfirmation, now);
      } else {
        destroy.push(round.id());
      }
    }
    for id in destroy {
      self.destroy_round(id, "not enough inputs after input registration");
    }
  }

  fn create_rounds(&mut self, now: OffsetDateTime) {
    let open = self.rounds.values()
      .any(|round| round.phase() == Phase::InputRegistration && !round.is_blame_round());
    if open {
      return;
    }
    match self.rpc.estimate_fee_rate(self.config.confirmation_target) {
      Ok(fee_rate) => {
        let id = self.create_round(fee_rate, None, now);
        info!(round = %id, "Created round with fee rate {} sat/vB.", fee_rate.to_sat_per_vb_ceil());
      }
      Err(e) => warn!("Fee estimation failed, will retry on next tick: {}", e),
    }
  }

  fn create_round(&mut self, fee_rate: FeeRate, blame: Option<BlameOrigin>, now: OffsetDateTime) -> RoundId {
    let id = loop {
      let candidate = RoundId(self.rng.gen());
      if !self.rounds.contains_key(&candidate) {
        break candidate;
      }
    };
    let params = self.config.round_parameters(fee_rate, blame.is_some());
    let amount_issuer = self.issuers.issuer(CredentialKind::Amount, Amount::MAX_MONEY.to_sat());
    let vsize_issuer = self.issuers.issuer(CredentialKind::Vsize, params.per_alice_vsize_allocation);
    self.rounds.insert(id, Round::new(id, params, amount_issuer, vsize_issuer, blame, now));
    id
  }

  /// Registers the coins of a new Alice and hands out null credentials
  pub fn register_input(&mut self, request: InputsRegistrationRequest)
                        -> Result<InputsRegistrationResponse, ProtocolError> {
    let now = self.clock.now();
    let round = self.rounds.get_mut(&request.round_id).ok_or_else(|| round_not_found(request.round_id))?;
    let id = round.id();
    if round.phase() != Phase::InputRegistration || round.is_input_registration_ended(now) {
      return Err(wrong_phase(round));
    }

    let params = round.params().clone();
    if request.inputs.len() > params.max_inputs_per_alice {
      return Err(ProtocolError::new(ProtocolErrorCode::TooManyInputs,
                                    format!("Round ({}): at most {} inputs per Alice.", id, params.max_inputs_per_alice)));
    }
    if round.input_count() + request.inputs.len() > params.max_input_count {
      return Err(ProtocolError::new(ProtocolErrorCode::TooManyInputs,
                                    format!("Round ({}): round is full.", id)));
    }

    let commitment_data = CoinJoinInputCommitmentData::new(self.config.coordinator_identifier.clone(), id);
    let mut seen = HashSet::new();
    for input in request.inputs.iter() {
      let outpoint = input.coin.outpoint;
      if self.prison.is_banned(&outpoint, now) {
        return Err(ProtocolError::new(ProtocolErrorCode::InputBanned,
                                      format!("Round ({}): input {} is banned.", id, outpoint)));
      }
      if !round.is_whitelisted(&outpoint) {
        return Err(ProtocolError::new(ProtocolErrorCode::InputNotWhitelisted,
                                      format!("Round ({}): input {} did not sign in round {:?}.",
                                              id, outpoint, round.blame_of())));
      }
      if !seen.insert(outpoint) || round.is_registered(&outpoint) {
        return Err(ProtocolError::new(ProtocolErrorCode::AlreadyRegisteredCoin,
                                      format!("Round ({}): input {} is already registered.", id, outpoint)));
      }
      if !input.coin.script_type().is_allowed() {
        return Err(ProtocolError::new(ProtocolErrorCode::ScriptNotAllowed,
                                      format!("Round ({}): input {} has a script type we do not accept.", id, outpoint)));
      }
      if input.coin.amount() > params.max_registrable_amount {
        return Err(ProtocolError::new(ProtocolErrorCode::TooMuchFunds,
                                      format!("Round ({}): input {} of {} sat is above the maximum of {} sat.",
                                              id, outpoint, input.coin.amount().to_sat(),
                                              params.max_registrable_amount.to_sat())));
      }
      match input.ownership_proof.verify_coinjoin_input_proof(&input.coin.txout.script_pubkey, &commitment_data) {
        Ok(true) => {}
        Ok(false) => {
          return Err(ProtocolError::new(ProtocolErrorCode::WrongOwnershipProof,
                                        format!("Round ({}): bad ownership proof for {}.", id, outpoint)));
        }
        Err(e) => {
          return Err(ProtocolError::new(ProtocolErrorCode::ScriptNotAllowed,
                                        format!("Round ({}): {}: {}.", id, outpoint, e)));
        }
      }
    }

    let alice_id = loop {
      let candidate = AliceId(self.rng.gen());
      if round.alice(candidate).is_none() {
        break candidate;
      }
    };
    let coins: Vec<Coin> = request.inputs.into_iter().map(|input| input.coin).collect();
    let alice = Alice::new(alice_id, coins, now + params.connection_confirmation_timeout);

    let total = alice.total_input_amount();
    if total < params.min_registrable_amount {
      return Err(ProtocolError::new(ProtocolErrorCode::NotEnoughFunds,
                                    format!("Round ({}): {} sat is below the minimum of {} sat.",
                                            id, total.to_sat(), params.min_registrable_amount.to_sat())));
    }
    if total > params.max_registrable_amount {
      return Err(ProtocolError::new(ProtocolErrorCode::TooMuchFunds,
                                    format!("Round ({}): {} sat is above the maximum of {} sat.",
                                            id, total.to_sat(), params.max_registrable_amount.to_sat())));
    }
    if alice.remaining_vsize_credentials(params.per_alice_vsize_allocation) < 0 {
      return Err(ProtocolError::new(ProtocolErrorCode::TooMuchVsize,
                                    format!("Round ({}): inputs need {} vbytes, allocation is {}.",
                                            id, alice.total_input_vsize(), params.per_alice_vsize_allocation)));
    }

    let zero_amount = round.amount_issuer()
      .prepare_response(&request.zero_amount_credential_requests, 0)
      .map_err(|e| credential_error(id, e))?;
    let zero_vsize = round.vsize_issuer()
      .prepare_response(&request.zero_vsize_credential_requests, 0)
      .map_err(|e| credential_error(id, e))?;

    // Everything checked, commit
    let amount_credentials = round.amount_issuer_mut().commit(zero_amount);
    let vsize_credentials = round.vsize_issuer_mut().commit(zero_vsize);
    info!(round = %id, "Alice ({}) registered {} inputs.", alice_id, alice.coins().len());
    round.add_alice(alice);

    Ok(InputsRegistrationResponse { alice_id, amount_credentials, vsize_credentials })
  }

  /// Keeps an Alice alive during input registration, and hands out its real
  /// credentials during connection confirmation
  pub fn confirm_connection(&mut self, request: ConnectionConfirmationRequest)
                            -> Result<ConnectionConfirmationResponse, ProtocolError> {
    let now = self.clock.now();
    let round = self.rounds.get_mut(&request.round_id).ok_or_else(|| round_not_found(request.round_id))?;
    let id = round.id();
    let fee_rate = round.params().fee_rate;
    let vsize_allocation = round.params().per_alice_vsize_allocation;
    let confirmation_timeout = round.params().connection_confirmation_timeout;

    let alice = round.alice(request.alice_id).ok_or_else(|| alice_not_found(id, request.alice_id))?;
    let remaining_vsize = alice.remaining_vsize_credentials(vsize_allocation);
    let remaining_amount = alice.remaining_amount_credentials(fee_rate);
    let already_confirmed = alice.is_confirmed();

    if request.real_vsize_credential_requests.delta != remaining_vsize {
      return Err(ProtocolError::new(ProtocolErrorCode::IncorrectRequestedVsizeCredentials,
                                    format!("Round ({}): Incorrect requested vsize credentials: {} instead of {}.",
                                            id, request.real_vsize_credential_requests.delta, remaining_vsize)));
    }
    if request.real_amount_credential_requests.delta != remaining_amount {
      return Err(ProtocolError::new(ProtocolErrorCode::IncorrectRequestedAmountCredentials,
                                    format!("Round ({}): Incorrect requested amount credentials: {} instead of {}.",
                                            id, request.real_amount_credential_requests.delta, remaining_amount)));
    }

    match round.phase() {
      Phase::InputRegistration => {
        let zero_amount = round.amount_issuer()
          .prepare_response(&request.zero_amount_credential_requests, 0)
          .map_err(|e| credential_error(id, e))?;
        let zero_vsize = round.vsize_issuer()
          .prepare_response(&request.zero_vsize_credential_requests, 0)
          .map_err(|e| credential_error(id, e))?;

        let zero_amount_credentials = round.amount_issuer_mut().commit(zero_amount);
        let zero_vsize_credentials = round.vsize_issuer_mut().commit(zero_vsize);
        if let Some(alice) = round.alice_mut(request.alice_id) {
          alice.set_deadline_relative_to(now, confirmation_timeout);
        }
        Ok(ConnectionConfirmationResponse {
          zero_amount_credentials,
          zero_vsize_credentials,
          real_amount_credentials: None,
          real_vsize_credentials: None,
        })
      }
      Phase::ConnectionConfirmation => {
        if already_confirmed {
          return Err(ProtocolError::new(ProtocolErrorCode::AliceAlreadyConfirmedConnection,
                                        format!("Round ({}): Alice ({}) already confirmed.", id, request.alice_id)));
        }
        let zero_amount = round.amount_issuer()
          .prepare_response(&request.zero_amount_credential_requests, 0)
          .map_err(|e| credential_error(id, e))?;
        let real_amount = round.amount_issuer()
          .prepare_response(&request.real_amount_credential_requests, remaining_amount)
          .map_err(|e| credential_error(id, e))?;
        let zero_vsize = round.vsize_issuer()
          .prepare_response(&request.zero_vsize_credential_requests, 0)
          .map_err(|e| credential_error(id, e))?;
        let real_vsize = round.vsize_issuer()
          .prepare_response(&request.real_vsize_credential_requests, remaining_vsize)
          .map_err(|e| credential_error(id, e))?;

        let zero_amount_credentials = round.amount_issuer_mut().commit(zero_amount);
        let real_amount_credentials = round.amount_issuer_mut().commit(real_amount);
        let zero_vsize_credentials = round.vsize_issuer_mut().commit(zero_vsize);
        let real_vsize_credentials = round.vsize_issuer_mut().commit(real_vsize);
        if let Some(alice) = round.alice_mut(request.alice_id) {
          alice.confirm_connection();
        }
        debug!(round = %id, "Alice ({}) confirmed its connection.", request.alice_id);
        Ok(ConnectionConfirmationResponse {
          zero_amount_credentials,
          zero_vsize_credentials,
          real_amount_credentials: Some(real_amount_credentials),
          real_vsize_credentials: Some(real_vsize_credentials),
        })
      }
      _ => Err(wrong_phase(round)),
    }
  }

  /// Redeems credentials for an output
  pub fn register_output(&mut self, request: OutputRegistrationRequest)
                         -> Result<OutputRegistrationResponse, ProtocolError> {
    let round = self.rounds.get_mut(&request.round_id).ok_or_else(|| round_not_found(request.round_id))?;
    let id = round.id();
    if round.phase() != Phase::OutputRegistration {
      return Err(wrong_phase(round));
    }

    let script_type = ScriptType::classify(&request.script);
    if !script_type.is_standard() {
      return Err(ProtocolError::new(ProtocolErrorCode::NonStandardOutput,
                                    format!("Round ({}): output script is not standard.", id)));
    }
    let credential_amount = request.amount_credential_requests.delta.saturating_neg();
    if credential_amount <= 0 {
      return Err(ProtocolError::new(ProtocolErrorCode::NotEnoughFunds,
                                    format!("Round ({}): output must redeem a positive amount, not {}.",
                                            id, credential_amount)));
    }
    let bob = match (script_type.is_allowed(), Bob::new(request.script, credential_amount)) {
      (true, Some(bob)) => bob,
      _ => {
        return Err(ProtocolError::new(ProtocolErrorCode::ScriptNotAllowed,
                                      format!("Round ({}): {:?} outputs are not accepted.", id, script_type)));
      }
    };

    let params = round.params();
    let value = bob.output_amount(params.fee_rate);
    if value < params.min_registrable_amount.to_sat() as i64 {
      return Err(ProtocolError::new(ProtocolErrorCode::NotEnoughFunds,
                                    format!("Round ({}): output of {} sat is below the minimum of {} sat.",
                                            id, value, params.min_registrable_amount.to_sat())));
    }
    if value > params.max_registrable_amount.to_sat() as i64 {
      return Err(ProtocolError::new(ProtocolErrorCode::TooMuchFunds,
                                    format!("Round ({}): output of {} sat is above the maximum of {} sat.",
                                            id, value, params.max_registrable_amount.to_sat())));
    }
    let required_vsize = bob.output_vsize() as i64;
    if request.vsize_credential_requests.delta.saturating_neg() != required_vsize {
      return Err(ProtocolError::new(ProtocolErrorCode::IncorrectRequestedVsizeCredentials,
                                    format!("Round ({}): Incorrect requested vsize credentials: {} instead of {}.",
                                            id, request.vsize_credential_requests.delta, -required_vsize)));
    }

    let amount = round.amount_issuer()
      .prepare_response(&request.amount_credential_requests, -credential_amount)
      .map_err(|e| credential_error(id, e))?;
    let vsize = round.vsize_issuer()
      .prepare_response(&request.vsize_credential_requests, -required_vsize)
      .map_err(|e| credential_error(id, e))?;

    let amount_credentials = round.amount_issuer_mut().commit(amount);
    let vsize_credentials = round.vsize_issuer_mut().commit(vsize);
    debug!(round = %id, "Output of {} sat registered.", value);
    round.add_bob(bob);

    Ok(OutputRegistrationResponse { amount_credentials, vsize_credentials })
  }

  /// Unregisters an Alice. Removing an Alice which is not there succeeds.
  pub fn remove_input(&mut self, request: InputsRemovalRequest) -> Result<(), ProtocolError> {
    let round = self.rounds.get_mut(&request.round_id).ok_or_else(|| round_not_found(request.round_id))?;
    if round.phase() != Phase::InputRegistration {
      return Err(wrong_phase(round));
    }
    if !round.remove_alices(|alice| alice.id() == request.alice_id).is_empty() {
      info!(round = %round.id(), "Alice ({}) left.", request.alice_id);
    }
    Ok(())
  }

  /// Adds witnesses to the coinjoin. Each witness is checked against the
  /// coin its input spends before it is applied.
  pub fn sign_transaction(&mut self, request: TransactionSignaturesRequest) -> Result<(), ProtocolError> {
    let round = self.rounds.get_mut(&request.round_id).ok_or_else(|| round_not_found(request.round_id))?;
    let id = round.id();
    if round.phase() != Phase::TransactionSigning {
      return Err(wrong_phase(round));
    }
    for pair in request.witnesses {
      let index = pair.input_index as usize;
      match round.sign_input(index, pair.witness) {
        Ok(true) => debug!(round = %id, "Input {} signed.", index),
        Ok(false) => debug!(round = %id, "Input {} was already signed.", index),
        Err(SigningError::IndexOutOfRange(_)) => {
          return Err(ProtocolError::new(ProtocolErrorCode::InputIndexOutOfRange,
                                        format!("Round ({}): no input {}.", id, index)));
        }
        Err(e) => {
          return Err(ProtocolError::new(ProtocolErrorCode::WrongCoinjoinSignature,
                                        format!("Round ({}): {}.", id, e)));
        }
      }
    }
    Ok(())
  }
}
