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

//! Whole rounds, driven from the outside

use std::sync::{Arc, Mutex};

use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{ecdsa, Amount, FeeRate, OutPoint, ScriptBuf, Transaction, Txid, Witness};
use time::{Duration, OffsetDateTime};

use coinjoin_coordinator::bitcoind::{BitcoinRpc, RpcError};
use coinjoin_coordinator::coinjoin::arena::{Arena, Clock, ConnectionConfirmationRequest, InputRegistration,
                                            InputWitnessPair, InputsRegistrationRequest,
                                            OutputRegistrationRequest, TransactionSignaturesRequest};
use coinjoin_coordinator::coinjoin::credential::{BalanceIssuerFactory, CredentialsRequest};
use coinjoin_coordinator::coinjoin::ownership::{p2wpkh_script, CoinJoinInputCommitmentData, OwnershipProof};
use coinjoin_coordinator::coinjoin::participant::{AliceId, Coin};
use coinjoin_coordinator::coinjoin::prison::Prison;
use coinjoin_coordinator::coinjoin::round::{Phase, Round, RoundId};
use coinjoin_coordinator::coinjoin::ProtocolErrorCode;
use coinjoin_coordinator::user_data::CoordinatorConfig;

#[derive(Clone)]
struct ManualClock(Arc<Mutex<OffsetDateTime>>);

impl Clock for ManualClock {
  fn now(&self) -> OffsetDateTime {
    *self.0.lock().unwrap()
  }
}

#[derive(Clone, Default)]
struct RecordingRpc(Arc<Mutex<Vec<Transaction>>>);

impl BitcoinRpc for RecordingRpc {
  fn estimate_fee_rate(&self, _target: u16) -> Result<FeeRate, RpcError> {
    Ok(FeeRate::from_sat_per_vb_unchecked(10))
  }

  fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, RpcError> {
    self.0.lock().unwrap().push(tx.clone());
    Ok(tx.compute_txid())
  }
}

const IDENTIFIER: &str = "TestCoordinator";

fn key(n: u8) -> SecretKey {
  SecretKey::from_slice(&[n; 32]).unwrap()
}

fn script(n: u8) -> ScriptBuf {
  p2wpkh_script(&key(n).public_key(&Secp256k1::new()))
}

fn requested(tag: u8) -> Vec<sha256::Hash> {
  vec![sha256::Hash::hash(&[tag, 0]), sha256::Hash::hash(&[tag, 1])]
}

/// One wallet: its coins, each locked by the key with the coin's number
struct Wallet {
  coins: Vec<(u8, u64)>,
  alice: Option<AliceId>,
}

impl Wallet {
  fn new(coins: &[(u8, u64)]) -> Wallet {
    Wallet { coins: coins.to_vec(), alice: None }
  }

  fn coin(&self, i: usize) -> Coin {
    let (n, sat) = self.coins[i];
    Coin::new(OutPoint::new(Txid::from_byte_array([n; 32]), 0), Amount::from_sat(sat), script(n))
  }

  fn remaining_amount(&self) -> i64 {
    self.coins.iter().map(|&(_, sat)| sat as i64 - 680).sum()
  }

  fn remaining_vsize(&self) -> i64 {
    255 - 68 * self.coins.len() as i64
  }

  fn register(&mut self, arena: &mut Arena, round: RoundId) -> Result<(), ProtocolErrorCode> {
    let data = CoinJoinInputCommitmentData::new(IDENTIFIER, round);
    let inputs = (0..self.coins.len()).map(|i| InputRegistration {
      coin: self.coin(i),
      ownership_proof: OwnershipProof::generate_coinjoin_input_proof(&key(self.coins[i].0), &data),
    }).collect();
    let response = arena.register_input(InputsRegistrationRequest {
      round_id: round,
      inputs,
      zero_amount_credential_requests: CredentialsRequest::zero(requested(1)),
      zero_vsize_credential_requests: CredentialsRequest::zero(requested(2)),
    }).map_err(|e| e.code)?;
    self.alice = Some(response.alice_id);
    Ok(())
  }

  fn confirm(&self, arena: &mut Arena, round: RoundId) {
    let response = arena.confirm_connection(ConnectionConfirmationRequest {
      round_id: round,
      alice_id: self.alice.unwrap(),
      zero_amount_credential_requests: CredentialsRequest::zero(requested(3)),
      real_amount_credential_requests: CredentialsRequest::new(self.remaining_amount(), requested(4)),
      zero_vsize_credential_requests: CredentialsRequest::zero(requested(5)),
      real_vsize_credential_requests: CredentialsRequest::new(self.remaining_vsize(), requested(6)),
    }).unwrap();
    assert!(response.real_amount_credentials.is_some());
  }

  fn sign(&self, arena: &mut Arena, round: RoundId) {
    let tx = arena.round(round).unwrap().coinjoin().unwrap().clone();
    let secp = Secp256k1::new();
    let witnesses = (0..self.coins.len()).map(|i| {
      let coin = self.coin(i);
      let key = key(self.coins[i].0);
      let index = tx.input.iter().position(|input| input.previous_output == coin.outpoint).unwrap();
      let sighash = SighashCache::new(&tx)
        .p2wpkh_signature_hash(index, &coin.txout.script_pubkey, coin.amount(), EcdsaSighashType::All)
        .unwrap();
      let sig = secp.sign_ecdsa(&Message::from_digest(sighash.to_byte_array()), &key);
      let witness = Witness::p2wpkh(&ecdsa::Signature::sighash_all(sig), &key.public_key(&secp));
      InputWitnessPair { input_index: index as u32, witness }
    }).collect();
    arena.sign_transaction(TransactionSignaturesRequest { round_id: round, witnesses }).unwrap();
  }
}

fn register_output(arena: &mut Arena, round: RoundId, n: u8, credential_amount: i64) {
  arena.register_output(OutputRegistrationRequest {
    round_id: round,
    script: script(n),
    amount_credential_requests: CredentialsRequest::new(-credential_amount, requested(7)),
    vsize_credential_requests: CredentialsRequest::new(-31, requested(8)),
  }).unwrap();
}

struct Coordinator {
  arena: Arena,
  clock: ManualClock,
  rpc: RecordingRpc,
}

impl Coordinator {
  fn new(min_input_count: usize) -> Coordinator {
    let config = CoordinatorConfig {
      min_input_count_by_round: min_input_count,
      max_input_count_by_round: 20,
      max_inputs_per_alice: 2,
      min_registrable_amount: 5_000,
      max_registrable_amount: 1_000_000,
      per_alice_vsize_allocation: 255,
      standard_input_registration_timeout_secs: 300,
      blame_input_registration_timeout_secs: 60,
      connection_confirmation_timeout_secs: 60,
      output_registration_timeout_secs: 60,
      transaction_signing_timeout_secs: 60,
      blame_script: script(250),
      coordinator_identifier: IDENTIFIER.to_owned(),
      ..CoordinatorConfig::default()
    };
    let start = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
    let clock = ManualClock(Arc::new(Mutex::new(start)));
    let rpc = RecordingRpc::default();
    let mut arena = Arena::new(config,
                               Prison::new(None),
                               Box::new(rpc.clone()),
                               Box::new(BalanceIssuerFactory::new(2)),
                               Box::new(clock.clone()));
    arena.step();
    Coordinator { arena, clock, rpc }
  }

  fn tick_after(&mut self, secs: i64) {
    *self.clock.0.lock().unwrap() += Duration::seconds(secs);
    self.arena.step();
  }

  fn open_round(&self) -> RoundId {
    self.arena.rounds()
      .find(|round| round.phase() == Phase::InputRegistration && !round.is_blame_round())
      .map(Round::id)
      .unwrap()
  }

  fn phase(&self, round: RoundId) -> Option<Phase> {
    self.arena.round(round).map(Round::phase)
  }
}

#[test]
fn round_with_several_outputs_per_participant() {
  let mut co = Coordinator::new(4);
  let round = co.open_round();
  let mut wallets = vec![
    Wallet::new(&[(1, 60_000), (2, 50_000)]),
    Wallet::new(&[(3, 100_680)]),
    Wallet::new(&[(4, 50_680)]),
    Wallet::new(&[(5, 30_000)]),
  ];
  for wallet in wallets.iter_mut() {
    wallet.register(&mut co.arena, round).unwrap();
  }

  co.tick_after(301);
  assert_eq!(co.phase(round), Some(Phase::ConnectionConfirmation));
  for wallet in wallets.iter() {
    wallet.confirm(&mut co.arena, round);
  }
  co.tick_after(1);
  assert_eq!(co.phase(round), Some(Phase::OutputRegistration));

  // Five outputs of one denomination and two odd amounts, each to a fresh
  // script
  register_output(&mut co.arena, round, 101, 50_000);
  register_output(&mut co.arena, round, 102, 50_000);
  register_output(&mut co.arena, round, 103, 8_640);
  register_output(&mut co.arena, round, 104, 50_000);
  register_output(&mut co.arena, round, 105, 50_000);
  register_output(&mut co.arena, round, 106, 50_000);
  register_output(&mut co.arena, round, 107, 29_320);
  co.tick_after(1);
  assert_eq!(co.phase(round), Some(Phase::TransactionSigning));

  for wallet in wallets.iter() {
    wallet.sign(&mut co.arena, round);
  }
  co.tick_after(1);
  assert_eq!(co.phase(round), Some(Phase::TransactionBroadcasting));

  let broadcasts = co.rpc.0.lock().unwrap().clone();
  assert_eq!(broadcasts.len(), 1);
  let tx = &broadcasts[0];
  assert_eq!(tx.input.len(), 5);
  assert_eq!(tx.output.len(), 7);
  assert_eq!(tx.output.iter().filter(|out| out.value == Amount::from_sat(49_690)).count(), 5);
  // Largest first
  assert!(tx.output.windows(2).all(|pair| pair[0].value >= pair[1].value));
  assert!(tx.input.iter().all(|input| input.witness.len() == 2));

  let input_sum = 60_000 + 50_000 + 100_680 + 50_680 + 30_000;
  let output_sum: u64 = tx.output.iter().map(|out| out.value.to_sat()).sum();
  assert_eq!(input_sum - output_sum, 5 * 680 + 7 * 310);

  co.tick_after(1);
  assert!(co.arena.round(round).is_none());
  assert_eq!(co.arena.rounds().count(), 1);
}

#[test]
fn blame_round_finishes_without_the_offender() {
  let mut co = Coordinator::new(2);
  let round = co.open_round();
  let mut wallets = vec![
    Wallet::new(&[(1, 100_000)]),
    Wallet::new(&[(2, 100_000)]),
    Wallet::new(&[(3, 100_000)]),
  ];
  for wallet in wallets.iter_mut() {
    wallet.register(&mut co.arena, round).unwrap();
  }
  co.tick_after(301);
  for wallet in wallets.iter() {
    wallet.confirm(&mut co.arena, round);
  }
  co.tick_after(1);
  for (i, wallet) in wallets.iter().enumerate() {
    register_output(&mut co.arena, round, 101 + i as u8, wallet.remaining_amount());
  }
  co.tick_after(1);
  assert_eq!(co.phase(round), Some(Phase::TransactionSigning));

  // The third wallet never signs
  wallets[0].sign(&mut co.arena, round);
  wallets[1].sign(&mut co.arena, round);
  co.tick_after(61);
  assert!(co.arena.round(round).is_none());
  assert!(co.rpc.0.lock().unwrap().is_empty());

  let blame = co.arena.rounds().find(|r| r.blame_of() == Some(round)).map(Round::id).unwrap();
  assert_eq!(wallets[2].register(&mut co.arena, blame), Err(ProtocolErrorCode::InputBanned));
  let open = co.open_round();
  assert_eq!(wallets[2].register(&mut co.arena, open), Err(ProtocolErrorCode::InputBanned));

  let mut honest = wallets.into_iter().take(2).collect::<Vec<_>>();
  for wallet in honest.iter_mut() {
    wallet.register(&mut co.arena, blame).unwrap();
  }
  co.tick_after(61);
  assert_eq!(co.phase(blame), Some(Phase::ConnectionConfirmation));
  for wallet in honest.iter() {
    wallet.confirm(&mut co.arena, blame);
  }
  co.tick_after(1);
  for (i, wallet) in honest.iter().enumerate() {
    register_output(&mut co.arena, blame, 111 + i as u8, wallet.remaining_amount());
  }
  co.tick_after(1);
  for wallet in honest.iter() {
    wallet.sign(&mut co.arena, blame);
  }
  co.tick_after(1);
  assert_eq!(co.phase(blame), Some(Phase::TransactionBroadcasting));

  let broadcasts = co.rpc.0.lock().unwrap().clone();
  assert_eq!(broadcasts.len(), 1);
  assert_eq!(broadcasts[0].input.len(), 2);
  assert!(broadcasts[0].output.iter().all(|out| out.value == Amount::from_sat(99_320 - 310)));
}
