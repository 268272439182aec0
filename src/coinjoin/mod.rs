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

//! # Coinjoin Server
//!
//! Functions and data to run a centralized coordinator for credential-based
//! coinjoins. Participants register inputs (as Alices), receive anonymous
//! amount and vsize credentials, redeem them for outputs (as Bobs), and
//! finally sign the shared transaction.

use std::fmt;

use serde::{Deserialize, Serialize};

#[macro_use]
mod macros;

pub mod arena;
pub mod credential;
pub mod ownership;
pub mod participant;
pub mod prison;
pub mod round;
pub mod script;
pub mod server;

/// Machine-readable reason for rejecting a protocol request
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum ProtocolErrorCode {
  /// No live round has the requested id
  RoundNotFound,
  /// The round is not in a phase which accepts this request
  WrongPhase,
  /// One of the offered coins is in prison
  InputBanned,
  /// One of the offered coins is already registered in this round
  AlreadyRegisteredCoin,
  /// The script is of a type this coordinator does not accept
  ScriptNotAllowed,
  /// The output script is not standard
  NonStandardOutput,
  /// An ownership proof did not verify
  WrongOwnershipProof,
  /// The round, or the Alice, would have too many inputs
  TooManyInputs,
  /// Blame round and the coin did not sign in the original round
  InputNotWhitelisted,
  /// Value is below the minimum registrable amount
  NotEnoughFunds,
  /// Value is above the maximum registrable amount
  TooMuchFunds,
  /// Inputs need more vsize than an Alice is allocated
  TooMuchVsize,
  /// No Alice in the round has the requested id
  AliceNotFound,
  /// The Alice already received its real credentials
  AliceAlreadyConfirmedConnection,
  /// Requested amount credentials do not match the registered coins
  IncorrectRequestedAmountCredentials,
  /// Requested vsize credentials do not match the registered coins
  IncorrectRequestedVsizeCredentials,
  /// The credential issuer rejected the request
  InvalidCredentialRequests,
  /// A witness was supplied for an input the transaction does not have
  InputIndexOutOfRange,
  /// A witness failed verification against its registered coin
  WrongCoinjoinSignature,
}

impl fmt::Display for ProtocolErrorCode {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    fmt::Debug::fmt(self, f)
  }
}

/// A Coinjoin-related error: a protocol rule was violated by the caller
#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error, Serialize, Deserialize)]
#[error("{code}: {context}")]
pub struct ProtocolError {
  /// What went wrong
  pub code: ProtocolErrorCode,
  /// Human-readable details
  pub context: String,
}

impl ProtocolError {
  /// Constructs a new protocol error
  pub fn new<S: Into<String>>(code: ProtocolErrorCode, context: S) -> ProtocolError {
    ProtocolError { code, context: context.into() }
  }
}
