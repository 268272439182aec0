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

//! # Credentials
//!
//! The coordinator does not look inside credentials. It relays each request
//! to the round's issuer together with the delta the protocol expects, and
//! the issuer either refuses or prepares a response. Preparing does not
//! change issuer state; only committing a prepared response does, so a
//! request which fails validation halfway leaves every issuer untouched.
//!
//! [`BalanceIssuer`] is a reference issuer enforcing only the protocol-level
//! contract: exact deltas, the number of credentials per request, and that
//! no more value is redeemed than was issued. It provides none of the
//! unlinkability of a real algebraic-MAC issuer and must be replaced by one
//! before anything of value depends on it.

use std::fmt;

use bitcoin::hashes::{sha256, Hash};
use serde::{Deserialize, Serialize};

/// What a credential measures
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum CredentialKind {
  /// Value, in satoshi
  Amount,
  /// Transaction virtual size, in vbytes
  Vsize,
}

impl fmt::Display for CredentialKind {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match *self {
      CredentialKind::Amount => f.write_str("amount"),
      CredentialKind::Vsize => f.write_str("vsize"),
    }
  }
}

/// A request for credentials. `delta` is the signed change in value the
/// request represents: positive when credentials are issued against inputs,
/// negative when they are redeemed for outputs, zero for null credentials.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct CredentialsRequest {
  /// Signed value balance of the request
  pub delta: i64,
  /// Blinded credential requests, one per credential
  pub requested: Vec<sha256::Hash>,
}

impl CredentialsRequest {
  /// Constructs a request
  pub fn new(delta: i64, requested: Vec<sha256::Hash>) -> CredentialsRequest {
    CredentialsRequest { delta, requested }
  }

  /// A request for `k` zero-valued credentials
  pub fn zero(requested: Vec<sha256::Hash>) -> CredentialsRequest {
    CredentialsRequest { delta: 0, requested }
  }
}

/// Credentials issued in answer to a request
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct CredentialsResponse {
  /// Issued credentials, in request order
  pub issued: Vec<sha256::Hash>,
}

/// A response which passed validation but has not yet been committed
#[derive(Clone, PartialEq, Eq, Debug)]
#[must_use = "a prepared response does nothing until committed"]
pub struct PreparedResponse {
  kind: CredentialKind,
  delta: i64,
  issued: Vec<sha256::Hash>,
}

impl PreparedResponse {
  /// The value balance this response will apply when committed
  pub fn delta(&self) -> i64 {
    self.delta
  }
}

/// Reasons an issuer refuses a request
#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum IssuerError {
  /// The request's delta is not what the protocol expects
  #[error("{kind} delta {actual} does not match expected {expected}")]
  DeltaMismatch {
    /// Issuer kind
    kind: CredentialKind,
    /// Delta the protocol computed
    expected: i64,
    /// Delta in the request
    actual: i64,
  },
  /// Wrong number of credentials requested
  #[error("{kind} request has {actual} credentials, expected {expected}")]
  WrongCredentialCount {
    /// Issuer kind
    kind: CredentialKind,
    /// Credentials per request
    expected: usize,
    /// Credentials in the request
    actual: usize,
  },
  /// The delta exceeds the largest value one request may carry
  #[error("{kind} delta {delta} out of range")]
  ValueOutOfRange {
    /// Issuer kind
    kind: CredentialKind,
    /// Delta in the request
    delta: i64,
  },
  /// Redeeming would exceed what was issued
  #[error("{kind} redemption of {redeemed} exceeds outstanding balance {balance}")]
  InsufficientBalance {
    /// Issuer kind
    kind: CredentialKind,
    /// Value not yet redeemed
    balance: i64,
    /// Value the request redeems
    redeemed: i64,
  },
}

/// An issuer of credentials for one quantity in one round
pub trait CredentialIssuer: Send {
  /// Which quantity this issuer's credentials measure
  fn kind(&self) -> CredentialKind;

  /// Validates a request against the delta the protocol expects and
  /// prepares the response, without changing issuer state
  fn prepare_response(&self, request: &CredentialsRequest, expected_delta: i64)
                      -> Result<PreparedResponse, IssuerError>;

  /// Applies a prepared response and hands out its credentials
  fn commit(&mut self, prepared: PreparedResponse) -> CredentialsResponse;
}

/// Creates the issuers of new rounds
pub trait IssuerFactory: Send {
  /// A fresh issuer for `kind`, refusing single requests worth more than
  /// `max_value`
  fn issuer(&self, kind: CredentialKind, max_value: u64) -> Box<dyn CredentialIssuer>;
}

/// Reference issuer enforcing the balance contract only
pub struct BalanceIssuer {
  kind: CredentialKind,
  key: [u8; 32],
  credential_count: usize,
  max_value: u64,
  balance: i64,
}

impl BalanceIssuer {
  /// Creates an issuer with a random key
  pub fn new(kind: CredentialKind, credential_count: usize, max_value: u64) -> BalanceIssuer {
    BalanceIssuer {
      kind,
      key: rand::random(),
      credential_count,
      max_value,
      balance: 0,
    }
  }

  /// Value issued but not yet redeemed
  pub fn balance(&self) -> i64 {
    self.balance
  }

  fn issue(&self, requested: &sha256::Hash) -> sha256::Hash {
    let mut data = Vec::with_capacity(65);
    data.extend_from_slice(&self.key);
    data.push(self.kind as u8);
    data.extend_from_slice(requested.as_byte_array());
    sha256::Hash::hash(&data)
  }
}

impl CredentialIssuer for BalanceIssuer {
  fn kind(&self) -> CredentialKind {
    self.kind
  }

  fn prepare_response(&self, request: &CredentialsRequest, expected_delta: i64)
                      -> Result<PreparedResponse, IssuerError> {
    let kind = self.kind;
    if request.requested.len() != self.credential_count {
      return Err(IssuerError::WrongCredentialCount {
        kind,
        expected: self.credential_count,
        actual: request.requested.len(),
      });
    }
    if request.delta != expected_delta {
      return Err(IssuerError::DeltaMismatch { kind, expected: expected_delta, actual: request.delta });
    }
    if request.delta.unsigned_abs() > self.max_value {
      return Err(IssuerError::ValueOutOfRange { kind, delta: request.delta });
    }
    if self.balance + request.delta < 0 {
      return Err(IssuerError::InsufficientBalance {
        kind,
        balance: self.balance,
        redeemed: -request.delta,
      });
    }
    Ok(PreparedResponse {
      kind,
      delta: request.delta,
      issued: request.requested.iter().map(|r| self.issue(r)).collect(),
    })
  }

  fn commit(&mut self, prepared: PreparedResponse) -> CredentialsResponse {
    debug_assert_eq!(prepared.kind, self.kind);
    self.balance += prepared.delta;
    CredentialsResponse { issued: prepared.issued }
  }
}

/// Creates [`BalanceIssuer`]s
pub struct BalanceIssuerFactory {
  credential_count: usize,
}

impl BalanceIssuerFactory {
  /// Creates a factory for issuers handling `credential_count` credentials
  /// per request
  pub fn new(credential_count: usize) -> BalanceIssuerFactory {
    BalanceIssuerFactory { credential_count }
  }
}

impl IssuerFactory for BalanceIssuerFactory {
  fn issuer(&self, kind: CredentialKind, max_value: u64) -> Box<dyn CredentialIssuer> {
    Box::new(BalanceIssuer::new(kind, self.credential_count, max_value))
  }
}

#[cfg(test)]
mod tests {
  use bitcoin::hashes::{sha256, Hash};

  use super::*;

  fn requested(k: usize) -> Vec<sha256::Hash> {
    (0..k).map(|i| sha256::Hash::hash(&[i as u8])).collect()
  }

  #[test]
  fn prepare_does_not_change_balance() {
    let mut issuer = BalanceIssuer::new(CredentialKind::Amount, 2, 1_000_000);
    let prepared = issuer.prepare_response(&CredentialsRequest::new(5000, requested(2)), 5000).unwrap();
    assert_eq!(issuer.balance(), 0);
    let response = issuer.commit(prepared);
    assert_eq!(issuer.balance(), 5000);
    assert_eq!(response.issued.len(), 2);
  }

  #[test]
  fn exact_delta_required() {
    let issuer = BalanceIssuer::new(CredentialKind::Vsize, 2, 255);
    let err = issuer.prepare_response(&CredentialsRequest::new(186, requested(2)), 187).unwrap_err();
    assert_eq!(err, IssuerError::DeltaMismatch { kind: CredentialKind::Vsize, expected: 187, actual: 186 });
  }

  #[test]
  fn credential_count_enforced() {
    let issuer = BalanceIssuer::new(CredentialKind::Amount, 2, 1_000);
    assert!(matches!(issuer.prepare_response(&CredentialsRequest::zero(requested(3)), 0),
                     Err(IssuerError::WrongCredentialCount { expected: 2, actual: 3, .. })));
  }

  #[test]
  fn cannot_redeem_more_than_issued() {
    let mut issuer = BalanceIssuer::new(CredentialKind::Amount, 2, 1_000_000);
    let prepared = issuer.prepare_response(&CredentialsRequest::new(10_000, requested(2)), 10_000).unwrap();
    let _ = issuer.commit(prepared);

    let prepared = issuer.prepare_response(&CredentialsRequest::new(-6_000, requested(2)), -6_000).unwrap();
    let _ = issuer.commit(prepared);
    assert_eq!(issuer.balance(), 4_000);

    let err = issuer.prepare_response(&CredentialsRequest::new(-4_001, requested(2)), -4_001).unwrap_err();
    assert!(matches!(err, IssuerError::InsufficientBalance { balance: 4_000, redeemed: 4_001, .. }));
  }

  #[test]
  fn value_range_enforced() {
    let issuer = BalanceIssuer::new(CredentialKind::Amount, 2, 1_000);
    assert!(matches!(issuer.prepare_response(&CredentialsRequest::new(1_001, requested(2)), 1_001),
                     Err(IssuerError::ValueOutOfRange { delta: 1_001, .. })));
  }
}
