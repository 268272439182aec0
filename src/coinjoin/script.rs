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

//! # Script Types
//!
//! Classification of output scripts. Only P2WPKH is accepted for coinjoin
//! inputs and outputs; the other standard templates are recognized so that
//! we can tell "not allowed" apart from "not standard".

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::EcdsaSighashType;
use bitcoin::{ecdsa, CompressedPublicKey, Script, WPubkeyHash, Witness};

use crate::constants::{P2WPKH_INPUT_VSIZE, P2WPKH_OUTPUT_VSIZE};

/// The template a scriptPubKey follows
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ScriptType {
  /// Pay to witness pubkey hash, with its key hash
  P2wpkh(WPubkeyHash),
  /// Pay to pubkey hash
  P2pkh,
  /// Pay to script hash
  P2sh,
  /// Pay to witness script hash
  P2wsh,
  /// Pay to taproot
  P2tr,
  /// Anything else
  Unsupported,
}

impl ScriptType {
  /// Classifies a scriptPubKey
  pub fn classify(script: &Script) -> ScriptType {
    if script.is_p2wpkh() {
      // OP_0 PUSH20 <hash>
      match WPubkeyHash::from_slice(&script.as_bytes()[2..22]) {
        Ok(hash) => ScriptType::P2wpkh(hash),
        Err(_) => ScriptType::Unsupported,
      }
    } else if script.is_p2pkh() {
      ScriptType::P2pkh
    } else if script.is_p2sh() {
      ScriptType::P2sh
    } else if script.is_p2wsh() {
      ScriptType::P2wsh
    } else if script.is_p2tr() {
      ScriptType::P2tr
    } else {
      ScriptType::Unsupported
    }
  }

  /// Whether the script is one of the standard output templates
  pub fn is_standard(&self) -> bool {
    !matches!(*self, ScriptType::Unsupported)
  }

  /// Whether the coordinator accepts this script type in a coinjoin
  pub fn is_allowed(&self) -> bool {
    matches!(*self, ScriptType::P2wpkh(_))
  }

  /// Virtual size of spending an output of this type, if supported
  pub fn input_vsize(&self) -> Option<u64> {
    match *self {
      ScriptType::P2wpkh(_) => Some(P2WPKH_INPUT_VSIZE),
      _ => None,
    }
  }

  /// Virtual size of an output of this type, if supported
  pub fn output_vsize(&self) -> Option<u64> {
    match *self {
      ScriptType::P2wpkh(_) => Some(P2WPKH_OUTPUT_VSIZE),
      _ => None,
    }
  }
}

/// Checks a `[signature, pubkey]` P2WPKH witness against the key hash of the
/// spent script and the 32-byte digest it must sign. Only SIGHASH_ALL is
/// accepted.
pub fn verify_p2wpkh_witness(witness: &Witness, key_hash: &WPubkeyHash, digest: [u8; 32]) -> bool {
  if witness.len() != 2 {
    return false;
  }
  let (sig, key) = match (witness.nth(0), witness.nth(1)) {
    (Some(sig), Some(key)) => (sig, key),
    _ => return false,
  };
  let key = match CompressedPublicKey::from_slice(key) {
    Ok(key) => key,
    Err(_) => return false,
  };
  if key.wpubkey_hash() != *key_hash {
    return false;
  }
  let sig = match ecdsa::Signature::from_slice(sig) {
    Ok(sig) => sig,
    Err(_) => return false,
  };
  if sig.sighash_type != EcdsaSighashType::All {
    return false;
  }
  let msg = Message::from_digest(digest);
  Secp256k1::verification_only().verify_ecdsa(&msg, &sig.signature, &key.0).is_ok()
}

#[cfg(test)]
mod tests {
  use bitcoin::hashes::Hash;
  use bitcoin::{ScriptBuf, WPubkeyHash};

  use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
  use bitcoin::sighash::EcdsaSighashType;
  use bitcoin::{ecdsa, CompressedPublicKey, Witness};

  use super::{verify_p2wpkh_witness, ScriptType};

  fn witness_for(sk: &SecretKey, digest: [u8; 32], sighash_type: EcdsaSighashType) -> (Witness, CompressedPublicKey) {
    let secp = Secp256k1::new();
    let pk = PublicKey::from_secret_key(&secp, sk);
    let signature = secp.sign_ecdsa(&Message::from_digest(digest), sk);
    let sig = ecdsa::Signature { signature, sighash_type };
    (Witness::p2wpkh(&sig, &pk), CompressedPublicKey(pk))
  }

  #[test]
  fn classify_p2wpkh() {
    let hash = WPubkeyHash::from_byte_array([7; 20]);
    let script = ScriptBuf::new_p2wpkh(&hash);
    let kind = ScriptType::classify(&script);
    assert_eq!(kind, ScriptType::P2wpkh(hash));
    assert!(kind.is_standard());
    assert!(kind.is_allowed());
    assert_eq!(kind.output_vsize(), Some(31));
  }

  #[test]
  fn classify_others() {
    let p2pkh = ScriptBuf::from_hex("76a914000000000000000000000000000000000000000088ac").unwrap();
    assert_eq!(ScriptType::classify(&p2pkh), ScriptType::P2pkh);
    assert!(!ScriptType::P2pkh.is_allowed());
    assert!(ScriptType::P2pkh.is_standard());

    let junk = ScriptBuf::from_hex("51").unwrap();
    assert_eq!(ScriptType::classify(&junk), ScriptType::Unsupported);
    assert!(!ScriptType::Unsupported.is_standard());
    assert_eq!(ScriptType::Unsupported.input_vsize(), None);
  }

  #[test]
  fn witness_verification() {
    let sk = SecretKey::from_slice(&[0x21; 32]).unwrap();
    let digest = [0x42; 32];
    let (witness, pk) = witness_for(&sk, digest, EcdsaSighashType::All);
    assert!(verify_p2wpkh_witness(&witness, &pk.wpubkey_hash(), digest));
    // wrong digest
    assert!(!verify_p2wpkh_witness(&witness, &pk.wpubkey_hash(), [0x43; 32]));
    // wrong key hash
    let other = WPubkeyHash::from_byte_array([1; 20]);
    assert!(!verify_p2wpkh_witness(&witness, &other, digest));
    // wrong shape
    assert!(!verify_p2wpkh_witness(&Witness::new(), &pk.wpubkey_hash(), digest));
  }

  #[test]
  fn witness_must_sign_all() {
    let sk = SecretKey::from_slice(&[0x22; 32]).unwrap();
    let digest = [0x42; 32];
    let (witness, pk) = witness_for(&sk, digest, EcdsaSighashType::None);
    assert!(!verify_p2wpkh_witness(&witness, &pk.wpubkey_hash(), digest));
  }
}
