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

//! # Constants
//!
//! Defines compile-time constants which determine operation of the
//! coordinator. Everything which is not a protocol constant can be
//! overridden in the configuration file; these are the defaults.
//!

/// Virtual size of a P2WPKH input, rounded up
pub const P2WPKH_INPUT_VSIZE: u64 = 68;

/// Virtual size of a P2WPKH output
pub const P2WPKH_OUTPUT_VSIZE: u64 = 31;

/// The save-to-disk frequency in s
pub const SAVE_FREQUENCY: u64 = 600; // 10 minutes

/// Default period between two arena ticks, in s
pub const DEFAULT_TICK_PERIOD: u64 = 10;

/// Default confirmation target used for fee estimation, in blocks
pub const DEFAULT_CONFIRMATION_TARGET: u16 = 2;

/// Fee rate used when the node cannot estimate one (e.g. regtest), in sat/vB
pub const DEFAULT_FALLBACK_FEE_RATE: u64 = 10;

/// Default minimum number of inputs for a round to proceed
pub const DEFAULT_MIN_INPUT_COUNT: usize = 21;

/// Default maximum number of inputs in a round
pub const DEFAULT_MAX_INPUT_COUNT: usize = 100;

/// Default maximum number of coins a single Alice may register
pub const DEFAULT_MAX_INPUTS_PER_ALICE: usize = 8;

/// Default minimum registrable amount, in sat
pub const DEFAULT_MIN_REGISTRABLE_AMOUNT: u64 = 5_000;

/// Default maximum registrable amount, in sat (43000 BTC)
pub const DEFAULT_MAX_REGISTRABLE_AMOUNT: u64 = 4_300_000_000_000;

/// Default virtual size budget handed to each Alice
pub const DEFAULT_PER_ALICE_VSIZE_ALLOCATION: u64 = 255;

/// Default input registration timeout for ordinary rounds, in s
pub const DEFAULT_INPUT_REGISTRATION_TIMEOUT: u64 = 3600;

/// Default input registration timeout for blame rounds, in s
pub const DEFAULT_BLAME_INPUT_REGISTRATION_TIMEOUT: u64 = 180;

/// Default connection confirmation timeout, in s
pub const DEFAULT_CONNECTION_CONFIRMATION_TIMEOUT: u64 = 60;

/// Default output registration timeout, in s
pub const DEFAULT_OUTPUT_REGISTRATION_TIMEOUT: u64 = 60;

/// Default transaction signing timeout, in s
pub const DEFAULT_TRANSACTION_SIGNING_TIMEOUT: u64 = 60;

/// Default number of credentials requested and presented per request
pub const DEFAULT_CREDENTIAL_COUNT: usize = 2;

/// Default identifier bound into ownership proofs
pub const DEFAULT_COORDINATOR_IDENTIFIER: &str = "CoinJoinCoordinatorIdentifier";

/// Default bitcoind RPC url
pub const DEFAULT_BITCOIND_URL: &str = "http://127.0.0.1:18443";
