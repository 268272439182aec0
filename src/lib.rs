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

//! # Coinjoin Coordinator
//!
//! A round coordinator for credential-based coinjoins. Participants
//! register coins, receive anonymous credentials for their value, redeem
//! them for fresh outputs under unlinkable identities, and sign one shared
//! transaction. Coins whose owners walk away mid-round are banned and the
//! rest retry in a blame round.
//!

// Coding conventions
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

pub mod bitcoind;
pub mod coinjoin;
pub mod constants;
pub mod rpc_server;
pub mod user_data;
