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
//! The arena has exactly one owner, the server loop, which takes requests
//! off a channel one at a time and steps the arena whenever the tick period
//! has elapsed. Everyone else talks to it through a [`Handle`].

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::coinjoin::arena::{Arena, ConnectionConfirmationRequest, ConnectionConfirmationResponse,
                             InputsRegistrationRequest, InputsRegistrationResponse, InputsRemovalRequest,
                             OutputRegistrationRequest, OutputRegistrationResponse,
                             TransactionSignaturesRequest};
use crate::coinjoin::round::RoundState;
use crate::coinjoin::ProtocolError;
use crate::constants::SAVE_FREQUENCY;

type Reply<T> = Sender<Result<T, ProtocolError>>;

/// A request to the server loop, carrying where to send the answer
pub enum ArenaMessage {
  /// Register an Alice
  RegisterInput(InputsRegistrationRequest, Reply<InputsRegistrationResponse>),
  /// Confirm an Alice's connection
  ConfirmConnection(ConnectionConfirmationRequest, Reply<ConnectionConfirmationResponse>),
  /// Register a Bob
  RegisterOutput(OutputRegistrationRequest, Reply<OutputRegistrationResponse>),
  /// Unregister an Alice
  RemoveInput(InputsRemovalRequest, Reply<()>),
  /// Sign coinjoin inputs
  SignTransaction(TransactionSignaturesRequest, Reply<()>),
  /// Snapshot of all rounds
  RoundStates(Sender<Vec<RoundState>>),
  /// Save and stop
  Shutdown,
}

/// Failure of a call through a [`Handle`]
#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum CallError {
  /// The coordinator rejected the request
  #[error(transparent)]
  Protocol(#[from] ProtocolError),
  /// The server loop is gone
  #[error("coordinator is not running")]
  Disconnected,
}

/// Cloneable access to a running server
#[derive(Clone)]
pub struct Handle {
  tx: Sender<ArenaMessage>,
}

impl Handle {
  fn call<T, F>(&self, make: F) -> Result<T, CallError>
    where F: FnOnce(Sender<T>) -> ArenaMessage
  {
    let (reply_tx, reply_rx) = mpsc::channel();
    self.tx.send(make(reply_tx)).map_err(|_| CallError::Disconnected)?;
    reply_rx.recv().map_err(|_| CallError::Disconnected)
  }

  /// See [`Arena::register_input`]
  pub fn register_input(&self, request: InputsRegistrationRequest)
                        -> Result<InputsRegistrationResponse, CallError> {
    Ok(self.call(|reply| ArenaMessage::RegisterInput(request, reply))??)
  }

  /// See [`Arena::confirm_connection`]
  pub fn confirm_connection(&self, request: ConnectionConfirmationRequest)
                            -> Result<ConnectionConfirmationResponse, CallError> {
    Ok(self.call(|reply| ArenaMessage::ConfirmConnection(request, reply))??)
  }

  /// See [`Arena::register_output`]
  pub fn register_output(&self, request: OutputRegistrationRequest)
                         -> Result<OutputRegistrationResponse, CallError> {
    Ok(self.call(|reply| ArenaMessage::RegisterOutput(request, reply))??)
  }

  /// See [`Arena::remove_input`]
  pub fn remove_input(&self, request: InputsRemovalRequest) -> Result<(), CallError> {
    Ok(self.call(|reply| ArenaMessage::RemoveInput(request, reply))??)
  }

  /// See [`Arena::sign_transaction`]
  pub fn sign_transaction(&self, request: TransactionSignaturesRequest) -> Result<(), CallError> {
    Ok(self.call(|reply| ArenaMessage::SignTransaction(request, reply))??)
  }

  /// See [`Arena::round_states`]
  pub fn round_states(&self) -> Result<Vec<RoundState>, CallError> {
    self.call(ArenaMessage::RoundStates)
  }

  /// Asks the server to save the prison and stop. Does not wait.
  pub fn shutdown(&self) -> Result<(), CallError> {
    self.tx.send(ArenaMessage::Shutdown).map_err(|_| CallError::Disconnected)
  }
}

/// The server loop
pub struct Server {
  arena: Arena,
  rx: Receiver<ArenaMessage>,
  tick_period: Duration,
  prison_path: Option<PathBuf>,
}

impl Server {
  /// Constructs a server and a handle to it. The prison is saved to
  /// `prison_path`, if given, periodically and on shutdown.
  pub fn new(arena: Arena, tick_period: Duration, prison_path: Option<PathBuf>) -> (Server, Handle) {
    let (tx, rx) = mpsc::channel();
    let server = Server { arena, rx, tick_period, prison_path };
    (server, Handle { tx })
  }

  /// The arena
  pub fn arena(&self) -> &Arena {
    &self.arena
  }

  /// Runs until asked to shut down or until every handle is dropped, and
  /// gives back the arena. The first tick happens immediately.
  pub fn run(mut self) -> Arena {
    info!("Coordinator running, tick every {:?}.", self.tick_period);
    let save_frequency = Duration::from_secs(SAVE_FREQUENCY);
    let mut next_tick = Instant::now();
    let mut next_save = Instant::now() + save_frequency;

    loop {
      // Checked before every receive, so a stream of requests cannot hold
      // up the tick
      let now = Instant::now();
      if now >= next_tick {
        self.arena.step();
        next_tick = now + self.tick_period;
      }
      if now >= next_save {
        self.save_prison();
        next_save = now + save_frequency;
      }

      let wait = next_tick.min(next_save).saturating_duration_since(Instant::now());
      match self.rx.recv_timeout(wait) {
        Ok(ArenaMessage::Shutdown) => {
          info!("Shutdown requested.");
          break;
        }
        Ok(message) => self.handle(message),
        Err(RecvTimeoutError::Timeout) => {}
        Err(RecvTimeoutError::Disconnected) => {
          info!("All handles dropped, shutting down.");
          break;
        }
      }
    }

    self.save_prison();
    self.arena
  }

  fn handle(&mut self, message: ArenaMessage) {
    // A caller which went away does not care about its answer
    match message {
      ArenaMessage::RegisterInput(request, reply) => {
        let _ = reply.send(self.arena.register_input(request));
      }
      ArenaMessage::ConfirmConnection(request, reply) => {
        let _ = reply.send(self.arena.confirm_connection(request));
      }
      ArenaMessage::RegisterOutput(request, reply) => {
        let _ = reply.send(self.arena.register_output(request));
      }
      ArenaMessage::RemoveInput(request, reply) => {
        let _ = reply.send(self.arena.remove_input(request));
      }
      ArenaMessage::SignTransaction(request, reply) => {
        let _ = reply.send(self.arena.sign_transaction(request));
      }
      ArenaMessage::RoundStates(reply) => {
        let _ = reply.send(self.arena.round_states());
      }
      ArenaMessage::Shutdown => {}
    }
  }

  fn save_prison(&self) {
    let path = match self.prison_path {
      Some(ref path) => path,
      None => return,
    };
    debug!("Saving prison to {}...", path.display());
    match self.arena.prison().save(path) {
      Ok(()) => debug!("Done saving prison ({} inmates).", self.arena.prison().len()),
      Err(e) => error!("Failed to write prison to {}: {}", path.display(), e),
    }
  }
}
