//! Connection lifecycle states and the transition gate every pool operation
//! goes through

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use crate::{Error, Result};

/// Number of transitions retained per connection for diagnosis
const HISTORY_LIMIT: usize = 64;

/// Lifecycle state of a pooled connection.
///
/// ```text
/// CREATING   -> AVAILABLE | DESTROYED
/// AVAILABLE  -> BUSY | DESTROYING
/// BUSY       -> RELEASING | DESTROYING
/// RELEASING  -> AVAILABLE | BUSY | DESTROYING
/// DESTROYING -> DESTROYED
/// DESTROYED  (terminal)
/// ```
///
/// `RELEASING -> BUSY` is the direct hand-off from a releasing caller to the
/// oldest queued acquirer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
   Creating,
   Available,
   Busy,
   Releasing,
   Destroying,
   Destroyed,
}

impl ConnectionState {
   pub const ALL: [ConnectionState; 6] = [
      ConnectionState::Creating,
      ConnectionState::Available,
      ConnectionState::Busy,
      ConnectionState::Releasing,
      ConnectionState::Destroying,
      ConnectionState::Destroyed,
   ];

   /// Pure lookup in the transition table.
   pub fn can_transition_to(self, next: ConnectionState) -> bool {
      use ConnectionState::*;

      matches!(
         (self, next),
         (Creating, Available)
            | (Creating, Destroyed)
            | (Available, Busy)
            | (Available, Destroying)
            | (Busy, Releasing)
            | (Busy, Destroying)
            | (Releasing, Available)
            | (Releasing, Busy)
            | (Releasing, Destroying)
            | (Destroying, Destroyed)
      )
   }

   pub fn is_terminal(self) -> bool {
      self == ConnectionState::Destroyed
   }

   pub fn as_str(self) -> &'static str {
      match self {
         ConnectionState::Creating => "CREATING",
         ConnectionState::Available => "AVAILABLE",
         ConnectionState::Busy => "BUSY",
         ConnectionState::Releasing => "RELEASING",
         ConnectionState::Destroying => "DESTROYING",
         ConnectionState::Destroyed => "DESTROYED",
      }
   }
}

impl fmt::Display for ConnectionState {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

/// One recorded lifecycle change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
   pub from: ConnectionState,
   pub to: ConnectionState,
   pub at: Instant,
}

/// Current state of one connection plus its recent transition history.
///
/// The only way to change the state is [`StateMachine::transition`], which
/// refuses anything outside the transition table.
#[derive(Debug, Clone)]
pub struct StateMachine {
   current: ConnectionState,
   history: VecDeque<StateTransition>,
}

impl Default for StateMachine {
   fn default() -> Self {
      Self::new()
   }
}

impl StateMachine {
   /// A machine in `CREATING` with no history.
   pub fn new() -> Self {
      Self {
         current: ConnectionState::Creating,
         history: VecDeque::new(),
      }
   }

   pub fn state(&self) -> ConnectionState {
      self.current
   }

   pub fn can_transition(&self, next: ConnectionState) -> bool {
      self.current.can_transition_to(next)
   }

   /// Apply `next` if the table allows it and record the change.
   pub fn transition(&mut self, next: ConnectionState) -> Result<()> {
      if !self.can_transition(next) {
         return Err(Error::InvalidStateTransition {
            from: self.current,
            to: next,
         });
      }

      if self.history.len() == HISTORY_LIMIT {
         self.history.pop_front();
      }
      self.history.push_back(StateTransition {
         from: self.current,
         to: next,
         at: Instant::now(),
      });
      self.current = next;
      Ok(())
   }

   /// Recorded transitions, oldest first.
   pub fn history(&self) -> impl ExactSizeIterator<Item = &StateTransition> {
      self.history.iter()
   }
}
