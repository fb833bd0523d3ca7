use crate::error::AppError;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::sync::Arc;

/// Lifecycle of the streaming session.
///
/// `Idle` and `Error` are the only states `connect()` may start from;
/// `Error` preserves the failure for the operator until the next attempt
/// or an explicit disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Initializing,
    Running,
    Error,
}

pub struct StateManager {
    state: Arc<RwLock<SessionState>>,
    state_tx: Sender<SessionState>,
    state_rx: Receiver<SessionState>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        let (state_tx, state_rx) = crossbeam_channel::unbounded();
        Self {
            state: Arc::new(RwLock::new(SessionState::Idle)),
            state_tx,
            state_rx,
        }
    }

    pub fn transition(&self, new_state: SessionState) -> Result<(), AppError> {
        let mut current = self.state.write();

        let valid = matches!(
            (&*current, &new_state),
            (SessionState::Idle, SessionState::Initializing)
                | (SessionState::Error, SessionState::Initializing)
                | (SessionState::Initializing, SessionState::Running)
                | (SessionState::Initializing, SessionState::Error)
                | (SessionState::Initializing, SessionState::Idle)
                | (SessionState::Running, SessionState::Idle)
                | (SessionState::Running, SessionState::Error)
                | (SessionState::Error, SessionState::Idle)
        );

        if !valid {
            return Err(AppError::InvalidTransition {
                from: *current,
                to: new_state,
            });
        }

        tracing::info!("State transition: {:?} -> {:?}", *current, new_state);
        *current = new_state;
        let _ = self.state_tx.send(new_state);
        Ok(())
    }

    pub fn current(&self) -> SessionState {
        *self.state.read()
    }

    pub fn subscribe(&self) -> Receiver<SessionState> {
        self.state_rx.clone()
    }
}
