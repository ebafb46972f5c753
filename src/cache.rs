//! Last known state of the wallet's channel.

use parking_lot::Mutex;

use crate::channel::State;

/// Holds a private copy of the latest state. Callers only ever see clones.
#[derive(Debug, Default)]
pub struct StateCache {
    state: Mutex<Option<State>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, state: &State) {
        let state = state.clone();
        *self.state.lock() = Some(state);
    }

    pub fn get(&self) -> Option<State> {
        self.state.lock().clone()
    }

    pub fn clear(&self) -> Option<State> {
        self.state.lock().take()
    }
}
