//! Ownership of the local adapter between the central and peripheral roles.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::{Error, Result};
use crate::management::interface::Controller;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Role {
    Central,
    Peripheral,
}

#[derive(Debug, Default)]
struct RadioState {
    holder: Option<Role>,
}

/// A coordinating handle to one adapter. Clones share the same state; only
/// one role may hold the adapter at a time.
#[derive(Debug, Clone)]
pub struct Radio {
    controller: Controller,
    state: Arc<Mutex<RadioState>>,
}

impl Radio {
    pub fn new(controller: Controller) -> Self {
        Radio {
            controller,
            state: Arc::default(),
        }
    }

    pub fn controller(&self) -> Controller {
        self.controller
    }

    fn lock(&self) -> MutexGuard<'_, RadioState> {
        // the state is a plain value, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Takes the adapter for `role` until the returned claim is dropped.
    pub fn claim(&self, role: Role) -> Result<RadioClaim> {
        let mut state = self.lock();
        if let Some(holder) = state.holder {
            return Err(Error::RadioInUse { holder });
        }

        state.holder = Some(role);
        debug!(controller = %self.controller, ?role, "radio claimed");

        Ok(RadioClaim {
            radio: self.clone(),
            role,
        })
    }

    pub fn holder(&self) -> Option<Role> {
        self.lock().holder
    }
}

/// Proof that a role holds the adapter.
#[derive(Debug)]
pub struct RadioClaim {
    radio: Radio,
    role: Role,
}

impl RadioClaim {
    pub fn role(&self) -> Role {
        self.role
    }
}

impl Drop for RadioClaim {
    fn drop(&mut self) {
        self.radio.lock().holder = None;
        debug!(controller = %self.radio.controller, role = ?self.role, "radio released");
    }
}
