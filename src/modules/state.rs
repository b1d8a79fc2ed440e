//! Module lifecycle state machine.
//!
//! ```text
//! Unregistered ──register──> Registered ──initialize──> Initialized ──start──> Started
//!                                                            ^  │               │  ^
//!                                                            │  └──disable──┐   │  │
//!                                                            └─────stop─────┼───┘  │
//!                                                                           v      │
//!                                                                        Disabled ─┘ enable
//!
//! any ──failure──> Error      any ──unregister──> Unregistered
//! ```
//!
//! `Error` is terminal for batch operations; only unregistering (and registering again)
//! leaves it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleState {
    /// Not known to the manager
    Unregistered,
    /// Registered, initialization hook not run yet
    Registered,
    /// Initialization hook succeeded
    Initialized,
    /// Running
    Started,
    /// Initialized but switched off by the user
    Disabled,
    /// Unrecoverable failure
    Error,
}

impl ModuleState {
    /// True when the state machine allows moving from `self` to `to`.
    pub fn can_transition_to(self, to: ModuleState) -> bool {
        use ModuleState::*;
        match (self, to) {
            (_, Error) | (_, Unregistered) => true,
            (Unregistered, Registered) => true,
            (Registered, Initialized) => true,
            (Initialized, Started) => true,
            (Started, Initialized) => true,
            (Started, Disabled) | (Initialized, Disabled) => true,
            (Disabled, Started) => true,
            _ => false,
        }
    }

    /// True once the initialization hook has succeeded and no failure happened since.
    pub fn is_initialized(self) -> bool {
        matches!(
            self,
            ModuleState::Initialized | ModuleState::Started | ModuleState::Disabled
        )
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Broadcast whenever a module changes state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStatusChanged {
    /// Module id
    pub module_id: String,
    /// State before the transition
    pub old_state: ModuleState,
    /// State after the transition
    pub new_state: ModuleState,
    /// When the transition happened
    pub timestamp: DateTime<Utc>,
}
