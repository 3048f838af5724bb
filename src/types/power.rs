//! Power state of a bulb.

use serde::{Deserialize, Serialize};

/// Last known power state of a bulb.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    /// The bulb is emitting light
    On,
    /// The bulb is dark
    #[default]
    Off,
}

impl PowerState {
    /// The state a toggle moves to.
    pub fn toggled(self) -> Self {
        match self {
            PowerState::On => PowerState::Off,
            PowerState::Off => PowerState::On,
        }
    }

    pub fn is_on(self) -> bool {
        self == PowerState::On
    }
}
