//! Value types for bulb state and command parameters.

mod color;
mod power;

pub use color::Color;
pub use power::PowerState;
