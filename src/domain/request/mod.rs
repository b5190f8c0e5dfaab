//! Request aggregate - lifecycle states and transitions.
//!
//! - Request types and states (typestate pattern)
//! - State transition methods
//! - Outcome and observable lifecycle types

pub mod state;
pub mod transitions;

pub use state::*;
pub use transitions::{Countdown, Transport};
