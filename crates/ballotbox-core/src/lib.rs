pub mod access;
pub mod engine;
pub mod error;

pub use engine::{PollEngine, PollUpdate};
pub use error::PollError;
