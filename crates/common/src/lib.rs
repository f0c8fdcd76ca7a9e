//! Shared types for the local credential bridge workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
