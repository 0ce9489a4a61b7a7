//! Shared types for the Legal Connect client workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
