//! Shared types for Archway

mod error;

pub use error::{ArchwayError, Result};
