//! torq common types and errors.
//!
//! This crate provides foundational types shared across torq-core modules:
//! - Device-side identity types
//! - The validation error value and the fatal error enum

pub mod error;
pub mod id;

pub use error::{Checked, Error, ErrorCategory, Result, ValidationError};
pub use id::UserId;
