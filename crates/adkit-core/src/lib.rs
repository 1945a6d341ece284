//! # adkit-core
//!
//! Core types shared by the adkit directory crates.
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy for directory operations
//! - [`config`] - Connection configuration and validation
//! - [`credentials`] - Bind credentials
//! - [`guid`] - Object GUID decoding

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod credentials;
pub mod error;
pub mod guid;

// Re-export commonly used types
pub use config::DirectoryConfig;
pub use credentials::BindCredentials;
pub use error::{Error, Result};
pub use guid::ObjectGuid;
