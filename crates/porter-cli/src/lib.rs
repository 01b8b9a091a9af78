//! Porter CLI - command implementations behind the `porter` binary
//!
//! - `plan`: catalog document to plan document
//! - `inspect`: print a plan linearly or by phase
//! - `apply`: run a plan against the simulated target with a file checkpoint
//! - `report`: summarize a saved apply report

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod commands;
pub mod settings;

pub use commands::{ApplyFiles, InspectView};
pub use settings::Settings;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
