//! CLI-specific functionality
//!
//! Argument parsing for the `devstack` binary and the rendering helpers it
//! shares with scripts embedding the library.

pub mod args;
pub mod output;

pub use args::{Args, Commands};
pub use output::{format_status, format_step};
