//! Chatboard terminal client.
//!
//! A line-oriented shell over [`chatboard_core::ChatClient`]. Plain lines are
//! chat messages; lines starting with `/` are commands.

pub mod command;
pub mod render;

pub use command::{Command, CommandError, parse_command};
