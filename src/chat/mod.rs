//! Chat application module for the `docchat-chat` REPL.
//!
//! This module provides the pieces of an interactive terminal front-end
//! built on top of the docchat client library:
//!
//! - [`commands`]: slash command parsing
//! - [`render`]: streamed answer and citation output

mod commands;
mod render;

pub use commands::{ChatCommand, LoginMethod, help_text, parse_command};
pub use render::{PlainTextRenderer, Renderer};
