// src/display/mod.rs
//! Presentation of a live recording

pub mod terminal;

use std::io::IsTerminal;

pub use terminal::TerminalDisplay;

/// Whether stdout can take a redrawn panel rather than plain lines
pub fn is_interactive() -> bool {
    std::io::stdout().is_terminal()
}
