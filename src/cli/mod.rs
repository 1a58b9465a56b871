//! Terminal interaction for the `robobak` binary.

mod prompt;

pub use prompt::TerminalPrompt;
