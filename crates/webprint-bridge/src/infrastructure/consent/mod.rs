//! Consent prompts.
//!
//! A site's first `init` asks the user whether it may use local printers and
//! serial ports.  Where that question is asked depends on how the bridge is
//! deployed:
//!
//! - `terminal` – on the controlling terminal (interactive use).
//! - `command` – through an external program, e.g. a `zenity` or
//!   `osascript` wrapper when running as a desktop service.
//! - `deny` – never; only sites granted earlier keep working.

use std::sync::Arc;

use crate::application::access_control::ConsentPrompt;
use crate::domain::ConsentMode;

pub mod command;
pub mod mock;
pub mod terminal;

pub use command::CommandPrompt;
pub use terminal::TerminalPrompt;

/// Question shown to the user for `origin`.
pub fn consent_message(origin: &str) -> String {
    format!(
        "{origin} is trying to access your printers and serial ports.\n\
         Would you like to allow?\n\
         Only click yes for sites you trust."
    )
}

/// Refuses every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyPrompt;

impl ConsentPrompt for DenyPrompt {
    fn ask(&self, _origin: &str) -> bool {
        false
    }
}

/// Builds the prompt selected by `mode`.
pub fn build_prompt(mode: &ConsentMode) -> Arc<dyn ConsentPrompt> {
    match mode {
        ConsentMode::Terminal => Arc::new(TerminalPrompt::default()),
        ConsentMode::Command(command) => Arc::new(CommandPrompt::new(command)),
        ConsentMode::Deny => Arc::new(DenyPrompt),
    }
}
