//! Consent prompt delegated to an external program.

use std::process::{Command, Stdio};

use tracing::{debug, warn};

use super::consent_message;
use crate::application::access_control::ConsentPrompt;

/// Runs `program args... <origin>`; exit status 0 means the user agreed.
///
/// The full question is also exported as `WEBPRINT_CONSENT_MESSAGE` so a
/// dialog wrapper can show it verbatim.
#[derive(Debug, Clone)]
pub struct CommandPrompt {
    program: String,
    args: Vec<String>,
}

impl CommandPrompt {
    /// `command` is split on whitespace into a program and its arguments.
    pub fn new(command: &str) -> Self {
        let mut words = command.split_whitespace().map(str::to_string);
        Self {
            program: words.next().unwrap_or_default(),
            args: words.collect(),
        }
    }
}

impl ConsentPrompt for CommandPrompt {
    fn ask(&self, origin: &str) -> bool {
        if self.program.is_empty() {
            warn!("consent command is empty; denying");
            return false;
        }

        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(origin)
            .env("WEBPRINT_CONSENT_MESSAGE", consent_message(origin))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status();

        match status {
            Ok(status) => {
                debug!(origin, %status, "consent command finished");
                status.success()
            }
            Err(e) => {
                warn!(program = %self.program, error = %e, "could not run consent command");
                false
            }
        }
    }
}
