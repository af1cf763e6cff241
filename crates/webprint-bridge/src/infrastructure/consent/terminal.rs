//! Consent prompt on the controlling terminal.

use std::io::{self, BufRead, Write};
use std::sync::{Mutex, PoisonError};

use tracing::warn;

use super::consent_message;
use crate::application::access_control::ConsentPrompt;

/// Asks on stderr and reads the answer from stdin.
///
/// Concurrent `init` requests from different sites are asked one at a time.
#[derive(Debug, Default)]
pub struct TerminalPrompt {
    serial: Mutex<()>,
}

impl ConsentPrompt for TerminalPrompt {
    fn ask(&self, origin: &str) -> bool {
        let _turn = self.serial.lock().unwrap_or_else(PoisonError::into_inner);

        let mut stderr = io::stderr().lock();
        if writeln!(stderr, "\n{}", consent_message(origin))
            .and_then(|()| write!(stderr, "[y/N] "))
            .and_then(|()| stderr.flush())
            .is_err()
        {
            return false;
        }

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_yes(&answer),
            Err(e) => {
                warn!(error = %e, "could not read consent answer");
                false
            }
        }
    }
}

/// Anything other than an explicit yes is a no.
fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
