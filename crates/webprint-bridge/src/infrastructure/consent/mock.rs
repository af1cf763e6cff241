//! Scripted consent prompt for tests.

use std::sync::{Arc, Mutex, PoisonError};

use crate::application::access_control::ConsentPrompt;

/// Always gives the same answer and records who asked.
#[derive(Clone, Default)]
pub struct FixedConsent {
    answer: bool,
    asked: Arc<Mutex<Vec<String>>>,
}

impl FixedConsent {
    pub fn allow() -> Self {
        Self {
            answer: true,
            ..Self::default()
        }
    }

    pub fn deny() -> Self {
        Self::default()
    }

    /// Origins the prompt was shown for, in order.
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ConsentPrompt for FixedConsent {
    fn ask(&self, origin: &str) -> bool {
        self.asked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(origin.to_string());
        self.answer
    }
}
