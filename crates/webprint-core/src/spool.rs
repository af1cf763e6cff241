//! Auto-spool splitting.
//!
//! Some printers (receipt and label printers in particular) should receive
//! one spooler job per document.  When a client sends several documents in
//! one buffer, the splitter cuts the buffer after every occurrence of an
//! end-of-document marker:
//!
//! ```text
//! buffer:  AAA<END>BBB<END>CCC        marker: <END>   max jobs: 2
//! jobs:    "AAA<END>", "BBB<END>"     unconsumed: "CCC"
//! ```
//!
//! Bytes after the last consumed marker are left unconsumed; they are not an
//! error.

use serde::{Deserialize, Serialize};

use crate::buffer::{find, CommandBuffer};

/// When and how a buffer is split into several jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolPolicy {
    /// Maximum number of jobs cut from one buffer.  `0` disables splitting.
    pub documents_per_spool: usize,
    /// Text that ends one document, encoded with the buffer's charset.
    pub end_of_document: Option<String>,
}

impl SpoolPolicy {
    /// A policy that never splits.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(documents_per_spool: usize, end_of_document: impl Into<String>) -> Self {
        Self {
            documents_per_spool,
            end_of_document: Some(end_of_document.into()),
        }
    }

    /// Returns `true` if the policy has both a job limit and a marker.
    pub fn is_configured(&self) -> bool {
        self.documents_per_spool > 0
            && self.end_of_document.as_deref().is_some_and(|m| !m.is_empty())
    }

    /// Applies per-request overrides on top of this policy.
    pub fn overridden(&self, documents_per_spool: Option<usize>, end_of_document: Option<&str>) -> Self {
        Self {
            documents_per_spool: documents_per_spool.unwrap_or(self.documents_per_spool),
            end_of_document: end_of_document
                .map(str::to_string)
                .or_else(|| self.end_of_document.clone()),
        }
    }
}

/// The result of cutting a byte buffer at a marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolSplit<'a> {
    /// Each job runs through the end of its marker, inclusive.
    pub jobs: Vec<&'a [u8]>,
    /// Bytes after the last consumed marker.
    pub remainder: &'a [u8],
}

/// Cuts `bytes` after each occurrence of `marker`, producing at most
/// `max_jobs` jobs.
///
/// An empty marker or a `max_jobs` of zero yields no jobs and leaves the
/// whole input as the remainder.
pub fn split_at_marker<'a>(bytes: &'a [u8], marker: &[u8], max_jobs: usize) -> SpoolSplit<'a> {
    let mut jobs = Vec::new();
    let mut start = 0;

    while jobs.len() < max_jobs {
        let Some(found) = find(bytes, marker, start) else {
            break;
        };
        let end = found + marker.len();
        jobs.push(&bytes[start..end]);
        start = end;
    }

    SpoolSplit {
        jobs,
        remainder: &bytes[start..],
    }
}

/// How one buffer will be handed to a print sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpoolPlan<'a> {
    /// Splitting is inactive; the whole buffer is one job.
    Whole(&'a [u8]),
    /// The buffer was cut at the end-of-document marker.
    Split(SpoolSplit<'a>),
}

impl<'a> SpoolPlan<'a> {
    /// Jobs in the order they must be sent.
    pub fn jobs(&self) -> Vec<&'a [u8]> {
        match self {
            Self::Whole(bytes) => vec![*bytes],
            Self::Split(split) => split.jobs.clone(),
        }
    }

    /// Bytes that will not be sent.
    pub fn unconsumed(&self) -> &'a [u8] {
        match self {
            Self::Whole(_) => &[],
            Self::Split(split) => split.remainder,
        }
    }
}

/// Decides whether `buffer` is split under `policy` and computes the jobs.
///
/// Splitting is active only when the policy is configured, the buffer is
/// not empty, and the buffer contains the marker.
pub fn plan_jobs<'a>(buffer: &'a CommandBuffer, policy: &SpoolPolicy) -> SpoolPlan<'a> {
    let bytes = buffer.bytes();
    if !policy.is_configured() || buffer.is_empty() {
        return SpoolPlan::Whole(bytes);
    }

    let marker = buffer.encode_text(policy.end_of_document.as_deref().unwrap_or_default());
    if !buffer.contains(&marker) {
        return SpoolPlan::Whole(bytes);
    }

    let split = split_at_marker(bytes, &marker, policy.documents_per_spool);
    tracing::debug!(
        jobs = split.jobs.len(),
        unconsumed = split.remainder.len(),
        "buffer split at end-of-document marker"
    );
    SpoolPlan::Split(split)
}
