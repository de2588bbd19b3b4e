//! Book ingestion status state machine
//!
//! ```text
//! Pending ──start──▶ Processing ──complete──▶ Completed
//!    │                   │
//!    └──────fail─────────┴──────▶ Failed ◀── fail
//! ```
//!
//! Completed is terminal. An illegal transition is not an error: it yields
//! [`TransitionOutcome::Rejected`] and the status is left untouched.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ingestion status of a book
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A requested status change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BookTransition {
    StartProcessing,
    Complete,
    Fail,
}

/// Result of applying a transition to a status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    Accepted { from: BookStatus, to: BookStatus },
    Rejected { from: BookStatus, attempted: BookTransition },
}

impl BookStatus {
    pub const ALL: [BookStatus; 4] = [
        BookStatus::Pending,
        BookStatus::Processing,
        BookStatus::Completed,
        BookStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::Pending => "pending",
            BookStatus::Processing => "processing",
            BookStatus::Completed => "completed",
            BookStatus::Failed => "failed",
        }
    }

    /// Completed is the only state nothing can leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookStatus::Completed)
    }

    /// Apply `transition` to this status.
    pub fn apply(self, transition: BookTransition) -> TransitionOutcome {
        if transition.allowed_sources().contains(&self) {
            TransitionOutcome::Accepted {
                from: self,
                to: transition.target(),
            }
        } else {
            TransitionOutcome::Rejected {
                from: self,
                attempted: transition,
            }
        }
    }
}

impl BookTransition {
    /// Status a book ends up in when this transition is accepted
    pub fn target(&self) -> BookStatus {
        match self {
            BookTransition::StartProcessing => BookStatus::Processing,
            BookTransition::Complete => BookStatus::Completed,
            BookTransition::Fail => BookStatus::Failed,
        }
    }

    /// States from which this transition is legal
    pub fn allowed_sources(&self) -> &'static [BookStatus] {
        match self {
            BookTransition::StartProcessing => &[BookStatus::Pending],
            BookTransition::Complete => &[BookStatus::Processing],
            BookTransition::Fail => &[
                BookStatus::Pending,
                BookStatus::Processing,
                BookStatus::Failed,
            ],
        }
    }
}

impl TransitionOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, TransitionOutcome::Accepted { .. })
    }
}

impl fmt::Display for BookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for BookTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BookTransition::StartProcessing => "start_processing",
            BookTransition::Complete => "complete",
            BookTransition::Fail => "fail",
        };
        f.write_str(name)
    }
}

/// Unknown status text in storage
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown book status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for BookStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookStatus::Pending),
            "processing" => Ok(BookStatus::Processing),
            "completed" => Ok(BookStatus::Completed),
            "failed" => Ok(BookStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl From<BookStatus> for String {
    fn from(status: BookStatus) -> Self {
        status.as_str().to_string()
    }
}
