//! Book status tracker
//!
//! Every write is a compare-and-set against the transition's legal source
//! states, so two workers racing on one book cannot both move it forward.

use scribe_common::db::BookStore;
use scribe_common::errors::Result;
use scribe_common::metrics;
use scribe_common::status::{BookStatus, BookTransition, TransitionOutcome};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn BookStore>,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn BookStore>) -> Self {
        Self { store }
    }

    /// Claim a pending book. Rejected means another worker got there first,
    /// or the book is no longer pending.
    pub async fn start_processing(&self, book_id: Uuid) -> Result<TransitionOutcome> {
        self.apply(book_id, BookTransition::StartProcessing).await
    }

    pub async fn mark_completed(&self, book_id: Uuid) -> Result<TransitionOutcome> {
        self.apply(book_id, BookTransition::Complete).await
    }

    /// Record a failure. Never overwrites a completed book.
    pub async fn mark_failed(&self, book_id: Uuid) -> Result<TransitionOutcome> {
        self.apply(book_id, BookTransition::Fail).await
    }

    async fn apply(&self, book_id: Uuid, transition: BookTransition) -> Result<TransitionOutcome> {
        let sources = transition.allowed_sources();
        let to = transition.target();

        // Single-source transitions know where they came from; others peek first
        let before = match sources {
            [only] => Some(*only),
            _ => self.current_status(book_id).await,
        };

        let changed = self.store.transition_status(book_id, sources, to).await?;
        metrics::record_status_transition(&transition.to_string(), changed);

        if changed {
            let from = before
                .filter(|status| sources.contains(status))
                .unwrap_or(sources[0]);
            debug!(book_id = %book_id, %transition, from = %from, to = %to, "Status updated");
            return Ok(TransitionOutcome::Accepted { from, to });
        }

        let from = self.current_status(book_id).await.unwrap_or(to);
        warn!(
            book_id = %book_id,
            %transition,
            current = %from,
            "Status transition rejected"
        );
        Ok(TransitionOutcome::Rejected {
            from,
            attempted: transition,
        })
    }

    /// Best-effort read of the current status, for reporting only
    async fn current_status(&self, book_id: Uuid) -> Option<BookStatus> {
        match self.store.get_book(book_id).await {
            Ok(Some(book)) => book.book_status().ok(),
            _ => None,
        }
    }
}
