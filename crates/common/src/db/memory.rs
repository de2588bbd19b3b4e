//! In-memory store for testing and local runs
//!
//! Mirrors the compare-and-set semantics of [`Repository`](super::Repository)
//! under a single mutex so concurrent transitions on one book serialize.

use crate::db::models::{Book, Campaign};
use crate::db::{BookStore, CatalogStore};
use crate::errors::{AppError, Result};
use crate::status::BookStatus;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Default)]
struct State {
    campaigns: HashMap<Uuid, Campaign>,
    books: HashMap<Uuid, Book>,
    history: HashMap<Uuid, Vec<BookStatus>>,
}

/// Mutex-backed implementation of [`BookStore`] and [`CatalogStore`]
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a campaign without going through the services
    pub fn put_campaign(&self, campaign: Campaign) {
        self.lock().campaigns.insert(campaign.id, campaign);
    }

    /// Seed a book without going through the services
    pub fn put_book(&self, book: Book) {
        let mut state = self.lock();
        if let Ok(status) = book.book_status() {
            state.history.insert(book.id, vec![status]);
        }
        state.books.insert(book.id, book);
    }

    /// Current status of a book, if it exists and its status parses
    pub fn status_of(&self, id: Uuid) -> Option<BookStatus> {
        self.lock()
            .books
            .get(&id)
            .and_then(|b| b.book_status().ok())
    }

    /// Every status the book has held, in order, starting from the seeded one
    pub fn status_history(&self, id: Uuid) -> Vec<BookStatus> {
        self.lock().history.get(&id).cloned().unwrap_or_default()
    }

    pub fn book_count(&self) -> usize {
        self.lock().books.len()
    }
}

#[async_trait]
impl BookStore for InMemoryStore {
    async fn get_book(&self, id: Uuid) -> Result<Option<Book>> {
        Ok(self.lock().books.get(&id).cloned())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: &[BookStatus],
        to: BookStatus,
    ) -> Result<bool> {
        let mut state = self.lock();

        let Some(book) = state.books.get_mut(&id) else {
            return Ok(false);
        };

        let matches = book
            .book_status()
            .map(|current| from.contains(&current))
            .unwrap_or(false);
        if !matches {
            return Ok(false);
        }

        book.status = to.as_str().to_string();
        book.status_changed_at = Utc::now().fixed_offset();
        state.history.entry(id).or_default().push(to);
        Ok(true)
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn find_campaign(&self, id: Uuid) -> Result<Option<Campaign>> {
        Ok(self.lock().campaigns.get(&id).cloned())
    }

    async fn list_campaigns(&self, user_id: &str) -> Result<Vec<Campaign>> {
        let mut campaigns: Vec<Campaign> = self
            .lock()
            .campaigns
            .values()
            .filter(|c| c.is_owned_by(user_id))
            .cloned()
            .collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(campaigns)
    }

    async fn insert_campaign(&self, campaign: Campaign) -> Result<Campaign> {
        self.lock().campaigns.insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn save_campaign(&self, campaign: Campaign) -> Result<Campaign> {
        let mut state = self.lock();
        let existing = state
            .campaigns
            .get_mut(&campaign.id)
            .ok_or_else(|| AppError::CampaignNotFound {
                id: campaign.id.to_string(),
            })?;

        existing.name = campaign.name;
        existing.description = campaign.description;
        existing.system = campaign.system;
        Ok(existing.clone())
    }

    async fn delete_campaign(&self, id: Uuid) -> Result<bool> {
        let mut state = self.lock();
        if state.campaigns.remove(&id).is_none() {
            return Ok(false);
        }
        state.books.retain(|_, b| b.campaign_id != id);
        Ok(true)
    }

    async fn insert_book(&self, book: Book) -> Result<Book> {
        let mut state = self.lock();
        if !state.campaigns.contains_key(&book.campaign_id) {
            return Err(AppError::CampaignNotFound {
                id: book.campaign_id.to_string(),
            });
        }
        if let Ok(status) = book.book_status() {
            state.history.insert(book.id, vec![status]);
        }
        state.books.insert(book.id, book.clone());
        Ok(book)
    }

    async fn list_books(&self, campaign_id: Uuid) -> Result<Vec<Book>> {
        let mut books: Vec<Book> = self
            .lock()
            .books
            .values()
            .filter(|b| b.campaign_id == campaign_id)
            .cloned()
            .collect();
        books.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        Ok(books)
    }

    async fn delete_book(&self, id: Uuid) -> Result<bool> {
        Ok(self.lock().books.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn campaign() -> Campaign {
        Campaign {
            id: Uuid::new_v4(),
            name: "Curse of Strahd".to_string(),
            description: None,
            system: "D&D 5e".to_string(),
            created_at: Utc::now().fixed_offset(),
            user_id: "user-1".to_string(),
        }
    }

    fn book(campaign_id: Uuid, status: BookStatus) -> Book {
        Book {
            id: Uuid::new_v4(),
            file_name: "manual.pdf".to_string(),
            storage_locator: "s3://scribe-books/books/manual.pdf".to_string(),
            status: status.as_str().to_string(),
            uploaded_at: Utc::now().fixed_offset(),
            status_changed_at: Utc::now().fixed_offset(),
            campaign_id,
        }
    }

    #[tokio::test]
    async fn test_transition_only_from_allowed_sources() {
        let store = InMemoryStore::new();
        let c = campaign();
        let b = book(c.id, BookStatus::Pending);
        store.put_campaign(c);
        store.put_book(b.clone());

        let moved = store
            .transition_status(b.id, &[BookStatus::Pending], BookStatus::Processing)
            .await
            .unwrap();
        assert!(moved);

        let again = store
            .transition_status(b.id, &[BookStatus::Pending], BookStatus::Processing)
            .await
            .unwrap();
        assert!(!again);

        assert_eq!(
            store.status_history(b.id),
            vec![BookStatus::Pending, BookStatus::Processing]
        );
    }

    #[tokio::test]
    async fn test_transition_stamps_status_change() {
        let store = InMemoryStore::new();
        let c = campaign();
        let mut b = book(c.id, BookStatus::Pending);
        let queued_since = (Utc::now() - Duration::hours(6)).fixed_offset();
        b.uploaded_at = queued_since;
        b.status_changed_at = queued_since;
        store.put_campaign(c);
        store.put_book(b.clone());

        store
            .transition_status(b.id, &[BookStatus::Pending], BookStatus::Processing)
            .await
            .unwrap();

        let claimed = store.get_book(b.id).await.unwrap().unwrap();
        assert_eq!(claimed.uploaded_at, queued_since);
        assert!(claimed.status_changed_at > queued_since);

        let rejected = store
            .transition_status(b.id, &[BookStatus::Pending], BookStatus::Processing)
            .await
            .unwrap();
        assert!(!rejected);
        let unchanged = store.get_book(b.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status_changed_at, claimed.status_changed_at);
    }

    #[tokio::test]
    async fn test_transition_missing_book() {
        let store = InMemoryStore::new();
        let moved = store
            .transition_status(Uuid::new_v4(), &[BookStatus::Pending], BookStatus::Processing)
            .await
            .unwrap();
        assert!(!moved);
    }

    #[tokio::test]
    async fn test_delete_campaign_cascades_books() {
        let store = InMemoryStore::new();
        let c = campaign();
        store.put_campaign(c.clone());
        store.insert_book(book(c.id, BookStatus::Pending)).await.unwrap();
        store.insert_book(book(c.id, BookStatus::Completed)).await.unwrap();
        assert_eq!(store.book_count(), 2);

        assert!(store.delete_campaign(c.id).await.unwrap());
        assert_eq!(store.book_count(), 0);
        assert!(!store.delete_campaign(c.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_book_requires_campaign() {
        let store = InMemoryStore::new();
        let result = store.insert_book(book(Uuid::new_v4(), BookStatus::Pending)).await;
        assert!(matches!(result, Err(AppError::CampaignNotFound { .. })));
    }
}
