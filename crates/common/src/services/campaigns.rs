//! Campaign management

use super::owned_campaign;
use crate::db::models::Campaign;
use crate::db::CatalogStore;
use crate::errors::Result;
use crate::storage::BlobStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Fields a user can set on a campaign
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CampaignInput {
    #[validate(length(min = 1, max = 100))]
    pub name: String,

    #[validate(length(max = 1000))]
    pub description: Option<String>,

    #[validate(length(min = 1, max = 100))]
    pub system: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignDto {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub system: String,
    pub created_at: DateTime<Utc>,
}

impl From<Campaign> for CampaignDto {
    fn from(c: Campaign) -> Self {
        Self {
            id: c.id,
            name: c.name,
            description: c.description,
            system: c.system,
            created_at: c.created_at.with_timezone(&Utc),
        }
    }
}

pub struct CampaignService {
    store: Arc<dyn CatalogStore>,
    blobs: Arc<dyn BlobStore>,
}

impl CampaignService {
    pub fn new(store: Arc<dyn CatalogStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { store, blobs }
    }

    #[instrument(skip(self, input))]
    pub async fn create(&self, owner_id: &str, input: CampaignInput) -> Result<CampaignDto> {
        input.validate()?;

        let campaign = Campaign {
            id: Uuid::new_v4(),
            name: input.name,
            description: input.description,
            system: input.system,
            created_at: Utc::now().fixed_offset(),
            user_id: owner_id.to_string(),
        };

        let campaign = self.store.insert_campaign(campaign).await?;
        info!(campaign_id = %campaign.id, "Campaign created");
        Ok(campaign.into())
    }

    pub async fn get(&self, owner_id: &str, campaign_id: Uuid) -> Result<CampaignDto> {
        owned_campaign(self.store.as_ref(), owner_id, campaign_id)
            .await
            .map(Into::into)
    }

    /// Campaigns of `owner_id`, newest first
    pub async fn list(&self, owner_id: &str) -> Result<Vec<CampaignDto>> {
        Ok(self
            .store
            .list_campaigns(owner_id)
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        owner_id: &str,
        campaign_id: Uuid,
        input: CampaignInput,
    ) -> Result<CampaignDto> {
        input.validate()?;

        let mut campaign = owned_campaign(self.store.as_ref(), owner_id, campaign_id).await?;
        campaign.name = input.name;
        campaign.description = input.description;
        campaign.system = input.system;

        self.store.save_campaign(campaign).await.map(Into::into)
    }

    /// Delete the campaign's stored files, then the campaign (books cascade)
    #[instrument(skip(self))]
    pub async fn delete(&self, owner_id: &str, campaign_id: Uuid) -> Result<()> {
        owned_campaign(self.store.as_ref(), owner_id, campaign_id).await?;

        for book in self.store.list_books(campaign_id).await? {
            if let Err(e) = self.blobs.delete(&book.storage_locator).await {
                warn!(book_id = %book.id, error = %e, "Failed to delete book file");
                return Err(e);
            }
        }

        self.store.delete_campaign(campaign_id).await?;
        info!(campaign_id = %campaign_id, "Campaign deleted");
        Ok(())
    }
}
