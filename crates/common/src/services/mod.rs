//! Application services behind the (out of tree) API surface
//!
//! Each service takes the caller's user id explicitly and enforces campaign
//! ownership before touching campaign data.

pub mod campaigns;
pub mod library;
pub mod retrieval;

pub use campaigns::{CampaignDto, CampaignInput, CampaignService};
pub use library::{BookDto, LibraryService, UploadBook};
pub use retrieval::CampaignRetriever;

use crate::db::models::Campaign;
use crate::db::CatalogStore;
use crate::errors::{AppError, Result};
use uuid::Uuid;

/// Load a campaign and check that `owner_id` owns it
pub(crate) async fn owned_campaign(
    store: &dyn CatalogStore,
    owner_id: &str,
    campaign_id: Uuid,
) -> Result<Campaign> {
    let campaign = store
        .find_campaign(campaign_id)
        .await?
        .ok_or_else(|| AppError::CampaignNotFound {
            id: campaign_id.to_string(),
        })?;

    if !campaign.is_owned_by(owner_id) {
        return Err(AppError::Forbidden {
            message: format!("campaign {} belongs to another user", campaign_id),
        });
    }

    Ok(campaign)
}
