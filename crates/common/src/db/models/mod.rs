//! SeaORM entity models
//!
//! Database entities for Scribe

mod book;
mod campaign;

pub use book::{
    Entity as BookEntity,
    Model as Book,
    ActiveModel as BookActiveModel,
    Column as BookColumn,
};

pub use campaign::{
    Entity as CampaignEntity,
    Model as Campaign,
    ActiveModel as CampaignActiveModel,
    Column as CampaignColumn,
};
