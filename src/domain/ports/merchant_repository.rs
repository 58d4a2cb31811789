//! Merchant Repository Port
//!
//! Storage of merchant rows. Associations (tags, geo points, favorites) live
//! behind their own ports.

use crate::domain::entities::Merchant;
use crate::domain::value_objects::Paging;
use async_trait::async_trait;

/// Query over the merchants of one owner.
#[derive(Debug, Clone, Default)]
pub struct MerchantFilter {
    pub owner_id: i64,
    /// Case-insensitive substring over title, address, city and area
    pub search: String,
    pub paging: Paging,
}

#[async_trait]
pub trait MerchantRepository: Send + Sync {
    /// Insert a new merchant and return it with its assigned id.
    async fn insert_merchant(&self, merchant: Merchant) -> anyhow::Result<Merchant>;

    async fn get_merchant(&self, id: i64) -> anyhow::Result<Option<Merchant>>;

    /// Overwrite the stored row. Returns false when the row does not exist.
    async fn update_merchant(&self, merchant: &Merchant) -> anyhow::Result<bool>;

    async fn delete_merchant(&self, id: i64) -> anyhow::Result<bool>;

    /// Matching merchants ordered by id, plus the total match count before paging.
    async fn find_merchants(&self, filter: &MerchantFilter) -> anyhow::Result<(Vec<Merchant>, u64)>;
}
