//! Favorite Store Port
//!
//! Minimal view of the favorites subsystem: a set of (user, merchant) pairs.

use async_trait::async_trait;
use std::collections::HashSet;

#[async_trait]
pub trait FavoriteStore: Send + Sync {
    async fn is_favorite(&self, user_id: i64, merchant_id: i64) -> anyhow::Result<bool>;

    async fn add_favorite(&self, user_id: i64, merchant_id: i64) -> anyhow::Result<()>;

    async fn remove_favorite(&self, user_id: i64, merchant_id: i64) -> anyhow::Result<()>;

    /// Which of `merchant_ids` the user marked as favorite.
    async fn favorites_among(
        &self,
        user_id: i64,
        merchant_ids: &[i64],
    ) -> anyhow::Result<HashSet<i64>>;

    /// Drop every user's favorite entry for the merchant.
    async fn remove_favorites_for_merchant(&self, merchant_id: i64) -> anyhow::Result<usize>;
}
