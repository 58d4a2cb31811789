//! Merchant Tag Repository Port
//!
//! Storage of tags and of the merchant/tag relation table.

use crate::domain::entities::{MerchantTag, MerchantTagRelation};
use crate::domain::value_objects::Paging;
use async_trait::async_trait;

/// Query over the tags of one owner.
#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    pub owner_id: i64,
    /// Case-insensitive substring over name, alias, class and remarks
    pub search: String,
    /// Exact class match when set
    pub class: Option<String>,
    pub paging: Paging,
}

#[async_trait]
pub trait MerchantTagRepository: Send + Sync {
    async fn insert_tag(&self, tag: MerchantTag) -> anyhow::Result<MerchantTag>;

    async fn get_tag(&self, id: i64) -> anyhow::Result<Option<MerchantTag>>;

    async fn update_tag(&self, tag: &MerchantTag) -> anyhow::Result<bool>;

    async fn delete_tag(&self, id: i64) -> anyhow::Result<bool>;

    async fn find_tags(&self, filter: &TagFilter) -> anyhow::Result<(Vec<MerchantTag>, u64)>;

    /// Tags of `owner_id` whose name matches one of `names`, case-insensitively.
    async fn find_tags_by_names(
        &self,
        owner_id: i64,
        names: &[String],
    ) -> anyhow::Result<Vec<MerchantTag>>;

    /// Append a relation row. Duplicate pairs are not rejected.
    async fn add_relation(&self, relation: MerchantTagRelation) -> anyhow::Result<()>;

    /// Relation rows of the given merchants, in insertion order.
    async fn relations_for_merchants(
        &self,
        merchant_ids: &[i64],
    ) -> anyhow::Result<Vec<MerchantTagRelation>>;

    async fn delete_relations_for_merchant(&self, merchant_id: i64) -> anyhow::Result<usize>;

    async fn delete_relations_for_tag(&self, tag_id: i64) -> anyhow::Result<usize>;
}
