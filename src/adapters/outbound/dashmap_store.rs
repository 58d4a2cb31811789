//! DashMap Store
//!
//! In-memory implementation of every storage port, using DashMap for
//! lock-free concurrent access. Ids come from per-table atomic sequences.

use crate::domain::entities::{GeoPoint, Merchant, MerchantTag, MerchantTagRelation};
use crate::domain::ports::{
    FavoriteStore, GeoPointFilter, GeoPointRepository, MerchantFilter, MerchantRepository,
    MerchantTagRepository, TagFilter,
};
use crate::domain::services::CoarseWindow;
use crate::domain::value_objects::Paging;
use anyhow::Result;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};

/// DashMap-backed store for merchants, tags, geo points and favorites.
///
/// Nothing is persisted; used for tests and `MERCHANT_GEO_STORAGE=memory`.
pub struct DashMapStore {
    merchants: DashMap<i64, Merchant>,
    tags: DashMap<i64, MerchantTag>,
    relations: RwLock<Vec<MerchantTagRelation>>,
    geo_points: DashMap<i64, GeoPoint>,
    favorites: DashSet<(i64, i64)>,
    merchant_seq: AtomicI64,
    tag_seq: AtomicI64,
    point_seq: AtomicI64,
}

impl DashMapStore {
    pub fn new() -> Self {
        Self {
            merchants: DashMap::new(),
            tags: DashMap::new(),
            relations: RwLock::new(Vec::new()),
            geo_points: DashMap::new(),
            favorites: DashSet::new(),
            merchant_seq: AtomicI64::new(0),
            tag_seq: AtomicI64::new(0),
            point_seq: AtomicI64::new(0),
        }
    }

    fn next_id(seq: &AtomicI64) -> i64 {
        seq.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for DashMapStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Case-insensitive substring match over any of `fields`. Empty search
/// matches everything.
fn matches_search(search: &str, fields: &[&str]) -> bool {
    let needle = search.trim().to_lowercase();
    needle.is_empty() || fields.iter().any(|f| f.to_lowercase().contains(&needle))
}

/// Sort by id, count, then cut the page.
fn page_by_id<T>(mut items: Vec<T>, id: impl Fn(&T) -> i64, paging: Paging) -> (Vec<T>, u64) {
    items.sort_by_key(|item| id(item));
    let total = items.len() as u64;
    (paging.apply(items), total)
}

#[async_trait]
impl MerchantRepository for DashMapStore {
    async fn insert_merchant(&self, mut merchant: Merchant) -> Result<Merchant> {
        merchant.id = Self::next_id(&self.merchant_seq);
        let row = merchant.row();
        self.merchants.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_merchant(&self, id: i64) -> Result<Option<Merchant>> {
        Ok(self.merchants.get(&id).map(|e| e.value().clone()))
    }

    async fn update_merchant(&self, merchant: &Merchant) -> Result<bool> {
        match self.merchants.get_mut(&merchant.id) {
            Some(mut entry) => {
                *entry = merchant.row();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_merchant(&self, id: i64) -> Result<bool> {
        Ok(self.merchants.remove(&id).is_some())
    }

    async fn find_merchants(&self, filter: &MerchantFilter) -> Result<(Vec<Merchant>, u64)> {
        let items: Vec<Merchant> = self
            .merchants
            .iter()
            .filter(|e| e.owner_id == filter.owner_id)
            .filter(|e| {
                matches_search(
                    &filter.search,
                    &[e.title.as_str(), e.address.as_str(), e.city.as_str(), e.area.as_str()],
                )
            })
            .map(|e| e.value().clone())
            .collect();
        Ok(page_by_id(items, |m| m.id, filter.paging))
    }
}

#[async_trait]
impl MerchantTagRepository for DashMapStore {
    async fn insert_tag(&self, mut tag: MerchantTag) -> Result<MerchantTag> {
        tag.id = Self::next_id(&self.tag_seq);
        self.tags.insert(tag.id, tag.clone());
        Ok(tag)
    }

    async fn get_tag(&self, id: i64) -> Result<Option<MerchantTag>> {
        Ok(self.tags.get(&id).map(|e| e.value().clone()))
    }

    async fn update_tag(&self, tag: &MerchantTag) -> Result<bool> {
        match self.tags.get_mut(&tag.id) {
            Some(mut entry) => {
                *entry = tag.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_tag(&self, id: i64) -> Result<bool> {
        Ok(self.tags.remove(&id).is_some())
    }

    async fn find_tags(&self, filter: &TagFilter) -> Result<(Vec<MerchantTag>, u64)> {
        let items: Vec<MerchantTag> = self
            .tags
            .iter()
            .filter(|e| e.owner_id == filter.owner_id)
            .filter(|e| filter.class.as_ref().map_or(true, |c| &e.class == c))
            .filter(|e| {
                matches_search(
                    &filter.search,
                    &[e.tag_name.as_str(), e.alias.as_str(), e.class.as_str(), e.remarks.as_str()],
                )
            })
            .map(|e| e.value().clone())
            .collect();
        Ok(page_by_id(items, |t| t.id, filter.paging))
    }

    async fn find_tags_by_names(&self, owner_id: i64, names: &[String]) -> Result<Vec<MerchantTag>> {
        let wanted: HashSet<String> = names.iter().map(|n| n.trim().to_lowercase()).collect();
        let mut tags: Vec<MerchantTag> = self
            .tags
            .iter()
            .filter(|e| e.owner_id == owner_id && wanted.contains(&e.tag_name.to_lowercase()))
            .map(|e| e.value().clone())
            .collect();
        tags.sort_by_key(|t| t.id);
        Ok(tags)
    }

    async fn add_relation(&self, relation: MerchantTagRelation) -> Result<()> {
        self.relations.write().push(relation);
        Ok(())
    }

    async fn relations_for_merchants(&self, merchant_ids: &[i64]) -> Result<Vec<MerchantTagRelation>> {
        let ids: HashSet<i64> = merchant_ids.iter().copied().collect();
        Ok(self
            .relations
            .read()
            .iter()
            .filter(|r| ids.contains(&r.merchant_id))
            .cloned()
            .collect())
    }

    async fn delete_relations_for_merchant(&self, merchant_id: i64) -> Result<usize> {
        let mut relations = self.relations.write();
        let before = relations.len();
        relations.retain(|r| r.merchant_id != merchant_id);
        Ok(before - relations.len())
    }

    async fn delete_relations_for_tag(&self, tag_id: i64) -> Result<usize> {
        let mut relations = self.relations.write();
        let before = relations.len();
        relations.retain(|r| r.merchant_tag_id != tag_id);
        Ok(before - relations.len())
    }
}

#[async_trait]
impl GeoPointRepository for DashMapStore {
    async fn insert_point(&self, mut point: GeoPoint) -> Result<GeoPoint> {
        point.id = Self::next_id(&self.point_seq);
        self.geo_points.insert(point.id, point.clone());
        Ok(point)
    }

    async fn get_point(&self, id: i64) -> Result<Option<GeoPoint>> {
        Ok(self.geo_points.get(&id).map(|e| e.value().clone()))
    }

    async fn update_point(&self, point: &GeoPoint) -> Result<bool> {
        match self.geo_points.get_mut(&point.id) {
            Some(mut entry) => {
                *entry = point.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_point(&self, id: i64) -> Result<bool> {
        Ok(self.geo_points.remove(&id).is_some())
    }

    async fn find_by_address_and_source(&self, address: &str, source: &str) -> Result<Option<GeoPoint>> {
        Ok(self
            .geo_points
            .iter()
            .filter(|e| e.address == address && e.source == source)
            .map(|e| e.value().clone())
            .min_by_key(|p| p.id))
    }

    async fn find_points(&self, filter: &GeoPointFilter) -> Result<(Vec<GeoPoint>, u64)> {
        let items: Vec<GeoPoint> = self
            .geo_points
            .iter()
            .filter(|e| e.merchant_id == Some(filter.merchant_id))
            .filter(|e| matches_search(&filter.search, &[e.address.as_str()]))
            .map(|e| e.value().clone())
            .collect();
        Ok(page_by_id(items, |p| p.id, filter.paging))
    }

    async fn find_in_window(&self, window: &CoarseWindow, limit: usize) -> Result<Vec<GeoPoint>> {
        let mut points: Vec<GeoPoint> = self
            .geo_points
            .iter()
            .filter(|e| window.contains(e.longitude, e.latitude))
            .map(|e| e.value().clone())
            .collect();
        points.sort_by_key(|p| p.id);
        if limit > 0 {
            points.truncate(limit);
        }
        Ok(points)
    }

    async fn set_point_merchant(&self, id: i64, merchant_id: Option<i64>) -> Result<bool> {
        match self.geo_points.get_mut(&id) {
            Some(mut entry) => {
                entry.merchant_id = merchant_id;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_points_for_merchant(&self, merchant_id: i64) -> Result<usize> {
        let before = self.geo_points.len();
        self.geo_points.retain(|_, p| p.merchant_id != Some(merchant_id));
        Ok(before - self.geo_points.len())
    }
}

#[async_trait]
impl FavoriteStore for DashMapStore {
    async fn is_favorite(&self, user_id: i64, merchant_id: i64) -> Result<bool> {
        Ok(self.favorites.contains(&(user_id, merchant_id)))
    }

    async fn add_favorite(&self, user_id: i64, merchant_id: i64) -> Result<()> {
        self.favorites.insert((user_id, merchant_id));
        Ok(())
    }

    async fn remove_favorite(&self, user_id: i64, merchant_id: i64) -> Result<()> {
        self.favorites.remove(&(user_id, merchant_id));
        Ok(())
    }

    async fn favorites_among(&self, user_id: i64, merchant_ids: &[i64]) -> Result<HashSet<i64>> {
        Ok(merchant_ids
            .iter()
            .copied()
            .filter(|id| self.favorites.contains(&(user_id, *id)))
            .collect())
    }

    async fn remove_favorites_for_merchant(&self, merchant_id: i64) -> Result<usize> {
        let before = self.favorites.len();
        self.favorites.retain(|(_, m)| *m != merchant_id);
        Ok(before - self.favorites.len())
    }
}
