//! Merchant Service - Merchant CRUD use case
//!
//! Owner-only access control, tag and geo point links, favorites and
//! on-demand geocoding of a single merchant.

use crate::application::geocode_service::{GeocodeJob, GeocodeService};
use crate::application::Repositories;
use crate::domain::entities::{
    GeoPoint, Merchant, MerchantDraft, MerchantTag, MerchantTagRelation, MerchantUpdate,
    Principal,
};
use crate::domain::errors::{DomainError, GeocodeError};
use crate::domain::events::{DomainEvent, EventKind};
use crate::domain::ports::{EventPublisher, GeoPointFilter, MerchantFilter, MerchantRepository};
use crate::domain::value_objects::{Page, Paging, Permission};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Source tag of points resolved through [`MerchantService::geocode_merchant`].
pub const MERCHANT_GEOCODE_SOURCE: &str = "merchant";

const GEOCODE_DESCRIPTION_MAX: usize = 100;

/// Load a merchant the principal owns.
///
/// Missing merchants are reported as not found, foreign ones as access
/// denied.
pub(crate) async fn owned_merchant(
    merchants: &dyn MerchantRepository,
    principal: &Principal,
    id: i64,
) -> Result<Merchant, DomainError> {
    let merchant = merchants
        .get_merchant(id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("merchant with id {} not found", id)))?;

    if !merchant.is_owned_by(principal) {
        return Err(DomainError::access_denied("merchant"));
    }
    Ok(merchant)
}

pub struct MerchantService {
    repos: Repositories,
    events: Arc<dyn EventPublisher>,
    geocoder: Option<Arc<GeocodeService>>,
}

impl MerchantService {
    pub fn new(repos: Repositories, events: Arc<dyn EventPublisher>) -> Self {
        Self {
            repos,
            events,
            geocoder: None,
        }
    }

    pub fn with_geocoder(mut self, geocoder: Arc<GeocodeService>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    // ===== Permissions =====

    pub fn can_create(&self, _principal: &Principal) -> bool {
        true
    }

    pub fn can_read(&self, principal: &Principal, merchant: &Merchant) -> (bool, Permission) {
        if merchant.is_owned_by(principal) {
            (true, Permission::Admin)
        } else {
            (false, Permission::Read)
        }
    }

    pub fn can_update(&self, principal: &Principal, merchant: &Merchant) -> bool {
        merchant.is_owned_by(principal)
    }

    pub fn can_delete(&self, principal: &Principal, merchant: &Merchant) -> bool {
        merchant.is_owned_by(principal)
    }

    // ===== CRUD =====

    pub async fn create(
        &self,
        principal: &Principal,
        draft: MerchantDraft,
    ) -> Result<Merchant, DomainError> {
        draft.fields.validate()?;
        if !self.can_create(principal) {
            return Err(DomainError::access_denied("merchant"));
        }
        self.require_linkable_points(principal, &draft.geo_point_ids, None).await?;

        let merchant = self
            .repos
            .merchants
            .insert_merchant(Merchant::from_fields(draft.fields, principal.id))
            .await?;

        if draft.is_favorite {
            self.repos
                .favorites
                .add_favorite(principal.id, merchant.id)
                .await?;
        }
        self.link_tags(merchant.id, &draft.tag_ids).await?;
        for point_id in &draft.geo_point_ids {
            self.repos
                .geo_points
                .set_point_merchant(*point_id, Some(merchant.id))
                .await?;
        }

        let merchant = self.with_details(principal, merchant).await?;
        tracing::debug!("created merchant {} for user {}", merchant.id, principal.id);
        self.events
            .publish(DomainEvent::merchant(EventKind::MerchantCreated, &merchant, principal));
        Ok(merchant)
    }

    pub async fn read_one(&self, principal: &Principal, id: i64) -> Result<Merchant, DomainError> {
        let merchant = owned_merchant(self.repos.merchants.as_ref(), principal, id).await?;
        self.with_details(principal, merchant).await
    }

    /// The principal's merchants, newest id last.
    pub async fn read_all(
        &self,
        principal: &Principal,
        search: &str,
        paging: Paging,
    ) -> Result<Page<Merchant>, DomainError> {
        let filter = MerchantFilter {
            owner_id: principal.id,
            search: search.to_string(),
            paging,
        };
        let (merchants, total) = self.repos.merchants.find_merchants(&filter).await?;
        if merchants.is_empty() {
            return Ok(Page::new(merchants, total));
        }

        let ids: Vec<i64> = merchants.iter().map(|m| m.id).collect();
        let favorites = self.repos.favorites.favorites_among(principal.id, &ids).await?;
        let mut tags = self.tags_by_merchant(&ids).await?;

        let mut items = Vec::with_capacity(merchants.len());
        for mut merchant in merchants {
            merchant.tags = tags.remove(&merchant.id).unwrap_or_default();
            merchant.geo_points = self.points_of(merchant.id).await?;
            merchant.is_favorite = favorites.contains(&merchant.id);
            merchant.max_permission = self.can_read(principal, &merchant).1;
            items.push(merchant);
        }

        Ok(Page::new(items, total))
    }

    pub async fn update(
        &self,
        principal: &Principal,
        id: i64,
        update: MerchantUpdate,
    ) -> Result<Merchant, DomainError> {
        let mut merchant = owned_merchant(self.repos.merchants.as_ref(), principal, id).await?;
        update.fields.validate()?;
        if let Some(point_ids) = &update.geo_point_ids {
            self.require_linkable_points(principal, point_ids, Some(id)).await?;
        }

        merchant.apply(update.fields);
        self.repos.merchants.update_merchant(&merchant.row()).await?;

        if let Some(tag_ids) = &update.tag_ids {
            self.repos.tags.delete_relations_for_merchant(id).await?;
            self.link_tags(id, tag_ids).await?;
        }

        if let Some(point_ids) = &update.geo_point_ids {
            let keep: HashSet<i64> = point_ids.iter().copied().collect();
            for point in self.points_of(id).await? {
                if !keep.contains(&point.id) {
                    self.repos.geo_points.set_point_merchant(point.id, None).await?;
                }
            }
            for point_id in &keep {
                self.repos
                    .geo_points
                    .set_point_merchant(*point_id, Some(id))
                    .await?;
            }
        }

        match update.is_favorite {
            Some(true) => self.repos.favorites.add_favorite(principal.id, id).await?,
            Some(false) => self.repos.favorites.remove_favorite(principal.id, id).await?,
            None => {}
        }

        let merchant = self.with_details(principal, merchant).await?;
        self.events
            .publish(DomainEvent::merchant(EventKind::MerchantUpdated, &merchant, principal));
        Ok(merchant)
    }

    /// Delete a merchant with its tag relations, geo points and favorites.
    pub async fn delete(&self, principal: &Principal, id: i64) -> Result<(), DomainError> {
        let merchant = owned_merchant(self.repos.merchants.as_ref(), principal, id).await?;

        let relations = self.repos.tags.delete_relations_for_merchant(id).await?;
        let points = self.repos.geo_points.delete_points_for_merchant(id).await?;
        self.repos.favorites.remove_favorites_for_merchant(id).await?;
        self.repos.merchants.delete_merchant(id).await?;

        tracing::debug!(
            "deleted merchant {} ({} tag relations, {} geo points)",
            id,
            relations,
            points
        );
        self.events
            .publish(DomainEvent::merchant(EventKind::MerchantDeleted, &merchant, principal));
        Ok(())
    }

    /// Resolve the merchant's address and mirror the result onto it.
    ///
    /// Every call counts as an attempt. A failure is recorded in the
    /// merchant's geocode description before the error is returned.
    pub async fn geocode_merchant(
        &self,
        principal: &Principal,
        id: i64,
    ) -> Result<Merchant, DomainError> {
        let geocoder = self.geocoder.as_ref().ok_or(GeocodeError::NoProviders)?;
        let mut merchant = owned_merchant(self.repos.merchants.as_ref(), principal, id).await?;
        if merchant.address.trim().is_empty() {
            return Err(DomainError::validation(
                "merchant address is required for geocoding",
            ));
        }

        merchant.geocode_attempts += 1;

        let mut metadata = Map::new();
        metadata.insert("merchant_id".to_string(), Value::from(id));

        let job = GeocodeJob {
            merchant_id: Some(id),
            address: merchant.address.clone(),
            source: MERCHANT_GEOCODE_SOURCE.to_string(),
            metadata: Some(metadata),
        };
        let resolved = geocoder.geocode_and_link(job).await.and_then(|point| {
            let meta = point.typed_metadata()?;
            Ok((point, meta))
        });

        match resolved {
            Ok((point, meta)) => {
                merchant.lng = Some(point.longitude);
                merchant.lat = Some(point.latitude);
                merchant.geocode_score = point.accuracy;
                merchant.geocode_level = truncate(&meta.place_type.unwrap_or_default(), 50);
                merchant.geocode_description = truncate(
                    &format!("resolved by {}", meta.provider.as_deref().unwrap_or("cache")),
                    GEOCODE_DESCRIPTION_MAX,
                );
                self.repos.merchants.update_merchant(&merchant.row()).await?;

                let merchant = self.with_details(principal, merchant).await?;
                self.events
                    .publish(DomainEvent::merchant(EventKind::MerchantUpdated, &merchant, principal));
                Ok(merchant)
            }
            Err(e) => {
                tracing::warn!("geocoding merchant {} failed: {}", id, e);
                merchant.geocode_description = truncate(&e.to_string(), GEOCODE_DESCRIPTION_MAX);
                self.repos.merchants.update_merchant(&merchant.row()).await?;
                Err(e)
            }
        }
    }

    // ===== Helpers =====

    /// Points the principal may attach to `target`: unlinked ones, ones
    /// already on `target`, and ones on another merchant the principal owns.
    async fn require_linkable_points(
        &self,
        principal: &Principal,
        point_ids: &[i64],
        target: Option<i64>,
    ) -> Result<(), DomainError> {
        for point_id in point_ids {
            let point = self.repos.geo_points.get_point(*point_id).await?.ok_or_else(|| {
                DomainError::not_found(format!("geo point with id {} not found", point_id))
            })?;

            let Some(current) = point.merchant_id else {
                continue;
            };
            if Some(current) == target {
                continue;
            }
            if let Some(holder) = self.repos.merchants.get_merchant(current).await? {
                if !holder.is_owned_by(principal) {
                    return Err(DomainError::access_denied("geo point"));
                }
            }
        }
        Ok(())
    }

    /// One relation row per positive id, duplicates included.
    async fn link_tags(&self, merchant_id: i64, tag_ids: &[i64]) -> Result<(), DomainError> {
        for tag_id in tag_ids.iter().filter(|id| **id > 0) {
            self.repos
                .tags
                .add_relation(MerchantTagRelation::new(merchant_id, *tag_id))
                .await?;
        }
        Ok(())
    }

    async fn points_of(&self, merchant_id: i64) -> Result<Vec<GeoPoint>, DomainError> {
        let filter = GeoPointFilter {
            merchant_id,
            ..Default::default()
        };
        Ok(self.repos.geo_points.find_points(&filter).await?.0)
    }

    async fn tags_by_merchant(
        &self,
        merchant_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<MerchantTag>>, DomainError> {
        let relations = self.repos.tags.relations_for_merchants(merchant_ids).await?;
        let mut out: HashMap<i64, Vec<_>> = HashMap::new();
        for relation in relations {
            if let Some(tag) = self.repos.tags.get_tag(relation.merchant_tag_id).await? {
                out.entry(relation.merchant_id).or_default().push(tag);
            }
        }
        Ok(out)
    }

    async fn with_details(
        &self,
        principal: &Principal,
        mut merchant: Merchant,
    ) -> Result<Merchant, DomainError> {
        merchant.tags = self
            .tags_by_merchant(&[merchant.id])
            .await?
            .remove(&merchant.id)
            .unwrap_or_default();
        merchant.geo_points = self.points_of(merchant.id).await?;
        merchant.is_favorite = self
            .repos
            .favorites
            .is_favorite(principal.id, merchant.id)
            .await?;
        merchant.max_permission = self.can_read(principal, &merchant).1;
        Ok(merchant)
    }
}

fn truncate(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}
