//! Geo Point Service
//!
//! CRUD over geo points, with access derived from the linked merchant.
//! Points without a merchant are not reachable through this service.

use crate::application::merchant_service::owned_merchant;
use crate::domain::entities::{GeoPoint, GeoPointDraft, Principal};
use crate::domain::errors::DomainError;
use crate::domain::events::{DomainEvent, EventKind};
use crate::domain::ports::{EventPublisher, GeoPointFilter, GeoPointRepository, MerchantRepository};
use crate::domain::value_objects::{Page, Paging};
use chrono::Utc;
use std::sync::Arc;

pub struct GeoPointService {
    merchants: Arc<dyn MerchantRepository>,
    geo_points: Arc<dyn GeoPointRepository>,
    events: Arc<dyn EventPublisher>,
}

impl GeoPointService {
    pub fn new(
        merchants: Arc<dyn MerchantRepository>,
        geo_points: Arc<dyn GeoPointRepository>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            merchants,
            geo_points,
            events,
        }
    }

    pub async fn create(
        &self,
        principal: &Principal,
        draft: GeoPointDraft,
    ) -> Result<GeoPoint, DomainError> {
        draft.validate()?;
        let merchant_id = draft
            .merchant_id
            .ok_or_else(|| DomainError::access_denied("geo point"))?;
        self.require_merchant(principal, merchant_id).await?;

        let point = self.geo_points.insert_point(GeoPoint::from_draft(draft)).await?;
        self.events
            .publish(DomainEvent::geo_point(EventKind::GeoPointCreated, &point, principal));
        Ok(point)
    }

    pub async fn read_one(&self, principal: &Principal, id: i64) -> Result<GeoPoint, DomainError> {
        self.accessible(principal, id).await
    }

    /// Points linked to one of the principal's merchants.
    pub async fn read_all(
        &self,
        principal: &Principal,
        merchant_id: i64,
        search: &str,
        paging: Paging,
    ) -> Result<Page<GeoPoint>, DomainError> {
        self.require_merchant(principal, merchant_id).await?;

        let filter = GeoPointFilter {
            merchant_id,
            search: search.to_string(),
            paging,
        };
        let (points, total) = self.geo_points.find_points(&filter).await?;
        Ok(Page::new(points, total))
    }

    /// Overwrite a point. A draft without `merchant_id` keeps the current link.
    pub async fn update(
        &self,
        principal: &Principal,
        id: i64,
        draft: GeoPointDraft,
    ) -> Result<GeoPoint, DomainError> {
        draft.validate()?;
        let mut point = self.accessible(principal, id).await?;

        if let Some(target) = draft.merchant_id {
            if point.merchant_id != Some(target) {
                self.require_merchant(principal, target).await?;
                point.merchant_id = Some(target);
            }
        }
        point.source = draft.source;
        point.longitude = draft.longitude;
        point.latitude = draft.latitude;
        point.address = draft.address;
        point.accuracy = draft.accuracy;
        point.metadata = draft.metadata;
        point.updated = Utc::now();
        self.geo_points.update_point(&point).await?;

        self.events
            .publish(DomainEvent::geo_point(EventKind::GeoPointUpdated, &point, principal));
        Ok(point)
    }

    pub async fn delete(&self, principal: &Principal, id: i64) -> Result<(), DomainError> {
        let point = self.accessible(principal, id).await?;
        self.geo_points.delete_point(id).await?;

        self.events
            .publish(DomainEvent::geo_point(EventKind::GeoPointDeleted, &point, principal));
        Ok(())
    }

    async fn require_merchant(&self, principal: &Principal, merchant_id: i64) -> Result<(), DomainError> {
        owned_merchant(self.merchants.as_ref(), principal, merchant_id)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                DomainError::NotFound(_) => DomainError::access_denied("merchant"),
                other => other,
            })
    }

    async fn accessible(&self, principal: &Principal, id: i64) -> Result<GeoPoint, DomainError> {
        let point = self
            .geo_points
            .get_point(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("geo point with id {} not found", id)))?;

        match point.merchant_id {
            Some(merchant_id) => {
                self.require_merchant(principal, merchant_id).await?;
                Ok(point)
            }
            None => Err(DomainError::access_denied("geo point")),
        }
    }
}
