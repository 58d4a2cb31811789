//! Merchant Tag Service
//!
//! CRUD over a principal's own tags. Hex colours are stored in canonical
//! form; deleting a tag drops its relations but never the merchants.

use crate::domain::entities::{MerchantTag, MerchantTagDraft, Principal};
use crate::domain::errors::DomainError;
use crate::domain::events::{DomainEvent, EventKind};
use crate::domain::ports::{EventPublisher, MerchantTagRepository, TagFilter};
use crate::domain::value_objects::{normalize_hex, Page, Paging, Permission};
use chrono::Utc;
use std::sync::Arc;

pub struct MerchantTagService {
    tags: Arc<dyn MerchantTagRepository>,
    events: Arc<dyn EventPublisher>,
}

impl MerchantTagService {
    pub fn new(tags: Arc<dyn MerchantTagRepository>, events: Arc<dyn EventPublisher>) -> Self {
        Self { tags, events }
    }

    pub fn can_read(&self, principal: &Principal, tag: &MerchantTag) -> (bool, Permission) {
        if tag.is_owned_by(principal) {
            (true, Permission::Admin)
        } else {
            (false, Permission::Read)
        }
    }

    pub fn can_write(&self, principal: &Principal, tag: &MerchantTag) -> bool {
        tag.is_owned_by(principal)
    }

    pub async fn create(
        &self,
        principal: &Principal,
        draft: MerchantTagDraft,
    ) -> Result<MerchantTag, DomainError> {
        draft.validate()?;

        let now = Utc::now();
        let tag = MerchantTag {
            id: 0,
            tag_name: draft.tag_name,
            alias: draft.alias,
            class: draft.class,
            remarks: draft.remarks,
            hex_color: normalize_hex(&draft.hex_color),
            owner_id: principal.id,
            max_permission: Permission::Read,
            created: now,
            updated: now,
        };
        let mut tag = self.tags.insert_tag(tag).await?;
        tag.max_permission = Permission::Admin;

        self.events
            .publish(DomainEvent::merchant_tag(EventKind::MerchantTagCreated, &tag, principal));
        Ok(tag)
    }

    pub async fn read_one(&self, principal: &Principal, id: i64) -> Result<MerchantTag, DomainError> {
        self.owned(principal, id).await
    }

    /// The principal's tags matching `search` and, when given, `class`.
    pub async fn read_all(
        &self,
        principal: &Principal,
        search: &str,
        class: Option<String>,
        paging: Paging,
    ) -> Result<Page<MerchantTag>, DomainError> {
        let filter = TagFilter {
            owner_id: principal.id,
            search: search.to_string(),
            class: class.filter(|c| !c.is_empty()),
            paging,
        };
        let (mut tags, total) = self.tags.find_tags(&filter).await?;
        for tag in &mut tags {
            tag.max_permission = Permission::Admin;
        }
        Ok(Page::new(tags, total))
    }

    pub async fn update(
        &self,
        principal: &Principal,
        id: i64,
        draft: MerchantTagDraft,
    ) -> Result<MerchantTag, DomainError> {
        draft.validate()?;
        let mut tag = self.owned(principal, id).await?;

        tag.tag_name = draft.tag_name;
        tag.alias = draft.alias;
        tag.class = draft.class;
        tag.remarks = draft.remarks;
        tag.hex_color = normalize_hex(&draft.hex_color);
        tag.updated = Utc::now();
        self.tags.update_tag(&tag).await?;

        self.events
            .publish(DomainEvent::merchant_tag(EventKind::MerchantTagUpdated, &tag, principal));
        Ok(tag)
    }

    pub async fn delete(&self, principal: &Principal, id: i64) -> Result<(), DomainError> {
        let tag = self.owned(principal, id).await?;

        let relations = self.tags.delete_relations_for_tag(id).await?;
        self.tags.delete_tag(id).await?;
        tracing::debug!("deleted merchant tag {} ({} relations)", id, relations);

        self.events
            .publish(DomainEvent::merchant_tag(EventKind::MerchantTagDeleted, &tag, principal));
        Ok(())
    }

    async fn owned(&self, principal: &Principal, id: i64) -> Result<MerchantTag, DomainError> {
        let mut tag = self
            .tags
            .get_tag(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("merchant tag with id {} not found", id)))?;

        let (allowed, permission) = self.can_read(principal, &tag);
        if !allowed {
            return Err(DomainError::access_denied("merchant tag"));
        }
        tag.max_permission = permission;
        Ok(tag)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::adapters::outbound::DashMapStore;
    use crate::application::test_support::RecordingPublisher;
    use crate::domain::entities::MerchantTagRelation;

    fn service() -> (MerchantTagService, Arc<DashMapStore>, Arc<RecordingPublisher>) {
        let store = Arc::new(DashMapStore::new());
        let events = Arc::new(RecordingPublisher::default());
        (
            MerchantTagService::new(store.clone(), events.clone()),
            store,
            events,
        )
    }

    fn alice() -> Principal {
        Principal::new(1, "alice")
    }

    fn draft(name: &str, class: &str, hex: &str) -> MerchantTagDraft {
        MerchantTagDraft {
            tag_name: name.to_string(),
            class: class.to_string(),
            hex_color: hex.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_normalizes_hex() {
        let (svc, _, events) = service();

        let tag = svc.create(&alice(), draft("food", "", "#FF8800")).await.unwrap();

        assert_eq!(tag.hex_color, "ff8800");
        assert_eq!(tag.owner_id, 1);
        assert_eq!(tag.max_permission, Permission::Admin);
        assert_eq!(events.names(), vec!["merchant_tag.created"]);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid() {
        let (svc, _, events) = service();
        assert!(svc.create(&alice(), draft("", "", "")).await.is_err());
        assert!(svc.create(&alice(), draft("x", "", "#1234567")).await.is_err());
        assert!(events.names().is_empty());
    }

    #[tokio::test]
    async fn test_read_all_filters() {
        let (svc, _, _) = service();
        svc.create(&alice(), draft("Noodles", "food", "")).await.unwrap();
        svc.create(&alice(), draft("Beer", "drink", "")).await.unwrap();
        svc.create(&alice(), draft("Dumplings", "food", "")).await.unwrap();
        svc.create(&Principal::new(2, "bob"), draft("Noodle bar", "food", ""))
            .await
            .unwrap();

        let by_class = svc
            .read_all(&alice(), "", Some("food".to_string()), Paging::default())
            .await
            .unwrap();
        assert_eq!(by_class.total_items, 2);

        let by_search = svc
            .read_all(&alice(), "noodle", None, Paging::default())
            .await
            .unwrap();
        assert_eq!(by_search.result_count, 1);
        assert_eq!(by_search.items[0].tag_name, "Noodles");

        let paged = svc
            .read_all(&alice(), "", None, Paging::new(2, 2))
            .await
            .unwrap();
        assert_eq!(paged.total_items, 3);
        assert_eq!(paged.result_count, 1);
    }

    #[tokio::test]
    async fn test_update_and_permissions() {
        let (svc, _, events) = service();
        let tag = svc.create(&alice(), draft("food", "", "")).await.unwrap();

        let updated = svc
            .update(&alice(), tag.id, draft("meals", "dining", "#ABCDEF"))
            .await
            .unwrap();
        assert_eq!(updated.tag_name, "meals");
        assert_eq!(updated.hex_color, "abcdef");

        let bob = Principal::new(2, "bob");
        assert!(matches!(
            svc.update(&bob, tag.id, draft("x", "", "")).await,
            Err(DomainError::AccessDenied(_))
        ));
        assert!(matches!(
            svc.read_one(&bob, tag.id).await,
            Err(DomainError::AccessDenied(_))
        ));
        assert!(matches!(
            svc.read_one(&alice(), 999).await,
            Err(DomainError::NotFound(_))
        ));
        assert_eq!(
            events.names(),
            vec!["merchant_tag.created", "merchant_tag.updated"]
        );
    }

    #[tokio::test]
    async fn test_delete_removes_relations_only() {
        let (svc, store, _) = service();
        let tag = svc.create(&alice(), draft("food", "", "")).await.unwrap();
        store
            .add_relation(MerchantTagRelation::new(10, tag.id))
            .await
            .unwrap();

        svc.delete(&alice(), tag.id).await.unwrap();

        assert!(store.get_tag(tag.id).await.unwrap().is_none());
        assert!(store.relations_for_merchants(&[10]).await.unwrap().is_empty());
    }
}
