//! Event Publisher Port
//!
//! Outbound, fire-and-forget notification of domain events.

use crate::domain::events::DomainEvent;

/// Publishes domain events to an external bus.
///
/// Publishing never fails from the caller's point of view; implementations
/// log delivery problems themselves.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: DomainEvent);
}
