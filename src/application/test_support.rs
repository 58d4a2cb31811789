//! Test doubles shared by the application service tests.

use crate::domain::entities::GeocodeResult;
use crate::domain::errors::GeocodeError;
use crate::domain::events::DomainEvent;
use crate::domain::ports::{EventPublisher, GeocodeProvider};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub enum Outcome {
    Resolve { lng: f64, lat: f64, score: i32 },
    Fail,
    Panic,
}

/// Scripted provider that counts its calls.
pub struct FakeProvider {
    name: String,
    outcome: Outcome,
    calls: AtomicUsize,
}

impl FakeProvider {
    pub fn resolving(name: &str, lng: f64, lat: f64) -> Self {
        Self::new(name, Outcome::Resolve { lng, lat, score: 80 })
    }

    pub fn failing(name: &str) -> Self {
        Self::new(name, Outcome::Fail)
    }

    pub fn panicking(name: &str) -> Self {
        Self::new(name, Outcome::Panic)
    }

    pub fn new(name: &str, outcome: Outcome) -> Self {
        Self {
            name: name.to_string(),
            outcome,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeocodeProvider for FakeProvider {
    async fn geocode(&self, address: &str) -> Result<GeocodeResult, GeocodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.outcome {
            Outcome::Resolve { lng, lat, score } => Ok(GeocodeResult {
                longitude: lng,
                latitude: lat,
                level: "house".to_string(),
                score,
                description: format!("{} (resolved)", address),
                address: address.to_string(),
                provider: self.name.clone(),
            }),
            Outcome::Fail => Err(GeocodeError::NoResults(address.to_string())),
            Outcome::Panic => panic!("provider {} exploded", self.name),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Publisher that keeps every event in memory.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingPublisher {
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.name()).collect()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: DomainEvent) {
        self.events.lock().push(event);
    }
}
