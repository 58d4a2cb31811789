//! Geocode Dispatcher
//!
//! Detached background geocoding, bounded by a fixed number of workers.
//! Submitters never wait on, or observe, the outcome of a job.

use crate::application::geocode_service::{GeocodeJob, GeocodeService};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};

pub const DEFAULT_GEOCODE_WORKERS: usize = 4;

/// Fire-and-forget runner for [`GeocodeJob`]s.
///
/// Each job runs in its own task. Failures and panics are logged, never
/// propagated. Jobs are not ordered and cannot be cancelled.
#[derive(Clone)]
pub struct GeocodeDispatcher {
    geocoder: Arc<GeocodeService>,
    permits: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl GeocodeDispatcher {
    pub fn new(geocoder: Arc<GeocodeService>, workers: usize) -> Self {
        Self {
            geocoder,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            pending: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    pub fn submit(&self, job: GeocodeJob) {
        self.pending.fetch_add(1, Ordering::SeqCst);

        let geocoder = self.geocoder.clone();
        let permits = self.permits.clone();
        let pending = self.pending.clone();
        let idle = self.idle.clone();

        tokio::spawn(async move {
            let merchant_id = job.merchant_id;
            let address = job.address.clone();

            match permits.acquire_owned().await {
                Ok(_permit) => {
                    let work = tokio::spawn(async move { geocoder.geocode_and_link(job).await });
                    match work.await {
                        Ok(Ok(point)) => tracing::debug!(
                            "background geocode ok for merchant {:?}: '{}' -> point {}",
                            merchant_id,
                            address,
                            point.id
                        ),
                        Ok(Err(e)) => tracing::error!(
                            "failed to geocode merchant {:?} ('{}'): {}",
                            merchant_id,
                            address,
                            e
                        ),
                        Err(e) if e.is_panic() => tracing::error!(
                            "panic in geocoding for merchant {:?} ('{}')",
                            merchant_id,
                            address
                        ),
                        Err(e) => tracing::warn!("geocoding task for merchant {:?} aborted: {}", merchant_id, e),
                    }
                }
                Err(e) => tracing::error!("geocode worker pool closed: {}", e),
            }

            if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                idle.notify_waiters();
            }
        });
    }

    /// Jobs submitted but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Resolve once no job is outstanding.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::adapters::outbound::DashMapStore;
    use crate::application::test_support::FakeProvider;
    use crate::domain::ports::{GeoPointRepository, GeocodeProvider};
    use std::time::Duration;
    use tracing_test::traced_test;

    fn dispatcher(provider: Arc<dyn GeocodeProvider>) -> (GeocodeDispatcher, Arc<DashMapStore>) {
        let store = Arc::new(DashMapStore::new());
        let svc = Arc::new(GeocodeService::new(vec![provider], store.clone()));
        (GeocodeDispatcher::new(svc, 2), store)
    }

    fn job(merchant_id: i64, address: &str) -> GeocodeJob {
        GeocodeJob {
            merchant_id: Some(merchant_id),
            address: address.to_string(),
            source: "csv_import".to_string(),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_jobs_complete_and_link() {
        let (d, store) = dispatcher(Arc::new(FakeProvider::resolving("a", 1.0, 2.0)));

        d.submit(job(1, "one"));
        d.submit(job(2, "two"));
        d.submit(job(3, "three"));
        tokio::time::timeout(Duration::from_secs(5), d.wait_idle())
            .await
            .unwrap();

        assert_eq!(d.pending(), 0);
        let p = store
            .find_by_address_and_source("two", "csv_import")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(p.merchant_id, Some(2));
    }

    #[tokio::test]
    async fn test_wait_idle_without_jobs_returns() {
        let (d, _) = dispatcher(Arc::new(FakeProvider::resolving("a", 1.0, 2.0)));
        tokio::time::timeout(Duration::from_secs(1), d.wait_idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failures_are_logged() {
        let (d, _) = dispatcher(Arc::new(FakeProvider::failing("a")));

        d.submit(job(7, "nowhere"));
        tokio::time::timeout(Duration::from_secs(5), d.wait_idle())
            .await
            .unwrap();

        assert!(logs_contain("failed to geocode merchant Some(7)"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_panics_are_contained() {
        let (d, _) = dispatcher(Arc::new(FakeProvider::panicking("boom")));

        d.submit(job(8, "anywhere"));
        tokio::time::timeout(Duration::from_secs(5), d.wait_idle())
            .await
            .unwrap();

        assert_eq!(d.pending(), 0);
        assert!(logs_contain("panic in geocoding for merchant Some(8)"));
    }
}
