use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::geo::{self, GeoError};
use crate::hub::{Hub, PositionUpdate};
use crate::models::GeoPoint;
use crate::store::DeliveryStore;

/// Positioning failures as reported by the device. Only permission denial is
/// fatal; signal loss and timeouts degrade the tracker but keep it running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("position signal unavailable")]
    Unavailable,

    #[error("position request timed out")]
    Timeout,
}

impl PositionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PositionError::PermissionDenied)
    }
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Position(#[from] PositionError),

    #[error(transparent)]
    InvalidCoordinates(#[from] GeoError),

    #[error("tracking stopped; call restart() to resume")]
    Stopped,
}

/// What happened to one raw sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleOutcome {
    /// Persisted and emitted; the forwarded reference moved to this point.
    Forwarded,
    /// Moved less than the threshold since the last forwarded point.
    Dropped,
    /// Soft positioning failure; last known good position still exposed.
    Degraded,
}

/// The dispatcher side of a forwarded sample. In production this is the
/// device's connection to the hub; tests substitute a recorder.
#[async_trait]
pub trait PositionFeed: Send + Sync {
    async fn emit(&self, update: &PositionUpdate) -> Result<(), FeedError>;
}

#[derive(Debug, Error)]
#[error("position feed: {0}")]
pub struct FeedError(pub String);

/// Feeds forwarded samples straight into an in-process hub.
pub struct HubFeed {
    hub: Arc<Hub>,
}

impl HubFeed {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl PositionFeed for HubFeed {
    async fn emit(&self, update: &PositionUpdate) -> Result<(), FeedError> {
        self.hub.publish_position(update);
        Ok(())
    }
}

/// Device-side sampling filter, one per driver device. Each raw sample is
/// compared against the last *forwarded* point; only samples that moved at
/// least the threshold are written to the store and emitted to the feed.
/// The two forwards are independent best-effort: a store failure never
/// blocks the live emit.
pub struct LocationTracker<S, F> {
    driver_id: String,
    threshold_m: f64,
    store: Arc<S>,
    feed: F,
    active_order: Option<String>,
    last_forwarded: Option<GeoPoint>,
    last_known: Option<GeoPoint>,
    degraded: bool,
    stopped: bool,
}

impl<S: DeliveryStore, F: PositionFeed> LocationTracker<S, F> {
    pub fn new(driver_id: impl Into<String>, threshold_m: f64, store: Arc<S>, feed: F) -> Self {
        Self {
            driver_id: driver_id.into(),
            threshold_m,
            store,
            feed,
            active_order: None,
            last_forwarded: None,
            last_known: None,
            degraded: false,
            stopped: false,
        }
    }

    /// Tags forwarded samples with the delivery in progress, if any.
    pub fn set_active_order(&mut self, order_id: Option<String>) {
        self.active_order = order_id;
    }

    pub fn last_known(&self) -> Option<GeoPoint> {
        self.last_known
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Resumes after a fatal positioning error. Clears the forwarded
    /// reference so the first sample after a restart always forwards.
    pub fn restart(&mut self) {
        self.stopped = false;
        self.degraded = false;
        self.last_forwarded = None;
    }

    pub async fn push_sample(
        &mut self,
        sample: Result<GeoPoint, PositionError>,
    ) -> Result<SampleOutcome, TrackerError> {
        if self.stopped {
            return Err(TrackerError::Stopped);
        }

        let point = match sample {
            Ok(point) => point,
            Err(err) if err.is_fatal() => {
                self.stopped = true;
                warn!(driver_id = %self.driver_id, error = %err, "tracking stopped");
                return Err(err.into());
            }
            Err(err) => {
                self.degraded = true;
                debug!(driver_id = %self.driver_id, error = %err, "position degraded");
                return Ok(SampleOutcome::Degraded);
            }
        };

        geo::validate(&point)?;
        self.degraded = false;
        self.last_known = Some(point);

        if let Some(previous) = &self.last_forwarded {
            let moved = geo::haversine_m(previous, &point)?;
            if moved < self.threshold_m {
                return Ok(SampleOutcome::Dropped);
            }
        }

        self.forward(point).await;
        self.last_forwarded = Some(point);
        Ok(SampleOutcome::Forwarded)
    }

    async fn forward(&self, point: GeoPoint) {
        let update = PositionUpdate {
            driver_id: self.driver_id.clone(),
            lat: point.lat,
            lng: point.lng,
            order_id: self.active_order.clone(),
            heading: None,
            speed: None,
            timestamp: Utc::now(),
        };

        if let Err(err) = self
            .store
            .update_driver_location(&self.driver_id, point, update.timestamp)
            .await
        {
            warn!(driver_id = %self.driver_id, error = %err, "position write failed");
        }

        if let Err(err) = self.feed.emit(&update).await {
            warn!(driver_id = %self.driver_id, error = %err, "position emit failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use chrono::{DateTime, Utc};

    use super::*;
    use crate::lifecycle::OrderStatus;
    use crate::models::Order;
    use crate::store::StoreError;

    #[derive(Default)]
    struct RecordingStore {
        writes: AtomicUsize,
        fail_writes: bool,
    }

    #[async_trait]
    impl DeliveryStore for RecordingStore {
        async fn fetch_order(&self, _order_id: &str) -> Result<Option<Order>, StoreError> {
            Ok(None)
        }

        async fn update_order_status(
            &self,
            order_id: &str,
            _status: OrderStatus,
        ) -> Result<Order, StoreError> {
            Err(StoreError::OrderNotFound(order_id.to_string()))
        }

        async fn update_driver_location(
            &self,
            _driver_id: &str,
            _position: GeoPoint,
            _at: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            if self.fail_writes {
                return Err(StoreError::Backend("disk on fire".to_string()));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    #[derive(Default)]
    struct RecordingFeed {
        emitted: Mutex<Vec<PositionUpdate>>,
    }

    #[async_trait]
    impl PositionFeed for &RecordingFeed {
        async fn emit(&self, update: &PositionUpdate) -> Result<(), FeedError> {
            self.emitted.lock().unwrap().push(update.clone());
            Ok(())
        }
    }

    fn point(lat: f64, lng: f64) -> GeoPoint {
        GeoPoint { lat, lng }
    }

    // ~11.1 m per 0.0001 deg of latitude
    const STEP_8M: f64 = 0.000072;
    const STEP_16M: f64 = 0.000144;

    #[tokio::test]
    async fn sub_threshold_sample_is_dropped_entirely() {
        let store = Arc::new(RecordingStore::default());
        let feed = RecordingFeed::default();
        let mut tracker = LocationTracker::new("d1", 12.0, store.clone(), &feed);

        assert_eq!(
            tracker.push_sample(Ok(point(10.0, 10.0))).await.unwrap(),
            SampleOutcome::Forwarded
        );
        assert_eq!(
            tracker
                .push_sample(Ok(point(10.0 + STEP_8M, 10.0)))
                .await
                .unwrap(),
            SampleOutcome::Dropped
        );

        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
        assert_eq!(feed.emitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn threshold_sample_forwards_once_and_moves_the_reference() {
        let store = Arc::new(RecordingStore::default());
        let feed = RecordingFeed::default();
        let mut tracker = LocationTracker::new("d1", 12.0, store.clone(), &feed);

        tracker.push_sample(Ok(point(10.0, 10.0))).await.unwrap();
        assert_eq!(
            tracker
                .push_sample(Ok(point(10.0 + STEP_16M, 10.0)))
                .await
                .unwrap(),
            SampleOutcome::Forwarded
        );

        assert_eq!(store.writes.load(Ordering::SeqCst), 2);
        let emitted = feed.emitted.lock().unwrap();
        assert_eq!(emitted.len(), 2);
        assert!((emitted[1].lat - (10.0 + STEP_16M)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn filter_anchors_on_last_forwarded_not_last_raw() {
        let store = Arc::new(RecordingStore::default());
        let feed = RecordingFeed::default();
        let mut tracker = LocationTracker::new("d1", 12.0, store.clone(), &feed);

        // 8 m steps: each is sub-threshold vs the previous raw sample, but
        // the second one is 16 m from the last *forwarded* point.
        tracker.push_sample(Ok(point(10.0, 10.0))).await.unwrap();
        assert_eq!(
            tracker
                .push_sample(Ok(point(10.0 + STEP_8M, 10.0)))
                .await
                .unwrap(),
            SampleOutcome::Dropped
        );
        assert_eq!(
            tracker
                .push_sample(Ok(point(10.0 + 2.0 * STEP_8M, 10.0)))
                .await
                .unwrap(),
            SampleOutcome::Forwarded
        );

        assert_eq!(store.writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn store_failure_does_not_block_the_emit() {
        let store = Arc::new(RecordingStore {
            fail_writes: true,
            ..Default::default()
        });
        let feed = RecordingFeed::default();
        let mut tracker = LocationTracker::new("d1", 12.0, store, &feed);

        assert_eq!(
            tracker.push_sample(Ok(point(10.0, 10.0))).await.unwrap(),
            SampleOutcome::Forwarded
        );
        assert_eq!(feed.emitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn soft_failure_keeps_last_known_and_degrades() {
        let store = Arc::new(RecordingStore::default());
        let feed = RecordingFeed::default();
        let mut tracker = LocationTracker::new("d1", 12.0, store, &feed);

        tracker.push_sample(Ok(point(10.0, 10.0))).await.unwrap();
        assert_eq!(
            tracker
                .push_sample(Err(PositionError::Unavailable))
                .await
                .unwrap(),
            SampleOutcome::Degraded
        );
        assert!(tracker.is_degraded());
        assert_eq!(tracker.last_known(), Some(point(10.0, 10.0)));

        // a good sample clears the degraded flag
        tracker
            .push_sample(Ok(point(10.0 + STEP_16M, 10.0)))
            .await
            .unwrap();
        assert!(!tracker.is_degraded());
    }

    #[tokio::test]
    async fn timeout_is_soft_and_retryable() {
        let store = Arc::new(RecordingStore::default());
        let feed = RecordingFeed::default();
        let mut tracker = LocationTracker::new("d1", 12.0, store, &feed);

        assert_eq!(
            tracker
                .push_sample(Err(PositionError::Timeout))
                .await
                .unwrap(),
            SampleOutcome::Degraded
        );
        assert!(!tracker.is_stopped());
        assert_eq!(
            tracker.push_sample(Ok(point(10.0, 10.0))).await.unwrap(),
            SampleOutcome::Forwarded
        );
    }

    #[tokio::test]
    async fn permission_denial_stops_tracking_until_restart() {
        let store = Arc::new(RecordingStore::default());
        let feed = RecordingFeed::default();
        let mut tracker = LocationTracker::new("d1", 12.0, store.clone(), &feed);

        tracker.push_sample(Ok(point(10.0, 10.0))).await.unwrap();
        assert!(matches!(
            tracker.push_sample(Err(PositionError::PermissionDenied)).await,
            Err(TrackerError::Position(PositionError::PermissionDenied))
        ));
        assert!(tracker.is_stopped());
        assert!(matches!(
            tracker.push_sample(Ok(point(11.0, 10.0))).await,
            Err(TrackerError::Stopped)
        ));

        tracker.restart();
        // forwarded reference was cleared: the next sample forwards even if
        // it has not moved since the last forward
        assert_eq!(
            tracker.push_sample(Ok(point(10.0, 10.0))).await.unwrap(),
            SampleOutcome::Forwarded
        );
        assert_eq!(store.writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn malformed_sample_is_a_typed_error() {
        let store = Arc::new(RecordingStore::default());
        let feed = RecordingFeed::default();
        let mut tracker = LocationTracker::new("d1", 12.0, store, &feed);

        assert!(matches!(
            tracker.push_sample(Ok(point(f64::NAN, 10.0))).await,
            Err(TrackerError::InvalidCoordinates(GeoError::NotFinite))
        ));
    }

    #[tokio::test]
    async fn hub_feed_relays_forwarded_samples_to_admin_tracking() {
        use crate::auth::{Identity, Role};
        use crate::hub::rooms;
        use crate::observability::metrics::Metrics;
        use crate::store::InMemoryStore;

        let hub = Arc::new(Hub::new(Metrics::new()));
        let (admin, mut admin_rx) = hub.register(Identity {
            role: Role::Admin,
            subject: "ops".to_string(),
        });
        hub.join(admin, rooms::ADMIN_TRACKING);

        let store = Arc::new(InMemoryStore::new(12.0));
        let mut tracker = LocationTracker::new("d1", 12.0, store, HubFeed::new(hub));

        tracker.push_sample(Ok(point(10.0, 10.0))).await.unwrap();

        match admin_rx.try_recv().unwrap() {
            crate::hub::Outbound::Event(envelope) => {
                assert_eq!(envelope.event, "driver_position");
                assert_eq!(envelope.data["driverId"], "d1");
            }
            other => panic!("unexpected outbound: {other:?}"),
        }
    }

    #[tokio::test]
    async fn forwarded_samples_carry_the_active_order() {
        let store = Arc::new(RecordingStore::default());
        let feed = RecordingFeed::default();
        let mut tracker = LocationTracker::new("d1", 12.0, store, &feed);
        tracker.set_active_order(Some("o1".to_string()));

        tracker.push_sample(Ok(point(10.0, 10.0))).await.unwrap();
        let emitted = feed.emitted.lock().unwrap();
        assert_eq!(emitted[0].order_id.as_deref(), Some("o1"));
    }
}
