use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub sessions_connected: IntGauge,
    pub rooms_active: IntGauge,
    pub events_relayed_total: IntCounterVec,
    pub bridge_emits_total: IntCounterVec,
    pub location_updates_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let sessions_connected =
            IntGauge::new("sessions_connected", "Currently connected realtime sessions")
                .expect("valid sessions_connected metric");

        let rooms_active = IntGauge::new("rooms_active", "Rooms with at least one member")
            .expect("valid rooms_active metric");

        let events_relayed_total = IntCounterVec::new(
            Opts::new("events_relayed_total", "Events relayed to rooms by event name"),
            &["event"],
        )
        .expect("valid events_relayed_total metric");

        let bridge_emits_total = IntCounterVec::new(
            Opts::new("bridge_emits_total", "Bridge /emit requests by outcome"),
            &["outcome"],
        )
        .expect("valid bridge_emits_total metric");

        let location_updates_total = IntCounterVec::new(
            Opts::new(
                "location_updates_total",
                "Driver location writes by result",
            ),
            &["result"],
        )
        .expect("valid location_updates_total metric");

        registry
            .register(Box::new(sessions_connected.clone()))
            .expect("register sessions_connected");
        registry
            .register(Box::new(rooms_active.clone()))
            .expect("register rooms_active");
        registry
            .register(Box::new(events_relayed_total.clone()))
            .expect("register events_relayed_total");
        registry
            .register(Box::new(bridge_emits_total.clone()))
            .expect("register bridge_emits_total");
        registry
            .register(Box::new(location_updates_total.clone()))
            .expect("register location_updates_total");

        Self {
            registry,
            sessions_connected,
            rooms_active,
            events_relayed_total,
            bridge_emits_total,
            location_updates_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
