//! Tracking scheduler: the long-lived loop that drives everything.
//!
//! Each tick groups airports into shared query regions, fans out one feed
//! query per region, routes matched samples through the approach state
//! machine, and fans resulting alerts into the dispatcher. Failures are
//! contained per region and per delivery; nothing aborts a tick.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use metrics::{counter, gauge, histogram};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::approach::{ApproachStateStore, DetectorConfig, apply_sample};
use crate::dispatcher::Dispatcher;
use crate::geo;
use crate::model::{AlertEvent, PositionReport, TrackingTarget, TransponderId};
use crate::persistence::StatePersistence;
use crate::position_source::PositionSource;
use crate::registry::{SnapshotHolder, TenantRegistry, TenantSnapshot};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: std::time::Duration,
    pub registry_refresh: std::time::Duration,
    pub query_timeout: std::time::Duration,
    pub registry_timeout: std::time::Duration,
    pub idle_eviction: chrono::Duration,
    pub detector: DetectorConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: std::time::Duration::from_secs(10),
            registry_refresh: std::time::Duration::from_secs(60),
            query_timeout: std::time::Duration::from_secs(10),
            registry_timeout: std::time::Duration::from_secs(10),
            idle_eviction: chrono::Duration::hours(24),
            detector: DetectorConfig::default(),
        }
    }
}

/// One feed query serving every airport clustered around its center
#[derive(Debug, Clone)]
pub(crate) struct Region {
    pub center_lat: f64,
    pub center_lon: f64,
    pub radius_nm: f64,
    /// Indices into the snapshot's target list
    pub targets: Vec<usize>,
}

/// Greedily cluster airports so geographically close tenants share one feed
/// query. An airport joins a region when it sits within half the region's
/// radius of the center; the radius grows to keep the airport's own query
/// area covered. Airports outside every region get a dedicated query.
pub(crate) fn group_regions(targets: &[TrackingTarget]) -> Vec<Region> {
    let mut regions: Vec<Region> = Vec::new();
    for (idx, target) in targets.iter().enumerate() {
        let airport = &target.airport;
        let joined = regions.iter_mut().find(|region| {
            geo::distance_nm(region.center_lat, region.center_lon, airport.latitude, airport.longitude)
                <= region.radius_nm / 2.0
        });
        match joined {
            Some(region) => {
                let offset = geo::distance_nm(
                    region.center_lat,
                    region.center_lon,
                    airport.latitude,
                    airport.longitude,
                );
                region.radius_nm = region.radius_nm.max(offset + airport.query_radius_nm);
                region.targets.push(idx);
            }
            None => regions.push(Region {
                center_lat: airport.latitude,
                center_lon: airport.longitude,
                radius_nm: airport.query_radius_nm,
                targets: vec![idx],
            }),
        }
    }
    regions
}

/// What one tick did, mostly for logging and tests
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub samples_applied: usize,
    pub samples_malformed: usize,
    pub samples_out_of_order: usize,
    pub alerts_emitted: usize,
    pub alerts_suppressed: usize,
    pub deliveries: usize,
    pub failed_regions: usize,
    pub states_evicted: usize,
}

pub struct Scheduler {
    registry: Arc<dyn TenantRegistry>,
    source: Arc<dyn PositionSource>,
    dispatcher: Arc<Dispatcher>,
    persistence: Arc<dyn StatePersistence>,
    store: ApproachStateStore,
    snapshot: SnapshotHolder,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        registry: Arc<dyn TenantRegistry>,
        source: Arc<dyn PositionSource>,
        dispatcher: Arc<Dispatcher>,
        persistence: Arc<dyn StatePersistence>,
        store: ApproachStateStore,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            source,
            dispatcher,
            persistence,
            store,
            snapshot: SnapshotHolder::new(TenantSnapshot::empty(Utc::now())),
            config,
        }
    }

    pub fn store(&self) -> &ApproachStateStore {
        &self.store
    }

    pub fn snapshot(&self) -> Arc<TenantSnapshot> {
        self.snapshot.current()
    }

    /// Pull a fresh tenant snapshot and swap it in atomically.
    /// On failure the previous snapshot stays in use.
    pub async fn refresh_snapshot(&self, now: DateTime<Utc>) -> bool {
        match tokio::time::timeout(
            self.config.registry_timeout,
            self.registry.list_active_targets(),
        )
        .await
        {
            Ok(Ok(targets)) => {
                debug!(
                    tenants = targets.len(),
                    aircraft = targets.iter().map(|t| t.aircraft.len()).sum::<usize>(),
                    "refreshed tenant snapshot"
                );
                self.snapshot.replace(TenantSnapshot::new(targets, now));
                true
            }
            Ok(Err(e)) => {
                warn!("tenant registry refresh failed, keeping stale snapshot: {}", e);
                counter!("downwind.registry.refresh_failures_total").increment(1);
                false
            }
            Err(_) => {
                warn!("tenant registry refresh timed out, keeping stale snapshot");
                counter!("downwind.registry.refresh_failures_total").increment(1);
                false
            }
        }
    }

    /// Advance the world by one polling tick. `now` is injected so timing
    /// edge cases are testable with a fake clock and a fake feed.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> TickSummary {
        let tick_start = std::time::Instant::now();
        let snapshot = self.snapshot.current();
        let mut summary = TickSummary::default();

        let regions = group_regions(&snapshot.targets);

        // One concurrent query per region, each with its own timeout so a
        // slow feed endpoint cannot stall unrelated regions
        let queries = regions.iter().map(|region| {
            let source = Arc::clone(&self.source);
            let (lat, lon, radius) = (region.center_lat, region.center_lon, region.radius_nm);
            let query_timeout = self.config.query_timeout;
            async move {
                match tokio::time::timeout(query_timeout, source.query_region(lat, lon, radius))
                    .await
                {
                    Ok(Ok(reports)) => Some(reports),
                    Ok(Err(e)) => {
                        warn!("region query around ({:.3}, {:.3}) failed: {}", lat, lon, e);
                        None
                    }
                    Err(_) => {
                        warn!("region query around ({:.3}, {:.3}) timed out", lat, lon);
                        None
                    }
                }
            }
        });
        let results = join_all(queries).await;

        for (region, result) in regions.iter().zip(results) {
            let Some(reports) = result else {
                summary.failed_regions += 1;
                counter!("downwind.regions.failed_total").increment(1);
                continue;
            };
            let by_id = index_reports(reports);

            for &target_idx in &region.targets {
                let target = &snapshot.targets[target_idx];
                for aircraft in &target.aircraft {
                    let Some(report) = by_id.get(&aircraft.transponder) else {
                        continue;
                    };
                    self.process_sample(target, aircraft.tail_number.clone(), report, now, &mut summary)
                        .await;
                }
            }
        }

        // Lazy eviction: drop states for targets gone from the snapshot and
        // states idle beyond the eviction window
        summary.states_evicted += self.store.retain_known(&snapshot.live_keys());
        summary.states_evicted += self.store.evict_idle(now, self.config.idle_eviction);

        if summary.alerts_emitted > 0 {
            self.persist_states().await;
        }

        histogram!("downwind.tick.duration_ms")
            .record(tick_start.elapsed().as_micros() as f64 / 1000.0);
        gauge!("downwind.states.active").set(self.store.len() as f64);
        if summary != TickSummary::default() {
            debug!(?summary, "tick complete");
        }
        summary
    }

    async fn process_sample(
        &self,
        target: &TrackingTarget,
        tail_number: Option<String>,
        report: &PositionReport,
        now: DateTime<Utc>,
        summary: &mut TickSummary,
    ) {
        if !geo::valid_coordinates(report.latitude, report.longitude) {
            counter!("downwind.samples.malformed_total").increment(1);
            summary.samples_malformed += 1;
            return;
        }

        let key = (target.user_id, report.transponder.clone());
        // Entry lock held only for the synchronous state transition; the
        // per-aircraft partition keeps this single-writer within a tick
        let result = self.store.with_state(key, now, |state| {
            apply_sample(state, &target.airport, report, &self.config.detector, now)
        });

        if !result.accepted {
            counter!("downwind.samples.out_of_order_total").increment(1);
            summary.samples_out_of_order += 1;
            return;
        }
        counter!("downwind.samples.processed_total").increment(1);
        summary.samples_applied += 1;

        if result.crossings.is_empty() {
            return;
        }

        let bearing = geo::bearing_degrees(
            target.airport.latitude,
            target.airport.longitude,
            report.latitude,
            report.longitude,
        );
        debug!(
            transponder = %report.transponder,
            bearing_deg = format!("{:.0}", bearing),
            "aircraft crossed {} threshold(s)",
            result.crossings.len()
        );

        if let Some(quiet) = &target.airport.quiet_hours
            && quiet.contains(now)
        {
            info!(
                transponder = %report.transponder,
                "suppressing {} alert(s) during quiet hours",
                result.crossings.len()
            );
            counter!("downwind.alerts.suppressed_total")
                .increment(result.crossings.len() as u64);
            summary.alerts_suppressed += result.crossings.len();
            return;
        }

        // Crossings arrive largest-threshold-first; deliver sequentially so
        // downstream sees a monotonically tightening sequence per aircraft
        for crossing in result.crossings {
            let event = AlertEvent {
                user_id: target.user_id,
                transponder: report.transponder.clone(),
                tail_number: tail_number.clone(),
                threshold_nm: crossing.threshold_nm,
                distance_nm: crossing.distance_nm,
                altitude_ft: crossing.altitude_ft,
                episode_id: result.episode_id,
                timestamp: report.observed_at,
            };
            counter!("downwind.alerts.emitted_total").increment(1);
            summary.alerts_emitted += 1;
            summary.deliveries += self.dispatcher.dispatch(&event, &target.integrations).await;
        }
    }

    async fn persist_states(&self) {
        let states = self.store.export();
        if let Err(e) = self.persistence.save_approach_states(&states).await {
            warn!("failed to persist approach states: {}", e);
        }
    }

    /// Main loop: obtain the initial snapshot (retrying indefinitely), then
    /// poll and refresh on their cadences until cancelled. A tick in progress
    /// when shutdown arrives runs to completion so in-flight deliveries,
    /// bounded by their timeouts, are not dropped.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut backoff = std::time::Duration::from_secs(1);
        while !self.refresh_snapshot(Utc::now()).await {
            warn!("initial tenant snapshot unavailable, retrying in {:?}", backoff);
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(std::time::Duration::from_secs(60));
        }

        match self.persistence.load_approach_states().await {
            Ok(states) if !states.is_empty() => {
                info!("restored {} persisted approach states", states.len());
                self.store.restore(states);
            }
            Ok(_) => {}
            Err(e) => warn!("could not load persisted approach states: {}", e),
        }

        info!(
            poll_secs = self.config.poll_interval.as_secs(),
            refresh_secs = self.config.registry_refresh.as_secs(),
            tenants = self.snapshot.current().targets.len(),
            "tracking scheduler started"
        );

        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut refresh = tokio::time::interval(self.config.registry_refresh);
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first refresh tick fires immediately; we just refreshed
        refresh.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = refresh.tick() => {
                    self.refresh_snapshot(Utc::now()).await;
                    continue;
                }
                _ = poll.tick() => {}
            }
            self.run_tick(Utc::now()).await;
        }

        info!("scheduler stopping, persisting approach states");
        self.persist_states().await;
        Ok(())
    }
}

/// Index reports by transponder, keeping the newest per aircraft
fn index_reports(reports: Vec<PositionReport>) -> HashMap<TransponderId, PositionReport> {
    let mut by_id = HashMap::with_capacity(reports.len());
    for report in reports {
        match by_id.entry(report.transponder.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(report);
            }
            Entry::Occupied(mut slot) => {
                if report.observed_at > slot.get().observed_at {
                    slot.insert(report);
                }
            }
        }
    }
    by_id
}
