use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::state::ApproachState;
use crate::geo;
use crate::model::{AirportConfig, PositionReport};

/// Tunable margins for the approach state machine.
///
/// The climb-away and go-around margins are heuristics, not physics; keep
/// them configurable and confirm against real traces before tightening.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Gap between samples after which the current episode ends
    pub silence_window: Duration,
    /// Outbound skip margin: distance must grow by more than this before a
    /// sample is treated as departing traffic
    pub climb_away_margin_nm: f64,
    /// Altitude change below this is noise, not a climb or descent
    pub descent_noise_ft: f64,
    /// Consecutive climbing-and-receding samples before a go-around reset
    pub climb_streak_samples: u8,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            silence_window: Duration::minutes(5),
            climb_away_margin_nm: 1.0,
            descent_noise_ft: 50.0,
            climb_streak_samples: 2,
        }
    }
}

/// A threshold the aircraft just descended through
#[derive(Debug, Clone, PartialEq)]
pub struct Crossing {
    pub threshold_nm: f64,
    pub distance_nm: f64,
    pub altitude_ft: Option<f64>,
}

/// Outcome of applying one sample to an [`ApproachState`]
#[derive(Debug, Clone)]
pub struct SampleResult {
    /// False when the sample was discarded (out of order) without mutation
    pub accepted: bool,
    /// Crossings in descending threshold order (largest band first)
    pub crossings: Vec<Crossing>,
    /// Episode the crossings belong to, after any reset this sample caused
    pub episode_id: Uuid,
}

impl SampleResult {
    fn rejected(state: &ApproachState) -> Self {
        Self {
            accepted: false,
            crossings: Vec::new(),
            episode_id: state.episode_id,
        }
    }
}

/// Apply one position sample to an aircraft's approach state.
///
/// `now` is the scheduler's wall clock, used only for idle-eviction
/// bookkeeping; all episode logic runs on feed timestamps so the machine is
/// deterministic under test.
pub fn apply_sample(
    state: &mut ApproachState,
    airport: &AirportConfig,
    report: &PositionReport,
    config: &DetectorConfig,
    now: DateTime<Utc>,
) -> SampleResult {
    // Out-of-order samples are discarded without touching state
    if let Some(last_seen) = state.last_seen_at
        && report.observed_at <= last_seen
    {
        return SampleResult::rejected(state);
    }

    let distance_nm = geo::distance_nm(
        airport.latitude,
        airport.longitude,
        report.latitude,
        report.longitude,
    );

    // A long gap ends the episode before this sample is evaluated
    if let Some(last_seen) = state.last_seen_at
        && report.observed_at - last_seen > config.silence_window
    {
        tracing::debug!(
            transponder = %report.transponder,
            gap_secs = (report.observed_at - last_seen).num_seconds(),
            "silence window elapsed, starting new approach episode"
        );
        state.begin_episode();
    }

    let descending = geo::is_descending(
        report.altitude_ft,
        state.last_altitude_ft,
        config.descent_noise_ft,
    );

    // Go-around heuristic: climbing while the distance opens up, sustained
    // over consecutive samples, resets the episode even before the silence
    // window elapses
    let climbing = matches!(
        (report.altitude_ft, state.last_altitude_ft),
        (Some(current), Some(previous)) if current > previous + config.descent_noise_ft
    );
    let receding = state
        .last_distance_nm
        .map(|last| distance_nm > last)
        .unwrap_or(false);
    if climbing && receding {
        state.climb_away_streak = state.climb_away_streak.saturating_add(1);
    } else {
        state.climb_away_streak = 0;
    }
    if state.climb_away_streak >= config.climb_streak_samples {
        tracing::debug!(
            transponder = %report.transponder,
            "sustained climb-away, resetting approach episode"
        );
        state.begin_episode();
    }

    // Outbound traffic: distance opening beyond the margin while not
    // descending skips crossing evaluation but still updates state
    let moving_away = state
        .last_distance_nm
        .map(|last| distance_nm > last + config.climb_away_margin_nm)
        .unwrap_or(false);
    let evaluate = !report.on_ground && !(moving_away && descending != Some(true));

    let mut crossings = Vec::new();
    if evaluate {
        // An unknown previous distance (first sample of an episode) counts as
        // arriving from beyond all thresholds
        let previous = state.last_distance_nm.unwrap_or(f64::INFINITY);
        for &threshold in &airport.thresholds_nm {
            if state.has_crossed(threshold) {
                continue;
            }
            // Descent gate fails closed: unknown altitude means no alert
            if previous > threshold && threshold >= distance_nm && descending == Some(true) {
                crossings.push(Crossing {
                    threshold_nm: threshold,
                    distance_nm,
                    altitude_ft: report.altitude_ft,
                });
                state.mark_crossed(threshold);
            }
        }
    }

    state.last_distance_nm = Some(distance_nm);
    if let Some(altitude) = report.altitude_ft {
        state.last_altitude_ft = Some(altitude);
    }
    state.last_seen_at = Some(report.observed_at);
    state.updated_at = now;

    SampleResult {
        accepted: true,
        crossings,
        episode_id: state.episode_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DEFAULT_QUERY_RADIUS_NM, TransponderId};
    use chrono::TimeZone;

    fn test_airport() -> AirportConfig {
        AirportConfig::new(38.0, -97.0, 1300, vec![10.0, 5.0, 2.0], DEFAULT_QUERY_RADIUS_NM, None)
            .unwrap()
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    /// Sample positioned due north of the test airport at the given range
    fn sample_at(distance_nm: f64, altitude_ft: Option<f64>, at: DateTime<Utc>) -> PositionReport {
        PositionReport {
            transponder: TransponderId::new("ab1234").unwrap(),
            latitude: 38.0 + distance_nm / 60.0,
            longitude: -97.0,
            altitude_ft,
            ground_speed_kts: Some(110.0),
            on_ground: false,
            observed_at: at,
        }
    }

    fn apply(
        state: &mut ApproachState,
        report: &PositionReport,
    ) -> SampleResult {
        apply_sample(state, &test_airport(), report, &DetectorConfig::default(), Utc::now())
    }

    fn crossed_thresholds(result: &SampleResult) -> Vec<f64> {
        result.crossings.iter().map(|c| c.threshold_nm).collect()
    }

    #[test]
    fn test_concrete_approach_scenario() {
        // 12nm -> 9nm -> 6nm -> 1.5nm, descending throughout.
        // 10 fires at the second sample; the sparse jump to 1.5 fires 5 and 2
        // together, largest first. Three alerts total, each exactly once.
        let t0 = base_time();
        let mut state = ApproachState::new(t0);

        let r0 = apply(&mut state, &sample_at(12.0, Some(3000.0), t0));
        assert!(r0.crossings.is_empty());

        let r1 = apply(&mut state, &sample_at(9.0, Some(2500.0), t0 + Duration::seconds(10)));
        assert_eq!(crossed_thresholds(&r1), vec![10.0]);

        let r2 = apply(&mut state, &sample_at(6.0, Some(1800.0), t0 + Duration::seconds(20)));
        assert!(r2.crossings.is_empty());

        let r3 = apply(&mut state, &sample_at(1.5, Some(400.0), t0 + Duration::seconds(30)));
        assert_eq!(crossed_thresholds(&r3), vec![5.0, 2.0]);

        assert_eq!(state.crossed.len(), 3);
        assert_eq!(r1.episode_id, r3.episode_id);
    }

    #[test]
    fn test_threshold_fires_at_most_once_per_episode() {
        // Oscillating around the 10nm band must not re-alert
        let t0 = base_time();
        let mut state = ApproachState::new(t0);

        apply(&mut state, &sample_at(11.0, Some(3000.0), t0));
        let fired = apply(&mut state, &sample_at(9.5, Some(2800.0), t0 + Duration::seconds(10)));
        assert_eq!(crossed_thresholds(&fired), vec![10.0]);

        // Drifts back out (within the outbound margin), then in again
        apply(&mut state, &sample_at(10.4, Some(2750.0), t0 + Duration::seconds(20)));
        let again = apply(&mut state, &sample_at(9.4, Some(2600.0), t0 + Duration::seconds(30)));
        assert!(again.crossings.is_empty());
    }

    #[test]
    fn test_no_alert_while_climbing() {
        // Distance tightening but altitude increasing: fails the descent gate
        let t0 = base_time();
        let mut state = ApproachState::new(t0);

        apply(&mut state, &sample_at(12.0, Some(2000.0), t0));
        let result = apply(&mut state, &sample_at(9.0, Some(2600.0), t0 + Duration::seconds(10)));
        assert!(result.crossings.is_empty());
    }

    #[test]
    fn test_missing_altitude_fails_closed() {
        let t0 = base_time();
        let mut state = ApproachState::new(t0);

        apply(&mut state, &sample_at(12.0, Some(3000.0), t0));
        let result = apply(&mut state, &sample_at(9.0, None, t0 + Duration::seconds(10)));
        assert!(result.crossings.is_empty());
        // Distance bookkeeping still advanced
        assert!((state.last_distance_nm.unwrap() - 9.0).abs() < 0.05);
    }

    #[test]
    fn test_silence_window_starts_new_episode() {
        let t0 = base_time();
        let mut state = ApproachState::new(t0);

        apply(&mut state, &sample_at(12.0, Some(3000.0), t0));
        let first = apply(&mut state, &sample_at(9.0, Some(2500.0), t0 + Duration::seconds(10)));
        assert_eq!(crossed_thresholds(&first), vec![10.0]);
        let first_episode = first.episode_id;

        // Silent for longer than the 5-minute window, reappears closer in and
        // still descending: 10nm alerts again under a fresh episode id
        let reappear = t0 + Duration::minutes(8);
        let second = apply(&mut state, &sample_at(8.0, Some(2000.0), reappear));
        assert_eq!(crossed_thresholds(&second), vec![10.0]);
        assert_ne!(second.episode_id, first_episode);
    }

    #[test]
    fn test_out_of_order_sample_discarded_without_mutation() {
        let t0 = base_time();
        let mut state = ApproachState::new(t0);

        apply(&mut state, &sample_at(12.0, Some(3000.0), t0));
        apply(&mut state, &sample_at(9.0, Some(2500.0), t0 + Duration::seconds(10)));
        let before_distance = state.last_distance_nm;
        let before_crossed = state.crossed.clone();

        let stale = apply(&mut state, &sample_at(7.0, Some(2000.0), t0 + Duration::seconds(5)));
        assert!(!stale.accepted);
        assert!(stale.crossings.is_empty());
        assert_eq!(state.last_distance_nm, before_distance);
        assert_eq!(state.crossed, before_crossed);
    }

    #[test]
    fn test_go_around_resets_episode() {
        let t0 = base_time();
        let mut state = ApproachState::new(t0);

        apply(&mut state, &sample_at(12.0, Some(3000.0), t0));
        let inbound = apply(&mut state, &sample_at(9.0, Some(2500.0), t0 + Duration::seconds(10)));
        assert_eq!(crossed_thresholds(&inbound), vec![10.0]);
        let first_episode = inbound.episode_id;

        // Two consecutive samples climbing with distance opening up
        apply(&mut state, &sample_at(10.2, Some(2700.0), t0 + Duration::seconds(20)));
        let reset = apply(&mut state, &sample_at(11.5, Some(2900.0), t0 + Duration::seconds(30)));
        assert_ne!(reset.episode_id, first_episode);
        assert!(state.crossed.is_empty());

        // Coming back around from outside the band, descending: 10nm refires
        let again = apply(&mut state, &sample_at(9.0, Some(2700.0), t0 + Duration::seconds(40)));
        assert_eq!(crossed_thresholds(&again), vec![10.0]);
    }

    #[test]
    fn test_outbound_traffic_updates_state_without_alerts() {
        let t0 = base_time();
        let mut state = ApproachState::new(t0);

        apply(&mut state, &sample_at(8.0, Some(2000.0), t0));
        // Departing: 3nm further out, level
        let outbound = apply(&mut state, &sample_at(11.0, Some(2010.0), t0 + Duration::seconds(10)));
        assert!(outbound.accepted);
        assert!(outbound.crossings.is_empty());
        assert!((state.last_distance_nm.unwrap() - 11.0).abs() < 0.05);
    }

    #[test]
    fn test_on_ground_sample_never_alerts() {
        let t0 = base_time();
        let mut state = ApproachState::new(t0);

        apply(&mut state, &sample_at(12.0, Some(3000.0), t0));
        let mut taxiing = sample_at(1.0, Some(1300.0), t0 + Duration::seconds(10));
        taxiing.on_ground = true;
        let result = apply(&mut state, &taxiing);
        assert!(result.crossings.is_empty());
    }

    #[test]
    fn test_first_sample_inside_thresholds_is_silent() {
        // No previous altitude means the descent gate is unknown
        let t0 = base_time();
        let mut state = ApproachState::new(t0);
        let result = apply(&mut state, &sample_at(4.0, Some(1500.0), t0));
        assert!(result.crossings.is_empty());
    }
}
