// src/recorder/filter.rs
//! Position filter: decides which fixes make it into the track

use crate::hike::TrackPoint;
use serde::{Deserialize, Serialize};

/// Thresholds for accepting a fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Fixes less accurate than this are dropped outright
    pub max_accuracy_m: f64,
    /// Minimum spacing between accepted fixes
    pub min_interval_secs: f64,
    /// Movements shorter than this are treated as GPS jitter
    pub min_movement_m: f64,
    /// Anything faster is a position spike, not a hiker (~25 km/h)
    pub max_speed_mps: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: 50.0,
            min_interval_secs: 1.0,
            min_movement_m: 2.0,
            max_speed_mps: 7.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectReason {
    LowAccuracy { accuracy_m: f64 },
    OutOfOrder { interval_secs: f64 },
    TooSoon { interval_secs: f64 },
    Jitter { distance_m: f64 },
    SpeedSpike { speed_mps: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterOutcome {
    /// Append the point and add `segment_m` to the distance
    Accepted { segment_m: f64 },
    Rejected(RejectReason),
}

impl FilterOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, FilterOutcome::Accepted { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct PositionFilter {
    config: FilterConfig,
}

impl PositionFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Judge `candidate` against the last accepted point.
    ///
    /// A zero interval (same timestamp as the last point) is accepted with no
    /// distance so a duplicate report never counts twice.
    pub fn evaluate(&self, candidate: &TrackPoint, last: Option<&TrackPoint>) -> FilterOutcome {
        // NaN accuracy fails this comparison too
        if !(candidate.accuracy <= self.config.max_accuracy_m) {
            return FilterOutcome::Rejected(RejectReason::LowAccuracy {
                accuracy_m: candidate.accuracy,
            });
        }

        let last = match last {
            Some(last) => last,
            None => return FilterOutcome::Accepted { segment_m: 0.0 },
        };

        let interval_secs = last.seconds_until(candidate);
        if interval_secs < 0.0 {
            return FilterOutcome::Rejected(RejectReason::OutOfOrder { interval_secs });
        }
        if interval_secs == 0.0 {
            return FilterOutcome::Accepted { segment_m: 0.0 };
        }
        if interval_secs < self.config.min_interval_secs {
            return FilterOutcome::Rejected(RejectReason::TooSoon { interval_secs });
        }

        let distance_m = last.distance_to(candidate);
        if distance_m < self.config.min_movement_m {
            return FilterOutcome::Rejected(RejectReason::Jitter { distance_m });
        }

        let speed_mps = distance_m / interval_secs;
        if speed_mps > self.config.max_speed_mps {
            return FilterOutcome::Rejected(RejectReason::SpeedSpike { speed_mps });
        }

        FilterOutcome::Accepted { segment_m: distance_m }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::offset_meters;
    use chrono::{DateTime, TimeZone, Utc};

    const LAT: f64 = 46.55;
    const LON: f64 = 7.98;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 3, 7, 30, 0).unwrap()
    }

    fn point(ms: i64, north_m: f64, accuracy: f64) -> TrackPoint {
        let (latitude, longitude) = offset_meters(LAT, LON, north_m, 0.0);
        TrackPoint {
            latitude,
            longitude,
            timestamp: t0() + chrono::Duration::milliseconds(ms),
            accuracy,
        }
    }

    #[test]
    fn test_first_fix_accepted_without_distance() {
        let filter = PositionFilter::default();
        assert_eq!(
            filter.evaluate(&point(0, 0.0, 10.0), None),
            FilterOutcome::Accepted { segment_m: 0.0 }
        );
    }

    #[test]
    fn test_low_accuracy_rejected_even_first() {
        let filter = PositionFilter::default();
        assert!(matches!(
            filter.evaluate(&point(0, 0.0, 50.1), None),
            FilterOutcome::Rejected(RejectReason::LowAccuracy { .. })
        ));
        assert!(matches!(
            filter.evaluate(&point(0, 0.0, f64::NAN), None),
            FilterOutcome::Rejected(RejectReason::LowAccuracy { .. })
        ));
        assert!(filter.evaluate(&point(0, 0.0, 50.0), None).is_accepted());
    }

    #[test]
    fn test_normal_step_accepted() {
        let filter = PositionFilter::default();
        let a = point(0, 0.0, 10.0);
        let b = point(3_000, 10.0, 10.0);
        match filter.evaluate(&b, Some(&a)) {
            FilterOutcome::Accepted { segment_m } => assert!((segment_m - 10.0).abs() < 0.01),
            other => panic!("expected accept, got {:?}", other),
        }
    }

    #[test]
    fn test_too_soon_rejected() {
        let filter = PositionFilter::default();
        let a = point(0, 0.0, 10.0);
        let b = point(500, 3.0, 10.0);
        assert!(matches!(
            filter.evaluate(&b, Some(&a)),
            FilterOutcome::Rejected(RejectReason::TooSoon { .. })
        ));
    }

    #[test]
    fn test_zero_interval_skips_distance() {
        let filter = PositionFilter::default();
        let a = point(0, 0.0, 10.0);
        let b = point(0, 30.0, 10.0);
        assert_eq!(
            filter.evaluate(&b, Some(&a)),
            FilterOutcome::Accepted { segment_m: 0.0 }
        );
    }

    #[test]
    fn test_out_of_order_rejected() {
        let filter = PositionFilter::default();
        let a = point(5_000, 0.0, 10.0);
        let b = point(1_000, 5.0, 10.0);
        assert!(matches!(
            filter.evaluate(&b, Some(&a)),
            FilterOutcome::Rejected(RejectReason::OutOfOrder { .. })
        ));
    }

    #[test]
    fn test_jitter_rejected() {
        let filter = PositionFilter::default();
        let a = point(0, 0.0, 10.0);
        let b = point(2_000, 1.5, 10.0);
        assert!(matches!(
            filter.evaluate(&b, Some(&a)),
            FilterOutcome::Rejected(RejectReason::Jitter { .. })
        ));
    }

    #[test]
    fn test_speed_spike_rejected() {
        let filter = PositionFilter::default();
        let a = point(0, 0.0, 10.0);
        let b = point(1_000, 500.0, 10.0);
        match filter.evaluate(&b, Some(&a)) {
            FilterOutcome::Rejected(RejectReason::SpeedSpike { speed_mps }) => {
                assert!(speed_mps > 400.0)
            }
            other => panic!("expected speed spike, got {:?}", other),
        }
    }

    #[test]
    fn test_accepted_pairs_respect_speed_limit() {
        let filter = PositionFilter::default();
        let mut last: Option<TrackPoint> = None;
        let mut accepted = Vec::new();
        // Mix of plausible steps and spikes
        let steps = [0.0, 5.0, 120.0, 12.0, 3.0, 60.0, 8.0, 1.0, 15.0];
        let mut north = 0.0;
        for (i, step) in steps.iter().enumerate() {
            north += step;
            let candidate = point(i as i64 * 2_000, north, 8.0);
            if filter.evaluate(&candidate, last.as_ref()).is_accepted() {
                accepted.push(candidate);
                last = Some(candidate);
            }
        }

        assert!(accepted.len() > 1);
        for pair in accepted.windows(2) {
            let speed = pair[0].distance_to(&pair[1]) / pair[0].seconds_until(&pair[1]);
            assert!(speed <= 7.0, "speed {} between accepted points", speed);
        }
    }

    #[test]
    fn test_custom_thresholds() {
        let filter = PositionFilter::new(FilterConfig {
            max_accuracy_m: 20.0,
            ..FilterConfig::default()
        });
        assert!(!filter.evaluate(&point(0, 0.0, 25.0), None).is_accepted());
        assert_eq!(filter.config().max_speed_mps, 7.0);
    }
}
