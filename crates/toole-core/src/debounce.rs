//! # Sensor Debouncer
//!
//! Converts the periodic, noisy weight signal into exactly one
//! [`DetectionEvent`] per genuine placement.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │           w > threshold                  stable == stable_reads         │
//! │   IDLE ───────────────────► ACCUMULATING ──────────────────────► ARMED  │
//! │    ▲                          │  w > threshold: stable += 1        │    │
//! │    │     w <= threshold       │                                    │    │
//! │    ├──────────────────────────┘                                    │    │
//! │    │     w <= threshold before dwell elapses (no event)            │    │
//! │    ├───────────────────────────────────────────────────────────────┤    │
//! │    │                                                               │    │
//! │    │     dwell elapsed while w > threshold ──► emit DetectionEvent │    │
//! │    │                                                               ▼    │
//! │    │                          removal_factor = None                     │
//! │    ├────────────────────────────────────────────────────────────────    │
//! │    │                          removal_factor = Some(f)                  │
//! │    │   w < threshold * f                                                │
//! │    └────────────────────── AWAITING_REMOVAL ◄───────────────────────    │
//! │                                                                         │
//! │   read failure: no transition, counter untouched                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two guards have to pass: a run of consecutive stable reads rejects
//! mechanical bounce, the dwell timer rejects a hand resting on the tray.
//! The dwell is measured between reading timestamps, so the machine is fully
//! deterministic under test.

use chrono::{DateTime, Duration, Utc};

use crate::types::{DetectionEvent, RawReading};

// =============================================================================
// Configuration
// =============================================================================

/// Debounce parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebounceConfig {
    /// Calibrated weight a reading must strictly exceed to count.
    pub threshold: i64,

    /// Consecutive above-threshold reads before arming (the first one counts).
    pub stable_reads: u32,

    /// How long the weight must stay up once armed.
    pub dwell: Duration,

    /// After firing, wait for the weight to fall below `threshold * factor`
    /// before accepting a new placement. `None` (the default) returns
    /// straight to idle.
    pub removal_factor: Option<f64>,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        DebounceConfig {
            threshold: 1000,
            stable_reads: 3,
            dwell: Duration::seconds(2),
            removal_factor: None,
        }
    }
}

// =============================================================================
// State
// =============================================================================

/// Where the debouncer currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Accumulating {
        stable: u32,
    },
    Armed {
        since: DateTime<Utc>,
        last_weight: i64,
    },
    AwaitingRemoval,
}

/// The debounce state machine.
#[derive(Debug, Clone)]
pub struct SensorDebouncer {
    config: DebounceConfig,
    state: DebounceState,
}

impl SensorDebouncer {
    pub fn new(config: DebounceConfig) -> Self {
        SensorDebouncer {
            config,
            state: DebounceState::Idle,
        }
    }

    pub fn config(&self) -> &DebounceConfig {
        &self.config
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    /// Drops any partial progress. Used when the capture workflow is left.
    pub fn reset(&mut self) {
        self.state = DebounceState::Idle;
    }

    /// A failed read is a non-event: nothing advances and nothing resets.
    pub fn on_read_failure(&mut self) {}

    /// Feeds one reading. Returns the detection event if this reading
    /// completed the dwell.
    pub fn on_reading(&mut self, reading: RawReading) -> Option<DetectionEvent> {
        let above = reading.weight_raw > self.config.threshold;

        match self.state {
            DebounceState::Idle => {
                if above {
                    self.accumulate(1, reading);
                }
                None
            }

            DebounceState::Accumulating { stable } => {
                if above {
                    self.accumulate(stable + 1, reading);
                } else {
                    self.state = DebounceState::Idle;
                }
                None
            }

            DebounceState::Armed { since, .. } => {
                if !above {
                    // Removed before the dwell completed
                    self.state = DebounceState::Idle;
                    return None;
                }

                if reading.timestamp - since >= self.config.dwell {
                    self.state = match self.config.removal_factor {
                        Some(_) => DebounceState::AwaitingRemoval,
                        None => DebounceState::Idle,
                    };
                    return Some(DetectionEvent {
                        timestamp: reading.timestamp,
                        weight_at_trigger: reading.weight_raw,
                    });
                }

                self.state = DebounceState::Armed {
                    since,
                    last_weight: reading.weight_raw,
                };
                None
            }

            DebounceState::AwaitingRemoval => {
                let factor = self.config.removal_factor.unwrap_or(1.0);
                let release = self.config.threshold as f64 * factor;
                if (reading.weight_raw as f64) < release {
                    self.state = DebounceState::Idle;
                }
                None
            }
        }
    }

    fn accumulate(&mut self, stable: u32, reading: RawReading) {
        self.state = if stable >= self.config.stable_reads {
            DebounceState::Armed {
                since: reading.timestamp,
                last_weight: reading.weight_raw,
            }
        } else {
            DebounceState::Accumulating { stable }
        };
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TICK_MS: i64 = 100;

    fn config(removal_factor: Option<f64>) -> DebounceConfig {
        DebounceConfig {
            threshold: 1000,
            stable_reads: 3,
            dwell: Duration::seconds(2),
            removal_factor,
        }
    }

    /// Feeds `weights` one tick apart and returns every event fired.
    fn feed(debouncer: &mut SensorDebouncer, start_tick: i64, weights: &[i64]) -> Vec<DetectionEvent> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        weights
            .iter()
            .enumerate()
            .filter_map(|(i, w)| {
                let at = t0 + Duration::milliseconds((start_tick + i as i64) * TICK_MS);
                debouncer.on_reading(RawReading::new(at, *w))
            })
            .collect()
    }

    #[test]
    fn test_placement_fires_once_after_dwell() {
        let mut d = SensorDebouncer::new(config(None));

        // [50, 1200, 1300, 1250] then 2s more at 1250
        let mut weights = vec![50, 1200, 1300, 1250];
        weights.extend(std::iter::repeat(1250).take(20));
        let events = feed(&mut d, 0, &weights);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].weight_at_trigger, 1250);
        assert_eq!(d.state(), DebounceState::Idle);
    }

    #[test]
    fn test_removal_during_dwell_suppresses_event() {
        let mut d = SensorDebouncer::new(config(None));

        // Armed on the 4th reading, 1s of dwell, then lifted off
        let mut weights = vec![50, 1200, 1300, 1250];
        weights.extend(std::iter::repeat(1250).take(10));
        weights.push(50);
        let events = feed(&mut d, 0, &weights);

        assert!(events.is_empty());
        assert_eq!(d.state(), DebounceState::Idle);
    }

    #[test]
    fn test_dip_while_accumulating_resets_counter() {
        let mut d = SensorDebouncer::new(config(None));

        feed(&mut d, 0, &[1200, 1300]);
        assert_eq!(d.state(), DebounceState::Accumulating { stable: 2 });

        feed(&mut d, 2, &[900]);
        assert_eq!(d.state(), DebounceState::Idle);

        feed(&mut d, 3, &[1200]);
        assert_eq!(d.state(), DebounceState::Accumulating { stable: 1 });
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut d = SensorDebouncer::new(config(None));
        feed(&mut d, 0, &[1000, 1000, 1000]);
        assert_eq!(d.state(), DebounceState::Idle);
    }

    #[test]
    fn test_read_failure_neither_advances_nor_resets() {
        let mut d = SensorDebouncer::new(config(None));
        feed(&mut d, 0, &[1200, 1300]);

        d.on_read_failure();
        d.on_read_failure();
        assert_eq!(d.state(), DebounceState::Accumulating { stable: 2 });

        feed(&mut d, 4, &[1250]);
        assert!(matches!(d.state(), DebounceState::Armed { .. }));
    }

    #[test]
    fn test_armed_tracks_last_weight() {
        let mut d = SensorDebouncer::new(config(None));
        feed(&mut d, 0, &[1200, 1300, 1250, 1260]);
        match d.state() {
            DebounceState::Armed { last_weight, .. } => assert_eq!(last_weight, 1260),
            other => panic!("expected Armed, got {other:?}"),
        }
    }

    #[test]
    fn test_without_removal_latch_a_resting_tool_fires_again() {
        let mut d = SensorDebouncer::new(config(None));
        let weights = vec![1250; 60];
        let events = feed(&mut d, 0, &weights);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_removal_latch_holds_until_weight_drops() {
        let mut d = SensorDebouncer::new(config(Some(0.5)));
        let weights = vec![1250; 60];
        let events = feed(&mut d, 0, &weights);
        assert_eq!(events.len(), 1);
        assert_eq!(d.state(), DebounceState::AwaitingRemoval);

        // 700 is below threshold but above the release point (500)
        feed(&mut d, 60, &[700]);
        assert_eq!(d.state(), DebounceState::AwaitingRemoval);

        feed(&mut d, 61, &[100]);
        assert_eq!(d.state(), DebounceState::Idle);

        let events = feed(&mut d, 62, &vec![1250; 25]);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_default_config_fires_again_after_shallow_dip() {
        let mut d = SensorDebouncer::new(DebounceConfig::default());

        // 800 is below the threshold but above where a 0.5 latch would release
        let mut weights = vec![1250; 25];
        weights.extend([800, 800, 800]);
        weights.extend(std::iter::repeat(1250).take(25));
        let events = feed(&mut d, 0, &weights);

        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_single_stable_read_arms_immediately() {
        let mut d = SensorDebouncer::new(DebounceConfig {
            stable_reads: 1,
            ..config(None)
        });
        feed(&mut d, 0, &[1200]);
        assert!(matches!(d.state(), DebounceState::Armed { .. }));
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let mut d = SensorDebouncer::new(config(None));
        feed(&mut d, 0, &[1200, 1300, 1250]);
        d.reset();
        assert_eq!(d.state(), DebounceState::Idle);
    }
}
