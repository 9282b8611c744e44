//! Update functions for simulated sources.
//!
//! Every kind follows the same shape: take the current value, apply a
//! bounded uniform perturbation, then re-establish the range invariant.
//! The random generator is passed in so the caller decides how it is
//! seeded and shared.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use tracing::warn;

use crate::reading::{Reading, ReadingValue, StatusText};
use crate::source::{GpsState, ScalarState, Source, SourceKind, SourceState, StatusState};

/// Emitted by status sources with no configured candidates.
pub const NO_STATUSES_SENTINEL: &str = "NO_STATUSES_CONFIGURED";

/// Timestamp used when the wall clock cannot be read.
pub const TIMESTAMP_UNAVAILABLE: i64 = -1;

/// Returns the wall-clock time in epoch milliseconds.
///
/// A clock set before the epoch yields [`TIMESTAMP_UNAVAILABLE`].
pub fn current_time_millis() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_millis()).unwrap_or(TIMESTAMP_UNAVAILABLE),
        Err(e) => {
            warn!(error = %e, "System clock is before the epoch");
            TIMESTAMP_UNAVAILABLE
        }
    }
}

/// Uniform sample in `[-step, step]`; zero for a non-positive or
/// non-finite step.
fn perturbation_f32<R: Rng>(rng: &mut R, step: f32) -> f32 {
    if step.is_finite() && step > 0.0 {
        rng.random_range(-step..=step)
    } else {
        0.0
    }
}

fn perturbation_f64<R: Rng>(rng: &mut R, step: f64) -> f64 {
    if step.is_finite() && step > 0.0 {
        rng.random_range(-step..=step)
    } else {
        0.0
    }
}

/// Random-walks a scalar and clamps it to `[min, max]`.
pub fn step_scalar<R: Rng>(state: &mut ScalarState, rng: &mut R) -> f32 {
    let delta = perturbation_f32(rng, state.max_step);
    // f32::clamp panics on inverted or NaN bounds
    state.current = (state.current + delta).max(state.min).min(state.max);
    state.current
}

/// Drifts a GPS position: latitude clamps at the poles, longitude wraps
/// across the antimeridian into `(-180, 180]`.
pub fn step_gps<R: Rng>(state: &mut GpsState, rng: &mut R) -> (f64, f64) {
    let lat = state.lat + perturbation_f64(rng, state.max_step);
    let lon = state.lon + perturbation_f64(rng, state.max_step);

    state.lat = lat.clamp(-90.0, 90.0);
    state.lon = wrap_longitude(lon);
    (state.lat, state.lon)
}

/// Wraps a longitude into `(-180, 180]`.
pub fn wrap_longitude(lon: f64) -> f64 {
    if !lon.is_finite() {
        return 0.0;
    }
    let mut wrapped = lon;
    while wrapped > 180.0 {
        wrapped -= 360.0;
    }
    while wrapped <= -180.0 {
        wrapped += 360.0;
    }
    wrapped
}

/// Picks a status uniformly among the candidates.
pub fn pick_status<R: Rng>(state: &StatusState, rng: &mut R) -> StatusText {
    if state.is_empty() {
        return StatusText::new(NO_STATUSES_SENTINEL);
    }
    let index = rng.random_range(0..state.count());
    state
        .statuses()
        .get(index)
        .copied()
        .unwrap_or_else(|| StatusText::new(NO_STATUSES_SENTINEL))
}

impl Source {
    /// Advances the source one tick and stamps a new latest reading.
    ///
    /// Returns `None` without touching any state if the source is inactive.
    /// A state that does not belong to the source's kind produces an
    /// [`ReadingValue::Empty`] reading, which consumers treat as no data.
    pub fn update<R: Rng>(&mut self, rng: &mut R) -> Option<Reading> {
        if !self.active {
            return None;
        }

        let value = match (&mut self.state, self.kind) {
            (SourceState::Scalar(s), kind) if kind.is_scalar() => {
                ReadingValue::Scalar(step_scalar(s, rng))
            }
            (SourceState::Gps(g), SourceKind::Gps) => {
                let (lat, lon) = step_gps(g, rng);
                ReadingValue::Gps { lat, lon }
            }
            (SourceState::Status(s), SourceKind::Status) => {
                ReadingValue::Status(pick_status(s, rng))
            }
            _ => {
                warn!(
                    source_id = %self.id,
                    kind = %self.kind,
                    "Source state does not match its kind, emitting empty reading"
                );
                ReadingValue::Empty
            }
        };

        self.latest = Reading {
            id: self.id,
            kind: self.kind,
            timestamp_ms: current_time_millis(),
            value,
        };
        Some(self.latest)
    }
}
