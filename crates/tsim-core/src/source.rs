//! Simulated instruments and their per-kind state.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::reading::{Reading, StatusText};

/// Capacity of the bounded status candidate list.
pub const MAX_STATUSES: usize = 8;

// ============================================================================
// Identity
// ============================================================================

/// Stable identifier of a source, unique within the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(u32);

impl SourceId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SourceId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

// ============================================================================
// Kind
// ============================================================================

/// Variant tag of a source.
///
/// The discriminants are the wire tags and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SourceKind {
    Temperature = 0,
    Pressure = 1,
    Humidity = 2,
    Gps = 3,
    Status = 4,
}

impl SourceKind {
    /// All kinds in tag order.
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Temperature,
        SourceKind::Pressure,
        SourceKind::Humidity,
        SourceKind::Gps,
        SourceKind::Status,
    ];

    /// Returns the wire tag.
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Looks up a kind by wire tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    /// Returns true for kinds that carry a single float.
    pub fn is_scalar(self) -> bool {
        matches!(
            self,
            SourceKind::Temperature | SourceKind::Pressure | SourceKind::Humidity
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Temperature => "temperature",
            SourceKind::Pressure => "pressure",
            SourceKind::Humidity => "humidity",
            SourceKind::Gps => "gps",
            SourceKind::Status => "status",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::UnknownKind(s.to_string()))
    }
}

// ============================================================================
// Per-kind State
// ============================================================================

/// State of a temperature, pressure or humidity source.
///
/// Invariant: `min <= current <= max` after every update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarState {
    pub current: f32,
    pub min: f32,
    pub max: f32,
    pub max_step: f32,
}

/// State of a GPS source.
///
/// Invariant: latitude in `[-90, 90]`, longitude in `(-180, 180]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsState {
    pub lat: f64,
    pub lon: f64,
    /// Degrees per tick
    pub max_step: f64,
}

/// State of a status source: a bounded ordered candidate list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusState {
    statuses: Vec<StatusText>,
}

impl StatusState {
    /// Builds the candidate list.
    ///
    /// Fails if more than [`MAX_STATUSES`] candidates are given. Candidates
    /// longer than the status field are truncated.
    pub fn new<S: AsRef<str>>(id: SourceId, statuses: &[S]) -> DomainResult<Self> {
        if statuses.len() > MAX_STATUSES {
            return Err(DomainError::TooManyStatuses {
                id,
                count: statuses.len(),
                max: MAX_STATUSES,
            });
        }
        Ok(Self {
            statuses: statuses
                .iter()
                .map(|s| StatusText::new(s.as_ref()))
                .collect(),
        })
    }

    pub fn statuses(&self) -> &[StatusText] {
        &self.statuses
    }

    pub fn count(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}

/// Mutable per-kind state of a source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceState {
    Scalar(ScalarState),
    Gps(GpsState),
    Status(StatusState),
}

impl SourceState {
    fn name(&self) -> &'static str {
        match self {
            SourceState::Scalar(_) => "scalar",
            SourceState::Gps(_) => "gps",
            SourceState::Status(_) => "status",
        }
    }

    fn fits(&self, kind: SourceKind) -> bool {
        match self {
            SourceState::Scalar(_) => kind.is_scalar(),
            SourceState::Gps(_) => kind == SourceKind::Gps,
            SourceState::Status(_) => kind == SourceKind::Status,
        }
    }
}

// ============================================================================
// Source
// ============================================================================

/// One simulated instrument.
///
/// `latest` is written only by the update path and read only through
/// [`Source::latest_reading`], which hands out a copy.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub id: SourceId,
    pub kind: SourceKind,
    pub active: bool,
    pub update_interval: Duration,
    pub state: SourceState,
    pub(crate) latest: Reading,
}

impl Source {
    /// Creates a validated, active source.
    ///
    /// # Errors
    ///
    /// - `DomainError::KindMismatch` if `state` does not belong to `kind`
    /// - `DomainError::InvalidFieldValue` if a range invariant does not hold
    pub fn new(
        id: SourceId,
        kind: SourceKind,
        state: SourceState,
        update_interval: Duration,
    ) -> DomainResult<Self> {
        if !state.fits(kind) {
            return Err(DomainError::KindMismatch {
                id,
                kind,
                state: state.name(),
            });
        }
        if update_interval.is_zero() {
            return Err(invalid(id, "update_interval", "0ms", "> 0ms"));
        }
        validate_state(id, &state)?;

        Ok(Self {
            id,
            kind,
            active: true,
            update_interval,
            state,
            latest: Reading::empty(id, kind),
        })
    }

    pub fn scalar(
        id: SourceId,
        kind: SourceKind,
        state: ScalarState,
        update_interval: Duration,
    ) -> DomainResult<Self> {
        Self::new(id, kind, SourceState::Scalar(state), update_interval)
    }

    pub fn gps(id: SourceId, state: GpsState, update_interval: Duration) -> DomainResult<Self> {
        Self::new(
            id,
            SourceKind::Gps,
            SourceState::Gps(state),
            update_interval,
        )
    }

    pub fn status(
        id: SourceId,
        state: StatusState,
        update_interval: Duration,
    ) -> DomainResult<Self> {
        Self::new(
            id,
            SourceKind::Status,
            SourceState::Status(state),
            update_interval,
        )
    }

    /// Returns a builder-style copy with the given active flag.
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Returns a copy of the most recent reading.
    pub fn latest_reading(&self) -> Reading {
        self.latest
    }
}

fn invalid(id: SourceId, field: &str, value: impl fmt::Display, expected: &str) -> DomainError {
    DomainError::InvalidFieldValue {
        id,
        field: field.to_string(),
        value: value.to_string(),
        expected: expected.to_string(),
    }
}

fn validate_state(id: SourceId, state: &SourceState) -> DomainResult<()> {
    match state {
        SourceState::Scalar(s) => {
            for (field, value) in [
                ("current", s.current),
                ("min", s.min),
                ("max", s.max),
                ("max_step", s.max_step),
            ] {
                if !value.is_finite() {
                    return Err(invalid(id, field, value, "a finite number"));
                }
            }
            if s.min > s.max {
                return Err(invalid(id, "min", s.min, "min <= max"));
            }
            if s.current < s.min || s.current > s.max {
                return Err(invalid(
                    id,
                    "current",
                    s.current,
                    &format!("value in [{}, {}]", s.min, s.max),
                ));
            }
            if s.max_step < 0.0 {
                return Err(invalid(id, "max_step", s.max_step, ">= 0"));
            }
        }
        SourceState::Gps(g) => {
            if !g.lat.is_finite() || !(-90.0..=90.0).contains(&g.lat) {
                return Err(invalid(id, "lat", g.lat, "value in [-90, 90]"));
            }
            if !g.lon.is_finite() || g.lon <= -180.0 || g.lon > 180.0 {
                return Err(invalid(id, "lon", g.lon, "value in (-180, 180]"));
            }
            if !g.max_step.is_finite() || !(0.0..=180.0).contains(&g.max_step) {
                return Err(invalid(id, "max_step", g.max_step, "value in [0, 180]"));
            }
        }
        SourceState::Status(s) => {
            if s.count() > MAX_STATUSES {
                return Err(DomainError::TooManyStatuses {
                    id,
                    count: s.count(),
                    max: MAX_STATUSES,
                });
            }
        }
    }
    Ok(())
}
