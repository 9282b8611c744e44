//! Source registry guarded by a single lock.
//!
//! The registry is the shared state between the update scheduler (one
//! task per source, mutating) and the broadcast loop (reading). It is
//! handed around as an `Arc<SourceRegistry>`; sources are fixed at
//! construction and never added or removed.
//!
//! # Locking
//!
//! One exclusive lock covers every source plus the process-wide random
//! generator. Every critical section is a field copy or a single update
//! step: no I/O, no sleeping and no `.await` while the lock is held.
//! Readers copy the latest reading out and release the lock before
//! encoding or sending it.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A poisoned lock surfaces as `RegistryError::LockPoisoned`

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, info};

use tsim_core::{Reading, Source, SourceId, SourceKind};

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Registry lock poisoned by a panicked holder")]
    LockPoisoned,

    #[error("No source at index {index} (registry holds {len})")]
    NoSuchSource { index: usize, len: usize },
}

/// Scheduling facts about one source, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePlan {
    pub index: usize,
    pub id: SourceId,
    pub kind: SourceKind,
    pub interval: Duration,
    pub active: bool,
}

struct RegistryState {
    sources: Vec<Source>,
    rng: StdRng,
}

/// Ordered collection of sources behind one mutual-exclusion lock.
pub struct SourceRegistry {
    state: Mutex<RegistryState>,
    len: usize,
}

impl SourceRegistry {
    /// Creates a registry with a random generator seeded once from `seed`,
    /// or from the operating system if `None`.
    pub fn new(sources: Vec<Source>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self::with_rng(sources, rng)
    }

    pub fn with_rng(sources: Vec<Source>, rng: StdRng) -> Self {
        let len = sources.len();
        Self {
            state: Mutex::new(RegistryState { sources, rng }),
            len,
        }
    }

    /// Number of sources; constant for the registry's lifetime.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, RegistryState>, RegistryError> {
        self.state.lock().map_err(|_| RegistryError::LockPoisoned)
    }

    fn missing(&self, index: usize) -> RegistryError {
        RegistryError::NoSuchSource {
            index,
            len: self.len,
        }
    }

    /// Runs `f` on one source while holding the lock.
    ///
    /// `f` must be a short, non-blocking field access.
    pub fn with_source<R>(
        &self,
        index: usize,
        f: impl FnOnce(&mut Source) -> R,
    ) -> Result<R, RegistryError> {
        let mut state = self.lock()?;
        let source = state
            .sources
            .get_mut(index)
            .ok_or_else(|| self.missing(index))?;
        Ok(f(source))
    }

    /// Advances one source a single tick.
    ///
    /// Returns the new reading, or `None` if the source is inactive.
    pub fn update(&self, index: usize) -> Result<Option<Reading>, RegistryError> {
        let mut guard = self.lock()?;
        let RegistryState { sources, rng } = &mut *guard;
        let source = sources.get_mut(index).ok_or_else(|| self.missing(index))?;
        Ok(source.update(rng))
    }

    /// Returns a copy of the latest reading, or `None` if the source is
    /// inactive.
    pub fn latest_reading(&self, index: usize) -> Result<Option<Reading>, RegistryError> {
        self.with_source(index, |source| {
            source.active.then(|| source.latest_reading())
        })
    }

    pub fn set_active(&self, index: usize, active: bool) -> Result<(), RegistryError> {
        self.with_source(index, |source| source.active = active)
    }

    /// Returns the scheduling facts of every source, in registry order.
    pub fn plan(&self) -> Result<Vec<SourcePlan>, RegistryError> {
        let state = self.lock()?;
        Ok(state
            .sources
            .iter()
            .enumerate()
            .map(|(index, s)| SourcePlan {
                index,
                id: s.id,
                kind: s.kind,
                interval: s.update_interval,
                active: s.active,
            })
            .collect())
    }

    /// Updates every active source once so the first broadcast has data.
    ///
    /// Returns the number of sources primed.
    pub fn prime(&self) -> Result<usize, RegistryError> {
        let mut guard = self.lock()?;
        let RegistryState { sources, rng } = &mut *guard;

        let mut primed = 0;
        for source in sources.iter_mut() {
            if let Some(reading) = source.update(rng) {
                debug!(source_id = %reading.id, kind = %reading.kind, "Primed source");
                primed += 1;
            }
        }
        info!(primed, total = self.len, "Initial readings computed");
        Ok(primed)
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}
