//! Growable ordered set of watched connections.
//!
//! Every entry is keyed by the `mio::Token` it is registered under and
//! carries the readiness the poller last reported for it. The listener
//! and waker live on reserved tokens outside the set.
//!
//! # Removal during iteration
//!
//! Entries are removed by swap-remove: the last entry moves into the
//! vacated slot. The visiting methods handle this by staying on the same
//! index after a removal, so the moved entry is still visited in the
//! current pass. Removed entries are handed back to the caller, which
//! deregisters and drops them.
//!
//! # Capacity
//!
//! Capacity is tracked explicitly and doubles when full. A failed
//! reservation is reported as `WatchSetError` and leaves existing
//! entries untouched.

use std::collections::HashMap;

use mio::event::Event;
use mio::Token;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchSetError {
    #[error("Watch set capacity overflow at {capacity} entries")]
    CapacityOverflow { capacity: usize },

    #[error("Failed to grow watch set to {requested} entries")]
    AllocationFailed { requested: usize },
}

/// Readiness reported by the poller since an entry was last visited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub closed: bool,
    pub error: bool,
}

impl Readiness {
    pub fn from_event(event: &Event) -> Self {
        Self {
            readable: event.is_readable(),
            writable: event.is_writable(),
            closed: event.is_read_closed() || event.is_write_closed(),
            error: event.is_error(),
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.readable || self.writable || self.closed || self.error)
    }

    fn merge(&mut self, other: Readiness) {
        self.readable |= other.readable;
        self.writable |= other.writable;
        self.closed |= other.closed;
        self.error |= other.error;
    }
}

/// Visitor verdict for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retain {
    Keep,
    Remove,
}

#[derive(Debug)]
struct Slot<T> {
    token: Token,
    ready: Readiness,
    value: T,
}

#[derive(Debug)]
pub struct WatchSet<T> {
    slots: Vec<Slot<T>>,
    positions: HashMap<Token, usize>,
    capacity: usize,
    next_token: usize,
}

impl<T> WatchSet<T> {
    /// Creates a set that hands out tokens starting at `first_token`.
    pub fn new(initial_capacity: usize, first_token: usize) -> Self {
        let capacity = initial_capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            positions: HashMap::with_capacity(capacity),
            capacity,
            next_token: first_token,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Adds an entry, doubling capacity first if the set is full.
    pub fn insert(&mut self, value: T) -> Result<Token, WatchSetError> {
        if self.slots.len() >= self.capacity {
            self.grow()?;
        }

        let token = Token(self.next_token);
        self.next_token = self.next_token.wrapping_add(1);
        self.positions.insert(token, self.slots.len());
        self.slots.push(Slot {
            token,
            ready: Readiness::default(),
            value,
        });
        Ok(token)
    }

    fn grow(&mut self) -> Result<(), WatchSetError> {
        let requested = self
            .capacity
            .checked_mul(2)
            .ok_or(WatchSetError::CapacityOverflow {
                capacity: self.capacity,
            })?;
        let additional = requested.saturating_sub(self.slots.len());

        self.slots
            .try_reserve_exact(additional)
            .map_err(|_| WatchSetError::AllocationFailed { requested })?;
        self.positions
            .try_reserve(additional)
            .map_err(|_| WatchSetError::AllocationFailed { requested })?;

        self.capacity = requested;
        Ok(())
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut T> {
        let index = *self.positions.get(&token)?;
        self.slots.get_mut(index).map(|slot| &mut slot.value)
    }

    /// Records readiness for an entry. Unknown tokens are ignored and
    /// reported with `false`.
    pub fn mark_ready(&mut self, token: Token, ready: Readiness) -> bool {
        let Some(&index) = self.positions.get(&token) else {
            return false;
        };
        match self.slots.get_mut(index) {
            Some(slot) => {
                slot.ready.merge(ready);
                true
            }
            None => false,
        }
    }

    /// Swap-removes the entry at `index`.
    pub fn remove_at(&mut self, index: usize) -> Option<(Token, T)> {
        if index >= self.slots.len() {
            return None;
        }
        let removed = self.slots.swap_remove(index);
        self.positions.remove(&removed.token);
        if let Some(moved) = self.slots.get(index) {
            self.positions.insert(moved.token, index);
        }
        Some((removed.token, removed.value))
    }

    pub fn remove(&mut self, token: Token) -> Option<T> {
        let index = *self.positions.get(&token)?;
        self.remove_at(index).map(|(_, value)| value)
    }

    /// Visits every entry with pending readiness, clearing it.
    ///
    /// Returns the entries the visitor asked to remove.
    pub fn for_each_ready<F>(&mut self, mut visit: F) -> Vec<(Token, T)>
    where
        F: FnMut(Token, &mut T, Readiness) -> Retain,
    {
        self.visit(|token, value, ready| {
            if ready.is_empty() {
                Retain::Keep
            } else {
                visit(token, value, ready)
            }
        })
    }

    /// Visits every entry, clearing pending readiness.
    ///
    /// Returns the entries the visitor asked to remove.
    pub fn for_each<F>(&mut self, mut visit: F) -> Vec<(Token, T)>
    where
        F: FnMut(Token, &mut T) -> Retain,
    {
        self.visit(|token, value, _| visit(token, value))
    }

    fn visit<F>(&mut self, mut visit: F) -> Vec<(Token, T)>
    where
        F: FnMut(Token, &mut T, Readiness) -> Retain,
    {
        let mut removed = Vec::new();
        let mut index = 0;
        while let Some(slot) = self.slots.get_mut(index) {
            let ready = std::mem::take(&mut slot.ready);
            match visit(slot.token, &mut slot.value, ready) {
                Retain::Keep => index += 1,
                Retain::Remove => {
                    // The former last entry now sits at `index`.
                    if let Some(entry) = self.remove_at(index) {
                        removed.push(entry);
                    }
                }
            }
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = (Token, &T)> {
        self.slots.iter().map(|slot| (slot.token, &slot.value))
    }

    /// Removes every entry.
    pub fn drain(&mut self) -> Vec<(Token, T)> {
        self.positions.clear();
        self.slots
            .drain(..)
            .map(|slot| (slot.token, slot.value))
            .collect()
    }
}
