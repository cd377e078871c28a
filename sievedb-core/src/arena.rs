//! Typed slot arena addressed by stable integer handles.
//!
//! Bitset representations live here instead of behind plain references so
//! that a bitset can be reallocated (list growth, dense upgrade) while readers
//! keep working on whatever they resolved earlier. A [`Handle`] carries the
//! slot index and the slot's generation; once a slot is retired its
//! generation moves on and old handles stop resolving.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};

/// Stable reference to an arena slot.
///
/// Packs `index + 1` in the low 32 bits and the generation in the high
/// 32 bits, so the all-zero value is never a live slot and serves as null.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle(u64);

impl Handle {
    /// The null handle.
    pub const NULL: Handle = Handle(0);

    #[inline]
    fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64 + 1))
    }

    /// Rebuilds a handle from [`Handle::to_raw`] output.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the packed representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Returns true for the null handle.
    #[inline]
    pub fn is_null(self) -> bool {
        self.0 as u32 == 0
    }

    #[inline]
    fn index(self) -> Option<usize> {
        match self.0 as u32 {
            0 => None,
            i => Some(i as usize - 1),
        }
    }

    #[inline]
    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index() {
            None => write!(f, "Handle(null)"),
            Some(i) => write!(f, "Handle({}@{})", i, self.generation()),
        }
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<Arc<T>>,
}

/// Arena of `Arc<T>` slots with a free list.
///
/// Slot contents are swapped whole, never mutated in place through the
/// arena; anything a reader resolved stays valid for as long as it holds the
/// `Arc`. Allocation is the only operation that takes the arena-wide write
/// lock, everything else locks a single slot.
#[derive(Debug)]
pub struct Arena<T> {
    slots: RwLock<Vec<Mutex<Slot<T>>>>,
    free: Mutex<Vec<u32>>,
    capacity: usize,
    live: AtomicUsize,
}

impl<T> Arena<T> {
    /// Creates an arena that holds at most `capacity` live slots.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            free: Mutex::new(Vec::new()),
            capacity: capacity.min(u32::MAX as usize - 1),
            live: AtomicUsize::new(0),
        }
    }

    /// Maximum number of live slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently holding a value.
    #[inline]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Stores `value` in a free slot and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ArenaExhausted`] when every slot is live.
    pub fn allocate(&self, value: T) -> Result<Handle> {
        let value = Arc::new(value);

        let reused = self.free.lock().pop();
        if let Some(index) = reused {
            let slots = self.slots.read();
            let mut slot = slots[index as usize].lock();
            slot.value = Some(value);
            self.live.fetch_add(1, Ordering::Relaxed);
            return Ok(Handle::new(index, slot.generation));
        }

        let mut slots = self.slots.write();
        if slots.len() >= self.capacity {
            tracing::warn!(capacity = self.capacity, "arena exhausted");
            return Err(Error::ArenaExhausted {
                capacity: self.capacity,
            });
        }
        let index = slots.len() as u32;
        slots.push(Mutex::new(Slot {
            generation: 0,
            value: Some(value),
        }));
        self.live.fetch_add(1, Ordering::Relaxed);
        Ok(Handle::new(index, 0))
    }

    /// Returns the value currently stored under `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleHandle`] for the null handle or a handle whose
    /// slot has been retired since it was issued.
    pub fn resolve(&self, handle: Handle) -> Result<Arc<T>> {
        let index = handle.index().ok_or(Error::StaleHandle(handle))?;
        let slots = self.slots.read();
        let slot = slots.get(index).ok_or(Error::StaleHandle(handle))?.lock();
        if slot.generation != handle.generation() {
            return Err(Error::StaleHandle(handle));
        }
        slot.value.clone().ok_or(Error::StaleHandle(handle))
    }

    /// Swaps the value behind `handle`, keeping the handle valid.
    pub fn replace(&self, handle: Handle, value: T) -> Result<()> {
        let index = handle.index().ok_or(Error::StaleHandle(handle))?;
        let slots = self.slots.read();
        let mut slot = slots.get(index).ok_or(Error::StaleHandle(handle))?.lock();
        if slot.generation != handle.generation() || slot.value.is_none() {
            return Err(Error::StaleHandle(handle));
        }
        slot.value = Some(Arc::new(value));
        Ok(())
    }

    /// Releases the slot behind `handle` for reuse.
    ///
    /// Readers holding an `Arc` from an earlier `resolve` are unaffected;
    /// the handle itself stops resolving.
    pub fn retire(&self, handle: Handle) -> Result<()> {
        let index = handle.index().ok_or(Error::StaleHandle(handle))?;
        {
            let slots = self.slots.read();
            let mut slot = slots.get(index).ok_or(Error::StaleHandle(handle))?.lock();
            if slot.generation != handle.generation() || slot.value.is_none() {
                return Err(Error::StaleHandle(handle));
            }
            slot.value = None;
            slot.generation = slot.generation.wrapping_add(1);
        }
        self.live.fetch_sub(1, Ordering::Relaxed);
        self.free.lock().push(index as u32);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_resolve() {
        let arena = Arena::with_capacity(4);
        let a = arena.allocate("a".to_string()).unwrap();
        let b = arena.allocate("b".to_string()).unwrap();

        assert_ne!(a, b);
        assert!(!a.is_null());
        assert_eq!(*arena.resolve(a).unwrap(), "a");
        assert_eq!(*arena.resolve(b).unwrap(), "b");
        assert_eq!(arena.live(), 2);
    }

    #[test]
    fn test_null_handle() {
        let arena: Arena<u32> = Arena::with_capacity(1);
        assert!(Handle::NULL.is_null());
        assert_eq!(Handle::default(), Handle::NULL);
        assert!(matches!(
            arena.resolve(Handle::NULL),
            Err(Error::StaleHandle(_))
        ));
    }

    #[test]
    fn test_replace_keeps_handle() {
        let arena = Arena::with_capacity(2);
        let h = arena.allocate(1u32).unwrap();
        let before = arena.resolve(h).unwrap();

        arena.replace(h, 2).unwrap();

        assert_eq!(*arena.resolve(h).unwrap(), 2);
        // Earlier snapshot is untouched.
        assert_eq!(*before, 1);
    }

    #[test]
    fn test_retire_invalidates_and_reuses() {
        let arena = Arena::with_capacity(1);
        let old = arena.allocate(10u32).unwrap();
        arena.retire(old).unwrap();
        assert_eq!(arena.live(), 0);
        assert!(matches!(arena.resolve(old), Err(Error::StaleHandle(_))));
        assert!(arena.retire(old).is_err());

        let new = arena.allocate(20u32).unwrap();
        assert_ne!(old, new);
        assert_eq!(*arena.resolve(new).unwrap(), 20);
        assert!(arena.replace(old, 30).is_err());
    }

    #[test]
    fn test_exhaustion() {
        let arena = Arena::with_capacity(2);
        arena.allocate(1u8).unwrap();
        arena.allocate(2u8).unwrap();

        let err = arena.allocate(3u8).unwrap_err();
        assert!(matches!(err, Error::ArenaExhausted { capacity: 2 }));
    }

    #[test]
    fn test_raw_round_trip() {
        let arena = Arena::with_capacity(8);
        let h = arena.allocate(()).unwrap();
        assert_eq!(Handle::from_raw(h.to_raw()), h);
        assert_eq!(format!("{:?}", h), "Handle(0@0)");
        assert_eq!(format!("{:?}", Handle::NULL), "Handle(null)");
    }
}
