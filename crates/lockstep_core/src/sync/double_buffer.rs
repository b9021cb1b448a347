//! # Double-Buffered Values
//!
//! A buffered field keeps two slots and a generation counter:
//!
//! ```text
//!   generation g:   read slot = g & 1       write slot = (g & 1) ^ 1
//!
//!   set(x)          -> write slot = x, dirty
//!   get()           -> read slot (last published value)
//!   switch_buffer() -> if dirty: g += 1   (write slot becomes read slot)
//! ```
//!
//! Publishing is an index flip, never a copy. A field that was not written
//! during a tick keeps its generation, so the read slot stays valid and the
//! stale slot two generations back is never exposed (the cold buffer problem).
//!
//! ## Thread Safety
//!
//! Every cell owns a small `parking_lot` mutex, so update routines running in
//! parallel may `set`/`get` through a shared reference. Two routines writing
//! the *same* field in one tick still race last-writer-wins: keep one writer
//! per field per tick.

use std::fmt;

use parking_lot::Mutex;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Slot pair plus the generation that selects the read slot.
#[derive(Clone)]
struct Slots<T> {
    slots: [T; 2],
    generation: u64,
    dirty: bool,
}

impl<T> Slots<T> {
    #[inline]
    fn read_index(&self) -> usize {
        (self.generation & 1) as usize
    }

    #[inline]
    fn write_index(&self) -> usize {
        self.read_index() ^ 1
    }
}

/// A value with a write-stage slot and a separately published read slot.
///
/// ## Usage
///
/// ```rust
/// use lockstep_core::DoubleBuffered;
///
/// let health = DoubleBuffered::new(100_u32);
/// health.set(90);
/// assert_eq!(health.get(), 100); // not published yet
/// assert_eq!(health.live(), 90); // the writer sees its own stage
///
/// health.switch_buffer();
/// assert_eq!(health.get(), 90);
/// ```
pub struct DoubleBuffered<T> {
    cell: Mutex<Slots<T>>,
}

impl<T: Clone> DoubleBuffered<T> {
    /// Creates a cell whose published and staged values are both `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            cell: Mutex::new(Slots {
                slots: [value.clone(), value],
                generation: 0,
                dirty: false,
            }),
        }
    }

    /// Returns the last published value.
    #[inline]
    #[must_use]
    pub fn get(&self) -> T {
        let cell = self.cell.lock();
        cell.slots[cell.read_index()].clone()
    }

    /// Returns the staged value if one exists, otherwise the published one.
    #[inline]
    #[must_use]
    pub fn live(&self) -> T {
        let cell = self.cell.lock();
        let index = if cell.dirty { cell.write_index() } else { cell.read_index() };
        cell.slots[index].clone()
    }

    /// Stages `value`. It becomes visible through [`get`](Self::get) after the
    /// next [`switch_buffer`](Self::switch_buffer).
    #[inline]
    pub fn set(&self, value: T) {
        let mut cell = self.cell.lock();
        let index = cell.write_index();
        cell.slots[index] = value;
        cell.dirty = true;
    }

    /// Read-modify-write against the live value.
    ///
    /// The closure receives the staged value (or the published one when
    /// nothing is staged) and its result is staged.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let mut cell = self.cell.lock();
        let source = if cell.dirty { cell.write_index() } else { cell.read_index() };
        let next = f(&cell.slots[source]);
        let target = cell.write_index();
        cell.slots[target] = next;
        cell.dirty = true;
    }

    /// Returns the published value and the staged one, if any.
    fn parts(&self) -> (T, Option<T>) {
        let cell = self.cell.lock();
        let stable = cell.slots[cell.read_index()].clone();
        let staged = cell.dirty.then(|| cell.slots[cell.write_index()].clone());
        (stable, staged)
    }

    fn from_parts(stable: T, staged: Option<T>) -> Self {
        let buffered = Self::new(stable);
        if let Some(value) = staged {
            buffered.set(value);
        }
        buffered
    }
}

impl<T> DoubleBuffered<T> {
    /// Publishes the staged value, if any.
    ///
    /// Called once per tick after the parallel update barrier; never
    /// concurrently with `set`/`get` on the same tick's data.
    #[inline]
    pub fn switch_buffer(&self) {
        let mut cell = self.cell.lock();
        if cell.dirty {
            cell.generation = cell.generation.wrapping_add(1);
            cell.dirty = false;
        }
    }

    /// Returns whether a value is staged and waiting to be published.
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.cell.lock().dirty
    }

    /// Number of publishes this cell has gone through.
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.cell.lock().generation
    }
}

impl<T: Clone + Default> Default for DoubleBuffered<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone> Clone for DoubleBuffered<T> {
    fn clone(&self) -> Self {
        let (stable, staged) = self.parts();
        Self::from_parts(stable, staged)
    }
}

impl<T: Clone + fmt::Debug> fmt::Debug for DoubleBuffered<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (stable, staged) = self.parts();
        f.debug_struct("DoubleBuffered")
            .field("stable", &stable)
            .field("staged", &staged)
            .finish()
    }
}

/// On-disk shape: the published value and the staged one. The generation is
/// not persisted, it only selects a slot.
#[derive(Serialize, Deserialize)]
struct BufferedRepr<T> {
    stable: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    staged: Option<T>,
}

impl<T: Clone + Serialize> Serialize for DoubleBuffered<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (stable, staged) = self.parts();
        BufferedRepr { stable, staged }.serialize(serializer)
    }
}

impl<'de, T: Clone + Deserialize<'de>> Deserialize<'de> for DoubleBuffered<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = BufferedRepr::<T>::deserialize(deserializer)?;
        Ok(Self::from_parts(repr.stable, repr.staged))
    }
}
