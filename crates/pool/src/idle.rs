//! Idle connection ring
//!
//! A bounded circular buffer used as an order-preserving set: insertion
//! order is reuse order, duplicates are rejected.
//!
//! ## Layout
//!
//! ```text
//!   capacity = 6, head = 4, len = 3
//!
//!   slots:  [ c ][   ][   ][   ][ a ][ b ]
//!             ^                   ^
//!           tail-1              head
//!
//!   logical order: a, b, c
//! ```
//!
//! Removing from the middle shifts whichever side of the gap is shorter,
//! so relative order is kept and head/tail stay O(1).

use parking_lot::{Mutex, MutexGuard};

// ============================================================================
// Ring
// ============================================================================

struct Ring<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    len: usize,
}

impl<T: PartialEq + Clone> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        Ring {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Physical slot of logical index `i`
    fn slot(&self, i: usize) -> usize {
        (self.head + i) % self.slots.len()
    }

    fn get(&self, i: usize) -> Option<&T> {
        if i >= self.len {
            return None;
        }
        self.slots[self.slot(i)].as_ref()
    }

    fn position(&self, item: &T) -> Option<usize> {
        (0..self.len).find(|&i| self.get(i) == Some(item))
    }

    fn push_back(&mut self, item: T) -> bool {
        if self.len == self.capacity() || self.position(&item).is_some() {
            return false;
        }
        let slot = self.slot(self.len);
        self.slots[slot] = Some(item);
        self.len += 1;
        true
    }

    fn remove_at(&mut self, i: usize) -> Option<T> {
        if i >= self.len {
            return None;
        }
        let removed = self.slots[self.slot(i)].take();

        if i < self.len - 1 - i {
            // front side is shorter: move it one step toward the tail
            for j in (0..i).rev() {
                let (from, to) = (self.slot(j), self.slot(j + 1));
                self.slots[to] = self.slots[from].take();
            }
            self.head = (self.head + 1) % self.capacity();
        } else {
            for j in i..self.len - 1 {
                let (from, to) = (self.slot(j + 1), self.slot(j));
                self.slots[to] = self.slots[from].take();
            }
        }

        self.len -= 1;
        if self.len == 0 {
            self.head = 0;
        }
        removed
    }

    fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

// ============================================================================
// IdlePool
// ============================================================================

/// Fixed-capacity FIFO set of idle items
///
/// Every operation runs under one internal mutex. Items compare with
/// `PartialEq`; pooled connections compare by identity.
///
/// # Examples
///
/// ```
/// use xapool_pool::IdlePool;
///
/// let idle = IdlePool::new(2);
/// assert!(idle.add(1));
/// assert!(idle.add(2));
/// assert!(!idle.add(3));
/// assert_eq!(idle.take_first(), Some(1));
/// ```
pub struct IdlePool<T> {
    ring: Mutex<Ring<T>>,
}

impl<T: PartialEq + Clone> IdlePool<T> {
    /// Empty pool holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        IdlePool {
            ring: Mutex::new(Ring::with_capacity(capacity)),
        }
    }

    /// Append `item`; false when full or already present
    pub fn add(&self, item: T) -> bool {
        self.ring.lock().push_back(item)
    }

    /// Remove `item`; false when absent
    pub fn remove(&self, item: &T) -> bool {
        let mut ring = self.ring.lock();
        match ring.position(item) {
            Some(i) => ring.remove_at(i).is_some(),
            None => false,
        }
    }

    /// Oldest item
    pub fn peek_first(&self) -> Option<T> {
        self.ring.lock().get(0).cloned()
    }

    /// Remove and return the oldest item
    pub fn take_first(&self) -> Option<T> {
        self.ring.lock().remove_at(0)
    }

    /// Remove and return the oldest item matching `pred`
    ///
    /// Find and remove happen under one lock acquisition, so two callers
    /// never receive the same item.
    pub fn take_matching(&self, mut pred: impl FnMut(&T) -> bool) -> Option<T> {
        let mut ring = self.ring.lock();
        let index = (0..ring.len).find(|&i| ring.get(i).map_or(false, &mut pred))?;
        ring.remove_at(index)
    }

    /// True if `item` is present
    pub fn contains(&self, item: &T) -> bool {
        self.ring.lock().position(item).is_some()
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.ring.lock().len
    }

    /// True if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of items
    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity()
    }

    /// Remove every item
    pub fn clear(&self) {
        self.ring.lock().clear();
    }

    /// Items in insertion order
    pub fn snapshot(&self) -> Vec<T> {
        let ring = self.ring.lock();
        (0..ring.len).filter_map(|i| ring.get(i).cloned()).collect()
    }

    /// Iterate in insertion order, holding the lock
    ///
    /// The only mutation allowed during iteration is
    /// [`IdleCursor::remove`].
    pub fn cursor(&self) -> IdleCursor<'_, T> {
        IdleCursor {
            ring: self.ring.lock(),
            next: 0,
            current: None,
        }
    }
}

impl<T> std::fmt::Debug for IdlePool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("IdlePool")
            .field("len", &ring.len)
            .field("capacity", &ring.slots.len())
            .finish()
    }
}

/// Locked iteration over an [`IdlePool`]
pub struct IdleCursor<'a, T> {
    ring: MutexGuard<'a, Ring<T>>,
    next: usize,
    current: Option<usize>,
}

impl<'a, T: PartialEq + Clone> IdleCursor<'a, T> {
    /// Advance and return the next item
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<T> {
        let item = self.ring.get(self.next).cloned()?;
        self.current = Some(self.next);
        self.next += 1;
        Some(item)
    }

    /// Remove the item last returned by [`next`](Self::next)
    pub fn remove(&mut self) -> bool {
        match self.current.take() {
            Some(i) => {
                self.next = i;
                self.ring.remove_at(i).is_some()
            }
            None => false,
        }
    }
}
