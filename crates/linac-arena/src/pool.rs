//! A bounded, thread-safe object pool.
//!
//! [`Pool`] recycles items built by a factory. Returning an item to a
//! full pool drops it. In debug mode the pool can additionally detect
//! items returned twice (through an equality function) and items that are
//! never returned at all (through a ceiling on factory calls).

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::trace;

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// A bounded pool of reusable items.
pub struct Pool<T> {
    name: &'static str,
    items: Mutex<Vec<T>>,
    factory: Factory<T>,
    max: usize,
    equal: Option<fn(&T, &T) -> bool>,
    leak_ceiling: usize,
    debug: AtomicBool,
    gets: AtomicUsize,
    misses: AtomicUsize,
    created: AtomicUsize,
}

impl<T> Pool<T> {
    /// Create a pool that keeps at most `max` idle items.
    pub fn new(
        name: &'static str,
        max: usize,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            items: Mutex::new(Vec::new()),
            factory: Box::new(factory),
            max,
            equal: None,
            leak_ceiling: 0,
            debug: AtomicBool::new(false),
            gets: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
        }
    }

    /// Equality used by debug-mode duplicate detection on [`put`](Self::put).
    pub fn with_equality(mut self, equal: fn(&T, &T) -> bool) -> Self {
        self.equal = Some(equal);
        self
    }

    /// Number of factory calls from [`get`](Self::get) tolerated in debug
    /// mode. Zero means unlimited.
    pub fn with_leak_ceiling(mut self, ceiling: usize) -> Self {
        self.leak_ceiling = ceiling;
        self
    }

    /// Turn debug checks on or off.
    pub fn set_debug(&self, on: bool) {
        self.debug.store(on, Ordering::Relaxed);
    }

    /// Take an idle item, or build a new one.
    ///
    /// # Panics
    ///
    /// In debug mode, panics when building the item would exceed the leak
    /// ceiling.
    pub fn get(&self) -> T {
        self.gets.fetch_add(1, Ordering::Relaxed);
        if let Some(item) = self.items.lock().pop() {
            return item;
        }
        let misses = self.misses.fetch_add(1, Ordering::Relaxed) + 1;
        if self.leak_ceiling > 0
            && misses > self.leak_ceiling
            && self.debug.load(Ordering::Relaxed)
        {
            panic!(
                "{} pool leak: {misses} items built on demand, ceiling is {}; are handles being released?",
                self.name, self.leak_ceiling
            );
        }
        self.created.fetch_add(1, Ordering::Relaxed);
        (self.factory)()
    }

    /// Return an item. Dropped if the pool already holds `max` items.
    ///
    /// # Panics
    ///
    /// In debug mode with an equality function set, panics if an equal
    /// item is already idle in the pool.
    pub fn put(&self, item: T) {
        let overflow = {
            let mut items = self.items.lock();
            if self.debug.load(Ordering::Relaxed) {
                if let Some(equal) = self.equal {
                    if items.iter().any(|idle| equal(idle, &item)) {
                        panic!("{} pool: item returned twice", self.name);
                    }
                }
            }
            if items.len() >= self.max {
                Some(item)
            } else {
                items.push(item);
                None
            }
        };
        if overflow.is_some() {
            trace!(pool = self.name, max = self.max, "pool full, dropping returned item");
        }
    }

    /// Eagerly build up to `n` items, stopping at the cap.
    ///
    /// Returns how many were added.
    pub fn reserve(&self, n: usize) -> usize {
        let room = self.max.saturating_sub(self.len()).min(n);
        let fresh: Vec<T> = (0..room).map(|_| (self.factory)()).collect();
        self.created.fetch_add(fresh.len(), Ordering::Relaxed);
        let mut items = self.items.lock();
        let take = self.max.saturating_sub(items.len()).min(fresh.len());
        items.extend(fresh.into_iter().take(take));
        take
    }

    /// Drop every idle item.
    pub fn clear(&self) {
        let drained = std::mem::take(&mut *self.items.lock());
        drop(drained);
    }

    /// Number of idle items.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the pool holds no idle items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity cap.
    pub fn max(&self) -> usize {
        self.max
    }

    /// Total calls to [`get`](Self::get).
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }

    /// Calls to [`get`](Self::get) that found no idle item. This is what
    /// the leak ceiling counts; reservations are not included.
    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    /// Total items built by the factory, including reservations.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("idle", &self.len())
            .field("max", &self.max)
            .field("created", &self.created())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_pool(max: usize) -> Pool<u64> {
        let next = AtomicUsize::new(0);
        Pool::new("test", max, move || next.fetch_add(1, Ordering::Relaxed) as u64)
    }

    #[test]
    fn get_builds_then_recycles() {
        let pool = counter_pool(4);
        let a = pool.get();
        assert_eq!(pool.created(), 1);
        pool.put(a);
        assert_eq!(pool.get(), a);
        assert_eq!(pool.created(), 1);
        assert_eq!(pool.gets(), 2);
    }

    #[test]
    fn put_beyond_cap_drops() {
        let pool = counter_pool(1);
        pool.put(10);
        pool.put(11);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(), 10);
    }

    #[test]
    fn reserve_respects_cap() {
        let pool = counter_pool(3);
        assert_eq!(pool.reserve(5), 3);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.reserve(1), 0);
    }

    #[test]
    fn clear_empties_pool() {
        let pool = counter_pool(8);
        pool.reserve(4);
        pool.clear();
        assert!(pool.is_empty());
    }

    #[test]
    #[should_panic(expected = "item returned twice")]
    fn duplicate_put_panics_in_debug() {
        let pool = counter_pool(8).with_equality(|a, b| a == b);
        pool.set_debug(true);
        pool.put(7);
        pool.put(7);
    }

    #[test]
    fn duplicate_put_tolerated_outside_debug() {
        let pool = counter_pool(8).with_equality(|a, b| a == b);
        pool.put(7);
        pool.put(7);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    #[should_panic(expected = "pool leak")]
    fn leak_ceiling_panics_in_debug() {
        let pool = counter_pool(8).with_leak_ceiling(2);
        pool.set_debug(true);
        let _held: Vec<u64> = (0..3).map(|_| pool.get()).collect();
    }

    #[test]
    fn leak_ceiling_ignores_recycled_items() {
        let pool = counter_pool(8).with_leak_ceiling(1);
        pool.set_debug(true);
        for _ in 0..10 {
            let item = pool.get();
            pool.put(item);
        }
        assert_eq!(pool.created(), 1);
    }

    #[test]
    fn reservations_do_not_count_toward_the_leak_ceiling() {
        let pool = counter_pool(16).with_leak_ceiling(2);
        pool.set_debug(true);
        assert_eq!(pool.reserve(3), 3);
        let held: Vec<u64> = (0..4).map(|_| pool.get()).collect();
        assert_eq!(held.len(), 4);
        assert_eq!(pool.misses(), 1);
        assert_eq!(pool.created(), 4);
    }

    #[test]
    #[should_panic(expected = "3 items built on demand, ceiling is 2")]
    fn leak_ceiling_still_trips_after_reserve() {
        let pool = counter_pool(16).with_leak_ceiling(2);
        pool.set_debug(true);
        pool.reserve(3);
        let _held: Vec<u64> = (0..6).map(|_| pool.get()).collect();
    }
}
