//! OrderedCore: structural insertion-ordered map.
//!
//! A hash index (`hashbrown::HashTable`) over entries stored in a
//! `slotmap::SlotMap`, with each entry carrying `prev`/`next` slot keys that
//! thread the live entries into a doubly-linked insertion-order list. Slot
//! keys are generational and survive `Clone`, so a cloned core keeps its
//! index valid without a rebuild.
//!
//! Each entry stores its precomputed `u64` hash and indexing always uses the
//! stored hash; `K: Hash` is never invoked after insertion. User code
//! (`K: Eq`/`K: Hash`) only ever runs before the first structural change of
//! an operation, which is what makes the owning layer's failure-safety
//! contract hold without any unwind handling.
//!
//! This module is an implementation detail of [`CowOrderMap`]; it is public
//! only so the `bench_internal` bench target can reach it.
//!
//! [`CowOrderMap`]: crate::CowOrderMap

use crate::guard::DebugExclusion;
use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use hashbrown::HashTable;
use slotmap::{DefaultKey, SlotMap};
use std::collections::hash_map::RandomState;

#[derive(Debug, Clone)]
struct Entry<K, V> {
    key: K,
    value: V,
    hash: u64,
    prev: Option<DefaultKey>,
    next: Option<DefaultKey>,
}

pub struct OrderedCore<K, V, S = RandomState> {
    hasher: S,
    index: HashTable<DefaultKey>,
    slots: SlotMap<DefaultKey, Entry<K, V>>, // storage doubling as order-list nodes
    head: Option<DefaultKey>,
    tail: Option<DefaultKey>,
    exclusion: DebugExclusion,
}

impl<K, V> OrderedCore<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }
}

impl<K, V> Default for OrderedCore<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> OrderedCore<K, V, S> {
    pub fn len(&self) -> usize {
        self.slots.len()
    }
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Walk the order links front to back.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            slots: &self.slots,
            next: self.head,
            remaining: self.slots.len(),
        }
    }
}

/// In-order iterator over `(&K, &V)` pairs.
pub struct Iter<'a, K, V> {
    slots: &'a SlotMap<DefaultKey, Entry<K, V>>,
    next: Option<DefaultKey>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.next?;
        let e = &self.slots[slot];
        self.next = e.next;
        self.remaining -= 1;
        Some((&e.key, &e.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, K, V> ExactSizeIterator for Iter<'a, K, V> {}

impl<K, V, S> OrderedCore<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Clone + Default,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            hasher,
            index: HashTable::new(),
            slots: SlotMap::with_key(),
            head: None,
            tail: None,
            exclusion: DebugExclusion::new(),
        }
    }

    fn make_hash<Q>(&self, q: &Q) -> u64
    where
        Q: ?Sized + Hash,
    {
        self.hasher.hash_one(q)
    }

    // Index probe with no guard; callers hold one.
    fn probe<Q>(&self, hash: u64, q: &Q) -> Option<DefaultKey>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        self.index
            .find(hash, |&s| {
                self.slots
                    .get(s)
                    .map(|e| e.key.borrow() == q)
                    .unwrap_or(false)
            })
            .copied()
    }

    pub fn find<Q>(&self, q: &Q) -> Option<DefaultKey>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.exclusion.enter();
        let hash = self.make_hash(q);
        self.probe(hash, q)
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.exclusion.enter();
        let hash = self.make_hash(q);
        self.probe(hash, q).is_some()
    }

    pub fn get<Q>(&self, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.exclusion.enter();
        let hash = self.make_hash(q);
        let slot = self.probe(hash, q)?;
        self.slots.get(slot).map(|e| &e.value)
    }

    pub fn slot_key(&self, slot: DefaultKey) -> Option<&K> {
        let _g = self.exclusion.enter();
        self.slots.get(slot).map(|e| &e.key)
    }

    pub fn slot_value(&self, slot: DefaultKey) -> Option<&V> {
        let _g = self.exclusion.enter();
        self.slots.get(slot).map(|e| &e.value)
    }

    pub fn slot_value_mut(&mut self, slot: DefaultKey) -> Option<&mut V> {
        let _g = self.exclusion.enter();
        self.slots.get_mut(slot).map(|e| &mut e.value)
    }

    /// Insert `key` -> `value`, appending `key` at the back of the order.
    /// If the key is already present its value is kept, the value argument
    /// is dropped, and the existing entry is relinked to the back. Returns
    /// whether the key was newly added.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        self.insert_with(key, move || value).1
    }

    /// Insert using a lazy value constructor; `default()` only runs when the
    /// key is absent. Either way the entry ends up at the back of the order;
    /// returns its slot and whether it was newly added.
    pub fn insert_with<F>(&mut self, key: K, default: F) -> (DefaultKey, bool)
    where
        F: FnOnce() -> V,
    {
        let _g = self.exclusion.enter();
        let hash = self.make_hash(&key);
        let (slot, newly) = match self.index.entry(
            hash,
            |&s| self.slots.get(s).map(|e| e.key == key).unwrap_or(false),
            |&s| self.slots.get(s).map(|e| e.hash).unwrap_or(0),
        ) {
            hashbrown::hash_table::Entry::Occupied(o) => (*o.get(), false),
            hashbrown::hash_table::Entry::Vacant(v) => {
                let value = default();
                let slot = self.slots.insert(Entry {
                    key,
                    value,
                    hash,
                    prev: None,
                    next: None,
                });
                let _ = v.insert(slot);
                (slot, true)
            }
        };
        // All user code (`K::eq`/`K::hash`) has run by this point; the order-link
        // fixups below touch no user code, so the debug reentrancy guard can end.
        drop(_g);
        if !newly {
            self.unlink(slot);
        }
        self.link_back(slot);
        (slot, newly)
    }

    /// Remove by key; unlinks the order slot and drops the index entry.
    /// Past the probe, no user code runs and no step can fail.
    pub fn remove<Q>(&mut self, q: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.exclusion.enter();
        let hash = self.make_hash(q);
        let slot = self.probe(hash, q)?;

        // Past the probe no user code runs; end the debug reentrancy guard before
        // the infallible order/index fixups below.
        drop(_g);
        self.unlink(slot);
        self.index
            .find_entry(hash, |&s| s == slot)
            .expect("live slot must be indexed")
            .remove();
        let entry = self.slots.remove(slot).expect("probed slot is live");
        Some((entry.key, entry.value))
    }

    pub fn clear(&mut self) {
        let _g = self.exclusion.enter();
        self.index.clear();
        self.slots.clear();
        self.head = None;
        self.tail = None;
    }

    // Detach `slot` from the order list, fixing neighbors and head/tail.
    fn unlink(&mut self, slot: DefaultKey) {
        let (prev, next) = {
            let e = &mut self.slots[slot];
            (e.prev.take(), e.next.take())
        };
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
    }

    // Attach a detached `slot` at the back of the order list.
    fn link_back(&mut self, slot: DefaultKey) {
        let old_tail = self.tail;
        {
            let e = &mut self.slots[slot];
            e.prev = old_tail;
            e.next = None;
        }
        match old_tail {
            Some(t) => self.slots[t].next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }
}

impl<K, V, S> Clone for OrderedCore<K, V, S>
where
    K: Clone,
    V: Clone,
    S: Clone,
{
    fn clone(&self) -> Self {
        // SlotMap::clone preserves keys, so the index and the order links
        // stay valid in the copy as-is.
        Self {
            hasher: self.hasher.clone(),
            index: self.index.clone(),
            slots: self.slots.clone(),
            head: self.head,
            tail: self.tail,
            exclusion: DebugExclusion::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::hash::Hasher;

    fn keys_in_order(m: &OrderedCore<String, i32>) -> Vec<String> {
        m.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Invariant: New keys append at the back; iteration follows insertion
    /// order front to back.
    #[test]
    fn insert_new_appends_in_order() {
        let mut m: OrderedCore<String, i32> = OrderedCore::new();
        assert!(m.insert("a".to_string(), 1));
        assert!(m.insert("b".to_string(), 2));
        assert!(m.insert("c".to_string(), 3));
        assert_eq!(m.len(), 3);
        assert_eq!(keys_in_order(&m), ["a", "b", "c"]);
        let vals: Vec<i32> = m.iter().map(|(_, v)| *v).collect();
        assert_eq!(vals, [1, 2, 3]);
    }

    /// Invariant: Re-inserting an existing key keeps the stored value,
    /// reports "already present", and relinks the entry to the back.
    #[test]
    fn reinsert_moves_to_back_and_keeps_value() {
        let mut m: OrderedCore<String, i32> = OrderedCore::new();
        m.insert("a".to_string(), 1);
        m.insert("b".to_string(), 2);
        assert!(!m.insert("a".to_string(), 99));
        assert_eq!(m.len(), 2);
        assert_eq!(keys_in_order(&m), ["b", "a"]);
        assert_eq!(m.get("a"), Some(&1), "value must not be overwritten");
    }

    /// Invariant: `insert_with` only runs the constructor when the key is
    /// absent; on a duplicate it does not run, yet the entry still moves to
    /// the back.
    #[test]
    fn insert_with_is_lazy_and_still_reorders() {
        let mut m: OrderedCore<String, i32> = OrderedCore::new();
        let calls = Cell::new(0);

        let (s1, newly) = m.insert_with("a".to_string(), || {
            calls.set(calls.get() + 1);
            7
        });
        assert!(newly);
        assert_eq!(calls.get(), 1);
        m.insert("b".to_string(), 2);

        let (s2, newly) = m.insert_with("a".to_string(), || {
            calls.set(calls.get() + 1);
            99
        });
        assert!(!newly);
        assert_eq!(calls.get(), 1, "constructor must not run on duplicate");
        assert_eq!(s1, s2, "duplicate resolves to the existing slot");
        assert_eq!(m.slot_value(s2), Some(&7));
        assert_eq!(keys_in_order(&m), ["b", "a"]);
    }

    /// Invariant: `remove` unlinks the slot and drops the index entry;
    /// neighbors join up and the pair comes back to the caller.
    #[test]
    fn remove_unlinks_and_returns_entry() {
        let mut m: OrderedCore<String, i32> = OrderedCore::new();
        for (k, v) in [("a", 1), ("b", 2), ("c", 3)] {
            m.insert(k.to_string(), v);
        }
        assert_eq!(m.remove("b"), Some(("b".to_string(), 2)));
        assert_eq!(keys_in_order(&m), ["a", "c"]);
        assert_eq!(m.remove("b"), None);
        assert_eq!(m.len(), 2);
    }

    /// Invariant: Removing at the ends updates head/tail correctly; an
    /// emptied core accepts fresh insertions with a fresh order.
    #[test]
    fn remove_at_ends_fixes_links() {
        let mut m: OrderedCore<String, i32> = OrderedCore::new();
        for (k, v) in [("a", 1), ("b", 2), ("c", 3)] {
            m.insert(k.to_string(), v);
        }
        assert_eq!(m.remove("a"), Some(("a".to_string(), 1)));
        assert_eq!(keys_in_order(&m), ["b", "c"]);
        assert_eq!(m.remove("c"), Some(("c".to_string(), 3)));
        assert_eq!(keys_in_order(&m), ["b"]);
        assert_eq!(m.remove("b"), Some(("b".to_string(), 2)));
        assert!(m.is_empty());
        assert_eq!(m.iter().count(), 0);

        m.insert("x".to_string(), 10);
        m.insert("y".to_string(), 20);
        assert_eq!(keys_in_order(&m), ["x", "y"]);
    }

    /// Invariant: Borrowed lookup works (store `String`, query with `&str`).
    #[test]
    fn borrowed_lookup_with_str() {
        let mut m: OrderedCore<String, i32> = OrderedCore::new();
        m.insert("hello".to_string(), 1);
        assert!(m.contains_key("hello"));
        assert!(!m.contains_key("world"));
        assert_eq!(m.get("hello"), Some(&1));
        assert!(m.find("hello").is_some());
        assert!(m.find("world").is_none());
        assert_eq!(m.remove("world"), None);
    }

    /// Invariant: Lookups and ordering survive heavy hash collisions;
    /// equality resolves to the correct entry under collision probing.
    #[test]
    fn collision_handling_with_const_hasher() {
        #[derive(Clone, Default)]
        struct ConstBuildHasher;
        struct ConstHasher;
        impl BuildHasher for ConstBuildHasher {
            type Hasher = ConstHasher;
            fn build_hasher(&self) -> Self::Hasher {
                ConstHasher
            }
        }
        impl core::hash::Hasher for ConstHasher {
            fn write(&mut self, _bytes: &[u8]) {}
            fn finish(&self) -> u64 {
                0
            } // force all keys into the same hash bucket
        }

        let mut m: OrderedCore<String, i32, ConstBuildHasher> =
            OrderedCore::with_hasher(ConstBuildHasher);
        m.insert("a".to_string(), 1);
        m.insert("b".to_string(), 2);
        m.insert("c".to_string(), 3);

        assert_eq!(m.get("a"), Some(&1));
        assert_eq!(m.get("b"), Some(&2));
        let order: Vec<String> = m.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(order, ["a", "b", "c"]);

        assert_eq!(m.remove("b"), Some(("b".to_string(), 2)));
        let order: Vec<String> = m.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(order, ["a", "c"]);
    }

    /// Invariant: `clear` empties index, slots, and links; the core is
    /// reusable afterwards.
    #[test]
    fn clear_resets_everything() {
        let mut m: OrderedCore<String, i32> = OrderedCore::new();
        m.insert("a".to_string(), 1);
        m.insert("b".to_string(), 2);
        m.clear();
        assert_eq!(m.len(), 0);
        assert!(m.is_empty());
        assert_eq!(m.iter().count(), 0);
        assert!(!m.contains_key("a"));

        m.insert("b".to_string(), 20);
        m.insert("a".to_string(), 10);
        assert_eq!(keys_in_order(&m), ["b", "a"]);
    }

    /// Invariant: A clone is structurally equal (same order, same values,
    /// lookups resolve) and fully independent of the original.
    #[test]
    fn clone_preserves_order_and_is_independent() {
        let mut m: OrderedCore<String, i32> = OrderedCore::new();
        for (k, v) in [("a", 1), ("b", 2), ("c", 3)] {
            m.insert(k.to_string(), v);
        }
        let mut c = m.clone();
        assert_eq!(keys_in_order(&c), ["a", "b", "c"]);
        assert_eq!(c.get("b"), Some(&2));

        // Diverge both sides; neither observes the other's changes.
        m.remove("a");
        c.insert("d".to_string(), 4);
        assert_eq!(keys_in_order(&m), ["b", "c"]);
        assert_eq!(keys_in_order(&c), ["a", "b", "c", "d"]);
        assert_eq!(c.get("a"), Some(&1));
    }

    /// Invariant: `len()`/`is_empty()` track live entries and are unaffected
    /// by duplicate inserts.
    #[test]
    fn len_and_is_empty_behaviors() {
        let mut m: OrderedCore<String, i32> = OrderedCore::new();
        assert_eq!(m.len(), 0);
        assert!(m.is_empty());

        m.insert("a".to_string(), 1);
        assert_eq!(m.len(), 1);
        m.insert("a".to_string(), 2); // duplicate
        assert_eq!(m.len(), 1);
        m.insert("b".to_string(), 2);
        assert_eq!(m.len(), 2);

        m.remove("a");
        assert_eq!(m.len(), 1);
        m.remove("b");
        assert_eq!(m.len(), 0);
        assert!(m.is_empty());
    }

    /// Invariant: In-place mutation through `slot_value_mut` is visible to
    /// later reads and does not disturb the order.
    #[test]
    fn slot_access_and_mutation() {
        let mut m: OrderedCore<String, i32> = OrderedCore::new();
        m.insert("a".to_string(), 10);
        m.insert("b".to_string(), 20);
        let slot = m.find("a").unwrap();
        assert_eq!(m.slot_key(slot), Some(&"a".to_string()));
        *m.slot_value_mut(slot).unwrap() += 5;
        assert_eq!(m.get("a"), Some(&15));
        assert_eq!(keys_in_order(&m), ["a", "b"]);
    }

    /// Invariant (debug-only): Re-entering the core from within `K: Eq`
    /// during a probe panics via the exclusion guard.
    #[cfg(debug_assertions)]
    #[test]
    fn reentry_from_eq_during_find_panics() {
        #[derive(Clone, Default)]
        struct ConstBuildHasher;
        struct ConstHasher;
        impl BuildHasher for ConstBuildHasher {
            type Hasher = ConstHasher;
            fn build_hasher(&self) -> Self::Hasher {
                ConstHasher
            }
        }
        impl core::hash::Hasher for ConstHasher {
            fn write(&mut self, _bytes: &[u8]) {}
            fn finish(&self) -> u64 {
                0
            }
        }

        struct ReentryKey {
            id: &'static str,
            map: *const OrderedCore<ReentryKey, i32, ConstBuildHasher>,
            trigger: bool,
        }
        impl PartialEq for ReentryKey {
            fn eq(&self, other: &Self) -> bool {
                if self.id == other.id {
                    return true;
                }
                if other.trigger {
                    // Attempt to re-enter the same core during probing.
                    unsafe {
                        let m = &*other.map;
                        let _ = m.contains_key(self.id);
                    }
                }
                false
            }
        }
        impl Eq for ReentryKey {}
        impl Hash for ReentryKey {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }
        impl core::borrow::Borrow<str> for ReentryKey {
            fn borrow(&self) -> &str {
                self.id
            }
        }

        let mut m: OrderedCore<ReentryKey, i32, ConstBuildHasher> =
            OrderedCore::with_hasher(ConstBuildHasher);
        let key = ReentryKey {
            id: "a",
            map: core::ptr::null(),
            trigger: false,
        };
        let key = ReentryKey {
            map: &m as *const _,
            ..key
        };
        m.insert(key, 1);

        let query = ReentryKey {
            id: "b",
            map: &m as *const _,
            trigger: true,
        };
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = m.find(&query);
        }));
        assert!(res.is_err(), "expected reentry to panic in debug builds");
    }
}
