use crate::order_core::{self, OrderedCore};
use core::borrow::Borrow;
use core::fmt;
use core::hash::Hash;
use core::ops::{Index, IndexMut};
use std::collections::hash_map::RandomState;
use std::rc::Rc;

/// Error returned by key-addressed operations (`at`, `at_mut`, `erase`)
/// when the requested key is absent.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LookupError;

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("key not found")
    }
}

impl std::error::Error for LookupError {}

// The shared block: the structural map plus the escape flag. Jointly owned
// by every handle that references it; `Clone` is the deep copy used when a
// handle detaches, and it always starts the copy with a clean flag.
struct Shared<K, V, S> {
    core: OrderedCore<K, V, S>,
    escaped: bool,
}

impl<K, V, S> Clone for Shared<K, V, S>
where
    K: Clone,
    V: Clone,
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            escaped: false,
        }
    }
}

/// An insertion-ordered hash map with copy-on-write value semantics.
///
/// Cloning a `CowOrderMap` is O(1): both handles share one storage block
/// until one of them mutates, at which point the mutating handle detaches
/// onto its own deep copy. The exception is a handle that has given out a
/// mutable reference to a stored value (via [`at_mut`] or indexed access):
/// cloning such a handle deep-copies eagerly, because writes through an
/// already-escaped reference cannot be tracked by the sharing bookkeeping.
///
/// Iteration yields entries in insertion order. Re-inserting a key that is
/// already present keeps its value and moves it to the most-recently-
/// inserted position.
///
/// Every mutating operation is atomic with respect to failure: if user code
/// (`Hash`, `Eq`, `Clone`, `Default`) panics mid-operation, the map is left
/// observably unchanged.
///
/// Single-threaded by design: handles are `!Send`/`!Sync`.
///
/// [`at_mut`]: CowOrderMap::at_mut
pub struct CowOrderMap<K, V, S = RandomState> {
    data: Rc<Shared<K, V, S>>,
}

impl<K, V> CowOrderMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            data: Rc::new(Shared {
                core: OrderedCore::new(),
                escaped: false,
            }),
        }
    }
}

impl<K, V> Default for CowOrderMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> CowOrderMap<K, V, S> {
    pub fn len(&self) -> usize {
        self.data.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.core.is_empty()
    }

    /// Read-only iteration in insertion order. Never clones the storage and
    /// never affects the sharing state.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.data.core.iter(),
        }
    }
}

impl<K, V, S> CowOrderMap<K, V, S>
where
    K: Eq + Hash,
    S: core::hash::BuildHasher + Clone + Default,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            data: Rc::new(Shared {
                core: OrderedCore::with_hasher(hasher),
                escaped: false,
            }),
        }
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.data.core.contains_key(key)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.data.core.get(key)
    }

    /// Read-only access to the value stored under `key`.
    pub fn at<Q>(&self, key: &Q) -> Result<&V, LookupError>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.data.core.get(key).ok_or(LookupError)
    }
}

impl<K, V, S> CowOrderMap<K, V, S>
where
    K: Clone + Eq + Hash,
    V: Clone,
    S: core::hash::BuildHasher + Clone + Default,
{
    // Ensure this handle is the sole observer of its shared block, detaching
    // onto a deep copy if any sibling handle still references it. A panic
    // while copying unwinds before `data` is reassigned.
    fn make_unique(&mut self) -> &mut Shared<K, V, S> {
        if Rc::strong_count(&self.data) > 1 {
            self.data = Rc::new(Shared::clone(&self.data));
        }
        Rc::get_mut(&mut self.data).expect("sole owner after detach")
    }

    /// Insert `key` -> `value`. Returns `true` if the key was newly added.
    /// If the key was already present, its stored value is kept, `value` is
    /// dropped, and the entry moves to the most-recently-inserted position.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        let shared = self.make_unique();
        let (_slot, newly) = shared.core.insert_with(key, move || value);
        shared.escaped = false;
        newly
    }

    /// Remove the entry stored under `key`, returning its pair. Fails with
    /// [`LookupError`] if the key is absent, in which case the map is
    /// untouched.
    pub fn erase<Q>(&mut self, key: &Q) -> Result<(K, V), LookupError>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        if !self.data.core.contains_key(key) {
            return Err(LookupError);
        }
        let shared = self.make_unique();
        let removed = shared
            .core
            .remove(key)
            .expect("key still present after detach");
        shared.escaped = false;
        Ok(removed)
    }

    /// Mutable access to the value stored under `key`. Fails with
    /// [`LookupError`] if the key is absent, in which case the map is
    /// untouched. On success the handle remembers that a mutable reference
    /// escaped: its next clone will deep-copy instead of sharing.
    pub fn at_mut<Q>(&mut self, key: &Q) -> Result<&mut V, LookupError>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        if !self.data.core.contains_key(key) {
            return Err(LookupError);
        }
        let shared = self.make_unique();
        let slot = shared
            .core
            .find(key)
            .expect("key still present after detach");
        shared.escaped = true;
        Ok(shared
            .core
            .slot_value_mut(slot)
            .expect("found slot resolves"))
    }

    /// Mutable access to the value stored under `key`, inserting
    /// `V::default()` first if the key is absent. Funnels through the same
    /// insert path as [`insert`], so a pre-existing key moves to the
    /// most-recently-inserted position even though its value is untouched.
    /// Marks the handle as escaped, like [`at_mut`].
    ///
    /// [`insert`]: CowOrderMap::insert
    /// [`at_mut`]: CowOrderMap::at_mut
    pub fn get_or_insert_default(&mut self, key: K) -> &mut V
    where
        V: Default,
    {
        let shared = self.make_unique();
        let (slot, _newly) = shared.core.insert_with(key, V::default);
        shared.escaped = true;
        shared
            .core
            .slot_value_mut(slot)
            .expect("inserted slot resolves")
    }

    /// Replay every entry of `other`, in `other`'s insertion order, through
    /// the [`insert`] behavior: keys new to `self` are appended with
    /// `other`'s value, keys already present keep `self`'s value and move
    /// to the back. A no-op when both handles share one storage block.
    ///
    /// The merge is built on a working copy and committed in one step; if
    /// any value or key clone panics, `self` keeps its original storage.
    ///
    /// [`insert`]: CowOrderMap::insert
    pub fn merge(&mut self, other: &Self) {
        if Rc::ptr_eq(&self.data, &other.data) {
            return;
        }
        let mut merged = Shared::clone(&self.data);
        for (k, v) in other.data.core.iter() {
            merged.core.insert(k.clone(), v.clone());
        }
        self.data = Rc::new(merged);
    }

    /// Drop every entry. Infallible past the exclusivity step.
    pub fn clear(&mut self) {
        let shared = self.make_unique();
        shared.core.clear();
        shared.escaped = false;
    }
}

impl<K, V, S> Clone for CowOrderMap<K, V, S>
where
    K: Clone,
    V: Clone,
    S: Clone,
{
    fn clone(&self) -> Self {
        let data = if self.data.escaped {
            // A mutable reference into this block escaped; sharing could
            // let writes through it reach the new handle. Copy eagerly.
            Rc::new(Shared::clone(&self.data))
        } else {
            Rc::clone(&self.data)
        };
        Self { data }
    }
}

impl<K, V, S> fmt::Debug for CowOrderMap<K, V, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S, Q> Index<&Q> for CowOrderMap<K, V, S>
where
    K: Eq + Hash + Borrow<Q>,
    Q: ?Sized + Hash + Eq,
    S: core::hash::BuildHasher + Clone + Default,
{
    type Output = V;

    fn index(&self, key: &Q) -> &V {
        self.at(key).expect("no entry found for key")
    }
}

impl<K, V, S, Q> IndexMut<&Q> for CowOrderMap<K, V, S>
where
    K: Clone + Eq + Hash + Borrow<Q>,
    Q: ?Sized + Hash + Eq + ToOwned<Owned = K>,
    V: Clone + Default,
    S: core::hash::BuildHasher + Clone + Default,
{
    /// Index-assignment sugar over [`CowOrderMap::get_or_insert_default`]:
    /// absent keys are default-inserted before the reference is returned.
    fn index_mut(&mut self, key: &Q) -> &mut V {
        self.get_or_insert_default(key.to_owned())
    }
}

impl<K, V, S> Extend<(K, V)> for CowOrderMap<K, V, S>
where
    K: Clone + Eq + Hash,
    V: Clone,
    S: core::hash::BuildHasher + Clone + Default,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for CowOrderMap<K, V, S>
where
    K: Clone + Eq + Hash,
    V: Clone,
    S: core::hash::BuildHasher + Clone + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut m = Self::with_hasher(S::default());
        m.extend(iter);
        m
    }
}

/// Read-only iterator over `(&K, &V)` pairs in insertion order.
pub struct Iter<'a, K, V> {
    inner: order_core::Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, K, V> ExactSizeIterator for Iter<'a, K, V> {}

impl<'a, K, V, S> IntoIterator for &'a CowOrderMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
