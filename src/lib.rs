//! cow-ordermap: a single-threaded, insertion-ordered hash map with
//! copy-on-write value semantics.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: give `CowOrderMap` value semantics (copying a map copies its
//!   logical contents) while paying for a deep copy only when a shared
//!   block is actually about to be mutated, in safe, verifiable layers.
//! - Layers:
//!   - OrderedCore<K, V, S>: structural map that pairs a hash index with
//!     entries threaded into a doubly-linked insertion-order list; includes
//!     a debug-only exclusion guard to keep internals consistent while user
//!     code runs during probing.
//!   - Shared<K, V, S>: OrderedCore plus the escape flag, jointly owned by
//!     every handle that references it through `Rc`.
//!   - CowOrderMap<K, V, S>: public handle; decides on every copy and every
//!     mutation whether to share the block or clone it.
//!
//! Constraints
//! - Single-threaded: `!Send`/`!Sync` by design (plain `Rc`, no atomics).
//! - Insertion order is observable: iteration walks the order list, and
//!   re-inserting an existing key moves it to the back without changing its
//!   value.
//! - Strong failure safety: a mutating call that panics out of user code
//!   (`Hash`, `Eq`, `Clone`, `Default`) leaves the map observably
//!   unchanged.
//!
//! Why this split?
//! - Localize invariants: OrderedCore owns the index/order coherence,
//!   Shared owns the escape flag, the handle owns the sharing decision.
//! - Clear failure boundaries: OrderedCore sequences all user-code calls
//!   before its first structural change, so the handle's prepare-then-commit
//!   flows need no unwind handling of their own.
//!
//! Copy-on-write and escape tracking
//! - Handles reference one Shared block; `Rc::strong_count > 1` means a
//!   sibling observes it, so a mutating handle detaches onto a deep copy
//!   first (`make_unique`).
//! - `at_mut` and indexed access hand out `&mut V`. From that point on the
//!   block's bookkeeping can no longer vouch for writes through such a
//!   reference, so the block is flagged and subsequent handle clones
//!   deep-copy eagerly. Every successful structural mutation and every deep
//!   copy resets the flag.
//!
//! Failure-safety mechanics
//! - Per-entry hashes are precomputed; rehashing and deep copies never call
//!   `K: Hash`.
//! - Within an exclusive mutation, user code only runs before the first
//!   structural step; the remaining steps are infallible.
//! - Multi-step flows (detach, merge) build a working block aside and
//!   commit it with a single `Rc` assignment.
//!
//! Notes and non-goals
//! - No thread-safety; external synchronization is out of scope.
//! - No sorted iteration and no persistence format.
//! - No mutable iteration: iterators are read-only so that obtaining one
//!   never clones and never flags the block.
//! - Public API surface is `CowOrderMap`, its `Iter`, and `LookupError`;
//!   `order_core` is an implementation detail exposed only for the
//!   `bench_internal` bench target.

mod cow_order_map;
mod guard;
pub mod order_core;
mod order_core_proptest;

// Public surface
pub use cow_order_map::{CowOrderMap, Iter, LookupError};
