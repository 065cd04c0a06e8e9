#![cfg(test)]

// Property tests for OrderedCore kept inside the crate so they do not
// require feature gates to access internal modules.
//
// Model: a Vec<(String, i32)> in insertion order. Insert of a present key
// keeps its value and moves the pair to the back; remove deletes the pair;
// the core must match the model pair-for-pair after every operation.

use crate::order_core::OrderedCore;
use proptest::prelude::*;
use std::borrow::Borrow;
use std::fmt;

// Key newtype with Borrow<str> to exercise borrowed lookup.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct Key(String);
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// Pool-indexed operations to improve shrinking: indices shrink to earlier
// keys, pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    InsertWith(usize, i32),
    Remove(usize),
    Find(usize),
    Contains(String),
    Mutate(usize, i32),
    Clear,
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,5}", 1..=8).prop_flat_map(|pool| {
        let mut dedup = pool.clone();
        dedup.sort();
        dedup.dedup();
        let idxs: Vec<usize> = (0..dedup.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(dedup.clone());
        let op = prop_oneof![
            8 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            4 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::InsertWith(i, v)),
            4 => idx.clone().prop_map(OpI::Remove),
            2 => idx.clone().prop_map(OpI::Find),
            2 => prop_oneof![
                contains_pool.prop_map(|s: String| s),
                "[a-z]{0,5}".prop_map(|s| s)
            ]
            .prop_map(OpI::Contains),
            4 => (idx, any::<i32>()).prop_map(|(i, d)| OpI::Mutate(i, d)),
            1 => Just(OpI::Clear),
        ];
        (
            Just(dedup),
            proptest::collection::vec(op, 1..=64),
        )
    })
}

// Reference semantics of insert: value retained for present keys, entry
// moved to the back either way.
fn model_insert(model: &mut Vec<(String, i32)>, key: &str, value: i32) -> bool {
    if let Some(pos) = model.iter().position(|(k, _)| k == key) {
        let entry = model.remove(pos);
        model.push(entry);
        false
    } else {
        model.push((key.to_string(), value));
        true
    }
}

fn assert_matches_model(
    core: &OrderedCore<Key, i32>,
    model: &[(String, i32)],
) -> Result<(), TestCaseError> {
    prop_assert_eq!(core.len(), model.len());
    prop_assert_eq!(core.is_empty(), model.is_empty());
    let got: Vec<(String, i32)> = core.iter().map(|(k, v)| (k.0.clone(), *v)).collect();
    prop_assert_eq!(got, model.to_vec());
    Ok(())
}

proptest! {
    // Invariant: after every operation, the core's length, order, and
    // values match the reference model exactly.
    #[test]
    fn prop_core_matches_order_model((pool, ops) in arb_scenario()) {
        let mut core: OrderedCore<Key, i32> = OrderedCore::new();
        let mut model: Vec<(String, i32)> = Vec::new();

        for op in ops {
            match op {
                OpI::Insert(i, v) => {
                    let newly = core.insert(Key(pool[i].clone()), v);
                    let expect = model_insert(&mut model, &pool[i], v);
                    prop_assert_eq!(newly, expect);
                }
                OpI::InsertWith(i, v) => {
                    let (slot, newly) = core.insert_with(Key(pool[i].clone()), || v);
                    let expect = model_insert(&mut model, &pool[i], v);
                    prop_assert_eq!(newly, expect);
                    // The slot must resolve to the modeled value either way.
                    let modeled = model.last().map(|(_, mv)| *mv);
                    prop_assert_eq!(core.slot_value(slot).copied(), modeled);
                }
                OpI::Remove(i) => {
                    let removed = core.remove(pool[i].as_str());
                    let pos = model.iter().position(|(k, _)| k == &pool[i]);
                    match pos {
                        Some(p) => {
                            let (mk, mv) = model.remove(p);
                            prop_assert_eq!(removed, Some((Key(mk), mv)));
                        }
                        None => prop_assert_eq!(removed, None),
                    }
                }
                OpI::Find(i) => {
                    let present = model.iter().any(|(k, _)| k == &pool[i]);
                    prop_assert_eq!(core.find(pool[i].as_str()).is_some(), present);
                }
                OpI::Contains(s) => {
                    let present = model.iter().any(|(k, _)| k == &s);
                    prop_assert_eq!(core.contains_key(s.as_str()), present);
                }
                OpI::Mutate(i, d) => {
                    if let Some(slot) = core.find(pool[i].as_str()) {
                        let v = core.slot_value_mut(slot).expect("found slot is live");
                        *v = v.wrapping_add(d);
                    }
                    if let Some(entry) = model.iter_mut().find(|(k, _)| k == &pool[i]) {
                        entry.1 = entry.1.wrapping_add(d);
                    }
                }
                OpI::Clear => {
                    core.clear();
                    model.clear();
                }
            }

            assert_matches_model(&core, &model)?;
        }

        // Drain through the front to exercise head-side unlinks.
        while let Some((k, _)) = model.first().cloned() {
            model.remove(0);
            prop_assert!(core.remove(k.as_str()).is_some());
            assert_matches_model(&core, &model)?;
        }
        prop_assert!(core.is_empty());
    }
}
