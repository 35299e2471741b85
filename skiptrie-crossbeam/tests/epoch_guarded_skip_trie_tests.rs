//! Integration and concurrency tests for the epoch-guarded SkipTrie.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use skiptrie_crossbeam::EpochGuardedSkipTrie;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::thread;

#[test]
fn test_concurrent_disjoint_ranges() {
    let set = Arc::new(EpochGuardedSkipTrie::new());
    let threads = 10;
    let span = 100u32;

    let mut handles = vec![];
    for group in 0..threads {
        let set = Arc::clone(&set);
        handles.push(thread::spawn(move || {
            let base = group * span;
            for key in base..base + span {
                assert!(set.insert(key), "duplicate insert of {}", key);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for key in 0..threads * span {
        assert!(set.contains(key), "missing {}", key);
    }
    assert_eq!(set.len(), (threads * span) as usize);

    // Each thread deletes the lower half of its own range
    let mut handles = vec![];
    for group in 0..threads {
        let set = Arc::clone(&set);
        handles.push(thread::spawn(move || {
            let base = group * span;
            for key in base..base + span / 2 {
                assert!(set.delete(key), "failed to delete {}", key);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for group in 0..threads {
        let base = group * span;
        for key in base..base + span / 2 {
            assert!(!set.contains(key), "{} should be deleted", key);
        }
        for key in base + span / 2..base + span {
            assert!(set.contains(key), "{} should remain", key);
        }
    }
    assert_eq!(set.len(), (threads * span / 2) as usize);
}

#[test]
fn test_randomized_against_reference() {
    let set = EpochGuardedSkipTrie::new();
    let mut reference: HashSet<u32> = HashSet::new();
    let mut ordered: BTreeSet<u32> = BTreeSet::new();
    let mut rng = StdRng::seed_from_u64(42);

    for step in 0..1000 {
        let key = rng.gen_range(0..64u32);
        match rng.gen_range(0..3) {
            0 => {
                let expected = reference.insert(key);
                ordered.insert(key);
                assert_eq!(set.insert(key), expected, "insert({}) at step {}", key, step);
            }
            1 => {
                let expected = reference.contains(&key);
                assert_eq!(
                    set.contains(key),
                    expected,
                    "contains({}) at step {}",
                    key,
                    step
                );
            }
            _ => {
                let expected = reference.remove(&key);
                ordered.remove(&key);
                assert_eq!(set.delete(key), expected, "delete({}) at step {}", key, step);
            }
        }

        // Predecessor must agree with the ordered oracle at every step
        let probe = rng.gen_range(0..66u32);
        let expected = ordered.range(..probe).next_back().copied();
        let actual = set.predecessor(probe).map(|p| *p);
        assert_eq!(actual, expected, "predecessor({}) at step {}", probe, step);
    }

    assert_eq!(set.len(), reference.len());
}

#[test]
fn test_concurrent_mixed_operations() {
    let set = Arc::new(EpochGuardedSkipTrie::new());
    let key_space = 256u32;

    // Writers churn disjoint key slices while readers query the whole range
    let mut handles = vec![];
    for writer in 0..4u32 {
        let set = Arc::clone(&set);
        handles.push(thread::spawn(move || {
            let base = writer * (key_space / 4);
            for round in 0..200 {
                for offset in 0..key_space / 4 {
                    let key = base + offset;
                    if round % 2 == 0 {
                        set.insert(key);
                    } else {
                        set.delete(key);
                    }
                }
            }
        }));
    }
    for _ in 0..4 {
        let set = Arc::clone(&set);
        handles.push(thread::spawn(move || {
            for _ in 0..100 {
                for key in 0..key_space {
                    // No assertion on the value: membership is in flux.
                    // The walk itself must stay safe and terminate.
                    let _ = set.contains(key);
                    if let Some(pred) = set.predecessor(key) {
                        assert!(*pred < key);
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Writers ran an even number of rounds, ending on deletes
    for key in 0..key_space {
        assert!(!set.contains(key), "{} should have been deleted", key);
    }
    assert!(set.is_empty());
    assert!(set.predecessor(u32::MAX).is_none());
}

#[test]
fn test_reclamation_rounds() {
    // Insert-then-delete churn across many epochs: the structure must come
    // back empty every round and deferred destructions must keep draining
    let set = EpochGuardedSkipTrie::new();

    for round in 0..100u32 {
        for i in 0..1000u32 {
            assert!(set.insert(i * 3 + 1));
        }
        assert_eq!(set.len(), 1000, "round {}", round);

        for i in 0..1000u32 {
            assert!(set.delete(i * 3 + 1));
        }
        assert!(set.is_empty(), "round {}", round);
        assert!(set.predecessor(u32::MAX).is_none());
    }
}

#[test]
fn test_concurrent_same_key_contention() {
    // All threads fight over the same few keys; exactly one delete per
    // present key may win at a time
    let set = Arc::new(EpochGuardedSkipTrie::new());

    let mut handles = vec![];
    for _ in 0..8 {
        let set = Arc::clone(&set);
        handles.push(thread::spawn(move || {
            let mut wins = 0isize;
            for round in 0..500 {
                let key = round % 4;
                if set.insert(key) {
                    wins += 1;
                }
                if set.delete(key) {
                    wins -= 1;
                }
            }
            wins
        }));
    }

    let net: isize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    // Every successful insert is matched by exactly one successful delete
    // except for keys left in the set at the end
    let remaining = (0..4u32).filter(|&k| set.contains(k)).count() as isize;
    assert_eq!(net, remaining);
    assert_eq!(set.len() as isize, remaining);
}
