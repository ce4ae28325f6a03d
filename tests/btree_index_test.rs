use anyhow::Result;
use rand::seq::SliceRandom;
use rand::thread_rng;
use std::sync::Arc;

use tarndb::common::types::{Rid, HEADER_PAGE_ID};
use tarndb::storage::page::HeaderPage;
use tarndb::BPlusTree;

mod common;
use common::create_test_buffer_pool;

fn rid(value: i64) -> Rid {
    Rid::new(1, value as u32)
}

#[test]
fn test_insert_and_find() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(16)?;
    let tree = BPlusTree::<i64>::new("idx", buffer_pool, 4, 4)?;

    for key in [5i64, 3, 8, 2, 7] {
        assert!(tree.insert(key, rid(key))?);
    }
    for key in [5i64, 3, 8, 2, 7] {
        assert_eq!(tree.get_value(&key)?, Some(rid(key)));
    }
    assert_eq!(tree.get_value(&100)?, None);
    Ok(())
}

#[test]
fn test_duplicate_insert_rejected() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(16)?;
    let tree = BPlusTree::<i64>::new("idx", buffer_pool, 4, 4)?;

    assert!(tree.insert(1, rid(1))?);
    assert!(!tree.insert(1, Rid::new(9, 9))?);
    // the original value is untouched
    assert_eq!(tree.get_value(&1)?, Some(rid(1)));
    Ok(())
}

/// With leaf max size 4, three keys fit in the root leaf; the fourth insert
/// splits it into {1,2} and {3,4} under a fresh internal root, and the new
/// root id is recorded on the header page.
#[test]
fn test_leaf_split_grows_root() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(16)?;
    let tree = BPlusTree::<i64>::new("split_idx", buffer_pool.clone(), 4, 4)?;

    for key in 1..=3i64 {
        tree.insert(key, rid(key))?;
    }
    let leaf_root = tree.root_page_id();

    tree.insert(4, rid(4))?;
    let new_root = tree.root_page_id();
    assert_ne!(leaf_root, new_root);

    // all four keys remain reachable in order
    let keys: Vec<i64> = tree.iter()?.map(|(key, _)| key).collect();
    assert_eq!(keys, vec![1, 2, 3, 4]);

    // the header page tracked the root change
    let header = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
    let recorded = HeaderPage::get_record(&header.read(), "split_idx");
    buffer_pool.unpin_page(HEADER_PAGE_ID, false);
    assert_eq!(recorded, Some(new_root));
    Ok(())
}

#[test]
fn test_no_split_below_capacity() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(16)?;
    let tree = BPlusTree::<i64>::new("idx", buffer_pool, 4, 4)?;

    tree.insert(1, rid(1))?;
    let root = tree.root_page_id();
    tree.insert(2, rid(2))?;
    tree.insert(3, rid(3))?;
    // still the single leaf root
    assert_eq!(tree.root_page_id(), root);
    Ok(())
}

#[test]
fn test_permutation_iterates_sorted() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(64)?;
    let tree = BPlusTree::<i64>::new("idx", buffer_pool, 4, 4)?;

    let mut keys: Vec<i64> = (0..200).collect();
    keys.shuffle(&mut thread_rng());
    for &key in &keys {
        assert!(tree.insert(key, rid(key))?);
    }

    let scanned: Vec<i64> = tree.iter()?.map(|(key, _)| key).collect();
    assert_eq!(scanned, (0..200).collect::<Vec<_>>());

    for key in 0..200i64 {
        assert_eq!(tree.get_value(&key)?, Some(rid(key)));
    }
    Ok(())
}

#[test]
fn test_iter_from_positions_at_lower_bound() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(32)?;
    let tree = BPlusTree::<i64>::new("idx", buffer_pool, 4, 4)?;

    for key in (0..40i64).step_by(2) {
        tree.insert(key, rid(key))?;
    }

    let from_exact: Vec<i64> = tree.iter_from(&10)?.map(|(key, _)| key).take(3).collect();
    assert_eq!(from_exact, vec![10, 12, 14]);

    let from_gap: Vec<i64> = tree.iter_from(&11)?.map(|(key, _)| key).take(3).collect();
    assert_eq!(from_gap, vec![12, 14, 16]);

    let past_end: Vec<i64> = tree.iter_from(&100)?.map(|(key, _)| key).collect();
    assert!(past_end.is_empty());
    Ok(())
}

#[test]
fn test_remove_missing_key_is_noop() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(16)?;
    let tree = BPlusTree::<i64>::new("idx", buffer_pool, 4, 4)?;

    tree.insert(1, rid(1))?;
    assert!(!tree.remove(&2)?);
    assert_eq!(tree.get_value(&1)?, Some(rid(1)));
    Ok(())
}

#[test]
fn test_insert_then_remove_all() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(64)?;
    let tree = BPlusTree::<i64>::new("idx", buffer_pool, 4, 4)?;

    for key in 0..60i64 {
        tree.insert(key, rid(key))?;
    }
    for key in 0..60i64 {
        assert!(tree.remove(&key)?, "failed to remove {}", key);
        assert_eq!(tree.get_value(&key)?, None);
    }
    assert!(tree.is_empty());
    assert_eq!(tree.iter()?.count(), 0);
    Ok(())
}

#[test]
fn test_remove_interleaved_keeps_rest() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(64)?;
    let tree = BPlusTree::<i64>::new("idx", buffer_pool, 4, 4)?;

    for key in 0..80i64 {
        tree.insert(key, rid(key))?;
    }
    // removing the evens exercises both redistribution and merges
    for key in (0..80i64).step_by(2) {
        assert!(tree.remove(&key)?);
    }

    let remaining: Vec<i64> = tree.iter()?.map(|(key, _)| key).collect();
    assert_eq!(remaining, (1..80).step_by(2).collect::<Vec<_>>());
    for key in (1..80i64).step_by(2) {
        assert_eq!(tree.get_value(&key)?, Some(rid(key)));
    }
    Ok(())
}

#[test]
fn test_reverse_order_removal() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(64)?;
    let tree = BPlusTree::<i64>::new("idx", buffer_pool, 4, 4)?;

    for key in 0..50i64 {
        tree.insert(key, rid(key))?;
    }
    for key in (0..50i64).rev() {
        assert!(tree.remove(&key)?);
    }
    assert!(tree.is_empty());
    Ok(())
}

#[test]
fn test_reopen_recovers_persisted_root() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(32)?;

    {
        let tree = BPlusTree::<i64>::new("persistent", buffer_pool.clone(), 4, 4)?;
        for key in 0..20i64 {
            tree.insert(key, rid(key))?;
        }
    }

    // a fresh handle under the same name resumes from the header page
    let reopened = BPlusTree::<i64>::new("persistent", buffer_pool, 4, 4)?;
    assert!(!reopened.is_empty());
    for key in 0..20i64 {
        assert_eq!(reopened.get_value(&key)?, Some(rid(key)));
    }
    Ok(())
}

/// Concurrent disjoint inserts through latch crabbing: the finished tree
/// contains every key exactly once, in order.
#[test]
fn test_concurrent_inserts() -> Result<()> {
    use std::thread;

    let (buffer_pool, _file) = create_test_buffer_pool(128)?;
    let tree = Arc::new(BPlusTree::<i64>::new("concurrent", buffer_pool, 4, 4)?);

    const THREADS: i64 = 4;
    const PER_THREAD: i64 = 100;

    let mut handles = Vec::new();
    for t in 0..THREADS {
        let tree = tree.clone();
        handles.push(thread::spawn(move || {
            for i in 0..PER_THREAD {
                let key = i * THREADS + t;
                assert!(tree.insert(key, rid(key)).unwrap());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let scanned: Vec<i64> = tree.iter()?.map(|(key, _)| key).collect();
    assert_eq!(scanned.len(), (THREADS * PER_THREAD) as usize);
    assert_eq!(scanned, (0..THREADS * PER_THREAD).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_concurrent_readers_and_writer() -> Result<()> {
    use std::thread;

    let (buffer_pool, _file) = create_test_buffer_pool(128)?;
    let tree = Arc::new(BPlusTree::<i64>::new("mixed", buffer_pool, 4, 4)?);

    for key in 0..100i64 {
        tree.insert(key, rid(key))?;
    }

    let writer = {
        let tree = tree.clone();
        thread::spawn(move || {
            for key in 100..200i64 {
                tree.insert(key, rid(key)).unwrap();
            }
        })
    };
    let mut readers = Vec::new();
    for _ in 0..3 {
        let tree = tree.clone();
        readers.push(thread::spawn(move || {
            for _ in 0..50 {
                for key in 0..100i64 {
                    assert_eq!(tree.get_value(&key).unwrap(), Some(rid(key)));
                }
            }
        }));
    }

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(tree.iter()?.count(), 200);
    Ok(())
}
