use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;

/// Extendible hash table: a directory of shared buckets whose size is always
/// 2^global_depth. The buffer pool uses it as its page-id -> frame-id map.
///
/// A single table-level mutex serializes all operations.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    state: Mutex<TableState<K, V>>,
}

struct TableState<K, V> {
    global_depth: usize,
    num_buckets: usize,
    dir: Vec<Arc<Mutex<Bucket<K, V>>>>,
}

struct Bucket<K, V> {
    depth: usize,
    items: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V> {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            items: Vec::new(),
        }
    }
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    pub fn new(bucket_size: usize) -> Self {
        Self {
            bucket_size,
            state: Mutex::new(TableState {
                global_depth: 0,
                num_buckets: 1,
                dir: vec![Arc::new(Mutex::new(Bucket::new(0)))],
            }),
        }
    }

    fn hash(key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as usize
    }

    fn index_of(key: &K, global_depth: usize) -> usize {
        let mask = (1usize << global_depth) - 1;
        Self::hash(key) & mask
    }

    /// Find the value associated with the given key.
    pub fn find(&self, key: &K) -> Option<V> {
        let state = self.state.lock();
        let bucket = state.dir[Self::index_of(key, state.global_depth)].lock();
        bucket
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Remove the key-value pair for the given key. Directory shrinking is
    /// not performed.
    pub fn remove(&self, key: &K) -> bool {
        let state = self.state.lock();
        let mut bucket = state.dir[Self::index_of(key, state.global_depth)].lock();
        match bucket.items.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                bucket.items.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Insert the key-value pair, updating in place if the key is present.
    /// On a full bucket: double the directory while the bucket's local depth
    /// equals the global depth, then split the bucket, redistributing entries
    /// by the new high bit and rewriting every directory slot that pointed at
    /// the old bucket.
    pub fn insert(&self, key: K, value: V) {
        let mut state = self.state.lock();
        loop {
            let idx = Self::index_of(&key, state.global_depth);
            let bucket_ptr = state.dir[idx].clone();
            let mut bucket = bucket_ptr.lock();

            if let Some(entry) = bucket.items.iter_mut().find(|(k, _)| k == &key) {
                entry.1 = value;
                return;
            }
            if bucket.items.len() < self.bucket_size {
                bucket.items.push((key, value));
                return;
            }

            if bucket.depth == state.global_depth {
                state.global_depth += 1;
                let dir_size = state.dir.len();
                for i in 0..dir_size {
                    let shared = state.dir[i].clone();
                    state.dir.push(shared);
                }
            }

            let local_depth = bucket.depth + 1;
            let mask = 1usize << (local_depth - 1);
            let zero_bucket = Arc::new(Mutex::new(Bucket::new(local_depth)));
            let one_bucket = Arc::new(Mutex::new(Bucket::new(local_depth)));
            for (k, v) in bucket.items.drain(..) {
                if Self::hash(&k) & mask != 0 {
                    one_bucket.lock().items.push((k, v));
                } else {
                    zero_bucket.lock().items.push((k, v));
                }
            }
            drop(bucket);

            for i in 0..state.dir.len() {
                if Arc::ptr_eq(&state.dir[i], &bucket_ptr) {
                    state.dir[i] = if i & mask != 0 {
                        one_bucket.clone()
                    } else {
                        zero_bucket.clone()
                    };
                }
            }
            state.num_buckets += 1;
        }
    }

    pub fn global_depth(&self) -> usize {
        self.state.lock().global_depth
    }

    pub fn local_depth(&self, dir_index: usize) -> usize {
        self.state.lock().dir[dir_index].lock().depth
    }

    pub fn num_buckets(&self) -> usize {
        self.state.lock().num_buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_find_remove() {
        let table = ExtendibleHashTable::<u32, u32>::new(4);
        for i in 0..32 {
            table.insert(i, i * 10);
        }
        for i in 0..32 {
            assert_eq!(table.find(&i), Some(i * 10));
        }
        assert_eq!(table.find(&100), None);

        assert!(table.remove(&5));
        assert!(!table.remove(&5));
        assert_eq!(table.find(&5), None);
    }

    #[test]
    fn test_insert_updates_existing_key() {
        let table = ExtendibleHashTable::<u32, String>::new(2);
        table.insert(1, "a".to_string());
        table.insert(1, "b".to_string());
        assert_eq!(table.find(&1), Some("b".to_string()));
    }

    #[test]
    fn test_directory_grows_on_split() {
        let table = ExtendibleHashTable::<u32, u32>::new(1);
        for i in 0..16 {
            table.insert(i, i);
        }
        assert!(table.global_depth() > 0);
        assert!(table.num_buckets() > 1);
        for i in 0..16 {
            assert_eq!(table.find(&i), Some(i));
        }
    }

    #[test]
    fn test_concurrent_inserts() {
        use std::sync::Arc;
        use std::thread;

        let table = Arc::new(ExtendibleHashTable::<u32, u32>::new(3));
        let mut handles = Vec::new();
        for t in 0..4u32 {
            let table = table.clone();
            handles.push(thread::spawn(move || {
                for i in 0..64u32 {
                    table.insert(t * 64 + i, i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        for t in 0..4u32 {
            for i in 0..64u32 {
                assert_eq!(table.find(&(t * 64 + i)), Some(i));
            }
        }
    }
}
