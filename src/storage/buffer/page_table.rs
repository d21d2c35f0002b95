use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use parking_lot::Mutex;

/// A bucket in the arena. `local_depth` low bits of the hash are shared by
/// every key stored here.
struct Bucket<K, V> {
    local_depth: usize,
    items: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V> {
    fn new(local_depth: usize) -> Self {
        Self {
            local_depth,
            items: Vec::new(),
        }
    }
}

struct Directory<K, V> {
    global_depth: usize,
    /// 2^global_depth slots, each an index into `buckets`
    slots: Vec<usize>,
    /// Bucket arena; directory slots share buckets by index
    buckets: Vec<Bucket<K, V>>,
}

/// In-memory extendible hash table, used as the buffer pool's page table.
///
/// The directory doubles when a full bucket's local depth reaches the global
/// depth; a full bucket splits on the next discriminating bit. The directory
/// never shrinks.
pub struct ExtendibleHashTable<K, V> {
    inner: Mutex<Directory<K, V>>,
    bucket_size: usize,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        Self {
            inner: Mutex::new(Directory {
                global_depth: 0,
                slots: vec![0],
                buckets: vec![Bucket::new(0)],
            }),
            bucket_size,
        }
    }

    fn hash(key: &K) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn slot_of(dir: &Directory<K, V>, key: &K) -> usize {
        (Self::hash(key) & ((1u64 << dir.global_depth) - 1)) as usize
    }

    /// Look up the value bound to `key`
    pub fn find(&self, key: &K) -> Option<V> {
        let dir = self.inner.lock();
        let bucket = &dir.buckets[dir.slots[Self::slot_of(&dir, key)]];
        bucket
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Bind `key` to `value`, overwriting any existing binding. Splits the
    /// target bucket (doubling the directory as needed) until the insert
    /// fits.
    pub fn insert(&self, key: K, value: V) {
        let mut dir = self.inner.lock();

        loop {
            let slot = Self::slot_of(&dir, &key);
            let bucket_idx = dir.slots[slot];
            let bucket = &mut dir.buckets[bucket_idx];

            if let Some(entry) = bucket.items.iter_mut().find(|(k, _)| *k == key) {
                entry.1 = value;
                return;
            }
            if bucket.items.len() < self.bucket_size {
                bucket.items.push((key, value));
                return;
            }

            Self::split_bucket(&mut dir, bucket_idx);
        }
    }

    /// Remove the binding for `key`, reporting whether one existed
    pub fn remove(&self, key: &K) -> bool {
        let mut dir = self.inner.lock();
        let slot = Self::slot_of(&dir, key);
        let bucket_idx = dir.slots[slot];
        let bucket = &mut dir.buckets[bucket_idx];
        match bucket.items.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                bucket.items.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Split the bucket at arena index `bucket_idx`, doubling the directory
    /// first if the bucket is already at global depth.
    fn split_bucket(dir: &mut Directory<K, V>, bucket_idx: usize) {
        if dir.buckets[bucket_idx].local_depth == dir.global_depth {
            // Duplicate every slot; the new half mirrors the old
            let old_len = dir.slots.len();
            dir.slots.extend_from_within(0..old_len);
            dir.global_depth += 1;
        }

        let new_depth = dir.buckets[bucket_idx].local_depth + 1;
        dir.buckets[bucket_idx].local_depth = new_depth;

        // The sibling takes the items whose next discriminating bit is set
        let discriminant = 1u64 << (new_depth - 1);
        let mut sibling = Bucket::new(new_depth);
        let retained: Vec<(K, V)> = {
            let bucket = &mut dir.buckets[bucket_idx];
            let items = std::mem::take(&mut bucket.items);
            let mut keep = Vec::with_capacity(items.len());
            for (k, v) in items {
                if Self::hash(&k) & discriminant != 0 {
                    sibling.items.push((k, v));
                } else {
                    keep.push((k, v));
                }
            }
            keep
        };
        dir.buckets[bucket_idx].items = retained;

        let sibling_idx = dir.buckets.len();
        dir.buckets.push(sibling);

        // Re-point every directory slot that referenced the split bucket:
        // slots whose discriminating bit is set now go to the sibling.
        for (slot, target) in dir.slots.iter_mut().enumerate() {
            if *target == bucket_idx && (slot as u64) & discriminant != 0 {
                *target = sibling_idx;
            }
        }
    }

    /// Global depth of the directory
    pub fn global_depth(&self) -> usize {
        self.inner.lock().global_depth
    }

    /// Local depth of the bucket behind directory slot `dir_index`
    pub fn local_depth(&self, dir_index: usize) -> usize {
        let dir = self.inner.lock();
        dir.buckets[dir.slots[dir_index]].local_depth
    }

    /// Number of distinct buckets
    pub fn num_buckets(&self) -> usize {
        self.inner.lock().buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_find_remove() {
        let table: ExtendibleHashTable<u32, usize> = ExtendibleHashTable::new(4);

        for i in 0..32u32 {
            table.insert(i, i as usize * 10);
        }
        for i in 0..32u32 {
            assert_eq!(table.find(&i), Some(i as usize * 10));
        }
        assert_eq!(table.find(&99), None);

        assert!(table.remove(&7));
        assert!(!table.remove(&7));
        assert_eq!(table.find(&7), None);
        assert_eq!(table.find(&8), Some(80));
    }

    #[test]
    fn test_insert_overwrites_existing_key() {
        let table: ExtendibleHashTable<u32, usize> = ExtendibleHashTable::new(2);

        table.insert(1, 100);
        table.insert(1, 200);
        assert_eq!(table.find(&1), Some(200));
    }

    #[test]
    fn test_directory_grows_under_load() {
        let table: ExtendibleHashTable<u32, usize> = ExtendibleHashTable::new(1);

        for i in 0..64u32 {
            table.insert(i, i as usize);
        }
        assert!(table.global_depth() > 0);
        assert!(table.num_buckets() > 1);
        for i in 0..64u32 {
            assert_eq!(table.find(&i), Some(i as usize));
        }
    }

    #[test]
    fn test_directory_invariant_holds() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(2);

        for i in 0..128u32 {
            table.insert(i, i);
        }

        // Every slot's local depth is bounded by the global depth, and slots
        // that agree on the low local-depth bits share a bucket.
        let global = table.global_depth();
        for slot in 0..(1usize << global) {
            assert!(table.local_depth(slot) <= global);
        }
    }

    #[test]
    fn test_remove_does_not_shrink_directory() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(1);

        for i in 0..16u32 {
            table.insert(i, i);
        }
        let depth = table.global_depth();
        let buckets = table.num_buckets();
        for i in 0..16u32 {
            table.remove(&i);
        }
        assert_eq!(table.global_depth(), depth);
        assert_eq!(table.num_buckets(), buckets);
    }
}
