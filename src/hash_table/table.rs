use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};

use parking_lot::Mutex;

use super::bucket::{Bucket, Entry};
use super::DefaultHashBuilder;

/// A thread-safe hash table with an extendible directory.
///
/// `ExtendibleHashTable` maps each key to one of `2^global_depth` directory
/// slots by the low bits of its hash. Slots reference buckets holding up to
/// `bucket_capacity` entries each; inserting into a full bucket splits it,
/// growing the directory when needed. Lookups, insertions, and removals are
/// linearized by a single internal lock, so the table can be shared across
/// threads behind an `Arc`.
///
/// Inserting an already-present key overwrites its value in place and never
/// grows the table.
///
/// # Hashing Algorithm
///
/// By default the table hashes keys with
/// `std::collections::hash_map::RandomState`, the same HashDoS-resistant
/// hasher used by `std::collections::HashMap`. A different algorithm can be
/// supplied per table with [`with_hasher`](Self::with_hasher).
///
/// # Examples
///
/// ```rust
/// use bufcore::ExtendibleHashTable;
///
/// let table: ExtendibleHashTable<u64, String> = ExtendibleHashTable::new(4);
///
/// table.insert(1, "frame one".to_string());
/// table.insert(2, "frame two".to_string());
///
/// assert_eq!(table.get(&1), Some("frame one".to_string()));
/// assert_eq!(table.remove(&2), Some("frame two".to_string()));
/// assert_eq!(table.get(&2), None);
/// ```
pub struct ExtendibleHashTable<K, V, S = DefaultHashBuilder> {
    inner: Mutex<Dir<K, V>>,
    build_hasher: S,
}

impl<K, V> ExtendibleHashTable<K, V, DefaultHashBuilder>
where
    K: Hash + Eq,
{
    /// Creates a table whose buckets hold up to `bucket_capacity` entries.
    ///
    /// The table starts with a global depth of zero: a single-slot directory
    /// referencing one empty bucket.
    ///
    /// # Panics
    ///
    /// Panics if `bucket_capacity` is zero.
    pub fn new(bucket_capacity: usize) -> Self {
        Self::with_hasher(bucket_capacity, DefaultHashBuilder::default())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Creates a table that uses `build_hasher` to hash keys.
    ///
    /// # Panics
    ///
    /// Panics if `bucket_capacity` is zero.
    pub fn with_hasher(bucket_capacity: usize, build_hasher: S) -> Self {
        assert!(bucket_capacity >= 1, "bucket_capacity must be at least 1");
        Self {
            inner: Mutex::new(Dir::new(bucket_capacity)),
            build_hasher,
        }
    }

    /// Returns a clone of the value bound to `key`, if any.
    ///
    /// The key may be any borrowed form of the table's key type, with `Hash`
    /// and `Eq` on the borrowed form matching the key type.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let hash = self.hash(key);
        let dir = self.inner.lock();
        dir.bucket_for(hash).get(hash, key).cloned()
    }

    /// Binds `key` to `value`, overwriting any previous binding.
    ///
    /// Splits the target bucket, doubling the directory when the bucket
    /// already uses every directory bit, until the entry fits. An overwrite
    /// never splits.
    pub fn insert(&self, key: K, value: V) {
        let hash = self.hash(&key);
        self.inner.lock().insert(hash, key, value);
    }

    /// Unbinds `key`, returning the value it was bound to.
    ///
    /// The directory and buckets are left as they are; removal never shrinks
    /// the table.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash(key);
        self.inner.lock().remove(hash, key)
    }

    /// Returns the number of low-order hash bits used to index the
    /// directory.
    pub fn global_depth(&self) -> usize {
        self.inner.lock().global_depth
    }

    /// Returns the local depth of the bucket referenced by directory slot
    /// `dir_index`.
    ///
    /// # Panics
    ///
    /// Panics if `dir_index` is not below `2^global_depth`.
    pub fn local_depth(&self, dir_index: usize) -> usize {
        let dir = self.inner.lock();
        dir.buckets[dir.slots[dir_index]].local_depth
    }

    /// Returns the number of distinct buckets referenced by the directory.
    pub fn num_buckets(&self) -> usize {
        self.inner.lock().buckets.len()
    }

    /// Returns the number of entries in the table.
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// Returns `true` if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().len == 0
    }

    /// Returns the maximum number of entries a single bucket may hold.
    pub fn bucket_capacity(&self) -> usize {
        self.inner.lock().bucket_capacity
    }

    #[inline]
    fn hash<Q>(&self, key: &Q) -> u64
    where
        Q: Hash + ?Sized,
    {
        let mut hasher = self.build_hasher.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }
}

impl<K, V, S> fmt::Debug for ExtendibleHashTable<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = self.inner.lock();
        f.debug_struct("ExtendibleHashTable")
            .field("global_depth", &dir.global_depth)
            .field("num_buckets", &dir.buckets.len())
            .field("len", &dir.len)
            .finish()
    }
}

/// Directory plus the bucket arena. Guarded by the table lock.
///
/// `slots[s]` is an index into `buckets`; a bucket with
/// `local_depth < global_depth` is carried by several slots. Buckets are
/// created by splits and never destroyed, so `buckets.len()` equals the
/// number of distinct buckets the directory references.
struct Dir<K, V> {
    global_depth: usize,
    slots: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
    bucket_capacity: usize,
    len: usize,
}

impl<K, V> Dir<K, V>
where
    K: Eq,
{
    fn new(bucket_capacity: usize) -> Self {
        Self {
            global_depth: 0,
            slots: vec![0],
            buckets: vec![Bucket::new(0)],
            bucket_capacity,
            len: 0,
        }
    }

    #[inline]
    fn slot_of(&self, hash: u64) -> usize {
        (hash & low_bits(self.global_depth)) as usize
    }

    fn bucket_for(&self, hash: u64) -> &Bucket<K, V> {
        &self.buckets[self.slots[self.slot_of(hash)]]
    }

    fn insert(&mut self, hash: u64, key: K, value: V) {
        loop {
            let slot = self.slot_of(hash);
            let bucket = &mut self.buckets[self.slots[slot]];

            if let Some(bound) = bucket.value_mut(hash, &key) {
                *bound = value;
                return;
            }
            if bucket.len() < self.bucket_capacity {
                bucket.push(Entry { hash, key, value });
                self.len += 1;
                return;
            }

            // Full, and the key is new. One split is not always enough: the
            // redistribution can leave every colliding entry on one side, so
            // retry from the slot computation.
            self.split(slot);
        }
    }

    fn remove<Q>(&mut self, hash: u64, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let bucket_index = self.slots[self.slot_of(hash)];
        let removed = self.buckets[bucket_index].remove(hash, key);
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// One expansion/split step for the full bucket at directory slot
    /// `slot`.
    fn split(&mut self, slot: usize) {
        let origin_index = self.slots[slot];

        // A bucket whose local depth has caught up with the global depth
        // needs the directory doubled before it can split.
        if self.buckets[origin_index].local_depth == self.global_depth {
            self.double();
        }

        let local_depth = {
            let origin = &mut self.buckets[origin_index];
            origin.local_depth += 1;
            origin.local_depth
        };
        debug_assert!(local_depth <= u64::BITS as usize);

        let mask = low_bits(local_depth);
        let origin_pattern = slot as u64 & mask;
        let image_pattern = origin_pattern ^ (1u64 << (local_depth - 1));

        // Snapshot the origin's entries, then redistribute between the two
        // sides. Every entry shares the origin's low `local_depth - 1` bits,
        // so each one lands on exactly one of the two patterns.
        let entries = self.buckets[origin_index].take_entries();
        let image_index = self.buckets.len();
        self.buckets.push(Bucket::new(local_depth));
        for entry in entries {
            if entry.hash & mask == image_pattern {
                self.buckets[image_index].push(entry);
            } else {
                self.buckets[origin_index].push(entry);
            }
        }

        for (s, slot_bucket) in self.slots.iter_mut().enumerate() {
            let pattern = s as u64 & mask;
            if pattern == origin_pattern {
                *slot_bucket = origin_index;
            } else if pattern == image_pattern {
                *slot_bucket = image_index;
            }
        }
    }

    /// Doubles the directory so that slot `i + 2^old_depth` references the
    /// same bucket as slot `i`.
    fn double(&mut self) {
        self.global_depth += 1;
        self.slots.extend_from_within(..);
    }
}

/// Mask selecting the `depth` low-order bits of a hash.
#[inline]
fn low_bits(depth: usize) -> u64 {
    debug_assert!(depth <= u64::BITS as usize);
    if depth == u64::BITS as usize {
        u64::MAX
    } else {
        (1u64 << depth) - 1
    }
}

// Methods only available for testing.
#[cfg(test)]
impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Asserts the structural invariants: directory-bucket coherence, the
    /// slot-sharing rule, and unique key bindings.
    pub(crate) fn check_invariants(&self) {
        let dir = self.inner.lock();
        assert_eq!(dir.slots.len(), 1usize << dir.global_depth);

        for (s, &bucket_index) in dir.slots.iter().enumerate() {
            let bucket = &dir.buckets[bucket_index];
            assert!(bucket.local_depth <= dir.global_depth);
            let mask = low_bits(bucket.local_depth);
            for entry in bucket.entries() {
                assert_eq!(entry.hash & mask, s as u64 & mask);
            }
        }

        for (bucket_index, bucket) in dir.buckets.iter().enumerate() {
            let refs = dir.slots.iter().filter(|&&i| i == bucket_index).count();
            assert_eq!(refs, 1usize << (dir.global_depth - bucket.local_depth));
        }

        let mut keys = std::collections::HashSet::new();
        for bucket in &dir.buckets {
            assert!(bucket.len() <= dir.bucket_capacity);
            for entry in bucket.entries() {
                assert!(keys.insert(&entry.key), "key bound in two buckets");
            }
        }
        assert_eq!(keys.len(), dir.len);
    }
}
