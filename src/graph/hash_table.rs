use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use fxhash::FxHasher;
use tracing::info;

use crate::graph::binary_kmer::BinaryKmer;
use crate::graph::node::{HashKey, HASH_NOT_FOUND};

/// Slots per bucket. Capacity is always a multiple of this.
pub const BUCKET_SIZE: usize = 64;

/// How many salted bucket choices a key probes before insertion fails.
pub const REHASH_LIMIT: usize = 16;

/// Slot value meaning "unassigned". For k ≤ 31 the two top bits of a
/// packed kmer are zero, so no valid key collides with this.
const UNSET: u64 = u64::MAX;

/// Fixed-capacity concurrent set of canonical kmers.
///
/// Open addressing over buckets of `BUCKET_SIZE` slots: a key hashes to
/// a bucket (a fresh salt per probe attempt) and occupies the next free
/// slot inside it. Buckets fill front to back and never shrink, so a
/// reader that sees a non-full bucket without its key knows the key is
/// absent. Writers serialise per bucket; readers are lock-free.
pub struct HashTable {
    slots: Vec<AtomicU64>,
    bucket_fill: Vec<AtomicU8>,
    bucket_locks: Vec<Mutex<()>>,
    num_buckets: usize,
    num_kmers: AtomicU64,
    collisions: [AtomicU64; REHASH_LIMIT],
}

#[inline]
fn bucket_hash(bkey: BinaryKmer, attempt: usize, num_buckets: usize) -> usize {
    let mut hasher = FxHasher::default();
    hasher.write_u64(attempt as u64);
    hasher.write_u64(bkey.0);
    // num_buckets is a power of two
    (hasher.finish() as usize) & (num_buckets - 1)
}

impl HashTable {
    /// Allocate a table with room for at least `capacity` kmers.
    /// Rounds up to a power-of-two bucket count; no growth afterwards.
    pub fn new(capacity: u64) -> HashTable {
        assert!(capacity > 0);
        let num_buckets = ((capacity as usize + BUCKET_SIZE - 1) / BUCKET_SIZE)
            .next_power_of_two();
        let nslots = num_buckets * BUCKET_SIZE;

        let slots = (0..nslots).map(|_| AtomicU64::new(UNSET)).collect();
        let bucket_fill = (0..num_buckets).map(|_| AtomicU8::new(0)).collect();
        let bucket_locks = (0..num_buckets).map(|_| Mutex::new(())).collect();

        HashTable {
            slots,
            bucket_fill,
            bucket_locks,
            num_buckets,
            num_kmers: AtomicU64::new(0),
            collisions: Default::default(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        (self.num_buckets * BUCKET_SIZE) as u64
    }

    #[inline]
    pub fn num_kmers(&self) -> u64 {
        self.num_kmers.load(Ordering::Relaxed)
    }

    /// Is the slot at `hkey` assigned?
    #[inline]
    pub fn slot_assigned(&self, hkey: HashKey) -> bool {
        self.slots[hkey as usize].load(Ordering::Acquire) != UNSET
    }

    /// The canonical kmer stored at an assigned slot.
    #[inline]
    pub fn bkmer_at(&self, hkey: HashKey) -> BinaryKmer {
        let word = self.slots[hkey as usize].load(Ordering::Acquire);
        debug_assert_ne!(word, UNSET);
        BinaryKmer(word)
    }

    /// Scan the assigned slots of one bucket for `bkey`.
    #[inline]
    fn scan_bucket(&self, bucket: usize, bkey: BinaryKmer) -> (Option<HashKey>, usize) {
        let fill = self.bucket_fill[bucket].load(Ordering::Acquire) as usize;
        let base = bucket * BUCKET_SIZE;
        for i in 0..fill {
            if self.slots[base + i].load(Ordering::Acquire) == bkey.0 {
                return (Some((base + i) as HashKey), fill);
            }
        }
        (None, fill)
    }

    /// Look up a canonical key. Pure; safe alongside concurrent inserts.
    pub fn find(&self, bkey: BinaryKmer) -> HashKey {
        for attempt in 0..REHASH_LIMIT {
            let bucket = bucket_hash(bkey, attempt, self.num_buckets);
            let (hit, fill) = self.scan_bucket(bucket, bkey);
            if let Some(hkey) = hit {
                return hkey;
            }
            // Keys always land in the first non-full bucket of their
            // probe sequence and fills never drop, so stop here.
            if fill < BUCKET_SIZE {
                return HASH_NOT_FOUND;
            }
        }
        HASH_NOT_FOUND
    }

    /// Find `bkey` or claim a slot for it. Returns the slot and whether
    /// the key was already present. Thread safe: writes take the
    /// per-bucket lock, so concurrent calls with the same key agree on
    /// one slot. Errors when every probe bucket is full.
    pub fn find_or_insert(&self, bkey: BinaryKmer) -> Result<(HashKey, bool)> {
        for attempt in 0..REHASH_LIMIT {
            let bucket = bucket_hash(bkey, attempt, self.num_buckets);

            // Optimistic lock-free scan first
            let (hit, fill) = self.scan_bucket(bucket, bkey);
            if let Some(hkey) = hit {
                return Ok((hkey, true));
            }
            if fill == BUCKET_SIZE {
                self.collisions[attempt].fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let _guard = self.bucket_locks[bucket]
                .lock()
                .expect("poisoned bucket lock");

            // Re-check under the lock: a peer may have inserted the key
            // or filled the bucket while we waited.
            let (hit, fill) = self.scan_bucket(bucket, bkey);
            if let Some(hkey) = hit {
                return Ok((hkey, true));
            }
            if fill == BUCKET_SIZE {
                self.collisions[attempt].fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let slot = bucket * BUCKET_SIZE + fill;
            self.slots[slot].store(bkey.0, Ordering::Release);
            self.bucket_fill[bucket].store(fill as u8 + 1, Ordering::Release);
            self.num_kmers.fetch_add(1, Ordering::Relaxed);
            return Ok(((slot) as HashKey, false));
        }

        bail!(
            "Hash table is full: cannot insert kmer [capacity: {}, occupancy: {}]",
            self.capacity(),
            self.num_kmers()
        );
    }

    /// Visit every assigned slot, in unspecified order.
    pub fn for_each<F: FnMut(HashKey, BinaryKmer)>(&self, mut f: F) {
        for (idx, slot) in self.slots.iter().enumerate() {
            let word = slot.load(Ordering::Acquire);
            if word != UNSET {
                f(idx as HashKey, BinaryKmer(word));
            }
        }
    }

    /// Parallel variant of [`HashTable::for_each`]; `f` must be
    /// thread-safe. Used by whole-graph passes (healthcheck, edge
    /// rebuild).
    pub fn par_for_each<F>(&self, f: F)
    where
        F: Fn(HashKey, BinaryKmer) + Sync,
    {
        use rayon::prelude::*;
        self.slots.par_iter().enumerate().for_each(|(idx, slot)| {
            let word = slot.load(Ordering::Acquire);
            if word != UNSET {
                f(idx as HashKey, BinaryKmer(word));
            }
        });
    }

    /// Mark every slot unassigned. O(capacity).
    pub fn empty(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot.get_mut() = UNSET;
        }
        for fill in self.bucket_fill.iter_mut() {
            *fill.get_mut() = 0;
        }
        *self.num_kmers.get_mut() = 0;
        for c in self.collisions.iter_mut() {
            *c.get_mut() = 0;
        }
    }

    /// One status line with occupancy and rehash pressure.
    pub fn print_stats(&self) {
        let nkmers = self.num_kmers();
        let cap = self.capacity();
        let rehashes: u64 = self
            .collisions
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum();
        info!(
            "[hash] {} / {} kmers ({:.1}% full); {} bucket overflows",
            nkmers,
            cap,
            100.0 * nkmers as f64 / cap as f64,
            rehashes
        );
    }
}
