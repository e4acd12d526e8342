use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use anyhow::{bail, ensure, Context, Result};
use tracing::info;

use crate::graph::node::{Colour, HashKey, Orientation};
use crate::graph::packed_path::{
    colset_bytes, pack_len_orient, record_mem, seq_bytes, unpack_len_orient, PathIndex,
    LEN_ORIENT_BYTES, PATH_NULL, PREV_BYTES,
};

/// Spooled defrag buffers spill to disk past this size.
const DEFRAG_SPOOL_BYTES: usize = 64 << 20;

/// Arena of packed path records with one singly-linked record chain per
/// kmer.
///
/// Space is reserved with an atomic bump of `next`; a finished record is
/// published by CAS-ing the kmer's head pointer, so readers that load a
/// head see fully written bytes. Records never move while builders or
/// walkers are live; only the exclusive phases (`defragment`, `clean`,
/// `release_colour`) relocate or rewrite them.
pub struct PathStore {
    arena: Vec<AtomicU8>,
    next: AtomicU64,
    kmer_paths: Vec<AtomicU64>,
    num_of_cols: usize,
    colset_bytes: usize,
    num_of_paths: AtomicU64,
    num_kmers_with_paths: AtomicU64,
}

/// Decoded fixed-width fields of one record.
#[derive(Debug, Clone, Copy)]
pub struct RecordView {
    pub pindex: PathIndex,
    pub prev: PathIndex,
    pub orient: Orientation,
    pub plen: u32,
}

impl RecordView {
    /// Total bytes this record occupies in the arena.
    #[inline]
    pub fn mem(&self, colset_bytes: usize) -> usize {
        record_mem(self.plen, colset_bytes)
    }
}

impl PathStore {
    /// Allocate an arena of `mem_bytes` with head pointers for
    /// `capacity` hash slots. Neither grows.
    pub fn new(capacity: u64, num_of_cols: usize, mem_bytes: usize) -> PathStore {
        assert!(num_of_cols > 0);
        PathStore {
            arena: (0..mem_bytes).map(|_| AtomicU8::new(0)).collect(),
            next: AtomicU64::new(0),
            kmer_paths: (0..capacity).map(|_| AtomicU64::new(PATH_NULL)).collect(),
            num_of_cols,
            colset_bytes: colset_bytes(num_of_cols),
            num_of_paths: AtomicU64::new(0),
            num_kmers_with_paths: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn num_of_cols(&self) -> usize {
        self.num_of_cols
    }

    #[inline]
    pub fn colset_bytes(&self) -> usize {
        self.colset_bytes
    }

    #[inline]
    pub fn mem_capacity(&self) -> usize {
        self.arena.len()
    }

    /// Bytes of arena in use.
    #[inline]
    pub fn num_of_bytes(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }

    #[inline]
    pub fn num_of_paths(&self) -> u64 {
        self.num_of_paths.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn num_kmers_with_paths(&self) -> u64 {
        self.num_kmers_with_paths.load(Ordering::Relaxed)
    }

    /// Head of the record chain for a kmer, or `PATH_NULL`.
    #[inline]
    pub fn head(&self, hkey: HashKey) -> PathIndex {
        self.kmer_paths[hkey as usize].load(Ordering::Acquire)
    }

    pub fn has_paths(&self) -> bool {
        self.num_of_paths() > 0
    }

    // -------------------------------------------------------------------------
    // Raw arena access
    // -------------------------------------------------------------------------

    #[inline]
    fn byte(&self, off: u64) -> u8 {
        self.arena[off as usize].load(Ordering::Relaxed)
    }

    #[inline]
    fn write_byte(&self, off: u64, b: u8) {
        self.arena[off as usize].store(b, Ordering::Relaxed);
    }

    fn read_u32(&self, off: u64) -> u32 {
        let mut b = [0u8; 4];
        for (i, byte) in b.iter_mut().enumerate() {
            *byte = self.byte(off + i as u64);
        }
        u32::from_le_bytes(b)
    }

    fn read_u64(&self, off: u64) -> u64 {
        let mut b = [0u8; 8];
        for (i, byte) in b.iter_mut().enumerate() {
            *byte = self.byte(off + i as u64);
        }
        u64::from_le_bytes(b)
    }

    fn write_bytes(&self, off: u64, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            self.write_byte(off + i as u64, b);
        }
    }

    pub fn copy_out(&self, off: u64, len: usize) -> Vec<u8> {
        (0..len).map(|i| self.byte(off + i as u64)).collect()
    }

    // -------------------------------------------------------------------------
    // Record accessors
    // -------------------------------------------------------------------------

    /// Decode the fixed fields of the record at `pindex`.
    pub fn record(&self, pindex: PathIndex) -> RecordView {
        let prev = self.read_u64(pindex);
        let word = self.read_u32(pindex + (PREV_BYTES + self.colset_bytes) as u64);
        let (plen, orient) = unpack_len_orient(word);
        RecordView {
            pindex,
            prev,
            orient,
            plen,
        }
    }

    /// Step to the previous record in the chain.
    #[inline]
    pub fn next_in_chain(&self, pindex: PathIndex) -> PathIndex {
        self.read_u64(pindex)
    }

    #[inline]
    fn colset_off(&self, pindex: PathIndex) -> u64 {
        pindex + PREV_BYTES as u64
    }

    #[inline]
    fn seq_off(&self, pindex: PathIndex) -> u64 {
        pindex + (PREV_BYTES + self.colset_bytes + LEN_ORIENT_BYTES) as u64
    }

    /// Copy out the record's colour bitset.
    pub fn record_colset(&self, pindex: PathIndex) -> Vec<u8> {
        self.copy_out(self.colset_off(pindex), self.colset_bytes)
    }

    pub fn record_in_colour(&self, pindex: PathIndex, col: Colour) -> bool {
        debug_assert!(col < self.num_of_cols);
        self.byte(self.colset_off(pindex) + (col / 8) as u64) & (1 << (col % 8)) != 0
    }

    /// OR one colour bit into a published record; safe concurrently.
    pub fn record_set_colour_mt(&self, pindex: PathIndex, col: Colour) {
        debug_assert!(col < self.num_of_cols);
        let off = self.colset_off(pindex) + (col / 8) as u64;
        self.arena[off as usize].fetch_or(1 << (col % 8), Ordering::AcqRel);
    }

    fn record_clear_colour(&self, pindex: PathIndex, col: Colour) {
        let off = self.colset_off(pindex) + (col / 8) as u64;
        self.arena[off as usize].fetch_and(!(1u8 << (col % 8)), Ordering::AcqRel);
    }

    pub fn record_colset_is_empty(&self, pindex: PathIndex) -> bool {
        let off = self.colset_off(pindex);
        (0..self.colset_bytes).all(|i| self.byte(off + i as u64) == 0)
    }

    /// Copy out the packed choice sequence of a record.
    pub fn record_seq(&self, pindex: PathIndex, plen: u32) -> Vec<u8> {
        self.copy_out(self.seq_off(pindex), seq_bytes(plen))
    }

    /// One base of a record's choice sequence without copying.
    #[inline]
    pub fn record_seq_nuc(&self, pindex: PathIndex, i: u32) -> crate::graph::dna::Nucleotide {
        let byte = self.byte(self.seq_off(pindex) + (i / 4) as u64);
        crate::graph::dna::Nucleotide::from_code((byte >> (6 - 2 * (i % 4))) & 3)
    }

    fn record_seq_matches(&self, pindex: PathIndex, packed: &[u8], plen: u32) -> bool {
        let off = self.seq_off(pindex);
        (0..seq_bytes(plen)).all(|i| self.byte(off + i as u64) == packed[i])
    }

    // -------------------------------------------------------------------------
    // Append
    // -------------------------------------------------------------------------

    /// Reserve `nbytes` of arena with an atomic bump. Errors when the
    /// reservation would exceed capacity.
    fn reserve(&self, nbytes: usize) -> Result<PathIndex> {
        let cap = self.arena.len() as u64;
        self.next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(nbytes as u64).filter(|&end| end <= cap)
            })
            .map_err(|used| {
                anyhow::anyhow!(
                    "Path store arena is full: cannot append {} bytes [used: {}, capacity: {}]",
                    nbytes,
                    used,
                    cap
                )
            })
    }

    /// Best-effort rollback of a reservation that was never published.
    fn try_unreserve(&self, pindex: PathIndex, nbytes: usize) {
        let _ = self.next.compare_exchange(
            pindex + nbytes as u64,
            pindex,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    fn write_record_body(
        &self,
        pindex: PathIndex,
        orient: Orientation,
        plen: u32,
        colset: &[u8],
        packed_seq: &[u8],
    ) {
        debug_assert_eq!(colset.len(), self.colset_bytes);
        debug_assert_eq!(packed_seq.len(), seq_bytes(plen));
        self.write_bytes(self.colset_off(pindex), colset);
        self.write_bytes(
            pindex + (PREV_BYTES + self.colset_bytes) as u64,
            &pack_len_orient(plen, orient).to_le_bytes(),
        );
        self.write_bytes(self.seq_off(pindex), packed_seq);
    }

    /// Scan a chain segment `[from, until)` for a record with identical
    /// content.
    fn scan_for_match(
        &self,
        from: PathIndex,
        until: PathIndex,
        orient: Orientation,
        plen: u32,
        packed_seq: &[u8],
    ) -> Option<PathIndex> {
        let mut pindex = from;
        while pindex != until && pindex != PATH_NULL {
            let rec = self.record(pindex);
            if rec.orient == orient && rec.plen == plen
                && self.record_seq_matches(pindex, packed_seq, plen)
            {
                return Some(pindex);
            }
            pindex = rec.prev;
        }
        None
    }

    /// Append a record with an explicit `prev` without publishing it as
    /// a chain head. Single-threaded loading path; the caller links the
    /// chain with [`PathStore::set_head`].
    pub fn add_packed(
        &self,
        prev: PathIndex,
        orient: Orientation,
        plen: u32,
        colset: &[u8],
        packed_seq: &[u8],
    ) -> Result<PathIndex> {
        ensure!(plen > 0, "Refusing to add an empty path");
        let mem = record_mem(plen, self.colset_bytes);
        let pindex = self.reserve(mem)?;
        self.write_bytes(pindex, &prev.to_le_bytes());
        self.write_record_body(pindex, orient, plen, colset, packed_seq);
        self.num_of_paths.fetch_add(1, Ordering::Relaxed);
        Ok(pindex)
    }

    /// Install the chain head for a kmer (loading / rebuild only).
    pub fn set_head(&self, hkey: HashKey, pindex: PathIndex) {
        let old = self.kmer_paths[hkey as usize].swap(pindex, Ordering::AcqRel);
        if old == PATH_NULL && pindex != PATH_NULL {
            self.num_kmers_with_paths.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Find a record with this content on the kmer's chain, OR-ing in
    /// the colour bit; otherwise append and publish a new record whose
    /// colour set holds only `ctpcol`. Thread safe; each distinct
    /// content is kept at most once per kmer.
    ///
    /// Returns the record index and whether a record was created.
    pub fn find_or_add_mt(
        &self,
        hkey: HashKey,
        ctpcol: Colour,
        orient: Orientation,
        plen: u32,
        packed_seq: &[u8],
    ) -> Result<(PathIndex, bool)> {
        ensure!(plen > 0, "Refusing to add an empty path");
        debug_assert!(ctpcol < self.num_of_cols);

        let mut observed = self.head(hkey);
        if let Some(hit) = self.scan_for_match(observed, PATH_NULL, orient, plen, packed_seq) {
            self.record_set_colour_mt(hit, ctpcol);
            return Ok((hit, false));
        }

        let mem = record_mem(plen, self.colset_bytes);
        let pindex = self.reserve(mem)?;

        let mut colset = vec![0u8; self.colset_bytes];
        colset[ctpcol / 8] |= 1 << (ctpcol % 8);
        self.write_record_body(pindex, orient, plen, &colset, packed_seq);

        loop {
            self.write_bytes(pindex, &observed.to_le_bytes());
            match self.kmer_paths[hkey as usize].compare_exchange(
                observed,
                pindex,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if observed == PATH_NULL {
                        self.num_kmers_with_paths.fetch_add(1, Ordering::Relaxed);
                    }
                    self.num_of_paths.fetch_add(1, Ordering::Relaxed);
                    return Ok((pindex, true));
                }
                Err(new_head) => {
                    // A peer extended the chain. If it added this exact
                    // content, take theirs and drop our reservation.
                    if let Some(hit) =
                        self.scan_for_match(new_head, observed, orient, plen, packed_seq)
                    {
                        self.record_set_colour_mt(hit, ctpcol);
                        self.try_unreserve(pindex, mem);
                        return Ok((hit, false));
                    }
                    observed = new_head;
                }
            }
        }
    }

    /// Install a raw record blob at arena offset zero, as read from a
    /// paths file. The store must be untouched; head pointers are
    /// installed separately by the loader via [`PathStore::set_head`].
    pub fn load_blob(&mut self, blob: &[u8], num_paths: u64) -> Result<()> {
        ensure!(
            self.num_of_bytes() == 0 && self.num_of_paths() == 0,
            "Path store already holds paths; use merge loading"
        );
        ensure!(
            blob.len() <= self.arena.len(),
            "Path blob larger than arena [{} > {}]",
            blob.len(),
            self.arena.len()
        );
        self.write_bytes(0, blob);
        *self.next.get_mut() = blob.len() as u64;
        *self.num_of_paths.get_mut() = num_paths;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Whole-store passes (exclusive)
    // -------------------------------------------------------------------------

    /// Clear one colour bit from every record. Records whose colour set
    /// becomes empty stay in place as dead weight until
    /// [`PathStore::defragment`].
    pub fn release_colour(&mut self, col: Colour) {
        assert!(col < self.num_of_cols);
        for hkey in 0..self.kmer_paths.len() {
            let mut pindex = self.head(hkey as HashKey);
            while pindex != PATH_NULL {
                self.record_clear_colour(pindex, col);
                pindex = self.record(pindex).prev;
            }
        }
    }

    /// Drop records supported by fewer than `threshold` colours.
    /// Chains are independent, so they are relinked in parallel; the
    /// bytes of dropped records are reclaimed by the next
    /// [`PathStore::defragment`].
    pub fn clean(&mut self, threshold: u32) {
        use rayon::prelude::*;

        let dropped = AtomicU64::new(0);
        (0..self.kmer_paths.len()).into_par_iter().for_each(|hkey| {
            let mut kept_head = PATH_NULL;
            let mut kept_tail: Option<PathIndex> = None;
            let mut pindex = self.head(hkey as HashKey);
            if pindex == PATH_NULL {
                return;
            }
            while pindex != PATH_NULL {
                let rec = self.record(pindex);
                let support: u32 = self
                    .record_colset(pindex)
                    .iter()
                    .map(|b| b.count_ones())
                    .sum();
                if support >= threshold && support > 0 {
                    match kept_tail {
                        None => kept_head = pindex,
                        Some(tail) => self.write_bytes(tail, &pindex.to_le_bytes()),
                    }
                    kept_tail = Some(pindex);
                } else {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
                pindex = rec.prev;
            }
            if let Some(tail) = kept_tail {
                self.write_bytes(tail, &PATH_NULL.to_le_bytes());
            }
            if kept_head == PATH_NULL {
                self.num_kmers_with_paths.fetch_sub(1, Ordering::Relaxed);
            }
            self.kmer_paths[hkey].store(kept_head, Ordering::Release);
        });
        let dropped = dropped.into_inner();
        self.num_of_paths.fetch_sub(dropped, Ordering::Relaxed);
        info!("[paths] clean dropped {} records below {} colour(s)", dropped, threshold);
    }

    /// Compact the arena: live records (non-empty colour set) are staged
    /// in a spooled temp file, then written back contiguously in
    /// chain order with rebuilt `prev` links and head pointers.
    ///
    /// Exclusive: no builder or walker may touch the store meanwhile,
    /// which `&mut self` enforces.
    pub fn defragment(&mut self) -> Result<()> {
        let mut tmp = tempfile::SpooledTempFile::new(DEFRAG_SPOOL_BYTES);

        // Stage live records kmer by kmer, chain order reversed, so the
        // copy-back below can relink forward in one pass.
        let mut live_paths = 0u64;
        for hkey in 0..self.kmer_paths.len() {
            let mut chain = Vec::new();
            let mut pindex = self.head(hkey as HashKey);
            while pindex != PATH_NULL {
                let rec = self.record(pindex);
                if !self.record_colset_is_empty(pindex) {
                    chain.push(rec);
                }
                pindex = rec.prev;
            }
            for rec in chain.iter().rev() {
                let body_len = rec.mem(self.colset_bytes) - PREV_BYTES;
                let body = self.copy_out(rec.pindex + PREV_BYTES as u64, body_len);
                tmp.write_all(&(hkey as u64).to_le_bytes())
                    .context("staging defragmented path")?;
                tmp.write_all(&(body_len as u64).to_le_bytes())
                    .context("staging defragmented path")?;
                tmp.write_all(&body).context("staging defragmented path")?;
                live_paths += 1;
            }
        }

        // Reset heads, then copy back.
        for head in self.kmer_paths.iter_mut() {
            *head.get_mut() = PATH_NULL;
        }

        tmp.seek(SeekFrom::Start(0))
            .context("rewinding defrag spool")?;
        let mut cursor = 0u64;
        let mut kmers_with_paths = 0u64;
        for _ in 0..live_paths {
            let mut word = [0u8; 8];
            tmp.read_exact(&mut word).context("reading defrag spool")?;
            let hkey = u64::from_le_bytes(word);
            tmp.read_exact(&mut word).context("reading defrag spool")?;
            let body_len = u64::from_le_bytes(word) as usize;
            let mut body = vec![0u8; body_len];
            tmp.read_exact(&mut body).context("reading defrag spool")?;

            // Previous head (if any) becomes this record's `prev`: the
            // last record written per kmer ends up as the chain head,
            // matching the original traversal order.
            let prev = self.kmer_paths[hkey as usize].load(Ordering::Relaxed);
            if prev == PATH_NULL {
                kmers_with_paths += 1;
            }
            self.write_bytes(cursor, &prev.to_le_bytes());
            self.write_bytes(cursor + PREV_BYTES as u64, &body);
            self.kmer_paths[hkey as usize].store(cursor, Ordering::Relaxed);
            cursor += (PREV_BYTES + body_len) as u64;
        }

        let reclaimed = self.num_of_bytes() - cursor;
        *self.next.get_mut() = cursor;
        *self.num_of_paths.get_mut() = live_paths;
        *self.num_kmers_with_paths.get_mut() = kmers_with_paths;

        info!(
            "[paths] defragmented: {} live paths, {} bytes reclaimed",
            live_paths, reclaimed
        );
        Ok(())
    }

    /// Walk every chain asserting it terminates within the arena.
    pub fn integrity_check(&self) -> Result<()> {
        let used = self.num_of_bytes();
        let max_steps = self.num_of_paths() + 1;
        for hkey in 0..self.kmer_paths.len() {
            let mut pindex = self.head(hkey as HashKey);
            let mut steps = 0u64;
            while pindex != PATH_NULL {
                if pindex >= used {
                    bail!(
                        "Path index out of bounds [kmer: {}, index: {} >= {}]",
                        hkey,
                        pindex,
                        used
                    );
                }
                let rec = self.record(pindex);
                if rec.plen == 0 {
                    bail!("Empty path record [kmer: {}, index: {}]", hkey, pindex);
                }
                if pindex + rec.mem(self.colset_bytes) as u64 > used {
                    bail!(
                        "Path record overruns arena [kmer: {}, index: {}]",
                        hkey,
                        pindex
                    );
                }
                steps += 1;
                if steps > max_steps {
                    bail!("Path chain does not terminate [kmer: {}]", hkey);
                }
                pindex = rec.prev;
            }
        }
        Ok(())
    }

    /// One status line with record and byte counts.
    pub fn print_status(&self) {
        info!(
            "[paths] {} paths, {} / {} bytes, {} kmers with paths",
            self.num_of_paths(),
            self.num_of_bytes(),
            self.mem_capacity(),
            self.num_kmers_with_paths()
        );
    }
}
