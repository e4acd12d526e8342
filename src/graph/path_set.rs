use anyhow::{bail, Result};

use crate::graph::node::{HashKey, Orientation};
use crate::graph::packed_path::{
    seq_bytes, seq_is_prefix, unpack_len_orient, PathIndex, LEN_ORIENT_BYTES, PATH_NULL,
    PREV_BYTES,
};
use crate::graph::path_store::PathStore;

/// One record of a [`PathSet`], with its bytes materialised so entries
/// from the arena and entries from a load buffer can be compared and
/// merged uniformly.
#[derive(Debug, Clone)]
pub struct PathEntry {
    pub orient: Orientation,
    pub plen: u32,
    pub colset: Vec<u8>,
    pub seq: Vec<u8>,
    /// Arena offset when built from a store, `PATH_NULL` otherwise.
    pub src_pindex: PathIndex,
    pub removed: bool,
}

impl PathEntry {
    #[inline]
    fn same_content(&self, other: &PathEntry) -> bool {
        self.orient == other.orient && self.plen == other.plen && self.seq == other.seq
    }

    /// Is `self` a strict or equal prefix of `other` on the same strand?
    #[inline]
    fn is_prefix_of(&self, other: &PathEntry) -> bool {
        self.orient == other.orient
            && seq_is_prefix(&self.seq, self.plen, &other.seq, other.plen)
    }

    fn or_colset(&mut self, colset: &[u8]) {
        for (dst, src) in self.colset.iter_mut().zip(colset) {
            *dst |= src;
        }
    }
}

/// Flat view over the records of a single kmer, used to deduplicate and
/// merge chains during `.ctp` loading and path cleaning.
#[derive(Debug, Default)]
pub struct PathSet {
    pub entries: Vec<PathEntry>,
}

/// Remap a file-local colour set through a load filter: file colour
/// `cols[i]` lands on in-memory colour `intocol + i`.
fn remap_colset(
    file_colset: &[u8],
    cols: &[usize],
    intocol: usize,
    store_colset_bytes: usize,
) -> Vec<u8> {
    let mut out = vec![0u8; store_colset_bytes];
    for (i, &from) in cols.iter().enumerate() {
        if file_colset[from / 8] & (1 << (from % 8)) != 0 {
            let to = intocol + i;
            out[to / 8] |= 1 << (to % 8);
        }
    }
    out
}

impl PathSet {
    /// Collect the chain rooted at `head` out of the arena.
    pub fn from_store(store: &PathStore, head: PathIndex) -> PathSet {
        let mut entries = Vec::new();
        let mut pindex = head;
        while pindex != PATH_NULL {
            let rec = store.record(pindex);
            entries.push(PathEntry {
                orient: rec.orient,
                plen: rec.plen,
                colset: store.record_colset(pindex),
                seq: store.record_seq(pindex, rec.plen),
                src_pindex: pindex,
                removed: false,
            });
            pindex = rec.prev;
        }
        PathSet { entries }
    }

    /// Collect a chain out of a raw `.ctp` blob, projecting each colour
    /// set through the load filter (`cols[i]` → `intocol + i`).
    pub fn from_buffer(
        buf: &[u8],
        head: PathIndex,
        file_colset_bytes: usize,
        cols: &[usize],
        intocol: usize,
        store_colset_bytes: usize,
    ) -> Result<PathSet> {
        let mut entries = Vec::new();
        let mut pindex = head;
        let mut steps = 0usize;
        while pindex != PATH_NULL {
            let p = pindex as usize;
            if p + PREV_BYTES + file_colset_bytes + LEN_ORIENT_BYTES > buf.len() {
                bail!("Path index out of bounds [{} > {}]", p, buf.len());
            }
            let prev = u64::from_le_bytes(buf[p..p + 8].try_into().expect("8 bytes"));
            let cs = &buf[p + PREV_BYTES..p + PREV_BYTES + file_colset_bytes];
            let lo_off = p + PREV_BYTES + file_colset_bytes;
            let word = u32::from_le_bytes(
                buf[lo_off..lo_off + LEN_ORIENT_BYTES]
                    .try_into()
                    .expect("4 bytes"),
            );
            let (plen, orient) = unpack_len_orient(word);
            let seq_off = lo_off + LEN_ORIENT_BYTES;
            let nbytes = seq_bytes(plen);
            if plen == 0 || seq_off + nbytes > buf.len() {
                bail!("Corrupt path record at offset {}", p);
            }
            entries.push(PathEntry {
                orient,
                plen,
                colset: remap_colset(cs, cols, intocol, store_colset_bytes),
                seq: buf[seq_off..seq_off + nbytes].to_vec(),
                src_pindex: PATH_NULL,
                removed: false,
            });
            steps += 1;
            if steps > buf.len() {
                bail!("Path chain does not terminate in file blob");
            }
            pindex = prev;
        }
        Ok(PathSet { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.removed).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove in-set redundancy: entries whose choice sequence is a
    /// prefix of another entry's add nothing a walker could use, so
    /// their colours fold into the longer record.
    pub fn slim(&mut self) {
        let n = self.entries.len();
        for i in 0..n {
            if self.entries[i].removed {
                continue;
            }
            for j in 0..n {
                if i == j || self.entries[j].removed || self.entries[i].removed {
                    continue;
                }
                let (shorter, longer) = (i, j);
                if self.entries[shorter].is_prefix_of(&self.entries[longer]) {
                    // On identical content keep the earlier entry
                    if self.entries[shorter].plen == self.entries[longer].plen
                        && shorter < longer
                    {
                        continue;
                    }
                    let colset = self.entries[shorter].colset.clone();
                    self.entries[longer].or_colset(&colset);
                    self.entries[shorter].removed = true;
                }
            }
        }
    }

    /// Drop from `self` every entry already present in `loaded`
    /// (a set built from the arena), OR-ing colour bits into the
    /// existing arena records instead.
    pub fn merge_into_existing(&mut self, loaded: &PathSet, store: &PathStore) {
        for entry in self.entries.iter_mut().filter(|e| !e.removed) {
            if let Some(hit) = loaded
                .entries
                .iter()
                .find(|l| !l.removed && l.same_content(entry))
            {
                debug_assert_ne!(hit.src_pindex, PATH_NULL);
                for col in 0..store.num_of_cols() {
                    if entry.colset[col / 8] & (1 << (col % 8)) != 0 {
                        store.record_set_colour_mt(hit.src_pindex, col);
                    }
                }
                entry.removed = true;
            }
        }
    }

    /// Append the surviving entries to the store as the chain for
    /// `hkey`, linking onto whatever chain is already there.
    pub fn store_new_entries(&self, store: &PathStore, hkey: HashKey) -> Result<()> {
        let mut pindex = store.head(hkey);
        let mut added = false;
        for entry in self.entries.iter().filter(|e| !e.removed) {
            pindex = store.add_packed(pindex, entry.orient, entry.plen, &entry.colset, &entry.seq)?;
            added = true;
        }
        if added {
            store.set_head(hkey, pindex);
        }
        Ok(())
    }
}
