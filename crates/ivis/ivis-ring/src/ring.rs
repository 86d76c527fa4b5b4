//! The shared-memory ring itself: open/create, single-writer `write`, and
//! the optimistic torn-read-safe `read` / `read_latest`.

use std::io;

use ivis_mmap::{MmapFileMut, segment_exists, segment_path, unlink_segment};
use thiserror::Error;
use tracing::{debug, warn};

use crate::layout::{
    self, HEADER_SIZE, Header, MAGIC, VERSION, generation_offset, legacy_meta_segment_len,
    meta_segment_len, payload_len_offset,
};
use crate::mutex::ShmMutex;

/// Bounded retries for the optimistic read before reporting a miss.
pub const DEFAULT_READ_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum RingError {
    #[error("shared memory segment missing: {name}")]
    SegmentMissing { name: String },

    #[error(
        "ring layout mismatch for {name}: segment has slot_size={found_slot_size} \
         slot_count={found_slot_count}, expected slot_size={want_slot_size} \
         slot_count={want_slot_count}"
    )]
    LayoutMismatch {
        name: String,
        found_slot_size: u32,
        found_slot_count: u32,
        want_slot_size: u32,
        want_slot_count: u32,
    },

    #[error("ring header corrupt for {name}: {detail}")]
    HeaderCorrupt { name: String, detail: String },

    #[error("payload of {len} bytes exceeds slot size {slot_size}")]
    PayloadTooLarge { len: usize, slot_size: u32 },

    #[error("ring without payload lengths requires exactly {slot_size} bytes, got {len}")]
    PayloadSizeFixed { len: usize, slot_size: u32 },

    #[error("ring i/o failed")]
    Io(#[from] io::Error),
}

/// Attachment parameters for [`ShmRing::open_or_create`].
#[derive(Debug, Clone)]
pub struct RingOptions {
    pub data_name: String,
    pub meta_name: String,
    pub slot_size: u32,
    pub slot_count: u32,
    /// The owner creates missing segments and unlinks them on drop. Exactly
    /// one process per ring identity should pass `true`; this is a
    /// convention, not enforced by the ring.
    pub owner: bool,
    /// Owner-only: replace existing segments whose header does not match
    /// instead of failing.
    pub recreate_on_mismatch: bool,
}

/// Single-writer, many-reader shared-memory ring of fixed-size byte slots.
///
/// See the crate docs for the consistency protocol. All read failures are
/// non-fatal (`None`); write failures are errors and fatal to the capture
/// loop that owns the ring.
pub struct ShmRing {
    data: MmapFileMut,
    meta: MmapFileMut,
    mutex: ShmMutex,
    data_name: String,
    meta_name: String,
    slot_size: u32,
    slot_count: u32,
    owner: bool,
    has_payload_lengths: bool,
}

impl ShmRing {
    /// Attaches to the named segments, creating them when `owner` is set and
    /// they do not exist yet.
    ///
    /// Any attach validates the magic tag and version. An owner that finds a
    /// mismatching layout either recreates the segments
    /// (`recreate_on_mismatch`) or fails with [`RingError::LayoutMismatch`].
    /// Non-owners never modify or unlink segments.
    pub fn open_or_create(opts: RingOptions) -> Result<Self, RingError> {
        let mutex = ShmMutex::new(&opts.data_name)?;

        let both_exist = segment_exists(&opts.data_name) && segment_exists(&opts.meta_name);
        if !both_exist {
            if !opts.owner {
                let name = if segment_exists(&opts.data_name) {
                    &opts.meta_name
                } else {
                    &opts.data_name
                };
                return Err(RingError::SegmentMissing { name: name.clone() });
            }
            return Self::create(opts, mutex);
        }

        match Self::attach(&opts, mutex) {
            Ok(ring) => Ok(ring),
            Err(err) => match err {
                RingError::LayoutMismatch { .. } | RingError::HeaderCorrupt { .. }
                    if opts.owner && opts.recreate_on_mismatch =>
                {
                    warn!(
                        data = %opts.data_name,
                        meta = %opts.meta_name,
                        %err,
                        "recreating shared memory ring after mismatch"
                    );
                    unlink_segment(&opts.data_name)?;
                    unlink_segment(&opts.meta_name)?;
                    let mutex = ShmMutex::new(&opts.data_name)?;
                    Self::create(opts, mutex)
                }
                other => Err(other),
            },
        }
    }

    fn create(opts: RingOptions, mutex: ShmMutex) -> Result<Self, RingError> {
        let data_len = opts.slot_size as u64 * opts.slot_count as u64;
        let data = MmapFileMut::create_rw(segment_path(&opts.data_name), data_len)?;
        let mut meta = MmapFileMut::create_rw(
            segment_path(&opts.meta_name),
            meta_segment_len(opts.slot_count) as u64,
        )?;
        Header {
            magic: MAGIC,
            version: VERSION,
            slot_size: opts.slot_size,
            slot_count: opts.slot_count,
            write_index: 0,
        }
        .write(meta.as_mut_slice());
        // Generations and payload lengths start zeroed by file creation.

        Ok(Self {
            data,
            meta,
            mutex,
            data_name: opts.data_name,
            meta_name: opts.meta_name,
            slot_size: opts.slot_size,
            slot_count: opts.slot_count,
            owner: opts.owner,
            has_payload_lengths: true,
        })
    }

    fn attach(opts: &RingOptions, mutex: ShmMutex) -> Result<Self, RingError> {
        let data = MmapFileMut::open_rw(segment_path(&opts.data_name))?;
        let meta = MmapFileMut::open_rw(segment_path(&opts.meta_name))?;

        if meta.len() < HEADER_SIZE {
            return Err(RingError::HeaderCorrupt {
                name: opts.meta_name.clone(),
                detail: format!("metadata segment too small ({} bytes)", meta.len()),
            });
        }
        let header = Header::read(meta.as_slice());
        if header.magic != MAGIC {
            return Err(RingError::HeaderCorrupt {
                name: opts.meta_name.clone(),
                detail: format!("bad magic {:?}", header.magic),
            });
        }
        if header.version != VERSION {
            return Err(RingError::HeaderCorrupt {
                name: opts.meta_name.clone(),
                detail: format!("unsupported version {}", header.version),
            });
        }
        if header.slot_size != opts.slot_size || header.slot_count != opts.slot_count {
            return Err(RingError::LayoutMismatch {
                name: opts.meta_name.clone(),
                found_slot_size: header.slot_size,
                found_slot_count: header.slot_count,
                want_slot_size: opts.slot_size,
                want_slot_count: opts.slot_count,
            });
        }
        if data.len() < opts.slot_size as usize * opts.slot_count as usize {
            return Err(RingError::HeaderCorrupt {
                name: opts.data_name.clone(),
                detail: format!("data segment too small ({} bytes)", data.len()),
            });
        }

        // Older metadata segments carry generations only; payloads are then
        // required to fill their slot exactly.
        let has_payload_lengths = meta.len() >= meta_segment_len(opts.slot_count);
        if !has_payload_lengths && meta.len() < legacy_meta_segment_len(opts.slot_count) {
            return Err(RingError::HeaderCorrupt {
                name: opts.meta_name.clone(),
                detail: format!("metadata segment truncated ({} bytes)", meta.len()),
            });
        }

        Ok(Self {
            data,
            meta,
            mutex,
            data_name: opts.data_name.clone(),
            meta_name: opts.meta_name.clone(),
            slot_size: opts.slot_size,
            slot_count: opts.slot_count,
            owner: opts.owner,
            has_payload_lengths,
        })
    }

    #[inline]
    pub fn slot_size(&self) -> u32 {
        self.slot_size
    }

    #[inline]
    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    #[inline]
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    #[inline]
    pub fn has_payload_lengths(&self) -> bool {
        self.has_payload_lengths
    }

    /// Decoded header snapshot (unsynchronized; for diagnostics and tests).
    pub fn header(&self) -> Header {
        Header::read(self.meta.as_slice())
    }

    /// Writes `payload` into the next slot and returns `(slot, generation)`.
    ///
    /// The slot generation is bumped before the contract referencing it can
    /// exist, so a reader presenting the returned generation either sees
    /// exactly these bytes or reports a miss after the slot is overwritten.
    pub fn write(&mut self, payload: &[u8]) -> Result<(u32, u32), RingError> {
        let len = payload.len();
        if len > self.slot_size as usize {
            return Err(RingError::PayloadTooLarge {
                len,
                slot_size: self.slot_size,
            });
        }
        if !self.has_payload_lengths && len != self.slot_size as usize {
            return Err(RingError::PayloadSizeFixed {
                len,
                slot_size: self.slot_size,
            });
        }

        let guard = self.mutex.lock()?;
        let write_index = layout::read_write_index(self.meta.as_slice());
        let slot = write_index % self.slot_count;
        let generation =
            layout::read_u32(self.meta.as_slice(), generation_offset(slot)).wrapping_add(1);

        let start = slot as usize * self.slot_size as usize;
        self.data.as_mut_slice()[start..start + len].copy_from_slice(payload);

        let slot_count = self.slot_count;
        let has_lengths = self.has_payload_lengths;
        let meta = self.meta.as_mut_slice();
        layout::write_u32(meta, generation_offset(slot), generation);
        if has_lengths {
            layout::write_u32(meta, payload_len_offset(slot_count, slot), len as u32);
        }
        layout::set_write_index(meta, write_index.wrapping_add(1));
        drop(guard);

        debug!(slot, generation, bytes = len, "ring write");
        Ok((slot, generation))
    }

    /// Snapshot of the slot the caller expects at `expected_generation`.
    ///
    /// Returns `None` when the slot was already overwritten, the retries are
    /// exhausted against a racing writer, or the lock cannot be taken; all
    /// of these are per-frame misses, never stale bytes.
    pub fn read(&self, slot: u32, expected_generation: u32) -> Option<Vec<u8>> {
        self.read_with_retries(slot, expected_generation, DEFAULT_READ_RETRIES)
    }

    pub fn read_with_retries(
        &self,
        slot: u32,
        expected_generation: u32,
        retries: u32,
    ) -> Option<Vec<u8>> {
        if slot >= self.slot_count {
            return None;
        }

        for _ in 0..retries.max(1) {
            let (g_before, len) = {
                let _guard = self.mutex.lock().ok()?;
                let meta = self.meta.as_slice();
                (
                    layout::read_u32(meta, generation_offset(slot)),
                    self.payload_len_at(meta, slot),
                )
            };
            if g_before != expected_generation {
                debug!(
                    slot,
                    expected_generation, current = g_before, "ring read miss"
                );
                return None;
            }

            // The copy runs without the lock; the generation re-check below
            // invalidates it if the writer got here meanwhile.
            let start = slot as usize * self.slot_size as usize;
            let copy = self.data.as_slice()[start..start + len].to_vec();

            let g_after = {
                let _guard = self.mutex.lock().ok()?;
                layout::read_u32(self.meta.as_slice(), generation_offset(slot))
            };
            if g_before == g_after {
                return Some(copy);
            }
            debug!(slot, expected_generation, "torn ring read, retrying");
        }
        None
    }

    /// Snapshot of the most recently written slot, with the same consistency
    /// dance as [`ShmRing::read`]. Returns `(bytes, slot, generation)`.
    pub fn read_latest(&self) -> Option<(Vec<u8>, u32, u32)> {
        self.read_latest_with_retries(DEFAULT_READ_RETRIES)
    }

    pub fn read_latest_with_retries(&self, retries: u32) -> Option<(Vec<u8>, u32, u32)> {
        for _ in 0..retries.max(1) {
            let (slot, generation, len) = {
                let _guard = self.mutex.lock().ok()?;
                let meta = self.meta.as_slice();
                let write_index = layout::read_write_index(meta);
                if write_index == 0 {
                    return None;
                }
                let slot = write_index.wrapping_sub(1) % self.slot_count;
                (
                    slot,
                    layout::read_u32(meta, generation_offset(slot)),
                    self.payload_len_at(meta, slot),
                )
            };

            let start = slot as usize * self.slot_size as usize;
            let copy = self.data.as_slice()[start..start + len].to_vec();

            let g_after = {
                let _guard = self.mutex.lock().ok()?;
                layout::read_u32(self.meta.as_slice(), generation_offset(slot))
            };
            if generation == g_after {
                return Some((copy, slot, generation));
            }
            debug!(slot, "torn read_latest, retrying");
        }
        None
    }

    fn payload_len_at(&self, meta: &[u8], slot: u32) -> usize {
        if !self.has_payload_lengths {
            return self.slot_size as usize;
        }
        let len = layout::read_u32(meta, payload_len_offset(self.slot_count, slot));
        if len == 0 || len > self.slot_size {
            self.slot_size as usize
        } else {
            len as usize
        }
    }
}

impl Drop for ShmRing {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        for name in [self.data_name.clone(), self.meta_name.clone()] {
            if let Err(err) = unlink_segment(&name) {
                warn!(segment = %name, %err, "failed to unlink ring segment");
            }
        }
        let _ = unlink_segment(&format!("{}.lock", self.data_name));
    }
}

/// True when both of a ring's segments are present, without attaching or
/// validating them. For check-before-act callers: cleanup tooling, readers
/// deciding whether to wait for the producer.
pub fn exists(data_name: &str, meta_name: &str) -> bool {
    segment_exists(data_name) && segment_exists(meta_name)
}

/// Best-effort unlink of a ring's segments and lock file, for cleanup
/// tooling. Missing segments are not an error.
pub fn cleanup(data_name: &str, meta_name: &str) -> io::Result<()> {
    unlink_segment(data_name)?;
    unlink_segment(meta_name)?;
    unlink_segment(&format!("{data_name}.lock"))?;
    Ok(())
}
