//! Slot arena: one aligned allocation split into fixed playback slots
//!
//! The engine allocates all buffer memory once per session. The aligned part
//! of that allocation is divided into [`SLOT_COUNT`] equal, contiguous slots.
//! Slots are views (index, offset, length) and own nothing; the arena is
//! released as a whole when its last owner drops it.
//!
//! # Ownership handoff
//!
//! Each slot carries an atomic [`SlotStatus`]:
//!
//! ```text
//!   Free ──submit──▶ Submitted ◀──▶ Playing ──finish──▶ Done ──reclaim──▶ Free
//! ```
//!
//! Only the engine side writes a `Free` slot. A device reads slot memory
//! only through a [`PlayingSlot`] guard, which holds the slot in `Playing`
//! for as long as the bytes are borrowed and is consumed to mark it `Done`.
//! Transitions are compare-and-swap checked so a slot can never be submitted
//! twice or written while the device holds it.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Number of slots in the pool
pub const SLOT_COUNT: usize = 4;

/// Alignment of every slot start address, in bytes
pub const SLOT_ALIGNMENT: usize = 16;

/// Ownership state of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotStatus {
    /// Held by the engine, may be rendered into
    Free = 0,
    /// Held by the device, queued
    Submitted = 1,
    /// Device finished playing it, waiting to be reclaimed
    Done = 2,
    /// Held by the device, bytes borrowed through a [`PlayingSlot`]
    Playing = 3,
}

impl SlotStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SlotStatus::Free,
            1 => SlotStatus::Submitted,
            2 => SlotStatus::Done,
            _ => SlotStatus::Playing,
        }
    }
}

/// Non-owning view of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    pub index: usize,
    /// Offset of the slot from the aligned base
    pub offset: usize,
    /// Slot length in bytes
    pub len: usize,
}

/// Rejected status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError {
    pub index: usize,
    pub expected: SlotStatus,
    pub actual: SlotStatus,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slot {} is {:?}, expected {:?}",
            self.index, self.actual, self.expected
        )
    }
}

/// Single allocation backing all slots of a session
pub struct SlotArena {
    cells: Box<[UnsafeCell<u8>]>,
    /// Offset of the first aligned byte within `cells`
    base: usize,
    /// Requested byte size (without alignment slack)
    total: usize,
    slots: [SlotRef; SLOT_COUNT],
    status: [AtomicU8; SLOT_COUNT],
}

// SAFETY: slot memory is only reached through `with_free_slot` (engine side,
// status Free) and `PlayingSlot::bytes` (device side, status Playing). The
// CAS transitions in between hand each slot to exactly one side at a time,
// with Release/Acquire ordering publishing the written bytes. A shared borrow
// from `PlayingSlot::bytes` cannot outlive its guard, and the slot leaves
// Playing only when the guard is consumed or dropped.
unsafe impl Send for SlotArena {}
unsafe impl Sync for SlotArena {}

impl SlotArena {
    /// Allocate `total_bytes` plus alignment slack and carve the slots.
    ///
    /// Slot length is `total_bytes / SLOT_COUNT`; any remainder is padding
    /// that is never handed out.
    ///
    /// # Panics
    /// If a slot start address is not [`SLOT_ALIGNMENT`]-aligned. Format
    /// validation rules this out for every accepted format.
    pub fn new(total_bytes: usize) -> Self {
        let cells: Box<[UnsafeCell<u8>]> = (0..total_bytes + SLOT_ALIGNMENT)
            .map(|_| UnsafeCell::new(0))
            .collect();

        let start = cells.as_ptr() as usize;
        let base = align_up(start, SLOT_ALIGNMENT) - start;
        let slot_len = total_bytes / SLOT_COUNT;

        let slots = std::array::from_fn(|index| {
            let slot = SlotRef {
                index,
                offset: index * slot_len,
                len: slot_len,
            };
            assert_eq!(
                (start + base + slot.offset) % SLOT_ALIGNMENT,
                0,
                "slot {} breaks {}-byte alignment",
                index,
                SLOT_ALIGNMENT
            );
            slot
        });

        Self {
            cells,
            base,
            total: total_bytes,
            slots,
            status: std::array::from_fn(|_| AtomicU8::new(SlotStatus::Free as u8)),
        }
    }

    /// All slots in scan order
    pub fn slots(&self) -> &[SlotRef; SLOT_COUNT] {
        &self.slots
    }

    /// Slot by index
    pub fn slot(&self, index: usize) -> SlotRef {
        self.slots[index]
    }

    /// Length of every slot in bytes
    pub fn slot_len(&self) -> usize {
        self.slots[0].len
    }

    /// Requested size of the pool in bytes
    pub fn total_bytes(&self) -> usize {
        self.total
    }

    /// Start address of a slot
    pub fn slot_addr(&self, index: usize) -> usize {
        self.cells.as_ptr() as usize + self.base + self.slots[index].offset
    }

    /// Current status of a slot
    pub fn status(&self, index: usize) -> SlotStatus {
        SlotStatus::from_u8(self.status[index].load(Ordering::Acquire))
    }

    /// True when the device has finished playing the slot
    pub fn is_done(&self, index: usize) -> bool {
        self.status(index) == SlotStatus::Done
    }

    /// Hand a Free slot to the device
    pub(crate) fn mark_submitted(&self, index: usize) -> Result<(), TransitionError> {
        self.transition(index, SlotStatus::Free, SlotStatus::Submitted)
    }

    /// Take a Done slot back from the device
    pub(crate) fn mark_free(&self, index: usize) -> Result<(), TransitionError> {
        self.transition(index, SlotStatus::Done, SlotStatus::Free)
    }

    /// Undo a submit that the device rejected
    pub(crate) fn revoke_submission(&self, index: usize) -> Result<(), TransitionError> {
        self.transition(index, SlotStatus::Submitted, SlotStatus::Free)
    }

    fn transition(
        &self,
        index: usize,
        expected: SlotStatus,
        next: SlotStatus,
    ) -> Result<(), TransitionError> {
        self.status[index]
            .compare_exchange(
                expected as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|actual| TransitionError {
                index,
                expected,
                actual: SlotStatus::from_u8(actual),
            })
    }

    /// Run `f` on the bytes of a Free slot. Returns `None` if the slot is not Free.
    ///
    /// Engine-internal: only the worker (and `open`, before the worker exists)
    /// writes slots.
    pub(crate) fn with_free_slot<R>(&self, index: usize, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        if self.status(index) != SlotStatus::Free {
            return None;
        }
        let slot = self.slots[index];
        // SAFETY: status is Free, so the device holds no reference to this
        // range, and only one engine-side caller exists at a time.
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(self.slot_ptr(slot.offset), slot.len)
        };
        Some(f(bytes))
    }

    /// Device side: claim a Submitted slot for reading.
    ///
    /// Returns `None` unless the slot is Submitted. While the returned guard
    /// lives the slot is `Playing`; the engine can neither reclaim nor write
    /// it. Dropping the guard without [`PlayingSlot::finish`] hands the slot
    /// back as Submitted, so a device may read it across several claims.
    pub fn begin_playback(&self, index: usize) -> Option<PlayingSlot<'_>> {
        self.transition(index, SlotStatus::Submitted, SlotStatus::Playing)
            .ok()?;
        Some(PlayingSlot {
            arena: self,
            slot: self.slots[index],
            finished: false,
        })
    }

    fn slot_ptr(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset <= self.total);
        // SAFETY: base + offset stays within `cells` (base < SLOT_ALIGNMENT,
        // offset <= total).
        unsafe { UnsafeCell::raw_get(self.cells.as_ptr().add(self.base + offset)) }
    }
}

/// Device-side read access to one slot.
///
/// The bytes borrow the guard, so the slot cannot be finished (and handed
/// back to the engine for rewriting) while they are still in use:
///
/// ```compile_fail
/// use wavecycle_out::audio::SlotArena;
///
/// let arena = SlotArena::new(256);
/// let playing = arena.begin_playback(0).unwrap();
/// let bytes = playing.bytes();
/// playing.finish();
/// assert_eq!(bytes[0], 0);
/// ```
pub struct PlayingSlot<'a> {
    arena: &'a SlotArena,
    slot: SlotRef,
    finished: bool,
}

impl PlayingSlot<'_> {
    pub fn index(&self) -> usize {
        self.slot.index
    }

    pub fn len(&self) -> usize {
        self.slot.len
    }

    pub fn is_empty(&self) -> bool {
        self.slot.len == 0
    }

    /// Slot contents as rendered by the engine
    pub fn bytes(&self) -> &[u8] {
        // SAFETY: status is Playing for the guard's lifetime, so the engine
        // does not write this range; the borrow ends before the guard does.
        unsafe { std::slice::from_raw_parts(self.arena.slot_ptr(self.slot.offset), self.slot.len) }
    }

    /// The slot has finished playing: mark it Done for the engine to reclaim
    pub fn finish(mut self) {
        self.finished = true;
        if let Err(e) = self
            .arena
            .transition(self.slot.index, SlotStatus::Playing, SlotStatus::Done)
        {
            debug_assert!(false, "playing slot changed state: {}", e);
        }
    }
}

impl Drop for PlayingSlot<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self
                .arena
                .transition(self.slot.index, SlotStatus::Playing, SlotStatus::Submitted);
        }
    }
}

impl fmt::Debug for SlotArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status: Vec<SlotStatus> = (0..SLOT_COUNT).map(|i| self.status(i)).collect();
        f.debug_struct("SlotArena")
            .field("total", &self.total)
            .field("slot_len", &self.slot_len())
            .field("status", &status)
            .finish()
    }
}

/// Round `addr` up to the next multiple of `align` (a power of two)
fn align_up(addr: usize, align: usize) -> usize {
    let mask = align - 1;
    (addr + mask) & !mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_partition_aligned_region() {
        let arena = SlotArena::new(2048);
        assert_eq!(arena.slot_len(), 512);

        for (i, slot) in arena.slots().iter().enumerate() {
            assert_eq!(slot.index, i);
            assert_eq!(slot.offset, i * 512);
            assert_eq!(arena.slot_addr(i) % SLOT_ALIGNMENT, 0);
        }
        // contiguous, no overlap
        for i in 1..SLOT_COUNT {
            assert_eq!(arena.slot_addr(i) - arena.slot_addr(i - 1), 512);
        }
    }

    #[test]
    fn test_remainder_is_padding() {
        let arena = SlotArena::new(64 * 4 + 3);
        assert_eq!(arena.slot_len(), 64);
        assert_eq!(arena.total_bytes(), 259);
    }

    /// Submit a slot and let the device play it to completion
    fn play_through(arena: &SlotArena, index: usize) {
        arena.mark_submitted(index).unwrap();
        arena.begin_playback(index).unwrap().finish();
    }

    #[test]
    fn test_status_cycle() {
        let arena = SlotArena::new(256);
        assert_eq!(arena.status(0), SlotStatus::Free);

        arena.mark_submitted(0).unwrap();
        assert_eq!(arena.status(0), SlotStatus::Submitted);

        // double submission rejected
        let err = arena.mark_submitted(0).unwrap_err();
        assert_eq!(err.actual, SlotStatus::Submitted);

        // cannot reclaim before the device is done
        assert!(arena.mark_free(0).is_err());

        arena.begin_playback(0).unwrap().finish();
        assert!(arena.is_done(0));
        arena.mark_free(0).unwrap();
        assert_eq!(arena.status(0), SlotStatus::Free);

        // and round again
        play_through(&arena, 0);
        assert!(arena.is_done(0));
    }

    #[test]
    fn test_memory_access_follows_ownership() {
        let arena = SlotArena::new(256);

        let written = arena.with_free_slot(1, |bytes| {
            assert_eq!(bytes.len(), 64);
            assert!(bytes.iter().all(|&b| b == 0));
            bytes.fill(0xAB);
        });
        assert!(written.is_some());

        // device cannot read a Free slot
        assert!(arena.begin_playback(1).is_none());

        arena.mark_submitted(1).unwrap();
        // engine cannot write a Submitted slot
        assert!(arena.with_free_slot(1, |_| ()).is_none());

        let playing = arena.begin_playback(1).unwrap();
        assert_eq!(playing.index(), 1);
        assert_eq!(playing.len(), 64);
        let sum: u32 = playing.bytes().iter().map(|&b| u32::from(b)).sum();
        assert_eq!(sum, 0xAB * 64);
    }

    #[test]
    fn test_playing_slot_is_held_until_released() {
        let arena = SlotArena::new(256);
        arena.mark_submitted(2).unwrap();

        let playing = arena.begin_playback(2).unwrap();
        let first = playing.bytes()[0];
        assert_eq!(arena.status(2), SlotStatus::Playing);

        // a second claim, a reclaim, a revoke and a write all fail mid-read
        assert!(arena.begin_playback(2).is_none());
        assert!(arena.mark_free(2).is_err());
        assert!(arena.revoke_submission(2).is_err());
        assert!(arena.with_free_slot(2, |bytes| bytes.fill(0x55)).is_none());
        assert_eq!(playing.bytes()[0], first);

        // an unfinished claim hands the slot back as Submitted
        drop(playing);
        assert_eq!(arena.status(2), SlotStatus::Submitted);

        arena.begin_playback(2).unwrap().finish();
        assert!(arena.is_done(2));
        assert!(arena.begin_playback(2).is_none());
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(17, 16), 32);
    }
}
