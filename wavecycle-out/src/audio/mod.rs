//! Audio data types: wave format, renderer contract and the slot arena

pub mod arena;
pub mod format;

pub use arena::{PlayingSlot, SlotArena, SlotRef, SlotStatus, SLOT_ALIGNMENT, SLOT_COUNT};
pub use format::{Renderer, StreamSpec, WaveFormat};
