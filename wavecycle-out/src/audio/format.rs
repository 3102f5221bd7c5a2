//! Wave format description and validation
//!
//! A [`WaveFormat`] bundles the PCM layout with the renderer that produces the
//! samples. All fields are checked together by [`WaveFormat::validate`] before
//! the engine acquires any resource.

use crate::audio::arena::{SLOT_ALIGNMENT, SLOT_COUNT};
use crate::error::FormatError;
use std::fmt;

/// Sample rates accepted by the engine
pub const SUPPORTED_SAMPLE_RATES: [u32; 3] = [11025, 22050, 44100];

/// Bit depths accepted by the engine
pub const SUPPORTED_BIT_DEPTHS: [u16; 2] = [8, 16];

/// Produces PCM samples into reclaimed slots.
///
/// Called on the render worker thread. Implementations must fill the whole
/// buffer with samples in the negotiated format (8-bit unsigned or 16-bit
/// signed little-endian, interleaved) and must not block indefinitely: a stalled
/// renderer stalls every later buffer.
///
/// Any `FnMut(&mut [u8]) + Send` closure is a renderer, so caller context is
/// simply captured state.
pub trait Renderer: Send + 'static {
    fn render(&mut self, buffer: &mut [u8]);
}

impl<F> Renderer for F
where
    F: FnMut(&mut [u8]) + Send + 'static,
{
    fn render(&mut self, buffer: &mut [u8]) {
        self(buffer)
    }
}

/// PCM layout negotiated with the device, without the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub channels: u16,
    /// Frames across the whole buffer pool
    pub buffer_frames: u32,
}

impl StreamSpec {
    /// Bytes per interleaved frame
    pub fn block_align(&self) -> usize {
        usize::from(self.channels) * usize::from(self.bit_depth / 8)
    }

    /// Bytes per second of playback
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.block_align()
    }

    /// Total bytes of the buffer pool, `None` on overflow
    pub fn total_bytes(&self) -> Option<usize> {
        (self.buffer_frames as usize).checked_mul(self.block_align())
    }
}

/// Format and renderer for one output session
pub struct WaveFormat {
    /// Sample rate in Hz (11025, 22050 or 44100)
    pub sample_rate: u32,
    /// Bits per sample (8 or 16)
    pub bit_depth: u16,
    /// Channel count (1 or 2)
    pub channels: u16,
    /// Frames across the whole buffer pool, power of two.
    ///
    /// Each of the four slots holds a quarter of these frames. The pool must
    /// also span at least 64 bytes (`buffer_frames * channels * bit_depth / 8`)
    /// so every slot is a non-empty multiple of 16 bytes: 16-bit stereo needs
    /// 16 frames or more, 8-bit mono 64 or more.
    pub buffer_frames: u32,
    /// Sample producer. `None` fails validation.
    pub renderer: Option<Box<dyn Renderer>>,
}

impl WaveFormat {
    /// Format without a renderer; attach one with [`WaveFormat::with_renderer`]
    pub fn new(sample_rate: u32, bit_depth: u16, channels: u16, buffer_frames: u32) -> Self {
        Self {
            sample_rate,
            bit_depth,
            channels,
            buffer_frames,
            renderer: None,
        }
    }

    /// Attach the sample producer
    pub fn with_renderer<R: Renderer>(mut self, renderer: R) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    /// PCM layout of this format
    pub fn spec(&self) -> StreamSpec {
        StreamSpec {
            sample_rate: self.sample_rate,
            bit_depth: self.bit_depth,
            channels: self.channels,
            buffer_frames: self.buffer_frames,
        }
    }

    /// Check every field. The first violation found is returned.
    pub fn validate(&self) -> Result<(), FormatError> {
        if !self.buffer_frames.is_power_of_two() {
            return Err(FormatError::BufferNotPowerOfTwo(self.buffer_frames));
        }
        if self.renderer.is_none() {
            return Err(FormatError::MissingRenderer);
        }
        if !SUPPORTED_BIT_DEPTHS.contains(&self.bit_depth) {
            return Err(FormatError::UnsupportedBitDepth(self.bit_depth));
        }
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(FormatError::UnsupportedSampleRate(self.sample_rate));
        }
        if self.channels != 1 && self.channels != 2 {
            return Err(FormatError::UnsupportedChannels(self.channels));
        }

        // Power-of-two total of at least SLOT_COUNT * SLOT_ALIGNMENT bytes keeps
        // every slot boundary on an aligned address.
        let bytes = self.spec().total_bytes().ok_or(FormatError::BufferTooLarge)?;
        if bytes < SLOT_COUNT * SLOT_ALIGNMENT {
            return Err(FormatError::BufferTooSmall {
                bytes,
                slots: SLOT_COUNT,
            });
        }
        if bytes > isize::MAX as usize - SLOT_ALIGNMENT {
            return Err(FormatError::BufferTooLarge);
        }

        Ok(())
    }
}

impl fmt::Debug for WaveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaveFormat")
            .field("sample_rate", &self.sample_rate)
            .field("bit_depth", &self.bit_depth)
            .field("channels", &self.channels)
            .field("buffer_frames", &self.buffer_frames)
            .field("renderer", &self.renderer.as_ref().map(|_| "<renderer>"))
            .finish()
    }
}
