//! Sine tone renderer
//!
//! Writes a continuous sine wave in the stream's PCM layout. Used by the
//! `wavecycle-out` binary and by tests that need non-silent audio.

use crate::audio::{Renderer, StreamSpec};
use std::f32::consts::PI;

/// Continuous sine wave generator
#[derive(Debug, Clone)]
pub struct SineTone {
    spec: StreamSpec,
    frequency_hz: f32,
    /// Amplitude 0.0-1.0
    amplitude: f32,
    /// Phase in radians, carried across buffers to avoid clicks
    phase: f32,
}

impl SineTone {
    /// # Arguments
    /// * `spec` - Stream layout the tone is rendered for
    /// * `frequency_hz` - Frequency (e.g., 440.0 for A4)
    /// * `amplitude` - 0.0-1.0, clamped (0.5 recommended to avoid clipping)
    pub fn new(spec: StreamSpec, frequency_hz: f32, amplitude: f32) -> Self {
        Self {
            spec,
            frequency_hz,
            amplitude: amplitude.clamp(0.0, 1.0),
            phase: 0.0,
        }
    }

    fn next_sample(&mut self) -> f32 {
        let value = self.phase.sin() * self.amplitude;
        self.phase += 2.0 * PI * self.frequency_hz / self.spec.sample_rate as f32;
        if self.phase >= 2.0 * PI {
            self.phase -= 2.0 * PI;
        }
        value
    }
}

impl Renderer for SineTone {
    fn render(&mut self, buffer: &mut [u8]) {
        let block_align = self.spec.block_align();
        let channels = usize::from(self.spec.channels);

        for frame in buffer.chunks_exact_mut(block_align) {
            let value = self.next_sample();
            match self.spec.bit_depth {
                8 => {
                    let sample = (value * 127.0 + 128.0) as u8;
                    frame.fill(sample);
                }
                _ => {
                    let sample = ((value * i16::MAX as f32) as i16).to_le_bytes();
                    for ch in 0..channels {
                        frame[ch * 2..ch * 2 + 2].copy_from_slice(&sample);
                    }
                }
            }
        }
    }
}
