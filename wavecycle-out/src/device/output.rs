//! Audio output using cpal
//!
//! Plays submitted slots on the system default output device.
//!
//! The cpal stream pulls samples on its own audio thread. Submitted slot
//! indices travel to it through a lock-free ring buffer; the callback reads
//! slot bytes in submission order, converts them to f32, and marks each slot
//! Done (notifying the completion signal) when its last byte has been played.
//! If no slot is queued the callback outputs silence.
//!
//! `cpal::Stream` is not `Send`, so the stream lives on a small host thread
//! that builds it, plays it and drops it when the device is closed.

use crate::audio::{SlotArena, SlotRef, StreamSpec};
use crate::device::{CompletionSignal, DeviceDriver, OutputDevice};
use crate::error::{DeviceError, DeviceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig, SupportedStreamConfigRange};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Opens the system default output device
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalDriver;

impl CpalDriver {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceDriver for CpalDriver {
    fn name(&self) -> &str {
        "cpal"
    }

    fn open(&self, spec: &StreamSpec, arena: Arc<SlotArena>) -> DeviceResult<Arc<dyn OutputDevice>> {
        let output = CpalOutput::open(*spec, arena)?;
        Ok(Arc::new(output))
    }
}

/// Open cpal output device
struct CpalOutput {
    arena: Arc<SlotArena>,
    /// Producer half of the submitted-slot queue (consumer lives in the callback)
    queue: Mutex<HeapProd<usize>>,
    signal: Arc<CompletionSignal>,
    host: Mutex<Option<StreamHost>>,
    closed: AtomicBool,
    /// Set by the stream error callback
    error_flag: Arc<AtomicBool>,
    underruns: Arc<AtomicU64>,
}

/// Thread owning the `cpal::Stream`
struct StreamHost {
    shutdown: Sender<()>,
    thread: JoinHandle<DeviceResult<()>>,
}

impl CpalOutput {
    fn open(spec: StreamSpec, arena: Arc<SlotArena>) -> DeviceResult<Self> {
        let signal = Arc::new(CompletionSignal::new());
        let (producer, consumer) = HeapRb::<usize>::new(arena.slots().len()).split();
        let error_flag = Arc::new(AtomicBool::new(false));
        let underruns = Arc::new(AtomicU64::new(0));

        let playback = SlotPlayback {
            arena: Arc::clone(&arena),
            queue: consumer,
            signal: Arc::clone(&signal),
            bit_depth: spec.bit_depth,
            current: None,
            position: 0,
            underruns: Arc::clone(&underruns),
        };

        let (ready_tx, ready_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let stream_error_flag = Arc::clone(&error_flag);

        let thread = thread::Builder::new()
            .name("wavecycle-cpal".to_string())
            .spawn(move || host_stream(spec, playback, stream_error_flag, ready_tx, shutdown_rx))
            .map_err(|e| DeviceError::Open(format!("Failed to spawn stream thread: {}", e)))?;

        // Wait for the host thread to report whether the stream is playing
        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(DeviceError::Open("Stream thread exited during setup".to_string()));
            }
        }

        Ok(Self {
            arena,
            queue: Mutex::new(producer),
            signal,
            host: Mutex::new(Some(StreamHost {
                shutdown: shutdown_tx,
                thread,
            })),
            closed: AtomicBool::new(false),
            error_flag,
            underruns,
        })
    }
}

/// Stream host thread body: build, play, park until shutdown, drop.
fn host_stream(
    spec: StreamSpec,
    mut playback: SlotPlayback,
    error_flag: Arc<AtomicBool>,
    ready: Sender<DeviceResult<()>>,
    shutdown: Receiver<()>,
) -> DeviceResult<()> {
    let host = cpal::default_host();

    let device = match host.default_output_device() {
        Some(dev) => dev,
        None => {
            let _ = ready.send(Err(DeviceError::Open("No default output device found".to_string())));
            return Ok(());
        }
    };

    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    info!("Using default audio device: {}", name);

    let config = StreamConfig {
        channels: spec.channels,
        sample_rate: SampleRate(spec.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    debug!(
        "Audio config: sample_rate={}, channels={}, bit_depth={}",
        spec.sample_rate, spec.channels, spec.bit_depth
    );

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            playback.fill(data);
        },
        move |err| {
            error!("Audio stream error: {}", err);
            error_flag.store(true, Ordering::SeqCst);
        },
        None,
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let configs = supported_configs(&device, &spec);
            warn!("Device '{}' rejected the stream: {}", name, configs);
            let _ = ready.send(Err(DeviceError::Open(format!(
                "Failed to build stream: {}; {}",
                e, configs
            ))));
            return Ok(());
        }
    };

    if let Err(e) = stream.play() {
        let configs = supported_configs(&device, &spec);
        warn!("Device '{}' could not start the stream: {}", name, configs);
        let _ = ready.send(Err(DeviceError::Open(format!(
            "Failed to start stream: {}; {}",
            e, configs
        ))));
        return Ok(());
    }

    let _ = ready.send(Ok(()));

    // Disconnected or explicit message: either way, time to stop
    let _ = shutdown.recv();

    let result = stream
        .pause()
        .map_err(|e| DeviceError::Close(format!("Failed to pause stream: {}", e)));
    drop(stream);
    result
}

/// Query the device's output configurations and describe them against `spec`
fn supported_configs(device: &cpal::Device, spec: &StreamSpec) -> String {
    match device.supported_output_configs() {
        Ok(ranges) => describe_supported(spec, &ranges.collect::<Vec<_>>()),
        Err(e) => format!("supported configs unavailable: {}", e),
    }
}

/// Summary of `ranges`, led by whether any of them fits `spec` as f32 output
fn describe_supported(spec: &StreamSpec, ranges: &[SupportedStreamConfigRange]) -> String {
    let fits = ranges.iter().any(|range| {
        range.channels() == spec.channels
            && range.sample_format() == SampleFormat::F32
            && (range.min_sample_rate().0..=range.max_sample_rate().0).contains(&spec.sample_rate)
    });

    let listed = if ranges.is_empty() {
        "none reported".to_string()
    } else {
        ranges
            .iter()
            .map(|range| {
                format!(
                    "{} ch {}-{} Hz {:?}",
                    range.channels(),
                    range.min_sample_rate().0,
                    range.max_sample_rate().0,
                    range.sample_format()
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    };

    if fits {
        format!("device supports {}", listed)
    } else {
        format!(
            "no f32 config for {} ch at {} Hz; device supports {}",
            spec.channels, spec.sample_rate, listed
        )
    }
}

impl OutputDevice for CpalOutput {
    fn submit(&self, slot: SlotRef) -> DeviceResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DeviceError::Submit {
                slot: slot.index,
                reason: "device closed".to_string(),
            });
        }

        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.try_push(slot.index).map_err(|_| DeviceError::Submit {
            slot: slot.index,
            reason: "submit queue full".to_string(),
        })
    }

    fn reclaim(&self, slot: SlotRef) -> DeviceResult<()> {
        if self.error_flag.load(Ordering::SeqCst) {
            return Err(DeviceError::Reclaim {
                slot: slot.index,
                reason: "audio stream reported an error".to_string(),
            });
        }
        if !self.arena.is_done(slot.index) {
            return Err(DeviceError::Reclaim {
                slot: slot.index,
                reason: "slot still playing".to_string(),
            });
        }
        Ok(())
    }

    fn wait_for_completion(&self, timeout: Option<Duration>) -> bool {
        self.signal.wait(timeout)
    }

    fn close(&self) -> DeviceResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Closing audio stream");

        let host = self.host.lock().unwrap_or_else(PoisonError::into_inner).take();
        let result = match host {
            Some(StreamHost { shutdown, thread }) => {
                let _ = shutdown.send(());
                match thread.join() {
                    Ok(result) => result,
                    Err(_) => Err(DeviceError::Close("Stream thread panicked".to_string())),
                }
            }
            None => Ok(()),
        };

        let underruns = self.underruns.load(Ordering::Relaxed);
        if underruns > 0 {
            warn!("Audio stream had {} underrun callbacks", underruns);
        }

        // Release a worker still blocked on the completion wait
        self.signal.notify();
        result
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        // Ensure stream is stopped on drop
        let _ = self.close();
    }
}

/// Audio-thread side: walks submitted slots and converts PCM to f32
struct SlotPlayback {
    arena: Arc<SlotArena>,
    queue: HeapCons<usize>,
    signal: Arc<CompletionSignal>,
    bit_depth: u16,
    /// Slot being played
    current: Option<usize>,
    /// Byte position within the current slot
    position: usize,
    underruns: Arc<AtomicU64>,
}

impl SlotPlayback {
    fn fill(&mut self, data: &mut [f32]) {
        let bytes_per_sample = usize::from(self.bit_depth / 8);
        let mut written = 0;

        while written < data.len() {
            let index = match self.current {
                Some(index) => index,
                None => match self.queue.try_pop() {
                    Some(index) => {
                        self.current = Some(index);
                        self.position = 0;
                        index
                    }
                    None => {
                        // Nothing queued: silence for the rest of this callback
                        data[written..].fill(0.0);
                        self.underruns.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                },
            };

            let Some(playing) = self.arena.begin_playback(index) else {
                // Slot no longer readable; drop it rather than spin
                self.current = None;
                continue;
            };

            let slot_len = playing.len();
            let wanted = (data.len() - written) * bytes_per_sample;
            let end = (self.position + wanted).min(slot_len);
            let converted = convert_pcm(
                &playing.bytes()[self.position..end],
                self.bit_depth,
                &mut data[written..],
            );

            written += converted;
            self.position += converted * bytes_per_sample;

            if self.position >= slot_len {
                self.current = None;
                playing.finish();
                self.signal.notify();
            }
        }
    }
}

/// Convert PCM bytes into f32 samples. Returns the number of samples written.
///
/// 8-bit PCM is unsigned (silence = 128), 16-bit PCM is signed little-endian.
fn convert_pcm(bytes: &[u8], bit_depth: u16, out: &mut [f32]) -> usize {
    match bit_depth {
        8 => {
            let count = bytes.len().min(out.len());
            for (dst, &b) in out.iter_mut().zip(&bytes[..count]) {
                *dst = (f32::from(b) - 128.0) / 128.0;
            }
            count
        }
        _ => {
            let count = (bytes.len() / 2).min(out.len());
            for (dst, pair) in out.iter_mut().zip(bytes.chunks_exact(2).take(count)) {
                *dst = f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0;
            }
            count
        }
    }
}
