//! Raw-to-color conversion stage.
//!
//! One fixed demosaic step (bilinear, per the sensor's CFA layout) followed
//! by one joint min-max normalization to 8-bit RGB. The stage never fails:
//! with no demosaic backend available it emits a blank frame and a
//! diagnostic, and the pipeline keeps running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use tracing::{debug, info, trace, warn};

use crate::capture::frame::{CfaColor, RawFrame};
use crate::display::sink::render;
use crate::display::surface::DrawSurface;
use crate::pipeline::slot::FrameSlot;

/// Throughput is sampled once per full second of elapsed time.
const METRICS_WINDOW: Duration = Duration::from_secs(1);

/// Decoded 8-bit RGB image. Created per conversion, consumed by the render
/// sink, never cached.
pub struct ColorImage {
    pub width: u32,
    pub height: u32,
    /// Packed RGB24, row-major.
    pub pixels: Vec<u8>,
}

impl ColorImage {
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 3],
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        [self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]]
    }
}

/// Demosaic backend: expands a raw frame into packed 16-bit RGB.
pub trait DemosaicBackend: Send {
    fn name(&self) -> &'static str;
    fn demosaic(&self, frame: &RawFrame) -> Vec<u16>;
}

/// Portable bilinear demosaic.
pub struct CpuDemosaic;

impl CpuDemosaic {
    fn probe() -> Option<Box<dyn DemosaicBackend>> {
        Some(Box::new(CpuDemosaic))
    }
}

impl DemosaicBackend for CpuDemosaic {
    fn name(&self) -> &'static str {
        "cpu-bilinear"
    }

    fn demosaic(&self, frame: &RawFrame) -> Vec<u16> {
        let w = frame.width() as i64;
        let h = frame.height() as i64;
        let pattern = frame.pattern();

        // Border pixels interpolate against their clamped neighbors.
        let s = |x: i64, y: i64| -> u32 {
            frame.sample(x.clamp(0, w - 1) as u32, y.clamp(0, h - 1) as u32) as u32
        };

        let mut rgb = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                let (r, g, b) = match pattern.color_at(x as u32, y as u32) {
                    CfaColor::Red => (
                        s(x, y),
                        (s(x - 1, y) + s(x + 1, y) + s(x, y - 1) + s(x, y + 1)) / 4,
                        (s(x - 1, y - 1) + s(x + 1, y - 1) + s(x - 1, y + 1) + s(x + 1, y + 1))
                            / 4,
                    ),
                    CfaColor::Blue => (
                        (s(x - 1, y - 1) + s(x + 1, y - 1) + s(x - 1, y + 1) + s(x + 1, y + 1))
                            / 4,
                        (s(x - 1, y) + s(x + 1, y) + s(x, y - 1) + s(x, y + 1)) / 4,
                        s(x, y),
                    ),
                    CfaColor::Green => {
                        let horizontal = (s(x - 1, y) + s(x + 1, y)) / 2;
                        let vertical = (s(x, y - 1) + s(x, y + 1)) / 2;
                        // A green site sits either in a red row or a blue row.
                        if pattern.color_at(x as u32 + 1, y as u32) == CfaColor::Red {
                            (horizontal, s(x, y), vertical)
                        } else {
                            (vertical, s(x, y), horizontal)
                        }
                    }
                };
                rgb.push(r as u16);
                rgb.push(g as u16);
                rgb.push(b as u16);
            }
        }
        rgb
    }
}

/// Select a demosaic backend, in order of preference.
fn detect_backend() -> Option<Box<dyn DemosaicBackend>> {
    let probes: [fn() -> Option<Box<dyn DemosaicBackend>>; 1] = [CpuDemosaic::probe];
    for probe in probes {
        if let Some(backend) = probe() {
            debug!(backend = backend.name(), "demosaic backend selected");
            return Some(backend);
        }
    }
    warn!("no demosaic backend available, frames will render blank");
    None
}

/// Map the full dynamic range present in the frame onto [0, 255].
/// A flat frame (max == min) maps to 0.
fn normalize_to_8bit(rgb: &[u16], width: u32, height: u32) -> ColorImage {
    let (min, max) = rgb
        .iter()
        .fold((u16::MAX, u16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = u32::from(max.saturating_sub(min));

    let mut pixels = vec![0u8; rgb.len()];
    if range > 0 {
        for (dst, &v) in pixels.iter_mut().zip(rgb) {
            *dst = (u32::from(v - min) * 255 / range) as u8;
        }
    }
    ColorImage {
        width,
        height,
        pixels,
    }
}

/// Rolling throughput/latency counters for the conversion stage.
///
/// Diagnostic only; written by the conversion context and reset every
/// measurement window.
struct PipelineMetrics {
    window_start: Instant,
    frames_in_window: u32,
    last_conversion: Duration,
}

impl PipelineMetrics {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frames_in_window: 0,
            last_conversion: Duration::ZERO,
        }
    }

    fn record(&mut self, took: Duration) {
        self.frames_in_window += 1;
        self.last_conversion = took;
        histogram!("convert_time_us").record(took.as_micros() as f64);

        let elapsed = self.window_start.elapsed();
        if elapsed >= METRICS_WINDOW {
            let fps = f64::from(self.frames_in_window) / elapsed.as_secs_f64();
            gauge!("convert_fps").set(fps);
            info!(
                fps = format_args!("{fps:.2}"),
                conversion_ms =
                    format_args!("{:.2}", self.last_conversion.as_secs_f64() * 1_000.0),
                "conversion throughput"
            );
            self.frames_in_window = 0;
            self.window_start = Instant::now();
        }
    }
}

/// The conversion stage. Owns its backend and metrics; frames pass through
/// by reference and are released by the caller.
pub struct Converter {
    backend: Option<Box<dyn DemosaicBackend>>,
    metrics: PipelineMetrics,
}

impl Converter {
    pub fn new() -> Self {
        Self {
            backend: detect_backend(),
            metrics: PipelineMetrics::new(),
        }
    }

    /// A converter with no backend: every frame comes out blank. The
    /// degraded mode `new` falls into when no backend probes successfully.
    pub fn without_backend() -> Self {
        Self {
            backend: None,
            metrics: PipelineMetrics::new(),
        }
    }

    /// Convert one raw frame. Infallible: a missing backend produces a
    /// blank image of the frame's dimensions plus a diagnostic event.
    pub fn convert(&mut self, frame: &RawFrame) -> ColorImage {
        let started = Instant::now();
        let image = match &self.backend {
            Some(backend) => {
                let rgb = backend.demosaic(frame);
                normalize_to_8bit(&rgb, frame.width(), frame.height())
            }
            None => {
                warn!(
                    sequence = frame.sequence(),
                    "conversion backend unavailable, emitting blank frame"
                );
                counter!("convert_degraded_total").increment(1);
                ColorImage::blank(frame.width(), frame.height())
            }
        };
        self.metrics.record(started.elapsed());
        image
    }
}

impl Default for Converter {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocking consumer loop: wait for a frame, convert, render, repeat until
/// the stop flag is raised. A timed-out wait logs and retries.
pub(crate) struct ConvertLoop {
    pub(crate) slot: Arc<FrameSlot>,
    pub(crate) converter: Converter,
    pub(crate) surface: Box<dyn DrawSurface>,
    pub(crate) take_timeout: Duration,
    pub(crate) stop: Arc<AtomicBool>,
}

impl ConvertLoop {
    pub(crate) fn run(mut self) {
        while !self.stop.load(Ordering::Acquire) {
            match self.slot.take(self.take_timeout) {
                Some(frame) => {
                    let image = self.converter.convert(&frame);
                    trace!(
                        sequence = frame.sequence(),
                        latency_ms = frame.captured_at().elapsed().as_millis() as u64,
                        "frame converted"
                    );
                    // Release the raw buffer before the blit.
                    drop(frame);
                    render(image, self.surface.as_mut());
                }
                None => {
                    warn!(
                        timeout_ms = self.take_timeout.as_millis() as u64,
                        "no frame received, waiting"
                    );
                }
            }
        }
        debug!("conversion loop exited");
    }
}
