//! Live capture sources
//!
//! Frames come from an external capture library (FFmpeg device input or a
//! vendor SDK) behind the [`CaptureSource`] trait. A [`worker::CaptureWorker`]
//! polls one source on a dedicated thread and moves decoded frames into the
//! live capture texture; [`lifecycle::CaptureLifecycle`] decides when that
//! worker should be alive at all.

pub mod lifecycle;
pub mod worker;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gfx::PixelLayout;

/// Errors from the capture backend.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open device {device:?}: {reason}")]
    OpenFailed { device: String, reason: String },

    #[error("device not negotiated (reported {width}x{height})")]
    NotNegotiated { width: i32, height: i32 },

    #[error("poll failed: {0}")]
    PollFailed(String),
}

/// One configured capture input: which node owns the device, which device,
/// and how the backend should be driven.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Address of the cluster node the device is physically attached to.
    pub host: String,
    /// Backend device identifier (e.g. a DirectShow/AVFoundation name).
    pub device: String,
    /// Backend option key/value pairs passed through verbatim.
    pub options: Vec<(String, String)>,
    /// Source frames already arrive top-down; skip the row-order reversal.
    pub flip: bool,
}

impl CaptureConfig {
    pub fn add_option(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.options.push((key.into(), value.into()));
    }
}

/// Receiver for decoded frames, invoked from inside [`CaptureSource::poll`]
/// on the polling thread.
pub trait FrameSink {
    /// `rows` holds `height` rows of `width` pixels in the source's pixel
    /// layout. Row order is bottom-up relative to the desired texture layout
    /// unless the capture config says otherwise.
    fn frame(&mut self, rows: &[u8], width: i32, height: i32);
}

/// Abstract capture backend.
///
/// `poll` blocks in the external library and invokes the sink zero or more
/// times, once per decoded frame.
pub trait CaptureSource: Send {
    fn open(&mut self) -> Result<(), CaptureError>;
    fn poll(&mut self, sink: &mut dyn FrameSink) -> Result<(), CaptureError>;

    /// Negotiated frame width; only meaningful after `open`.
    fn width(&self) -> i32;
    /// Negotiated frame height; only meaningful after `open`.
    fn height(&self) -> i32;
    fn format_name(&self) -> &str;
    fn pixel_layout(&self) -> PixelLayout;
}

/// Rolling frames-per-second measurement over one-second windows.
#[derive(Debug, Default)]
pub struct CaptureStats {
    previous_stamp: Option<f64>,
    duration: f64,
    samples: f64,
    rate: f64,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one decoded frame at `timestamp` (seconds).
    pub fn sample(&mut self, timestamp: f64) {
        let previous = self.previous_stamp.unwrap_or(timestamp);
        self.duration += timestamp - previous;
        self.previous_stamp = Some(timestamp);
        self.samples += 1.0;

        if self.duration >= 1.0 {
            self.rate = self.samples / self.duration;
            self.duration = 0.0;
            self.samples = 0.0;
        }
    }

    /// Latest completed measurement in frames per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }
}
