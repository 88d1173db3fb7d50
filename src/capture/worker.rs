//! Capture worker thread
//!
//! One worker owns one capture source and polls it on a dedicated OS thread
//! with its own rendering context. Decoded frames are staged through a
//! double-buffered [`FrameRing`] (row order corrected for the texture layout)
//! and uploaded into the live capture texture from the polling thread.
//!
//! Stopping always joins the thread, so no detached thread outlives the
//! worker; the join blocks until the in-flight poll call returns, which is
//! bounded only by the capture library's own responsiveness.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::capture::{CaptureConfig, CaptureSource, CaptureStats, FrameSink};
use crate::gfx::{GpuUploader, PixelLayout, RenderContext, TextureId};

/// Pause between polls to bound CPU usage on fast devices.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Hook run on every decoded frame before upload. Returning `false` drops
/// the frame (a command sheet is in view and must not reach the dome).
pub type FrameInspector = Box<dyn FnMut(&[u8], i32, i32) -> bool + Send>;

/// Double-buffered staging between frame decode and texture upload.
///
/// The writer fills the back slot, then publishes it by bumping the sequence
/// counter, so a reader can never observe a half-written frame. Only the
/// latest frame is retained; an unconsumed frame is overwritten rather than
/// blocking the capture thread.
#[derive(Debug)]
pub struct FrameRing {
    slots: [Vec<u8>; 2],
    width: i32,
    height: i32,
    layout: PixelLayout,
    sequence: u64,
}

impl FrameRing {
    pub fn new(width: i32, height: i32, layout: PixelLayout) -> Self {
        let len = width as usize * height as usize * layout.bytes_per_pixel();
        Self {
            slots: [vec![0; len], vec![0; len]],
            width,
            height,
            layout,
            sequence: 0,
        }
    }

    fn stride(&self) -> usize {
        self.width as usize * self.layout.bytes_per_pixel()
    }

    /// Copy one source frame into the back slot and publish it.
    ///
    /// Source rows arrive bottom-up relative to the texture layout, so the
    /// copy reverses row order by default; `flip` copies forward instead.
    pub fn write_frame(&mut self, rows: &[u8], flip: bool) {
        let stride = self.stride();
        let height = self.height as usize;
        let back = ((self.sequence + 1) % 2) as usize;
        let slot = &mut self.slots[back];

        if flip {
            slot[..stride * height].copy_from_slice(&rows[..stride * height]);
        } else {
            for row in 0..height {
                let src_row = height - 1 - row;
                let src = &rows[src_row * stride..(src_row + 1) * stride];
                slot[row * stride..(row + 1) * stride].copy_from_slice(src);
            }
        }

        self.sequence += 1;
    }

    /// Latest fully published frame, if any frame has been written yet.
    pub fn latest(&self) -> Option<&[u8]> {
        if self.sequence == 0 {
            None
        } else {
            Some(&self.slots[(self.sequence % 2) as usize])
        }
    }

    /// Number of frames published so far.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }
}

/// Everything the polling thread shares with the owning worker.
#[derive(Clone)]
struct WorkerLink {
    source: Arc<Mutex<Box<dyn CaptureSource>>>,
    context: Arc<Mutex<Box<dyn RenderContext>>>,
    uploader: Arc<Mutex<Box<dyn GpuUploader>>>,
    inspector: Arc<Mutex<Option<FrameInspector>>>,
    stats: Arc<Mutex<CaptureStats>>,
    running: Arc<AtomicBool>,
}

/// Owns one capture source instance and its polling thread.
pub struct CaptureWorker {
    config: CaptureConfig,
    link: WorkerLink,
    target: TextureId,
    handle: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    pub fn new(
        config: CaptureConfig,
        source: Box<dyn CaptureSource>,
        context: Box<dyn RenderContext>,
        uploader: Box<dyn GpuUploader>,
    ) -> Self {
        Self {
            config,
            link: WorkerLink {
                source: Arc::new(Mutex::new(source)),
                context: Arc::new(Mutex::new(context)),
                uploader: Arc::new(Mutex::new(uploader)),
                inspector: Arc::new(Mutex::new(None)),
                stats: Arc::new(Mutex::new(CaptureStats::new())),
                running: Arc::new(AtomicBool::new(false)),
            },
            target: TextureId::NONE,
            handle: None,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Open the underlying source. Called once at graphics init time,
    /// before the first `start`.
    pub fn open_source(&mut self) -> Result<(i32, i32), crate::capture::CaptureError> {
        let mut source = self.link.source.lock();
        source.open()?;
        Ok((source.width(), source.height()))
    }

    /// Texture the worker uploads into. `TextureId::NONE` disables uploads
    /// (frames are still polled and dropped).
    pub fn set_target(&mut self, target: TextureId) {
        self.target = target;
    }

    pub fn set_inspector(&mut self, inspector: FrameInspector) {
        *self.link.inspector.lock() = Some(inspector);
    }

    /// Latest capture rate in frames per second.
    pub fn capture_rate(&self) -> f64 {
        self.link.stats.lock().rate()
    }

    pub fn is_running(&self) -> bool {
        self.link.running.load(Ordering::Acquire)
    }

    /// Spawn the polling thread if this node owns the capture device.
    ///
    /// Calling `start` while already running is a no-op; every other cluster
    /// node is a no-op too and only tracks the shared running state.
    pub fn start(&mut self, local_address: &str) -> bool {
        if self.handle.is_some() {
            return true;
        }
        if local_address != self.config.host {
            return false;
        }

        self.link.running.store(true, Ordering::Release);

        let link = self.link.clone();
        let target = self.target;
        let flip = self.config.flip;
        let spawned = std::thread::Builder::new()
            .name("capture-poll".to_string())
            .spawn(move || poll_loop(link, target, flip));

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                true
            }
            Err(e) => {
                log::error!("failed to spawn capture thread: {e}");
                self.link.running.store(false, Ordering::Release);
                false
            }
        }
    }

    /// Clear the running flag and join the polling thread.
    ///
    /// No-op when already stopped. Blocks the caller until the in-flight
    /// poll returns.
    pub fn stop(&mut self) {
        self.link.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sink that moves each decoded frame through the ring into the texture.
struct UploadSink<'a> {
    ring: &'a mut Option<FrameRing>,
    uploader: &'a mut dyn GpuUploader,
    inspector: &'a mut Option<FrameInspector>,
    target: TextureId,
    flip: bool,
    stats: &'a Mutex<CaptureStats>,
    started: Instant,
}

impl FrameSink for UploadSink<'_> {
    fn frame(&mut self, rows: &[u8], width: i32, height: i32) {
        if let Some(inspector) = self.inspector.as_mut() {
            if !inspector(rows, width, height) {
                return;
            }
        }

        let Some(ring) = self.ring.as_mut() else {
            return;
        };
        ring.write_frame(rows, self.flip);

        if self.target.is_valid() {
            if let Some(frame) = ring.latest() {
                self.uploader
                    .upload(self.target, ring.width(), ring.height(), ring.layout(), frame);
            }
        }

        self.stats.lock().sample(self.started.elapsed().as_secs_f64());
    }
}

fn poll_loop(link: WorkerLink, target: TextureId, flip: bool) {
    link.context.lock().make_current();

    let (width, height, layout) = {
        let source = link.source.lock();
        (source.width(), source.height(), source.pixel_layout())
    };

    // Hot-plugged or not-yet-negotiated devices report zero sizes; keep
    // polling anyway so a reconnect can be picked up by a restart.
    let mut ring = if width * height > 0 {
        Some(FrameRing::new(width, height, layout))
    } else {
        log::error!("invalid capture size ({width}x{height}), staging disabled");
        None
    };

    let started = Instant::now();

    while link.running.load(Ordering::Acquire) {
        {
            let mut source = link.source.lock();
            let mut uploader = link.uploader.lock();
            let mut inspector = link.inspector.lock();
            let mut sink = UploadSink {
                ring: &mut ring,
                uploader: &mut **uploader,
                inspector: &mut *inspector,
                target,
                flip,
                stats: &link.stats,
                started,
            };
            if let Err(e) = source.poll(&mut sink) {
                log::warn!("capture poll failed: {e}");
            }
        }

        std::thread::sleep(POLL_INTERVAL);
    }

    link.context.lock().detach();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::mock::ScriptedSource;
    use crate::gfx::mock::{MockContext, MockUploader};

    /// Delegating uploader so tests can inspect uploads after the worker
    /// has consumed the boxed instance.
    struct SharedUploader(Arc<Mutex<MockUploader>>);

    impl GpuUploader for SharedUploader {
        fn alloc_texture(&mut self, w: i32, h: i32) -> Result<TextureId, crate::gfx::GfxError> {
            self.0.lock().alloc_texture(w, h)
        }

        fn upload(&mut self, tex: TextureId, w: i32, h: i32, layout: PixelLayout, pixels: &[u8]) {
            self.0.lock().upload(tex, w, h, layout, pixels)
        }

        fn upload_image(&mut self, w: i32, h: i32, pixels: &[u8]) -> Result<TextureId, crate::gfx::GfxError> {
            self.0.lock().upload_image(w, h, pixels)
        }

        fn copy_texture(&mut self, src: TextureId, dst: TextureId, w: i32, h: i32) {
            self.0.lock().copy_texture(src, dst, w, h)
        }

        fn delete_texture(&mut self, tex: TextureId) {
            self.0.lock().delete_texture(tex)
        }
    }

    /// Bottom-up source frame: marker row of 0xAA at the source's last row
    /// (which is the top of the image), 0x11 everywhere else.
    fn marked_frame(width: usize, height: usize) -> Vec<u8> {
        let stride = width * 3;
        let mut rows = vec![0x11u8; stride * height];
        for byte in &mut rows[stride * (height - 1)..] {
            *byte = 0xAA;
        }
        rows
    }

    fn host_worker(
        width: i32,
        height: i32,
    ) -> (
        CaptureWorker,
        Arc<Mutex<MockUploader>>,
        Arc<std::sync::atomic::AtomicUsize>,
    ) {
        let uploads = Arc::new(Mutex::new(MockUploader::default()));
        let source = ScriptedSource::new(width, height, PixelLayout::Bgr8, if width > 0 {
            marked_frame(width as usize, height as usize)
        } else {
            Vec::new()
        });
        let polls = Arc::clone(&source.polls);
        let config = CaptureConfig {
            host: "10.0.0.1".to_string(),
            ..Default::default()
        };
        let mut worker = CaptureWorker::new(
            config,
            Box::new(source),
            Box::new(MockContext::default()),
            Box::new(SharedUploader(Arc::clone(&uploads))),
        );
        worker.set_target(TextureId(1));
        (worker, uploads, polls)
    }

    #[test]
    fn test_ring_default_reverses_rows() {
        let mut ring = FrameRing::new(2, 3, PixelLayout::Bgr8);
        ring.write_frame(&marked_frame(2, 3), false);
        let frame = ring.latest().unwrap();
        // Marker row lands at the top of the staged frame.
        assert!(frame[..6].iter().all(|&b| b == 0xAA));
        assert!(frame[6..].iter().all(|&b| b == 0x11));
    }

    #[test]
    fn test_ring_flip_copies_forward() {
        let mut ring = FrameRing::new(2, 3, PixelLayout::Bgr8);
        ring.write_frame(&marked_frame(2, 3), true);
        let frame = ring.latest().unwrap();
        // Marker row stays at the bottom.
        assert!(frame[..6].iter().all(|&b| b == 0x11));
        assert!(frame[12..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_ring_packed16_stride() {
        // 2 bytes per pixel: rows are narrower than the color path.
        let mut ring = FrameRing::new(3, 2, PixelLayout::Packed16);
        let rows: Vec<u8> = vec![1, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 2];
        ring.write_frame(&rows, false);
        let frame = ring.latest().unwrap();
        assert_eq!(frame.len(), 12);
        assert!(frame[..6].iter().all(|&b| b == 2));
        assert!(frame[6..].iter().all(|&b| b == 1));
    }

    #[test]
    fn test_ring_alternates_slots() {
        let mut ring = FrameRing::new(1, 1, PixelLayout::Bgr8);
        assert!(ring.latest().is_none());

        ring.write_frame(&[1, 1, 1], true);
        assert_eq!(ring.latest().unwrap(), &[1, 1, 1]);
        assert_eq!(ring.sequence(), 1);

        ring.write_frame(&[2, 2, 2], true);
        assert_eq!(ring.latest().unwrap(), &[2, 2, 2]);
        assert_eq!(ring.sequence(), 2);
    }

    #[test]
    fn test_start_skipped_on_non_host_node() {
        let (mut worker, uploads, _polls) = host_worker(2, 2);
        assert!(!worker.start("10.0.0.2"));
        assert!(!worker.is_running());
        worker.stop();
        assert!(uploads.lock().uploads.is_empty());
    }

    #[test]
    fn test_start_twice_spawns_once() {
        let (mut worker, _uploads, _polls) = host_worker(2, 2);
        assert!(worker.start("10.0.0.1"));
        assert!(worker.is_running());
        assert!(worker.start("10.0.0.1"));
        worker.stop();
        assert!(!worker.is_running());
    }

    #[test]
    fn test_stop_when_stopped_is_noop() {
        let (mut worker, _uploads, _polls) = host_worker(2, 2);
        worker.stop();
        worker.stop();
        assert!(!worker.is_running());
    }

    #[test]
    fn test_worker_uploads_flipped_frames() {
        let (mut worker, uploads, _polls) = host_worker(2, 3);
        assert!(worker.start("10.0.0.1"));
        std::thread::sleep(Duration::from_millis(80));
        worker.stop();

        let uploads = uploads.lock();
        assert!(!uploads.uploads.is_empty());
        let (tex, layout, pixels) = &uploads.uploads[0];
        assert_eq!(*tex, TextureId(1));
        assert_eq!(*layout, PixelLayout::Bgr8);
        // Default (no flip flag): marker row moved to the top.
        assert!(pixels[..6].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_zero_size_device_keeps_polling() {
        let (mut worker, uploads, polls) = host_worker(0, 0);
        assert!(worker.start("10.0.0.1"));
        std::thread::sleep(Duration::from_millis(60));
        worker.stop();
        // No staging, no uploads, no crash.
        assert!(uploads.lock().uploads.is_empty());
    }

    #[test]
    fn test_inspector_gates_upload() {
        let (mut worker, uploads, _polls) = host_worker(2, 2);
        worker.set_inspector(Box::new(|_, _, _| false));
        assert!(worker.start("10.0.0.1"));
        std::thread::sleep(Duration::from_millis(60));
        worker.stop();
        assert!(uploads.lock().uploads.is_empty());
    }
}
