//! Still-image transfer pipeline
//!
//! Fisheye backgrounds and plane content start as JPEG/PNG files on the
//! master. Each file is shipped byte-for-byte to every client over the
//! reliable channel with a one-byte codec header, decoded on every node
//! (master included) into a mutex-guarded queue, and uploaded to a texture
//! on a thread holding the transfer context. The master collects one
//! acknowledgment per client before the new textures are published to the
//! shared state.
//!
//! Capture is suspended through the lifecycle lock for the whole
//! transfer+decode+upload window on the capture host, so the loader thread
//! never contends with the capture thread for a context.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use image::ImageFormat;
use parking_lot::Mutex;
use thiserror::Error;

use crate::capture::lifecycle::CaptureLifecycle;
use crate::cluster::ClusterChannel;
use crate::gfx::{GpuUploader, RenderContext, TextureId};

/// One codec header byte precedes every transferred image.
pub const IMAGE_HEADER_LEN: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
}

impl ImageKind {
    /// Detect a supported file type from its extension (case-insensitive).
    pub fn from_path(path: &str) -> Option<Self> {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
            Some(ImageKind::Jpeg)
        } else if lower.ends_with(".png") {
            Some(ImageKind::Png)
        } else {
            None
        }
    }

    pub fn header(self) -> u8 {
        match self {
            ImageKind::Jpeg => 0,
            ImageKind::Png => 1,
        }
    }

    pub fn from_header(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ImageKind::Jpeg),
            1 => Some(ImageKind::Png),
            _ => None,
        }
    }

    fn format(self) -> ImageFormat {
        match self {
            ImageKind::Jpeg => ImageFormat::Jpeg,
            ImageKind::Png => ImageFormat::Png,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("empty transfer payload")]
    EmptyPayload,

    #[error("unknown image header byte {0}")]
    UnknownHeader(u8),

    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A decoded image waiting for GPU upload.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl DecodedImage {
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

/// An uploaded still texture and its aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncedTexture {
    pub tex: TextureId,
    pub aspect: f32,
}

/// Shared transfer state, reachable from the frame loop, the loader thread,
/// and the transport's receive/ack callbacks.
#[derive(Default)]
pub struct TransferState {
    paths: Mutex<Vec<(String, ImageKind)>>,
    names: Mutex<Vec<String>>,
    images: Mutex<Vec<DecodedImage>>,
    textures: Mutex<Vec<SyncedTexture>>,
    last_package: AtomicI32,
    upload_count: AtomicI32,
    server_done: AtomicBool,
    clients_done: AtomicBool,
    acks: AtomicUsize,
}

impl TransferState {
    pub fn new() -> Self {
        Self {
            last_package: AtomicI32::new(-1),
            ..Default::default()
        }
    }

    /// Master side: filter dropped/scheduled paths down to supported image
    /// files, sorted alphabetically, and stage them for the loader thread.
    /// Returns how many files were staged.
    pub fn stage_paths(&self, dropped: &[String]) -> usize {
        let mut sorted: Vec<&String> = dropped.iter().collect();
        sorted.sort();

        self.upload_count.store(0, Ordering::SeqCst);

        let mut staged = 0;
        for path in sorted {
            let Some(kind) = ImageKind::from_path(path) else {
                log::warn!("unsupported image file {path:?}");
                continue;
            };
            let name = path
                .rsplit(['/', '\\'])
                .next()
                .unwrap_or(path.as_str())
                .to_string();
            self.paths.lock().push((path.clone(), kind));
            self.names.lock().push(name);
            self.upload_count.fetch_add(1, Ordering::SeqCst);
            staged += 1;
        }
        staged
    }

    /// Loader thread: ship every not-yet-sent staged file and decode it
    /// locally. A file that fails to read is logged and dropped; the batch
    /// continues.
    pub fn send_staged(&self, channel: &dyn ClusterChannel) -> usize {
        let first = (self.last_package.load(Ordering::SeqCst) + 1) as usize;
        let paths = self.paths.lock().clone();
        if first >= paths.len() {
            return 0;
        }
        self.last_package.store(paths.len() as i32 - 1, Ordering::SeqCst);

        let mut sent = 0;
        for (package, (path, kind)) in paths.iter().enumerate().skip(first) {
            let bytes = match std::fs::read(path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("failed to read {path:?}: {e}");
                    continue;
                }
            };

            let mut payload = Vec::with_capacity(bytes.len() + IMAGE_HEADER_LEN);
            payload.push(kind.header());
            payload.extend_from_slice(&bytes);

            channel.transfer_reliable(&payload, package as i32);
            if let Err(e) = self.read_image(&payload) {
                log::warn!("failed to decode {path:?}: {e}");
            }
            sent += 1;
        }
        sent
    }

    /// Decode one transferred payload into the pending queue.
    pub fn read_image(&self, payload: &[u8]) -> Result<(), TransferError> {
        let (&header, body) = payload.split_first().ok_or(TransferError::EmptyPayload)?;
        let kind = ImageKind::from_header(header).ok_or(TransferError::UnknownHeader(header))?;

        let decoded = image::load_from_memory_with_format(body, kind.format())?;
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();

        self.images.lock().push(DecodedImage {
            pixels: rgba.into_raw(),
            width,
            height,
        });
        Ok(())
    }

    /// Drain the decode queue into textures. Must run on a thread holding
    /// the transfer context.
    pub fn upload_pending(&self, uploader: &mut dyn GpuUploader) {
        let pending: Vec<DecodedImage> = self.images.lock().drain(..).collect();
        for image in pending {
            match uploader.upload_image(image.width as i32, image.height as i32, &image.pixels) {
                Ok(tex) => {
                    log::info!(
                        "texture {} loaded ({}x{})",
                        tex.0,
                        image.width,
                        image.height
                    );
                    self.textures.lock().push(SyncedTexture {
                        tex,
                        aspect: image.aspect(),
                    });
                }
                Err(e) => log::error!("texture upload failed: {e}"),
            }
        }
    }

    /// Master side: one client finished uploading `package`.
    pub fn on_ack(&self, package: i32, node_count: usize) {
        if package != self.last_package.load(Ordering::SeqCst) {
            return;
        }
        let acks = self.acks.fetch_add(1, Ordering::SeqCst) + 1;
        if acks >= node_count.saturating_sub(1) {
            self.clients_done.store(true, Ordering::SeqCst);
            self.acks.store(0, Ordering::SeqCst);
        }
    }

    /// Loader thread: local decode+upload finished. A single-node cluster
    /// has no clients to wait for.
    pub fn mark_server_done(&self, node_count: usize) {
        self.server_done.store(true, Ordering::SeqCst);
        if node_count <= 1 {
            self.clients_done.store(true, Ordering::SeqCst);
        }
    }

    /// Frame loop: once both sides finished, reset the flags and report
    /// (total synced textures, textures added by the last batch).
    pub fn take_completed(&self) -> Option<(usize, i32)> {
        if self.server_done.load(Ordering::SeqCst) && self.clients_done.load(Ordering::SeqCst) {
            self.server_done.store(false, Ordering::SeqCst);
            self.clients_done.store(false, Ordering::SeqCst);
            let total = self.textures.lock().len();
            Some((total, self.upload_count.load(Ordering::SeqCst)))
        } else {
            None
        }
    }

    pub fn textures(&self) -> Vec<SyncedTexture> {
        self.textures.lock().clone()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.lock().len()
    }

    pub fn names(&self) -> Vec<String> {
        self.names.lock().clone()
    }

    pub fn last_package(&self) -> i32 {
        self.last_package.load(Ordering::SeqCst)
    }

    /// Client side: remember the id of the package that just arrived.
    pub fn note_received(&self, package: i32) {
        self.last_package.store(package, Ordering::SeqCst);
    }
}

/// Requests handled by the loader thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderRequest {
    /// Ship and decode everything staged since the last transfer.
    Transfer,
    Shutdown,
}

/// The private context and uploader the transfer paths share.
pub struct TransferGfx {
    pub context: Box<dyn RenderContext>,
    pub uploader: Box<dyn GpuUploader>,
}

/// Loader thread body (master only). Blocks on the request channel; one
/// `Transfer` request ships the staged batch with capture suspended.
pub fn run_loader(
    state: Arc<TransferState>,
    requests: Receiver<LoaderRequest>,
    channel: Arc<dyn ClusterChannel>,
    lifecycle: Arc<CaptureLifecycle>,
    gfx: Arc<Mutex<TransferGfx>>,
) {
    while let Ok(request) = requests.recv() {
        match request {
            LoaderRequest::Shutdown => break,
            LoaderRequest::Transfer => {
                lifecycle.suspended(|| {
                    state.send_staged(channel.as_ref());

                    let mut gfx = gfx.lock();
                    let gfx = &mut *gfx;
                    gfx.context.make_current();
                    state.upload_pending(&mut *gfx.uploader);
                    gfx.context.detach();

                    state.mark_server_done(channel.node_count());
                });
            }
        }
    }
    log::debug!("transfer loader thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::mock::MockUploader;
    use std::io::Cursor;

    fn png_payload(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
        let mut bytes = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut bytes, ImageFormat::Png)
            .unwrap();

        let mut payload = vec![ImageKind::Png.header()];
        payload.extend_from_slice(&bytes.into_inner());
        payload
    }

    #[test]
    fn test_image_kind_from_path() {
        assert_eq!(ImageKind::from_path("a/b/sky.JPG"), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_path("dome.jpeg"), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_path("stars.png"), Some(ImageKind::Png));
        assert_eq!(ImageKind::from_path("notes.txt"), None);
    }

    #[test]
    fn test_stage_paths_filters_and_sorts() {
        let state = TransferState::new();
        let staged = state.stage_paths(&[
            "z/second.png".to_string(),
            "a/first.jpg".to_string(),
            "skip.txt".to_string(),
        ]);

        assert_eq!(staged, 2);
        assert_eq!(state.names(), vec!["first.jpg", "second.png"]);
    }

    #[test]
    fn test_read_image_and_upload() {
        let state = TransferState::new();
        state.read_image(&png_payload(4, 2)).unwrap();

        let mut uploader = MockUploader::default();
        state.upload_pending(&mut uploader);

        let textures = state.textures();
        assert_eq!(textures.len(), 1);
        assert!(textures[0].tex.is_valid());
        assert!((textures[0].aspect - 2.0).abs() < 1e-6);
        assert_eq!(uploader.uploads.len(), 1);
    }

    #[test]
    fn test_read_image_rejects_garbage() {
        let state = TransferState::new();
        assert!(matches!(
            state.read_image(&[]),
            Err(TransferError::EmptyPayload)
        ));
        assert!(matches!(
            state.read_image(&[9, 1, 2, 3]),
            Err(TransferError::UnknownHeader(9))
        ));
        assert!(matches!(
            state.read_image(&[1, 1, 2, 3]),
            Err(TransferError::Decode(_))
        ));
        // Nothing queued after failures.
        let mut uploader = MockUploader::default();
        state.upload_pending(&mut uploader);
        assert!(state.textures().is_empty());
    }

    #[test]
    fn test_ack_counting() {
        let state = TransferState::new();
        state.last_package.store(2, Ordering::SeqCst);

        // Stale package ids are ignored.
        state.on_ack(0, 3);
        assert!(state.take_completed().is_none());

        state.mark_server_done(3);
        state.on_ack(2, 3);
        assert!(state.take_completed().is_none(), "one client still pending");

        state.on_ack(2, 3);
        let completed = state.take_completed();
        assert_eq!(completed, Some((0, 0)));
        // Flags reset after completion.
        assert!(state.take_completed().is_none());
    }

    #[test]
    fn test_single_node_completes_immediately() {
        let state = TransferState::new();
        state.mark_server_done(1);
        assert!(state.take_completed().is_some());
    }

    #[test]
    fn test_send_staged_frames_payloads() {
        struct RecordingChannel(Mutex<Vec<(i32, Vec<u8>)>>);
        impl ClusterChannel for RecordingChannel {
            fn is_master(&self) -> bool {
                true
            }
            fn this_node_address(&self) -> &str {
                "master"
            }
            fn node_count(&self) -> usize {
                2
            }
            fn transfer_reliable(&self, payload: &[u8], tag: i32) {
                self.0.lock().push((tag, payload.to_vec()));
            }
        }

        let dir = std::env::temp_dir();
        let path = dir.join(format!("dome-viewer-transfer-{}.png", std::process::id()));
        std::fs::write(&path, &png_payload(2, 2)[IMAGE_HEADER_LEN..]).unwrap();

        let state = TransferState::new();
        state.stage_paths(&[path.to_string_lossy().to_string()]);

        let channel = RecordingChannel(Mutex::new(Vec::new()));
        let sent = state.send_staged(&channel);
        std::fs::remove_file(&path).ok();

        assert_eq!(sent, 1);
        assert_eq!(state.last_package(), 0);

        let sends = channel.0.lock();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].0, 0);
        assert_eq!(sends[0].1[0], ImageKind::Png.header());

        // The local decode happened too.
        let mut uploader = MockUploader::default();
        state.upload_pending(&mut uploader);
        assert_eq!(state.texture_count(), 1);

        // Nothing new staged: a second send is a no-op.
        assert_eq!(state.send_staged(&channel), 0);
    }
}
