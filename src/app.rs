//! Application wiring
//!
//! `DomeViewerApp` owns the single authoritative snapshot of shared state
//! and drives the synchronized-frame protocol the host framework calls
//! into: `pre_sync` on the master, encode/broadcast, decode on every other
//! node, `post_sync`, then `draw`. Capture, transfer, and scene commands
//! all hang off this type.

use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::BytesMut;
use crossbeam_channel::Sender;
use glam::Mat4;
use parking_lot::Mutex;

use crate::capture::lifecycle::CaptureLifecycle;
use crate::capture::worker::{CaptureWorker, FrameInspector};
use crate::capture::CaptureSource;
use crate::cluster::state::{ClusterState, StagedSettings, WireError};
use crate::cluster::ClusterChannel;
use crate::gfx::{GpuUploader, Renderer, RenderContext, TextureId};
use crate::scene::composer::{SceneComposer, SceneTextures};
use crate::scene::control::{apply_command, CommandQueue};
use crate::scene::plane::{new_content_plane, CAPTURE_PLANE_COUNT};
use crate::settings::ViewerSettings;
use crate::transfer::{run_loader, LoaderRequest, TransferGfx, TransferState};

pub struct DomeViewerApp {
    state: ClusterState,
    staged: StagedSettings,
    composer: SceneComposer,

    channel: Arc<dyn ClusterChannel>,
    lifecycle: Arc<CaptureLifecycle>,
    transfer: Arc<TransferState>,
    transfer_gfx: Arc<Mutex<TransferGfx>>,
    loader_tx: Option<Sender<LoaderRequest>>,
    loader_handle: Option<JoinHandle<()>>,
    commands: Arc<Mutex<CommandQueue>>,

    live_capture: TextureId,
    owned_snapshots: Vec<TextureId>,
    capture_size: (i32, i32),
    synced_texture_count: usize,

    default_fisheyes: Vec<String>,
    default_fisheye_delay: f64,
    next_fisheye_time: f64,
}

impl DomeViewerApp {
    /// Bring the viewer up at context-creation time: open the capture
    /// source, allocate the live and snapshot textures, start capture, and
    /// (on the master) start the transfer loader thread.
    ///
    /// A capture open failure is fatal only on the node that owns the
    /// device; everywhere else it is logged and capture stays idle.
    pub fn new(
        settings: &ViewerSettings,
        channel: Arc<dyn ClusterChannel>,
        source: Box<dyn CaptureSource>,
        capture_context: Box<dyn RenderContext>,
        capture_uploader: Box<dyn GpuUploader>,
        transfer_gfx: TransferGfx,
        uploader: &mut dyn GpuUploader,
    ) -> anyhow::Result<Self> {
        let mut worker = CaptureWorker::new(
            settings.capture.clone(),
            source,
            capture_context,
            capture_uploader,
        );

        let is_capture_host = channel.this_node_address() == settings.capture.host;
        let mut capture_size = (0, 0);
        let capture_ready = match worker.open_source() {
            Ok(size) => {
                capture_size = size;
                true
            }
            Err(e) if is_capture_host => {
                return Err(anyhow::anyhow!("capture device open failed: {e}"));
            }
            Err(e) => {
                log::warn!("capture unavailable on this node: {e}");
                false
            }
        };

        let mut live_capture = TextureId::NONE;
        let mut owned_snapshots = Vec::new();
        if capture_ready {
            match uploader.alloc_texture(capture_size.0, capture_size.1) {
                Ok(tex) => live_capture = tex,
                Err(e) => log::error!("live capture texture allocation failed: {e}"),
            }
            for _ in 0..CAPTURE_PLANE_COUNT {
                match uploader.alloc_texture(capture_size.0, capture_size.1) {
                    Ok(tex) => owned_snapshots.push(tex),
                    Err(e) => {
                        log::error!("snapshot texture allocation failed: {e}");
                        owned_snapshots.push(TextureId::NONE);
                    }
                }
            }
        }
        worker.set_target(live_capture);

        let lifecycle = Arc::new(CaptureLifecycle::new(worker, channel.this_node_address()));
        let transfer = Arc::new(TransferState::new());
        let transfer_gfx = Arc::new(Mutex::new(transfer_gfx));

        let (loader_tx, loader_handle) = if channel.is_master() {
            let (tx, rx) = crossbeam_channel::unbounded();
            let handle = std::thread::Builder::new()
                .name("transfer-loader".to_string())
                .spawn({
                    let transfer = Arc::clone(&transfer);
                    let channel = Arc::clone(&channel);
                    let lifecycle = Arc::clone(&lifecycle);
                    let transfer_gfx = Arc::clone(&transfer_gfx);
                    move || run_loader(transfer, rx, channel, lifecycle, transfer_gfx)
                })?;
            (Some(tx), Some(handle))
        } else {
            (None, None)
        };

        let state = ClusterState::new();
        let mut composer = SceneComposer::new();
        composer.rebuild(&state, capture_size, &[]);

        let mut app = Self {
            state,
            staged: StagedSettings::default(),
            composer,
            channel,
            lifecycle,
            transfer,
            transfer_gfx,
            loader_tx,
            loader_handle,
            commands: Arc::new(Mutex::new(CommandQueue::new())),
            live_capture,
            owned_snapshots,
            capture_size,
            synced_texture_count: 0,
            default_fisheyes: settings.default_fisheyes.clone(),
            default_fisheye_delay: settings.default_fisheye_delay,
            next_fisheye_time: 0.0,
        };

        if capture_ready {
            app.lifecycle.update(true);
        }

        Ok(app)
    }

    pub fn state(&self) -> &ClusterState {
        &self.state
    }

    /// UI-staged values the master folds in on the next encode.
    pub fn staged_mut(&mut self) -> &mut StagedSettings {
        &mut self.staged
    }

    pub fn lifecycle(&self) -> &CaptureLifecycle {
        self.lifecycle.as_ref()
    }

    /// Number of still textures every node has finished uploading.
    pub fn synced_texture_count(&self) -> usize {
        self.synced_texture_count
    }

    pub fn capture_rate(&self) -> f64 {
        self.lifecycle.worker().lock().capture_rate()
    }

    /// Enqueue one decoded scene operation string (from the QR path).
    pub fn queue_operation(&self, raw: &str) {
        self.commands.lock().push_unique(raw);
    }

    /// Install the per-frame inspector on the capture worker (runs on the
    /// polling thread; return false to keep a frame off the dome).
    pub fn install_frame_inspector(&self, inspector: FrameInspector) {
        self.lifecycle.worker().lock().set_inspector(inspector);
    }

    /// Master: stage dropped image files and kick the loader thread.
    pub fn drop_paths(&mut self, paths: &[String]) {
        if !self.channel.is_master() {
            return;
        }
        if self.transfer.stage_paths(paths) > 0 {
            self.request_transfer();
        }
    }

    fn request_transfer(&self) {
        if let Some(tx) = &self.loader_tx {
            let _ = tx.send(LoaderRequest::Transfer);
        }
    }

    /// Master, before the state broadcast: stamp the shared clock, run the
    /// default-fisheye schedule, and publish finished uploads.
    pub fn pre_sync(&mut self, now: f64) {
        if !self.channel.is_master() {
            return;
        }

        self.state.time = now;

        if !self.default_fisheyes.is_empty() {
            if self.next_fisheye_time == 0.0 {
                self.next_fisheye_time = now + self.default_fisheye_delay;
            } else if now > self.next_fisheye_time {
                let next = self.default_fisheyes.remove(0);
                if self.transfer.stage_paths(&[next]) > 0 {
                    self.request_transfer();
                }
                self.next_fisheye_time = 0.0;
            }
        }

        if let Some((total, added)) = self.transfer.take_completed() {
            self.synced_texture_count = total;
            // Point the dome at the first image of the new batch, but only
            // if no image was ever selected.
            if self.state.dome_tex_index < 0 && added > 0 {
                let index = total as i32 - added;
                self.state.dome_tex_index = index;
                self.staged.dome_tex_index = index;
            }
        }
    }

    /// Master: serialize the shared snapshot for this synchronized frame.
    pub fn encode(&mut self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.state.encode(&self.staged, &mut buf);
        buf
    }

    /// Clients: adopt the master's snapshot.
    pub fn decode(&mut self, payload: &[u8]) -> Result<(), WireError> {
        self.state.read_from(&mut &payload[..])
    }

    /// After the snapshot settled on every node: apply queued scene
    /// commands and rebuild derived geometry if flagged.
    pub fn post_sync(&mut self, uploader: &mut dyn GpuUploader) {
        let commands = self.commands.lock().drain();
        if !commands.is_empty() {
            let (width, height) = self.capture_size;
            let live = self.live_capture;
            let snapshots = &self.owned_snapshots;
            for command in &commands {
                apply_command(
                    command,
                    &mut self.state.planes_global,
                    &mut self.state.planes_local,
                    CAPTURE_PLANE_COUNT,
                    &mut |i| {
                        if let Some(&dst) = snapshots.get(i) {
                            if live.is_valid() && dst.is_valid() {
                                uploader.copy_texture(live, dst, width, height);
                            }
                        }
                    },
                );
            }
        }

        if self.state.recreate_planes {
            self.rebuild_planes();
            self.state.recreate_planes = false;
        }
    }

    fn rebuild_planes(&mut self) {
        let aspects: Vec<f32> = self
            .transfer
            .textures()
            .iter()
            .map(|t| t.aspect)
            .collect();
        self.composer.rebuild(&self.state, self.capture_size, &aspects);
    }

    /// Render one frame and re-evaluate the capture policy from what the
    /// frame actually consumed.
    pub fn draw(&mut self, renderer: &mut dyn Renderer, mvp: Mat4) {
        let synced: Vec<TextureId> = self.transfer.textures().iter().map(|t| t.tex).collect();
        let textures = SceneTextures {
            live_capture: self.live_capture,
            synced: &synced,
            owned_snapshots: &self.owned_snapshots,
        };

        let demand = self
            .composer
            .draw(renderer, &mut self.state, &textures, mvp);

        self.lifecycle.update(demand.live_capture);
    }

    /// Append a fresh content plane (master UI).
    pub fn add_content_plane(&mut self) {
        let index = self.state.planes_global.len() + 1 - CAPTURE_PLANE_COUNT;
        let (global, local) = new_content_plane(index);
        self.state.planes_global.push(global);
        self.state.planes_local.push(local);
        self.state.recreate_planes = true;
    }

    /// Transport callback: a transferred image arrived on this node.
    pub fn on_data_received(&self, payload: &[u8], package: i32) {
        log::info!("decoding {} bytes in transfer id {package}", payload.len());
        self.transfer.note_received(package);

        self.lifecycle.suspended(|| {
            if let Err(e) = self.transfer.read_image(payload) {
                log::warn!("dropping transferred image {package}: {e}");
            }
            let mut gfx = self.transfer_gfx.lock();
            let gfx = &mut *gfx;
            gfx.context.make_current();
            self.transfer.upload_pending(&mut *gfx.uploader);
            gfx.context.detach();
        });
    }

    /// Transport callback: one client acknowledged a transfer.
    pub fn on_transfer_ack(&self, package: i32, node: usize) {
        log::info!("transfer id {package} completed on node {node}");
        self.transfer.on_ack(package, self.channel.node_count());
    }

    pub fn save_preset(&self, path: &std::path::Path) -> Result<(), WireError> {
        self.state.save_preset(path)
    }

    /// Master: replace the snapshot from a preset file; it reaches the
    /// clients through the next broadcast.
    pub fn load_preset(&mut self, path: &std::path::Path) -> Result<(), WireError> {
        self.state.load_preset(path)?;
        self.state.recreate_planes = true;
        Ok(())
    }

    /// Stop capture and join the loader thread. Called once at exit.
    pub fn shutdown(&mut self) {
        self.lifecycle.worker().lock().stop();
        if let Some(tx) = self.loader_tx.take() {
            let _ = tx.send(LoaderRequest::Shutdown);
        }
        if let Some(handle) = self.loader_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DomeViewerApp {
    fn drop(&mut self) {
        self.shutdown();
    }
}
