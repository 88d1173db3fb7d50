//! Headless smoke driver
//!
//! Runs the viewer's frame protocol against stub capabilities: a synthetic
//! test-pattern capture source, a no-op renderer, and a single-node
//! cluster. Useful for exercising the capture/fade/transfer machinery on a
//! machine without projectors or capture hardware.

use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Mat4;

use dome_viewer::capture::{CaptureError, CaptureSource, FrameSink};
use dome_viewer::cluster::SoloNode;
use dome_viewer::gfx::{
    Geometry, GfxError, GpuUploader, PixelLayout, RenderContext, Renderer, TextureId, UniformValue,
};
use dome_viewer::transfer::TransferGfx;
use dome_viewer::{DomeViewerApp, ViewerSettings};

/// Synthetic capture source: a scrolling gradient, bottom-up like a real
/// device frame.
struct TestPatternSource {
    width: i32,
    height: i32,
    frame: u64,
}

impl TestPatternSource {
    fn new() -> Self {
        Self {
            width: 320,
            height: 180,
            frame: 0,
        }
    }
}

impl CaptureSource for TestPatternSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn poll(&mut self, sink: &mut dyn FrameSink) -> Result<(), CaptureError> {
        let stride = self.width as usize * 3;
        let mut rows = vec![0u8; stride * self.height as usize];
        for (y, row) in rows.chunks_exact_mut(stride).enumerate() {
            let shade = ((y as u64 + self.frame) % 256) as u8;
            for px in row.chunks_exact_mut(3) {
                px[0] = shade;
                px[1] = shade / 2;
                px[2] = 255 - shade;
            }
        }
        sink.frame(&rows, self.width, self.height);
        self.frame += 1;
        Ok(())
    }

    fn width(&self) -> i32 {
        self.width
    }

    fn height(&self) -> i32 {
        self.height
    }

    fn format_name(&self) -> &str {
        "testpattern"
    }

    fn pixel_layout(&self) -> PixelLayout {
        PixelLayout::Bgr8
    }
}

/// Hands out texture ids and discards pixels.
#[derive(Default)]
struct StubUploader {
    next_id: u64,
}

impl GpuUploader for StubUploader {
    fn alloc_texture(&mut self, width: i32, height: i32) -> Result<TextureId, GfxError> {
        if width * height <= 0 {
            return Err(GfxError::InvalidTextureSize { width, height });
        }
        self.next_id += 1;
        Ok(TextureId(self.next_id))
    }

    fn upload(&mut self, _tex: TextureId, _w: i32, _h: i32, _layout: PixelLayout, _pixels: &[u8]) {}

    fn upload_image(&mut self, width: i32, height: i32, _pixels: &[u8]) -> Result<TextureId, GfxError> {
        self.alloc_texture(width, height)
    }

    fn copy_texture(&mut self, _src: TextureId, _dst: TextureId, _w: i32, _h: i32) {}

    fn delete_texture(&mut self, _tex: TextureId) {}
}

#[derive(Default)]
struct StubContext;

impl RenderContext for StubContext {
    fn make_current(&mut self) {}
    fn detach(&mut self) {}
}

/// Counts draw calls instead of issuing them.
#[derive(Default)]
struct StubRenderer {
    draws: u64,
}

impl Renderer for StubRenderer {
    fn bind_shader(&mut self, _name: &str) {}
    fn set_uniform(&mut self, _name: &str, _value: UniformValue) {}
    fn bind_texture(&mut self, _unit: u32, _tex: TextureId) {}
    fn draw(&mut self, _geometry: Geometry) {
        self.draws += 1;
    }
    fn unbind_shader(&mut self) {}
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut settings = ViewerSettings::from_args(std::env::args().skip(1));
    if settings.capture.host.is_empty() {
        settings.capture.host = "localhost".to_string();
    }

    let channel = Arc::new(SoloNode::new(settings.capture.host.clone()));
    let mut uploader = StubUploader::default();

    let mut app = DomeViewerApp::new(
        &settings,
        channel,
        Box::new(TestPatternSource::new()),
        Box::new(StubContext),
        Box::new(StubUploader::default()),
        TransferGfx {
            context: Box::new(StubContext),
            uploader: Box::new(StubUploader::default()),
        },
        &mut uploader,
    )?;

    log::info!("running headless frame loop (3 s)");

    let mut renderer = StubRenderer::default();
    let started = Instant::now();
    let mut frame = 0u32;

    while started.elapsed() < Duration::from_secs(3) {
        let now = started.elapsed().as_secs_f64();

        // Exercise a fulldome fade halfway through the run.
        if frame == 60 {
            app.staged_mut().fulldome = true;
        } else if frame == 120 {
            app.staged_mut().fulldome = false;
        }

        app.pre_sync(now);
        let payload = app.encode();
        log::trace!("frame {frame}: {} byte snapshot", payload.len());

        app.post_sync(&mut uploader);
        app.draw(&mut renderer, Mat4::IDENTITY);

        frame += 1;
        std::thread::sleep(Duration::from_millis(16));
    }

    log::info!(
        "done: {frame} frames, {} draw calls, capture rate {:.1} Hz",
        renderer.draws,
        app.capture_rate()
    );

    app.shutdown();
    Ok(())
}
