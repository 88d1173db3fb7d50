//! Graphics capability traits
//!
//! The viewer renders through a host graphics framework; this module defines
//! the narrow surface it actually needs. Texture allocation and uploads are
//! behind [`GpuUploader`] so the capture and transfer paths can run on their
//! own threads with their own contexts, and draw submission is behind
//! [`Renderer`] so the compositor stays independent of the GL/wgpu backend.

use glam::{Mat4, Vec2, Vec3};
use thiserror::Error;

/// Opaque handle to a GPU texture owned by the host backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

impl TextureId {
    /// The "no texture" handle.
    pub const NONE: TextureId = TextureId(0);

    /// Whether this handle refers to an allocated texture.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// Pixel layout of a capture frame as negotiated with the device.
///
/// Packed 16-bit formats take a different upload entry point than the
/// default 3-byte packed color path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// 3 bytes per pixel, packed color (the common case).
    Bgr8,
    /// 2 bytes per pixel, packed luma/chroma.
    Packed16,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Bgr8 => 3,
            PixelLayout::Packed16 => 2,
        }
    }
}

/// Errors surfaced by the GPU capability implementations.
#[derive(Debug, Error)]
pub enum GfxError {
    #[error("invalid texture size ({width}x{height})")]
    InvalidTextureSize { width: i32, height: i32 },

    #[error("texture allocation failed: {0}")]
    AllocationFailed(String),

    #[error("framebuffer incomplete: {0}")]
    FramebufferIncomplete(String),
}

/// Texture allocation and pixel upload.
///
/// Implementations must be callable from whichever thread currently holds a
/// context created through [`RenderContext`].
pub trait GpuUploader: Send {
    /// Allocate an immutable-size texture. Fails for non-positive sizes.
    fn alloc_texture(&mut self, width: i32, height: i32) -> Result<TextureId, GfxError>;

    /// Upload one full frame of pixels into an existing texture.
    fn upload(&mut self, tex: TextureId, width: i32, height: i32, layout: PixelLayout, pixels: &[u8]);

    /// Upload a decoded RGBA image into a freshly allocated texture.
    fn upload_image(&mut self, width: i32, height: i32, pixels: &[u8]) -> Result<TextureId, GfxError>;

    /// Copy one texture into another of the same size (freeze snapshots).
    fn copy_texture(&mut self, src: TextureId, dst: TextureId, width: i32, height: i32);

    fn delete_texture(&mut self, tex: TextureId);
}

/// A private rendering context for a worker thread.
///
/// Contexts are not safe to share concurrently, so capture and transfer
/// threads each get their own and attach/detach it around their work.
pub trait RenderContext: Send {
    fn make_current(&mut self);
    fn detach(&mut self);
}

/// A uniform value passed to the bound shader.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Mat4(Mat4),
    Vec2(Vec2),
    Vec3(Vec3),
    Float(f32),
    Int(i32),
}

/// Geometry handles the composer can draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Geometry {
    /// The full-dome mesh.
    Dome,
    /// One of the fixed capture planes, by index.
    CapturePlane(usize),
    /// One of the runtime-added content planes, by index.
    ContentPlane(usize),
}

/// Draw submission surface consumed by the scene composer.
pub trait Renderer {
    fn bind_shader(&mut self, name: &str);
    fn set_uniform(&mut self, name: &str, value: UniformValue);
    fn bind_texture(&mut self, unit: u32, tex: TextureId);
    fn draw(&mut self, geometry: Geometry);
    fn unbind_shader(&mut self);
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::HashMap;

    /// Records uploads and hands out sequential texture ids.
    #[derive(Default)]
    pub struct MockUploader {
        next_id: u64,
        pub uploads: Vec<(TextureId, PixelLayout, Vec<u8>)>,
        pub copies: Vec<(TextureId, TextureId)>,
        pub deleted: Vec<TextureId>,
    }

    impl GpuUploader for MockUploader {
        fn alloc_texture(&mut self, width: i32, height: i32) -> Result<TextureId, GfxError> {
            if width * height <= 0 {
                return Err(GfxError::InvalidTextureSize { width, height });
            }
            self.next_id += 1;
            Ok(TextureId(self.next_id))
        }

        fn upload(&mut self, tex: TextureId, _w: i32, _h: i32, layout: PixelLayout, pixels: &[u8]) {
            self.uploads.push((tex, layout, pixels.to_vec()));
        }

        fn upload_image(&mut self, width: i32, height: i32, pixels: &[u8]) -> Result<TextureId, GfxError> {
            let tex = self.alloc_texture(width, height)?;
            self.uploads.push((tex, PixelLayout::Bgr8, pixels.to_vec()));
            Ok(tex)
        }

        fn copy_texture(&mut self, src: TextureId, dst: TextureId, _w: i32, _h: i32) {
            self.copies.push((src, dst));
        }

        fn delete_texture(&mut self, tex: TextureId) {
            self.deleted.push(tex);
        }
    }

    /// Counts attach/detach pairs.
    #[derive(Default)]
    pub struct MockContext {
        pub current: u32,
        pub detached: u32,
    }

    impl RenderContext for MockContext {
        fn make_current(&mut self) {
            self.current += 1;
        }

        fn detach(&mut self) {
            self.detached += 1;
        }
    }

    /// Records every draw call for composer assertions.
    #[derive(Default)]
    pub struct RecordingRenderer {
        pub bound_shader: Option<String>,
        pub calls: Vec<String>,
        pub uniforms: HashMap<String, UniformValue>,
    }

    impl Renderer for RecordingRenderer {
        fn bind_shader(&mut self, name: &str) {
            self.bound_shader = Some(name.to_string());
            self.calls.push(format!("bind:{name}"));
        }

        fn set_uniform(&mut self, name: &str, value: UniformValue) {
            self.uniforms.insert(name.to_string(), value);
            self.calls.push(format!("uniform:{name}"));
        }

        fn bind_texture(&mut self, unit: u32, tex: TextureId) {
            self.calls.push(format!("tex:{unit}:{}", tex.0));
        }

        fn draw(&mut self, geometry: Geometry) {
            self.calls.push(format!("draw:{geometry:?}"));
        }

        fn unbind_shader(&mut self) {
            self.bound_shader = None;
            self.calls.push("unbind".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_id_none() {
        assert!(!TextureId::NONE.is_valid());
        assert!(TextureId(3).is_valid());
    }

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(PixelLayout::Bgr8.bytes_per_pixel(), 3);
        assert_eq!(PixelLayout::Packed16.bytes_per_pixel(), 2);
    }
}
