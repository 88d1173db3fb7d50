//! Scene composition
//!
//! Assembles the per-frame draw passes from the shared state: the dome
//! background (cross-blending while the selection changes), the fixed
//! capture planes, the runtime-added content planes, and the fulldome
//! capture pass. Everything goes through the [`Renderer`] trait; this is
//! the only place shader names and uniforms are decided.
//!
//! The composer also reports whether anything actually sampled the live
//! capture texture this frame, which drives the capture lifecycle policy.

use glam::{Mat4, Vec2};

use crate::cluster::state::ClusterState;
use crate::gfx::{Geometry, Renderer, TextureId, UniformValue};
use crate::scene::fade::{plane_opacity, DomeBlend};
use crate::scene::plane::{ContentPlaneLocal, CAPTURE_PLANE_COUNT};
use crate::scene::{dome_cut_window, plane_size, plane_transform, uv_window, UvWindow};

/// Consumers of the live capture texture observed during a draw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameDemand {
    pub live_capture: bool,
}

/// Textures available to the composer this frame.
pub struct SceneTextures<'a> {
    /// The live capture texture the worker uploads into.
    pub live_capture: TextureId,
    /// Transferred still images, indexed by the shared texture index.
    pub synced: &'a [TextureId],
    /// Per-capture-plane frozen snapshot textures.
    pub owned_snapshots: &'a [TextureId],
}

/// Per-node composition state that survives across frames.
pub struct SceneComposer {
    fulldome: ContentPlaneLocal,
    dome_blend: DomeBlend,
    capture_uv: UvWindow,
    capture_size: (i32, i32),
    plane_sizes: Vec<(f32, f32)>,
}

impl Default for SceneComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneComposer {
    pub fn new() -> Self {
        Self {
            fulldome: ContentPlaneLocal::hidden("fullDome"),
            // The first published image lands at index 0; starting the
            // tracker there keeps it from blending in from nothing.
            dome_blend: DomeBlend::new(0),
            capture_uv: UvWindow::IDENTITY,
            capture_size: (0, 0),
            plane_sizes: Vec::new(),
        }
    }

    /// Quad sizes for every plane, capture planes first. The embedding
    /// rebuilds its vertex buffers from these after a recreate.
    pub fn plane_sizes(&self) -> &[(f32, f32)] {
        &self.plane_sizes
    }

    /// Recompute derived geometry after the recreate flag was raised or
    /// the capture size was (re)negotiated.
    pub fn rebuild(&mut self, state: &ClusterState, capture_size: (i32, i32), synced_aspects: &[f32]) {
        self.capture_size = capture_size;

        let capture_ratio = if capture_size.1 > 0 {
            capture_size.0 as f32 / capture_size.1 as f32
        } else {
            1.0
        };

        self.capture_uv = if state.use_capture_size {
            UvWindow::IDENTITY
        } else {
            uv_window(state.screen_aspect, state.material_aspect)
        };

        let capture_planes = CAPTURE_PLANE_COUNT.min(state.planes_global.len());
        self.plane_sizes.clear();
        for (i, global) in state.planes_global.iter().enumerate() {
            if i < capture_planes {
                self.plane_sizes.push(plane_size(
                    global.height,
                    state.material_aspect,
                    state.use_capture_size,
                    capture_ratio,
                ));
            } else {
                // Content planes take the aspect of the image they show.
                let aspect = synced_aspects
                    .get(global.tex_id.max(0) as usize)
                    .copied()
                    .filter(|a| *a > 0.0)
                    .unwrap_or(1.0);
                self.plane_sizes.push((global.height * aspect, global.height));
            }
        }
    }

    /// Draw one frame. Mutates fade state in `state.planes_local` and in
    /// the dome/fulldome trackers, so every node advances identically from
    /// the shared timestamp.
    pub fn draw(
        &mut self,
        renderer: &mut dyn Renderer,
        state: &mut ClusterState,
        textures: &SceneTextures,
        mvp: Mat4,
    ) -> FrameDemand {
        let mut demand = FrameDemand::default();
        let now = state.time;
        let fading = state.fading_time;

        self.fulldome.currently_visible = state.render_dome;
        let fulldome_opacity = plane_opacity(&mut self.fulldome, now, fading);

        if state.dome_tex_index >= 0 && fulldome_opacity <= 0.0 {
            self.draw_dome_background(renderer, state, textures, mvp, now, fading);
        }

        let chroma = state.chroma_key;
        if chroma.enabled {
            renderer.bind_shader("chromakey");
            renderer.set_uniform("chromaKeyColor", UniformValue::Vec3(chroma.color));
            renderer.set_uniform("chromaKeyFactor", UniformValue::Float(chroma.factor));
        } else {
            renderer.bind_shader("flipxform");
            renderer.set_uniform("flipFrame", UniformValue::Int(0));
        }

        let capture_planes = CAPTURE_PLANE_COUNT.min(state.planes_local.len());

        renderer.set_uniform("scaleUV", UniformValue::Vec2(self.capture_uv.scale));
        renderer.set_uniform("offsetUV", UniformValue::Vec2(self.capture_uv.offset));

        for i in 0..capture_planes {
            let opacity = plane_opacity(&mut state.planes_local[i], now, fading);
            if opacity <= 0.0 {
                continue;
            }

            let local = &state.planes_local[i];
            let global = &state.planes_global[i];
            let tex = if local.freeze {
                textures
                    .owned_snapshots
                    .get(i)
                    .copied()
                    .unwrap_or(TextureId::NONE)
            } else if global.source_id > 0 {
                tex_at(textures.synced, global.tex_id)
            } else {
                demand.live_capture = true;
                textures.live_capture
            };

            renderer.bind_texture(0, tex);
            renderer.set_uniform("opacity", UniformValue::Float(opacity));
            renderer.set_uniform("MVP", UniformValue::Mat4(mvp * plane_transform(global)));
            renderer.draw(Geometry::CapturePlane(i));
        }

        let plane_count = state.planes_global.len().min(state.planes_local.len());
        for i in capture_planes..plane_count {
            let opacity = plane_opacity(&mut state.planes_local[i], now, fading);
            if opacity <= 0.0 {
                continue;
            }

            let global = &state.planes_global[i];
            let tex = if global.source_id > 0 {
                tex_at(textures.synced, global.tex_id)
            } else {
                demand.live_capture = true;
                textures.live_capture
            };

            renderer.bind_texture(0, tex);
            renderer.set_uniform("opacity", UniformValue::Float(opacity));
            renderer.set_uniform("scaleUV", UniformValue::Vec2(Vec2::ONE));
            renderer.set_uniform("offsetUV", UniformValue::Vec2(Vec2::ZERO));
            renderer.set_uniform("MVP", UniformValue::Mat4(mvp * plane_transform(global)));
            renderer.draw(Geometry::ContentPlane(i - capture_planes));
        }

        if fulldome_opacity > 0.0 {
            demand.live_capture = true;

            let uv = if self.capture_size.0 > 0 {
                dome_cut_window(
                    state.dome_cut,
                    self.capture_size.0 as f32,
                    self.capture_size.1 as f32,
                )
            } else {
                UvWindow::IDENTITY
            };

            renderer.bind_texture(0, textures.live_capture);
            renderer.set_uniform("opacity", UniformValue::Float(fulldome_opacity));
            renderer.set_uniform("scaleUV", UniformValue::Vec2(uv.scale));
            renderer.set_uniform("offsetUV", UniformValue::Vec2(uv.offset));
            renderer.set_uniform("MVP", UniformValue::Mat4(mvp));
            renderer.draw(Geometry::Dome);
        }

        renderer.unbind_shader();
        demand
    }

    fn draw_dome_background(
        &mut self,
        renderer: &mut dyn Renderer,
        state: &ClusterState,
        textures: &SceneTextures,
        mvp: Mat4,
        now: f64,
        fading: f32,
    ) {
        let current = state.dome_tex_index;
        let previous = self.dome_blend.previous_index;

        match self.dome_blend.mix(current, now, fading) {
            Some(mix) => {
                renderer.bind_shader("textureblend");
                renderer.bind_texture(0, tex_at(textures.synced, previous));
                renderer.bind_texture(1, tex_at(textures.synced, current));
                renderer.set_uniform("scaleUV", UniformValue::Vec2(Vec2::ONE));
                renderer.set_uniform("offsetUV", UniformValue::Vec2(Vec2::ZERO));
                renderer.set_uniform("MVP", UniformValue::Mat4(mvp));
                renderer.set_uniform("texMix", UniformValue::Float(mix));
            }
            None => {
                renderer.bind_shader("flipxform");
                renderer.bind_texture(0, tex_at(textures.synced, current));
                renderer.set_uniform("scaleUV", UniformValue::Vec2(Vec2::ONE));
                renderer.set_uniform("offsetUV", UniformValue::Vec2(Vec2::ZERO));
                renderer.set_uniform("flipFrame", UniformValue::Int(0));
                renderer.set_uniform("opacity", UniformValue::Float(1.0));
                renderer.set_uniform("MVP", UniformValue::Mat4(mvp));
            }
        }

        renderer.draw(Geometry::Dome);
        renderer.unbind_shader();
    }
}

fn tex_at(synced: &[TextureId], index: i32) -> TextureId {
    if index < 0 {
        return TextureId::NONE;
    }
    synced.get(index as usize).copied().unwrap_or(TextureId::NONE)
}
