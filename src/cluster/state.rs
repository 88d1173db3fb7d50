//! Shared cluster state and its wire codec
//!
//! Once per synchronized frame the master encodes every shared field in a
//! fixed, order-significant sequence and broadcasts the payload; every node
//! decodes in the identical sequence. There are no field tags: encode and
//! decode enumerate fields in lockstep, and reordering either side breaks
//! the running cluster. The transport delivers whole framed buffers or
//! nothing, so truncation errors exist only as a debugging aid.
//!
//! Presets reuse the exact same payload: the on-disk format is the wire
//! format, byte for byte.

use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};
use glam::Vec3;
use thiserror::Error;

use crate::scene::plane::{default_capture_planes, ContentPlaneGlobal, ContentPlaneLocal};
use crate::scene::{AspectRatio, DomeCut};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("payload truncated: needed {needed} more bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("invalid utf-8 in string field")]
    InvalidString,

    #[error("unknown aspect ratio code {0}")]
    UnknownAspect(i32),

    #[error("unknown dome cut code {0}")]
    UnknownDomeCut(i32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Chroma keying parameters (color + distance factor model).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChromaKey {
    pub enabled: bool,
    pub color: Vec3,
    pub factor: f32,
}

impl Default for ChromaKey {
    fn default() -> Self {
        Self {
            enabled: false,
            color: Vec3::new(0.0, 0.75, 0.25),
            factor: 22.0,
        }
    }
}

/// Pending edits to the currently selected plane, applied by the master
/// during encode.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneEdit {
    pub index: usize,
    pub height: f32,
    pub azimuth: f32,
    pub elevation: f32,
    pub roll: f32,
    pub distance: f32,
    pub visible: bool,
    pub source_id: i32,
    pub tex_id: i32,
}

/// UI-staged values on the master, folded into the shared state once per
/// frame so every node sees one consistent snapshot. Mismatches on
/// geometry-affecting fields raise the recreate flag, telling every node to
/// rebuild derived plane geometry instead of only updating transforms.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedSettings {
    /// Selected dome image; negative leaves the shared index untouched.
    pub dome_tex_index: i32,
    pub fulldome: bool,
    pub fading_time: f32,
    pub screen_aspect: AspectRatio,
    pub material_aspect: AspectRatio,
    pub presentation_mode: bool,
    pub use_capture_size: bool,
    pub plane_edit: Option<PlaneEdit>,
    pub chroma_key: ChromaKey,
    /// Consumed by the embedding, not carried on the wire.
    pub take_screenshot: bool,
}

impl Default for StagedSettings {
    fn default() -> Self {
        Self {
            dome_tex_index: -1,
            fulldome: false,
            fading_time: 2.0,
            screen_aspect: AspectRatio::W16H10,
            material_aspect: AspectRatio::W16H9,
            presentation_mode: false,
            use_capture_size: false,
            plane_edit: None,
            chroma_key: ChromaKey::default(),
            take_screenshot: false,
        }
    }
}

/// Every value shared across the cluster.
///
/// The master is the sole writer of authoritative values each frame; other
/// nodes treat decoded values as read-only until the next frame. The local
/// plane vector is exempt while presentation mode is on, when the capture
/// host mutates it from decoded command sheets.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterState {
    pub time: f64,
    pub show_info: bool,
    pub show_stats: bool,
    /// Index into the synced still textures; -1 before any image arrived.
    pub dome_tex_index: i32,
    pub render_dome: bool,
    pub dome_cut: DomeCut,
    pub fading_time: f32,
    pub screen_aspect: AspectRatio,
    pub material_aspect: AspectRatio,
    pub presentation_mode: bool,
    pub use_capture_size: bool,
    pub planes_global: Vec<ContentPlaneGlobal>,
    pub planes_local: Vec<ContentPlaneLocal>,
    pub recreate_planes: bool,
    pub chroma_key: ChromaKey,
}

impl Default for ClusterState {
    fn default() -> Self {
        let (planes_global, planes_local) = default_capture_planes();
        Self {
            time: 0.0,
            show_info: false,
            show_stats: false,
            dome_tex_index: -1,
            render_dome: false,
            dome_cut: DomeCut::MiddleSquare,
            fading_time: 2.0,
            screen_aspect: AspectRatio::W16H10,
            material_aspect: AspectRatio::W16H9,
            presentation_mode: false,
            use_capture_size: false,
            planes_global,
            planes_local,
            recreate_planes: false,
            chroma_key: ChromaKey::default(),
        }
    }
}

impl ClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Master-side per-frame encode: fold the staged UI values in (raising
    /// the recreate flag on geometry-affecting changes), then serialize.
    pub fn encode(&mut self, staged: &StagedSettings, buf: &mut BytesMut) {
        if staged.dome_tex_index >= 0 {
            self.dome_tex_index = staged.dome_tex_index;
        }
        self.render_dome = staged.fulldome;
        self.fading_time = staged.fading_time;

        if self.screen_aspect != staged.screen_aspect {
            self.recreate_planes = true;
        }
        self.screen_aspect = staged.screen_aspect;
        if self.material_aspect != staged.material_aspect {
            self.recreate_planes = true;
        }
        self.material_aspect = staged.material_aspect;
        self.presentation_mode = staged.presentation_mode;
        if self.use_capture_size != staged.use_capture_size {
            self.recreate_planes = true;
        }
        self.use_capture_size = staged.use_capture_size;

        if let Some(edit) = &staged.plane_edit {
            if edit.index < self.planes_global.len() && edit.index < self.planes_local.len() {
                let global = &mut self.planes_global[edit.index];
                if global.height != edit.height || global.source_id != edit.source_id {
                    self.recreate_planes = true;
                }
                global.height = edit.height;
                global.azimuth = edit.azimuth;
                global.elevation = edit.elevation;
                global.roll = edit.roll;
                global.distance = edit.distance;
                global.source_id = edit.source_id;
                global.tex_id = edit.tex_id;
                self.planes_local[edit.index].currently_visible = edit.visible;
            }
        }

        self.chroma_key = staged.chroma_key;

        self.write_to(buf);
    }

    /// Serialize the snapshot as-is. Field order is the wire contract.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_f64_le(self.time);
        put_bool(buf, self.show_info);
        put_bool(buf, self.show_stats);
        buf.put_i32_le(self.dome_tex_index);
        put_bool(buf, self.render_dome);
        buf.put_i32_le(self.dome_cut.code());
        buf.put_f32_le(self.fading_time);
        buf.put_i32_le(self.screen_aspect.code());
        buf.put_i32_le(self.material_aspect.code());
        put_bool(buf, self.presentation_mode);
        put_bool(buf, self.use_capture_size);

        buf.put_u32_le(self.planes_global.len() as u32);
        for plane in &self.planes_global {
            put_plane_global(buf, plane);
        }

        // While presentation mode is on, each node keeps its own local
        // plane state; the master only broadcasts it otherwise.
        if !self.presentation_mode {
            buf.put_u32_le(self.planes_local.len() as u32);
            for plane in &self.planes_local {
                put_plane_local(buf, plane);
            }
        }

        put_bool(buf, self.recreate_planes);

        put_bool(buf, self.chroma_key.enabled);
        buf.put_f32_le(self.chroma_key.color.x);
        buf.put_f32_le(self.chroma_key.color.y);
        buf.put_f32_le(self.chroma_key.color.z);
        buf.put_f32_le(self.chroma_key.factor);
    }

    /// Deserialize in exactly the order `write_to` wrote.
    pub fn read_from<B: Buf>(&mut self, buf: &mut B) -> Result<(), WireError> {
        self.time = get_f64(buf)?;
        self.show_info = get_bool(buf)?;
        self.show_stats = get_bool(buf)?;
        self.dome_tex_index = get_i32(buf)?;
        self.render_dome = get_bool(buf)?;
        let cut = get_i32(buf)?;
        self.dome_cut = DomeCut::from_code(cut).ok_or(WireError::UnknownDomeCut(cut))?;
        self.fading_time = get_f32(buf)?;
        self.screen_aspect = get_aspect(buf)?;
        self.material_aspect = get_aspect(buf)?;
        self.presentation_mode = get_bool(buf)?;
        self.use_capture_size = get_bool(buf)?;

        let count = get_u32(buf)? as usize;
        let mut globals = Vec::with_capacity(count);
        for _ in 0..count {
            globals.push(get_plane_global(buf)?);
        }
        self.planes_global = globals;

        if !self.presentation_mode {
            let count = get_u32(buf)? as usize;
            let mut locals = Vec::with_capacity(count);
            for _ in 0..count {
                locals.push(get_plane_local(buf)?);
            }
            self.planes_local = locals;
        }

        self.recreate_planes = get_bool(buf)?;

        self.chroma_key.enabled = get_bool(buf)?;
        self.chroma_key.color = Vec3::new(get_f32(buf)?, get_f32(buf)?, get_f32(buf)?);
        self.chroma_key.factor = get_f32(buf)?;

        Ok(())
    }

    /// Write the current snapshot to a preset file (identical bytes to the
    /// wire payload).
    pub fn save_preset(&self, path: &Path) -> Result<(), WireError> {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        std::fs::write(path, &buf)?;
        log::info!("saved preset {} ({} bytes)", path.display(), buf.len());
        Ok(())
    }

    /// Replace the snapshot from a preset file.
    pub fn load_preset(&mut self, path: &Path) -> Result<(), WireError> {
        let data = std::fs::read(path)?;
        self.read_from(&mut data.as_slice())?;
        log::info!("loaded preset {}", path.display());
        Ok(())
    }
}

const FADE_SENTINEL: f64 = -1.0;

fn put_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u8(value as u8);
}

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u32_le(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

fn put_plane_global(buf: &mut BytesMut, plane: &ContentPlaneGlobal) {
    put_string(buf, &plane.name);
    buf.put_f32_le(plane.height);
    buf.put_f32_le(plane.azimuth);
    buf.put_f32_le(plane.elevation);
    buf.put_f32_le(plane.roll);
    buf.put_f32_le(plane.distance);
    buf.put_i32_le(plane.source_id);
    buf.put_i32_le(plane.tex_id);
}

fn put_plane_local(buf: &mut BytesMut, plane: &ContentPlaneLocal) {
    put_string(buf, &plane.name);
    put_bool(buf, plane.currently_visible);
    put_bool(buf, plane.previously_visible);
    buf.put_f64_le(plane.fade_start.unwrap_or(FADE_SENTINEL));
    put_bool(buf, plane.freeze);
}

fn need<B: Buf>(buf: &B, needed: usize) -> Result<(), WireError> {
    if buf.remaining() < needed {
        return Err(WireError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

fn get_bool<B: Buf>(buf: &mut B) -> Result<bool, WireError> {
    need(buf, 1)?;
    Ok(buf.get_u8() != 0)
}

fn get_i32<B: Buf>(buf: &mut B) -> Result<i32, WireError> {
    need(buf, 4)?;
    Ok(buf.get_i32_le())
}

fn get_u32<B: Buf>(buf: &mut B) -> Result<u32, WireError> {
    need(buf, 4)?;
    Ok(buf.get_u32_le())
}

fn get_f32<B: Buf>(buf: &mut B) -> Result<f32, WireError> {
    need(buf, 4)?;
    Ok(buf.get_f32_le())
}

fn get_f64<B: Buf>(buf: &mut B) -> Result<f64, WireError> {
    need(buf, 8)?;
    Ok(buf.get_f64_le())
}

fn get_aspect<B: Buf>(buf: &mut B) -> Result<AspectRatio, WireError> {
    let code = get_i32(buf)?;
    AspectRatio::from_code(code).ok_or(WireError::UnknownAspect(code))
}

fn get_string<B: Buf>(buf: &mut B) -> Result<String, WireError> {
    let len = get_u32(buf)? as usize;
    need(buf, len)?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| WireError::InvalidString)
}

fn get_plane_global<B: Buf>(buf: &mut B) -> Result<ContentPlaneGlobal, WireError> {
    Ok(ContentPlaneGlobal {
        name: get_string(buf)?,
        height: get_f32(buf)?,
        azimuth: get_f32(buf)?,
        elevation: get_f32(buf)?,
        roll: get_f32(buf)?,
        distance: get_f32(buf)?,
        source_id: get_i32(buf)?,
        tex_id: get_i32(buf)?,
    })
}

fn get_plane_local<B: Buf>(buf: &mut B) -> Result<ContentPlaneLocal, WireError> {
    let name = get_string(buf)?;
    let currently_visible = get_bool(buf)?;
    let previously_visible = get_bool(buf)?;
    let raw_start = get_f64(buf)?;
    let freeze = get_bool(buf)?;
    Ok(ContentPlaneLocal {
        name,
        currently_visible,
        previously_visible,
        fade_start: if raw_start < 0.0 { None } else { Some(raw_start) },
        freeze,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(state: &ClusterState) -> ClusterState {
        let mut buf = BytesMut::new();
        state.write_to(&mut buf);
        let mut decoded = ClusterState::new();
        decoded.read_from(&mut buf.freeze()).unwrap();
        decoded
    }

    #[test]
    fn test_round_trip_default() {
        let state = ClusterState::new();
        assert_eq!(round_trip(&state), state);
    }

    #[test]
    fn test_round_trip_empty_planes() {
        let mut state = ClusterState::new();
        state.planes_global.clear();
        state.planes_local.clear();
        assert_eq!(round_trip(&state), state);
    }

    #[test]
    fn test_round_trip_single_plane() {
        let mut state = ClusterState::new();
        state.planes_global.truncate(1);
        state.planes_local.truncate(1);
        state.planes_global[0].azimuth = -75.135;
        state.planes_local[0].fade_start = Some(123.456789);
        assert_eq!(round_trip(&state), state);
    }

    #[test]
    fn test_round_trip_mixed_flags_and_chroma() {
        let mut state = ClusterState::new();
        state.time = 9876.54321;
        state.dome_tex_index = 3;
        state.render_dome = true;
        state.dome_cut = DomeCut::Full;
        state.fading_time = 0.625;
        state.screen_aspect = AspectRatio::W5H4;
        state.material_aspect = AspectRatio::W4H3;
        state.recreate_planes = true;

        state.planes_local[0].freeze = true;
        state.planes_local[1].currently_visible = true;
        state.planes_local[1].previously_visible = false;
        state.planes_local[2].fade_start = Some(10.0);

        state.chroma_key = ChromaKey {
            enabled: true,
            color: Vec3::new(0.123456789, 0.5, 0.987654321),
            factor: 37.25,
        };

        let decoded = round_trip(&state);
        assert_eq!(decoded, state);
        // Floats survive bit-for-bit.
        assert_eq!(decoded.chroma_key.color.x.to_bits(), state.chroma_key.color.x.to_bits());
        assert_eq!(decoded.time.to_bits(), state.time.to_bits());
    }

    #[test]
    fn test_presentation_mode_gates_local_planes() {
        let mut state = ClusterState::new();
        state.presentation_mode = true;
        state.planes_local[0].freeze = true;

        let mut buf = BytesMut::new();
        state.write_to(&mut buf);

        // The receiving node keeps its own local plane state.
        let mut decoded = ClusterState::new();
        decoded.planes_local[2].currently_visible = true;
        let own_locals = decoded.planes_local.clone();
        decoded.read_from(&mut buf.freeze()).unwrap();

        assert!(decoded.presentation_mode);
        assert_eq!(decoded.planes_local, own_locals);
    }

    #[test]
    fn test_encode_sets_recreate_on_aspect_change() {
        let mut state = ClusterState::new();
        let staged = StagedSettings {
            material_aspect: AspectRatio::W4H3,
            ..Default::default()
        };

        let mut buf = BytesMut::new();
        state.encode(&staged, &mut buf);
        assert!(state.recreate_planes);

        let mut decoded = ClusterState::new();
        decoded.read_from(&mut buf.freeze()).unwrap();
        assert!(decoded.recreate_planes);
        assert_eq!(decoded.material_aspect, AspectRatio::W4H3);
    }

    #[test]
    fn test_encode_applies_plane_edit() {
        let mut state = ClusterState::new();
        let staged = StagedSettings {
            plane_edit: Some(PlaneEdit {
                index: 1,
                height: 2.5,
                azimuth: 10.0,
                elevation: 20.0,
                roll: 0.0,
                distance: -6.0,
                visible: true,
                source_id: 0,
                tex_id: 0,
            }),
            ..Default::default()
        };

        let mut buf = BytesMut::new();
        state.encode(&staged, &mut buf);

        assert!(state.recreate_planes, "height change rebuilds geometry");
        assert_eq!(state.planes_global[1].height, 2.5);
        assert!(state.planes_local[1].currently_visible);
    }

    #[test]
    fn test_truncated_payload() {
        let state = ClusterState::new();
        let mut buf = BytesMut::new();
        state.write_to(&mut buf);

        let short = &buf[..buf.len() - 3];
        let mut decoded = ClusterState::new();
        assert!(matches!(
            decoded.read_from(&mut &short[..]),
            Err(WireError::Truncated { .. })
        ));
    }

    #[test]
    fn test_preset_file_round_trip() {
        let mut state = ClusterState::new();
        state.dome_tex_index = 2;
        state.planes_local[0].fade_start = Some(42.0);

        let path = std::env::temp_dir().join(format!("dome-viewer-preset-{}", std::process::id()));
        state.save_preset(&path).unwrap();

        let mut loaded = ClusterState::new();
        loaded.load_preset(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, state);
    }
}
