//! Scene model
//!
//! Content planes placed on the inside of a dome, the aspect-ratio model
//! that sizes them, and the UV windows that crop capture frames to the
//! material aspect. The fade engine and the per-frame composer live in
//! submodules.

pub mod composer;
pub mod control;
pub mod fade;
pub mod plane;

use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::scene::plane::ContentPlaneGlobal;

/// Screen/material aspect ratios, carried on the wire as the legacy
/// integer codes (1610, 169, 54, 43).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    W16H10,
    W16H9,
    W5H4,
    W4H3,
}

impl AspectRatio {
    pub fn code(self) -> i32 {
        match self {
            AspectRatio::W16H10 => 1610,
            AspectRatio::W16H9 => 169,
            AspectRatio::W5H4 => 54,
            AspectRatio::W4H3 => 43,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1610 => Some(AspectRatio::W16H10),
            169 => Some(AspectRatio::W16H9),
            54 => Some(AspectRatio::W5H4),
            43 => Some(AspectRatio::W4H3),
            _ => None,
        }
    }

    pub fn width_over_height(self) -> f32 {
        match self {
            AspectRatio::W16H10 => 16.0 / 10.0,
            AspectRatio::W16H9 => 16.0 / 9.0,
            AspectRatio::W5H4 => 5.0 / 4.0,
            AspectRatio::W4H3 => 4.0 / 3.0,
        }
    }
}

/// How much of a widescreen capture the fulldome view shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomeCut {
    /// The whole frame.
    Full,
    /// Only the middle square of a widescreen input.
    MiddleSquare,
}

impl DomeCut {
    pub fn code(self) -> i32 {
        match self {
            DomeCut::Full => 1,
            DomeCut::MiddleSquare => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(DomeCut::Full),
            2 => Some(DomeCut::MiddleSquare),
            _ => None,
        }
    }
}

/// UV crop applied when sampling a texture onto a plane or the dome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvWindow {
    pub scale: Vec2,
    pub offset: Vec2,
}

impl UvWindow {
    pub const IDENTITY: UvWindow = UvWindow {
        scale: Vec2::ONE,
        offset: Vec2::ZERO,
    };
}

/// Quad size for a plane of the given height.
///
/// With `use_capture_size` the negotiated capture ratio wins; otherwise the
/// material aspect does.
pub fn plane_size(
    height: f32,
    material: AspectRatio,
    use_capture_size: bool,
    capture_ratio: f32,
) -> (f32, f32) {
    if use_capture_size {
        (height * capture_ratio, height)
    } else {
        (height * material.width_over_height(), height)
    }
}

/// UV window cropping a capture of `screen` aspect down to `material` aspect.
///
/// The constants reproduce the shipped calibration tables, including the
/// one-percent horizontal inset on same-width cases.
pub fn uv_window(screen: AspectRatio, material: AspectRatio) -> UvWindow {
    use AspectRatio::*;

    let (scale, offset) = match (screen, material) {
        (W16H10, W16H9) => ((1.0, 0.90), (0.01, 0.05)),
        (W16H10, W5H4) => ((10.0 / 12.0, 1.0), (1.0 / 12.0, 0.0)),
        (W16H10, W4H3) => ((50.0 / 64.0, 1.0), (7.0 / 64.0, 0.0)),
        (W16H10, W16H10) => ((1.0, 1.0), (0.01, 0.0)),

        (W16H9, W16H10) => ((0.90, 1.0), (0.05, 0.0)),
        (W16H9, W5H4) => ((1.0, 270.0 / 384.0), (0.01, 57.0 / 384.0)),
        (W16H9, W4H3) => ((1.0, 0.75), (0.01, 0.125)),
        (W16H9, W16H9) => ((1.0, 1.0), (0.01, 0.0)),

        (W5H4, W16H10) => ((10.0 / 12.0, 1.0), (1.0 / 12.0, 0.0)),
        (W5H4, W16H9) => ((270.0 / 384.0, 1.0), (57.0 / 384.0, 0.0)),
        (W5H4, W4H3) => ((1.0, 0.9375), (0.01, 0.03125)),
        (W5H4, W5H4) => ((1.0, 1.0), (0.01, 0.0)),

        (W4H3, W16H10) => ((1.0, 50.0 / 64.0), (0.01, 7.0 / 64.0)),
        (W4H3, W16H9) => ((1.0, 0.75), (0.01, 0.125)),
        (W4H3, W5H4) => ((0.9375, 1.0), (0.03125, 0.0)),
        (W4H3, W4H3) => ((1.0, 1.0), (0.01, 0.0)),
    };

    UvWindow {
        scale: Vec2::new(scale.0, scale.1),
        offset: Vec2::new(offset.0, offset.1),
    }
}

/// UV window for the fulldome pass over a `tex_w` x `tex_h` capture.
pub fn dome_cut_window(cut: DomeCut, tex_w: f32, tex_h: f32) -> UvWindow {
    match cut {
        DomeCut::Full => UvWindow::IDENTITY,
        DomeCut::MiddleSquare => UvWindow {
            scale: Vec2::new(tex_h / tex_w, 1.0),
            offset: Vec2::new(((tex_w - tex_h) * 0.5) / tex_w, 0.0),
        },
    }
}

/// Model transform placing a unit plane on the inside of the dome:
/// azimuth about the down axis, then elevation, then roll, then the
/// distance translation.
pub fn plane_transform(global: &ContentPlaneGlobal) -> Mat4 {
    Mat4::from_axis_angle(Vec3::NEG_Y, global.azimuth.to_radians())
        * Mat4::from_axis_angle(Vec3::X, global.elevation.to_radians())
        * Mat4::from_axis_angle(Vec3::Z, global.roll.to_radians())
        * Mat4::from_translation(Vec3::new(0.0, 0.0, global.distance))
}
