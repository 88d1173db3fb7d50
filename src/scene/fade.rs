//! Visibility fades and the dome cross-blend
//!
//! Every node evaluates these functions against the master-stamped cluster
//! time, so a multi-projector dome computes identical opacities in the same
//! synchronized frame; locally sourced timestamps would show as seams
//! between projectors.

use crate::scene::plane::ContentPlaneLocal;

/// Floor for the shared fade duration. The opacity math divides by it, so a
/// zero coming in from the UI or the wire must not reach the division.
pub const MIN_FADE_DURATION: f32 = 0.05;

/// Evaluate (and advance) a plane's fade, returning its opacity in [0, 1].
///
/// A transition is initiated the first time the visibility flag differs
/// from `previously_visible` while no fade is in flight; the fade completes
/// when the raw opacity leaves [0, 1] and is clamped, which resets
/// `fade_start` and leaves the plane steady. Re-evaluating with unchanged
/// visibility never re-triggers.
pub fn plane_opacity(plane: &mut ContentPlaneLocal, now: f64, fade_duration: f32) -> f32 {
    let fade_duration = fade_duration.max(MIN_FADE_DURATION);
    let mut opacity = 1.0_f32;

    if plane.currently_visible != plane.previously_visible && plane.fade_start.is_none() {
        plane.fade_start = Some(now);
        plane.previously_visible = plane.currently_visible;
    }

    if let Some(start) = plane.fade_start {
        let progress = ((now - start) as f32) / fade_duration;
        opacity = if plane.currently_visible {
            progress
        } else {
            1.0 - progress
        };

        if opacity < 0.0 {
            opacity = 0.0;
            plane.fade_start = None;
        } else if opacity > 1.0 {
            opacity = 1.0;
            plane.fade_start = None;
        }
    } else if !plane.currently_visible {
        opacity = 0.0;
    }

    opacity
}

/// Cross-blend between the previous and current dome texture.
///
/// Unlike plane fades this mixes two whole textures with one scalar, so the
/// composer selects the two-sampler blend shader only while a blend is in
/// flight.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomeBlend {
    pub previous_index: i32,
    blend_start: Option<f64>,
}

impl DomeBlend {
    pub fn new(initial_index: i32) -> Self {
        Self {
            previous_index: initial_index,
            blend_start: None,
        }
    }

    pub fn is_blending(&self) -> bool {
        self.blend_start.is_some()
    }

    /// Advance the blend toward `current_index`.
    ///
    /// Returns the mix factor in [0, 1] while a blend is active, `None`
    /// once settled. The final over-shooting sample completes the blend and
    /// reports a fully mixed frame.
    pub fn mix(&mut self, current_index: i32, now: f64, fade_duration: f32) -> Option<f32> {
        let fade_duration = fade_duration.max(MIN_FADE_DURATION);

        if self.previous_index != current_index && self.blend_start.is_none() {
            self.blend_start = Some(now);
        }

        let start = self.blend_start?;
        let mix = ((now - start) as f32) / fade_duration;
        if mix > 1.0 {
            self.blend_start = None;
            self.previous_index = current_index;
            return Some(1.0);
        }

        Some(mix.max(0.0))
    }
}
