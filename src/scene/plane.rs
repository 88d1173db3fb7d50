//! Content planes
//!
//! A plane's attributes are split the way they travel across the cluster:
//! the global half (placement and texture source) is always authored by the
//! master, while the local half (visibility, fade progress, freeze) may
//! diverge per node while presentation mode drives planes from decoded
//! command sheets on the capture host.

/// Number of fixed capture planes, each bound to the live capture texture
/// unless frozen.
pub const CAPTURE_PLANE_COUNT: usize = 5;

/// Height/placement defaults for a runtime-added content plane.
pub const CONTENT_PLANE_HEIGHT: f32 = 1.6;
pub const CONTENT_PLANE_ELEVATION: f32 = 85.0;
pub const CONTENT_PLANE_DISTANCE: f32 = -5.5;

/// Master-authored plane attributes: placement plus texture source.
///
/// `source_id` indexes the selectable source list (0 = live capture);
/// `tex_id` indexes the synced still-image textures when `source_id > 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentPlaneGlobal {
    pub name: String,
    pub height: f32,
    pub azimuth: f32,
    pub elevation: f32,
    pub roll: f32,
    pub distance: f32,
    pub source_id: i32,
    pub tex_id: i32,
}

impl ContentPlaneGlobal {
    pub fn new(
        name: impl Into<String>,
        height: f32,
        azimuth: f32,
        elevation: f32,
        roll: f32,
        distance: f32,
    ) -> Self {
        Self {
            name: name.into(),
            height,
            azimuth,
            elevation,
            roll,
            distance,
            source_id: 0,
            tex_id: 0,
        }
    }
}

/// Per-node plane state: visibility, fade progress, freeze.
///
/// `fade_start == None` means the plane is not mid-transition. A fade is
/// only initiated when `currently_visible != previously_visible`, and
/// initiating it immediately re-arms `previously_visible`, so one
/// visibility flip starts at most one fade.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentPlaneLocal {
    pub name: String,
    pub currently_visible: bool,
    pub previously_visible: bool,
    pub fade_start: Option<f64>,
    pub freeze: bool,
}

impl ContentPlaneLocal {
    /// A steady-visible plane.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            currently_visible: true,
            previously_visible: true,
            fade_start: None,
            freeze: false,
        }
    }

    /// A steady-hidden plane.
    pub fn hidden(name: impl Into<String>) -> Self {
        Self {
            currently_visible: false,
            previously_visible: false,
            ..Self::new(name)
        }
    }
}

/// The fixed capture plane set with its shipped placement.
pub fn default_capture_planes() -> (Vec<ContentPlaneGlobal>, Vec<ContentPlaneLocal>) {
    let globals = vec![
        ContentPlaneGlobal::new("FrontCapture", 3.5, 0.0, 35.0, 0.0, -5.5),
        ContentPlaneGlobal::new("BackCapture", 1.8, -155.0, 20.0, 0.0, -5.5),
        ContentPlaneGlobal::new("LeftCapture", 2.865, -75.135, 26.486, 0.0, -5.5),
        ContentPlaneGlobal::new("RightCapture", 2.865, 75.135, 26.486, 0.0, -5.5),
        ContentPlaneGlobal::new("TopCapture", 3.5, 0.0, 75.135, 0.0, -5.5),
    ];

    let locals = vec![
        ContentPlaneLocal::new("FrontCapture"),
        ContentPlaneLocal::hidden("BackCapture"),
        ContentPlaneLocal::hidden("LeftCapture"),
        ContentPlaneLocal::hidden("RightCapture"),
        ContentPlaneLocal::hidden("TopCapture"),
    ];

    (globals, locals)
}

/// A fresh runtime-added content plane.
pub fn new_content_plane(index: usize) -> (ContentPlaneGlobal, ContentPlaneLocal) {
    let name = format!("Content {index}");
    (
        ContentPlaneGlobal::new(
            name.clone(),
            CONTENT_PLANE_HEIGHT,
            0.0,
            CONTENT_PLANE_ELEVATION,
            0.0,
            CONTENT_PLANE_DISTANCE,
        ),
        ContentPlaneLocal::new(name),
    )
}
