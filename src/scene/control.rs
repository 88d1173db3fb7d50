//! QR-driven scene commands
//!
//! Command sheets held in front of the capture device decode to strings of
//! the form `<PlaneName>;SetActive` or `AllCaptures;Clear`. While any sheet
//! is in view the raw strings are queued (deduplicated); once the view is
//! clear the queue is drained and applied, so a sheet can sit in frame for
//! many captures without re-firing.

use std::str::FromStr;

use thiserror::Error;

use crate::scene::plane::{ContentPlaneGlobal, ContentPlaneLocal};

/// A decoded scene operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneCommand {
    /// Show `plane` live and freeze every other capture plane.
    SetActive { plane: String },
    /// Freeze all capture planes and fade them out.
    ClearAllCaptures,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("empty command string")]
    Empty,

    #[error("missing command keyword in {0:?}")]
    MissingKeyword(String),

    #[error("unknown command keyword {keyword:?}")]
    UnknownKeyword { keyword: String },
}

impl FromStr for SceneCommand {
    type Err = CommandParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(CommandParseError::Empty);
        }

        let mut parts = s.split(';');
        let target = parts.next().unwrap_or_default().trim();
        let keyword = parts
            .next()
            .map(str::trim)
            .ok_or_else(|| CommandParseError::MissingKeyword(s.to_string()))?;

        match (target, keyword) {
            ("AllCaptures", "Clear") => Ok(SceneCommand::ClearAllCaptures),
            (plane, "SetActive") => Ok(SceneCommand::SetActive {
                plane: plane.to_string(),
            }),
            (_, keyword) => Err(CommandParseError::UnknownKeyword {
                keyword: keyword.to_string(),
            }),
        }
    }
}

/// Pending raw command strings collected while sheets are in view.
#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: Vec<String>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Queue one decoded string, keeping only unique operations.
    pub fn push_unique(&mut self, raw: &str) {
        if !self.pending.iter().any(|p| p == raw) {
            log::info!("queued scene operation: {raw}");
            self.pending.push(raw.to_string());
        }
    }

    /// Parse and return every queued command; malformed strings are logged
    /// and dropped.
    pub fn drain(&mut self) -> Vec<SceneCommand> {
        self.pending
            .drain(..)
            .filter_map(|raw| match raw.parse() {
                Ok(cmd) => Some(cmd),
                Err(e) => {
                    log::warn!("dropping scene operation {raw:?}: {e}");
                    None
                }
            })
            .collect()
    }
}

/// Apply one command to the plane set.
///
/// `freeze_snapshot(i)` must copy the live capture texture into capture
/// plane `i`'s owned snapshot texture; it is only called for planes not
/// already frozen. A `SetActive` naming no capture plane is logged and
/// dropped.
pub fn apply_command(
    command: &SceneCommand,
    globals: &mut [ContentPlaneGlobal],
    locals: &mut [ContentPlaneLocal],
    capture_plane_count: usize,
    freeze_snapshot: &mut dyn FnMut(usize),
) {
    let capture_planes = capture_plane_count.min(locals.len());

    match command {
        SceneCommand::SetActive { plane } => {
            let Some(active) = locals[..capture_planes]
                .iter()
                .position(|l| &l.name == plane)
            else {
                log::warn!("no capture plane named {plane:?}");
                return;
            };

            locals[active].previously_visible = false;
            locals[active].freeze = false;
            globals[active].tex_id = 0;

            for i in 0..capture_planes {
                if i != active && !locals[i].freeze {
                    locals[i].freeze = true;
                    freeze_snapshot(i);
                }
            }

            locals[active].currently_visible = true;
        }
        SceneCommand::ClearAllCaptures => {
            for i in 0..capture_planes {
                if !locals[i].freeze {
                    locals[i].freeze = true;
                    freeze_snapshot(i);
                }
                locals[i].currently_visible = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::plane::default_capture_planes;

    #[test]
    fn test_parse_set_active() {
        let cmd: SceneCommand = "FrontCapture;SetActive".parse().unwrap();
        assert_eq!(
            cmd,
            SceneCommand::SetActive {
                plane: "FrontCapture".to_string()
            }
        );
    }

    #[test]
    fn test_parse_clear_all() {
        let cmd: SceneCommand = "AllCaptures;Clear".parse().unwrap();
        assert_eq!(cmd, SceneCommand::ClearAllCaptures);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!("".parse::<SceneCommand>(), Err(CommandParseError::Empty));
        assert!(matches!(
            "FrontCapture".parse::<SceneCommand>(),
            Err(CommandParseError::MissingKeyword(_))
        ));
        assert!(matches!(
            "FrontCapture;Explode".parse::<SceneCommand>(),
            Err(CommandParseError::UnknownKeyword { .. })
        ));
    }

    #[test]
    fn test_queue_dedups() {
        let mut queue = CommandQueue::new();
        queue.push_unique("FrontCapture;SetActive");
        queue.push_unique("FrontCapture;SetActive");
        queue.push_unique("AllCaptures;Clear");

        let commands = queue.drain();
        assert_eq!(commands.len(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_drops_malformed() {
        let mut queue = CommandQueue::new();
        queue.push_unique("not a command");
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_set_active_freezes_others() {
        let (mut globals, mut locals) = default_capture_planes();
        let mut snapshots = Vec::new();

        let cmd = SceneCommand::SetActive {
            plane: "BackCapture".to_string(),
        };
        let count = locals.len();
        apply_command(&cmd, &mut globals, &mut locals, count, &mut |i| {
            snapshots.push(i)
        });

        assert!(locals[1].currently_visible);
        assert!(!locals[1].freeze);
        assert!(!locals[1].previously_visible, "fade-in armed");
        for (i, local) in locals.iter().enumerate() {
            if i != 1 {
                assert!(local.freeze, "plane {i} frozen");
            }
        }
        assert_eq!(snapshots, vec![0, 2, 3, 4]);
    }

    #[test]
    fn test_set_active_skips_already_frozen() {
        let (mut globals, mut locals) = default_capture_planes();
        locals[0].freeze = true;

        let mut snapshots = Vec::new();
        let cmd = SceneCommand::SetActive {
            plane: "TopCapture".to_string(),
        };
        let count = locals.len();
        apply_command(&cmd, &mut globals, &mut locals, count, &mut |i| {
            snapshots.push(i)
        });

        // Plane 0 was already frozen: no second snapshot.
        assert_eq!(snapshots, vec![1, 2, 3]);
    }

    #[test]
    fn test_clear_all_fades_everything_out() {
        let (mut globals, mut locals) = default_capture_planes();
        let mut snapshots = Vec::new();

        let count = locals.len();
        apply_command(
            &SceneCommand::ClearAllCaptures,
            &mut globals,
            &mut locals,
            count,
            &mut |i| snapshots.push(i),
        );

        assert!(locals.iter().all(|l| l.freeze && !l.currently_visible));
        assert_eq!(snapshots.len(), locals.len());
    }

    #[test]
    fn test_unknown_plane_is_dropped() {
        let (mut globals, mut locals) = default_capture_planes();
        let before = locals.clone();

        let cmd = SceneCommand::SetActive {
            plane: "NoSuchPlane".to_string(),
        };
        let count = locals.len();
        apply_command(&cmd, &mut globals, &mut locals, count, &mut |_| {
            panic!("no snapshot expected")
        });

        assert_eq!(locals, before);
    }
}
