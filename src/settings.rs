//! Configuration surface
//!
//! The viewer is configured the way the host framework launches it: a flat
//! argument list naming the capture host/device, backend options, and the
//! optional default fisheye slideshow. A JSON settings file can carry the
//! same values for installations that prefer files over launch scripts.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::capture::CaptureConfig;

/// Everything configurable at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerSettings {
    pub capture: CaptureConfig,
    /// Fisheye images staged automatically after startup, one at a time.
    pub default_fisheyes: Vec<String>,
    /// Delay in seconds between automatically staged fisheyes.
    pub default_fisheye_delay: f64,
}

impl ViewerSettings {
    /// Walk a launch argument list. Unknown arguments are ignored; the host
    /// framework consumes its own flags from the same list.
    ///
    /// Recognized: `-host <addr>`, `-video <device>`, `-option <key> <val>`,
    /// `-flip`, `-defaultfisheye <a;b;c>`, `-defaultfisheyedelay <secs>`,
    /// `-config <file.json>`.
    pub fn from_args<I: IntoIterator<Item = String>>(args: I) -> Self {
        let args: Vec<String> = args.into_iter().collect();
        let mut settings = ViewerSettings::default();

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "-config" if i + 1 < args.len() => {
                    match Self::load(Path::new(&args[i + 1])) {
                        Ok(loaded) => settings = loaded,
                        Err(e) => log::error!("failed to load config {}: {e}", args[i + 1]),
                    }
                    i += 1;
                }
                "-host" if i + 1 < args.len() => {
                    settings.capture.host = args[i + 1].clone();
                    i += 1;
                }
                "-video" if i + 1 < args.len() => {
                    settings.capture.device = args[i + 1].clone();
                    i += 1;
                }
                "-option" if i + 2 < args.len() => {
                    settings
                        .capture
                        .add_option(args[i + 1].clone(), args[i + 2].clone());
                    log::info!(
                        "added capture option {}, parameter {}",
                        args[i + 1],
                        args[i + 2]
                    );
                    i += 2;
                }
                "-flip" => settings.capture.flip = true,
                "-defaultfisheye" if i + 1 < args.len() => {
                    settings
                        .default_fisheyes
                        .extend(args[i + 1].split(';').map(str::to_string));
                    i += 1;
                }
                "-defaultfisheyedelay" if i + 1 < args.len() => {
                    match args[i + 1].parse() {
                        Ok(delay) => settings.default_fisheye_delay = delay,
                        Err(_) => log::warn!("bad fisheye delay {:?}", args[i + 1]),
                    }
                    i += 1;
                }
                _ => {}
            }
            i += 1;
        }

        settings
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_capture_arguments() {
        let settings = ViewerSettings::from_args(args(&[
            "-host",
            "192.168.0.10",
            "-video",
            "Decklink Mini",
            "-option",
            "video_size",
            "1920x1080",
            "-flip",
        ]));

        assert_eq!(settings.capture.host, "192.168.0.10");
        assert_eq!(settings.capture.device, "Decklink Mini");
        assert_eq!(
            settings.capture.options,
            vec![("video_size".to_string(), "1920x1080".to_string())]
        );
        assert!(settings.capture.flip);
    }

    #[test]
    fn test_parse_default_fisheyes() {
        let settings = ViewerSettings::from_args(args(&[
            "-defaultfisheye",
            "a.png;b.jpg",
            "-defaultfisheyedelay",
            "4.5",
        ]));

        assert_eq!(settings.default_fisheyes, vec!["a.png", "b.jpg"]);
        assert_eq!(settings.default_fisheye_delay, 4.5);
    }

    #[test]
    fn test_unknown_arguments_ignored() {
        let settings = ViewerSettings::from_args(args(&["--sgct-config", "dome.xml", "-flip"]));
        assert!(settings.capture.flip);
        assert!(settings.capture.host.is_empty());
    }

    #[test]
    fn test_settings_file_round_trip() {
        let mut settings = ViewerSettings::default();
        settings.capture.host = "node-a".to_string();
        settings.default_fisheye_delay = 2.0;

        let path =
            std::env::temp_dir().join(format!("dome-viewer-settings-{}.json", std::process::id()));
        settings.save(&path).unwrap();
        let loaded = ViewerSettings::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, settings);
    }
}
