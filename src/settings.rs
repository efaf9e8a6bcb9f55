// Driftfield - GPU curl-noise particle field visualizer
// Licensed under MIT License

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::gradient::{parse_hex_color, Gradient};

pub const SETTINGS_FILE_NAME: &str = "driftfield_settings.json";

/// Explicit capability tiers. These replace the browser-era device
/// sniffing: instead of guessing from a user agent, the caller picks a
/// tier (or accepts the default) and every workaround hangs off it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityPreset {
    Low,
    Medium,
    High,
}

impl QualityPreset {
    pub fn from_arg(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    /// Particle grid dimension N (N×N particles).
    pub fn grid_size(self) -> u32 {
        match self {
            Self::Low => 128,
            Self::Medium => 256,
            Self::High => 512,
        }
    }

    /// Run the simulation dispatch every 2nd frame only.
    pub fn half_rate_sim(self) -> bool {
        matches!(self, Self::Low)
    }

    /// Constant point size instead of the depth-of-field model.
    pub fn flat_point_size(self) -> Option<f32> {
        match self {
            Self::Low => Some(3.0),
            _ => None,
        }
    }

    /// Camera auto-rotation (disabled on the lowest tier).
    pub fn auto_rotate(self) -> bool {
        !matches!(self, Self::Low)
    }
}

/// Every tunable visual parameter, merged from (in order of increasing
/// precedence) built-in defaults, the settings file on disk, and
/// command-line `key=value` parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualSettings {
    pub frequency: f32,
    pub speed_factor: f32,
    pub fov: f32,
    pub blur: f32,
    pub focus: f32,
    pub point_scale: f32,
    pub camera_distance: f32,
    pub rotation_speed: f32,
    pub auto_rotate: bool,
    pub vertical_rotation: bool,
    pub background: [f32; 3],
    pub transparent: bool,
    pub gradient: Gradient,
    pub grid_size: u32,
    pub quality: QualityPreset,
    pub show_panel: bool,
}

impl Default for VisualSettings {
    fn default() -> Self {
        let quality = QualityPreset::Medium;
        Self {
            frequency: 0.15,
            speed_factor: 4.0,
            fov: 35.0,
            blur: 24.0,
            focus: 8.7,
            point_scale: 8.0,
            camera_distance: 7.6,
            rotation_speed: 0.3,
            auto_rotate: quality.auto_rotate(),
            vertical_rotation: true,
            background: [0.0, 0.0, 0.0],
            transparent: false,
            gradient: Gradient::default(),
            grid_size: quality.grid_size(),
            quality,
            show_panel: false,
        }
    }
}

impl VisualSettings {
    pub fn default_path() -> PathBuf {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(SETTINGS_FILE_NAME)
    }

    pub fn load_from_disk(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&data)?;
        Ok(settings)
    }

    pub fn save_to_disk(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Applies `key=value` parameters (the query-string surface of the
    /// original embed). Presence is checked by string existence only:
    /// unknown keys are ignored and unparsable values leave the current
    /// setting in place.
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator<Item = String>,
    {
        let pairs: Vec<(String, String)> = args
            .into_iter()
            .filter_map(|arg| {
                arg.split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect();

        // Quality first so an explicit size= can still override it.
        for (key, value) in &pairs {
            if key == "quality" {
                if let Some(q) = QualityPreset::from_arg(value) {
                    self.quality = q;
                    self.grid_size = q.grid_size();
                    self.auto_rotate = q.auto_rotate();
                } else {
                    log::warn!("unknown quality preset {value:?}, keeping {:?}", self.quality);
                }
            }
        }

        for (key, value) in &pairs {
            match key.as_str() {
                "bg" => self.background = parse_hex_color(value),
                "gc1" => self.gradient.colors[0] = parse_hex_color(value),
                "gc2" => self.gradient.colors[1] = parse_hex_color(value),
                "gc3" => self.gradient.colors[2] = parse_hex_color(value),
                "gc4" => self.gradient.colors[3] = parse_hex_color(value),
                "d" => self.frequency = value.parse().unwrap_or(self.frequency),
                "s" => self.speed_factor = value.parse().unwrap_or(self.speed_factor),
                "r" => self.rotation_speed = value.parse().unwrap_or(self.rotation_speed),
                "size" => self.grid_size = value.parse().unwrap_or(self.grid_size),
                "transparent" => self.transparent = value == "true",
                "rotationVertical" => self.vertical_rotation = value == "true",
                "panel" => self.show_panel = value == "true",
                "quality" => {}
                other => log::debug!("ignoring unknown parameter {other:?}"),
            }
        }
    }

    /// Clamps everything into the ranges the tuning panel exposes.
    pub fn sanitize(&mut self) {
        self.frequency = self.frequency.clamp(0.0, 1.0);
        self.speed_factor = self.speed_factor.clamp(0.1, 100.0);
        self.fov = self.fov.clamp(1.0, 200.0);
        self.blur = self.blur.clamp(0.0, 50.0);
        self.focus = self.focus.clamp(3.0, 10.0);
        self.point_scale = self.point_scale.clamp(0.5, 64.0);
        self.camera_distance = self.camera_distance.clamp(0.5, 15.0);
        self.rotation_speed = self.rotation_speed.clamp(0.0, 5.0);
        self.grid_size = self.grid_size.clamp(4, 1024);
        for ch in &mut self.background {
            *ch = ch.clamp(0.0, 1.0);
        }
        self.gradient.sanitize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_match_production_variant() {
        let s = VisualSettings::default();
        assert_eq!(s.frequency, 0.15);
        assert_eq!(s.speed_factor, 4.0);
        assert_eq!(s.focus, 8.7);
        assert_eq!(s.grid_size, 256);
        assert_eq!(s.gradient.stops, [0.6, 0.65, 0.75, 0.8]);
        assert!(!s.transparent);
        assert!(s.auto_rotate);
    }

    #[test]
    fn parameters_override_defaults() {
        let mut s = VisualSettings::default();
        s.apply_args(args(&["d=0.42", "s=12.5", "r=1.1", "size=64", "transparent=true"]));
        assert_eq!(s.frequency, 0.42);
        assert_eq!(s.speed_factor, 12.5);
        assert_eq!(s.rotation_speed, 1.1);
        assert_eq!(s.grid_size, 64);
        assert!(s.transparent);
    }

    #[test]
    fn malformed_values_keep_defaults() {
        let mut s = VisualSettings::default();
        s.apply_args(args(&["d=fast", "size=many", "gc1=zzz", "transparent=yes"]));
        assert_eq!(s.frequency, 0.15);
        assert_eq!(s.grid_size, 256);
        // Malformed hex falls back to white, not an error.
        assert_eq!(s.gradient.colors[0], [1.0, 1.0, 1.0]);
        // Anything but the literal "true" is false.
        assert!(!s.transparent);
    }

    #[test]
    fn unknown_keys_and_bare_words_are_ignored() {
        let mut s = VisualSettings::default();
        let before = s.clone();
        s.apply_args(args(&["bogus=1", "panel", "=", "noequals"]));
        assert_eq!(s, before);
    }

    #[test]
    fn gradient_colors_parse_from_bare_hex() {
        let mut s = VisualSettings::default();
        s.apply_args(args(&["gc2=000000", "bg=ff0000"]));
        assert_eq!(s.gradient.colors[1], [0.0, 0.0, 0.0]);
        assert_eq!(s.background, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn quality_preset_sets_capability_flags() {
        let mut s = VisualSettings::default();
        s.apply_args(args(&["quality=low"]));
        assert_eq!(s.quality, QualityPreset::Low);
        assert_eq!(s.grid_size, 128);
        assert!(!s.auto_rotate);
        assert!(s.quality.half_rate_sim());
        assert!(s.quality.flat_point_size().is_some());
    }

    #[test]
    fn explicit_size_overrides_preset() {
        let mut s = VisualSettings::default();
        s.apply_args(args(&["size=96", "quality=high"]));
        assert_eq!(s.quality, QualityPreset::High);
        assert_eq!(s.grid_size, 96);
    }

    #[test]
    fn sanitize_clamps_into_panel_ranges() {
        let mut s = VisualSettings::default();
        s.frequency = 9.0;
        s.focus = -2.0;
        s.grid_size = 100_000;
        s.rotation_speed = -3.0;
        s.sanitize();
        assert_eq!(s.frequency, 1.0);
        assert_eq!(s.focus, 3.0);
        assert_eq!(s.grid_size, 1024);
        assert_eq!(s.rotation_speed, 0.0);
    }

    #[test]
    fn sanitize_restores_gradient_stop_order() {
        // Stops can go non-monotonic mid-edit in the panel; the
        // per-frame sanitize has to repair them before the shader sees
        // the values.
        let mut s = VisualSettings::default();
        s.gradient.stops = [0.8, 0.2, 0.9, 0.1];
        s.sanitize();
        assert!(s.gradient.stops.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn settings_roundtrip_through_json() {
        let mut s = VisualSettings::default();
        s.apply_args(args(&["d=0.3", "gc1=112233", "quality=high"]));
        let json = serde_json::to_string(&s).unwrap();
        let back: VisualSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }
}
