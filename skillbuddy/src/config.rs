//! Persistent application configuration.
//!
//! Stored as JSON in a platform-appropriate config directory. Every field is
//! defaulted, so partial or legacy files still load; missing values resolve to
//! sane fallbacks once, at this boundary, instead of inside decision logic.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Global pause: tasks stay registered but nothing fires and held keys
    /// are lifted until unpaused.
    pub paused: bool,
    pub window: WindowConfig,
    pub timing: TimingConfig,
    pub skills: BTreeMap<String, SkillConfig>,
    pub resources: ResourceSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Target window application name (from `xcap::Window::app_name()`).
    ///
    /// Reasonably stable across restarts. If multiple windows share the same
    /// app name, the first match is used.
    pub app_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Frame capture refresh interval.
    pub capture_interval_ms: u64,
    /// Shared cooldown-icon check interval.
    pub cooldown_check_interval_ms: u64,
    /// HP/MP check interval.
    pub resource_check_interval_ms: u64,
    /// Template cache sweep interval.
    pub template_sweep_interval_s: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            capture_interval_ms: 50,
            cooldown_check_interval_ms: 100,
            resource_check_interval_ms: 250,
            template_sweep_interval_s: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillConfig {
    pub enabled: bool,
    /// Key name or comma-joined key sequence.
    pub key: String,
    /// Priority presses go to the front of the action queue.
    pub priority: bool,
    pub trigger: TriggerMode,
    pub condition: ExecuteCondition,
}

impl Default for SkillConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key: String::new(),
            priority: false,
            trigger: TriggerMode::default(),
            condition: ExecuteCondition::Unconditional,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TriggerMode {
    /// Fire on a fixed interval; the scheduler alone gates frequency.
    Timer { interval_ms: u64 },
    /// Fire when the skill's icon matches its cached ready-state template.
    CooldownIcon { region: IconRegion },
    /// Key held continuously while the skill is enabled.
    Hold,
}

impl Default for TriggerMode {
    fn default() -> Self {
        TriggerMode::Timer { interval_ms: 1000 }
    }
}

/// Square icon region in full-frame pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IconRegion {
    pub x: u32,
    pub y: u32,
    pub size: u32,
}

impl IconRegion {
    /// A zeroed origin means "not calibrated"; such skills are treated as
    /// always ready.
    pub fn is_calibrated(&self) -> bool {
        self.x > 0 && self.y > 0 && self.size > 0
    }

    pub fn rect(&self) -> dv::Rect {
        dv::Rect::new(self.x, self.y, self.size, self.size)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecuteCondition {
    Unconditional,
    /// Press the main key when the probe is NOT satisfied (the buff is
    /// missing). There is no alternate key for this gate.
    BuffGate { probe: ConditionProbe },
    /// Press the main key while the probe is satisfied over two consecutive
    /// checks; otherwise press `alt_key` (when non-empty).
    ResourceGate {
        probe: ConditionProbe,
        #[serde(default)]
        alt_key: String,
    },
}

impl Default for ExecuteCondition {
    fn default() -> Self {
        ExecuteCondition::Unconditional
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "probe", rename_all = "snake_case")]
pub enum ConditionProbe {
    /// Single-pixel color check at an absolute frame coordinate.
    Pixel {
        x: u32,
        y: u32,
        color: dv::Color,
        #[serde(default = "default_pixel_tolerance")]
        tolerance: u8,
    },
    /// Fill check against the configured HP/MP region.
    Resource {
        kind: dv::ResourceKind,
        threshold_percent: f32,
    },
}

fn default_pixel_tolerance() -> u8 {
    30
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSettings {
    pub hp: ResourceConfig,
    pub mp: ResourceConfig,
}

impl ResourceSettings {
    pub fn get(&self, kind: dv::ResourceKind) -> &ResourceConfig {
        match kind {
            dv::ResourceKind::Hp => &self.hp,
            dv::ResourceKind::Mp => &self.mp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub enabled: bool,
    /// Potion key.
    pub key: String,
    /// Press when the fill estimate drops below this.
    pub threshold_percent: f32,
    /// Minimum time between presses.
    pub cooldown_ms: u64,
    pub detection: DetectionMode,
    pub colors: Vec<ColorSpec>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key: String::new(),
            threshold_percent: 50.0,
            cooldown_ms: 5000,
            detection: DetectionMode::default(),
            colors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum DetectionMode {
    Rectangle { x1: u32, y1: u32, x2: u32, y2: u32 },
    Circle { cx: u32, cy: u32, radius: u32 },
    /// Numeric readout read by an external OCR collaborator.
    Text { x1: u32, y1: u32, x2: u32, y2: u32 },
}

impl Default for DetectionMode {
    fn default() -> Self {
        DetectionMode::Rectangle {
            x1: 0,
            y1: 0,
            x2: 0,
            y2: 0,
        }
    }
}

impl DetectionMode {
    /// Bounding rectangle, used for template snapshots. `None` when the
    /// geometry is not calibrated.
    pub fn bounding_rect(&self) -> Option<dv::Rect> {
        match *self {
            DetectionMode::Rectangle { x1, y1, x2, y2 } | DetectionMode::Text { x1, y1, x2, y2 } => {
                (x2 > x1 && y2 > y1).then(|| dv::Rect::new(x1, y1, x2 - x1, y2 - y1))
            }
            DetectionMode::Circle { cx, cy, radius } => (radius > 0 && cx >= radius && cy >= radius)
                .then(|| dv::Rect::new(cx - radius, cy - radius, radius * 2 + 1, radius * 2 + 1)),
        }
    }

    /// Geometry for the fill estimator. `None` for Text mode.
    pub fn region_shape(&self) -> Option<dv::RegionShape> {
        match *self {
            DetectionMode::Rectangle { x1, y1, x2, y2 } => (x2 > x1 && y2 > y1)
                .then(|| dv::RegionShape::Rect(dv::Rect::new(x1, y1, x2 - x1, y2 - y1))),
            DetectionMode::Circle { cx, cy, radius } => {
                (radius > 0).then_some(dv::RegionShape::Circle { cx, cy, radius })
            }
            DetectionMode::Text { .. } => None,
        }
    }
}

/// Target HSV color plus per-channel tolerances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorSpec {
    pub h: u8,
    pub s: u8,
    pub v: u8,
    pub tol_h: u8,
    pub tol_s: u8,
    pub tol_v: u8,
}

impl Default for ColorSpec {
    fn default() -> Self {
        Self {
            h: 0,
            s: 0,
            v: 0,
            tol_h: 10,
            tol_s: 40,
            tol_v: 40,
        }
    }
}

impl ColorSpec {
    pub fn window(&self) -> dv::HsvWindow {
        dv::HsvWindow::new(dv::Hsv::new(self.h, self.s, self.v), self.tol_h, self.tol_s, self.tol_v)
    }
}

impl Config {
    /// Path to the config file.
    pub fn path() -> Result<PathBuf> {
        let base = dirs::config_dir().context("config_dir() unavailable")?;
        Ok(base.join("skillbuddy.json"))
    }

    /// Load configuration from disk, falling back to defaults on error.
    pub fn load_or_default() -> Self {
        match Self::try_load() {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load config; using defaults");
                Self::default()
            }
        }
    }

    /// Try to load configuration from disk.
    pub fn try_load() -> Result<Self> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let json = fs::read_to_string(&path).with_context(|| format!("read {:?}", path))?;
        let cfg = serde_json::from_str(&json).with_context(|| format!("parse {:?}", path))?;
        Ok(cfg)
    }

    /// Save configuration to disk.
    pub fn save(&self) -> Result<()> {
        let path = Self::path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self).context("serialize config")?;
        fs::write(&path, json).with_context(|| format!("write {:?}", path))?;
        Ok(())
    }
}

/// Watch the config file and hand freshly parsed configs to `on_change`.
///
/// Each delivery is authoritative and total; the engine swaps wholesale.
/// Parse failures are logged and the previous config stays active. The
/// returned watcher must be kept alive.
pub fn watch(on_change: impl Fn(Config) + Send + 'static) -> Result<notify::RecommendedWatcher> {
    use notify::Watcher;

    let path = Config::path()?;
    let dir = path
        .parent()
        .context("config path has no parent")?
        .to_path_buf();

    let file = path.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "config watch error");
                return;
            }
        };
        let Some(file_name) = file.file_name() else {
            return;
        };
        if !event.paths.iter().any(|p| p.file_name() == Some(file_name)) {
            return;
        }
        if !(event.kind.is_create() || event.kind.is_modify()) {
            return;
        }

        match Config::try_load() {
            Ok(cfg) => on_change(cfg),
            Err(err) => tracing::warn!(error = %err, "ignoring unreadable config update"),
        }
    })?;

    watcher.watch(&dir, notify::RecursiveMode::NonRecursive)?;
    Ok(watcher)
}
