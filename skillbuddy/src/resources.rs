//! HP/MP potion checks.
//!
//! Runs on its own scheduled task. Both resources read the same cached frame,
//! and each enforces its own press cooldown before any detection work happens.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::capture::FrameSource;
use crate::config::{DetectionMode, ResourceConfig, ResourceSettings};
use crate::input::ActionSink;

/// External OCR collaborator for Text-mode resource readouts.
pub trait TextProbe: Send + Sync {
	fn read_percent(&self, frame: dv::Image<'_>, rect: dv::Rect) -> Option<f32>;
}

/// Template cache name for a resource region.
pub fn template_name(kind: dv::ResourceKind) -> &'static str {
	match kind {
		dv::ResourceKind::Hp => "hp_region",
		dv::ResourceKind::Mp => "mp_region",
	}
}

struct CheckerState {
	settings: ResourceSettings,
	/// Survives config swaps; a reload must not reset potion cooldowns.
	last_press: HashMap<dv::ResourceKind, Instant>,
}

pub struct ResourceChecker {
	dv: Arc<dv::Dv>,
	sink: Arc<dyn ActionSink>,
	frames: Arc<dyn FrameSource>,
	text_probe: Option<Arc<dyn TextProbe>>,
	state: Mutex<CheckerState>,
}

impl ResourceChecker {
	pub fn new(
		dv: Arc<dv::Dv>,
		sink: Arc<dyn ActionSink>,
		frames: Arc<dyn FrameSource>,
		text_probe: Option<Arc<dyn TextProbe>>,
	) -> Self {
		Self {
			dv,
			sink,
			frames,
			text_probe,
			state: Mutex::new(CheckerState {
				settings: ResourceSettings::default(),
				last_press: HashMap::new(),
			}),
		}
	}

	/// Swap in a new resource configuration wholesale.
	pub fn apply_config(&self, settings: ResourceSettings) {
		self.lock_state().settings = settings;
	}

	/// Scheduled callback: one frame, both resources.
	pub fn check(&self) -> anyhow::Result<()> {
		let Some(frame) = self.frames.current_frame() else {
			return Ok(());
		};
		for kind in [dv::ResourceKind::Hp, dv::ResourceKind::Mp] {
			self.check_one(frame.as_image(), kind);
		}
		Ok(())
	}

	fn check_one(&self, frame: dv::Image<'_>, kind: dv::ResourceKind) {
		let (cfg, off_cooldown) = {
			let state = self.lock_state();
			let cfg = state.settings.get(kind).clone();
			let off_cooldown = state
				.last_press
				.get(&kind)
				.is_none_or(|t| t.elapsed() >= Duration::from_millis(cfg.cooldown_ms));
			(cfg, off_cooldown)
		};

		if !cfg.enabled || cfg.key.is_empty() {
			return;
		}
		// Cooldown gates detection, not just the press: no point measuring
		// while a potion cannot be used anyway.
		if !off_cooldown {
			return;
		}

		let Some(percent) = self.measure_with(frame, kind, &cfg) else {
			tracing::debug!(?kind, "resource reading unavailable; skipping check");
			return;
		};

		if percent < cfg.threshold_percent {
			self.sink.execute_key(&cfg.key, false);
			self.lock_state().last_press.insert(kind, Instant::now());
			tracing::debug!(?kind, percent, "resource low; potion key pressed");
		}
	}

	/// Current fill estimate for `kind`, using the active configuration.
	///
	/// Shared with skill resource gates so both read resources the same way.
	pub fn measure(&self, frame: dv::Image<'_>, kind: dv::ResourceKind) -> Option<f32> {
		let cfg = self.lock_state().settings.get(kind).clone();
		self.measure_with(frame, kind, &cfg)
	}

	fn measure_with(
		&self,
		frame: dv::Image<'_>,
		kind: dv::ResourceKind,
		cfg: &ResourceConfig,
	) -> Option<f32> {
		match cfg.detection {
			DetectionMode::Text { .. } => {
				let probe = self.text_probe.as_ref()?;
				let rect = cfg.detection.bounding_rect()?;
				probe.read_percent(frame, rect)
			}
			_ => {
				let shape = cfg.detection.region_shape()?;
				let windows: Vec<dv::HsvWindow> = cfg.colors.iter().map(|c| c.window()).collect();
				match self
					.dv
					.fill_percent(frame, template_name(kind), shape, kind, &windows)
				{
					Ok(percent) => Some(percent),
					Err(err) => {
						tracing::debug!(?kind, error = %err, "fill estimate failed");
						None
					}
				}
			}
		}
	}

	fn lock_state(&self) -> std::sync::MutexGuard<'_, CheckerState> {
		self.state.lock().expect("resource checker lock poisoned")
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::ColorSpec;
	use crate::input::test_support::RecordingSink;
	use std::sync::atomic::{AtomicUsize, Ordering};

	const RED: dv::Color = dv::Color::new(200, 20, 20);
	const GREY: dv::Color = dv::Color::new(60, 60, 60);

	struct StubFrames {
		frame: Arc<dv::OwnedImage>,
		calls: AtomicUsize,
	}

	impl StubFrames {
		fn new(frame: dv::OwnedImage) -> Self {
			Self {
				frame: Arc::new(frame),
				calls: AtomicUsize::new(0),
			}
		}
	}

	impl FrameSource for StubFrames {
		fn current_frame(&self) -> Option<Arc<dv::OwnedImage>> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			Some(self.frame.clone())
		}
	}

	/// 10x20 frame whose bottom `filled` rows are red.
	fn hp_frame(filled: u32) -> dv::OwnedImage {
		let mut data = Vec::new();
		for y in 0..20 {
			for _ in 0..10 {
				data.push(if y >= 20 - filled { RED } else { GREY });
			}
		}
		dv::OwnedImage::from_pixels(10, 20, data)
	}

	fn hp_settings(threshold: f32, cooldown_ms: u64) -> ResourceSettings {
		let red = dv::Hsv::from(RED);
		ResourceSettings {
			hp: ResourceConfig {
				enabled: true,
				key: "1".to_string(),
				threshold_percent: threshold,
				cooldown_ms,
				detection: DetectionMode::Rectangle { x1: 0, y1: 0, x2: 10, y2: 20 },
				colors: vec![ColorSpec {
					h: red.h,
					s: red.s,
					v: red.v,
					..ColorSpec::default()
				}],
			},
			mp: ResourceConfig::default(),
		}
	}

	fn checker_with(
		frame: dv::OwnedImage,
		settings: ResourceSettings,
	) -> (ResourceChecker, Arc<RecordingSink>, Arc<StubFrames>) {
		let dv = Arc::new(dv::Dv::new());
		dv.snapshot("hp_region", frame.as_image(), dv::Rect::new(0, 0, 10, 20))
			.unwrap();
		let sink = Arc::new(RecordingSink::default());
		let frames = Arc::new(StubFrames::new(frame));
		let checker = ResourceChecker::new(dv, sink.clone(), frames.clone(), None);
		checker.apply_config(settings);
		(checker, sink, frames)
	}

	#[test]
	fn test_low_hp_presses_potion_once_per_cooldown() {
		let (checker, sink, _) = checker_with(hp_frame(6), hp_settings(50.0, 60_000));

		checker.check().unwrap();
		checker.check().unwrap();

		// 30% fill vs 50% threshold: pressed, then gated by the cooldown.
		assert_eq!(sink.pressed_keys(), vec!["1".to_string()]);
	}

	#[test]
	fn test_zero_cooldown_presses_every_check() {
		let (checker, sink, _) = checker_with(hp_frame(6), hp_settings(50.0, 0));

		checker.check().unwrap();
		checker.check().unwrap();

		assert_eq!(sink.pressed_keys().len(), 2);
	}

	#[test]
	fn test_sufficient_hp_presses_nothing() {
		let (checker, sink, _) = checker_with(hp_frame(16), hp_settings(50.0, 0));

		checker.check().unwrap();

		assert!(sink.pressed_keys().is_empty());
	}

	#[test]
	fn test_one_frame_pull_per_check() {
		let (checker, _, frames) = checker_with(hp_frame(6), hp_settings(50.0, 0));

		checker.check().unwrap();

		// HP and MP share one frame pull per tick.
		assert_eq!(frames.calls.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn test_text_mode_without_probe_is_skipped() {
		let mut settings = hp_settings(50.0, 0);
		settings.hp.detection = DetectionMode::Text { x1: 0, y1: 0, x2: 10, y2: 20 };
		let (checker, sink, _) = checker_with(hp_frame(0), settings);

		checker.check().unwrap();

		assert!(sink.pressed_keys().is_empty());
	}

	#[test]
	fn test_text_mode_uses_injected_probe() {
		struct FixedProbe(f32);
		impl TextProbe for FixedProbe {
			fn read_percent(&self, _frame: dv::Image<'_>, _rect: dv::Rect) -> Option<f32> {
				Some(self.0)
			}
		}

		let mut settings = hp_settings(50.0, 0);
		settings.hp.detection = DetectionMode::Text { x1: 0, y1: 0, x2: 10, y2: 20 };

		let frame = hp_frame(0);
		let dv = Arc::new(dv::Dv::new());
		let sink = Arc::new(RecordingSink::default());
		let frames = Arc::new(StubFrames::new(frame));
		let checker = ResourceChecker::new(
			dv,
			sink.clone(),
			frames,
			Some(Arc::new(FixedProbe(10.0))),
		);
		checker.apply_config(settings);

		checker.check().unwrap();

		assert_eq!(sink.pressed_keys(), vec!["1".to_string()]);
	}

	#[test]
	fn test_cooldown_stamp_survives_config_swap() {
		let (checker, sink, _) = checker_with(hp_frame(6), hp_settings(50.0, 60_000));

		checker.check().unwrap();
		checker.apply_config(hp_settings(50.0, 60_000));
		checker.check().unwrap();

		assert_eq!(sink.pressed_keys().len(), 1);
	}
}
