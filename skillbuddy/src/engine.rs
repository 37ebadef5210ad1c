//! Composition root.
//!
//! Constructs one scheduler, one detection engine, one frame cache, and hands
//! them to the decision components explicitly. Owns the standing tasks, the
//! one-shot template prepare, and wholesale config swaps.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::capture::{FrameCache, FrameSource};
use crate::config::{Config, TriggerMode};
use crate::input::ActionSink;
use crate::resources::{self, ResourceChecker, TextProbe};
use crate::scheduler::TaskScheduler;
use crate::skills::{self, SkillManager};

const FRAME_CAPTURE_TASK: &str = "frame_capture";
const COOLDOWN_CHECK_TASK: &str = "cooldown_check";
const RESOURCE_CHECK_TASK: &str = "resource_check";
const TEMPLATE_SWEEP_TASK: &str = "template_sweep";

/// Template cache budget enforced by the periodic sweep.
const MAX_TEMPLATES: usize = 64;
const MAX_TEMPLATE_AGE: Duration = Duration::from_secs(4 * 3600);

pub struct Engine {
	scheduler: Arc<TaskScheduler>,
	dv: Arc<dv::Dv>,
	frames: Arc<FrameCache>,
	skills: Arc<SkillManager>,
	resources: Arc<ResourceChecker>,
	config: Mutex<Config>,
}

impl Engine {
	pub fn new(
		config: Config,
		sink: Arc<dyn ActionSink>,
		text_probe: Option<Arc<dyn TextProbe>>,
	) -> Arc<Self> {
		let scheduler = Arc::new(TaskScheduler::new());
		let dv = Arc::new(dv::Dv::new());
		let frames = Arc::new(FrameCache::new(&config.window.app_name));

		let resources = Arc::new(ResourceChecker::new(
			dv.clone(),
			sink.clone(),
			frames.clone(),
			text_probe,
		));
		resources.apply_config(config.resources.clone());

		let skills = SkillManager::new(
			scheduler.clone(),
			dv.clone(),
			sink,
			frames.clone(),
			resources.clone(),
		);
		skills.apply_config(config.skills.clone());

		Arc::new(Self {
			scheduler,
			dv,
			frames,
			skills,
			resources,
			config: Mutex::new(config),
		})
	}

	/// Register the standing tasks and begin executing.
	pub fn start(&self) {
		let timing = self.lock_config().timing.clone();

		{
			let frames = Arc::downgrade(&self.frames);
			self.scheduler.add_task(
				FRAME_CAPTURE_TASK,
				Duration::from_millis(timing.capture_interval_ms),
				move || {
					if let Some(frames) = frames.upgrade() {
						frames.refresh();
					}
					Ok(())
				},
				true,
			);
		}
		{
			let skills = Arc::downgrade(&self.skills);
			self.scheduler.add_task(
				COOLDOWN_CHECK_TASK,
				Duration::from_millis(timing.cooldown_check_interval_ms),
				move || match skills.upgrade() {
					Some(skills) => skills.check_cooldowns(),
					None => Ok(()),
				},
				false,
			);
		}
		{
			let resources = Arc::downgrade(&self.resources);
			self.scheduler.add_task(
				RESOURCE_CHECK_TASK,
				Duration::from_millis(timing.resource_check_interval_ms),
				move || match resources.upgrade() {
					Some(resources) => resources.check(),
					None => Ok(()),
				},
				false,
			);
		}
		{
			let dv = Arc::downgrade(&self.dv);
			self.scheduler.add_task(
				TEMPLATE_SWEEP_TASK,
				Duration::from_secs(timing.template_sweep_interval_s),
				move || {
					if let Some(dv) = dv.upgrade() {
						let evicted = dv.sweep(MAX_TEMPLATES, MAX_TEMPLATE_AGE);
						if evicted > 0 {
							tracing::debug!(evicted, "template cache swept");
						}
					}
					Ok(())
				},
				false,
			);
		}

		self.scheduler.start();

		if self.lock_config().paused {
			self.scheduler.pause();
			tracing::info!(tasks = self.scheduler.task_count(), "engine started (paused)");
		} else {
			self.skills.start();
			tracing::info!(tasks = self.scheduler.task_count(), "engine started");
		}
	}

	/// Terminal shutdown: release holds, stop the loop, drop every task.
	pub fn stop(&self) {
		self.skills.stop();
		self.scheduler.stop();
		self.scheduler.clear_all_tasks();
		tracing::info!("engine stopped");
	}

	/// Freeze every tick and lift held keys.
	pub fn pause(&self) {
		self.skills.stop();
		self.scheduler.pause();
	}

	pub fn resume(&self) {
		self.scheduler.resume();
		self.skills.start();
	}

	/// One-shot template snapshot of every configured region from a single
	/// captured frame. Runs at session start and after config swaps, never on
	/// a timer; detection stays pinned to these snapshots for the session.
	pub fn prepare_templates(&self) {
		// A fresh capture beats waiting for the capture task's next tick.
		self.frames.refresh();
		let Some(frame) = self.frames.current_frame() else {
			tracing::warn!("no frame available; templates not prepared");
			return;
		};
		let frame = frame.as_image();

		let config = self.lock_config().clone();
		self.dv.clear_templates();

		for (name, skill) in &config.skills {
			let TriggerMode::CooldownIcon { region } = &skill.trigger else {
				continue;
			};
			if !region.is_calibrated() {
				continue;
			}
			if let Err(err) = self
				.dv
				.snapshot(&skills::template_name(name), frame, region.rect())
			{
				tracing::warn!(skill = %name, error = %err, "cooldown template not captured");
			}
		}

		for kind in [dv::ResourceKind::Hp, dv::ResourceKind::Mp] {
			let cfg = config.resources.get(kind);
			if !cfg.enabled {
				continue;
			}
			let Some(rect) = cfg.detection.bounding_rect() else {
				continue;
			};
			if let Err(err) = self.dv.snapshot(resources::template_name(kind), frame, rect) {
				tracing::warn!(?kind, error = %err, "resource template not captured");
			}
		}

		tracing::info!(count = self.dv.template_count(), "templates prepared");

		// Calibration aid.
		if std::env::var("SKILLBUDDY_DUMP_TEMPLATES").as_deref() == Ok("1") {
			match self.dv.dump_templates(std::path::Path::new("debug_templates")) {
				Ok(written) => tracing::info!(written, "templates dumped"),
				Err(err) => tracing::warn!(error = %err, "template dump failed"),
			}
		}
	}

	/// Wholesale config swap. The mapping is replaced under the lock, so
	/// readers observe fully-old or fully-new, never a mix.
	pub fn apply_config(&self, new: Config) {
		let was_paused;
		{
			let mut config = self.lock_config();
			if *config == new {
				return;
			}
			was_paused = config.paused;

			if config.window.app_name != new.window.app_name {
				self.frames.set_window(&new.window.app_name);
			}
			if config.timing != new.timing {
				self.scheduler.update_task_interval(
					FRAME_CAPTURE_TASK,
					Duration::from_millis(new.timing.capture_interval_ms),
				);
				self.scheduler.update_task_interval(
					COOLDOWN_CHECK_TASK,
					Duration::from_millis(new.timing.cooldown_check_interval_ms),
				);
				self.scheduler.update_task_interval(
					RESOURCE_CHECK_TASK,
					Duration::from_millis(new.timing.resource_check_interval_ms),
				);
				self.scheduler.update_task_interval(
					TEMPLATE_SWEEP_TASK,
					Duration::from_secs(new.timing.template_sweep_interval_s),
				);
			}

			self.skills.apply_config(new.skills.clone());
			self.resources.apply_config(new.resources.clone());
			*config = new;
		}

		let paused = self.lock_config().paused;
		if paused != was_paused {
			if paused {
				self.pause();
			} else {
				self.resume();
			}
		}

		self.prepare_templates();
		tracing::info!("configuration applied");
	}

	fn lock_config(&self) -> std::sync::MutexGuard<'_, Config> {
		self.config.lock().expect("config lock poisoned")
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::SkillConfig;
	use crate::input::test_support::{RecordingSink, SinkEvent};

	#[test]
	fn test_start_registers_standing_tasks() {
		let engine = Engine::new(Config::default(), Arc::new(RecordingSink::default()), None);
		engine.start();

		for task in [
			FRAME_CAPTURE_TASK,
			COOLDOWN_CHECK_TASK,
			RESOURCE_CHECK_TASK,
			TEMPLATE_SWEEP_TASK,
		] {
			assert!(engine.scheduler.has_task(task), "missing {task}");
		}

		engine.stop();
		assert_eq!(engine.scheduler.task_count(), 0);
	}

	#[test]
	fn test_config_swap_reaches_the_skill_manager() {
		let engine = Engine::new(Config::default(), Arc::new(RecordingSink::default()), None);

		let mut new = Config::default();
		new.skills.insert(
			"Cry".to_string(),
			SkillConfig {
				key: "3".to_string(),
				trigger: TriggerMode::Timer { interval_ms: 700 },
				..SkillConfig::default()
			},
		);
		engine.apply_config(new);

		assert!(engine.scheduler.has_task("timed_skill_Cry"));
	}

	#[test]
	fn test_pause_toggle_lifts_and_reapplies_holds() {
		let sink = Arc::new(RecordingSink::default());

		let mut cfg = Config::default();
		cfg.skills.insert(
			"Stance".to_string(),
			SkillConfig {
				key: "shift".to_string(),
				trigger: TriggerMode::Hold,
				..SkillConfig::default()
			},
		);
		let engine = Engine::new(cfg.clone(), sink.clone(), None);
		engine.start();

		let mut paused = cfg.clone();
		paused.paused = true;
		engine.apply_config(paused.clone());

		let mut unpaused = paused;
		unpaused.paused = false;
		engine.apply_config(unpaused);

		engine.stop();
		assert_eq!(
			sink.events(),
			vec![
				SinkEvent::Hold("shift".to_string()),
				SinkEvent::Release("shift".to_string()),
				SinkEvent::Hold("shift".to_string()),
				SinkEvent::Release("shift".to_string()),
			]
		);
	}
}
