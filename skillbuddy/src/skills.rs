//! Per-skill decision engine.
//!
//! Every tick a skill is either timer-driven (its own scheduled task) or
//! cooldown-driven (the shared icon check). A ready skill then runs its
//! execute condition and emits at most one key intent. Hold-mode skills are
//! lifecycle events handled on start/stop/config deltas, never inside ticks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::capture::FrameSource;
use crate::config::{ConditionProbe, ExecuteCondition, SkillConfig, TriggerMode};
use crate::input::ActionSink;
use crate::resources::ResourceChecker;
use crate::scheduler::TaskScheduler;

/// Icon match percentage at or above which a skill counts as ready.
///
/// Templates hold the ready state of an icon, so near-identity means "off
/// cooldown".
pub const READY_MATCH_PERCENT: f32 = 95.0;

/// Template cache name for a skill's cooldown icon.
pub fn template_name(skill: &str) -> String {
	format!("{skill}_cooldown")
}

fn timed_task_name(skill: &str) -> String {
	format!("timed_skill_{skill}")
}

/// Two-reading debounce for resource gates.
#[derive(Debug, Default, Clone, Copy)]
struct GateHistory {
	readings: [Option<bool>; 2],
}

impl GateHistory {
	fn push(&mut self, sufficient: bool) {
		self.readings = [self.readings[1], Some(sufficient)];
	}

	/// Sufficient only when both of the last two readings agree; a single
	/// flickered frame cannot flip the gate.
	fn sufficient(&self) -> bool {
		self.readings == [Some(true), Some(true)]
	}
}

struct SkillState {
	skills: BTreeMap<String, SkillConfig>,
	gate_history: HashMap<String, GateHistory>,
	/// Keys currently physically down for hold-mode skills.
	held: HashSet<String>,
	/// Holds applied (started and not paused).
	active: bool,
}

pub struct SkillManager {
	scheduler: Arc<TaskScheduler>,
	dv: Arc<dv::Dv>,
	sink: Arc<dyn ActionSink>,
	frames: Arc<dyn FrameSource>,
	resources: Arc<ResourceChecker>,
	state: Mutex<SkillState>,
}

impl SkillManager {
	pub fn new(
		scheduler: Arc<TaskScheduler>,
		dv: Arc<dv::Dv>,
		sink: Arc<dyn ActionSink>,
		frames: Arc<dyn FrameSource>,
		resources: Arc<ResourceChecker>,
	) -> Arc<Self> {
		Arc::new(Self {
			scheduler,
			dv,
			sink,
			frames,
			resources,
			state: Mutex::new(SkillState {
				skills: BTreeMap::new(),
				gate_history: HashMap::new(),
				held: HashSet::new(),
				active: false,
			}),
		})
	}

	/// Swap in a new skill mapping wholesale and reconcile side effects:
	/// per-skill timer tasks are added/removed/retimed by name, and hold-mode
	/// key deltas are applied as one-shot press/release events.
	pub fn apply_config(self: &Arc<Self>, new: BTreeMap<String, SkillConfig>) {
		let mut state = self.lock_state();

		let old_timers = timer_intervals(&state.skills);
		let new_timers = timer_intervals(&new);

		for name in old_timers.keys() {
			if !new_timers.contains_key(name) {
				self.scheduler.remove_task(&timed_task_name(name));
			}
		}
		for (name, interval) in &new_timers {
			let task = timed_task_name(name);
			if !self.scheduler.has_task(&task) {
				let weak = Arc::downgrade(self);
				let skill = name.clone();
				self.scheduler.add_task(
					&task,
					*interval,
					move || {
						if let Some(mgr) = weak.upgrade() {
							mgr.tick_timed(&skill);
						}
						Ok(())
					},
					false,
				);
			} else if old_timers.get(name) != Some(interval) {
				self.scheduler.update_task_interval(&task, *interval);
			}
		}

		let old_holds = hold_keys(&state.skills);
		let new_holds = hold_keys(&new);
		if state.active {
			for key in old_holds.difference(&new_holds) {
				self.sink.release_key(key);
				state.held.remove(key);
			}
			for key in new_holds.difference(&old_holds) {
				self.sink.hold_key(key);
				state.held.insert(key.clone());
			}
		}

		state.skills = new;

		let names: HashSet<String> = state.skills.keys().cloned().collect();
		state.gate_history.retain(|name, _| names.contains(name));
	}

	/// Shared tick over every enabled cooldown-driven skill.
	///
	/// One frame is pulled and every check in the tick reads it, so all icon
	/// and probe reads observe the same moment.
	pub fn check_cooldowns(&self) -> anyhow::Result<()> {
		let Some(frame) = self.frames.current_frame() else {
			return Ok(());
		};
		let frame = frame.as_image();

		let mut state = self.lock_state();

		// Priority-first so a priority skill's press reaches the queue ahead
		// of normal presses queued in the same tick.
		let mut order: Vec<(bool, String)> = state
			.skills
			.iter()
			.filter(|(_, cfg)| cfg.enabled && matches!(cfg.trigger, TriggerMode::CooldownIcon { .. }))
			.map(|(name, cfg)| (!cfg.priority, name.clone()))
			.collect();
		order.sort();

		for (_, name) in order {
			let Some(cfg) = state.skills.get(&name).cloned() else {
				continue;
			};
			self.evaluate(&mut state, frame, &name, &cfg);
		}
		Ok(())
	}

	/// Tick of one timer-driven skill.
	pub fn tick_timed(&self, name: &str) {
		let mut state = self.lock_state();
		let Some(cfg) = state.skills.get(name).cloned() else {
			return;
		};
		if !cfg.enabled {
			return;
		}

		match &cfg.condition {
			// The scheduler's interval already gates frequency; no frame needed.
			ExecuteCondition::Unconditional => {
				if !cfg.key.is_empty() {
					self.sink.execute_key(&cfg.key, cfg.priority);
				}
			}
			_ => {
				let Some(frame) = self.frames.current_frame() else {
					return;
				};
				self.evaluate(&mut state, frame.as_image(), name, &cfg);
			}
		}
	}

	/// Apply hold-mode keys and begin acting. One-shot: holds are never
	/// re-asserted by any per-tick loop.
	pub fn start(&self) {
		let mut state = self.lock_state();
		if state.active {
			return;
		}
		state.active = true;

		for key in hold_keys(&state.skills) {
			if state.held.insert(key.clone()) {
				self.sink.hold_key(&key);
			}
		}
	}

	/// Release every held key. Used on stop and on pause; a suspended
	/// assistant must not leave keys physically down.
	pub fn stop(&self) {
		let mut state = self.lock_state();
		if !state.active {
			return;
		}
		state.active = false;

		for key in state.held.drain() {
			self.sink.release_key(&key);
		}
	}

	fn evaluate(&self, state: &mut SkillState, frame: dv::Image<'_>, name: &str, cfg: &SkillConfig) {
		if cfg.key.is_empty() {
			return;
		}

		let ready = match &cfg.trigger {
			TriggerMode::CooldownIcon { region } if region.is_calibrated() => {
				match self
					.dv
					.icon_match_percent(frame, region.rect(), &template_name(name))
				{
					Ok(percent) => percent >= READY_MATCH_PERCENT,
					Err(err) => {
						// Fail-open: an unreadable icon must not block the
						// skill forever.
						tracing::debug!(skill = name, error = %err, "icon check unavailable; treating as ready");
						true
					}
				}
			}
			// An uncalibrated region cannot be checked; always ready.
			TriggerMode::CooldownIcon { .. } => true,
			_ => true,
		};
		if !ready {
			return;
		}

		match &cfg.condition {
			ExecuteCondition::Unconditional => self.sink.execute_key(&cfg.key, cfg.priority),
			ExecuteCondition::BuffGate { probe } => {
				// Inverted on purpose: the main key fires when the buff is
				// missing; a satisfied gate holds fire. No alternate key.
				if self.probe(frame, probe) == Some(false) {
					self.sink.execute_key(&cfg.key, cfg.priority);
				}
			}
			ExecuteCondition::ResourceGate { probe, alt_key } => {
				match self.probe(frame, probe) {
					Some(reading) => {
						let hist = state.gate_history.entry(name.to_string()).or_default();
						hist.push(reading);
						if hist.sufficient() {
							self.sink.execute_key(&cfg.key, cfg.priority);
						} else if !alt_key.is_empty() {
							self.sink.execute_key(alt_key, cfg.priority);
						}
					}
					// A missing reading is not evidence of insufficiency; it
					// neither presses nor enters the history.
					None => {}
				}
			}
		}
	}

	fn probe(&self, frame: dv::Image<'_>, probe: &ConditionProbe) -> Option<bool> {
		match probe {
			ConditionProbe::Pixel {
				x,
				y,
				color,
				tolerance,
			} => {
				let px = frame.get_pixel(*x, *y)?;
				Some(px.within_tolerance(*color, *tolerance))
			}
			ConditionProbe::Resource {
				kind,
				threshold_percent,
			} => {
				let percent = self.resources.measure(frame, *kind)?;
				Some(percent >= *threshold_percent)
			}
		}
	}

	fn lock_state(&self) -> std::sync::MutexGuard<'_, SkillState> {
		self.state.lock().expect("skill state lock poisoned")
	}
}

fn timer_intervals(skills: &BTreeMap<String, SkillConfig>) -> HashMap<String, Duration> {
	skills
		.iter()
		.filter_map(|(name, cfg)| match &cfg.trigger {
			TriggerMode::Timer { interval_ms } if cfg.enabled => {
				Some((name.clone(), Duration::from_millis(*interval_ms)))
			}
			_ => None,
		})
		.collect()
}

fn hold_keys(skills: &BTreeMap<String, SkillConfig>) -> HashSet<String> {
	skills
		.values()
		.filter(|cfg| cfg.enabled && matches!(cfg.trigger, TriggerMode::Hold) && !cfg.key.is_empty())
		.map(|cfg| cfg.key.clone())
		.collect()
}
