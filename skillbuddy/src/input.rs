//! Key dispatch.
//!
//! Skill decisions produce fire-and-forget intents; a queue worker drains them
//! into a synthetic-input backend so detection ticks never block on the OS
//! input layer. Priority intents jump the queue, duplicates already pending
//! are dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use enigo::{Direction, Enigo, Keyboard, Settings};

/// Micro-sleep between the steps of a key sequence so the OS event loop
/// keeps up.
const INTER_KEY_DELAY: Duration = Duration::from_millis(5);

/// Where skill and resource decisions send their key intents.
pub trait ActionSink: Send + Sync {
	/// Queue a key press. `key` may be a single key name or a comma-joined
	/// sequence, which is dispatched in order as one unit.
	fn execute_key(&self, key: &str, priority: bool);
	/// Put a key physically down until released. One-shot; callers own the
	/// held-key lifecycle.
	fn hold_key(&self, key: &str);
	/// Release a held key.
	fn release_key(&self, key: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Intent {
	Press(Vec<String>),
	Hold(String),
	Release(String),
}

/// Synthetic-input implementation behind the queue.
pub trait KeyBackend: Send {
	fn tap(&mut self, key: &str) -> Result<()>;
	fn press(&mut self, key: &str) -> Result<()>;
	fn release(&mut self, key: &str) -> Result<()>;
}

#[derive(Default)]
struct QueueState {
	queue: VecDeque<Intent>,
	running: bool,
}

struct QueueShared {
	state: Mutex<QueueState>,
	cv: Condvar,
}

/// Deque of pending intents drained by a dedicated worker thread.
pub struct KeyQueue {
	shared: Arc<QueueShared>,
	worker: Mutex<Option<JoinHandle<()>>>,
}

impl KeyQueue {
	pub fn spawn(mut backend: Box<dyn KeyBackend>) -> Self {
		let shared = Arc::new(QueueShared {
			state: Mutex::new(QueueState {
				queue: VecDeque::new(),
				running: true,
			}),
			cv: Condvar::new(),
		});

		let shared_worker = shared.clone();
		let handle = std::thread::spawn(move || loop {
			let intent = {
				let mut state = shared_worker
					.state
					.lock()
					.expect("key queue lock poisoned");
				loop {
					if let Some(intent) = state.queue.pop_front() {
						break intent;
					}
					// Drained; exit only once shut down.
					if !state.running {
						return;
					}
					state = shared_worker
						.cv
						.wait(state)
						.expect("key queue lock poisoned during wait");
				}
			};

			if let Err(err) = dispatch(backend.as_mut(), &intent) {
				tracing::warn!(?intent, error = %err, "key dispatch failed");
			}
		});

		Self {
			shared,
			worker: Mutex::new(Some(handle)),
		}
	}

	/// Stop accepting intents, drain what is pending, and join the worker.
	pub fn stop(&self) {
		{
			let mut state = self.shared.state.lock().expect("key queue lock poisoned");
			state.running = false;
			self.shared.cv.notify_all();
		}

		let handle = self.worker.lock().expect("key queue lock poisoned").take();
		if let Some(handle) = handle {
			let _ = handle.join();
		}
	}

	fn enqueue(&self, intent: Intent, front: bool) {
		let mut state = self.shared.state.lock().expect("key queue lock poisoned");
		if !state.running {
			return;
		}
		// An identical pending intent would double the press; drop it.
		if state.queue.contains(&intent) {
			return;
		}
		if front {
			state.queue.push_front(intent);
		} else {
			state.queue.push_back(intent);
		}
		self.shared.cv.notify_all();
	}
}

impl ActionSink for KeyQueue {
	fn execute_key(&self, key: &str, priority: bool) {
		let keys: Vec<String> = key
			.split(',')
			.map(|k| k.trim().to_string())
			.filter(|k| !k.is_empty())
			.collect();
		if keys.is_empty() {
			return;
		}
		self.enqueue(Intent::Press(keys), priority);
	}

	fn hold_key(&self, key: &str) {
		let key = key.trim();
		if key.is_empty() {
			return;
		}
		self.enqueue(Intent::Hold(key.to_string()), false);
	}

	fn release_key(&self, key: &str) {
		let key = key.trim();
		if key.is_empty() {
			return;
		}
		self.enqueue(Intent::Release(key.to_string()), false);
	}
}

impl Drop for KeyQueue {
	fn drop(&mut self) {
		self.stop();
	}
}

fn dispatch(backend: &mut dyn KeyBackend, intent: &Intent) -> Result<()> {
	match intent {
		Intent::Press(keys) => {
			for (i, key) in keys.iter().enumerate() {
				if i > 0 {
					std::thread::sleep(INTER_KEY_DELAY);
				}
				backend.tap(key)?;
			}
			Ok(())
		}
		Intent::Hold(key) => backend.press(key),
		Intent::Release(key) => backend.release(key),
	}
}

// ----------

/// OS-level key synthesis via enigo.
pub struct EnigoBackend {
	enigo: Enigo,
}

impl EnigoBackend {
	pub fn new() -> Result<Self> {
		let enigo = Enigo::new(&Settings::default())
			.map_err(|err| anyhow!("failed to initialize input backend: {err}"))?;
		Ok(Self { enigo })
	}
}

impl KeyBackend for EnigoBackend {
	fn tap(&mut self, key: &str) -> Result<()> {
		let key = map_key(key)?;
		self.enigo
			.key(key, Direction::Click)
			.map_err(|err| anyhow!("key press failed: {err}"))
	}

	fn press(&mut self, key: &str) -> Result<()> {
		let key = map_key(key)?;
		self.enigo
			.key(key, Direction::Press)
			.map_err(|err| anyhow!("key hold failed: {err}"))
	}

	fn release(&mut self, key: &str) -> Result<()> {
		let key = map_key(key)?;
		self.enigo
			.key(key, Direction::Release)
			.map_err(|err| anyhow!("key release failed: {err}"))
	}
}

fn map_key(key: &str) -> Result<enigo::Key> {
	use enigo::Key;

	let k = key.trim().to_lowercase();
	Ok(match k.as_str() {
		"enter" | "return" => Key::Return,
		"tab" => Key::Tab,
		"escape" | "esc" => Key::Escape,
		"backspace" => Key::Backspace,
		"control" | "ctrl" => Key::Control,
		"shift" => Key::Shift,
		"alt" => Key::Alt,
		"meta" | "super" | "windows" => Key::Meta,
		"delete" | "del" => Key::Delete,
		"space" => Key::Space,
		"up" => Key::UpArrow,
		"down" => Key::DownArrow,
		"left" => Key::LeftArrow,
		"right" => Key::RightArrow,
		"f1" => Key::F1,
		"f2" => Key::F2,
		"f3" => Key::F3,
		"f4" => Key::F4,
		"f5" => Key::F5,
		"f6" => Key::F6,
		"f7" => Key::F7,
		"f8" => Key::F8,
		"f9" => Key::F9,
		"f10" => Key::F10,
		"f11" => Key::F11,
		"f12" => Key::F12,
		_ => {
			let mut chars = k.chars();
			match (chars.next(), chars.next()) {
				(Some(c), None) => Key::Unicode(c),
				_ => return Err(anyhow!("unsupported key: {key}")),
			}
		}
	})
}

// ----------
