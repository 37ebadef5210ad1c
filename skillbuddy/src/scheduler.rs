//! Cooperative task scheduler.
//!
//! One background thread drives every periodic job in the application; no
//! other component owns a timer thread. Tasks are named, independently timed,
//! and can be added, removed, or retimed while the loop is running.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub type TaskFn = Box<dyn FnMut() -> anyhow::Result<()> + Send>;

/// First run delay for `start_immediately` tasks.
const FIRST_RUN_DELAY: Duration = Duration::from_millis(10);
/// Wait bound while paused or idle, so control calls are observed promptly.
const IDLE_WAIT: Duration = Duration::from_millis(100);
/// How long `stop()` waits for an in-flight callback before detaching.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
/// Stale heap entries tolerated before a full rebuild.
const COMPACT_THRESHOLD: usize = 32;

struct Task {
	interval: Duration,
	next_run: Instant,
	generation: u64,
	/// Taken out while the callback executes, restored afterwards.
	callback: Option<TaskFn>,
}

#[derive(PartialEq, Eq)]
struct HeapEntry {
	next_run: Instant,
	generation: u64,
	name: String,
}

impl Ord for HeapEntry {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.next_run
			.cmp(&other.next_run)
			.then_with(|| self.name.cmp(&other.name))
	}
}

impl PartialOrd for HeapEntry {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

#[derive(Default)]
struct SchedState {
	tasks: HashMap<String, Task>,
	/// Min-heap by next run time. Entries for removed or retimed tasks stay
	/// behind and are discarded lazily when they surface.
	heap: BinaryHeap<Reverse<HeapEntry>>,
	paused: bool,
	running: bool,
	stale: usize,
}

struct Shared {
	state: Mutex<SchedState>,
	cv: Condvar,
}

struct Worker {
	handle: JoinHandle<()>,
	done_rx: mpsc::Receiver<()>,
}

pub struct TaskScheduler {
	shared: Arc<Shared>,
	worker: Mutex<Option<Worker>>,
}

impl TaskScheduler {
	pub fn new() -> Self {
		Self {
			shared: Arc::new(Shared {
				state: Mutex::new(SchedState::default()),
				cv: Condvar::new(),
			}),
			worker: Mutex::new(None),
		}
	}

	/// Register a periodic task. Returns false if `name` is already taken.
	///
	/// `start_immediately` schedules the first run ~10ms out instead of one
	/// full interval out.
	pub fn add_task(
		&self,
		name: &str,
		interval: Duration,
		callback: impl FnMut() -> anyhow::Result<()> + Send + 'static,
		start_immediately: bool,
	) -> bool {
		let mut state = self.lock_state();
		if state.tasks.contains_key(name) {
			return false;
		}

		let delay = if start_immediately { FIRST_RUN_DELAY } else { interval };
		let next_run = Instant::now() + delay;
		state.tasks.insert(
			name.to_string(),
			Task {
				interval,
				next_run,
				generation: 0,
				callback: Some(Box::new(callback)),
			},
		);
		state.heap.push(Reverse(HeapEntry {
			next_run,
			generation: 0,
			name: name.to_string(),
		}));
		self.shared.cv.notify_all();
		true
	}

	/// Unregister a task. Idempotent; false if absent.
	pub fn remove_task(&self, name: &str) -> bool {
		let mut state = self.lock_state();
		if state.tasks.remove(name).is_none() {
			return false;
		}
		state.stale += 1;
		if state.stale > COMPACT_THRESHOLD {
			Self::rebuild_heap(&mut state);
		}
		self.shared.cv.notify_all();
		true
	}

	/// Retime a task: its next run becomes `now + new_interval`.
	pub fn update_task_interval(&self, name: &str, new_interval: Duration) -> bool {
		let mut state = self.lock_state();
		let now = Instant::now();
		let Some(task) = state.tasks.get_mut(name) else {
			return false;
		};
		task.interval = new_interval;
		task.next_run = now + new_interval;
		task.generation += 1;
		Self::rebuild_heap(&mut state);
		self.shared.cv.notify_all();
		true
	}

	/// Freeze execution of every task. Registrations are kept.
	pub fn pause(&self) {
		let mut state = self.lock_state();
		state.paused = true;
		self.shared.cv.notify_all();
	}

	/// Undo [`TaskScheduler::pause`]. Every task's next run is pushed out to
	/// `now + interval`, so intervals that elapsed while paused fire once at
	/// most, never as a backlog burst.
	pub fn resume(&self) {
		let mut state = self.lock_state();
		if !state.paused {
			return;
		}
		state.paused = false;
		let now = Instant::now();
		for task in state.tasks.values_mut() {
			task.next_run = now + task.interval;
			task.generation += 1;
		}
		Self::rebuild_heap(&mut state);
		self.shared.cv.notify_all();
	}

	/// Drop every registered task. Used on full reconfiguration.
	pub fn clear_all_tasks(&self) {
		let mut state = self.lock_state();
		state.tasks.clear();
		state.heap.clear();
		state.stale = 0;
		self.shared.cv.notify_all();
	}

	pub fn has_task(&self, name: &str) -> bool {
		self.lock_state().tasks.contains_key(name)
	}

	pub fn task_count(&self) -> usize {
		self.lock_state().tasks.len()
	}

	/// Spawn the execution thread. No-op if already started.
	pub fn start(&self) {
		let mut worker = self.worker.lock().expect("scheduler worker lock poisoned");
		if worker.is_some() {
			return;
		}

		self.lock_state().running = true;

		let shared = self.shared.clone();
		let (done_tx, done_rx) = mpsc::channel();
		let handle = std::thread::spawn(move || {
			run_loop(&shared);
			let _ = done_tx.send(());
		});
		*worker = Some(Worker { handle, done_rx });
	}

	/// Signal the loop to exit and wait for it, bounded.
	///
	/// A callback that never returns can hold the thread past the timeout; in
	/// that case the thread is left detached and shutdown proceeds anyway.
	pub fn stop(&self) {
		{
			let mut state = self.lock_state();
			state.running = false;
			self.shared.cv.notify_all();
		}

		let taken = self
			.worker
			.lock()
			.expect("scheduler worker lock poisoned")
			.take();
		let Some(worker) = taken else {
			return;
		};

		match worker.done_rx.recv_timeout(STOP_JOIN_TIMEOUT) {
			Ok(()) => {
				let _ = worker.handle.join();
			}
			Err(_) => {
				tracing::warn!(
					timeout = ?STOP_JOIN_TIMEOUT,
					"scheduler thread did not stop in time; detaching"
				);
			}
		}
	}

	fn rebuild_heap(state: &mut SchedState) {
		state.heap = state
			.tasks
			.iter()
			.map(|(name, task)| {
				Reverse(HeapEntry {
					next_run: task.next_run,
					generation: task.generation,
					name: name.clone(),
				})
			})
			.collect();
		state.stale = 0;
	}

	fn lock_state(&self) -> std::sync::MutexGuard<'_, SchedState> {
		self.shared.state.lock().expect("scheduler state lock poisoned")
	}
}

impl Default for TaskScheduler {
	fn default() -> Self {
		Self::new()
	}
}

impl Drop for TaskScheduler {
	fn drop(&mut self) {
		self.stop();
	}
}

fn run_loop(shared: &Shared) {
	enum Due {
		Not(Duration),
		Stale,
		Ready,
	}

	let mut state = shared.state.lock().expect("scheduler state lock poisoned");
	loop {
		if !state.running {
			return;
		}

		if state.paused || state.heap.is_empty() {
			state = shared
				.cv
				.wait_timeout(state, IDLE_WAIT)
				.expect("scheduler state lock poisoned during wait")
				.0;
			continue;
		}

		let due = {
			let Reverse(top) = state.heap.peek().expect("heap checked non-empty");
			let valid = state
				.tasks
				.get(&top.name)
				.is_some_and(|t| t.generation == top.generation);
			if !valid {
				Due::Stale
			} else {
				let now = Instant::now();
				if top.next_run > now {
					Due::Not(top.next_run - now)
				} else {
					Due::Ready
				}
			}
		};

		match due {
			Due::Stale => {
				state.heap.pop();
				state.stale = state.stale.saturating_sub(1);
				continue;
			}
			Due::Not(dur) => {
				state = shared
					.cv
					.wait_timeout(state, dur)
					.expect("scheduler state lock poisoned during wait")
					.0;
				continue;
			}
			Due::Ready => {}
		}

		let Reverse(entry) = state.heap.pop().expect("heap checked non-empty");
		let (next_run, generation, callback) = {
			let Some(task) = state.tasks.get_mut(&entry.name) else {
				continue;
			};
			// Fixed-interval scheduling: a slow callback makes the next
			// firing immediate rather than skipped.
			task.next_run = entry.next_run + task.interval;
			(task.next_run, task.generation, task.callback.take())
		};
		state.heap.push(Reverse(HeapEntry {
			next_run,
			generation,
			name: entry.name.clone(),
		}));
		let Some(mut callback) = callback else {
			continue;
		};
		drop(state);

		// Run outside the lock so a slow callback cannot block add/remove
		// calls from other threads. Failures never take the loop down.
		match catch_unwind(AssertUnwindSafe(|| callback())) {
			Ok(Ok(())) => {}
			Ok(Err(err)) => tracing::warn!(task = %entry.name, error = %err, "task failed"),
			Err(_) => tracing::warn!(task = %entry.name, "task panicked"),
		}

		state = shared.state.lock().expect("scheduler state lock poisoned");
		if let Some(task) = state.tasks.get_mut(&entry.name) {
			task.callback = Some(callback);
		}
	}
}
