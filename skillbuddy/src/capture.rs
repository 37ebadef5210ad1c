use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use xcap::image::EncodableLayout;

/// Provider of the single most-recent captured frame.
pub trait FrameSource: Send + Sync {
	/// Callers pull at most once per tick and pass the same frame to every
	/// check in that tick, so all of them observe one moment in time.
	fn current_frame(&self) -> Option<Arc<dv::OwnedImage>>;
}

#[derive(Debug, Clone)]
pub struct WindowInfo {
	pub app_name: String,
	pub title: String,
}

pub fn list_windows() -> Result<Vec<WindowInfo>> {
	let windows = xcap::Window::all().context("enumerate windows")?;
	Ok(windows
		.into_iter()
		.filter_map(|window| {
			Some(WindowInfo {
				app_name: window.app_name().ok()?,
				title: window.title().ok().unwrap_or_default(),
			})
		})
		.collect())
}

pub fn find_window(app_name: &str) -> Option<xcap::Window> {
	let windows = xcap::Window::all().ok()?;
	windows
		.into_iter()
		.find(|window| window.app_name().ok().as_deref() == Some(app_name))
}

pub fn capture_window(app_name: &str) -> Option<dv::OwnedImage> {
	let window = find_window(app_name)?;
	let img = window.capture_image().ok()?;
	Some(dv::OwnedImage::from_rgba(img.width() as usize, img.as_bytes()))
}

/// Latest-frame slot shared by every detection tick.
///
/// A scheduled task calls [`FrameCache::refresh`]; everything else only reads.
pub struct FrameCache {
	app_name: Mutex<String>,
	latest: Mutex<Option<Arc<dv::OwnedImage>>>,
}

impl FrameCache {
	pub fn new(app_name: &str) -> Self {
		Self {
			app_name: Mutex::new(app_name.to_string()),
			latest: Mutex::new(None),
		}
	}

	pub fn set_window(&self, app_name: &str) {
		*self.app_name.lock().expect("frame cache lock poisoned") = app_name.to_string();
		// Frames from the previous window are meaningless now.
		*self.latest.lock().expect("frame cache lock poisoned") = None;
	}

	/// Capture the configured window and publish the frame.
	///
	/// On failure the slot is cleared: a vanished window must not leave a
	/// stale frame driving decisions.
	pub fn refresh(&self) -> bool {
		let app_name = self
			.app_name
			.lock()
			.expect("frame cache lock poisoned")
			.clone();

		let frame = if app_name.is_empty() {
			None
		} else {
			capture_window(&app_name)
		};

		let got = frame.is_some();
		*self.latest.lock().expect("frame cache lock poisoned") = frame.map(Arc::new);
		got
	}
}

impl FrameSource for FrameCache {
	fn current_frame(&self) -> Option<Arc<dv::OwnedImage>> {
		self.latest.lock().expect("frame cache lock poisoned").clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_unconfigured_cache_has_no_frame() {
		let cache = FrameCache::new("");
		assert!(!cache.refresh());
		assert!(cache.current_frame().is_none());
	}

	#[test]
	fn test_set_window_drops_previous_frame() {
		let cache = FrameCache::new("a");
		*cache.latest.lock().unwrap() =
			Some(Arc::new(dv::OwnedImage::from_pixels(1, 1, vec![dv::Color::WHITE])));
		assert!(cache.current_frame().is_some());

		cache.set_window("b");
		assert!(cache.current_frame().is_none());
	}
}
