mod image;
pub use image::*;
mod hsv;
pub use hsv::*;
mod fill;
pub use fill::{RegionShape, ResourceKind};
mod icon;
mod template;

use std::sync::Mutex;
use std::time::{Duration, Instant};

use template::{TemplateCache, TemplateEntry};

/// A detection attempt that could not produce a reading.
///
/// Detection runs on every tick; none of these abort the decision loop. The
/// caller treats them as "no reading this tick" and applies its own policy.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("frame is empty")]
    EmptyFrame,
    #[error("region {0:?} is outside the frame bounds")]
    RegionOutOfBounds(Rect),
    #[error("no template cached under \"{0}\"")]
    MissingTemplate(String),
    #[error("template size does not match the requested region")]
    SizeMismatch,
    #[error("no colour windows configured")]
    NoColors,
    #[error("region resolves to zero sampled rows")]
    EmptyRegion,
}

/// The detection engine.
///
/// Owns the template cache exclusively; ticks read it, the prepare phase
/// writes it, and a periodic sweep compacts it. Nothing else mutates it.
pub struct Dv {
    cache: Mutex<TemplateCache>,
}

impl Dv {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(TemplateCache::default()),
        }
    }

    /// Snapshot `rect` out of `frame` into the cache under `name`.
    ///
    /// Part of the one-shot prepare phase; existing entries are overwritten.
    pub fn snapshot(&self, name: &str, frame: Image<'_>, rect: Rect) -> Result<(), DetectError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(DetectError::EmptyFrame);
        }
        if !rect.fits_in(frame.width(), frame.height()) {
            return Err(DetectError::RegionOutOfBounds(rect));
        }

        let rgb = frame.sub_image(rect.x, rect.y, rect.w, rect.h).to_owned_image();
        let hsv = HsvImage::from_image(rgb.as_image());

        self.lock_cache().insert(
            name.to_string(),
            TemplateEntry {
                hsv,
                rgb,
                rect,
                captured_at: Instant::now(),
            },
        );
        Ok(())
    }

    pub fn clear_templates(&self) {
        self.lock_cache().clear();
    }

    pub fn template_count(&self) -> usize {
        self.lock_cache().len()
    }

    pub fn template_names(&self) -> Vec<String> {
        self.lock_cache().names()
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.lock_cache().contains(name)
    }

    /// Percentage of pixels in `rect` matching the template cached under
    /// `name`, with fixed HSV tolerances.
    pub fn icon_match_percent(
        &self,
        frame: Image<'_>,
        rect: Rect,
        name: &str,
    ) -> Result<f32, DetectError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(DetectError::EmptyFrame);
        }

        let cache = self.lock_cache();
        let entry = cache
            .get(name)
            .ok_or_else(|| DetectError::MissingTemplate(name.to_string()))?;
        icon::match_percent(frame, rect, &entry.hsv)
    }

    /// Fill-height percentage of a resource region.
    ///
    /// Requires the region to have been prepared under `name`; an unprepared
    /// region is indistinguishable from a mis-typed one and reads as missing.
    pub fn fill_percent(
        &self,
        frame: Image<'_>,
        name: &str,
        shape: RegionShape,
        kind: ResourceKind,
        windows: &[HsvWindow],
    ) -> Result<f32, DetectError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(DetectError::EmptyFrame);
        }
        if !self.lock_cache().contains(name) {
            return Err(DetectError::MissingTemplate(name.to_string()));
        }

        fill::fill_percent(frame, shape, kind, windows)
    }

    /// Evict stale/excess templates. Returns the number of evicted entries.
    pub fn sweep(&self, max_entries: usize, max_age: Duration) -> usize {
        self.lock_cache().sweep(max_entries, max_age, Instant::now())
    }

    /// Write every cached template as `<name>.png` into `dir`.
    ///
    /// Calibration aid; returns the number of files written.
    pub fn dump_templates(&self, dir: &std::path::Path) -> anyhow::Result<usize> {
        std::fs::create_dir_all(dir)?;

        let cache = self.lock_cache();
        let mut written = 0usize;
        for (name, entry) in cache.iter() {
            let safe: String = name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
                .collect();
            entry.rgb.as_image().save_png(dir.join(format!("{safe}.png")))?;
            written += 1;
        }
        Ok(written)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, TemplateCache> {
        self.cache.lock().expect("template cache lock poisoned")
    }
}

impl Default for Dv {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_frame(w: u32, h: u32, color: Color) -> OwnedImage {
        OwnedImage::from_pixels(w, h, vec![color; (w * h) as usize])
    }

    #[test]
    fn test_snapshot_then_self_match_is_full() {
        let dv = Dv::new();
        let frame = flat_frame(16, 16, Color::new(180, 40, 90));
        let rect = Rect::new(4, 4, 8, 8);

        dv.snapshot("skill3_cooldown", frame.as_image(), rect).unwrap();

        // Feeding the identical frame back must report a perfect match.
        let pct = dv
            .icon_match_percent(frame.as_image(), rect, "skill3_cooldown")
            .unwrap();
        assert_eq!(pct, 100.0);
    }

    #[test]
    fn test_missing_template_is_typed() {
        let dv = Dv::new();
        let frame = flat_frame(8, 8, Color::WHITE);
        assert!(matches!(
            dv.icon_match_percent(frame.as_image(), Rect::new(0, 0, 4, 4), "nope"),
            Err(DetectError::MissingTemplate(_))
        ));
    }

    #[test]
    fn test_empty_frame_rejected() {
        let dv = Dv::new();
        let frame = OwnedImage::from_pixels(0, 0, vec![]);
        assert!(matches!(
            dv.icon_match_percent(frame.as_image(), Rect::new(0, 0, 4, 4), "x"),
            Err(DetectError::EmptyFrame)
        ));
    }

    #[test]
    fn test_fill_requires_prepared_region() {
        let dv = Dv::new();
        let frame = flat_frame(8, 8, Color::new(20, 40, 230));
        let windows = [HsvWindow::new(Hsv::from(Color::new(20, 40, 230)), 10, 40, 40)];

        let shape = RegionShape::Rect(Rect::new(0, 0, 8, 8));
        assert!(matches!(
            dv.fill_percent(frame.as_image(), "mp_region", shape, ResourceKind::Mp, &windows),
            Err(DetectError::MissingTemplate(_))
        ));

        dv.snapshot("mp_region", frame.as_image(), Rect::new(0, 0, 8, 8)).unwrap();
        let pct = dv
            .fill_percent(frame.as_image(), "mp_region", shape, ResourceKind::Mp, &windows)
            .unwrap();
        assert_eq!(pct, 100.0);
    }

    #[test]
    fn test_sweep_bounds_cache() {
        let dv = Dv::new();
        let frame = flat_frame(8, 8, Color::WHITE);
        for i in 0..6 {
            dv.snapshot(&format!("t{i}"), frame.as_image(), Rect::new(0, 0, 2, 2))
                .unwrap();
        }
        assert_eq!(dv.template_count(), 6);

        let evicted = dv.sweep(4, Duration::from_secs(3600));
        assert_eq!(evicted, 2);
        assert_eq!(dv.template_count(), 4);
    }
}
