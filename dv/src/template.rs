//! Named template cache.
//!
//! Entries are written once per prepare phase (session start or explicit
//! reload) and read many times per tick. The cache never invalidates on its
//! own; staleness is the caller's responsibility, and the only compaction is
//! the explicit [`TemplateCache::sweep`] the owner runs periodically.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::{HsvImage, OwnedImage, Rect};

pub(crate) struct TemplateEntry {
    pub hsv: HsvImage,
    pub rgb: OwnedImage,
    pub rect: Rect,
    pub captured_at: Instant,
}

#[derive(Default)]
pub(crate) struct TemplateCache {
    entries: HashMap<String, TemplateEntry>,
}

impl TemplateCache {
    pub fn insert(&mut self, name: String, entry: TemplateEntry) {
        self.entries.insert(name, entry);
    }

    pub fn get(&self, name: &str) -> Option<&TemplateEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TemplateEntry)> {
        self.entries.iter()
    }

    /// Drop entries older than `max_age`, then evict oldest-first down to
    /// `max_entries`. Returns the number of evicted entries.
    pub fn sweep(&mut self, max_entries: usize, max_age: Duration, now: Instant) -> usize {
        let before = self.entries.len();

        self.entries
            .retain(|_, e| now.duration_since(e.captured_at) <= max_age);

        while self.entries.len() > max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.captured_at)
                .map(|(name, _)| name.clone());
            match oldest {
                Some(name) => {
                    self.entries.remove(&name);
                }
                None => break,
            }
        }

        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Color;

    fn entry(captured_at: Instant) -> TemplateEntry {
        let rgb = OwnedImage::from_pixels(1, 1, vec![Color::WHITE]);
        TemplateEntry {
            hsv: HsvImage::from_image(rgb.as_image()),
            rgb,
            rect: Rect::new(0, 0, 1, 1),
            captured_at,
        }
    }

    #[test]
    fn test_sweep_age() {
        let mut cache = TemplateCache::default();
        let now = Instant::now();
        cache.insert("old".into(), entry(now - Duration::from_secs(100)));
        cache.insert("fresh".into(), entry(now));

        let evicted = cache.sweep(16, Duration::from_secs(50), now);
        assert_eq!(evicted, 1);
        assert!(cache.contains("fresh"));
        assert!(!cache.contains("old"));
    }

    #[test]
    fn test_sweep_caps_entry_count_oldest_first() {
        let mut cache = TemplateCache::default();
        let now = Instant::now();
        for i in 0..4u64 {
            cache.insert(format!("t{i}"), entry(now - Duration::from_secs(10 - i)));
        }

        let evicted = cache.sweep(2, Duration::from_secs(3600), now);
        assert_eq!(evicted, 2);
        assert_eq!(cache.names(), vec!["t2".to_string(), "t3".to_string()]);
    }
}
