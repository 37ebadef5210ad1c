//! HSV color space support.
//!
//! Hue uses the half-degree convention (0..180) so a full channel fits in a
//! byte; saturation and value span 0..=255. Detection happens in HSV because
//! cooldown overlays and lighting shifts mostly move V while leaving H stable.

use crate::{Color, Image};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct Hsv {
    /// Hue, 0..180 (half degrees).
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

impl Hsv {
    pub const fn new(h: u8, s: u8, v: u8) -> Self {
        Self { h, s, v }
    }
}

impl From<Color> for Hsv {
    fn from(c: Color) -> Self {
        let r = c.r as f32 / 255.0;
        let g = c.g as f32 / 255.0;
        let b = c.b as f32 / 255.0;

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;

        let h_deg = if delta <= f32::EPSILON {
            0.0
        } else if max == r {
            60.0 * ((g - b) / delta)
        } else if max == g {
            60.0 * ((b - r) / delta) + 120.0
        } else {
            60.0 * ((r - g) / delta) + 240.0
        };
        let h_deg = if h_deg < 0.0 { h_deg + 360.0 } else { h_deg };

        let s = if max <= f32::EPSILON {
            0.0
        } else {
            delta / max * 255.0
        };

        Self {
            h: ((h_deg / 2.0).round() as u16 % 180) as u8,
            s: s.round() as u8,
            v: (max * 255.0).round() as u8,
        }
    }
}

/// Plain hue distance, no wrap-around.
#[inline]
pub fn hue_delta(a: u8, b: u8) -> u8 {
    a.abs_diff(b)
}

/// Hue distance on the circle: `min(d, 180 - d)`.
///
/// Red sits on the 0/180 seam, so any red-ish comparison must wrap.
#[inline]
pub fn hue_delta_wrapped(a: u8, b: u8) -> u8 {
    let d = a.abs_diff(b);
    d.min(180 - d)
}

/// A tolerance window around a target HSV color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct HsvWindow {
    pub target: Hsv,
    pub tol_h: u8,
    pub tol_s: u8,
    pub tol_v: u8,
}

impl HsvWindow {
    pub const fn new(target: Hsv, tol_h: u8, tol_s: u8, tol_v: u8) -> Self {
        Self {
            target,
            tol_h,
            tol_s,
            tol_v,
        }
    }

    /// Containment with plain hue distance.
    pub fn contains(&self, px: Hsv) -> bool {
        hue_delta(px.h, self.target.h) <= self.tol_h
            && px.s.abs_diff(self.target.s) <= self.tol_s
            && px.v.abs_diff(self.target.v) <= self.tol_v
    }

    /// Containment with wrapped hue distance.
    ///
    /// Equivalent to unioning the window with its mirror across the 0/180
    /// seam; used for red (HP) so both ends of the hue circle count.
    pub fn contains_wrapped(&self, px: Hsv) -> bool {
        hue_delta_wrapped(px.h, self.target.h) <= self.tol_h
            && px.s.abs_diff(self.target.s) <= self.tol_s
            && px.v.abs_diff(self.target.v) <= self.tol_v
    }
}

/// Owned HSV raster, the stored form of a cached template.
#[derive(Debug, Clone)]
pub struct HsvImage {
    width: u32,
    height: u32,
    data: Vec<Hsv>,
}

impl HsvImage {
    pub fn from_image(img: Image<'_>) -> Self {
        let mut data = Vec::with_capacity((img.width() * img.height()) as usize);
        for y in 0..img.height() {
            for x in 0..img.width() {
                data.push(Hsv::from(img.pixel(x, y)));
            }
        }

        Self {
            width: img.width(),
            height: img.height(),
            data,
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> Hsv {
        debug_assert!(x < self.width && y < self.height);
        self.data[(x + y * self.width) as usize]
    }
}
