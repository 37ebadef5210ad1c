//! Fill-height estimation for resource bars and orbs.
//!
//! The estimate is deliberately not a raw pixel ratio: scattered matching
//! pixels anywhere in the region (spell particles, reflections) would inflate
//! that. Instead each row is classified filled/empty by the fraction of
//! matching pixels it contains, and the result is the longest contiguous run
//! of filled rows scanned from the bottom, as a percentage of all rows.

use crate::{DetectError, Hsv, HsvWindow, Image, Rect};

/// Which resource a region belongs to.
///
/// The tag carries two pieces of game calibration: HP is red, so its hue
/// windows wrap the 0/180 seam, and each orb has a known occluded half (HP
/// keeps the left half-disc, MP the right).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Hp,
    Mp,
}

/// Region geometry for a fill estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionShape {
    Rect(Rect),
    Circle { cx: u32, cy: u32, radius: u32 },
}

/// Minimum fraction of matching in-mask pixels for a row to count as filled.
const ROW_FILL_RATIO: f32 = 0.60;

pub(crate) fn fill_percent(
    frame: Image<'_>,
    shape: RegionShape,
    kind: ResourceKind,
    windows: &[HsvWindow],
) -> Result<f32, DetectError> {
    if windows.is_empty() {
        return Err(DetectError::NoColors);
    }

    let rows = match shape {
        RegionShape::Rect(rect) => rect_rows(frame, rect, kind, windows)?,
        RegionShape::Circle { cx, cy, radius } => circle_rows(frame, cx, cy, radius, kind, windows)?,
    };

    if rows.is_empty() {
        return Err(DetectError::EmptyRegion);
    }

    let run = longest_filled_run(&rows);
    Ok(run as f32 / rows.len() as f32 * 100.0)
}

fn matches_any(px: Hsv, kind: ResourceKind, windows: &[HsvWindow]) -> bool {
    match kind {
        // Red wraps the hue circle.
        ResourceKind::Hp => windows.iter().any(|w| w.contains_wrapped(px)),
        ResourceKind::Mp => windows.iter().any(|w| w.contains(px)),
    }
}

fn rect_rows(
    frame: Image<'_>,
    rect: Rect,
    kind: ResourceKind,
    windows: &[HsvWindow],
) -> Result<Vec<bool>, DetectError> {
    if !rect.fits_in(frame.width(), frame.height()) {
        return Err(DetectError::RegionOutOfBounds(rect));
    }

    let region = frame.sub_image(rect.x, rect.y, rect.w, rect.h);
    let mut rows = Vec::with_capacity(rect.h as usize);

    for y in 0..rect.h {
        let mut matching = 0u32;
        for x in 0..rect.w {
            if matches_any(Hsv::from(region.pixel(x, y)), kind, windows) {
                matching += 1;
            }
        }
        rows.push(matching as f32 / rect.w as f32 >= ROW_FILL_RATIO);
    }

    Ok(rows)
}

fn circle_rows(
    frame: Image<'_>,
    cx: u32,
    cy: u32,
    radius: u32,
    kind: ResourceKind,
    windows: &[HsvWindow],
) -> Result<Vec<bool>, DetectError> {
    if radius == 0 {
        return Err(DetectError::EmptyRegion);
    }

    let bounding = Rect::new(
        cx.wrapping_sub(radius),
        cy.wrapping_sub(radius),
        radius * 2 + 1,
        radius * 2 + 1,
    );
    if cx < radius || cy < radius || !bounding.fits_in(frame.width(), frame.height()) {
        return Err(DetectError::RegionOutOfBounds(bounding));
    }

    let r = radius as i64;
    let mut rows = Vec::with_capacity((2 * radius + 1) as usize);

    for dy in -r..=r {
        let y = (cy as i64 + dy) as u32;
        // Half-chord at this row.
        let dx = ((r * r - dy * dy) as f64).sqrt() as i64;

        // One side of each orb is occluded by other UI; only the known-clean
        // half-disc is sampled (HP: left, MP: right).
        let (x_start, x_end) = match kind {
            ResourceKind::Hp => (cx as i64 - dx, cx as i64),
            ResourceKind::Mp => (cx as i64, cx as i64 + dx),
        };

        let mut total = 0u32;
        let mut matching = 0u32;
        for x in x_start..=x_end {
            total += 1;
            if matches_any(Hsv::from(frame.pixel(x as u32, y)), kind, windows) {
                matching += 1;
            }
        }

        if total == 0 {
            continue;
        }
        rows.push(matching as f32 / total as f32 >= ROW_FILL_RATIO);
    }

    Ok(rows)
}

/// Longest contiguous run of filled rows, scanning bottom-up.
fn longest_filled_run(rows: &[bool]) -> usize {
    let mut best = 0usize;
    let mut current = 0usize;
    for &filled in rows.iter().rev() {
        if filled {
            current += 1;
            best = best.max(current);
        } else {
            current = 0;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Color, OwnedImage};

    const BLUE: Color = Color::new(20, 40, 230);
    const GREY: Color = Color::new(60, 60, 60);

    fn blue_window() -> HsvWindow {
        HsvWindow::new(Hsv::from(BLUE), 10, 60, 60)
    }

    /// A `w` x `h` frame whose bottom `filled_rows` rows are BLUE.
    fn bar_frame(w: u32, h: u32, filled_rows: u32) -> OwnedImage {
        let mut data = Vec::with_capacity((w * h) as usize);
        for y in 0..h {
            for _ in 0..w {
                data.push(if y >= h - filled_rows { BLUE } else { GREY });
            }
        }
        OwnedImage::from_pixels(w, h, data)
    }

    #[test]
    fn test_bottom_fill_is_exact() {
        let frame = bar_frame(10, 20, 7);
        let pct = fill_percent(
            frame.as_image(),
            RegionShape::Rect(Rect::new(0, 0, 10, 20)),
            ResourceKind::Mp,
            &[blue_window()],
        )
        .unwrap();
        assert_eq!(pct, 35.0);
    }

    #[test]
    fn test_scattered_pixels_do_not_count() {
        // 40% of each row matching is below the 60% row threshold, so a frame
        // full of scattered matches reads as empty.
        let mut data = Vec::new();
        for _ in 0..10 {
            for x in 0..10 {
                data.push(if x % 5 < 2 { BLUE } else { GREY });
            }
        }
        let frame = OwnedImage::from_pixels(10, 10, data);

        let pct = fill_percent(
            frame.as_image(),
            RegionShape::Rect(Rect::new(0, 0, 10, 10)),
            ResourceKind::Mp,
            &[blue_window()],
        )
        .unwrap();
        assert_eq!(pct, 0.0);
    }

    #[test]
    fn test_noise_above_liquid_line_tolerated() {
        // 6 filled bottom rows plus one stray filled row higher up: the
        // contiguous-run reduction must report the bottom run.
        let mut frame = bar_frame(10, 20, 6);
        let mut data = Vec::new();
        for y in 0..20 {
            for x in 0..10 {
                data.push(if y == 3 { BLUE } else { frame.as_image().pixel(x, y) });
            }
        }
        frame = OwnedImage::from_pixels(10, 20, data);

        let pct = fill_percent(
            frame.as_image(),
            RegionShape::Rect(Rect::new(0, 0, 10, 20)),
            ResourceKind::Mp,
            &[blue_window()],
        )
        .unwrap();
        assert_eq!(pct, 30.0);
    }

    #[test]
    fn test_hp_red_wraps_hue_seam() {
        // Rows of seam-red (hue just below 180) against an hp window centered
        // near hue 0; only the wrapped comparison can match them.
        let seam_red = Color::new(255, 0, 10);
        let mut data = Vec::new();
        for _ in 0..4 {
            for _ in 0..4 {
                data.push(seam_red);
            }
        }
        let frame = OwnedImage::from_pixels(4, 4, data);
        let window = HsvWindow::new(Hsv::new(2, 255, 255), 5, 40, 40);
        assert!(Hsv::from(seam_red).h > 170);

        let pct = fill_percent(
            frame.as_image(),
            RegionShape::Rect(Rect::new(0, 0, 4, 4)),
            ResourceKind::Hp,
            &[window],
        )
        .unwrap();
        assert_eq!(pct, 100.0);

        let pct_mp = fill_percent(
            frame.as_image(),
            RegionShape::Rect(Rect::new(0, 0, 4, 4)),
            ResourceKind::Mp,
            &[window],
        )
        .unwrap();
        assert_eq!(pct_mp, 0.0);
    }

    #[test]
    fn test_circle_half_disc_sides() {
        // Left half blue, right half grey. The MP orb samples the right
        // half-disc and should read far lower than an HP read of the left.
        let size = 21;
        let mut data = Vec::new();
        for _ in 0..size {
            for x in 0..size {
                data.push(if x <= size / 2 { BLUE } else { GREY });
            }
        }
        let frame = OwnedImage::from_pixels(size, size, data);
        let shape = RegionShape::Circle {
            cx: 10,
            cy: 10,
            radius: 8,
        };

        let hp = fill_percent(frame.as_image(), shape, ResourceKind::Hp, &[blue_window()]).unwrap();
        let mp = fill_percent(frame.as_image(), shape, ResourceKind::Mp, &[blue_window()]).unwrap();
        assert!(hp > 90.0, "hp read {hp}");
        assert!(mp < 10.0, "mp read {mp}");
    }

    #[test]
    fn test_circle_out_of_bounds() {
        let frame = bar_frame(10, 10, 0);
        let shape = RegionShape::Circle {
            cx: 2,
            cy: 2,
            radius: 5,
        };
        assert!(matches!(
            fill_percent(frame.as_image(), shape, ResourceKind::Hp, &[blue_window()]),
            Err(DetectError::RegionOutOfBounds(_))
        ));
    }

    #[test]
    fn test_no_colors_is_an_error() {
        let frame = bar_frame(4, 4, 4);
        assert!(matches!(
            fill_percent(
                frame.as_image(),
                RegionShape::Rect(Rect::new(0, 0, 4, 4)),
                ResourceKind::Mp,
                &[],
            ),
            Err(DetectError::NoColors)
        ));
    }
}
