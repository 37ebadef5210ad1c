//! Cooldown icon matching.
//!
//! A cached template holds the *ready* state of a skill icon. Per check we cut
//! the configured square out of the current frame and count pixels that land
//! inside fixed per-channel HSV tolerances. The caller decides readiness from
//! the returned percentage.

use crate::{hue_delta_wrapped, DetectError, HsvImage, Hsv, Image, Rect};

const TOL_H: u8 = 10;
const TOL_S: u8 = 20;
const TOL_V: u8 = 25;

pub(crate) fn match_percent(
    frame: Image<'_>,
    rect: Rect,
    template: &HsvImage,
) -> Result<f32, DetectError> {
    if !rect.fits_in(frame.width(), frame.height()) {
        return Err(DetectError::RegionOutOfBounds(rect));
    }
    if template.width() != rect.w || template.height() != rect.h {
        return Err(DetectError::SizeMismatch);
    }

    let region = frame.sub_image(rect.x, rect.y, rect.w, rect.h);
    let total = (rect.w * rect.h) as f32;
    let mut matching = 0u32;

    for y in 0..rect.h {
        for x in 0..rect.w {
            let px = Hsv::from(region.pixel(x, y));
            let t = template.pixel(x, y);
            if hue_delta_wrapped(px.h, t.h) <= TOL_H
                && px.s.abs_diff(t.s) <= TOL_S
                && px.v.abs_diff(t.v) <= TOL_V
            {
                matching += 1;
            }
        }
    }

    Ok(matching as f32 / total * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Color, OwnedImage};

    fn checkerboard(w: u32, h: u32) -> OwnedImage {
        let mut data = Vec::with_capacity((w * h) as usize);
        for y in 0..h {
            for x in 0..w {
                data.push(if (x + y) % 2 == 0 {
                    Color::new(200, 160, 40)
                } else {
                    Color::new(30, 90, 150)
                });
            }
        }
        OwnedImage::from_pixels(w, h, data)
    }

    #[test]
    fn test_identical_frame_matches_fully() {
        let frame = checkerboard(8, 8);
        let rect = Rect::new(2, 2, 4, 4);
        let template = HsvImage::from_image(
            frame.as_image().sub_image(rect.x, rect.y, rect.w, rect.h),
        );

        let pct = match_percent(frame.as_image(), rect, &template).unwrap();
        assert_eq!(pct, 100.0);
    }

    #[test]
    fn test_darkened_region_fails_value_tolerance() {
        let frame = checkerboard(8, 8);
        let rect = Rect::new(0, 0, 4, 4);
        let template = HsvImage::from_image(
            frame.as_image().sub_image(rect.x, rect.y, rect.w, rect.h),
        );

        // A cooldown overlay darkens the icon well past the V tolerance.
        let mut dark = Vec::new();
        for y in 0..8 {
            for x in 0..8 {
                let c = frame.as_image().pixel(x, y);
                dark.push(Color::new(c.r / 3, c.g / 3, c.b / 3));
            }
        }
        let dark = OwnedImage::from_pixels(8, 8, dark);

        let pct = match_percent(dark.as_image(), rect, &template).unwrap();
        assert!(pct < 5.0, "got {pct}");
    }

    #[test]
    fn test_out_of_bounds_region() {
        let frame = checkerboard(8, 8);
        let rect = Rect::new(6, 6, 4, 4);
        let template = HsvImage::from_image(frame.as_image().sub_image(0, 0, 4, 4));

        assert!(matches!(
            match_percent(frame.as_image(), rect, &template),
            Err(DetectError::RegionOutOfBounds(_))
        ));
    }

    #[test]
    fn test_template_size_mismatch() {
        let frame = checkerboard(8, 8);
        let template = HsvImage::from_image(frame.as_image().sub_image(0, 0, 3, 3));

        assert!(matches!(
            match_percent(frame.as_image(), Rect::new(0, 0, 4, 4), &template),
            Err(DetectError::SizeMismatch)
        ));
    }
}
