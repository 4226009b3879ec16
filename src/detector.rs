use crate::bbox::{BBox, Ltrb};
use crate::detection::Detection;
use crate::error::Result;

use ndarray::prelude::*;
use tracing::debug;

const NORM_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const NORM_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Single-object localizer run on a square crop.
///
/// Receives a normalized `(channels, size, size)` crop and returns candidate
/// boxes in crop pixel coordinates.
pub trait Detector {
    fn localize(&self, crop: ArrayView3<'_, f32>) -> Result<Vec<Detection>>;
}

impl<D: Detector + ?Sized> Detector for &D {
    fn localize(&self, crop: ArrayView3<'_, f32>) -> Result<Vec<Detection>> {
        (**self).localize(crop)
    }
}

/// Square window around `expected`, enlarged by `expansion`, as `(minx, miny, side)`
pub fn crop_window(expected: &BBox<Ltrb>, expansion: f64) -> (f64, f64, f64) {
    let side = expected.width().max(expected.height()) * expansion;
    let cx = (expected.left() + expected.right()) / 2.0;
    let cy = (expected.top() + expected.bottom()) / 2.0;

    (cx - side / 2.0, cy - side / 2.0, side)
}

/// Bilinear resample of a frame window into a normalized channel-first crop.
///
/// `frame` is `(height, width, channels)`; samples falling outside are zero.
pub fn resample(
    frame: ArrayView3<'_, u8>,
    minx: f64,
    miny: f64,
    side: f64,
    crop_size: usize,
) -> Array3<f32> {
    let (fh, fw, channels) = frame.dim();
    let mut out = Array3::<f32>::zeros((channels, crop_size, crop_size));
    let step = side / crop_size as f64;

    let pixel = |r: isize, c: isize, ch: usize| -> f32 {
        if r < 0 || c < 0 || r as usize >= fh || c as usize >= fw {
            0.0
        } else {
            frame[[r as usize, c as usize, ch]] as f32 / 255.0
        }
    };

    for i in 0..crop_size {
        let sy = miny + (i as f64 + 0.5) * step - 0.5;
        let y0 = sy.floor();
        let wy = (sy - y0) as f32;

        for j in 0..crop_size {
            let sx = minx + (j as f64 + 0.5) * step - 0.5;
            let x0 = sx.floor();
            let wx = (sx - x0) as f32;
            let (r, c) = (y0 as isize, x0 as isize);

            for ch in 0..channels {
                let top = pixel(r, c, ch) * (1.0 - wx) + pixel(r, c + 1, ch) * wx;
                let bottom = pixel(r + 1, c, ch) * (1.0 - wx) + pixel(r + 1, c + 1, ch) * wx;
                let v = top * (1.0 - wy) + bottom * wy;

                out[[ch, i, j]] = match (NORM_MEAN.get(ch), NORM_STD.get(ch)) {
                    (Some(m), Some(s)) => (v - m) / s,
                    _ => v,
                };
            }
        }
    }

    out
}

/// Runs `detector` on a square crop around `expected` and maps the most
/// confident box back to frame coordinates.
///
/// Returns `None` only when the detector produced no candidates at all;
/// low-confidence answers are accepted as they are.
pub fn crop_detect<D: Detector + ?Sized>(
    detector: &D,
    frame: ArrayView3<'_, u8>,
    expected: &BBox<Ltrb>,
    expansion: f64,
    crop_size: usize,
) -> Result<Option<BBox<Ltrb>>> {
    let (minx, miny, side) = crop_window(expected, expansion);
    let crop = resample(frame, minx, miny, side, crop_size);

    let best = detector
        .localize(crop.view())?
        .into_iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence));

    Ok(best.map(|det| {
        debug!("Crop detection confidence {:.3}", det.confidence);

        let k = side / crop_size as f64;
        let b = det.ltrb();

        BBox::ltrb(
            b.left() * k + minx,
            b.top() * k + miny,
            b.right() * k + minx,
            b.bottom() * k + miny,
        )
    }))
}
