use crate::bbox::{BBox, Ltrb};
use crate::config::AlignerConfig;
use crate::error::Result;
use crate::record::StateBox;
use crate::transform::{extents, Homography, ImagePolygon};

use nalgebra as na;
use ndarray::prelude::*;

const MAX_ROUNDS: usize = 64;

/// What a candidate projection is compared against
#[derive(Debug, Clone, PartialEq)]
pub enum AlignTarget {
    /// A 2D image box, compared with the extents of the projected volume
    Extents(BBox<Ltrb>),
    /// Projected ground corners fbr, fbl, bbr, bbl of a reference box
    Footprint([na::Point2<f64>; 4]),
}

impl AlignTarget {
    /// Ground corners of `state` as projected by `hg`
    pub fn footprint_of<H: Homography + ?Sized>(
        hg: &H,
        camera: &str,
        state: &StateBox,
    ) -> Result<Option<Self>> {
        let poly = hg.state_to_image(&[*state], camera)?;

        Ok(poly
            .first()
            .map(|p| AlignTarget::Footprint([p[0], p[1], p[2], p[3]])))
    }

    /// Mean squared pixel error
    pub fn error(&self, poly: &ImagePolygon) -> f64 {
        match self {
            AlignTarget::Extents(bbox) => extents(poly).mse(bbox),
            AlignTarget::Footprint(corners) => {
                corners
                    .iter()
                    .zip(poly.iter())
                    .map(|(a, b)| na::distance_squared(a, b) / 2.0)
                    .sum::<f64>()
                    / 4.0
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alignment {
    pub x: f64,
    pub y: f64,
    /// Mean squared pixel error at `(x, y)`
    pub error: f64,
}

impl Alignment {
    #[inline]
    pub fn rms(&self) -> f64 {
        self.error.sqrt()
    }
}

/// Local grid search for the ground position whose projection best matches a target.
///
/// The window starts `initial_radius` feet around the guess, is recentred on the
/// best candidate after each round and shrinks until it reaches `min_radius`.
/// Targets further than the first window from the guess are not found; the best
/// candidate seen is returned instead.
#[derive(Debug, Clone, Default)]
pub struct BoxAligner {
    config: AlignerConfig,
}

impl BoxAligner {
    pub fn new(config: AlignerConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &AlignerConfig {
        &self.config
    }

    pub fn align<H: Homography + ?Sized>(
        &self,
        hg: &H,
        camera: &str,
        template: &StateBox,
        start: na::Point2<f64>,
        target: &AlignTarget,
    ) -> Result<Alignment> {
        let n = self.config.grid_size.max(2);
        let shrink = if self.config.shrink_factor > 1.0 {
            self.config.shrink_factor
        } else {
            AlignerConfig::default().shrink_factor
        };

        let mut best = self.evaluate(hg, camera, template, start, target)?;
        let mut radius = self.config.initial_radius;
        let mut rounds = 0;

        while radius > self.config.min_radius && rounds < MAX_ROUNDS {
            let center = na::Point2::new(best.x, best.y);
            let xs = Array1::linspace(center.x - radius, center.x + radius, n);
            let ys = Array1::linspace(center.y - radius, center.y + radius, n);

            let candidates: Vec<StateBox> = xs
                .iter()
                .flat_map(|x| ys.iter().map(move |y| template.at(*x, *y)))
                .collect();

            let polys = hg.state_to_image(&candidates, camera)?;
            let errors: Array1<f64> = polys.iter().map(|p| target.error(p)).collect();

            let argmin = errors
                .indexed_iter()
                .filter(|(_, e)| e.is_finite())
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map(|(idx, e)| (idx, *e));

            if let Some((idx, error)) = argmin {
                if error <= best.error || !best.error.is_finite() {
                    best = Alignment {
                        x: xs[idx / n],
                        y: ys[idx % n],
                        error,
                    };
                }
            }

            radius /= shrink;
            rounds += 1;
        }

        Ok(best)
    }

    fn evaluate<H: Homography + ?Sized>(
        &self,
        hg: &H,
        camera: &str,
        template: &StateBox,
        at: na::Point2<f64>,
        target: &AlignTarget,
    ) -> Result<Alignment> {
        let error = hg
            .state_to_image(&[template.at(at.x, at.y)], camera)?
            .first()
            .map(|p| target.error(p))
            .unwrap_or(f64::INFINITY);

        Ok(Alignment {
            x: at.x,
            y: at.y,
            error,
        })
    }
}
