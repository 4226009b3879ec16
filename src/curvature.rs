//! Per-camera lane curvature correction of the lateral state coordinate.
//!
//! Each camera and travel direction carries a quadratic `a·x² + b·x + c`
//! fitted to ground-plane points clicked along a lane line. Applying the
//! correction subtracts the fitted offset from a record's `y`; the subtracted
//! amount is kept on the record so the raw position can always be recovered.

use crate::math::{poly2, quadratic_ls};
use crate::record::{Direction, ObjectRecord};

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CurveFit {
    /// `[a, b, c]`, all zero when no correction applies
    pub coefficients: [f64; 3],
    /// Straight-line lane origin subtracted for westbound lanes
    pub reference: f64,
    #[serde(default)]
    pub points: Vec<na::Point2<f64>>,
}

impl CurveFit {
    #[inline]
    pub fn offset(&self, x: f64) -> f64 {
        poly2(&self.coefficients, x) - self.reference
    }

    #[inline]
    pub fn is_fitted(&self) -> bool {
        self.coefficients != [0.0; 3]
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CameraCurves {
    pub eastbound: CurveFit,
    pub westbound: CurveFit,
}

impl CameraCurves {
    #[inline]
    fn get(&self, direction: Direction) -> &CurveFit {
        match direction {
            Direction::Eastbound => &self.eastbound,
            Direction::Westbound => &self.westbound,
        }
    }

    #[inline]
    fn get_mut(&mut self, direction: Direction) -> &mut CurveFit {
        match direction {
            Direction::Eastbound => &mut self.eastbound,
            Direction::Westbound => &mut self.westbound,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CurvatureModel {
    curves: BTreeMap<String, CameraCurves>,
}

impl CurvatureModel {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn fit(&self, camera: &str, direction: Direction) -> Option<&CurveFit> {
        self.curves.get(camera).map(|c| c.get(direction))
    }

    /// Records a clicked lane point and refits once `min_points` are available.
    ///
    /// Returns true when the coefficients were refit.
    pub fn add_point(
        &mut self,
        camera: &str,
        direction: Direction,
        point: na::Point2<f64>,
        reference: f64,
        min_points: usize,
    ) -> bool {
        let fit = self
            .curves
            .entry(camera.to_string())
            .or_default()
            .get_mut(direction);

        fit.points.push(point);

        if fit.points.len() < min_points.max(3) {
            return false;
        }

        let xs = na::DVector::from_iterator(fit.points.len(), fit.points.iter().map(|p| p.x));
        let ys = na::DVector::from_iterator(fit.points.len(), fit.points.iter().map(|p| p.y));

        match quadratic_ls(&xs, &ys) {
            Some(params) => {
                fit.coefficients = [params[0], params[1], params[2]];
                fit.reference = match direction {
                    Direction::Eastbound => 0.0,
                    Direction::Westbound => reference,
                };
                info!(
                    "Fit {} poly params for camera {}: {:?}",
                    direction.tag(),
                    camera,
                    fit.coefficients
                );
                true
            }
            None => {
                warn!(
                    "Degenerate curve points for camera {} {}, keeping previous fit",
                    camera,
                    direction.tag()
                );
                false
            }
        }
    }

    /// Forgets the clicked points and disables the correction
    pub fn clear(&mut self, camera: &str, direction: Direction) {
        if let Some(curves) = self.curves.get_mut(camera) {
            *curves.get_mut(direction) = CurveFit::default();
        }
    }

    /// Lateral offset at `x`, zero for cameras without a fit
    pub fn offset(&self, camera: &str, direction: Direction, x: f64) -> f64 {
        self.fit(camera, direction)
            .map(|f| f.offset(x))
            .unwrap_or(0.0)
    }

    /// Re-derives `y` from the record's raw lateral position under the current fit
    pub fn apply(&self, record: &mut ObjectRecord) {
        let offset = self.offset(&record.camera, record.direction, record.x);
        if offset == record.lateral_offset {
            return;
        }

        let raw = record.y + record.lateral_offset;
        record.y = raw - offset;
        record.lateral_offset = offset;
    }

    /// The record as it was before correction, used for drawing
    pub fn invert(&self, record: &ObjectRecord) -> ObjectRecord {
        let mut raw = record.clone();
        raw.y += raw.lateral_offset;
        raw.lateral_offset = 0.0;
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::record;
    use approx::assert_abs_diff_eq;

    fn lane(model: &mut CurvatureModel, direction: Direction, coefficients: [f64; 3]) {
        for i in 0..6 {
            let x = i as f64 * 40.0;
            model.add_point(
                "p1c1",
                direction,
                na::Point2::new(x, poly2(&coefficients, x)),
                72.0,
                4,
            );
        }
    }

    #[test]
    fn fit_waits_for_min_points() {
        let mut model = CurvatureModel::new();
        for i in 0..3 {
            let refit = model.add_point(
                "p1c1",
                Direction::Eastbound,
                na::Point2::new(i as f64 * 10.0, 5.0),
                0.0,
                4,
            );
            assert!(!refit);
        }

        assert!(!model.fit("p1c1", Direction::Eastbound).unwrap().is_fitted());
        assert!(model.add_point(
            "p1c1",
            Direction::Eastbound,
            na::Point2::new(40.0, 5.0),
            0.0,
            4
        ));
    }

    #[test]
    fn apply_then_invert_restores_record() {
        let mut model = CurvatureModel::new();
        lane(&mut model, Direction::Eastbound, [0.0002, -0.03, 4.0]);

        let original = record("p1c1", 1, 130.0, 21.5, 1.0);
        let mut corrected = original.clone();
        model.apply(&mut corrected);

        let expected = 21.5 - poly2(&[0.0002, -0.03, 4.0], 130.0);
        assert_abs_diff_eq!(corrected.y, expected, epsilon = 1e-4);

        let restored = model.invert(&corrected);
        assert_abs_diff_eq!(restored.y, original.y, epsilon = 1e-9);
        assert_eq!(restored.lateral_offset, 0.0);
        assert_eq!(restored.x, original.x);
    }

    #[test]
    fn apply_is_idempotent() {
        let mut model = CurvatureModel::new();
        lane(&mut model, Direction::Eastbound, [0.0001, 0.02, -3.0]);

        let mut once = record("p1c1", 1, 75.0, 30.0, 1.0);
        model.apply(&mut once);
        let mut twice = once.clone();
        model.apply(&mut twice);

        assert_abs_diff_eq!(once.y, twice.y, epsilon = 1e-9);
    }

    #[test]
    fn westbound_keeps_straight_reference() {
        let mut model = CurvatureModel::new();
        lane(&mut model, Direction::Westbound, [0.0, 0.0, 75.0]);

        let mut r = record("p1c1", 1, 100.0, 80.0, 1.0);
        r.direction = Direction::Westbound;
        model.apply(&mut r);

        assert_abs_diff_eq!(r.y, 80.0 - (75.0 - 72.0), epsilon = 1e-4);
    }

    #[test]
    fn clear_disables_correction() {
        let mut model = CurvatureModel::new();
        lane(&mut model, Direction::Westbound, [0.0001, 0.0, 75.0]);
        model.clear("p1c1", Direction::Westbound);

        let fit = model.fit("p1c1", Direction::Westbound).unwrap();
        assert_eq!(fit.coefficients, [0.0; 3]);
        assert!(fit.points.is_empty());
        assert_eq!(model.offset("p1c1", Direction::Westbound, 500.0), 0.0);
    }

    #[test]
    fn unfitted_camera_has_no_offset() {
        let model = CurvatureModel::new();
        let mut r = record("p3c2", 1, 100.0, 20.0, 1.0);
        model.apply(&mut r);

        assert_eq!(r.y, 20.0);
    }
}
