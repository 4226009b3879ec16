use crate::bbox::{BBox, Ltrb};
use crate::error::{Error, Result};
use crate::record::{Direction, StateBox};

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Image corners of a projected [`StateBox`], in [`StateBox::corners`] order
pub type ImagePolygon = [na::Point2<f64>; 8];

/// Mapping between one camera's image plane and the shared ground-plane state space.
///
/// Points and boxes always belong to exactly one camera; nothing is ever
/// projected from one camera into another.
pub trait Homography {
    /// Back-projects image points onto the plane `z = height`
    fn image_to_state(
        &self,
        points: &[na::Point2<f64>],
        camera: &str,
        height: f64,
    ) -> Result<Vec<na::Point2<f64>>>;

    fn state_to_image(&self, boxes: &[StateBox], camera: &str) -> Result<Vec<ImagePolygon>>;

    /// Lateral position of the straight lane reference line for `direction`
    fn reference_lateral(&self, camera: &str, direction: Direction) -> Result<f64>;

    /// Rescales the vertical axis of one camera's model
    fn scale_height(&mut self, camera: &str, direction: Direction, factor: f64) -> Result<()>;
}

/// Axis-aligned extents of a projected polygon
pub fn extents(poly: &ImagePolygon) -> BBox<Ltrb> {
    let (mut l, mut t, mut r, mut b) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);

    for p in poly {
        l = l.min(p.x);
        t = t.min(p.y);
        r = r.max(p.x);
        b = b.max(p.y);
    }

    BBox::ltrb(l, t, r, b)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CameraModel {
    /// Maps homogeneous `(x, y, z, 1)` state points to homogeneous image points
    pub projection: na::Matrix3x4<f64>,
    #[serde(default)]
    pub reference_lateral: f64,
}

impl CameraModel {
    pub fn new(projection: na::Matrix3x4<f64>, reference_lateral: f64) -> Self {
        Self {
            projection,
            reference_lateral,
        }
    }

    #[inline]
    pub fn project(&self, p: &na::Point3<f64>) -> na::Point2<f64> {
        let h = self.projection * p.to_homogeneous();
        na::Point2::new(h.x / h.z, h.y / h.z)
    }

    /// Plane-to-image homography for the horizontal plane at `height`
    fn plane(&self, height: f64) -> na::Matrix3<f64> {
        let p = &self.projection;
        let c3 = p.column(2) * height + p.column(3);

        na::Matrix3::from_columns(&[p.column(0).into_owned(), p.column(1).into_owned(), c3])
    }
}

/// Per-camera projective model, one 3×4 matrix per camera
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ProjectiveCamera {
    cameras: BTreeMap<String, CameraModel>,
}

impl ProjectiveCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_camera(mut self, name: impl Into<String>, model: CameraModel) -> Self {
        self.cameras.insert(name.into(), model);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, model: CameraModel) {
        self.cameras.insert(name.into(), model);
    }

    #[inline]
    pub fn camera(&self, name: &str) -> Result<&CameraModel> {
        self.cameras
            .get(name)
            .ok_or_else(|| Error::UnknownCamera(name.to_string()))
    }
}

impl Homography for ProjectiveCamera {
    fn image_to_state(
        &self,
        points: &[na::Point2<f64>],
        camera: &str,
        height: f64,
    ) -> Result<Vec<na::Point2<f64>>> {
        let model = self.camera(camera)?;
        let inv = model
            .plane(height)
            .try_inverse()
            .ok_or_else(|| Error::SingularProjection(camera.to_string()))?;

        Ok(points
            .iter()
            .map(|p| {
                let s = inv * p.to_homogeneous();
                na::Point2::new(s.x / s.z, s.y / s.z)
            })
            .collect())
    }

    fn state_to_image(&self, boxes: &[StateBox], camera: &str) -> Result<Vec<ImagePolygon>> {
        let model = self.camera(camera)?;

        Ok(boxes
            .iter()
            .map(|b| b.corners().map(|c| model.project(&c)))
            .collect())
    }

    fn reference_lateral(&self, camera: &str, _direction: Direction) -> Result<f64> {
        Ok(self.camera(camera)?.reference_lateral)
    }

    fn scale_height(&mut self, camera: &str, _direction: Direction, factor: f64) -> Result<()> {
        let model = self
            .cameras
            .get_mut(camera)
            .ok_or_else(|| Error::UnknownCamera(camera.to_string()))?;

        model.projection.column_mut(2).scale_mut(factor);
        Ok(())
    }
}

/// Two independent models, one per travel direction
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DirectionalHomography<H> {
    pub eastbound: H,
    pub westbound: H,
    /// Back-projected points at or beyond this lateral value use the westbound model
    pub split_y: f64,
}

impl<H: Homography> DirectionalHomography<H> {
    pub fn new(eastbound: H, westbound: H, split_y: f64) -> Self {
        Self {
            eastbound,
            westbound,
            split_y,
        }
    }

    #[inline]
    fn model(&self, direction: Direction) -> &H {
        match direction {
            Direction::Eastbound => &self.eastbound,
            Direction::Westbound => &self.westbound,
        }
    }
}

impl<H: Homography> Homography for DirectionalHomography<H> {
    fn image_to_state(
        &self,
        points: &[na::Point2<f64>],
        camera: &str,
        height: f64,
    ) -> Result<Vec<na::Point2<f64>>> {
        let east = self.eastbound.image_to_state(points, camera, height)?;
        let west = self.westbound.image_to_state(points, camera, height)?;

        Ok(east
            .into_iter()
            .zip(west)
            .map(|(e, w)| if e.y < self.split_y { e } else { w })
            .collect())
    }

    fn state_to_image(&self, boxes: &[StateBox], camera: &str) -> Result<Vec<ImagePolygon>> {
        let (east, west): (Vec<_>, Vec<_>) = boxes
            .iter()
            .enumerate()
            .partition(|(_, b)| b.direction == Direction::Eastbound);

        let east_boxes: Vec<StateBox> = east.iter().map(|(_, b)| **b).collect();
        let west_boxes: Vec<StateBox> = west.iter().map(|(_, b)| **b).collect();

        let east_im = self.eastbound.state_to_image(&east_boxes, camera)?;
        let west_im = self.westbound.state_to_image(&west_boxes, camera)?;

        let mut out = vec![[na::Point2::origin(); 8]; boxes.len()];
        for ((idx, _), poly) in east.iter().zip(east_im) {
            out[*idx] = poly;
        }
        for ((idx, _), poly) in west.iter().zip(west_im) {
            out[*idx] = poly;
        }

        Ok(out)
    }

    fn reference_lateral(&self, camera: &str, direction: Direction) -> Result<f64> {
        self.model(direction).reference_lateral(camera, direction)
    }

    fn scale_height(&mut self, camera: &str, direction: Direction, factor: f64) -> Result<()> {
        match direction {
            Direction::Eastbound => self.eastbound.scale_height(camera, direction, factor),
            Direction::Westbound => self.westbound.scale_height(camera, direction, factor),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Oblique view of a roadway segment, roughly 4 px per foot
    pub(crate) fn sample_model(offset: f64) -> CameraModel {
        CameraModel::new(
            na::Matrix3x4::new(
                4.0, 1.0, 0.0, 100.0 + offset, //
                0.5, -6.0, -8.0, 900.0, //
                0.0005, 0.002, 0.0, 1.0,
            ),
            12.0,
        )
    }

    pub(crate) fn sample_camera() -> ProjectiveCamera {
        ProjectiveCamera::new()
            .with_camera("p1c1", sample_model(0.0))
            .with_camera("p1c2", sample_model(-400.0))
    }

    fn sample_box() -> StateBox {
        StateBox {
            x: 120.0,
            y: 24.0,
            length: 16.0,
            width: 6.0,
            height: 5.0,
            direction: Direction::Eastbound,
        }
    }

    #[test]
    fn ground_corners_back_project_to_footprint() {
        let hg = sample_camera();
        let b = sample_box();
        let poly = hg.state_to_image(&[b], "p1c1").unwrap()[0];

        let ground = hg.image_to_state(&poly[..4], "p1c1", 0.0).unwrap();
        for (p, expected) in ground.iter().zip(b.footprint()) {
            assert_abs_diff_eq!(p.x, expected.x, epsilon = 1e-6);
            assert_abs_diff_eq!(p.y, expected.y, epsilon = 1e-6);
        }

        let roof = hg.image_to_state(&poly[4..], "p1c1", b.height).unwrap();
        assert_abs_diff_eq!(roof[0].x, ground[0].x, epsilon = 1e-6);
        assert_abs_diff_eq!(roof[3].y, ground[3].y, epsilon = 1e-6);
    }

    #[test]
    fn unknown_camera_is_reported() {
        let hg = sample_camera();
        assert!(matches!(
            hg.state_to_image(&[sample_box()], "p9c9"),
            Err(Error::UnknownCamera(_))
        ));
    }

    #[test]
    fn height_scaling_only_moves_roof() {
        let mut hg = sample_camera();
        let before = hg.state_to_image(&[sample_box()], "p1c1").unwrap()[0];
        hg.scale_height("p1c1", Direction::Eastbound, 2.0).unwrap();
        let after = hg.state_to_image(&[sample_box()], "p1c1").unwrap()[0];

        assert_eq!(before[0], after[0]);
        assert!((before[4].y - after[4].y).abs() > 1.0);
    }

    #[test]
    fn directional_selects_model_per_box() {
        let hg = DirectionalHomography::new(
            sample_camera(),
            ProjectiveCamera::new()
                .with_camera("p1c1", sample_model(50.0))
                .with_camera("p1c2", sample_model(-350.0)),
            60.0,
        );

        let east = sample_box();
        let west = StateBox {
            y: 80.0,
            direction: Direction::Westbound,
            ..east
        };

        let polys = hg.state_to_image(&[west, east], "p1c1").unwrap();
        let plain_east = sample_camera().state_to_image(&[east], "p1c1").unwrap()[0];

        assert_eq!(polys[1], plain_east);
        assert_ne!(polys[0][0], na::Point2::origin());

        let back = hg.image_to_state(&polys[0][..1], "p1c1", 0.0).unwrap();
        assert_abs_diff_eq!(back[0].x, west.footprint()[0].x, epsilon = 1e-6);
    }

    #[test]
    fn extents_bound_all_corners() {
        let hg = sample_camera();
        let poly = hg.state_to_image(&[sample_box()], "p1c1").unwrap()[0];
        let bbox = extents(&poly);

        for p in &poly {
            assert!(p.x >= bbox.left() && p.x <= bbox.right());
            assert!(p.y >= bbox.top() && p.y <= bbox.bottom());
        }
    }
}
