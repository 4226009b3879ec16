use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// Travel direction along the roadway x axis
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(into = "i8", try_from = "i8")]
pub enum Direction {
    Eastbound,
    Westbound,
}

impl Direction {
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Direction::Eastbound => 1.0,
            Direction::Westbound => -1.0,
        }
    }

    /// Eastbound lanes lie below `split` on the lateral axis
    #[inline]
    pub fn from_lateral(y: f64, split: f64) -> Self {
        if y < split {
            Direction::Eastbound
        } else {
            Direction::Westbound
        }
    }

    /// Heading angle as written to exports
    #[inline]
    pub fn heading(self) -> f64 {
        match self {
            Direction::Eastbound => 0.0,
            Direction::Westbound => std::f64::consts::FRAC_PI_2,
        }
    }

    #[inline]
    pub fn tag(self) -> &'static str {
        match self {
            Direction::Eastbound => "EB",
            Direction::Westbound => "WB",
        }
    }
}

impl From<Direction> for i8 {
    fn from(d: Direction) -> i8 {
        match d {
            Direction::Eastbound => 1,
            Direction::Westbound => -1,
        }
    }
}

impl TryFrom<i8> for Direction {
    type Error = String;

    fn try_from(v: i8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Direction::Eastbound),
            -1 => Ok(Direction::Westbound),
            other => Err(format!("invalid direction {}", other)),
        }
    }
}

/// How a record came to exist
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    Manual,
    Interpolation,
    Detector,
}

impl Generation {
    /// Keyframes anchor interpolation and survive bulk passes
    #[inline]
    pub fn is_keyframe(self) -> bool {
        match self {
            Generation::Manual | Generation::Detector => true,
            Generation::Interpolation => false,
        }
    }
}

impl Default for Generation {
    fn default() -> Self {
        Generation::Manual
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Generation::Manual => "Manual",
            Generation::Interpolation => "Interpolation",
            Generation::Detector => "Detector",
        };

        f.write_str(s)
    }
}

/// Identity is only unique within one camera
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackKey {
    pub camera: String,
    pub identity: u32,
}

impl TrackKey {
    pub fn new(camera: impl Into<String>, identity: u32) -> Self {
        Self {
            camera: camera.into(),
            identity,
        }
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.camera, self.identity)
    }
}

/// Dimensions shared by every record of an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Length,
    Width,
    Height,
}

/// Vehicle volume in the ground-plane state space, feet.
///
/// `x` is the rear of the vehicle, `y` its lateral center.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct StateBox {
    pub x: f64,
    pub y: f64,
    pub length: f64,
    pub width: f64,
    pub height: f64,
    pub direction: Direction,
}

impl StateBox {
    #[inline]
    pub fn at(&self, x: f64, y: f64) -> Self {
        Self { x, y, ..*self }
    }

    /// Corners ordered fbr, fbl, bbr, bbl, ftr, ftl, btr, btl
    pub fn corners(&self) -> [na::Point3<f64>; 8] {
        let s = self.direction.sign();
        let front = self.x + s * self.length;
        let back = self.x;
        let right = self.y + s * self.width / 2.0;
        let left = self.y - s * self.width / 2.0;
        let h = self.height;

        [
            na::Point3::new(front, right, 0.0),
            na::Point3::new(front, left, 0.0),
            na::Point3::new(back, right, 0.0),
            na::Point3::new(back, left, 0.0),
            na::Point3::new(front, right, h),
            na::Point3::new(front, left, h),
            na::Point3::new(back, right, h),
            na::Point3::new(back, left, h),
        ]
    }

    /// Ground-plane corners fbr, fbl, bbr, bbl
    pub fn footprint(&self) -> [na::Point2<f64>; 4] {
        let c = self.corners();
        [c[0].xy(), c[1].xy(), c[2].xy(), c[3].xy()]
    }
}

/// One observation of one object in one camera at one frame
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    pub x: f64,
    pub y: f64,
    pub length: f64,
    pub width: f64,
    pub height: f64,
    pub direction: Direction,
    pub class: String,
    /// camera-local, in seconds
    pub timestamp: f64,
    pub identity: u32,
    pub camera: String,
    #[serde(default)]
    pub generation: Generation,
    /// Curvature offset already subtracted from `y`
    #[serde(default)]
    pub lateral_offset: f64,
}

impl ObjectRecord {
    #[inline]
    pub fn key(&self) -> TrackKey {
        TrackKey::new(self.camera.clone(), self.identity)
    }

    #[inline]
    pub fn state_box(&self) -> StateBox {
        StateBox {
            x: self.x,
            y: self.y,
            length: self.length,
            width: self.width,
            height: self.height,
            direction: self.direction,
        }
    }

    #[inline]
    pub fn position(&self) -> na::Point2<f64> {
        na::Point2::new(self.x, self.y)
    }

    pub fn dimension(&self, dim: Dimension) -> f64 {
        match dim {
            Dimension::Length => self.length,
            Dimension::Width => self.width,
            Dimension::Height => self.height,
        }
    }

    pub fn set_dimension(&mut self, dim: Dimension, value: f64) {
        match dim {
            Dimension::Length => self.length = value,
            Dimension::Width => self.width = value,
            Dimension::Height => self.height = value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(direction: Direction) -> StateBox {
        StateBox {
            x: 100.0,
            y: 20.0,
            length: 16.0,
            width: 6.0,
            height: 5.0,
            direction,
        }
    }

    #[test]
    fn eastbound_front_is_ahead_in_x() {
        let c = sample(Direction::Eastbound).corners();

        assert_eq!(c[0].x, 116.0);
        assert_eq!(c[2].x, 100.0);
        assert_eq!(c[0].y, 23.0);
        assert_eq!(c[1].y, 17.0);
        assert_eq!(c[4].z, 5.0);
    }

    #[test]
    fn westbound_front_is_behind_in_x() {
        let c = sample(Direction::Westbound).corners();

        assert_eq!(c[0].x, 84.0);
        assert_eq!(c[0].y, 17.0);
        assert_eq!(c[3].y, 23.0);
    }

    #[test]
    fn direction_serializes_as_sign() {
        let json = serde_json::to_string(&Direction::Westbound).unwrap();
        assert_eq!(json, "-1");

        let back: Direction = serde_json::from_str("1").unwrap();
        assert_eq!(back, Direction::Eastbound);
        assert!(serde_json::from_str::<Direction>("0").is_err());
    }

    #[test]
    fn only_interpolations_are_not_keyframes() {
        assert!(Generation::Manual.is_keyframe());
        assert!(Generation::Detector.is_keyframe());
        assert!(!Generation::Interpolation.is_keyframe());
    }
}
