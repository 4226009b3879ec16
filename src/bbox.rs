use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

pub trait BBoxFormat: std::fmt::Debug {}

/// Left-top-right-bottom format, contains left top and right bottom corners
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Ltrb;
impl BBoxFormat for Ltrb {}

/// X-y-width-height format, contains coordinates of the center of bbox and width-height
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Xywh;
impl BBoxFormat for Xywh {}

/// Image-space box in pixels
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct BBox<F: BBoxFormat + Serialize + Deserialize<'static> + PartialEq>(
    [f64; 4],
    PhantomData<F>,
);

impl<F: BBoxFormat + Serialize + Deserialize<'static> + PartialEq> From<BBox<F>> for [f64; 4] {
    fn from(bbox: BBox<F>) -> Self {
        bbox.0
    }
}

impl<F: BBoxFormat + Serialize + Deserialize<'static> + PartialEq> BBox<F> {
    #[inline]
    pub fn as_slice(&self) -> &[f64; 4] {
        &self.0
    }
}

impl BBox<Ltrb> {
    #[inline]
    pub fn ltrb(x1: f64, x2: f64, x3: f64, x4: f64) -> Self {
        BBox([x1, x2, x3, x4], Default::default())
    }

    /// Box spanned by two drag points, whatever their order
    pub fn from_drag(start: (f64, f64), end: (f64, f64)) -> Self {
        Self::ltrb(
            start.0.min(end.0),
            start.1.min(end.1),
            start.0.max(end.0),
            start.1.max(end.1),
        )
    }

    #[inline]
    pub fn as_xywh(&self) -> BBox<Xywh> {
        self.into()
    }

    #[inline(always)]
    pub fn left(&self) -> f64 {
        self.0[0]
    }

    #[inline(always)]
    pub fn top(&self) -> f64 {
        self.0[1]
    }

    #[inline(always)]
    pub fn right(&self) -> f64 {
        self.0[2]
    }

    #[inline(always)]
    pub fn bottom(&self) -> f64 {
        self.0[3]
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.0[2] - self.0[0]
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.0[3] - self.0[1]
    }

    #[inline]
    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        Self::ltrb(self.0[0] + dx, self.0[1] + dy, self.0[2] + dx, self.0[3] + dy)
    }

    /// True when the box lies entirely inside a `width`×`height` frame
    pub fn inside(&self, width: f64, height: f64) -> bool {
        self.left() >= 0.0 && self.top() >= 0.0 && self.right() <= width && self.bottom() <= height
    }

    /// Mean squared difference of the four extents
    pub fn mse(&self, other: &BBox<Ltrb>) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            / 4.0
    }
}

impl BBox<Xywh> {
    #[inline]
    pub fn xywh(x1: f64, x2: f64, x3: f64, x4: f64) -> Self {
        BBox([x1, x2, x3, x4], Default::default())
    }

    #[inline(always)]
    pub fn as_ltrb(&self) -> BBox<Ltrb> {
        self.into()
    }

    #[inline(always)]
    pub fn cx(&self) -> f64 {
        self.0[0]
    }

    #[inline(always)]
    pub fn cy(&self) -> f64 {
        self.0[1]
    }

    #[inline(always)]
    pub fn width(&self) -> f64 {
        self.0[2]
    }

    #[inline(always)]
    pub fn height(&self) -> f64 {
        self.0[3]
    }
}

impl<'a> From<&'a BBox<Ltrb>> for BBox<Xywh> {
    #[inline]
    fn from(v: &'a BBox<Ltrb>) -> Self {
        Self(
            [
                (v.0[0] + v.0[2]) / 2.0,
                (v.0[1] + v.0[3]) / 2.0,
                v.0[2] - v.0[0],
                v.0[3] - v.0[1],
            ],
            Default::default(),
        )
    }
}

impl<'a> From<&'a BBox<Xywh>> for BBox<Ltrb> {
    #[inline]
    fn from(v: &'a BBox<Xywh>) -> Self {
        Self(
            [
                v.0[0] - v.0[2] / 2.0,
                v.0[1] - v.0[3] / 2.0,
                v.0[0] + v.0[2] / 2.0,
                v.0[1] + v.0[3] / 2.0,
            ],
            Default::default(),
        )
    }
}
