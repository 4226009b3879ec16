use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb, Xywh};

/// Contains (x,y) of the center and (width,height) of bbox, in crop pixels
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    #[serde(rename = "p")]
    pub confidence: f32,
    #[serde(rename = "c")]
    pub class: i32,
}

impl Detection {
    #[inline(always)]
    pub fn bbox(&self) -> BBox<Xywh> {
        BBox::xywh(self.x as f64, self.y as f64, self.w as f64, self.h as f64)
    }

    #[inline(always)]
    pub fn ltrb(&self) -> BBox<Ltrb> {
        self.bbox().as_ltrb()
    }
}
