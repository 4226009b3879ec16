//! Annotation session: the store, clock biases, lane curvature and camera
//! model of one sequence, plus every user action that edits them.
//!
//! Actions take the frame and the camera they were issued on explicitly.
//! Image points are camera-local pixels. Each editing action snapshots the
//! affected frame for undo before mutating, and writes the whole state to the
//! cache file afterwards when one is configured.

use crate::aligner::{AlignTarget, Alignment, BoxAligner};
use crate::bbox::{BBox, Ltrb};
use crate::config::Config;
use crate::curvature::CurvatureModel;
use crate::detector::{crop_detect, Detector};
use crate::error::{Error, Result};
use crate::interpolate::interpolate_identity;
use crate::record::{Dimension, Direction, Generation, ObjectRecord, TrackKey};
use crate::store::TrackStore;
use crate::time_bias::{self, PairReport, TimeBias};
use crate::transform::{extents, Homography, ImagePolygon};

use nalgebra as na;
use ndarray::ArrayView3;
use serde::{de::DeserializeOwned, Serialize};
use serde_derive::Deserialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Current layout of the persisted state
pub const STATE_VERSION: u32 = 1;

/// Clipboard contents: a record and the ground point it was picked at
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CopiedBox {
    pub record: ObjectRecord,
    pub anchor: na::Point2<f64>,
}

/// Persisted session, older layouts are completed with defaults
#[derive(Deserialize, Debug, Clone)]
pub struct SessionState<H> {
    pub version: u32,
    pub store: TrackStore,
    #[serde(default)]
    pub bias: TimeBias,
    pub homography: H,
    #[serde(default)]
    pub curvature: CurvatureModel,
}

#[derive(Serialize)]
struct SessionStateRef<'a, H> {
    version: u32,
    store: &'a TrackStore,
    bias: &'a TimeBias,
    homography: &'a H,
    curvature: &'a CurvatureModel,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

pub struct Session<H> {
    pub(crate) store: TrackStore,
    pub(crate) bias: TimeBias,
    pub(crate) curvature: CurvatureModel,
    pub(crate) homography: H,
    pub(crate) config: Config,
    pub(crate) aligner: BoxAligner,
    clipboard: Option<CopiedBox>,
    cache: Option<PathBuf>,
}

impl<H> Session<H> {
    pub fn new<S: Into<String>>(
        cameras: impl IntoIterator<Item = S>,
        homography: H,
        config: Config,
    ) -> Self {
        let store = TrackStore::new(cameras);
        let bias = TimeBias::zeros(store.cameras().len());

        Self::from_state(
            SessionState {
                version: STATE_VERSION,
                store,
                bias,
                homography,
                curvature: CurvatureModel::default(),
            },
            config,
        )
    }

    fn from_state(state: SessionState<H>, config: Config) -> Self {
        let mut store = state.store;
        store.set_undo_depth(config.undo_depth);

        let mut bias = state.bias;
        bias.ensure_len(store.cameras().len());

        Self {
            store,
            bias,
            curvature: state.curvature,
            homography: state.homography,
            aligner: BoxAligner::new(config.aligner.clone()),
            config,
            clipboard: None,
            cache: None,
        }
    }

    /// Persist to `path` after every editing action
    pub fn with_cache<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache = Some(path.into());
        self
    }

    #[inline]
    pub fn store(&self) -> &TrackStore {
        &self.store
    }

    /// Direct access for loading timestamps and bulk imports; no undo, no persistence
    #[inline]
    pub fn store_mut(&mut self) -> &mut TrackStore {
        &mut self.store
    }

    #[inline]
    pub fn bias(&self) -> &TimeBias {
        &self.bias
    }

    #[inline]
    pub fn curvature(&self) -> &CurvatureModel {
        &self.curvature
    }

    #[inline]
    pub fn homography(&self) -> &H {
        &self.homography
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn clipboard(&self) -> Option<&CopiedBox> {
        self.clipboard.as_ref()
    }

    pub fn clear_clipboard(&mut self) {
        self.clipboard = None;
    }

    #[inline]
    fn timestamp(&self, frame_idx: usize, camera: &str) -> f64 {
        self.store.timestamp(frame_idx, camera).unwrap_or(0.0)
    }
}

impl<H: Homography + Serialize> Session<H> {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let state = SessionStateRef {
            version: STATE_VERSION,
            store: &self.store,
            bias: &self.bias,
            homography: &self.homography,
            curvature: &self.curvature,
        };

        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, &state)?;
        writer.flush()?;

        info!("Saved labels, {} total boxes", self.store.count());
        Ok(())
    }

    pub(crate) fn persist(&self) -> Result<()> {
        match &self.cache {
            Some(path) => self.save(path),
            None => Ok(()),
        }
    }

    fn state_point(&self, camera: &str, point: na::Point2<f64>) -> Result<na::Point2<f64>> {
        self.homography
            .image_to_state(&[point], camera, 0.0)?
            .pop()
            .ok_or_else(|| Error::UnknownCamera(camera.to_string()))
    }

    /// Takes class and dimensions from the identity's stored records, if any
    fn conform(&self, record: &mut ObjectRecord) {
        if let Some(existing) = self.store.identity_record(record.identity) {
            record.class = existing.class.clone();
            record.length = existing.length;
            record.width = existing.width;
            record.height = existing.height;
        }
    }

    /// Ground-plane displacement of an image drag
    fn state_drag(
        &self,
        camera: &str,
        start: na::Point2<f64>,
        end: na::Point2<f64>,
    ) -> Result<na::Vector2<f64>> {
        Ok(self.state_point(camera, end)? - self.state_point(camera, start)?)
    }

    /// Image polygon of a record as drawn, with its curvature offset restored
    pub fn project(&self, record: &ObjectRecord) -> Result<ImagePolygon> {
        let raw = self.curvature.invert(record);

        self.homography
            .state_to_image(&[raw.state_box()], &record.camera)?
            .pop()
            .ok_or_else(|| Error::UnknownCamera(record.camera.clone()))
    }

    /// Places a box at an image location.
    ///
    /// A fresh identity is picked when `identity` is `None`. A known identity
    /// keeps its class and dimensions, a new one gets the default class.
    pub fn add(
        &mut self,
        frame_idx: usize,
        camera: &str,
        identity: Option<u32>,
        location: na::Point2<f64>,
    ) -> Result<u32> {
        let position = self.state_point(camera, location)?;
        let identity = identity.unwrap_or_else(|| self.store.unused_identity());
        let class = self.config.default_class.clone();
        let dims = self.config.dims_for(&class);

        let mut record = ObjectRecord {
            x: position.x,
            y: position.y,
            length: dims.length,
            width: dims.width,
            height: dims.height,
            direction: Direction::from_lateral(position.y, self.config.direction_split_y),
            class,
            timestamp: self.timestamp(frame_idx, camera),
            identity,
            camera: camera.to_string(),
            generation: Generation::Manual,
            lateral_offset: 0.0,
        };
        self.conform(&mut record);
        self.curvature.apply(&mut record);

        self.store.checkpoint(frame_idx);
        self.store.insert(frame_idx, record);
        self.persist()?;

        Ok(identity)
    }

    /// Moves a box by an image drag, from this frame forward in this camera
    pub fn shift_drag(
        &mut self,
        frame_idx: usize,
        camera: &str,
        identity: u32,
        start: na::Point2<f64>,
        end: na::Point2<f64>,
    ) -> Result<bool> {
        let delta = self.state_drag(camera, start, end)?;
        self.shift(frame_idx, camera, identity, delta.x, delta.y)
    }

    /// Keyboard move by whole nudge steps
    pub fn nudge(
        &mut self,
        frame_idx: usize,
        camera: &str,
        identity: u32,
        steps_x: f64,
        steps_y: f64,
    ) -> Result<bool> {
        let step = self.config.position_nudge;
        self.shift(frame_idx, camera, identity, steps_x * step, steps_y * step)
    }

    fn shift(
        &mut self,
        frame_idx: usize,
        camera: &str,
        identity: u32,
        dx: f64,
        dy: f64,
    ) -> Result<bool> {
        let key = TrackKey::new(camera, identity);
        if self.store.get(frame_idx, &key).is_none() {
            return Ok(false);
        }

        self.store.checkpoint(frame_idx);
        self.store.shift(frame_idx, &key, dx, dy);
        self.persist()?;

        Ok(true)
    }

    /// Resizes an identity from an image drag.
    ///
    /// With `adjust_height` the vertical pixel extent of the drag changes the
    /// height; otherwise the dominant ground axis of the drag changes the
    /// length or the width.
    pub fn resize_drag(
        &mut self,
        frame_idx: usize,
        camera: &str,
        identity: u32,
        start: na::Point2<f64>,
        end: na::Point2<f64>,
        adjust_height: bool,
    ) -> Result<bool> {
        let key = TrackKey::new(camera, identity);
        let current = match self.store.get(frame_idx, &key) {
            Some(r) => r.clone(),
            None => return Ok(false),
        };

        let (dim, value) = if adjust_height {
            let dh = -(end.y - start.y) * self.config.height_per_pixel;
            (Dimension::Height, current.height + dh)
        } else {
            let delta = self.state_drag(camera, start, end)?;
            if delta.x.abs() > delta.y.abs() {
                (Dimension::Length, current.length + delta.x)
            } else {
                (Dimension::Width, current.width + delta.y)
            }
        };

        self.resize(frame_idx, &key, dim, value)
    }

    /// Keyboard resize by whole nudge steps
    pub fn nudge_dimension(
        &mut self,
        frame_idx: usize,
        camera: &str,
        identity: u32,
        dim: Dimension,
        steps: f64,
    ) -> Result<bool> {
        let key = TrackKey::new(camera, identity);
        let value = match self.store.get(frame_idx, &key) {
            Some(r) => r.dimension(dim) + steps * self.config.dimension_nudge,
            None => return Ok(false),
        };

        self.resize(frame_idx, &key, dim, value)
    }

    fn resize(&mut self, frame_idx: usize, key: &TrackKey, dim: Dimension, value: f64) -> Result<bool> {
        self.store.checkpoint(frame_idx);

        if let Some(record) = self.store.get_mut(frame_idx, key) {
            record.generation = Generation::Manual;
        }

        let touched = self.store.set_dimension(key.identity, dim, value);
        debug!("Set {:?} of object {} to {:.2} in {} boxes", dim, key.identity, value, touched);

        if let Some(copied) = self
            .clipboard
            .as_mut()
            .filter(|c| c.record.identity == key.identity)
        {
            copied.record.set_dimension(dim, value);
        }

        self.persist()?;
        Ok(true)
    }

    pub fn change_class(&mut self, frame_idx: usize, identity: u32, class: &str) -> Result<usize> {
        self.store.checkpoint(frame_idx);
        let touched = self.store.change_class(identity, class);

        if let Some(copied) = self
            .clipboard
            .as_mut()
            .filter(|c| c.record.identity == identity)
        {
            copied.record.class = class.to_string();
        }

        self.persist()?;

        Ok(touched)
    }

    /// Deletes a box in this frame and the following `n_frames - 1`, or to the end
    pub fn delete(
        &mut self,
        frame_idx: usize,
        camera: &str,
        identity: u32,
        n_frames: Option<usize>,
    ) -> Result<usize> {
        self.store.checkpoint(frame_idx);
        let removed = self
            .store
            .delete(frame_idx, &TrackKey::new(camera, identity), n_frames);
        self.persist()?;

        Ok(removed)
    }

    /// Copies the box nearest to an image point into the clipboard
    pub fn copy(&mut self, frame_idx: usize, camera: &str, point: na::Point2<f64>) -> Result<Option<u32>> {
        let anchor = self.state_point(camera, point)?;

        let record = self
            .store
            .find_nearest(frame_idx, camera, anchor)
            .and_then(|id| self.store.get(frame_idx, &TrackKey::new(camera, id)))
            .cloned();

        Ok(record.map(|record| {
            let identity = record.identity;
            self.clipboard = Some(CopiedBox { record, anchor });
            identity
        }))
    }

    /// Pastes the clipboard translated by the ground distance from its anchor
    pub fn paste(&mut self, frame_idx: usize, camera: &str, point: na::Point2<f64>) -> Result<Option<u32>> {
        let copied = match &self.clipboard {
            Some(c) => c.clone(),
            None => return Ok(None),
        };

        let target = self.state_point(camera, point)?;
        let mut record = self.curvature.invert(&copied.record);
        record.x += target.x - copied.anchor.x;
        record.y += target.y - copied.anchor.y;
        record.camera = camera.to_string();
        record.timestamp = self.timestamp(frame_idx, camera);
        record.generation = Generation::Manual;
        self.conform(&mut record);
        self.curvature.apply(&mut record);

        let identity = record.identity;
        self.store.checkpoint(frame_idx);
        self.store.insert(frame_idx, record);
        self.persist()?;

        Ok(Some(identity))
    }

    /// Pastes the clipboard where its projection best covers `bbox`
    pub fn paste_into_box(
        &mut self,
        frame_idx: usize,
        camera: &str,
        bbox: &BBox<Ltrb>,
    ) -> Result<Option<Alignment>> {
        let base = match &self.clipboard {
            Some(c) => c.record.clone(),
            None => return Ok(None),
        };

        let alignment = self.place_in_box(frame_idx, camera, base, bbox, Generation::Manual)?;
        self.persist()?;

        Ok(Some(alignment))
    }

    /// Pastes the clipboard into the box spanned by an image drag
    pub fn paste_into_drag(
        &mut self,
        frame_idx: usize,
        camera: &str,
        start: na::Point2<f64>,
        end: na::Point2<f64>,
    ) -> Result<Option<Alignment>> {
        let bbox = BBox::from_drag((start.x, start.y), (end.x, end.y));
        self.paste_into_box(frame_idx, camera, &bbox)
    }

    /// Detector-assisted placement.
    ///
    /// Crops `image` around the current projection of the box, localizes the
    /// vehicle and realigns the box to the detection. Boxes whose projection
    /// leaves the frame are skipped.
    pub fn automate<D: Detector + ?Sized>(
        &mut self,
        frame_idx: usize,
        camera: &str,
        identity: u32,
        detector: &D,
        image: ArrayView3<'_, u8>,
    ) -> Result<Option<Alignment>> {
        let key = TrackKey::new(camera, identity);
        let record = match self.store.get(frame_idx, &key) {
            Some(r) => r.clone(),
            None => return Ok(None),
        };

        let expected = extents(&self.project(&record)?);
        if !expected.inside(self.config.frame_width, self.config.frame_height) {
            debug!("Object {} leaves the frame, skipping detection", key);
            return Ok(None);
        }

        let detected = crop_detect(
            detector,
            image,
            &expected,
            self.config.detector.expansion,
            self.config.detector.crop_size,
        )?;

        let bbox = match detected {
            Some(b) => b,
            None => return Ok(None),
        };

        let alignment = self.place_in_box(frame_idx, camera, record, &bbox, Generation::Detector)?;
        self.persist()?;

        Ok(Some(alignment))
    }

    fn place_in_box(
        &mut self,
        frame_idx: usize,
        camera: &str,
        mut base: ObjectRecord,
        bbox: &BBox<Ltrb>,
        generation: Generation,
    ) -> Result<Alignment> {
        self.conform(&mut base);

        let corners = [
            na::Point2::new(bbox.left(), bbox.top()),
            na::Point2::new(bbox.right(), bbox.bottom()),
        ];
        let ground = self.homography.image_to_state(&corners, camera, 0.0)?;
        let start = ground
            .iter()
            .fold(na::Point2::origin(), |acc: na::Point2<f64>, p| acc + p.coords / ground.len() as f64);

        let template = self.curvature.invert(&base).state_box();
        let alignment = self.aligner.align(
            &self.homography,
            camera,
            &template,
            start,
            &AlignTarget::Extents(*bbox),
        )?;

        debug!(
            "Aligned object {} in {} with error {:.3} px",
            base.identity,
            camera,
            alignment.rms()
        );

        let mut record = ObjectRecord {
            x: alignment.x,
            y: alignment.y,
            timestamp: self.timestamp(frame_idx, camera),
            camera: camera.to_string(),
            generation,
            lateral_offset: 0.0,
            ..base
        };
        self.curvature.apply(&mut record);

        self.store.checkpoint(frame_idx);
        self.store.insert(frame_idx, record);

        Ok(alignment)
    }

    /// Re-fills every gap of `identity` in every camera
    pub fn interpolate(&mut self, identity: u32) -> Result<usize> {
        let filled = interpolate_identity(&mut self.store, identity);
        self.persist()?;

        Ok(filled)
    }

    /// Adds a clicked lane point; returns true when the curve was refit
    pub fn fit_curvature(&mut self, camera: &str, point: na::Point2<f64>) -> Result<bool> {
        let position = self.state_point(camera, point)?;
        let direction = Direction::from_lateral(position.y, self.config.direction_split_y);
        let reference = self.homography.reference_lateral(camera, direction)?;

        let refit = self.curvature.add_point(
            camera,
            direction,
            position,
            reference,
            self.config.curve_min_points,
        );
        self.persist()?;

        Ok(refit)
    }

    /// Drops the curve of the lane side under the clicked point
    pub fn erase_curvature(&mut self, camera: &str, point: na::Point2<f64>) -> Result<()> {
        let position = self.state_point(camera, point)?;
        let direction = Direction::from_lateral(position.y, self.config.direction_split_y);

        self.curvature.clear(camera, direction);
        self.persist()
    }

    /// Shifts a camera's clock by a vertical drag of `pixels`
    pub fn nudge_time_bias(&mut self, camera: &str, pixels: f64) -> Result<()> {
        let camera_idx = self
            .store
            .camera_index(camera)
            .ok_or_else(|| Error::UnknownCamera(camera.to_string()))?;

        self.bias
            .nudge(camera_idx, pixels, self.config.time_bias.nudge_gain);
        self.persist()
    }

    pub fn estimate_time_bias(&mut self) -> Result<Vec<PairReport>> {
        let reports = time_bias::estimate(&self.store, &mut self.bias, &self.config.time_bias)?;
        self.persist()?;

        Ok(reports)
    }

    /// Rescales the vertical axis of the camera model under an image drag.
    ///
    /// The vertical extent sets the magnitude, `10^(dy/1000)`; a drag wider
    /// than 500 px flips the axis.
    pub fn correct_height_scale(
        &mut self,
        camera: &str,
        start: na::Point2<f64>,
        end: na::Point2<f64>,
    ) -> Result<()> {
        let sign = if end.x - start.x > 500.0 { -1.0 } else { 1.0 };
        let delta = 10f64.powf((end.y - start.y) / 1000.0);

        let position = self.state_point(camera, start)?;
        let direction = Direction::from_lateral(position.y, self.config.direction_split_y);

        self.homography.scale_height(camera, direction, sign * delta)?;
        self.persist()
    }

    pub fn undo(&mut self) -> Result<bool> {
        let restored = self.store.undo();
        if restored {
            self.persist()?;
        }

        Ok(restored)
    }
}

impl<H: Homography + Serialize + DeserializeOwned> Session<H> {
    /// Loads a persisted session and keeps persisting to the same file
    pub fn load<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;

        let probe: VersionProbe = serde_json::from_str(&contents)?;
        if probe.version > STATE_VERSION {
            return Err(Error::UnsupportedVersion(probe.version));
        }

        let state: SessionState<H> = serde_json::from_str(&contents)?;
        Ok(Self::from_state(state, config).with_cache(path))
    }

    /// Like [`Session::load`], but a missing or unreadable file starts a fresh session
    pub fn load_or_default<P, S>(
        path: P,
        config: Config,
        cameras: impl IntoIterator<Item = S>,
        homography: H,
    ) -> Self
    where
        P: AsRef<Path>,
        S: Into<String>,
    {
        let path = path.as_ref();

        if !path.exists() {
            info!("No cached labels at {}, starting fresh", path.display());
            return Self::new(cameras, homography, config).with_cache(path);
        }

        match Self::load(path, config.clone()) {
            Ok(session) => session,
            Err(err) => {
                warn!("Ignoring cached labels at {}: {}", path.display(), err);
                Self::new(cameras, homography, config).with_cache(path)
            }
        }
    }
}
