use crate::frame::Frame;
use crate::record::{Dimension, Generation, ObjectRecord, TrackKey};

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info};

/// Per-frame snapshots taken before a user action, newest first
#[derive(Debug, Clone)]
pub struct UndoLog {
    entries: VecDeque<(usize, Frame)>,
    depth: usize,
}

impl UndoLog {
    pub fn with_depth(depth: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(depth),
            depth,
        }
    }

    pub fn push(&mut self, frame_idx: usize, frame: Frame) {
        if self.depth == 0 {
            return;
        }

        if self.entries.len() == self.depth {
            self.entries.pop_back();
        }

        self.entries.push_front((frame_idx, frame));
    }

    #[inline]
    pub fn pop(&mut self) -> Option<(usize, Frame)> {
        self.entries.pop_front()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.entries.clear()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for UndoLog {
    fn default() -> Self {
        Self::with_depth(1)
    }
}

/// Time-ordered frames of records for every camera.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TrackStore {
    cameras: Vec<String>,
    frames: Vec<Frame>,
    /// camera-local timestamp of every camera at every frame
    timestamps: Vec<BTreeMap<String, f64>>,
    #[serde(skip)]
    undo: UndoLog,
}

impl TrackStore {
    pub fn new<S: Into<String>>(cameras: impl IntoIterator<Item = S>) -> Self {
        Self {
            cameras: cameras.into_iter().map(Into::into).collect(),
            frames: Vec::new(),
            timestamps: Vec::new(),
            undo: UndoLog::default(),
        }
    }

    pub fn set_undo_depth(&mut self, depth: usize) {
        self.undo = UndoLog::with_depth(depth);
    }

    /// Cameras in their fixed ordering; index 0 is the time reference
    #[inline]
    pub fn cameras(&self) -> &[String] {
        &self.cameras
    }

    #[inline]
    pub fn camera_index(&self, camera: &str) -> Option<usize> {
        self.cameras.iter().position(|c| c == camera)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Grows the store to at least `len` frames
    pub fn ensure_len(&mut self, len: usize) {
        if self.frames.len() < len {
            self.frames.resize_with(len, Frame::default);
        }

        if self.timestamps.len() < len {
            self.timestamps.resize_with(len, BTreeMap::new);
        }
    }

    #[inline]
    pub fn frame(&self, frame_idx: usize) -> Option<&Frame> {
        self.frames.get(frame_idx)
    }

    #[inline]
    pub fn frame_mut(&mut self, frame_idx: usize) -> Option<&mut Frame> {
        self.frames.get_mut(frame_idx)
    }

    #[inline]
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    pub fn set_timestamps(&mut self, frame_idx: usize, timestamps: BTreeMap<String, f64>) {
        self.ensure_len(frame_idx + 1);
        self.timestamps[frame_idx] = timestamps;
    }

    pub fn set_timestamp(&mut self, frame_idx: usize, camera: &str, ts: f64) {
        self.ensure_len(frame_idx + 1);
        self.timestamps[frame_idx].insert(camera.to_string(), ts);
    }

    #[inline]
    pub fn timestamp(&self, frame_idx: usize, camera: &str) -> Option<f64> {
        self.timestamps.get(frame_idx)?.get(camera).copied()
    }

    #[inline]
    pub fn timestamps(&self, frame_idx: usize) -> Option<&BTreeMap<String, f64>> {
        self.timestamps.get(frame_idx)
    }

    #[inline]
    pub fn get(&self, frame_idx: usize, key: &TrackKey) -> Option<&ObjectRecord> {
        self.frames.get(frame_idx)?.get(key)
    }

    #[inline]
    pub fn get_mut(&mut self, frame_idx: usize, key: &TrackKey) -> Option<&mut ObjectRecord> {
        self.frames.get_mut(frame_idx)?.get_mut(key)
    }

    pub fn insert(&mut self, frame_idx: usize, record: ObjectRecord) -> Option<ObjectRecord> {
        self.ensure_len(frame_idx + 1);
        self.frames[frame_idx].insert(record)
    }

    #[inline]
    pub fn remove(&mut self, frame_idx: usize, key: &TrackKey) -> Option<ObjectRecord> {
        self.frames.get_mut(frame_idx)?.remove(key)
    }

    /// Records of one camera at `frame_idx`
    pub fn records<'a>(
        &'a self,
        frame_idx: usize,
        camera: &'a str,
    ) -> impl Iterator<Item = &'a ObjectRecord> + 'a {
        self.frames
            .get(frame_idx)
            .into_iter()
            .flat_map(move |f| f.camera(camera))
    }

    /// Every frame holding `identity` in `camera`, in time order
    pub fn tracklet(&self, camera: &str, identity: u32) -> Vec<(usize, &ObjectRecord)> {
        let key = TrackKey::new(camera, identity);

        self.frames
            .iter()
            .enumerate()
            .filter_map(|(idx, frame)| frame.get(&key).map(|r| (idx, r)))
            .collect()
    }

    pub fn identities(&self) -> BTreeSet<u32> {
        self.frames
            .iter()
            .flat_map(|f| f.iter().map(|r| r.identity))
            .collect()
    }

    /// Smallest identity not used by any camera
    pub fn unused_identity(&self) -> u32 {
        let used = self.identities();
        (0..).find(|id| !used.contains(id)).unwrap_or(0)
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.frames.iter().map(Frame::len).sum()
    }

    /// Any stored record of `identity`; class and dimensions are shared by all of them
    pub fn identity_record(&self, identity: u32) -> Option<&ObjectRecord> {
        self.frames
            .iter()
            .flat_map(|f| f.iter())
            .find(|r| r.identity == identity)
    }

    /// Identity in `camera` whose position is closest to `point`
    pub fn find_nearest(
        &self,
        frame_idx: usize,
        camera: &str,
        point: na::Point2<f64>,
    ) -> Option<u32> {
        self.records(frame_idx, camera)
            .map(|r| (r.identity, na::distance_squared(&r.position(), &point)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    /// Moves a record along its dominant axis from `frame_idx` forward.
    ///
    /// Only the larger of `|dx|`, `|dy|` is applied, and only to the clicked camera.
    pub fn shift(&mut self, frame_idx: usize, key: &TrackKey, dx: f64, dy: f64) -> bool {
        match self.get_mut(frame_idx, key) {
            Some(record) => record.generation = Generation::Manual,
            None => return false,
        }

        let (dx, dy) = if dy.abs() > dx.abs() { (0.0, dy) } else { (dx, 0.0) };

        for frame in self.frames[frame_idx..].iter_mut() {
            if let Some(record) = frame.get_mut(key) {
                record.x += dx;
                record.y += dy;
            }
        }

        true
    }

    /// Sets the class of `identity` everywhere, returns the number of records touched
    pub fn change_class(&mut self, identity: u32, class: &str) -> usize {
        self.for_identity(identity, |r| r.class = class.to_string())
    }

    pub fn set_dimension(&mut self, identity: u32, dim: Dimension, value: f64) -> usize {
        self.for_identity(identity, |r| r.set_dimension(dim, value))
    }

    fn for_identity<F: FnMut(&mut ObjectRecord)>(&mut self, identity: u32, mut f: F) -> usize {
        let mut touched = 0;

        for frame in &mut self.frames {
            for record in frame.iter_mut().filter(|r| r.identity == identity) {
                f(record);
                touched += 1;
            }
        }

        touched
    }

    /// Removes `key` from `frame_idx` and the next `n_frames - 1` frames,
    /// or every following frame when `n_frames` is `None`
    pub fn delete(&mut self, frame_idx: usize, key: &TrackKey, n_frames: Option<usize>) -> usize {
        let stop = match n_frames {
            Some(n) => frame_idx.saturating_add(n).min(self.frames.len()),
            None => self.frames.len(),
        };

        if frame_idx >= stop {
            return 0;
        }

        self.frames[frame_idx..stop]
            .iter_mut()
            .filter_map(|f| f.remove(key))
            .count()
    }

    /// Drops every record for which `keep` is false
    pub fn retain<F: FnMut(&ObjectRecord) -> bool>(&mut self, mut keep: F) {
        for frame in &mut self.frames {
            frame.retain(&mut keep);
        }
    }

    /// Snapshots `frame_idx` so the next action on it can be undone
    pub fn checkpoint(&mut self, frame_idx: usize) {
        self.ensure_len(frame_idx + 1);
        let snapshot = self.frames[frame_idx].clone();
        self.undo.push(frame_idx, snapshot);
    }

    /// Restores the most recent snapshot
    pub fn undo(&mut self) -> bool {
        match self.undo.pop() {
            Some((frame_idx, frame)) => {
                debug!("Restoring frame {}", frame_idx);
                self.ensure_len(frame_idx + 1);
                self.frames[frame_idx] = frame;
                true
            }
            None => {
                info!("Can't undo");
                false
            }
        }
    }

    #[inline]
    pub fn discard_undo(&mut self) {
        self.undo.clear()
    }
}
