use crate::record::{ObjectRecord, TrackKey};

use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// All records of one tick, at most one per `(camera, identity)`
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(from = "Vec<ObjectRecord>", into = "Vec<ObjectRecord>")]
pub struct Frame {
    records: BTreeMap<TrackKey, ObjectRecord>,
}

impl Frame {
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[inline]
    pub fn get(&self, key: &TrackKey) -> Option<&ObjectRecord> {
        self.records.get(key)
    }

    #[inline]
    pub fn get_mut(&mut self, key: &TrackKey) -> Option<&mut ObjectRecord> {
        self.records.get_mut(key)
    }

    /// Stores `record` under its own key, returning the one it replaced
    #[inline]
    pub fn insert(&mut self, record: ObjectRecord) -> Option<ObjectRecord> {
        self.records.insert(record.key(), record)
    }

    #[inline]
    pub fn remove(&mut self, key: &TrackKey) -> Option<ObjectRecord> {
        self.records.remove(key)
    }

    #[inline]
    pub fn clear(&mut self) {
        self.records.clear()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &ObjectRecord> {
        self.records.values()
    }

    #[inline]
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ObjectRecord> {
        self.records.values_mut()
    }

    #[inline]
    pub fn camera<'a>(&'a self, camera: &'a str) -> impl Iterator<Item = &'a ObjectRecord> + 'a {
        self.records.values().filter(move |r| r.camera == camera)
    }

    pub fn retain<F: FnMut(&ObjectRecord) -> bool>(&mut self, mut f: F) {
        self.records.retain(|_, r| f(r))
    }
}

impl From<Vec<ObjectRecord>> for Frame {
    fn from(records: Vec<ObjectRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.key(), r)).collect(),
        }
    }
}

impl From<Frame> for Vec<ObjectRecord> {
    fn from(frame: Frame) -> Self {
        frame.records.into_values().collect()
    }
}
