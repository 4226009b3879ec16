use crate::math::EPSILON;
use crate::record::{Generation, ObjectRecord, TrackKey};
use crate::store::TrackStore;

use tracing::debug;

/// Camera timestamp of a frame, falling back to a record's own timestamp
#[inline]
fn frame_time(store: &TrackStore, frame_idx: usize, camera: &str, fallback: f64) -> f64 {
    store.timestamp(frame_idx, camera).unwrap_or(fallback)
}

/// Fills every gap between consecutive keyframes of one camera track.
///
/// Positions are blended linearly in time; everything else is copied from the
/// preceding keyframe. Keyframes are never modified. Every earlier
/// interpolation of the track is dropped first, so records outside the
/// remaining gaps disappear. Returns the number of records written.
pub fn interpolate_track(store: &mut TrackStore, camera: &str, identity: u32) -> usize {
    let key = TrackKey::new(camera, identity);
    let mut keyframes: Vec<(usize, ObjectRecord)> = Vec::new();
    let mut stale: Vec<usize> = Vec::new();

    for (idx, r) in store.tracklet(camera, identity) {
        if r.generation.is_keyframe() {
            keyframes.push((idx, r.clone()));
        } else {
            stale.push(idx);
        }
    }

    for idx in stale {
        store.remove(idx, &key);
    }

    let mut filled = 0;

    for pair in keyframes.windows(2) {
        let (prev_idx, prev) = (pair[0].0, &pair[0].1);
        let (cur_idx, cur) = (pair[1].0, &pair[1].1);

        if cur_idx <= prev_idx + 1 {
            continue;
        }

        let t_prev = frame_time(store, prev_idx, camera, prev.timestamp);
        let t_cur = frame_time(store, cur_idx, camera, cur.timestamp);
        let span = t_cur - t_prev;

        for idx in prev_idx + 1..cur_idx {
            let index_ratio = (cur_idx - idx) as f64 / (cur_idx - prev_idx) as f64;
            let t_i = frame_time(store, idx, camera, t_cur - span * index_ratio);

            // weight of the preceding keyframe
            let w1 = if span.abs() < EPSILON {
                index_ratio
            } else {
                (t_cur - t_i) / span
            };
            let w2 = 1.0 - w1;

            let record = ObjectRecord {
                x: w1 * prev.x + w2 * cur.x,
                y: w1 * prev.y + w2 * cur.y,
                lateral_offset: w1 * prev.lateral_offset + w2 * cur.lateral_offset,
                timestamp: t_i,
                generation: Generation::Interpolation,
                ..prev.clone()
            };

            store.insert(idx, record);
            filled += 1;
        }
    }

    filled
}

/// Interpolates `identity` independently in every camera
pub fn interpolate_identity(store: &mut TrackStore, identity: u32) -> usize {
    let cameras = store.cameras().to_vec();
    let filled: usize = cameras
        .iter()
        .map(|camera| interpolate_track(store, camera, identity))
        .sum();

    debug!("Interpolated {} boxes for object {}", filled, identity);
    filled
}

pub fn interpolate_all(store: &mut TrackStore) -> usize {
    store
        .identities()
        .into_iter()
        .map(|identity| interpolate_identity(store, identity))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::record;
    use approx::assert_abs_diff_eq;

    fn store_with_keyframes() -> TrackStore {
        let mut store = TrackStore::new(["p1c1", "p1c2"]);
        for f in 0..=30 {
            // uneven spacing: every third frame arrives late
            let jitter = if f % 3 == 0 { 0.02 } else { 0.0 };
            store.set_timestamp(f, "p1c1", 9.0 + f as f64 * 0.1 + jitter);
            store.set_timestamp(f, "p1c2", 50.0 + f as f64 * 0.1);
        }

        store.insert(10, record("p1c1", 3, 100.0, 20.0, 10.0));
        store.insert(20, record("p1c1", 3, 110.0, 24.0, 11.0));
        store
    }

    #[test]
    fn fills_gap_linearly_in_time() {
        let mut store = store_with_keyframes();
        assert_eq!(interpolate_track(&mut store, "p1c1", 3), 9);

        let key = TrackKey::new("p1c1", 3);
        let t0 = store.timestamp(10, "p1c1").unwrap();
        let t1 = store.timestamp(20, "p1c1").unwrap();

        for idx in 11..20 {
            let r = store.get(idx, &key).unwrap();
            let t = store.timestamp(idx, "p1c1").unwrap();
            let ratio = (t - t0) / (t1 - t0);

            assert_eq!(r.generation, Generation::Interpolation);
            assert_eq!(r.timestamp, t);
            assert_abs_diff_eq!(r.x, 100.0 + 10.0 * ratio, epsilon = 1e-9);
            assert_abs_diff_eq!(r.y, 20.0 + 4.0 * ratio, epsilon = 1e-9);
        }

        assert_eq!(store.get(10, &key).unwrap().generation, Generation::Manual);
        assert_eq!(store.get(20, &key).unwrap().x, 110.0);
        assert!(store.get(9, &key).is_none());
        assert!(store.get(21, &key).is_none());
    }

    #[test]
    fn rerun_is_identical() {
        let mut store = store_with_keyframes();
        interpolate_identity(&mut store, 3);
        let first: Vec<_> = store.frames().cloned().collect();

        interpolate_identity(&mut store, 3);
        let second: Vec<_> = store.frames().cloned().collect();

        assert_eq!(first, second);
    }

    #[test]
    fn moved_keyframe_recomputes_gap() {
        let mut store = store_with_keyframes();
        interpolate_all(&mut store);

        let key = TrackKey::new("p1c1", 3);
        store.get_mut(20, &key).unwrap().x = 130.0;
        interpolate_all(&mut store);

        let mid = store.get(15, &key).unwrap();
        assert!(mid.x > 110.0);
    }

    #[test]
    fn deleted_keyframe_leaves_no_stale_gap() {
        let mut store = TrackStore::new(["p1c1"]);
        store.insert(0, record("p1c1", 4, 0.0, 20.0, 0.0));
        store.insert(10, record("p1c1", 4, 100.0, 20.0, 1.0));
        assert_eq!(interpolate_identity(&mut store, 4), 9);

        let key = TrackKey::new("p1c1", 4);
        store.remove(10, &key);
        assert_eq!(interpolate_identity(&mut store, 4), 0);

        for idx in 1..=10 {
            assert!(store.get(idx, &key).is_none());
        }
        assert_eq!(store.get(0, &key).unwrap().x, 0.0);
    }

    #[test]
    fn manual_box_splits_old_gap() {
        let mut store = store_with_keyframes();
        interpolate_track(&mut store, "p1c1", 3);

        let key = TrackKey::new("p1c1", 3);
        let mut keyframe = store.get(14, &key).unwrap().clone();
        keyframe.generation = Generation::Manual;
        keyframe.x = 150.0;
        store.insert(14, keyframe);

        assert_eq!(interpolate_track(&mut store, "p1c1", 3), 8);
        assert_eq!(store.get(14, &key).unwrap().x, 150.0);
        assert!(store.get(12, &key).unwrap().x > 100.0);
        assert!(store.get(16, &key).unwrap().x > 110.0);
    }

    #[test]
    fn cameras_are_independent() {
        let mut store = store_with_keyframes();
        store.insert(2, record("p1c2", 3, 400.0, 20.0, 50.2));
        interpolate_identity(&mut store, 3);

        for idx in 0..=30 {
            assert!(store.get(idx, &TrackKey::new("p1c2", 3)).map_or(true, |r| r.x == 400.0));
        }
    }

    #[test]
    fn repeated_timestamps_fall_back_to_index() {
        let mut store = TrackStore::new(["a"]);
        for f in 0..=4 {
            store.set_timestamp(f, "a", 7.0);
        }
        store.insert(0, record("a", 1, 0.0, 0.0, 7.0));
        store.insert(4, record("a", 1, 8.0, 0.0, 7.0));

        interpolate_track(&mut store, "a", 1);
        assert_abs_diff_eq!(store.get(1, &TrackKey::new("a", 1)).unwrap().x, 2.0);
    }
}
