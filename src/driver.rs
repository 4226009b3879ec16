//! Whole-store passes run after the camera model or the lane curves change.
//!
//! Both passes derive every keyframe's new value from its current value,
//! drop all interpolated records and re-interpolate every identity. Running a
//! pass twice gives the same store as running it once.

use crate::aligner::AlignTarget;
use crate::error::Result;
use crate::interpolate::interpolate_all;
use crate::record::ObjectRecord;
use crate::session::Session;
use crate::transform::Homography;

use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MigrationReport {
    pub frames: usize,
    /// Keyframes given a new position
    pub realigned: usize,
    /// Mean squared reprojection error of the realigned keyframes, in pixels
    pub mean_error: f64,
    /// Records written by re-interpolation
    pub interpolated: usize,
}

/// Moves every keyframe so that its ground footprint under `homography`
/// projects where it projected under the current model, then switches models.
///
/// All new positions are computed before anything is written; a failure
/// leaves the session untouched.
pub fn replace_homography<H: Homography + Serialize>(
    session: &mut Session<H>,
    homography: H,
) -> Result<MigrationReport> {
    let interval = session.config.progress_interval.max(1);
    let mut updates: Vec<(usize, ObjectRecord)> = Vec::new();
    let mut total_error = 0.0;

    for (frame_idx, frame) in session.store.frames().enumerate() {
        if frame_idx % interval == 0 {
            info!(
                "On frame {}. Average error so far: {:.4}",
                frame_idx,
                total_error / updates.len().max(1) as f64
            );
        }

        for record in frame.iter().filter(|r| r.generation.is_keyframe()) {
            let raw = session.curvature.invert(record);
            let template = raw.state_box();

            let target =
                match AlignTarget::footprint_of(&session.homography, &raw.camera, &template)? {
                    Some(t) => t,
                    None => continue,
                };

            let alignment = session.aligner.align(
                &homography,
                &raw.camera,
                &template,
                raw.position(),
                &target,
            )?;

            let mut moved = ObjectRecord {
                x: alignment.x,
                y: alignment.y,
                ..raw
            };
            session.curvature.apply(&mut moved);

            total_error += alignment.error;
            updates.push((frame_idx, moved));
        }
    }

    let realigned = updates.len();
    session.store.retain(|r| r.generation.is_keyframe());
    for (frame_idx, record) in updates {
        session.store.insert(frame_idx, record);
    }
    session.homography = homography;

    finish(session, realigned, total_error / realigned.max(1) as f64)
}

/// Re-derives every keyframe's lateral position under the current curves
pub fn reapply_curvature<H: Homography + Serialize>(
    session: &mut Session<H>,
) -> Result<MigrationReport> {
    let interval = session.config.progress_interval.max(1);
    let mut realigned = 0;

    session.store.retain(|r| r.generation.is_keyframe());

    for frame_idx in 0..session.store.len() {
        if frame_idx % interval == 0 {
            info!("On frame {}.", frame_idx);
        }

        if let Some(frame) = session.store.frame_mut(frame_idx) {
            for record in frame.iter_mut() {
                session.curvature.apply(record);
                realigned += 1;
            }
        }
    }

    finish(session, realigned, 0.0)
}

fn finish<H: Homography + Serialize>(
    session: &mut Session<H>,
    realigned: usize,
    mean_error: f64,
) -> Result<MigrationReport> {
    let interpolated = interpolate_all(&mut session.store);
    session.store.discard_undo();

    let report = MigrationReport {
        frames: session.store.len(),
        realigned,
        mean_error,
        interpolated,
    };

    info!(
        "Rederived {} keyframes over {} frames, interpolated {} boxes",
        report.realigned, report.frames, report.interpolated
    );

    session.persist()?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::Error;
    use crate::record::{Direction, Generation, TrackKey};
    use crate::store::tests::record;
    use crate::transform::tests::{sample_camera, sample_model};
    use crate::transform::{CameraModel, ProjectiveCamera};
    use approx::assert_abs_diff_eq;
    use nalgebra as na;

    fn session() -> Session<ProjectiveCamera> {
        let mut s = Session::new(["p1c1", "p1c2"], sample_camera(), Config::default());
        let store = s.store_mut();

        for f in 0..=10 {
            store.set_timestamp(f, "p1c1", f as f64 * 0.1);
            store.set_timestamp(f, "p1c2", f as f64 * 0.1);
        }

        store.insert(0, record("p1c1", 1, 100.0, 20.0, 0.0));
        store.insert(10, record("p1c1", 1, 120.0, 24.0, 1.0));
        store.insert(4, record("p1c2", 2, 150.0, 30.0, 0.4));
        interpolate_all(store);
        s
    }

    /// Same view with the ground origin moved `dx` feet back along the road
    fn moved_model(offset: f64, dx: f64) -> CameraModel {
        let mut model = sample_model(offset);
        let col = model.projection.column(3) - model.projection.column(0) * dx;
        model.projection.set_column(3, &col);
        model
    }

    fn moved_camera(dx: f64) -> ProjectiveCamera {
        ProjectiveCamera::new()
            .with_camera("p1c1", moved_model(0.0, dx))
            .with_camera("p1c2", moved_model(-400.0, dx))
    }

    #[test]
    fn identical_model_keeps_positions() {
        let mut s = session();
        let before: Vec<_> = s.store().frames().cloned().collect();

        let report = replace_homography(&mut s, sample_camera()).unwrap();
        assert_eq!(report.realigned, 3);
        assert_eq!(report.interpolated, 9);
        assert_abs_diff_eq!(report.mean_error, 0.0, epsilon = 1e-12);

        let after: Vec<_> = s.store().frames().cloned().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn keyframes_follow_moved_ground_origin() {
        let mut s = session();
        let report = replace_homography(&mut s, moved_camera(10.0)).unwrap();

        assert_eq!(report.frames, 11);
        assert!(report.mean_error < 1e-6);

        let key = TrackKey::new("p1c1", 1);
        let first = s.store().get(0, &key).unwrap();
        assert_abs_diff_eq!(first.x, 110.0, epsilon = 1e-6);
        assert_abs_diff_eq!(first.y, 20.0, epsilon = 1e-6);

        let mid = s.store().get(5, &key).unwrap();
        assert_eq!(mid.generation, Generation::Interpolation);
        assert_abs_diff_eq!(mid.x, 120.0, epsilon = 1e-6);

        let other = s.store().get(4, &TrackKey::new("p1c2", 2)).unwrap();
        assert_abs_diff_eq!(other.x, 160.0, epsilon = 1e-6);
        assert_eq!(s.homography(), &moved_camera(10.0));
    }

    #[test]
    fn failed_migration_leaves_session_untouched() {
        let mut s = session();
        let before: Vec<_> = s.store().frames().cloned().collect();

        let partial = ProjectiveCamera::new().with_camera("p1c1", sample_model(0.0));
        let res = replace_homography(&mut s, partial);

        assert!(matches!(res, Err(Error::UnknownCamera(_))));
        let after: Vec<_> = s.store().frames().cloned().collect();
        assert_eq!(before, after);
        assert_eq!(s.homography(), &sample_camera());
    }

    fn stale_gap(s: &Session<ProjectiveCamera>) -> Vec<usize> {
        let key = TrackKey::new("p1c1", 1);
        (1..=10).filter(|f| s.store().get(*f, &key).is_some()).collect()
    }

    #[test]
    fn passes_drop_gaps_of_deleted_keyframes() {
        let mut s = session();
        s.store_mut().remove(10, &TrackKey::new("p1c1", 1));
        assert_eq!(stale_gap(&s).len(), 9);

        let report = replace_homography(&mut s, moved_camera(10.0)).unwrap();
        assert_eq!(report.realigned, 2);
        assert_eq!(report.interpolated, 0);
        assert!(stale_gap(&s).is_empty());

        let mut s = session();
        s.store_mut().remove(10, &TrackKey::new("p1c1", 1));

        let report = reapply_curvature(&mut s).unwrap();
        assert_eq!(report.realigned, 2);
        assert_eq!(report.interpolated, 0);
        assert!(stale_gap(&s).is_empty());
    }

    #[test]
    fn deleting_keyframe_then_interpolating_clears_gap() {
        let mut s = session();
        assert_eq!(s.delete(10, "p1c1", 1, Some(1)).unwrap(), 1);
        assert_eq!(s.interpolate(1).unwrap(), 0);
        assert!(stale_gap(&s).is_empty());

        let before: Vec<_> = s.store().frames().cloned().collect();
        replace_homography(&mut s, sample_camera()).unwrap();
        let after: Vec<_> = s.store().frames().cloned().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn curvature_pass_is_rerunnable() {
        let mut s = session();
        for i in 0..5 {
            let x = 60.0 + i as f64 * 30.0;
            s.curvature.add_point(
                "p1c1",
                Direction::Eastbound,
                na::Point2::new(x, 2.0 + 0.02 * x),
                0.0,
                4,
            );
        }

        let first = reapply_curvature(&mut s).unwrap();
        assert_eq!(first.realigned, 3);
        let once: Vec<_> = s.store().frames().cloned().collect();

        let key = TrackKey::new("p1c1", 1);
        let r = s.store().get(10, &key).unwrap();
        assert_abs_diff_eq!(r.y, 24.0 - (2.0 + 0.02 * 120.0), epsilon = 1e-4);
        assert_eq!(s.store().get(3, &key).unwrap().generation, Generation::Interpolation);

        // untouched camera keeps its positions
        assert_eq!(s.store().get(4, &TrackKey::new("p1c2", 2)).unwrap().y, 30.0);

        reapply_curvature(&mut s).unwrap();
        let twice: Vec<_> = s.store().frames().cloned().collect();
        assert_eq!(once, twice);
    }
}
