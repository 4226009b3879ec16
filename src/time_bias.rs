//! Camera clock alignment.
//!
//! Every camera runs on its own clock. An object seen by two adjacent cameras
//! passes the same x positions in both; the difference between the crossing
//! times in each camera's tracklet estimates the relative clock offset. Offsets
//! are composed along the fixed camera ordering, with camera 0 as reference.

use crate::config::{BiasPolicy, TimeBiasConfig};
use crate::error::{Error, Result};
use crate::math::{crossing, mean_stdev, EPSILON};
use crate::record::ObjectRecord;
use crate::store::TrackStore;

use serde_derive::{Deserialize, Serialize};
use tracing::{info, warn};

/// Additive correction for each camera's timestamps, indexed like `TrackStore::cameras`
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TimeBias(Vec<f64>);

impl TimeBias {
    pub fn zeros(cameras: usize) -> Self {
        Self(vec![0.0; cameras])
    }

    pub fn ensure_len(&mut self, cameras: usize) {
        if self.0.len() < cameras {
            self.0.resize(cameras, 0.0);
        }
    }

    #[inline]
    pub fn get(&self, camera_idx: usize) -> f64 {
        self.0.get(camera_idx).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, camera_idx: usize, bias: f64) {
        self.ensure_len(camera_idx + 1);
        self.0[camera_idx] = bias;
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Camera-local timestamp on the reference clock
    #[inline]
    pub fn corrected(&self, camera_idx: usize, ts: f64) -> f64 {
        ts + self.get(camera_idx)
    }

    /// Manual correction from a vertical drag of `pixels`
    pub fn nudge(&mut self, camera_idx: usize, pixels: f64, gain: f64) {
        let bias = self.get(camera_idx) + pixels * gain;
        self.set(camera_idx, bias);
    }
}

/// Statistics of the sampled differences between two cameras
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairOffset {
    pub mean: f64,
    pub stdev: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairReport {
    pub prev: String,
    pub cur: String,
    /// `None` when no identity overlaps in both cameras
    pub offset: Option<PairOffset>,
}

/// x positions and one other field of a tracklet, in time order
fn series<F>(store: &TrackStore, camera: &str, identity: u32, value: &F) -> (Vec<f64>, Vec<f64>)
where
    F: Fn(&ObjectRecord) -> f64,
{
    store
        .tracklet(camera, identity)
        .into_iter()
        .map(|(_, r)| (r.x, value(r)))
        .unzip()
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
}

/// Differences `value_cur - value_prev` at evenly spaced x samples across
/// every overlapping pair of tracklets.
fn overlap_differences<F>(
    store: &TrackStore,
    prev: &str,
    cur: &str,
    samples: usize,
    value: F,
) -> Vec<f64>
where
    F: Fn(&ObjectRecord) -> f64,
{
    let mut diffs = Vec::new();
    let samples = samples.max(1);

    for identity in store.identities() {
        let (prev_x, prev_v) = series(store, prev, identity, &value);
        let (cur_x, cur_v) = series(store, cur, identity, &value);

        if prev_x.len() < 2 || cur_x.len() < 2 {
            continue;
        }

        let (prev_min, prev_max) = min_max(&prev_x);
        let (cur_min, cur_max) = min_max(&cur_x);

        if prev_max <= cur_min {
            continue;
        }

        let lo = prev_min.max(cur_min);
        let hi = prev_max.min(cur_max);
        if hi < lo {
            continue;
        }

        let step = if samples > 1 {
            (hi - lo) / (samples - 1) as f64
        } else {
            0.0
        };

        for i in 0..samples {
            let at = lo + step * i as f64;

            if let (Some(c), Some(p)) = (crossing(&cur_x, &cur_v, at), crossing(&prev_x, &prev_v, at))
            {
                diffs.push(c - p);
            }
        }
    }

    diffs
}

/// Mean clock offset of `cur` relative to `prev`; positive when `cur` runs ahead
pub fn pair_offset(store: &TrackStore, prev: &str, cur: &str, samples: usize) -> Option<PairOffset> {
    let diffs = overlap_differences(store, prev, cur, samples, |r| r.timestamp);
    let (mean, stdev) = mean_stdev(&diffs)?;

    Some(PairOffset {
        mean,
        stdev,
        count: diffs.len(),
    })
}

/// Re-estimates every camera's bias by composing adjacent pair offsets.
///
/// On failure under [`BiasPolicy::Error`] `bias` is left untouched.
pub fn estimate(
    store: &TrackStore,
    bias: &mut TimeBias,
    config: &TimeBiasConfig,
) -> Result<Vec<PairReport>> {
    let cameras = store.cameras();
    let mut next = bias.clone();
    next.ensure_len(cameras.len());
    next.set(0, 0.0);

    let mut reports = Vec::with_capacity(cameras.len().saturating_sub(1));

    for idx in 1..cameras.len() {
        let (prev, cur) = (&cameras[idx - 1], &cameras[idx]);
        let offset = pair_offset(store, prev, cur, config.samples);

        match offset {
            Some(o) => {
                info!(
                    "Camera {} offset relative to camera {}: {}s ({}s stdev)",
                    cur, prev, o.mean, o.stdev
                );
                next.set(idx, next.get(idx - 1) - o.mean);
            }
            None => match config.policy {
                BiasPolicy::Propagate => {
                    warn!("No matching points for cameras {} and {}", cur, prev);
                    next.set(idx, next.get(idx - 1));
                }
                BiasPolicy::Error => {
                    return Err(Error::NoMatchingPoints {
                        prev: prev.clone(),
                        cur: cur.clone(),
                    })
                }
            },
        }

        reports.push(PairReport {
            prev: prev.clone(),
            cur: cur.clone(),
            offset,
        });
    }

    *bias = next;
    Ok(reports)
}

/// Mean absolute lateral disagreement between adjacent cameras at shared x positions
pub fn lateral_agreement(store: &TrackStore, samples: usize) -> Vec<PairReport> {
    let cameras = store.cameras();
    let mut reports = Vec::new();
    let mut means = Vec::new();

    for pair in cameras.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        let diffs: Vec<f64> = overlap_differences(store, prev, cur, samples, |r| r.y)
            .into_iter()
            .map(f64::abs)
            .collect();

        let offset = mean_stdev(&diffs).map(|(mean, stdev)| PairOffset {
            mean,
            stdev,
            count: diffs.len(),
        });

        match offset {
            Some(o) => {
                info!(
                    "Camera {} and {} average y-error: {}ft ({}ft stdev)",
                    cur, prev, o.mean, o.stdev
                );
                means.push(o.mean);
            }
            None => warn!("No matching points for cameras {} and {}", cur, prev),
        }

        reports.push(PairReport {
            prev: prev.clone(),
            cur: cur.clone(),
            offset,
        });
    }

    if let Some((mean, _)) = mean_stdev(&means) {
        info!("Average y-error over all cameras: {}", mean);
    }

    reports
}

/// Bias-corrected trajectory of one identity in one camera, for plotting hosts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrajectorySeries {
    /// seconds since the earliest camera timestamp of frame 0
    pub times: Vec<f64>,
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    /// finite-difference x velocity, ft/s
    pub velocities: Vec<f64>,
    pub length: f64,
}

impl TrajectorySeries {
    pub fn collect(
        store: &TrackStore,
        bias: &TimeBias,
        camera: &str,
        identity: u32,
        stride: usize,
    ) -> Option<Self> {
        let camera_idx = store.camera_index(camera)?;
        let t0 = store
            .timestamps(0)
            .and_then(|ts| ts.values().copied().reduce(f64::min))
            .unwrap_or(0.0);

        let mut series = TrajectorySeries::default();

        for (_, r) in store
            .tracklet(camera, identity)
            .into_iter()
            .filter(|(idx, _)| idx % stride.max(1) == 0)
        {
            series.times.push(bias.corrected(camera_idx, r.timestamp) - t0);
            series.xs.push(r.x);
            series.ys.push(r.y);
            series.length = r.length;
        }

        if series.times.len() < 2 {
            return None;
        }

        series.velocities = series
            .xs
            .windows(2)
            .zip(series.times.windows(2))
            .map(|(x, t)| (x[1] - x[0]) / (t[1] - t[0] + EPSILON))
            .collect();

        let last = series.velocities.last().copied().unwrap_or(0.0);
        series.velocities.push(last);

        Some(series)
    }
}
