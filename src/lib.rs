pub mod aligner;
pub mod bbox;
pub mod config;
pub mod curvature;
pub mod detection;
pub mod detector;
pub mod driver;
pub mod error;
pub mod export;
pub mod frame;
pub mod interpolate;
pub mod math;
pub mod record;
pub mod session;
pub mod store;
pub mod time_bias;
pub mod transform;

pub use aligner::{AlignTarget, Alignment, BoxAligner};
pub use config::Config;
pub use curvature::CurvatureModel;
pub use detection::Detection;
pub use detector::Detector;
pub use driver::MigrationReport;
pub use error::{Error, Result};
pub use frame::Frame;
pub use record::{Dimension, Direction, Generation, ObjectRecord, StateBox, TrackKey};
pub use session::Session;
pub use store::TrackStore;
pub use time_bias::TimeBias;
pub use transform::{CameraModel, DirectionalHomography, Homography, ProjectiveCamera};
