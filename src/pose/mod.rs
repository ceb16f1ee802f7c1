pub mod keypoint;

#[cfg(feature = "inference")]
pub mod detector;
#[cfg(feature = "inference")]
pub mod preprocess;

pub use keypoint::{JointId, Keypoint, KeypointSet, VIS_THRESHOLD};

#[cfg(feature = "inference")]
pub use detector::PoseDetector;
