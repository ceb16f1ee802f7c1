pub mod cancel;
pub mod config;
pub mod dtw;
pub mod error;
pub mod phase;
pub mod pipeline;
pub mod pose;
pub mod report;
pub mod score;
pub mod segment;
pub mod signal;
#[cfg(feature = "inference")]
pub mod video;

pub use cancel::CancelToken;
pub use config::Config;
pub use error::{AnalysisError, Result};
#[cfg(feature = "inference")]
pub use pipeline::analyze;
pub use pipeline::{
    analyze_keypoint_stream, keypoint_stream_segments, AnalyzeRequest, FrameInfo, KeypointStream,
    StreamMeta,
};
pub use report::Report;
pub use score::{ExerciseKind, GripType};
