pub mod extract;

pub use extract::{extract_frames, ExtractedFrame, Extraction, VideoMeta};
