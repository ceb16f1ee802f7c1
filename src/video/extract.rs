use std::fs;
use std::path::{Path, PathBuf};

use opencv::{
    core::{Mat, Vector},
    imgcodecs,
    prelude::*,
    videoio::{self, VideoCapture},
};
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::error::{AnalysisError, Result};

/// サムネイル JPEG の品質
const THUMBNAIL_JPEG_QUALITY: i32 = 85;

/// キャンセル確認の間隔(ソースフレーム数)
const CANCEL_CHECK_INTERVAL: usize = 32;

/// 元動画のメタ情報
#[derive(Debug, Clone, Copy)]
pub struct VideoMeta {
    pub src_fps: f64,
    pub duration: f64,
    pub width: i32,
    pub height: i32,
}

/// 抽出済みフレーム1枚
pub struct ExtractedFrame {
    pub frame_idx: usize,
    /// ソース時刻(秒)
    pub timestamp: f64,
    pub image: Mat,
    pub thumbnail: Option<PathBuf>,
}

pub struct Extraction {
    pub meta: VideoMeta,
    pub frames: Vec<ExtractedFrame>,
}

/// 動画を目標レートでサンプリングしてフレーム列にする
///
/// ソースフレーム i は floor(i·r_tgt/r_src) が前フレームから進んだ
/// ときだけ採用する。個別フレームのデコード失敗はログして落とし、
/// 採用対象の過半数が失敗したら DecodeError。
pub fn extract_frames(
    video_path: &Path,
    thumbnail_dir: Option<&Path>,
    extract_fps: u32,
    cancel: &CancelToken,
) -> Result<Extraction> {
    if !video_path.is_file() {
        return Err(AnalysisError::Input(format!(
            "video file not found: {}",
            video_path.display()
        )));
    }
    let path_str = video_path.to_str().ok_or_else(|| {
        AnalysisError::Input(format!("non-UTF8 video path: {}", video_path.display()))
    })?;

    let mut capture = VideoCapture::from_file(path_str, videoio::CAP_ANY)
        .map_err(|e| AnalysisError::Input(format!("failed to open video: {e}")))?;
    if !capture
        .is_opened()
        .map_err(|e| AnalysisError::Input(format!("failed to open video: {e}")))?
    {
        return Err(AnalysisError::Input(format!(
            "not a readable video: {}",
            video_path.display()
        )));
    }

    let src_fps = capture.get(videoio::CAP_PROP_FPS).unwrap_or(0.0);
    if src_fps <= 0.0 {
        return Err(AnalysisError::input("video reports no frame rate"));
    }
    let total_src_frames = capture.get(videoio::CAP_PROP_FRAME_COUNT).unwrap_or(0.0);
    let duration = if total_src_frames > 0.0 {
        total_src_frames / src_fps
    } else {
        0.0
    };
    let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH).unwrap_or(0.0) as i32;
    let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT).unwrap_or(0.0) as i32;

    if let Some(dir) = thumbnail_dir {
        fs::create_dir_all(dir)
            .map_err(|e| AnalysisError::Input(format!("failed to create thumbnail dir: {e}")))?;
    }

    let ratio = extract_fps as f64 / src_fps;
    let mut frames: Vec<ExtractedFrame> = Vec::new();
    let mut attempted = 0usize;
    let mut failed = 0usize;
    let mut src_idx = 0i64;

    loop {
        if src_idx as usize % CANCEL_CHECK_INTERVAL == 0 {
            cancel.checkpoint()?;
        }
        let grabbed = match capture.grab() {
            Ok(g) => g,
            Err(e) => {
                warn!("stream read aborted at source frame {src_idx}: {e}");
                break;
            }
        };
        if !grabbed {
            break;
        }

        let keep = floor_ratio(src_idx, ratio) > floor_ratio(src_idx - 1, ratio);
        if keep {
            attempted += 1;
            let mut image = Mat::default();
            let decoded = capture.retrieve(&mut image, 0).unwrap_or(false);
            if !decoded || image.empty() {
                warn!("dropped undecodable frame at source index {src_idx}");
                failed += 1;
            } else {
                let frame_idx = frames.len();
                let thumbnail = thumbnail_dir
                    .and_then(|dir| write_thumbnail(dir, frame_idx, &image));
                frames.push(ExtractedFrame {
                    frame_idx,
                    timestamp: src_idx as f64 / src_fps,
                    image,
                    thumbnail,
                });
            }
        }
        src_idx += 1;
    }

    if attempted > 0 && failed * 2 > attempted {
        return Err(AnalysisError::Decode(format!(
            "{failed} of {attempted} sampled frames failed to decode"
        )));
    }
    if frames.is_empty() {
        return Err(AnalysisError::input("zero-length video"));
    }
    if duration <= 0.0 {
        // フレームカウントを報告しないコンテナは実測で補う
        info!("container reports no duration; using decoded span");
    }
    let duration = if duration > 0.0 {
        duration
    } else {
        src_idx as f64 / src_fps
    };

    info!(
        frames = frames.len(),
        src_fps, duration, "frame extraction complete"
    );
    Ok(Extraction {
        meta: VideoMeta {
            src_fps,
            duration,
            width,
            height,
        },
        frames,
    })
}

fn floor_ratio(idx: i64, ratio: f64) -> i64 {
    (idx as f64 * ratio).floor() as i64
}

fn write_thumbnail(dir: &Path, frame_idx: usize, image: &Mat) -> Option<PathBuf> {
    let path = dir.join(format!("frame_{frame_idx:06}.jpg"));
    let path_str = path.to_str()?;
    let mut params = Vector::<i32>::new();
    params.push(imgcodecs::IMWRITE_JPEG_QUALITY);
    params.push(THUMBNAIL_JPEG_QUALITY);
    match imgcodecs::imwrite(path_str, image, &params) {
        Ok(true) => Some(path),
        Ok(false) | Err(_) => {
            warn!("failed to write thumbnail {}", path.display());
            None
        }
    }
}
