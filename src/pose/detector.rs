use std::path::Path;

use ndarray::ArrayViewD;
use opencv::core::Mat;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tracing::debug;

use crate::error::{AnalysisError, Result};

use super::keypoint::{JointId, Keypoint, KeypointSet};
use super::preprocess::letterbox_batch;

/// 人物検出の採用閾値
const PERSON_SCORE_THRESHOLD: f32 = 0.25;

/// モデル入力の一辺(ピクセル)
const DEFAULT_INPUT_SIZE: i32 = 640;

/// 出力1アンカーあたりの要素数: 4 bbox + 1 score + 17×3 keypoints
const ANCHOR_DIM: usize = 5 + JointId::COUNT * 3;

fn infer_err(e: impl std::fmt::Display) -> AnalysisError {
    AnalysisError::Detection(format!("inference failed: {e}"))
}

/// YOLO 系 pose モデルを使った姿勢検出器
///
/// 出力レイアウトは [N, 56, A]。フレームごとに最高スコアの人物
/// 1体だけを採用し、未検出フレームは全点欠損として返す。
/// ハンドルはプロセス起動時に1つ作って使い回す。
pub struct PoseDetector {
    session: Session,
    input_size: i32,
}

impl PoseDetector {
    /// ONNX モデルを読み込んで初期化
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        Self::with_input_size(model_path, DEFAULT_INPUT_SIZE)
    }

    pub fn with_input_size<P: AsRef<Path>>(model_path: P, input_size: i32) -> Result<Self> {
        let session = Session::builder()
            .map_err(|e| AnalysisError::Input(format!("failed to build session: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| AnalysisError::Input(format!("failed to build session: {e}")))?
            .commit_from_file(model_path.as_ref())
            .map_err(|e| {
                AnalysisError::Input(format!(
                    "failed to load pose model {}: {e}",
                    model_path.as_ref().display()
                ))
            })?;
        Ok(Self {
            session,
            input_size,
        })
    }

    /// 1バッチ分を推論する。出力順は入力順と一致
    pub fn detect_batch(&mut self, images: &[&Mat]) -> Result<Vec<KeypointSet>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        let (tensor, boxes) = letterbox_batch(images, self.input_size)?;
        let input = Tensor::from_array(tensor).map_err(infer_err)?;
        let outputs = self
            .session
            .run(ort::inputs!["images" => input])
            .map_err(infer_err)?;

        // [N, 56, A]
        let output: ArrayViewD<f32> = outputs["output0"]
            .try_extract_array()
            .map_err(infer_err)?;
        let shape = output.shape();
        if shape.len() != 3 || shape[0] != images.len() || shape[1] != ANCHOR_DIM {
            return Err(AnalysisError::Detection(format!(
                "unexpected model output shape {shape:?}"
            )));
        }
        let n_anchors = shape[2];

        let mut results = Vec::with_capacity(images.len());
        for (bi, letterbox) in boxes.iter().enumerate() {
            // 最高スコアの人物を1体選ぶ
            let mut best_score = 0.0f32;
            let mut best_anchor: Option<usize> = None;
            for a in 0..n_anchors {
                let score = output[[bi, 4, a]];
                if score > best_score && score >= PERSON_SCORE_THRESHOLD {
                    best_score = score;
                    best_anchor = Some(a);
                }
            }

            let Some(anchor) = best_anchor else {
                debug!(frame = bi, "no person detected");
                results.push(KeypointSet::default());
                continue;
            };

            let mut points = [Keypoint::missing(); JointId::COUNT];
            for (k, point) in points.iter_mut().enumerate() {
                let kx = output[[bi, 5 + k * 3, anchor]];
                let ky = output[[bi, 5 + k * 3 + 1, anchor]];
                let vis = output[[bi, 5 + k * 3 + 2, anchor]];
                let (sx, sy) = letterbox.to_source(kx, ky);
                *point = Keypoint::new(sx, sy, vis);
            }
            results.push(KeypointSet::new(points));
        }

        Ok(results)
    }
}
