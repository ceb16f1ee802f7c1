use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{AnalysisError, Result};
use crate::pose::keypoint::KeypointSet;
use crate::score::{Aggregates, FrameScore};

/// 活動判定の来歴
#[derive(Debug, Clone, Serialize)]
pub struct FilterSummary {
    /// "motion_rule" / "classifier" / "none"
    pub method: String,
    /// フォールバック理由・検出ギャップなどの注記
    pub reason: String,
    pub active_frames: usize,
    pub rest_frames: usize,
    /// 分類器がルール判定を覆したフレーム数
    pub fallback_frames: usize,
}

/// オーバーレイ描画用に全フレーム分保持するキーポイントレコード
#[derive(Debug, Clone, Serialize)]
pub struct FrameKeypoints {
    pub frame_idx: usize,
    /// サンプリング時刻(秒)
    pub timestamp: f64,
    /// サムネイルパス。コアにとっては不透明なトークン
    pub thumbnail: Option<String>,
    /// 検出そのままのキーポイント(ピクセル座標)
    pub keypoints: KeypointSet,
    /// 採点対象として選択されたか
    pub selected: bool,
}

/// 関節別の平均角度差
#[derive(Debug, Clone, Serialize)]
pub struct JointDiff {
    pub angle: String,
    pub mean_abs_diff_deg: f32,
}

/// DTW 類似度の集計結果
#[derive(Debug, Clone, Serialize)]
pub struct DtwResult {
    pub overall_dtw_score: f32,
    pub phase_dtw_scores: BTreeMap<String, f32>,
    pub phase_segment_counts: BTreeMap<String, usize>,
    /// 平均 |Δ角| の大きい順に最大4件
    pub worst_joints: Vec<JointDiff>,
}

/// レポートに付く警告
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "message")]
pub enum ReportWarning {
    /// 完了レップが検出できなかった(exercise_count = 0 の縮退レポート)
    InsufficientMotion(String),
}

/// 解析コアの唯一の成果物
///
/// 各フィールドは生成ステージで一度だけ作られ、以後不変。
/// マップはすべて BTreeMap なので直列化はバイト単位で決定的。
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub video_name: String,
    pub exercise_type: String,
    pub grip_type: Option<String>,
    /// 元動画の長さ(秒)
    pub duration: f64,
    /// 抽出フレームレート
    pub fps: u32,
    /// 抽出フレーム総数
    pub total_frames: usize,
    /// 完了レップ数
    pub exercise_count: u32,
    pub frame_scores: Vec<FrameScore>,
    /// frame_scores のうち errors が空でないもの
    pub error_frames: Vec<FrameScore>,
    pub keypoints: Vec<FrameKeypoints>,
    pub selected_frame_indices: Vec<usize>,
    pub analyzed_frame_count: usize,
    pub scored_frame_count: usize,
    pub filtered_out_count: usize,
    /// 有効な検出が得られたフレーム数
    pub detected_frame_count: usize,
    pub filtering: FilterSummary,
    pub aggregates: Aggregates,
    pub dtw_active: bool,
    pub dtw_result: Option<DtwResult>,
    pub warning: Option<ReportWarning>,
}

impl Report {
    /// 警告レベルの縮退レポートを厳格扱いのエラーへ変換する
    pub fn require_motion(self) -> Result<Report> {
        match &self.warning {
            Some(ReportWarning::InsufficientMotion(msg)) => {
                Err(AnalysisError::InsufficientMotion(msg.clone()))
            }
            None => Ok(self),
        }
    }
}
