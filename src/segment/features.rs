use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::pose::keypoint::{JointId, KeypointSet};
use crate::signal::angles::distance;
use crate::signal::series::AngleSeries;

/// フォールバック分類器の特徴次元
pub const FEATURE_DIM: usize = 7;

/// 同梱の既定重み
const DEFAULT_WEIGHTS_JSON: &str = include_str!("../../assets/activity_classifier.json");

fn default_on_threshold() -> f32 { 0.56 }
fn default_off_threshold() -> f32 { 0.42 }
fn default_smooth_window() -> usize { 5 }

/// 活動判定フォールバック用のロジスティック分類器
///
/// 学習済み重みは JSON から読み込む。確率列を移動平均で均した後、
/// on/off の2閾値ヒステリシスでラベル化する。
#[derive(Debug, Clone, Deserialize)]
pub struct ActivityClassifier {
    weights: Vec<f32>,
    bias: f32,
    #[serde(default = "default_on_threshold")]
    on_threshold: f32,
    #[serde(default = "default_off_threshold")]
    off_threshold: f32,
    #[serde(default = "default_smooth_window")]
    smooth_window: usize,
}

impl ActivityClassifier {
    pub fn from_json(text: &str) -> Option<Self> {
        let classifier: ActivityClassifier = match serde_json::from_str(text) {
            Ok(c) => c,
            Err(e) => {
                warn!("failed to parse activity classifier weights: {e}");
                return None;
            }
        };
        if classifier.weights.len() != FEATURE_DIM {
            warn!(
                "activity classifier expects {FEATURE_DIM} weights, got {}",
                classifier.weights.len()
            );
            return None;
        }
        Some(classifier)
    }

    /// ファイル指定があればそれを、なければ同梱の既定重みを読む
    pub fn load(path: Option<&Path>) -> Option<Self> {
        match path {
            Some(p) => match fs::read_to_string(p) {
                Ok(text) => Self::from_json(&text),
                Err(e) => {
                    warn!("failed to read activity classifier {}: {e}", p.display());
                    None
                }
            },
            None => Self::from_json(DEFAULT_WEIGHTS_JSON),
        }
    }

    pub fn probability(&self, features: &[f32; FEATURE_DIM]) -> f32 {
        let z: f32 = self
            .weights
            .iter()
            .zip(features.iter())
            .map(|(w, x)| w * x)
            .sum::<f32>()
            + self.bias;
        1.0 / (1.0 + (-z).exp())
    }

    /// フレーム列をラベル化する
    pub fn label_stream(&self, features: &[[f32; FEATURE_DIM]]) -> Vec<bool> {
        let probs: Vec<f32> = features.iter().map(|f| self.probability(f)).collect();
        let probs = smooth_probs(&probs, self.smooth_window);

        let mut labels = Vec::with_capacity(probs.len());
        let mut active = false;
        for p in probs {
            if !active && p >= self.on_threshold {
                active = true;
            } else if active && p <= self.off_threshold {
                active = false;
            }
            labels.push(active);
        }
        labels
    }
}

fn smooth_probs(probs: &[f32], window: usize) -> Vec<f32> {
    if probs.is_empty() || window <= 1 {
        return probs.to_vec();
    }
    let half = window / 2;
    let n = probs.len();
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            probs[lo..hi].iter().sum::<f32>() / (hi - lo) as f32
        })
        .collect()
}

/// 分類器入力の1フレーム分特徴を組み立てる
///
/// [ドライバ角/180, エネルギー, 平均vis, 肩-手首の相対高さ, 骨盤y,
///  ドライバ速度, 首-足首中点の距離]
pub fn frame_features(
    idx: usize,
    driver: &AngleSeries,
    energy: &[f32],
    sets: &[KeypointSet],
) -> [f32; FEATURE_DIM] {
    let set = &sets[idx];

    let angle = driver.get(idx).map_or(0.5, |v| v / 180.0);
    let e = (energy.get(idx).copied().unwrap_or(0.0) / 10.0).clamp(0.0, 1.0);
    let vis = set.mean_vis();

    let wrist_lift = match (wrist_y(set), shoulder_y(set)) {
        (Some(w), Some(s)) => s - w,
        _ => 0.0,
    };
    let pelvis = set.pelvis().map_or(0.5, |p| p[1]);

    let velocity = match (idx.checked_sub(1).and_then(|p| driver.get(p)), driver.get(idx)) {
        (Some(prev), Some(cur)) => ((cur - prev).abs() / 10.0).clamp(0.0, 1.0),
        _ => 0.0,
    };

    // 体の伸び。プランク姿勢とハングで値域が分かれる
    let extension = match (set.neck(), set.ankle_center()) {
        (Some(n), Some(a)) => distance(n, a),
        _ => 0.0,
    };

    [angle, e, vis, wrist_lift, pelvis, velocity, extension]
}

fn wrist_y(set: &KeypointSet) -> Option<f32> {
    match (
        set.point(JointId::LeftWrist),
        set.point(JointId::RightWrist),
    ) {
        (Some(l), Some(r)) => Some((l[1] + r[1]) / 2.0),
        (Some(l), None) => Some(l[1]),
        (None, Some(r)) => Some(r[1]),
        (None, None) => None,
    }
}

fn shoulder_y(set: &KeypointSet) -> Option<f32> {
    set.neck().map(|n| n[1])
}
