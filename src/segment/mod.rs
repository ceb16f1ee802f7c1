pub mod features;

pub use features::{frame_features, ActivityClassifier, FEATURE_DIM};

use tracing::{debug, info};

use crate::config::Config;
use crate::pose::keypoint::KeypointSet;
use crate::report::FilterSummary;
use crate::signal::series::AngleSeries;

/// ルールがこの比率を下回る/上回る選択をしたら分類器へフォールバック
const MIN_RULE_RATIO: f32 = 0.30;
const MAX_RULE_RATIO: f32 = 0.95;

/// 活動判定の結果
#[derive(Debug, Clone)]
pub struct SegmentOutcome {
    /// フレームごとの active/rest ラベル
    pub active: Vec<bool>,
    pub summary: FilterSummary,
}

/// ドライバ角度系列から active/rest を決める
///
/// 一次ルール: ±K 近傍との平均絶対差をエネルギーとし、閾値超過に
/// 2状態ヒステリシスを適用。選択率が極端なときのみ分類器に委ねる。
pub fn segment_activity(
    driver: &AngleSeries,
    sets: &[KeypointSet],
    classifier: Option<&ActivityClassifier>,
    config: &Config,
) -> SegmentOutcome {
    let n = driver.len();
    if n == 0 {
        return SegmentOutcome {
            active: Vec::new(),
            summary: FilterSummary {
                method: "none".to_string(),
                reason: "no input frames".to_string(),
                active_frames: 0,
                rest_frames: 0,
                fallback_frames: 0,
            },
        };
    }

    let energy = motion_energy(driver, config.motion_window);
    let raw: Vec<bool> = energy.iter().map(|&e| e > config.motion_threshold).collect();
    let rule_labels = apply_hysteresis(&raw, config.hysteresis_on, config.hysteresis_off);

    let rule_active = rule_labels.iter().filter(|&&a| a).count();
    let ratio = rule_active as f32 / n as f32;
    debug!(rule_active, total = n, "motion rule segmentation");

    let mut method = "motion_rule".to_string();
    let mut reasons: Vec<String> = Vec::new();
    let mut fallback_frames = 0usize;
    let mut active = rule_labels.clone();

    if !(MIN_RULE_RATIO..=MAX_RULE_RATIO).contains(&ratio) {
        let trigger = format!("motion rule marked {:.0}% of frames active", ratio * 100.0);
        match classifier {
            Some(c) => {
                let feats: Vec<[f32; FEATURE_DIM]> = (0..n)
                    .map(|i| frame_features(i, driver, &energy, sets))
                    .collect();
                let labels = c.label_stream(&feats);
                fallback_frames = labels
                    .iter()
                    .zip(rule_labels.iter())
                    .filter(|(a, b)| a != b)
                    .count();
                active = labels;
                method = "classifier".to_string();
                reasons.push(trigger);
                info!(fallback_frames, "activity segmentation fell back to classifier");
            }
            None => {
                reasons.push(format!("{trigger}; classifier unavailable, keeping rule labels"));
            }
        }
    }

    if let Some(gap) = longest_missing_run(sets) {
        if gap > config.impute_max_gap {
            reasons.push(format!("detection gap of {gap} frames"));
        }
    }

    let active_frames = active.iter().filter(|&&a| a).count();
    SegmentOutcome {
        summary: FilterSummary {
            method,
            reason: reasons.join("; "),
            active_frames,
            rest_frames: n - active_frames,
            fallback_frames,
        },
        active,
    }
}

/// ±window 近傍との平均絶対差(度/サンプル)。欠損近傍は分母に入れない
fn motion_energy(driver: &AngleSeries, window: usize) -> Vec<f32> {
    let n = driver.len();
    let mut energy = vec![0.0f32; n];
    for t in 0..n {
        let Some(center) = driver.get(t) else {
            continue;
        };
        let mut sum = 0.0f32;
        let mut count = 0usize;
        let lo = t.saturating_sub(window);
        let hi = (t + window).min(n.saturating_sub(1));
        for k in lo..=hi {
            if k == t {
                continue;
            }
            if let Some(v) = driver.get(k) {
                sum += (center - v).abs();
                count += 1;
            }
        }
        if count > 0 {
            energy[t] = sum / count as f32;
        }
    }
    energy
}

/// 2状態ヒステリシス
///
/// rest→active は n_on 連続超過で、active→rest は n_off 連続未満で
/// 遷移し、確定したストリークは先頭フレームから新状態になる。
fn apply_hysteresis(raw: &[bool], n_on: usize, n_off: usize) -> Vec<bool> {
    let mut out = vec![false; raw.len()];
    let mut state = false;
    let mut streak_start = 0usize;
    let mut streak_len = 0usize;

    for (i, &above) in raw.iter().enumerate() {
        if above == state {
            streak_len = 0;
            out[i] = state;
            continue;
        }
        if streak_len == 0 {
            streak_start = i;
        }
        streak_len += 1;
        let needed = if above { n_on } else { n_off };
        if streak_len >= needed {
            state = above;
            for slot in &mut out[streak_start..=i] {
                *slot = state;
            }
            streak_len = 0;
        } else {
            out[i] = state;
        }
    }
    out
}

/// 全点欠損フレームの最長連続数。欠損なしなら None
fn longest_missing_run(sets: &[KeypointSet]) -> Option<usize> {
    let mut longest = 0usize;
    let mut run = 0usize;
    for set in sets {
        if set.is_all_missing() {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    (longest > 0).then_some(longest)
}
