pub mod profile;

pub use profile::{DriverSpec, ExerciseKind, ExerciseProfile, GripType, RuleSpec};

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::Config;
use crate::phase::Phase;
use crate::signal::angles::AngleKind;

/// ルール判定の3段階
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    Ok,
    Warning,
    Error,
}

/// ルール1件分の判定結果
#[derive(Debug, Clone, Serialize)]
pub struct RuleDetail {
    pub status: RuleStatus,
    /// 計測値の表示用文字列 (例 "162.3°")
    pub value: String,
    pub feedback: String,
}

/// 採点対象フレーム1枚分のスコアレコード
#[derive(Debug, Clone, Serialize)]
pub struct FrameScore {
    pub frame_idx: usize,
    pub phase: Phase,
    pub score: f32,
    pub errors: Vec<String>,
    pub details: BTreeMap<String, RuleDetail>,
}

/// ルールカタログによるソフト採点器
///
/// 帯域内は ok、逸脱 δ ≤ soft_deg は warning、それ以上は error。
/// 寄与は c = clamp(1 - δ/hard_deg, 0, 1)、フレームスコアは重み付き平均。
pub struct PostureEvaluator<'a> {
    profile: &'a ExerciseProfile,
    soft_deg: f32,
    hard_deg: f32,
}

impl<'a> PostureEvaluator<'a> {
    pub fn new(profile: &'a ExerciseProfile, config: &Config) -> Self {
        Self {
            profile,
            soft_deg: config.soft_deg,
            hard_deg: config.hard_deg,
        }
    }

    /// 1フレームを採点する
    ///
    /// 採点対象外のフェーズ、または適用可能なルールが1つもない
    /// フレームは None。角度欠損のルールはスキップ(ゼロ扱いしない)。
    pub fn evaluate(
        &self,
        frame_idx: usize,
        phase: Phase,
        angles: &[Option<f32>; AngleKind::COUNT],
    ) -> Option<FrameScore> {
        if !self.profile.is_scored(phase) {
            return None;
        }

        let mut details = BTreeMap::new();
        let mut weighted = 0.0f32;
        let mut total_weight = 0.0f32;
        let mut faults: Vec<(String, f32)> = Vec::new();

        for rule in &self.profile.rules {
            if !rule.applies_to(phase) {
                continue;
            }
            let Some(theta) = angles[rule.angle as usize] else {
                continue;
            };

            let [lo, hi] = rule.band;
            let delta = if theta < lo {
                lo - theta
            } else if theta > hi {
                theta - hi
            } else {
                0.0
            };
            let contribution = (1.0 - delta / self.hard_deg).clamp(0.0, 1.0);
            let status = if delta == 0.0 {
                RuleStatus::Ok
            } else if delta <= self.soft_deg {
                RuleStatus::Warning
            } else {
                RuleStatus::Error
            };
            let feedback = match status {
                RuleStatus::Ok => &rule.ok_feedback,
                RuleStatus::Warning => &rule.warn_feedback,
                RuleStatus::Error => &rule.error_feedback,
            };

            details.insert(
                rule.name.clone(),
                RuleDetail {
                    status,
                    value: format!("{theta:.1}°"),
                    feedback: feedback.clone(),
                },
            );
            weighted += rule.weight * contribution;
            total_weight += rule.weight;
            if status != RuleStatus::Ok {
                faults.push((feedback.clone(), rule.weight * (1.0 - contribution)));
            }
        }

        if total_weight == 0.0 {
            return None;
        }

        // 重大度 w·(1-c) の降順。同値は文言で安定ソート
        faults.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        let mut errors: Vec<String> = Vec::with_capacity(faults.len());
        for (msg, _) in faults {
            if !errors.contains(&msg) {
                errors.push(msg);
            }
        }

        Some(FrameScore {
            frame_idx,
            phase,
            score: weighted / total_weight,
            errors,
            details,
        })
    }
}

/// 集計結果
#[derive(Debug, Clone, Serialize)]
pub struct Aggregates {
    pub avg_score: f32,
    /// フェーズごとの平均スコア
    pub phase_scores: BTreeMap<String, f32>,
    /// S / A / B / C
    pub grade: String,
}

/// フレームスコア列を集計する
///
/// DTW が有効なら grade は avg·0.7 + dtw·0.3 に対して付ける。
pub fn aggregate(frame_scores: &[FrameScore], dtw_score: Option<f32>) -> Aggregates {
    let avg_score = if frame_scores.is_empty() {
        0.0
    } else {
        frame_scores.iter().map(|f| f.score).sum::<f32>() / frame_scores.len() as f32
    };

    let mut sums: BTreeMap<String, (f32, usize)> = BTreeMap::new();
    for f in frame_scores {
        let entry = sums.entry(f.phase.as_str().to_string()).or_insert((0.0, 0));
        entry.0 += f.score;
        entry.1 += 1;
    }
    let phase_scores = sums
        .into_iter()
        .map(|(phase, (sum, n))| (phase, sum / n as f32))
        .collect();

    let combined = match dtw_score {
        Some(dtw) => avg_score * 0.7 + dtw * 0.3,
        None => avg_score,
    };

    Aggregates {
        avg_score,
        phase_scores,
        grade: grade_letter(combined).to_string(),
    }
}

/// 0.9 / 0.7 / 0.5 を境に S / A / B / C
pub fn grade_letter(combined: f32) -> &'static str {
    if combined >= 0.9 {
        "S"
    } else if combined >= 0.7 {
        "A"
    } else if combined >= 0.5 {
        "B"
    } else {
        "C"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    fn test_profile() -> ExerciseProfile {
        ExerciseProfile::from_toml(
            r#"
name = "test"
scored_phases = ["bottom", "top"]

[driver]
angle = "elbow"
invert = false

[[rules]]
name = "elbow_check"
angle = "elbow"
phases = ["bottom"]
band = [45.0, 95.0]
weight = 3.0
ok_feedback = "ok-elbow"
warn_feedback = "warn-elbow"
error_feedback = "error-elbow"

[[rules]]
name = "hip_check"
angle = "hip"
phases = ["bottom", "top"]
band = [167.0, 183.0]
weight = 1.0
ok_feedback = "ok-hip"
warn_feedback = "warn-hip"
error_feedback = "error-hip"
"#,
        )
        .unwrap()
    }

    fn evaluator(profile: &ExerciseProfile) -> PostureEvaluator<'_> {
        PostureEvaluator {
            profile,
            soft_deg: 8.0,
            hard_deg: 20.0,
        }
    }

    #[test]
    fn test_in_band_is_ok() {
        let profile = test_profile();
        let ev = evaluator(&profile);
        let score = ev
            .evaluate(0, Phase::Bottom, &[Some(70.0), None, Some(175.0), None])
            .unwrap();
        assert!(approx_eq(score.score, 1.0, 1e-6));
        assert!(score.errors.is_empty());
        assert_eq!(score.details["elbow_check"].status, RuleStatus::Ok);
        assert_eq!(score.details["hip_check"].status, RuleStatus::Ok);
    }

    #[test]
    fn test_soft_deviation_is_warning() {
        let profile = test_profile();
        let ev = evaluator(&profile);
        // 肘 100° → δ=5 ≤ 8 で warning、c = 1 - 5/20 = 0.75
        let score = ev
            .evaluate(0, Phase::Bottom, &[Some(100.0), None, Some(175.0), None])
            .unwrap();
        assert_eq!(score.details["elbow_check"].status, RuleStatus::Warning);
        assert_eq!(score.errors, vec!["warn-elbow".to_string()]);
        // (3·0.75 + 1·1.0) / 4 = 0.8125
        assert!(approx_eq(score.score, 0.8125, 1e-4));
    }

    #[test]
    fn test_hard_deviation_is_error() {
        let profile = test_profile();
        let ev = evaluator(&profile);
        // 腰 150° → δ=17 > 8 で error、c = 0.15
        let score = ev
            .evaluate(0, Phase::Bottom, &[Some(70.0), None, Some(150.0), None])
            .unwrap();
        assert_eq!(score.details["hip_check"].status, RuleStatus::Error);
        assert_eq!(score.errors, vec!["error-hip".to_string()]);
        // (3·1.0 + 1·0.15) / 4 = 0.7875
        assert!(approx_eq(score.score, 0.7875, 1e-4));
    }

    #[test]
    fn test_errors_ordered_by_severity() {
        let profile = test_profile();
        let ev = evaluator(&profile);
        // 肘 δ=25 (c=0, 重大度 3.0)、腰 δ=17 (c=0.15, 重大度 0.85)
        let score = ev
            .evaluate(0, Phase::Bottom, &[Some(120.0), None, Some(150.0), None])
            .unwrap();
        assert_eq!(
            score.errors,
            vec!["error-elbow".to_string(), "error-hip".to_string()]
        );
    }

    #[test]
    fn test_missing_angle_skips_rule() {
        let profile = test_profile();
        let ev = evaluator(&profile);
        let score = ev
            .evaluate(0, Phase::Bottom, &[None, None, Some(175.0), None])
            .unwrap();
        assert!(!score.details.contains_key("elbow_check"));
        assert!(approx_eq(score.score, 1.0, 1e-6));
    }

    #[test]
    fn test_unscored_phase_returns_none() {
        let profile = test_profile();
        let ev = evaluator(&profile);
        assert!(ev
            .evaluate(0, Phase::Ready, &[Some(70.0), None, Some(175.0), None])
            .is_none());
        // 全ルール欠損でも None
        assert!(ev.evaluate(0, Phase::Bottom, &[None; 4]).is_none());
    }

    #[test]
    fn test_error_count_matches_non_ok_details() {
        let profile = test_profile();
        let ev = evaluator(&profile);
        let score = ev
            .evaluate(0, Phase::Bottom, &[Some(100.0), None, Some(150.0), None])
            .unwrap();
        let non_ok = score
            .details
            .values()
            .filter(|d| d.status != RuleStatus::Ok)
            .count();
        assert_eq!(score.errors.len(), non_ok);
    }

    #[test]
    fn test_aggregate_and_grades() {
        let profile = test_profile();
        let ev = evaluator(&profile);
        let scores = vec![
            ev.evaluate(0, Phase::Bottom, &[Some(70.0), None, Some(175.0), None])
                .unwrap(),
            ev.evaluate(1, Phase::Top, &[None, None, Some(150.0), None])
                .unwrap(),
        ];
        let agg = aggregate(&scores, None);
        // (1.0 + 0.15) / 2 = 0.575 → B
        assert!(approx_eq(agg.avg_score, 0.575, 1e-4));
        assert_eq!(agg.grade, "B");
        assert!(approx_eq(agg.phase_scores["bottom"], 1.0, 1e-6));
        assert!(approx_eq(agg.phase_scores["top"], 0.15, 1e-4));

        // DTW 有効時は 0.7/0.3 の合成に対して付く
        let agg = aggregate(&scores, Some(1.0));
        // 0.575·0.7 + 1.0·0.3 = 0.7025 → A
        assert_eq!(agg.grade, "A");
    }

    #[test]
    fn test_grade_thresholds() {
        assert_eq!(grade_letter(0.95), "S");
        assert_eq!(grade_letter(0.9), "S");
        assert_eq!(grade_letter(0.89), "A");
        assert_eq!(grade_letter(0.7), "A");
        assert_eq!(grade_letter(0.69), "B");
        assert_eq!(grade_letter(0.5), "B");
        assert_eq!(grade_letter(0.49), "C");
    }
}
