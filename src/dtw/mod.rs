use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::phase::Phase;
use crate::report::{DtwResult, JointDiff};
use crate::signal::angles::AngleKind;
use crate::signal::series::AngleBank;

/// DTW 特徴次元 = 関節3点組の角度数
pub const FEATURE_DIM: usize = AngleKind::COUNT;

/// 1フレーム分の特徴(各角度を 1/180 に正規化)
pub type Feature = [f32; FEATURE_DIM];

/// DTW 比較対象のフェーズ。ready/finish は対象外
pub const DTW_PHASES: [Phase; 4] = [
    Phase::Descending,
    Phase::Bottom,
    Phase::Ascending,
    Phase::Top,
];

/// 評価可能なセグメントの最小長
const MIN_SEGMENT_LEN: usize = 2;

fn dist(a: &Feature, b: &Feature) -> f32 {
    let mut sum = 0.0f32;
    for k in 0..FEATURE_DIM {
        let d = a[k] - b[k];
        sum += d * d;
    }
    sum.sqrt()
}

struct Alignment {
    /// 経路長と √D で正規化した累積コスト
    normalized_cost: f32,
    /// (user_idx, ref_idx) の対応列
    pairs: Vec<(usize, usize)>,
}

/// Sakoe-Chiba バンド制約付き DTW
///
/// バンド幅は長い方の系列長 × band_frac(最低 |n-m|)。
fn align(user: &[Feature], reference: &[Feature], band_frac: f32) -> Option<Alignment> {
    let n = user.len();
    let m = reference.len();
    if n < MIN_SEGMENT_LEN || m < MIN_SEGMENT_LEN {
        return None;
    }
    let band = ((band_frac * n.max(m) as f32).ceil() as usize)
        .max(n.abs_diff(m))
        .max(1);

    let mut acc = vec![vec![f32::INFINITY; m + 1]; n + 1];
    acc[0][0] = 0.0;

    for i in 1..=n {
        let j_lo = i.saturating_sub(band).max(1);
        let j_hi = (i + band).min(m);
        for j in j_lo..=j_hi {
            let best = acc[i - 1][j].min(acc[i][j - 1]).min(acc[i - 1][j - 1]);
            if best.is_finite() {
                acc[i][j] = dist(&user[i - 1], &reference[j - 1]) + best;
            }
        }
    }
    if !acc[n][m].is_finite() {
        return None;
    }

    // バックトラックで最適経路を復元
    let mut pairs = Vec::with_capacity(n + m);
    let (mut i, mut j) = (n, m);
    while i > 0 && j > 0 {
        pairs.push((i - 1, j - 1));
        let diag = acc[i - 1][j - 1];
        let up = acc[i - 1][j];
        let left = acc[i][j - 1];
        if diag <= up && diag <= left {
            i -= 1;
            j -= 1;
        } else if up <= left {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    pairs.reverse();

    let normalized_cost = acc[n][m] / (pairs.len() as f32 * (FEATURE_DIM as f32).sqrt());
    Some(Alignment {
        normalized_cost,
        pairs,
    })
}

/// フェーズ別 DTW 類似度スコアラ
///
/// フレームごとに accumulate() を呼び、フェーズ遷移で直前セグメントを
/// 同フェーズのレファレンスセグメント群と比較する。最良一致のスコアを
/// exp(-α·cost) で [0,1] に写像して蓄積する。
pub struct DtwScorer {
    reference: BTreeMap<Phase, Vec<Vec<Feature>>>,
    band_frac: f32,
    alpha: f32,
    current_phase: Option<Phase>,
    current: Vec<Feature>,
    phase_scores: BTreeMap<Phase, Vec<f32>>,
    joint_diff_sum: [f64; FEATURE_DIM],
    joint_diff_pairs: u64,
}

impl DtwScorer {
    /// レファレンスに評価可能なセグメントが1つもなければ None
    pub fn new(
        reference: BTreeMap<Phase, Vec<Vec<Feature>>>,
        band_frac: f32,
        alpha: f32,
    ) -> Option<Self> {
        let usable = reference
            .values()
            .flatten()
            .any(|seg| seg.len() >= MIN_SEGMENT_LEN);
        if !usable {
            warn!("DTW reference has no usable segments");
            return None;
        }
        Some(Self {
            reference,
            band_frac,
            alpha,
            current_phase: None,
            current: Vec::new(),
            phase_scores: BTreeMap::new(),
            joint_diff_sum: [0.0; FEATURE_DIM],
            joint_diff_pairs: 0,
        })
    }

    /// フレームごとに呼ぶ。フェーズが替わったら直前セグメントを評価
    pub fn accumulate(&mut self, feature: Option<Feature>, phase: Phase) {
        if self.current_phase != Some(phase) {
            self.flush();
            self.current_phase = Some(phase);
        }
        if let Some(f) = feature {
            self.current.push(f);
        }
    }

    fn flush(&mut self) {
        let Some(phase) = self.current_phase else {
            return;
        };
        let segment = std::mem::take(&mut self.current);
        if segment.len() < MIN_SEGMENT_LEN {
            return;
        }
        let Some(refs) = self.reference.get(&phase) else {
            return;
        };

        // 最小コストのレファレンスセグメントを採用
        let mut best: Option<(usize, Alignment)> = None;
        for (ri, reference) in refs.iter().enumerate() {
            if let Some(a) = align(&segment, reference, self.band_frac) {
                let better = match &best {
                    Some((_, b)) => a.normalized_cost < b.normalized_cost,
                    None => true,
                };
                if better {
                    best = Some((ri, a));
                }
            }
        }
        let Some((ri, best)) = best else {
            return;
        };

        let similarity = (-self.alpha * best.normalized_cost).exp();
        debug!(
            phase = phase.as_str(),
            cost = best.normalized_cost,
            similarity,
            "DTW segment scored"
        );
        self.phase_scores.entry(phase).or_default().push(similarity);

        // 最良経路に沿った関節別 |Δ角| を蓄積 (度)
        let reference = &refs[ri];
        for &(ui, rj) in &best.pairs {
            for k in 0..FEATURE_DIM {
                self.joint_diff_sum[k] +=
                    ((segment[ui][k] - reference[rj][k]).abs() * 180.0) as f64;
            }
            self.joint_diff_pairs += 1;
        }
    }

    /// 最終セグメントを評価し、集計結果を返す。スコアが無ければ None
    pub fn finalize(mut self) -> Option<DtwResult> {
        self.flush();

        let mut all_scores: Vec<f32> = Vec::new();
        let mut phase_dtw_scores = BTreeMap::new();
        let mut phase_segment_counts = BTreeMap::new();
        for (phase, scores) in &self.phase_scores {
            if scores.is_empty() {
                continue;
            }
            let mean = scores.iter().sum::<f32>() / scores.len() as f32;
            phase_dtw_scores.insert(phase.as_str().to_string(), mean);
            phase_segment_counts.insert(phase.as_str().to_string(), scores.len());
            all_scores.extend_from_slice(scores);
        }
        if all_scores.is_empty() {
            return None;
        }
        // セグメント数(=レップ数相当)で重み付けした平均
        let overall = all_scores.iter().sum::<f32>() / all_scores.len() as f32;

        let mut worst_joints: Vec<JointDiff> = AngleKind::ALL
            .iter()
            .enumerate()
            .filter(|_| self.joint_diff_pairs > 0)
            .map(|(k, kind)| JointDiff {
                angle: kind.name().to_string(),
                mean_abs_diff_deg: (self.joint_diff_sum[k] / self.joint_diff_pairs as f64)
                    as f32,
            })
            .collect();
        worst_joints.sort_by(|a, b| {
            b.mean_abs_diff_deg
                .partial_cmp(&a.mean_abs_diff_deg)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.angle.cmp(&b.angle))
        });
        worst_joints.truncate(4);

        Some(DtwResult {
            overall_dtw_score: overall,
            phase_dtw_scores,
            phase_segment_counts,
            worst_joints,
        })
    }
}

/// 位相ラベル済みストリームからフェーズ別セグメントを切り出す
///
/// レファレンス側・ユーザ側の双方で使う。特徴が欠けるフレームは
/// セグメントを切らずに読み飛ばす。
pub fn phase_segments(
    bank: &AngleBank,
    phases: &[Phase],
    active: &[bool],
) -> BTreeMap<Phase, Vec<Vec<Feature>>> {
    let mut out: BTreeMap<Phase, Vec<Vec<Feature>>> = BTreeMap::new();
    let mut current_phase: Option<Phase> = None;
    let mut current: Vec<Feature> = Vec::new();

    let mut close = |phase: Option<Phase>, seg: &mut Vec<Feature>| {
        if let Some(p) = phase {
            if seg.len() >= MIN_SEGMENT_LEN && DTW_PHASES.contains(&p) {
                out.entry(p).or_default().push(std::mem::take(seg));
                return;
            }
        }
        seg.clear();
    };

    for i in 0..phases.len() {
        if !active[i] {
            continue;
        }
        if current_phase != Some(phases[i]) {
            close(current_phase, &mut current);
            current_phase = Some(phases[i]);
        }
        if let Some(f) = bank.feature(i) {
            current.push(f);
        }
    }
    close(current_phase, &mut current);
    out
}
