pub mod driver;

pub use driver::{normalize_driver, MIN_DRIVER_SPAN_DEG};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// レップサイクル内の位置ラベル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Ready,
    Descending,
    Bottom,
    Ascending,
    Top,
    Finish,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Ready => "ready",
            Phase::Descending => "descending",
            Phase::Bottom => "bottom",
            Phase::Ascending => "ascending",
            Phase::Top => "top",
            Phase::Finish => "finish",
        }
    }
}

/// 位相検出パラメータ
#[derive(Debug, Clone, Copy)]
pub struct PhaseParams {
    pub d_top: f32,
    pub d_bot: f32,
    /// 同型極値間の最小フレーム間隔 (T_min_rep 相当)
    pub min_rep_frames: usize,
}

/// 位相検出の結果
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    /// フレームごとの位相ラベル
    pub phases: Vec<Phase>,
    /// ascending→top 遷移の回数 = 完了レップ数
    pub count: u32,
}

#[derive(Debug, Clone, Copy)]
struct Extremum {
    idx: usize,
    value: f32,
    is_max: bool,
}

/// 正規化ドライバ d から位相列とレップ数を求める
///
/// d の欠損フレームでは状態を保持し、遷移もカウントも起こさない。
/// 最後の top 以降のフレームは finish に付け替える。
pub fn detect_phases(d: &[Option<f32>], params: &PhaseParams) -> PhaseOutcome {
    let n = d.len();
    let mut phases = vec![Phase::Ready; n];

    let extrema = accept_extrema(&find_extrema(d), params);
    let mut bottom_at = vec![false; n];
    let mut top_at = vec![false; n];
    for e in &extrema {
        if e.is_max {
            top_at[e.idx] = true;
        } else {
            bottom_at[e.idx] = true;
        }
    }

    let mut state = Phase::Ready;
    let mut count = 0u32;
    for i in 0..n {
        if let Some(v) = d[i] {
            state = match state {
                Phase::Ready => {
                    // 種目ごとの静止端から入る: 伸展側なら top、屈曲側なら bottom
                    if v >= params.d_top {
                        Phase::Top
                    } else if v <= params.d_bot {
                        Phase::Bottom
                    } else {
                        Phase::Ready
                    }
                }
                Phase::Top => {
                    if v < params.d_top {
                        Phase::Descending
                    } else {
                        Phase::Top
                    }
                }
                Phase::Descending => {
                    if bottom_at[i] {
                        Phase::Bottom
                    } else if v >= params.d_top {
                        // ボトムに届かず戻った下降。カウントしない
                        Phase::Top
                    } else {
                        Phase::Descending
                    }
                }
                Phase::Bottom => {
                    if v > params.d_bot {
                        Phase::Ascending
                    } else {
                        Phase::Bottom
                    }
                }
                Phase::Ascending => {
                    if top_at[i] {
                        count += 1;
                        Phase::Top
                    } else if bottom_at[i] {
                        Phase::Bottom
                    } else {
                        Phase::Ascending
                    }
                }
                Phase::Finish => Phase::Finish,
            };
        }
        phases[i] = state;
    }

    // 最後の top 以降は finish
    if let Some(last_top) = phases.iter().rposition(|&p| p == Phase::Top) {
        for p in phases.iter_mut().skip(last_top + 1) {
            *p = Phase::Finish;
        }
    }

    debug!(count, extrema = extrema.len(), "phase detection complete");
    PhaseOutcome { phases, count }
}

/// 交互の局所極値列を返す
///
/// 有効値のみで傾きを追跡し、向きが反転した点を極値として記録する。
/// 最後の傾きの端点も極値として閉じる(終端プラトーはその先頭)。
fn find_extrema(d: &[Option<f32>]) -> Vec<Extremum> {
    const EPS: f32 = 1e-4;

    let valid: Vec<(usize, f32)> = d
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|x| (i, x)))
        .collect();
    if valid.len() < 2 {
        return Vec::new();
    }

    let mut extrema = Vec::new();
    let mut trend: i8 = 0;
    let (mut cand_idx, mut cand_val) = valid[0];

    for &(idx, val) in &valid[1..] {
        let dir: i8 = if val > cand_val + EPS {
            1
        } else if val < cand_val - EPS {
            -1
        } else {
            0
        };
        if dir == 0 {
            continue;
        }
        if trend == 0 || trend == dir {
            trend = dir;
            cand_idx = idx;
            cand_val = val;
        } else {
            extrema.push(Extremum {
                idx: cand_idx,
                value: cand_val,
                is_max: trend > 0,
            });
            trend = dir;
            cand_idx = idx;
            cand_val = val;
        }
    }
    if trend != 0 {
        extrema.push(Extremum {
            idx: cand_idx,
            value: cand_val,
            is_max: trend > 0,
        });
    }
    extrema
}

/// 極値候補を閾値と最小間隔でふるいにかける
///
/// 極大は d_top 超過、極小は d_bot 未満で採用する。閾値に届かなくても
/// 直前の反対側採用極値からのフルスイング(≥ d_top - d_bot)があれば
/// 採用する(ドライバ角にバイアスが乗った完了レップの救済)。
fn accept_extrema(extrema: &[Extremum], params: &PhaseParams) -> Vec<Extremum> {
    let gate = params.d_top - params.d_bot;
    let mut acc: Vec<Extremum> = Vec::new();

    for &e in extrema {
        let passes = if e.is_max {
            e.value > params.d_top
                || acc
                    .last()
                    .is_some_and(|l| !l.is_max && e.value - l.value >= gate)
        } else {
            e.value < params.d_bot
                || acc
                    .last()
                    .is_some_and(|l| l.is_max && l.value - e.value >= gate)
        };
        if !passes {
            continue;
        }
        match acc.last_mut() {
            Some(last) if last.is_max == e.is_max => {
                // 同型が連続したらより極端な方を残す
                let better = if e.is_max {
                    e.value > last.value
                } else {
                    e.value < last.value
                };
                if better {
                    *last = e;
                }
            }
            _ => acc.push(e),
        }
    }

    enforce_separation(acc, params.min_rep_frames)
}

/// 同型極値が min_frames 未満の間隔で並んだ場合、より極端な方を残す
fn enforce_separation(mut acc: Vec<Extremum>, min_frames: usize) -> Vec<Extremum> {
    loop {
        let mut changed = false;
        let mut i = 0;
        while i + 2 < acc.len() {
            let a = acc[i];
            let c = acc[i + 2];
            if a.is_max == c.is_max && c.idx - a.idx < min_frames {
                let keep_later = if a.is_max {
                    c.value >= a.value
                } else {
                    c.value <= a.value
                };
                if keep_later {
                    acc.drain(i..i + 2);
                } else {
                    acc.drain(i + 1..i + 3);
                }
                changed = true;
            } else {
                i += 1;
            }
        }
        if !changed {
            break;
        }
    }
    acc
}
