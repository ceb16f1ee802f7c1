use tracing::debug;

use crate::signal::series::AngleSeries;

/// ドライバ正規化に必要な最小角度レンジ(度)
///
/// 観測レンジがこれ未満のクリップは運動なしとみなす。
pub const MIN_DRIVER_SPAN_DEG: f32 = 15.0;

/// 正規化に必要な最小有効サンプル数
const MIN_VALID_SAMPLES: usize = 4;

/// ドライバ角度系列を [0,1] の正規化ドライバ d へ写像する
///
/// active フレーム上の5/95パーセンタイルをレンジとして
/// d = clamp((θ - lo) / (hi - lo), 0, 1) を全フレームに適用する。
/// `invert` が真なら d ← 1 - d (小さい角度 = トップの種目)。
/// rest フレームと欠損フレームは None のまま。
/// レンジ不足(静止クリップ)は None を返す。
pub fn normalize_driver(
    series: &AngleSeries,
    active: &[bool],
    invert: bool,
) -> Option<Vec<Option<f32>>> {
    let mut observed: Vec<f32> = series
        .values()
        .iter()
        .zip(active.iter())
        .filter_map(|(v, &a)| if a { *v } else { None })
        .collect();

    if observed.len() < MIN_VALID_SAMPLES {
        debug!(samples = observed.len(), "driver: too few valid samples");
        return None;
    }

    observed.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let lo = percentile(&observed, 0.05);
    let hi = percentile(&observed, 0.95);
    let span = hi - lo;
    if span < MIN_DRIVER_SPAN_DEG {
        debug!(span, "driver: angle span below minimum");
        return None;
    }

    let normalized = series
        .values()
        .iter()
        .zip(active.iter())
        .map(|(v, &a)| {
            if !a {
                return None;
            }
            v.map(|theta| {
                let d = ((theta - lo) / span).clamp(0.0, 1.0);
                if invert {
                    1.0 - d
                } else {
                    d
                }
            })
        })
        .collect();
    Some(normalized)
}

/// ソート済みスライスのパーセンタイル(最近傍インデックス)
fn percentile(sorted: &[f32], q: f32) -> f32 {
    let idx = ((sorted.len() - 1) as f32 * q).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
