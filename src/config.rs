use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AnalysisError, Result};

/// 解析パイプライン設定
///
/// 全ノブはリクエスト単位で渡す。プロセスグローバルな設定や
/// 環境変数には依存しない。
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// フレーム抽出レート (1〜30 fps)
    #[serde(default = "default_extract_fps")]
    pub extract_fps: u32,
    /// 姿勢推論のバッチサイズ
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// キーポイント移動平均の窓幅(サンプル数)
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: usize,
    /// 線形補間する欠損区間の最大長(サンプル数)
    #[serde(default = "default_impute_max_gap")]
    pub impute_max_gap: usize,
    /// 活動判定のモーションエネルギー閾値(度/サンプル)
    #[serde(default = "default_motion_threshold")]
    pub motion_threshold: f32,
    /// エネルギー計算の近傍窓 ±K
    #[serde(default = "default_motion_window")]
    pub motion_window: usize,
    /// rest→active に必要な連続超過フレーム数
    #[serde(default = "default_hysteresis_on")]
    pub hysteresis_on: usize,
    /// active→rest に必要な連続未満フレーム数
    #[serde(default = "default_hysteresis_off")]
    pub hysteresis_off: usize,
    /// 正規化ドライバのトップ閾値
    #[serde(default = "default_d_top")]
    pub d_top: f32,
    /// 正規化ドライバのボトム閾値
    #[serde(default = "default_d_bot")]
    pub d_bot: f32,
    /// レップ間の最小時間間隔(秒)
    #[serde(default = "default_t_min_rep")]
    pub t_min_rep: f32,
    /// ソフトスコアの warning 幅(度)
    #[serde(default = "default_soft_deg")]
    pub soft_deg: f32,
    /// ソフトスコアの減点幅(度)
    #[serde(default = "default_hard_deg")]
    pub hard_deg: f32,
    /// Sakoe-Chiba バンド幅(長い系列長に対する割合)
    #[serde(default = "default_dtw_band_frac")]
    pub dtw_band_frac: f32,
    /// DTW 類似度マッピング exp(-α·cost) の α
    #[serde(default = "default_dtw_alpha")]
    pub dtw_alpha: f32,
    /// 活動判定フォールバック分類器の重みファイル(省略時は同梱の既定値)
    #[serde(default)]
    pub activity_classifier_path: Option<PathBuf>,
}

fn default_extract_fps() -> u32 { 10 }
fn default_batch_size() -> usize { 8 }
fn default_smoothing_window() -> usize { 5 }
fn default_impute_max_gap() -> usize { 3 }
fn default_motion_threshold() -> f32 { 1.5 }
fn default_motion_window() -> usize { 3 }
fn default_hysteresis_on() -> usize { 3 }
fn default_hysteresis_off() -> usize { 5 }
fn default_d_top() -> f32 { 0.80 }
fn default_d_bot() -> f32 { 0.20 }
fn default_t_min_rep() -> f32 { 0.4 }
fn default_soft_deg() -> f32 { 8.0 }
fn default_hard_deg() -> f32 { 20.0 }
fn default_dtw_band_frac() -> f32 { 0.15 }
fn default_dtw_alpha() -> f32 { 6.0 }

impl Default for Config {
    fn default() -> Self {
        Self {
            extract_fps: default_extract_fps(),
            batch_size: default_batch_size(),
            smoothing_window: default_smoothing_window(),
            impute_max_gap: default_impute_max_gap(),
            motion_threshold: default_motion_threshold(),
            motion_window: default_motion_window(),
            hysteresis_on: default_hysteresis_on(),
            hysteresis_off: default_hysteresis_off(),
            d_top: default_d_top(),
            d_bot: default_d_bot(),
            t_min_rep: default_t_min_rep(),
            soft_deg: default_soft_deg(),
            hard_deg: default_hard_deg(),
            dtw_band_frac: default_dtw_band_frac(),
            dtw_alpha: default_dtw_alpha(),
            activity_classifier_path: None,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| AnalysisError::Input(format!("failed to read config: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| AnalysisError::Input(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// 範囲外の設定値を `InputError` として弾く
    pub fn validate(&self) -> Result<()> {
        if !(1..=30).contains(&self.extract_fps) {
            return Err(AnalysisError::input(format!(
                "extract_fps must be in 1..=30, got {}",
                self.extract_fps
            )));
        }
        if self.batch_size == 0 {
            return Err(AnalysisError::input("batch_size must be >= 1"));
        }
        if self.smoothing_window == 0 {
            return Err(AnalysisError::input("smoothing_window must be >= 1"));
        }
        if self.motion_threshold <= 0.0 {
            return Err(AnalysisError::input("motion_threshold must be positive"));
        }
        if self.motion_window == 0 {
            return Err(AnalysisError::input("motion_window must be >= 1"));
        }
        if self.hysteresis_on == 0 || self.hysteresis_off == 0 {
            return Err(AnalysisError::input("hysteresis counts must be >= 1"));
        }
        if !(0.0 < self.d_bot && self.d_bot < self.d_top && self.d_top < 1.0) {
            return Err(AnalysisError::input(format!(
                "phase thresholds must satisfy 0 < d_bot < d_top < 1, got d_bot={} d_top={}",
                self.d_bot, self.d_top
            )));
        }
        if self.t_min_rep <= 0.0 {
            return Err(AnalysisError::input("t_min_rep must be positive"));
        }
        if self.soft_deg <= 0.0 || self.hard_deg <= self.soft_deg {
            return Err(AnalysisError::input(
                "scoring widths must satisfy 0 < soft_deg < hard_deg",
            ));
        }
        if !(0.0..=1.0).contains(&self.dtw_band_frac) {
            return Err(AnalysisError::input("dtw_band_frac must be in 0..=1"));
        }
        if self.dtw_alpha <= 0.0 {
            return Err(AnalysisError::input("dtw_alpha must be positive"));
        }
        Ok(())
    }

    /// レップ間最小間隔をフレーム数に換算
    pub fn min_rep_frames(&self) -> usize {
        ((self.t_min_rep * self.extract_fps as f32).round() as usize).max(1)
    }
}
