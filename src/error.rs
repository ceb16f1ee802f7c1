use thiserror::Error;

/// 解析コアが公開する失敗種別
///
/// 回復可能な状態(キーポイント欠損、短い検出ギャップ、ルール非適用)は
/// エラーにせずレポート内の `filtering` / `details` に記録する。
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// ファイル不正・未知の運動種別/グリップ・設定値の範囲外
    #[error("invalid input: {0}")]
    Input(String),

    /// フレーム抽出が過半数のフレームで失敗
    #[error("frame decoding failed: {0}")]
    Decode(String),

    /// 保持フレームの8割超で有効な姿勢検出が得られなかった
    #[error("pose detection failed: {0}")]
    Detection(String),

    /// 完了レップが1回も検出できなかった
    #[error("insufficient motion: {0}")]
    InsufficientMotion(String),

    /// 呼び出し側トークンによる中断
    #[error("analysis cancelled")]
    Cancelled,
}

impl AnalysisError {
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
