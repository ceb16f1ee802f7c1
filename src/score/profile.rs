use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};
use crate::phase::Phase;
use crate::signal::angles::AngleKind;

/// 対応する運動種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExerciseKind {
    Pushup,
    Pullup,
}

impl ExerciseKind {
    /// 表記ゆれ("push-up", "Push Ups" など)を吸収して解釈する
    pub fn parse(value: &str) -> Result<Self> {
        let normalized: String = value
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "pushup" | "pushups" => Ok(Self::Pushup),
            "pullup" | "pullups" => Ok(Self::Pullup),
            _ => Err(AnalysisError::input(format!(
                "unknown exercise type: {value}"
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Pushup => "pushup",
            Self::Pullup => "pullup",
        }
    }
}

/// プルアップのグリップ種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GripType {
    Overhand,
    Underhand,
    Wide,
}

impl GripType {
    pub fn parse(value: &str) -> Result<Self> {
        let normalized: String = value
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "overhand" => Ok(Self::Overhand),
            "underhand" => Ok(Self::Underhand),
            "wide" => Ok(Self::Wide),
            _ => Err(AnalysisError::input(format!("unknown grip type: {value}"))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Overhand => "overhand",
            Self::Underhand => "underhand",
            Self::Wide => "wide",
        }
    }
}

/// ドライバ角の定義
///
/// `invert` が真なら角度が小さいほどトップ(プルアップ)。
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DriverSpec {
    pub angle: AngleKind,
    pub invert: bool,
}

/// 姿勢ルール1件
///
/// `grips` が空なら全グリップに適用。
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    pub angle: AngleKind,
    pub phases: Vec<Phase>,
    /// 目標角度帯 [θ_lo, θ_hi] (度)
    pub band: [f32; 2],
    pub weight: f32,
    pub ok_feedback: String,
    pub warn_feedback: String,
    pub error_feedback: String,
    #[serde(default)]
    pub grips: Vec<GripType>,
}

impl RuleSpec {
    pub fn applies_to(&self, phase: Phase) -> bool {
        self.phases.contains(&phase)
    }
}

/// 運動プロファイル: ドライバ定義 + ルールカタログ + 採点対象フェーズ
///
/// 運動種別ごとの知識はすべてこのデータに載せる。
/// ここ以外のコードに種目分岐は置かない。
#[derive(Debug, Clone, Deserialize)]
pub struct ExerciseProfile {
    pub name: String,
    pub driver: DriverSpec,
    pub scored_phases: Vec<Phase>,
    pub rules: Vec<RuleSpec>,
}

const PUSHUP_PROFILE_TOML: &str = include_str!("../../profiles/pushup.toml");
const PULLUP_PROFILE_TOML: &str = include_str!("../../profiles/pullup.toml");

impl ExerciseProfile {
    /// 同梱プロファイルを読み込み、グリップでルールを絞り込む
    pub fn load(kind: ExerciseKind, grip: Option<GripType>) -> Result<Self> {
        let text = match kind {
            ExerciseKind::Pushup => PUSHUP_PROFILE_TOML,
            ExerciseKind::Pullup => PULLUP_PROFILE_TOML,
        };
        let mut profile = Self::from_toml(text)?;

        if kind == ExerciseKind::Pullup {
            let grip = grip.unwrap_or(GripType::Overhand);
            profile
                .rules
                .retain(|r| r.grips.is_empty() || r.grips.contains(&grip));
        }
        Ok(profile)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let profile: ExerciseProfile = toml::from_str(text)
            .map_err(|e| AnalysisError::Input(format!("failed to parse profile: {e}")))?;
        profile.validate()?;
        Ok(profile)
    }

    fn validate(&self) -> Result<()> {
        for rule in &self.rules {
            if rule.band[0] > rule.band[1] {
                return Err(AnalysisError::input(format!(
                    "rule {}: band must be ascending",
                    rule.name
                )));
            }
            if rule.weight <= 0.0 {
                return Err(AnalysisError::input(format!(
                    "rule {}: weight must be positive",
                    rule.name
                )));
            }
            if rule.phases.is_empty() {
                return Err(AnalysisError::input(format!(
                    "rule {}: phase set must not be empty",
                    rule.name
                )));
            }
        }
        Ok(())
    }

    pub fn is_scored(&self, phase: Phase) -> bool {
        self.scored_phases.contains(&phase)
    }
}
