use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::pose::keypoint::{JointId, KeypointSet};

/// ∠ABC を度数で返す (0〜180)
///
/// ベクトルが退化している場合は 180.0 を返す。
pub fn angle_deg(a: [f32; 2], b: [f32; 2], c: [f32; 2]) -> f32 {
    let ba = Vector2::new(a[0] - b[0], a[1] - b[1]);
    let bc = Vector2::new(c[0] - b[0], c[1] - b[1]);
    let norm_ba = ba.norm();
    let norm_bc = bc.norm();
    if norm_ba < 1e-8 || norm_bc < 1e-8 {
        return 180.0;
    }
    let cos = (ba.dot(&bc) / (norm_ba * norm_bc)).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

/// 2点間のユークリッド距離
pub fn distance(a: [f32; 2], b: [f32; 2]) -> f32 {
    Vector2::new(a[0] - b[0], a[1] - b[1]).norm()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// 解析で使う関節3点組
///
/// 角度はいずれも頂点 B 周りの無符号角。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(usize)]
pub enum AngleKind {
    /// 肩-肘-手首
    Elbow = 0,
    /// 腰-肩-肘
    Shoulder = 1,
    /// 肩-腰-膝
    Hip = 2,
    /// 腰-膝-足首
    Knee = 3,
}

impl AngleKind {
    pub const COUNT: usize = 4;
    pub const ALL: [AngleKind; 4] = [
        AngleKind::Elbow,
        AngleKind::Shoulder,
        AngleKind::Hip,
        AngleKind::Knee,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AngleKind::Elbow => "elbow",
            AngleKind::Shoulder => "shoulder",
            AngleKind::Hip => "hip",
            AngleKind::Knee => "knee",
        }
    }

    /// 片側分の (A, B, C)
    pub fn triple(self, side: Side) -> (JointId, JointId, JointId) {
        use JointId::*;
        match (self, side) {
            (AngleKind::Elbow, Side::Left) => (LeftShoulder, LeftElbow, LeftWrist),
            (AngleKind::Elbow, Side::Right) => (RightShoulder, RightElbow, RightWrist),
            (AngleKind::Shoulder, Side::Left) => (LeftHip, LeftShoulder, LeftElbow),
            (AngleKind::Shoulder, Side::Right) => (RightHip, RightShoulder, RightElbow),
            (AngleKind::Hip, Side::Left) => (LeftShoulder, LeftHip, LeftKnee),
            (AngleKind::Hip, Side::Right) => (RightShoulder, RightHip, RightKnee),
            (AngleKind::Knee, Side::Left) => (LeftHip, LeftKnee, LeftAnkle),
            (AngleKind::Knee, Side::Right) => (RightHip, RightKnee, RightAnkle),
        }
    }
}

/// 片側の関節角。3点のいずれかが欠損なら None
pub fn side_angle(set: &KeypointSet, kind: AngleKind, side: Side) -> Option<f32> {
    let (a, b, c) = kind.triple(side);
    Some(angle_deg(set.point(a)?, set.point(b)?, set.point(c)?))
}

/// 左右の平均角。片側のみ有効ならその側、両側欠損なら None
pub fn combined_angle(set: &KeypointSet, kind: AngleKind) -> Option<f32> {
    match (
        side_angle(set, kind, Side::Left),
        side_angle(set, kind, Side::Right),
    ) {
        (Some(l), Some(r)) => Some((l + r) / 2.0),
        (Some(l), None) => Some(l),
        (None, Some(r)) => Some(r),
        (None, None) => None,
    }
}
