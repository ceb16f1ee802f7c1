use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// COCO 17 キーポイントインデックス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum JointId {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl JointId {
    pub const COUNT: usize = 17;

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Nose),
            1 => Some(Self::LeftEye),
            2 => Some(Self::RightEye),
            3 => Some(Self::LeftEar),
            4 => Some(Self::RightEar),
            5 => Some(Self::LeftShoulder),
            6 => Some(Self::RightShoulder),
            7 => Some(Self::LeftElbow),
            8 => Some(Self::RightElbow),
            9 => Some(Self::LeftWrist),
            10 => Some(Self::RightWrist),
            11 => Some(Self::LeftHip),
            12 => Some(Self::RightHip),
            13 => Some(Self::LeftKnee),
            14 => Some(Self::RightKnee),
            15 => Some(Self::LeftAnkle),
            16 => Some(Self::RightAnkle),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftEye => "left_eye",
            Self::RightEye => "right_eye",
            Self::LeftEar => "left_ear",
            Self::RightEar => "right_ear",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightAnkle => "right_ankle",
        }
    }
}

/// 幾何計算で有効とみなす最小信頼度
///
/// これ未満のキーポイントは欠損扱い。値自体はレポートに残す。
pub const VIS_THRESHOLD: f32 = 0.3;

/// 単一キーポイント (x, y は画像座標、vis は検出信頼度)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub vis: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, vis: f32) -> Self {
        Self { x, y, vis }
    }

    pub fn missing() -> Self {
        Self { x: 0.0, y: 0.0, vis: 0.0 }
    }

    /// 幾何計算に使えるか
    pub fn is_valid(&self) -> bool {
        self.vis >= VIS_THRESHOLD
    }

    /// 有効なら座標を返す
    pub fn pos(&self) -> Option<[f32; 2]> {
        if self.is_valid() {
            Some([self.x, self.y])
        } else {
            None
        }
    }
}

impl Default for Keypoint {
    fn default() -> Self {
        Self::missing()
    }
}

fn mid(a: [f32; 2], b: [f32; 2]) -> [f32; 2] {
    [(a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0]
}

/// 1フレーム分の COCO 17 キーポイント
///
/// `Default` は全点欠損。検出ゼロのフレームもこの形で下流に流す。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeypointSet {
    pub points: [Keypoint; JointId::COUNT],
}

/// 関節名 → (x, y, vis) のマップとして直列化する
impl Serialize for KeypointSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(JointId::COUNT))?;
        for id in (0..JointId::COUNT).filter_map(JointId::from_index) {
            map.serialize_entry(id.name(), self.get(id))?;
        }
        map.end()
    }
}

impl KeypointSet {
    pub fn new(points: [Keypoint; JointId::COUNT]) -> Self {
        Self { points }
    }

    pub fn get(&self, id: JointId) -> &Keypoint {
        &self.points[id as usize]
    }

    /// 有効なら座標を返す
    pub fn point(&self, id: JointId) -> Option<[f32; 2]> {
        self.points[id as usize].pos()
    }

    pub fn is_all_missing(&self) -> bool {
        self.points.iter().all(|k| !k.is_valid())
    }

    pub fn mean_vis(&self) -> f32 {
        let sum: f32 = self.points.iter().map(|k| k.vis).sum();
        sum / JointId::COUNT as f32
    }

    /// 首 = 両肩の中点
    pub fn neck(&self) -> Option<[f32; 2]> {
        Some(mid(
            self.point(JointId::LeftShoulder)?,
            self.point(JointId::RightShoulder)?,
        ))
    }

    /// 骨盤中心 = 両腰の中点
    pub fn pelvis(&self) -> Option<[f32; 2]> {
        Some(mid(
            self.point(JointId::LeftHip)?,
            self.point(JointId::RightHip)?,
        ))
    }

    /// 両足首の中点
    pub fn ankle_center(&self) -> Option<[f32; 2]> {
        Some(mid(
            self.point(JointId::LeftAnkle)?,
            self.point(JointId::RightAnkle)?,
        ))
    }

    /// ピクセル座標を [0,1] に正規化したコピーを返す
    pub fn normalized(&self, width: f32, height: f32) -> KeypointSet {
        let mut points = self.points;
        for p in &mut points {
            p.x /= width;
            p.y /= height;
        }
        KeypointSet { points }
    }
}
