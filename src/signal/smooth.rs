use std::collections::VecDeque;

use crate::pose::keypoint::{JointId, Keypoint, KeypointSet};

/// 外れ値ジャンプとみなす移動量(正規化座標)
const JUMP_THRESHOLD: f32 = 0.15;

/// 移動平均ベースのキーポイント平滑化フィルタ
///
/// 関節ごとに独立した窓を持ち、欠損サンプルで窓をリセットする。
/// 欠損をまたいで値を引きずらないため、NaN が伝播することはない。
/// 直前の窓平均から大きく跳ねた座標は 70:30 で平均側にブレンドする。
pub struct KeypointSmoother {
    window: usize,
    history: [VecDeque<[f32; 2]>; JointId::COUNT],
}

impl KeypointSmoother {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            history: std::array::from_fn(|_| VecDeque::with_capacity(window)),
        }
    }

    pub fn reset(&mut self) {
        for buf in &mut self.history {
            buf.clear();
        }
    }

    /// 1フレーム分を平滑化して返す。vis は入力のまま保持する
    pub fn smooth(&mut self, set: &KeypointSet) -> KeypointSet {
        let mut points = [Keypoint::missing(); JointId::COUNT];

        for i in 0..JointId::COUNT {
            let kp = set.points[i];
            let buf = &mut self.history[i];

            if !kp.is_valid() {
                // ギャップ: 有効区間内でのみ平滑化する
                buf.clear();
                points[i] = kp;
                continue;
            }

            let mut coord = [kp.x, kp.y];

            if !buf.is_empty() {
                let (mx, my) = window_mean(buf);
                if (coord[0] - mx).abs() > JUMP_THRESHOLD
                    || (coord[1] - my).abs() > JUMP_THRESHOLD
                {
                    coord = [mx * 0.7 + coord[0] * 0.3, my * 0.7 + coord[1] * 0.3];
                }
            }

            if buf.len() == self.window {
                buf.pop_front();
            }
            buf.push_back(coord);

            let (sx, sy) = window_mean(buf);
            points[i] = Keypoint::new(sx, sy, kp.vis);
        }

        KeypointSet::new(points)
    }
}

fn window_mean(buf: &VecDeque<[f32; 2]>) -> (f32, f32) {
    let n = buf.len() as f32;
    let sx: f32 = buf.iter().map(|c| c[0]).sum();
    let sy: f32 = buf.iter().map(|c| c[1]).sum();
    (sx / n, sy / n)
}
