use crate::pose::keypoint::KeypointSet;
use crate::signal::angles::{combined_angle, AngleKind};

/// 欠損を許容する角度時系列(度)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AngleSeries {
    values: Vec<Option<f32>>,
}

impl AngleSeries {
    pub fn from_values(values: Vec<Option<f32>>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<f32> {
        self.values.get(idx).copied().flatten()
    }

    pub fn values(&self) -> &[Option<f32>] {
        &self.values
    }

    /// 長さ `max_gap` 以下の欠損区間を両端から線形補間する
    ///
    /// 先頭・末尾の欠損と、それより長い区間は欠損のまま残す。
    pub fn impute_gaps(&mut self, max_gap: usize) {
        if max_gap == 0 {
            return;
        }
        let n = self.values.len();
        let mut i = 0;
        while i < n {
            if self.values[i].is_some() {
                i += 1;
                continue;
            }
            let start = i;
            while i < n && self.values[i].is_none() {
                i += 1;
            }
            let gap = i - start;
            // 両端に有効値がある区間だけ補間
            if start == 0 || i == n || gap > max_gap {
                continue;
            }
            let left = self.values[start - 1].unwrap_or(0.0);
            let right = self.values[i].unwrap_or(0.0);
            let span = (gap + 1) as f32;
            for (k, slot) in self.values[start..i].iter_mut().enumerate() {
                let t = (k + 1) as f32 / span;
                *slot = Some(left + (right - left) * t);
            }
        }
    }
}

/// 4種の合成角度系列(フレーム順)
#[derive(Debug, Clone, Default)]
pub struct AngleBank {
    series: [AngleSeries; AngleKind::COUNT],
}

impl AngleBank {
    /// 平滑化済みキーポイント列から角度系列を構築し、短い欠損を補間する
    pub fn build(sets: &[KeypointSet], impute_max_gap: usize) -> Self {
        let mut series: [Vec<Option<f32>>; AngleKind::COUNT] =
            std::array::from_fn(|_| Vec::with_capacity(sets.len()));

        for set in sets {
            for kind in AngleKind::ALL {
                series[kind as usize].push(combined_angle(set, kind));
            }
        }

        let mut series = series.map(AngleSeries::from_values);
        for s in &mut series {
            s.impute_gaps(impute_max_gap);
        }
        Self { series }
    }

    pub fn kind(&self, kind: AngleKind) -> &AngleSeries {
        &self.series[kind as usize]
    }

    pub fn len(&self) -> usize {
        self.series[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 1フレーム分の角度 (AngleKind の列挙順)
    pub fn frame(&self, idx: usize) -> [Option<f32>; AngleKind::COUNT] {
        std::array::from_fn(|k| self.series[k].get(idx))
    }

    /// DTW 用特徴。4角度すべて有効なときのみ Some
    pub fn feature(&self, idx: usize) -> Option<[f32; AngleKind::COUNT]> {
        let frame = self.frame(idx);
        if frame.iter().all(|v| v.is_some()) {
            Some(std::array::from_fn(|k| frame[k].unwrap_or(0.0) / 180.0))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_impute_short_gap() {
        let mut s = AngleSeries::from_values(vec![
            Some(100.0),
            None,
            None,
            Some(130.0),
        ]);
        s.impute_gaps(3);
        assert!(approx_eq(s.get(1).unwrap(), 110.0, 1e-4));
        assert!(approx_eq(s.get(2).unwrap(), 120.0, 1e-4));
    }

    #[test]
    fn test_impute_skips_long_gap() {
        let mut s = AngleSeries::from_values(vec![
            Some(100.0),
            None,
            None,
            None,
            None,
            Some(130.0),
        ]);
        s.impute_gaps(3);
        assert_eq!(s.get(2), None);
        assert_eq!(s.get(4), None);
    }

    #[test]
    fn test_impute_leaves_edges() {
        let mut s = AngleSeries::from_values(vec![None, Some(90.0), None]);
        s.impute_gaps(3);
        assert_eq!(s.get(0), None);
        assert_eq!(s.get(2), None);
        assert_eq!(s.get(1), Some(90.0));
    }

    #[test]
    fn test_bank_feature_requires_all_angles() {
        use crate::pose::keypoint::{JointId, Keypoint, KeypointSet};

        // 肘の3点だけ有効なフレーム → 他の角度が欠けるので特徴は None
        let mut points = [Keypoint::missing(); JointId::COUNT];
        points[JointId::LeftShoulder as usize] = Keypoint::new(0.0, 0.0, 0.9);
        points[JointId::LeftElbow as usize] = Keypoint::new(0.1, 0.0, 0.9);
        points[JointId::LeftWrist as usize] = Keypoint::new(0.2, 0.0, 0.9);
        let set = KeypointSet::new(points);

        let bank = AngleBank::build(&[set], 3);
        assert_eq!(bank.len(), 1);
        assert!(bank.kind(AngleKind::Elbow).get(0).is_some());
        assert_eq!(bank.kind(AngleKind::Knee).get(0), None);
        assert_eq!(bank.feature(0), None);
    }
}
