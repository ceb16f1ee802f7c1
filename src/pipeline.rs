use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::dtw::{DtwScorer, Feature};
use crate::error::{AnalysisError, Result};
use crate::phase::{detect_phases, normalize_driver, Phase, PhaseOutcome, PhaseParams};
use crate::pose::keypoint::KeypointSet;
use crate::report::{FrameKeypoints, Report, ReportWarning};
use crate::score::{aggregate, ExerciseProfile, GripType, PostureEvaluator};
use crate::segment::{segment_activity, ActivityClassifier, SegmentOutcome};
use crate::signal::series::AngleBank;
use crate::signal::smooth::KeypointSmoother;

/// 有効検出率がこれを下回ると DetectionError (= 8割超が欠損)
const MIN_DETECTION_RATIO: f32 = 0.2;

/// フェーズ別レファレンスセグメント集合
pub type RefSegments = BTreeMap<Phase, Vec<Vec<Feature>>>;

/// 検出済みキーポイントストリームのメタ情報
#[derive(Debug, Clone)]
pub struct StreamMeta {
    pub video_name: String,
    /// 元動画の長さ(秒)
    pub duration: f64,
    pub extract_fps: u32,
    /// 元画像解像度(正規化の分母)
    pub width: f32,
    pub height: f32,
}

/// フレームごとの付帯情報
#[derive(Debug, Clone)]
pub struct FrameInfo {
    pub timestamp: f64,
    pub thumbnail: Option<String>,
}

/// ステージ2完了時点のストリーム: 検出そのまま(ピクセル座標)の
/// キーポイント列と付帯情報
#[derive(Debug, Clone)]
pub struct KeypointStream {
    pub meta: StreamMeta,
    pub sets: Vec<KeypointSet>,
    pub infos: Vec<FrameInfo>,
}

/// 解析リクエスト
#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
    pub video_path: PathBuf,
    pub exercise_type: crate::score::ExerciseKind,
    pub grip_type: Option<GripType>,
    /// DTW 用レファレンス動画(任意)
    pub reference_path: Option<PathBuf>,
    /// サムネイル出力先
    pub thumbnail_dir: PathBuf,
    pub config: Config,
}

/// ステージ3〜5の中間結果
struct Conditioned {
    bank: AngleBank,
    segment: SegmentOutcome,
    phases: PhaseOutcome,
}

/// 正規化 → 平滑化 → 角度系列 → 活動判定 → 位相検出
fn condition_stream(
    sets: &[KeypointSet],
    meta: &StreamMeta,
    profile: &ExerciseProfile,
    classifier: Option<&ActivityClassifier>,
    config: &Config,
) -> Conditioned {
    let mut smoother = KeypointSmoother::new(config.smoothing_window);
    let smoothed: Vec<KeypointSet> = sets
        .iter()
        .map(|s| smoother.smooth(&s.normalized(meta.width, meta.height)))
        .collect();

    let bank = AngleBank::build(&smoothed, config.impute_max_gap);
    let segment = segment_activity(bank.kind(profile.driver.angle), &smoothed, classifier, config);

    let params = PhaseParams {
        d_top: config.d_top,
        d_bot: config.d_bot,
        min_rep_frames: config.min_rep_frames(),
    };
    let phases = match normalize_driver(
        bank.kind(profile.driver.angle),
        &segment.active,
        profile.driver.invert,
    ) {
        Some(d) => detect_phases(&d, &params),
        None => PhaseOutcome {
            phases: vec![Phase::Ready; sets.len()],
            count: 0,
        },
    };

    Conditioned {
        bank,
        segment,
        phases,
    }
}

/// ステージ3〜7 + レポート組み立て
///
/// 検出済みキーポイントストリームに対する解析コア本体。
/// `analyze` の後段であり、テストや外部検出器からも直接呼べる。
pub fn analyze_keypoint_stream(
    stream: KeypointStream,
    profile: &ExerciseProfile,
    grip: Option<GripType>,
    reference: Option<RefSegments>,
    classifier: Option<&ActivityClassifier>,
    config: &Config,
    cancel: &CancelToken,
) -> Result<Report> {
    let KeypointStream { meta, sets, infos } = stream;
    if sets.is_empty() || sets.len() != infos.len() {
        return Err(AnalysisError::input("empty or inconsistent keypoint stream"));
    }
    cancel.checkpoint()?;

    // 8割超が欠損なら意味のある解析はできない
    let detected_frame_count = sets.iter().filter(|s| !s.is_all_missing()).count();
    let detection_ratio = detected_frame_count as f32 / sets.len() as f32;
    if detection_ratio < MIN_DETECTION_RATIO {
        return Err(AnalysisError::Detection(format!(
            "valid detections on only {:.0}% of {} frames",
            detection_ratio * 100.0,
            sets.len()
        )));
    }

    let conditioned = condition_stream(&sets, &meta, profile, classifier, config);
    cancel.checkpoint()?;

    let Conditioned {
        bank,
        segment,
        phases,
    } = conditioned;

    let selected_frame_indices: Vec<usize> = segment
        .active
        .iter()
        .enumerate()
        .filter_map(|(i, &a)| a.then_some(i))
        .collect();

    let keypoints: Vec<FrameKeypoints> = sets
        .iter()
        .zip(infos.iter())
        .enumerate()
        .map(|(i, (set, info))| FrameKeypoints {
            frame_idx: i,
            timestamp: info.timestamp,
            thumbnail: info.thumbnail.clone(),
            keypoints: set.clone(),
            selected: segment.active[i],
        })
        .collect();

    let total_frames = sets.len();
    let base = |warning: Option<ReportWarning>| Report {
        video_name: meta.video_name.clone(),
        exercise_type: profile.name.clone(),
        grip_type: grip.map(|g| g.name().to_string()),
        duration: meta.duration,
        fps: meta.extract_fps,
        total_frames,
        exercise_count: phases.count,
        frame_scores: Vec::new(),
        error_frames: Vec::new(),
        keypoints: keypoints.clone(),
        selected_frame_indices: selected_frame_indices.clone(),
        analyzed_frame_count: selected_frame_indices.len(),
        scored_frame_count: 0,
        filtered_out_count: total_frames - selected_frame_indices.len(),
        detected_frame_count,
        filtering: segment.summary.clone(),
        aggregates: aggregate(&[], None),
        dtw_active: false,
        dtw_result: None,
        warning,
    };

    // 完了レップなしは警告レベルの縮退レポート
    if phases.count == 0 {
        info!("no complete repetition detected; returning warning-level report");
        return Ok(base(Some(ReportWarning::InsufficientMotion(
            "no complete repetition detected".to_string(),
        ))));
    }

    cancel.checkpoint()?;

    // ステージ6: 採点
    let evaluator = PostureEvaluator::new(profile, config);
    let mut frame_scores = Vec::new();
    for &i in &selected_frame_indices {
        if let Some(score) = evaluator.evaluate(i, phases.phases[i], &bank.frame(i)) {
            frame_scores.push(score);
        }
    }
    let error_frames: Vec<_> = frame_scores
        .iter()
        .filter(|f| !f.errors.is_empty())
        .cloned()
        .collect();

    // ステージ7: DTW (失敗は縮退のみ)
    let dtw_result = reference.and_then(|segments| {
        let mut scorer = DtwScorer::new(segments, config.dtw_band_frac, config.dtw_alpha)?;
        for &i in &selected_frame_indices {
            scorer.accumulate(bank.feature(i), phases.phases[i]);
        }
        scorer.finalize()
    });
    let dtw_active = dtw_result.is_some();

    cancel.checkpoint()?;

    let aggregates = aggregate(&frame_scores, dtw_result.as_ref().map(|d| d.overall_dtw_score));

    let mut report = base(None);
    report.scored_frame_count = frame_scores.len();
    report.frame_scores = frame_scores;
    report.error_frames = error_frames;
    report.aggregates = aggregates;
    report.dtw_active = dtw_active;
    report.dtw_result = dtw_result;
    Ok(report)
}

/// ストリームからフェーズ別セグメントだけを取り出す
///
/// レファレンス動画の前処理(ステージ1〜5相当)の後段。
/// 完了レップがなければ None (DTW は無効化される)。
pub fn keypoint_stream_segments(
    stream: &KeypointStream,
    profile: &ExerciseProfile,
    classifier: Option<&ActivityClassifier>,
    config: &Config,
) -> Option<RefSegments> {
    if stream.sets.is_empty() {
        return None;
    }
    let conditioned = condition_stream(&stream.sets, &stream.meta, profile, classifier, config);
    if conditioned.phases.count == 0 {
        warn!("reference stream contains no complete repetition");
        return None;
    }
    Some(crate::dtw::phase_segments(
        &conditioned.bank,
        &conditioned.phases.phases,
        &conditioned.segment.active,
    ))
}

/// 動画ファイルからレポートまでのフルパイプライン
///
/// 検出器ハンドルはプロセス起動時に1つ作り、呼び出し側が使い回す。
#[cfg(feature = "inference")]
pub fn analyze(
    request: &AnalyzeRequest,
    detector: &mut crate::pose::PoseDetector,
    cancel: &CancelToken,
) -> Result<Report> {
    use crate::score::ExerciseKind;

    request.config.validate()?;
    let profile = ExerciseProfile::load(request.exercise_type, request.grip_type)?;
    let classifier =
        ActivityClassifier::load(request.config.activity_classifier_path.as_deref());

    let stream = decode_and_detect(
        &request.video_path,
        Some(&request.thumbnail_dir),
        detector,
        &request.config,
        cancel,
    )?;

    // レファレンス動画は失敗しても DTW 無効化で続行
    let reference = match &request.reference_path {
        Some(path) => {
            match decode_and_detect(path, None, detector, &request.config, cancel) {
                Ok(ref_stream) => keypoint_stream_segments(
                    &ref_stream,
                    &profile,
                    classifier.as_ref(),
                    &request.config,
                ),
                Err(AnalysisError::Cancelled) => return Err(AnalysisError::Cancelled),
                Err(e) => {
                    warn!("reference video processing failed: {e}; DTW disabled");
                    None
                }
            }
        }
        None => None,
    };

    let grip = match request.exercise_type {
        ExerciseKind::Pullup => Some(request.grip_type.unwrap_or(GripType::Overhand)),
        ExerciseKind::Pushup => None,
    };

    analyze_keypoint_stream(
        stream,
        &profile,
        grip,
        reference,
        classifier.as_ref(),
        &request.config,
        cancel,
    )
}

/// ステージ1〜2: フレーム抽出 + バッチ姿勢検出
#[cfg(feature = "inference")]
fn decode_and_detect(
    video_path: &std::path::Path,
    thumbnail_dir: Option<&std::path::Path>,
    detector: &mut crate::pose::PoseDetector,
    config: &Config,
    cancel: &CancelToken,
) -> Result<KeypointStream> {
    use crate::video::extract::extract_frames;

    let extraction = extract_frames(video_path, thumbnail_dir, config.extract_fps, cancel)?;
    let video_name = video_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());

    let mut sets = Vec::with_capacity(extraction.frames.len());
    let mut infos = Vec::with_capacity(extraction.frames.len());
    for batch in extraction.frames.chunks(config.batch_size) {
        cancel.checkpoint()?;
        let images: Vec<&opencv::core::Mat> = batch.iter().map(|f| &f.image).collect();
        sets.extend(detector.detect_batch(&images)?);
        for frame in batch {
            infos.push(FrameInfo {
                timestamp: frame.timestamp,
                thumbnail: frame
                    .thumbnail
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned()),
            });
        }
    }

    Ok(KeypointStream {
        meta: StreamMeta {
            video_name,
            duration: extraction.meta.duration,
            extract_fps: config.extract_fps,
            width: extraction.meta.width as f32,
            height: extraction.meta.height as f32,
        },
        sets,
        infos,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::keypoint::{JointId, Keypoint};
    use crate::score::ExerciseKind;

    const W: f32 = 1920.0;
    const H: f32 = 1080.0;

    fn rotate(v: [f32; 2], deg: f32) -> [f32; 2] {
        let r = deg.to_radians();
        [
            v[0] * r.cos() - v[1] * r.sin(),
            v[0] * r.sin() + v[1] * r.cos(),
        ]
    }

    fn norm(v: [f32; 2]) -> [f32; 2] {
        let len = (v[0] * v[0] + v[1] * v[1]).sqrt();
        [v[0] / len, v[1] / len]
    }

    /// 肘角 θ・腰角 φ・膝角 ψ を実現する側面視の人体を合成する
    fn synth_body(elbow_deg: f32, hip_deg: f32, knee_deg: f32) -> KeypointSet {
        let mut points = [Keypoint::missing(); JointId::COUNT];
        let mut put = |id: JointId, p: [f32; 2]| {
            points[id as usize] = Keypoint::new(p[0], p[1], 0.9);
        };

        let shoulder = [600.0, 400.0];
        // 上腕は肩から真下、前腕は肘角 θ で開く
        let upper = 150.0;
        let elbow = [shoulder[0], shoulder[1] + upper];
        let u = norm([shoulder[0] - elbow[0], shoulder[1] - elbow[1]]);
        let wd = rotate(u, elbow_deg);
        let wrist = [elbow[0] + 140.0 * wd[0], elbow[1] + 140.0 * wd[1]];

        // 体幹: 肩→腰は水平、膝・足首は各角度で連結
        let hip = [shoulder[0] + 300.0, shoulder[1] + 40.0];
        let su = norm([shoulder[0] - hip[0], shoulder[1] - hip[1]]);
        let kd = rotate(su, hip_deg);
        let knee = [hip[0] + 200.0 * kd[0], hip[1] + 200.0 * kd[1]];
        let hu = norm([hip[0] - knee[0], hip[1] - knee[1]]);
        let ad = rotate(hu, knee_deg);
        let ankle = [knee[0] + 200.0 * ad[0], knee[1] + 200.0 * ad[1]];

        let head = [shoulder[0] - 60.0, shoulder[1] - 40.0];
        put(JointId::Nose, head);
        put(JointId::LeftEye, [head[0] - 8.0, head[1] - 8.0]);
        put(JointId::RightEye, [head[0] + 8.0, head[1] - 8.0]);
        put(JointId::LeftEar, [head[0] - 16.0, head[1]]);
        put(JointId::RightEar, [head[0] + 16.0, head[1]]);
        for (l, r, p) in [
            (JointId::LeftShoulder, JointId::RightShoulder, shoulder),
            (JointId::LeftElbow, JointId::RightElbow, elbow),
            (JointId::LeftWrist, JointId::RightWrist, wrist),
            (JointId::LeftHip, JointId::RightHip, hip),
            (JointId::LeftKnee, JointId::RightKnee, knee),
            (JointId::LeftAnkle, JointId::RightAnkle, ankle),
        ] {
            put(l, p);
            put(r, p);
        }
        KeypointSet::new(points)
    }

    /// レスト(静止) + n レップ + レストの肘角系列
    fn elbow_track(reps: usize, rest: usize, period: usize) -> Vec<f32> {
        let mut track = vec![170.0f32; rest];
        for _ in 0..reps {
            for k in 0..period {
                let t = k as f32 / period as f32 * std::f32::consts::TAU;
                track.push(120.0 + 50.0 * t.cos());
            }
        }
        track.extend(vec![170.0f32; rest]);
        track
    }

    fn stream_from(sets: Vec<KeypointSet>) -> KeypointStream {
        stream_with_fps(sets, 10)
    }

    fn stream_with_fps(sets: Vec<KeypointSet>, fps: u32) -> KeypointStream {
        let infos = (0..sets.len())
            .map(|i| FrameInfo {
                timestamp: i as f64 / fps as f64,
                thumbnail: None,
            })
            .collect();
        KeypointStream {
            meta: StreamMeta {
                video_name: "synthetic".to_string(),
                duration: sets.len() as f64 / fps as f64,
                extract_fps: fps,
                width: W,
                height: H,
            },
            sets,
            infos,
        }
    }

    fn pushup_stream(reps: usize, hip_deg: f32) -> KeypointStream {
        let sets = elbow_track(reps, 12, 20)
            .iter()
            .map(|&theta| synth_body(theta, hip_deg, 172.0))
            .collect();
        stream_from(sets)
    }

    fn check_invariants(report: &Report) {
        // len(frame_scores) ≤ len(selected) ≤ total_frames
        assert!(report.frame_scores.len() <= report.selected_frame_indices.len());
        assert!(report.selected_frame_indices.len() <= report.total_frames);
        // error_frames ⊆ frame_scores (frame_idx 単位)
        for ef in &report.error_frames {
            assert!(report
                .frame_scores
                .iter()
                .any(|f| f.frame_idx == ef.frame_idx));
        }
        // スコア範囲と errors/details の整合
        for f in &report.frame_scores {
            assert!((0.0..=1.0).contains(&f.score), "score {}", f.score);
            let non_ok = f
                .details
                .values()
                .filter(|d| d.status != crate::score::RuleStatus::Ok)
                .count();
            assert_eq!(f.errors.len(), non_ok);
        }
        assert_eq!(report.scored_frame_count, report.frame_scores.len());
        assert_eq!(
            report.filtered_out_count,
            report.total_frames - report.selected_frame_indices.len()
        );
    }

    #[test]
    fn test_three_clean_pushups() {
        let profile = ExerciseProfile::load(ExerciseKind::Pushup, None).unwrap();
        let report = analyze_keypoint_stream(
            pushup_stream(3, 175.0),
            &profile,
            None,
            None,
            None,
            &Config::default(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(report.exercise_count, 3);
        assert!(report.warning.is_none());
        assert!(!report.dtw_active);
        assert!(
            report.aggregates.avg_score >= 0.85,
            "avg = {}",
            report.aggregates.avg_score
        );
        assert!(matches!(report.aggregates.grade.as_str(), "S" | "A"));
        assert!(report.error_frames.is_empty());
        check_invariants(&report);
    }

    #[test]
    fn test_pushup_with_sagging_hips() {
        let profile = ExerciseProfile::load(ExerciseKind::Pushup, None).unwrap();
        let report = analyze_keypoint_stream(
            pushup_stream(1, 150.0),
            &profile,
            None,
            None,
            None,
            &Config::default(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(report.exercise_count, 1);
        // 腰落ちフォールトがどこかのフレームに載る
        assert!(!report.error_frames.is_empty());
        assert!(report
            .error_frames
            .iter()
            .any(|f| f.details.contains_key("body_line")));
        assert!(
            (0.45..=0.70).contains(&report.aggregates.avg_score),
            "avg = {}",
            report.aggregates.avg_score
        );
        assert_eq!(report.aggregates.grade, "B");
        check_invariants(&report);
    }

    #[test]
    fn test_static_clip_reports_insufficient_motion() {
        let profile = ExerciseProfile::load(ExerciseKind::Pushup, None).unwrap();
        let sets = (0..100).map(|_| synth_body(170.0, 175.0, 172.0)).collect();
        let report = analyze_keypoint_stream(
            stream_from(sets),
            &profile,
            None,
            None,
            None,
            &Config::default(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(report.exercise_count, 0);
        assert!(report.frame_scores.is_empty());
        assert!(matches!(
            report.warning,
            Some(ReportWarning::InsufficientMotion(_))
        ));
        assert!(report.clone().require_motion().is_err());
        check_invariants(&report);
    }

    #[test]
    fn test_detection_gap_does_not_add_reps() {
        let profile = ExerciseProfile::load(ExerciseKind::Pushup, None).unwrap();
        let mut sets: Vec<KeypointSet> = Vec::new();
        // 1レップ完了
        for &theta in &elbow_track(1, 10, 20) {
            sets.push(synth_body(theta, 175.0, 172.0));
        }
        // 下降の途中で 2 秒間 (20 フレーム) 人物が消える
        for k in 0..8 {
            sets.push(synth_body(170.0 - k as f32 * 6.0, 175.0, 172.0));
        }
        sets.extend((0..20).map(|_| KeypointSet::default()));
        // 復帰後はトップで静止
        sets.extend((0..10).map(|_| synth_body(170.0, 175.0, 172.0)));

        let report = analyze_keypoint_stream(
            stream_from(sets),
            &profile,
            None,
            None,
            None,
            &Config::default(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(report.exercise_count, 1);
        assert!(
            report.filtering.reason.contains("detection gap"),
            "reason: {}",
            report.filtering.reason
        );
        check_invariants(&report);
    }

    #[test]
    fn test_mostly_missing_stream_is_detection_error() {
        let profile = ExerciseProfile::load(ExerciseKind::Pushup, None).unwrap();
        let mut sets = vec![KeypointSet::default(); 90];
        for set in sets.iter_mut().take(10) {
            *set = synth_body(170.0, 175.0, 172.0);
        }
        let result = analyze_keypoint_stream(
            stream_from(sets),
            &profile,
            None,
            None,
            None,
            &Config::default(),
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(AnalysisError::Detection(_))));
    }

    #[test]
    fn test_cancelled_token_propagates() {
        let profile = ExerciseProfile::load(ExerciseKind::Pushup, None).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = analyze_keypoint_stream(
            pushup_stream(1, 175.0),
            &profile,
            None,
            None,
            None,
            &Config::default(),
            &cancel,
        );
        assert!(matches!(result, Err(AnalysisError::Cancelled)));
    }

    #[test]
    fn test_halved_sampling_rate_keeps_count_and_score() {
        let profile = ExerciseProfile::load(ExerciseKind::Pushup, None).unwrap();
        // 20fps のトラックと、それを1枚おきに間引いた 10fps
        let track = elbow_track(3, 24, 40);
        let body = |theta: &f32| synth_body(*theta, 175.0, 172.0);
        let sets20: Vec<KeypointSet> = track.iter().map(body).collect();
        let sets10: Vec<KeypointSet> = track.iter().step_by(2).map(body).collect();

        let config20 = Config {
            extract_fps: 20,
            ..Config::default()
        };
        let r20 = analyze_keypoint_stream(
            stream_with_fps(sets20, 20),
            &profile,
            None,
            None,
            None,
            &config20,
            &CancelToken::new(),
        )
        .unwrap();
        let r10 = analyze_keypoint_stream(
            stream_with_fps(sets10, 10),
            &profile,
            None,
            None,
            None,
            &Config::default(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(r20.exercise_count, 3);
        assert_eq!(r10.exercise_count, r20.exercise_count);
        let diff = (r20.aggregates.avg_score - r10.aggregates.avg_score).abs();
        assert!(
            diff <= 0.05,
            "avg diverged: 20fps {} vs 10fps {}",
            r20.aggregates.avg_score,
            r10.aggregates.avg_score
        );
    }

    #[test]
    fn test_deterministic_reports() {
        let profile = ExerciseProfile::load(ExerciseKind::Pushup, None).unwrap();
        let run = || {
            let report = analyze_keypoint_stream(
                pushup_stream(2, 170.0),
                &profile,
                None,
                None,
                None,
                &Config::default(),
                &CancelToken::new(),
            )
            .unwrap();
            serde_json::to_string(&report).unwrap()
        };
        assert_eq!(run(), run());
    }

    fn pullup_stream(reps: usize) -> KeypointStream {
        // 肘角 170(ハング) ↔ 60(トップ)
        let mut track = vec![170.0f32; 12];
        for _ in 0..reps {
            for k in 0..20 {
                let t = k as f32 / 20.0 * std::f32::consts::TAU;
                track.push(115.0 + 55.0 * t.cos());
            }
        }
        track.extend(vec![170.0f32; 12]);
        let sets = track
            .iter()
            .map(|&theta| synth_body(theta, 172.0, 175.0))
            .collect();
        stream_from(sets)
    }

    #[test]
    fn test_pullup_with_self_reference_dtw() {
        let profile = ExerciseProfile::load(ExerciseKind::Pullup, None).unwrap();
        let config = Config::default();
        let stream = pullup_stream(5);

        let reference =
            keypoint_stream_segments(&stream, &profile, None, &config).expect("reference reps");

        let report = analyze_keypoint_stream(
            stream,
            &profile,
            Some(GripType::Overhand),
            Some(reference),
            None,
            &config,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(report.exercise_count, 5);
        assert!(report.dtw_active);
        let dtw = report.dtw_result.as_ref().unwrap();
        assert!(
            dtw.overall_dtw_score >= 0.95,
            "overall = {}",
            dtw.overall_dtw_score
        );
        for phase in ["ascending", "descending"] {
            let score = dtw.phase_dtw_scores.get(phase).copied().unwrap_or(0.0);
            assert!(score >= 0.9, "{phase} = {score}");
        }
        assert_eq!(report.grip_type.as_deref(), Some("overhand"));
        check_invariants(&report);
    }

    #[test]
    fn test_reference_without_reps_disables_dtw() {
        let profile = ExerciseProfile::load(ExerciseKind::Pullup, None).unwrap();
        let config = Config::default();
        let static_sets = (0..60).map(|_| synth_body(170.0, 172.0, 175.0)).collect();
        let reference =
            keypoint_stream_segments(&stream_from(static_sets), &profile, None, &config);
        assert!(reference.is_none());

        let report = analyze_keypoint_stream(
            pullup_stream(2),
            &profile,
            Some(GripType::Overhand),
            None,
            None,
            &config,
            &CancelToken::new(),
        )
        .unwrap();
        assert!(!report.dtw_active);
        assert!(report.dtw_result.is_none());
        assert_eq!(report.exercise_count, 2);
    }

    #[test]
    fn test_biased_rep_lowers_score_not_count() {
        let profile = ExerciseProfile::load(ExerciseKind::Pushup, None).unwrap();
        let config = Config::default();

        let clean = analyze_keypoint_stream(
            pushup_stream(3, 175.0),
            &profile,
            None,
            None,
            None,
            &config,
            &CancelToken::new(),
        )
        .unwrap();

        // 2 レップ目の肘角へ +30° のバイアス
        let mut track = elbow_track(3, 12, 20);
        for v in track.iter_mut().skip(12 + 20).take(20) {
            *v += 30.0;
        }
        let sets = track
            .iter()
            .map(|&theta| synth_body(theta.min(180.0), 175.0, 172.0))
            .collect();
        let biased = analyze_keypoint_stream(
            stream_from(sets),
            &profile,
            None,
            None,
            None,
            &config,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(biased.exercise_count, clean.exercise_count);
        assert!(
            biased.aggregates.avg_score < clean.aggregates.avg_score,
            "biased {} should be below clean {}",
            biased.aggregates.avg_score,
            clean.aggregates.avg_score
        );
    }
}
