//! 動画1本を解析してレポート JSON を標準出力へ書く CLI。
//!
//! 使い方:
//!   analyze <video> <pushup|pullup> [--grip overhand|underhand|wide]
//!           [--reference <video>] [--model <onnx>] [--config <toml>]
//!           [--thumbnails <dir>] [--fps <n>]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use posecoach::pose::PoseDetector;
use posecoach::score::{ExerciseKind, GripType};
use posecoach::{analyze, AnalyzeRequest, CancelToken, Config};

const DEFAULT_MODEL_PATH: &str = "models/yolov8n-pose.onnx";

struct Args {
    video: PathBuf,
    exercise: ExerciseKind,
    grip: Option<GripType>,
    reference: Option<PathBuf>,
    model: PathBuf,
    config: Config,
    thumbnails: PathBuf,
}

fn print_usage() {
    eprintln!("usage: analyze <video> <pushup|pullup> [options]");
    eprintln!("  --grip <overhand|underhand|wide>   プルアップのグリップ");
    eprintln!("  --reference <video>                DTW 用レファレンス動画");
    eprintln!("  --model <onnx>                     姿勢モデル (既定: {DEFAULT_MODEL_PATH})");
    eprintln!("  --config <toml>                    設定ファイル");
    eprintln!("  --thumbnails <dir>                 サムネイル出力先 (既定: ./thumbnails)");
    eprintln!("  --fps <n>                          抽出フレームレート上書き");
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut positional: Vec<String> = Vec::new();
    let mut grip = None;
    let mut reference = None;
    let mut model = PathBuf::from(DEFAULT_MODEL_PATH);
    let mut config_path: Option<PathBuf> = None;
    let mut thumbnails = PathBuf::from("thumbnails");
    let mut fps_override: Option<u32> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--grip" => {
                let v = args.next().context("--grip needs a value")?;
                grip = Some(GripType::parse(&v)?);
            }
            "--reference" => reference = Some(PathBuf::from(args.next().context("--reference needs a value")?)),
            "--model" => model = PathBuf::from(args.next().context("--model needs a value")?),
            "--config" => config_path = Some(PathBuf::from(args.next().context("--config needs a value")?)),
            "--thumbnails" => thumbnails = PathBuf::from(args.next().context("--thumbnails needs a value")?),
            "--fps" => {
                fps_override = Some(
                    args.next()
                        .context("--fps needs a value")?
                        .parse()
                        .context("--fps must be an integer")?,
                )
            }
            "--version" => {
                println!("analyze {}", env!("GIT_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other if other.starts_with("--") => bail!("unknown option: {other}"),
            other => positional.push(other.to_string()),
        }
    }

    if positional.len() != 2 {
        print_usage();
        bail!("expected <video> and <exercise>");
    }

    let mut config = match config_path {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    if let Some(fps) = fps_override {
        config.extract_fps = fps;
    }

    Ok(Args {
        video: PathBuf::from(&positional[0]),
        exercise: ExerciseKind::parse(&positional[1])?,
        grip,
        reference,
        model,
        config,
        thumbnails,
    })
}

fn run() -> Result<()> {
    let args = parse_args()?;

    let mut detector = PoseDetector::new(&args.model)?;
    let request = AnalyzeRequest {
        video_path: args.video,
        exercise_type: args.exercise,
        grip_type: args.grip,
        reference_path: args.reference,
        thumbnail_dir: args.thumbnails,
        config: args.config,
    };

    let cancel = CancelToken::new();
    let report = analyze(&request, &mut detector, &cancel)?;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to serialize report")?
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
