#![deny(warnings)]

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use depression_screen_core::classifier::ClassifierAdapter;
use depression_screen_core::config::{
    resolve_model_path, resolve_threshold, Env, RefreshRate, ScreeningConfig, StdEnv,
    WindowCapacity, DEFAULT_REFRESH_HZ, DEFAULT_WINDOW_CAPACITY,
};
use depression_screen_core::emotion::{DepressionWeights, ScorePolicy};
use depression_screen_core::frame::{load_still, ReplayCamera, SyntheticCamera};
use depression_screen_core::pipeline::{analyze_still, run_live, PipelineConfig};
use depression_screen_core::questionnaire::{Phq9Answers, ScreeningRecord};
use depression_screen_core::session::SessionController;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "depression-screen")]
#[command(about = "Experimental depression screening from facial emotion (camera/photo -> CNN -> score)")]
struct Args {
    /// ONNX emotion model (48x48x1 -> 7 classes)
    #[arg(long)]
    model: Option<PathBuf>,

    #[arg(long)]
    threshold: Option<f32>,

    /// JSON object of per-emotion weight overrides, e.g. {"Sad": 1.0}
    #[arg(long)]
    weights: Option<PathBuf>,

    /// normalized | raw
    #[arg(long, default_value = "normalized")]
    policy: String,

    #[arg(long, default_value_t = DEFAULT_WINDOW_CAPACITY)]
    window: usize,

    #[arg(long, default_value_t = DEFAULT_REFRESH_HZ)]
    refresh_hz: f64,

    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Score a live feed until interrupted
    #[command(group(
        ArgGroup::new("source")
            .required(true)
            .multiple(false)
            .args(["replay_dir", "synthetic"])
    ))]
    Live {
        /// Directory of images played back as a camera
        #[arg(long)]
        replay_dir: Option<PathBuf>,

        /// Seeded noise frames instead of a device
        #[arg(long)]
        synthetic: bool,

        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Score a single photo
    Image { path: PathBuf },
    /// Score a PHQ-9 questionnaire
    Phq9 {
        /// Nine comma-separated answers, each 0-3
        #[arg(long, value_delimiter = ',', required = true)]
        answers: Vec<u8>,

        #[arg(long)]
        username: String,

        #[arg(long)]
        user_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let env = StdEnv;
    let cfg = build_config(&args, &env)?;

    tracing::info!(
        model = %cfg.model_path.display(),
        threshold = cfg.threshold.get(),
        policy = ?cfg.policy,
        window = cfg.window.get(),
        "config loaded"
    );

    match args.command {
        Command::Live {
            replay_dir,
            synthetic: _,
            duration_secs,
        } => {
            let pipeline = PipelineConfig::from_screening(&cfg);
            let classifier = classifier_adapter(&cfg)?;
            let controller = match replay_dir {
                Some(dir) => pipeline.session(ReplayCamera::new(dir), classifier),
                None => pipeline.session(SyntheticCamera::default(), classifier),
            };
            run_session(controller, &pipeline, duration_secs.map(Duration::from_secs)).await?;
        }
        Command::Image { path } => {
            let pipeline = PipelineConfig::from_screening(&cfg);
            let classifier = classifier_adapter(&cfg)?;
            let frame = load_still(&path)
                .with_context(|| format!("failed to load image {}", path.display()))?;
            let assessment = analyze_still(&classifier, &pipeline.aggregator, &frame).await?;
            println!("{}", serde_json::to_string_pretty(&assessment)?);
        }
        Command::Phq9 {
            answers,
            username,
            user_id,
        } => {
            let answers = Phq9Answers::new(&answers)?;
            let severity = answers.severity();
            let record = ScreeningRecord::new(username, user_id, &answers)?;
            let out = serde_json::json!({
                "record": record,
                "severity": severity,
                "advice": severity.advice(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    Ok(())
}

async fn run_session(
    controller: SessionController,
    pipeline: &PipelineConfig,
    limit: Option<Duration>,
) -> anyhow::Result<()> {
    let stopper = controller.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping session");
            stopper.stop();
        }
    });

    let mut readings = controller.subscribe_readings();
    let display = tokio::spawn(async move {
        while readings.changed().await.is_ok() {
            let latest = *readings.borrow_and_update();
            if let Some(reading) = latest {
                tracing::info!(
                    depression_level = %reading.displayed_score(),
                    frame_score = reading.frame_score.get(),
                    emotion = %reading.dominant,
                    "reading"
                );
            }
        }
    });

    let summary = run_live(&controller, pipeline.refresh, limit).await;
    display.abort();
    let summary = summary?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(feature = "onnx")]
fn classifier_adapter(cfg: &ScreeningConfig) -> anyhow::Result<ClassifierAdapter> {
    use depression_screen_core::classifier::OnnxModelLoader;
    Ok(ClassifierAdapter::new(OnnxModelLoader::new(&cfg.model_path)))
}

#[cfg(not(feature = "onnx"))]
fn classifier_adapter(_cfg: &ScreeningConfig) -> anyhow::Result<ClassifierAdapter> {
    anyhow::bail!("built without a classifier backend; enable the `onnx` feature")
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn build_config(args: &Args, env: &impl Env) -> anyhow::Result<ScreeningConfig> {
    let weights = match &args.weights {
        Some(path) => DepressionWeights::from_json_file(path)
            .with_context(|| format!("invalid --weights file: {}", path.display()))?,
        None => DepressionWeights::default(),
    };
    let policy = ScorePolicy::from_name(&args.policy).ok_or_else(|| {
        anyhow::anyhow!("unknown --policy: {} (expected normalized|raw)", args.policy)
    })?;

    Ok(ScreeningConfig {
        model_path: resolve_model_path(args.model.clone(), env),
        threshold: resolve_threshold(args.threshold, env)?,
        weights,
        policy,
        window: WindowCapacity::new(args.window)?,
        refresh: RefreshRate::new(args.refresh_hz)?,
    })
}
