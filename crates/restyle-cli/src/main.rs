use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use restyle_contracts::events::{new_request_id, EventWriter};
use restyle_contracts::generation::{ErrorKind, GenerationOptions, OrientationMode};
use restyle_contracts::providers::ProviderId;
use restyle_contracts::settings::SettingsStore;
use restyle_engine::preprocess::ImageMime;
use restyle_engine::{
    CancelToken, EngineConfig, GenerationRequest, GenerationResult, ProviderFacade,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const EXIT_OK: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_SOFT_FAILURE: i32 = 2;
const EXIT_SAFETY_BLOCKED: i32 = 3;

#[derive(Debug, Parser)]
#[command(name = "restyle", version, about = "Transfer clothing from one photo onto another")]
struct Cli {
    /// Debug logging on stderr.
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Dress the target person in the source image's clothing.
    Generate(GenerateArgs),
    /// Describe the clothing in an image as JSON.
    Analyze(ImageArgs),
    /// Describe the body pose in an image as JSON.
    Pose(ImageArgs),
    /// List providers and their availability.
    Providers,
    /// Persist the preferred provider.
    Use(UseArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    /// Image whose clothing is transferred.
    #[arg(long)]
    source: PathBuf,
    /// Image of the person to dress.
    #[arg(long)]
    target: PathBuf,
    /// Output path; the extension follows the returned image type.
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long)]
    provider: Option<ProviderId>,
    /// Model to try, in order. Repeatable.
    #[arg(long = "model")]
    models: Vec<String>,
    #[arg(long, default_value_t = 1024)]
    max_width: u32,
    #[arg(long, default_value_t = 1024)]
    max_height: u32,
    /// Allow resizing the target to match the source when they differ a lot.
    #[arg(long)]
    no_preserve_target: bool,
    #[arg(long, value_enum, default_value_t = OrientationArg::Heuristic)]
    orientation: OrientationArg,
    /// Append pipeline events to this JSONL file.
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ImageArgs {
    image: PathBuf,
    #[arg(long)]
    provider: Option<ProviderId>,
}

#[derive(Debug, Parser)]
struct UseArgs {
    provider: ProviderId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OrientationArg {
    Heuristic,
    Strict,
    Off,
}

impl From<OrientationArg> for OrientationMode {
    fn from(value: OrientationArg) -> Self {
        match value {
            OrientationArg::Heuristic => OrientationMode::Heuristic,
            OrientationArg::Strict => OrientationMode::Strict,
            OrientationArg::Off => OrientationMode::Disabled,
        }
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("restyle error: {err:#}");
            std::process::exit(EXIT_ERROR);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let settings = SettingsStore::in_dir(config_dir()?);
    match cli.command {
        Command::Generate(args) => run_generate(args, &settings),
        Command::Analyze(args) => run_describe(args, &settings, DescribeKind::Clothing),
        Command::Pose(args) => run_describe(args, &settings, DescribeKind::Pose),
        Command::Providers => run_providers(&settings),
        Command::Use(args) => run_use(args, &settings),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        ["RESTYLE_LOG", "RUST_LOG"]
            .into_iter()
            .find_map(|key| env::var(key).ok().filter(|value| !value.trim().is_empty()))
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("RESTYLE_CONFIG_DIR").filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(dir).join("restyle"));
    }
    let home = env::var_os("HOME")
        .filter(|value| !value.is_empty())
        .context("cannot locate config directory: set RESTYLE_CONFIG_DIR or HOME")?;
    Ok(PathBuf::from(home).join(".config").join("restyle"))
}

/// An explicit `--provider` must be configured; the stored preference may fall back.
fn build_facade(
    config: EngineConfig,
    override_provider: Option<ProviderId>,
    settings: &SettingsStore,
) -> Result<ProviderFacade> {
    match override_provider {
        Some(provider) => Ok(ProviderFacade::pinned(config, provider)?),
        None => Ok(ProviderFacade::new(config, settings.provider_preference())),
    }
}

fn run_generate(args: GenerateArgs, settings: &SettingsStore) -> Result<i32> {
    let source = read_image(&args.source)?;
    let target = read_image(&args.target)?;

    let mut facade = build_facade(EngineConfig::from_env(), args.provider, settings)?
        .with_models(args.models.clone());
    if let Some(path) = args.events.as_ref() {
        let journal = EventWriter::new(path, new_request_id());
        info!(path = %path.display(), request_id = journal.request_id(), "writing events");
        facade = facade.with_journal(journal);
    }

    let options = GenerationOptions {
        max_width: args.max_width,
        max_height: args.max_height,
        preserve_target_dimensions: !args.no_preserve_target,
        orientation: args.orientation.into(),
        ..GenerationOptions::default()
    };
    let mut request = GenerationRequest::new(source, target).with_options(options);
    if let Some(prompt) = args.prompt.as_deref().filter(|value| !value.trim().is_empty()) {
        request = request.with_style_prompt(prompt);
    }

    let result = facade.generate(&request, &CancelToken::new())?;
    match result {
        GenerationResult::Success {
            image,
            description,
            provider,
            model,
            attempts,
        } => {
            let bytes = image.decode_bytes()?;
            let out = output_path(&args.out, &image.mime_type);
            write_output(&out, &bytes)?;
            println!("Saved {}", out.display());
            println!("{provider} / {model} ({attempts} attempt{})", plural(attempts));
            println!("{description}");
            Ok(EXIT_OK)
        }
        GenerationResult::Failure {
            kind,
            message,
            soft,
            attempts,
        } => {
            eprintln!("{message}");
            debug!(%kind, attempts, soft, "generation failed");
            Ok(failure_exit_code(kind, soft))
        }
    }
}

enum DescribeKind {
    Clothing,
    Pose,
}

fn run_describe(args: ImageArgs, settings: &SettingsStore, kind: DescribeKind) -> Result<i32> {
    let image = read_image(&args.image)?;
    let facade = build_facade(EngineConfig::from_env(), args.provider, settings)?;
    let value = match kind {
        DescribeKind::Clothing => facade.analyze_clothing(&image)?,
        DescribeKind::Pose => facade.detect_body_pose(&image)?,
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(EXIT_OK)
}

fn run_providers(settings: &SettingsStore) -> Result<i32> {
    let facade = build_facade(EngineConfig::from_env(), None, settings)?;
    for provider in ProviderId::ALL {
        let marker = if provider == facade.active() { "*" } else { " " };
        let status = if facade.is_available(provider) {
            "available"
        } else {
            "missing API key"
        };
        println!("{marker} {:<11} {status}", provider.as_str());
    }
    Ok(EXIT_OK)
}

fn run_use(args: UseArgs, settings: &SettingsStore) -> Result<i32> {
    settings.set_provider_preference(args.provider)?;
    println!("Using {} ({})", args.provider.label(), settings.path().display());
    Ok(EXIT_OK)
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

/// `requested` with its extension replaced by the one matching `mime_type`.
fn output_path(requested: &Path, mime_type: &str) -> PathBuf {
    let extension = ImageMime::from_mime(mime_type)
        .map(ImageMime::extension)
        .unwrap_or("png");
    requested.with_extension(extension)
}

fn failure_exit_code(kind: ErrorKind, soft: bool) -> i32 {
    if kind == ErrorKind::SafetyBlocked {
        EXIT_SAFETY_BLOCKED
    } else if soft {
        EXIT_SOFT_FAILURE
    } else {
        EXIT_ERROR
    }
}

fn plural(count: u32) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}
