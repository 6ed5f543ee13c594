//! bgremove command-line tool
//!
//! Removes backgrounds from image files, directories or stdin through the
//! validation-gated pipeline, and manages the local model cache.

use super::config::CliConfigBuilder;
use crate::{
    backends::OnnxBackend,
    cache::{format_size, ModelCache, CACHE_HOME_ENV},
    config::{OutputFormat, PipelineConfig},
    download::ModelDownloader,
    models::ModelCatalog,
    pipeline::BackgroundRemovalPipeline,
    services::OutputFormatHandler,
    types::{AttemptRecord, ProcessingTimings, RemovalParams},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Background removal CLI tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgremove")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image files or directories (use "-" for stdin)
    #[arg(value_name = "INPUT", required_unless_present_any = &["show_providers", "only_download", "list_models", "clear_cache", "show_cache_dir", "service_info"])]
    pub input: Vec<String>,

    /// Output file (single input) or directory (batch processing). Use "-" for stdout.
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = CliOutputFormat::Png)]
    pub format: CliOutputFormat,

    /// Model identifier [default: isnet-general-use]
    #[arg(short, long)]
    pub model: Option<String>,

    /// Model used for the final attempt when the requested model keeps failing
    #[arg(long)]
    pub fallback_model: Option<String>,

    /// Disable alpha matting (hard cutout edges)
    #[arg(long)]
    pub no_alpha_matting: bool,

    /// Alpha matting foreground threshold (1-255)
    #[arg(long, default_value_t = 232)]
    pub foreground_threshold: u8,

    /// Alpha matting background threshold (1-255)
    #[arg(long, default_value_t = 50)]
    pub background_threshold: u8,

    /// Alpha matting erode size (1-20)
    #[arg(long, default_value_t = 20)]
    pub erode_size: u8,

    /// Skip morphological clean-up of the predicted mask
    #[arg(long)]
    pub no_post_process_mask: bool,

    /// Skip alpha edge smoothing after removal
    #[arg(long)]
    pub no_edge_refinement: bool,

    /// Longest side processed before downsizing (output keeps the original size)
    #[arg(long)]
    pub max_dimension: Option<u32>,

    /// Execution provider (auto, cpu, cuda, coreml) [default: auto]
    #[arg(short, long)]
    pub execution_provider: Option<String>,

    /// Number of threads (0 = auto-detect optimal threading)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// JPEG quality (1-100)
    #[arg(long, default_value_t = 90)]
    pub jpeg_quality: u8,

    /// JSON pipeline configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Process directory recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Pattern for batch processing (e.g., "*.jpg")
    #[arg(long)]
    pub pattern: Option<String>,

    /// Print a JSON report of every processed file to stdout
    #[arg(long)]
    pub json: bool,

    /// Show execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,

    /// Download the model (--model or the default) but don't process any images
    #[arg(long)]
    pub only_download: bool,

    /// List catalog models with their cache state and exit
    #[arg(long)]
    pub list_models: bool,

    /// Clear cached models (combine with --model to clear specific model)
    #[arg(long)]
    pub clear_cache: bool,

    /// Show current cache directory
    #[arg(long)]
    pub show_cache_dir: bool,

    /// Print service name, version and models as JSON and exit
    #[arg(long)]
    pub service_info: bool,

    /// Use custom cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<String>,

    /// Never download missing models
    #[arg(long)]
    pub no_download: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum CliOutputFormat {
    Png,
    Jpeg,
    Webp,
}

/// One line of the `--json` report
#[derive(Debug, Serialize)]
struct FileReport {
    input: String,
    output: Option<String>,
    success: bool,
    message: String,
    model_used: Option<String>,
    fallback_used: bool,
    attempts: Vec<AttemptRecord>,
    timings: ProcessingTimings,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _tracing_guard = crate::tracing_config::init_cli_tracing(cli.verbose)
        .context("Failed to initialize tracing")?;

    if cli.service_info {
        println!("{}", serde_json::to_string_pretty(&crate::service_info())?);
        return Ok(());
    }

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(&cli)?;

    if cli.list_models {
        return list_models(&config);
    }

    if cli.only_download {
        return download_model_only(&cli, &config).await;
    }

    if cli.clear_cache {
        return clear_cache_models(&cli, &config);
    }

    if cli.show_cache_dir {
        return show_current_cache_dir(&config);
    }

    if cli.input.is_empty() {
        anyhow::bail!("At least one input is required");
    }

    let params = CliConfigBuilder::removal_params(&cli, &config)?;
    let format = CliConfigBuilder::output_format(cli.format);
    OutputFormatHandler::validate_for_background_removal(format);

    info!(
        model = %params.model,
        fallback = %config.fallback_model,
        provider = %config.execution_provider,
        "Starting background removal"
    );

    let pipeline =
        BackgroundRemovalPipeline::onnx(config).context("Failed to create background removal pipeline")?;

    let start_time = Instant::now();
    let reports = process_inputs(&cli, &pipeline, &params, format).await?;

    let failed = reports.iter().filter(|r| !r.success).count();
    info!(
        "Processed {} image(s) in {:.2}s ({} failed)",
        reports.len(),
        start_time.elapsed().as_secs_f64(),
        failed
    );

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    if failed > 0 {
        anyhow::bail!("{} of {} file(s) failed", failed, reports.len());
    }
    Ok(())
}

/// Display execution provider availability
fn show_provider_diagnostics() {
    println!("🔍 Execution Provider Diagnostics");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(1);
    println!("💻 System: {cpu_count} CPU cores detected");

    println!("\n🚀 Execution Providers:");
    for (name, available, description) in OnnxBackend::list_providers() {
        let status = if available {
            "✅ Available"
        } else {
            "❌ Not Available"
        };
        println!("  • {name}: {status} - {description}");
    }

    println!("\n💡 Usage Examples:");
    println!("  --execution-provider auto    # Auto-select best provider (default)");
    println!("  --execution-provider coreml  # Use Apple CoreML (macOS)");
    println!("  --execution-provider cuda    # Use NVIDIA CUDA");
    println!("  --execution-provider cpu     # Force CPU execution");
}

/// List catalog models with their cache state
fn list_models(config: &PipelineConfig) -> Result<()> {
    let cache =
        ModelCache::open(config.cache_dir.as_deref()).context("Failed to initialize model cache")?;
    let catalog = ModelCatalog::builtin();

    println!("📦 Models");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for model in catalog.iter() {
        let mut tags = Vec::new();
        if model.id == config.default_model {
            tags.push("default");
        }
        if model.id == config.fallback_model {
            tags.push("fallback");
        }
        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", tags.join(", "))
        };

        println!("📁 {}{}", model.id, tags);
        println!("  └─ {}", model.description);
        let [width, height] = model.preprocessing.target_size;
        println!("  └─ Input: {width}x{height}");
        if cache.is_model_cached(model) {
            let size = std::fs::metadata(cache.model_path(model))
                .map(|m| m.len())
                .unwrap_or(0);
            println!("  └─ Cached: ✅ {} ({})", cache.model_path(model).display(), format_size(size));
        } else {
            println!("  └─ Cached: ❌ (~{} download)", format_size(model.size_bytes));
        }
        println!();
    }

    println!("💡 To download a model ahead of time:");
    println!("  bgremove --only-download --model MODEL_ID");
    Ok(())
}

/// Download a model without processing images
async fn download_model_only(cli: &Cli, config: &PipelineConfig) -> Result<()> {
    let model_id = cli.model.as_deref().unwrap_or(&config.default_model);
    let catalog = ModelCatalog::builtin();
    let info = catalog
        .resolve(model_id)
        .context("Run `bgremove --list-models` to see available models")?;

    let cache =
        ModelCache::open(config.cache_dir.as_deref()).context("Failed to initialize model cache")?;
    let downloader = ModelDownloader::new(cache).context("Failed to create model downloader")?;

    if downloader.cache().is_model_cached(info) {
        println!(
            "✅ Model '{}' is already cached at {}",
            info.id,
            downloader.cache().model_path(info).display()
        );
        return Ok(());
    }

    println!("📦 Downloading model '{}' from {}", info.id, info.url);
    let artifact = downloader
        .download_model(info, true)
        .await
        .with_context(|| format!("Failed to download model '{}'", info.id))?;

    println!("✅ Model downloaded successfully!");
    println!("  └─ Path: {}", artifact.path.display());
    println!("  └─ Size: {}", format_size(artifact.size_bytes));
    println!("  └─ SHA-256: {}", artifact.sha256);
    Ok(())
}

/// Clear all cached models, or only `--model`
fn clear_cache_models(cli: &Cli, config: &PipelineConfig) -> Result<()> {
    let cache =
        ModelCache::open(config.cache_dir.as_deref()).context("Failed to initialize model cache")?;

    if let Some(model_id) = &cli.model {
        let catalog = ModelCatalog::builtin();
        let info = catalog.resolve(model_id)?;
        if cache.clear_specific_model(info)? {
            println!("🗑️  Removed cached model '{}'", info.id);
        } else {
            println!("Model '{}' is not cached", info.id);
        }
        return Ok(());
    }

    let removed = cache.clear_all_models()?;
    if removed.is_empty() {
        println!("No cached models found.");
    } else {
        println!("🗑️  Removed {} cached model(s): {}", removed.len(), removed.join(", "));
    }
    Ok(())
}

fn show_current_cache_dir(config: &PipelineConfig) -> Result<()> {
    let cache =
        ModelCache::open(config.cache_dir.as_deref()).context("Failed to initialize model cache")?;
    println!("📁 Model cache directory: {}", cache.get_current_cache_dir().display());
    println!("💡 Override with --cache-dir or the {CACHE_HOME_ENV} environment variable");
    Ok(())
}

async fn process_inputs(
    cli: &Cli,
    pipeline: &BackgroundRemovalPipeline,
    params: &RemovalParams,
    format: OutputFormat,
) -> Result<Vec<FileReport>> {
    if cli.input.len() == 1 && cli.input.first().is_some_and(|s| s == "-") {
        return Ok(vec![process_stdin(cli, pipeline, params, format).await?]);
    }

    let mut all_files = Vec::new();
    for input in &cli.input {
        let path = PathBuf::from(input);
        if path.is_file() {
            if is_image_file(&path) {
                all_files.push(path);
            } else {
                warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            all_files.extend(find_image_files(&path, cli.recursive, cli.pattern.as_deref())?);
        } else {
            anyhow::bail!(
                "Input path does not exist or is not accessible: {}",
                path.display()
            );
        }
    }

    if all_files.is_empty() {
        warn!("No supported image files found in the provided inputs");
        return Ok(Vec::new());
    }
    all_files.sort();

    let file_count = all_files.len();
    info!("Found {} image file(s) to process", file_count);

    let output_dir = if file_count > 1 {
        match cli.output.as_deref() {
            Some("-") => {
                anyhow::bail!("Cannot use stdout (-) as output when processing multiple files")
            },
            Some(output) => {
                let output_path = PathBuf::from(output);
                if output_path.is_file() {
                    anyhow::bail!(
                        "Output path exists and is a file, not a directory: {}",
                        output_path.display()
                    );
                }
                std::fs::create_dir_all(&output_path).with_context(|| {
                    format!("Failed to create output directory: {}", output_path.display())
                })?;
                Some(output_path)
            },
            None => None,
        }
    } else {
        None
    };

    let progress = (file_count > 1).then(|| {
        let pb = ProgressBar::new(file_count as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb
    });

    let mut reports = Vec::with_capacity(file_count);
    for input_file in &all_files {
        if let Some(pb) = &progress {
            pb.set_message(format!("Processing {}", input_file.display()));
        }

        let output_path = match (&output_dir, cli.output.as_deref()) {
            (Some(dir), _) => output_path_in_dir(input_file, dir, format),
            (None, Some(single)) if file_count == 1 => PathBuf::from(single),
            _ => default_output_path(input_file, format),
        };

        let report = process_single_file(cli, pipeline, params, format, input_file, &output_path).await;
        if !report.success {
            warn!("❌ {}: {}", input_file.display(), report.message);
        }
        reports.push(report);

        if let Some(pb) = &progress {
            pb.inc(1);
        }
    }

    if let Some(pb) = progress {
        pb.finish_with_message("Done");
    }
    Ok(reports)
}

async fn process_single_file(
    cli: &Cli,
    pipeline: &BackgroundRemovalPipeline,
    params: &RemovalParams,
    format: OutputFormat,
    input: &Path,
    output: &Path,
) -> FileReport {
    let bytes = match tokio::fs::read(input).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return FileReport {
                input: input.display().to_string(),
                output: None,
                success: false,
                message: format!("Failed to read input file: {e}"),
                model_used: None,
                fallback_used: false,
                attempts: Vec::new(),
                timings: ProcessingTimings::default(),
            }
        },
    };

    let result = pipeline
        .process_upload(&bytes, Some(bytes.len()), params)
        .await;

    let mut report = FileReport {
        input: input.display().to_string(),
        output: None,
        success: result.success,
        message: result.message,
        model_used: result.model_used,
        fallback_used: result.fallback_used,
        attempts: result.attempts,
        timings: result.timings,
    };

    if let Some(image) = result.image {
        let written = OutputFormatHandler::encode(&image, format, cli.jpeg_quality)
            .map_err(anyhow::Error::from)
            .and_then(|encoded| {
                std::fs::write(output, encoded)
                    .with_context(|| format!("Failed to write output file: {}", output.display()))
            });
        match written {
            Ok(()) => {
                info!("✅ {} -> {}", input.display(), output.display());
                report.output = Some(output.display().to_string());
            },
            Err(e) => {
                report.success = false;
                report.message = format!("{e:#}");
            },
        }
    }
    report
}

async fn process_stdin(
    cli: &Cli,
    pipeline: &BackgroundRemovalPipeline,
    params: &RemovalParams,
    format: OutputFormat,
) -> Result<FileReport> {
    let mut bytes = Vec::new();
    io::stdin()
        .read_to_end(&mut bytes)
        .context("Failed to read from stdin")?;

    let result = pipeline
        .process_upload(&bytes, Some(bytes.len()), params)
        .await;

    let image = result
        .image
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("{}", result.message))?;
    let encoded = OutputFormatHandler::encode(image, format, cli.jpeg_quality)?;

    let output = match cli.output.as_deref() {
        None | Some("-") => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&encoded).context("Failed to write to stdout")?;
            stdout.flush().context("Failed to flush stdout")?;
            None
        },
        Some(path) => {
            std::fs::write(path, &encoded)
                .with_context(|| format!("Failed to write output file: {path}"))?;
            Some(path.to_string())
        },
    };

    Ok(FileReport {
        input: "-".to_string(),
        output,
        success: result.success,
        message: result.message,
        model_used: result.model_used,
        fallback_used: result.fallback_used,
        attempts: result.attempts,
        timings: result.timings,
    })
}

fn find_image_files(dir: &Path, recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let max_depth = if recursive { usize::MAX } else { 1 };

    for entry in walkdir::WalkDir::new(dir).max_depth(max_depth) {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_file() && is_image_file(path) && matches_pattern(path, pattern) {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

fn matches_pattern(path: &Path, pattern: Option<&str>) -> bool {
    match pattern {
        Some(pat) => path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|filename| {
                glob::Pattern::new(pat)
                    .map(|p| p.matches(filename))
                    .unwrap_or(false)
            }),
        None => true,
    }
}

fn output_file_name(input_path: &Path, format: OutputFormat) -> String {
    let stem = input_path.file_stem().unwrap_or_default();
    format!(
        "{}_bg_removed.{}",
        stem.to_string_lossy(),
        OutputFormatHandler::get_extension(format)
    )
}

/// `<dir>/<stem>_bg_removed.<ext>` next to the input
fn default_output_path(input_path: &Path, format: OutputFormat) -> PathBuf {
    let dir = input_path.parent().unwrap_or(Path::new("."));
    dir.join(output_file_name(input_path, format))
}

fn output_path_in_dir(input_path: &Path, output_dir: &Path, format: OutputFormat) -> PathBuf {
    output_dir.join(output_file_name(input_path, format))
}
