//! Conversion of CLI arguments into pipeline configuration

use crate::cli::main_impl::{Cli, CliOutputFormat};
use crate::{
    config::{ExecutionProvider, OutputFormat, PipelineConfig},
    models::ModelCatalog,
    types::{MattingParams, RemovalParams},
};
use anyhow::{Context, Result};

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the pipeline configuration: config file (or defaults), then
    /// `BGREMOVE_*` environment overrides, then command-line flags
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let mut config = match &cli.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => PipelineConfig::default(),
        }
        .apply_env_overrides()
        .context("Invalid BGREMOVE_* environment override")?;

        if let Some(provider) = &cli.execution_provider {
            config.execution_provider = provider
                .parse::<ExecutionProvider>()
                .context("Invalid execution provider")?;
        }
        if cli.threads > 0 {
            config.intra_threads = cli.threads;
            config.inter_threads = (cli.threads / 2).max(1);
        }
        if let Some(dir) = &cli.cache_dir {
            config.cache_dir = Some(dir.into());
        }
        if let Some(fallback) = &cli.fallback_model {
            config.fallback_model.clone_from(fallback);
        }
        if let Some(max_dimension) = cli.max_dimension {
            config.max_dimension = max_dimension;
        }
        if cli.no_download {
            config.auto_download = false;
        }
        if cli.no_edge_refinement {
            config.edge_refinement = false;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Per-request parameters from the CLI flags
    pub(crate) fn removal_params(cli: &Cli, config: &PipelineConfig) -> Result<RemovalParams> {
        let model = cli
            .model
            .clone()
            .unwrap_or_else(|| config.default_model.clone());

        let params = RemovalParams::for_model(model).with_matting(MattingParams {
            enabled: !cli.no_alpha_matting,
            foreground_threshold: cli.foreground_threshold,
            background_threshold: cli.background_threshold,
            erode_size: cli.erode_size,
            post_process_mask: !cli.no_post_process_mask,
        });
        params.validate().context("Invalid removal parameters")?;

        if !ModelCatalog::builtin().contains(&params.model) {
            log::warn!(
                "Model '{}' is not in the catalog; every request will fall back to '{}'",
                params.model,
                config.fallback_model
            );
        }
        Ok(params)
    }

    pub(crate) fn output_format(format: CliOutputFormat) -> OutputFormat {
        match format {
            CliOutputFormat::Png => OutputFormat::Png,
            CliOutputFormat::Jpeg => OutputFormat::Jpeg,
            CliOutputFormat::Webp => OutputFormat::WebP,
        }
    }

    /// Validate CLI arguments for consistency
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if let Some(provider) = &cli.execution_provider {
            provider
                .parse::<ExecutionProvider>()
                .context("Invalid execution provider")?;
        }
        if !(1..=100).contains(&cli.jpeg_quality) {
            anyhow::bail!("JPEG quality must be between 1 and 100, got {}", cli.jpeg_quality);
        }
        if cli.output.as_deref() == Some("-") && cli.json {
            anyhow::bail!("--json cannot be combined with writing the image to stdout");
        }
        Ok(())
    }
}
