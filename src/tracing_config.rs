//! Tracing subscriber setup for the command-line front end
//!
//! The library only emits events; installing a subscriber is the binary's
//! job. `log` records from lower-level code are bridged into the same
//! subscriber.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output with colors (default)
    Console,
    /// Compact console output without colors, for CI logs
    Compact,
    /// JSON structured logging
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Configuration for tracing output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TracingOutput {
    /// Output to stderr (default)
    Console,
    /// Output to a file
    #[cfg(feature = "tracing-files")]
    File(std::path::PathBuf),
    /// Output to both console and file
    #[cfg(feature = "tracing-files")]
    Both(std::path::PathBuf),
}

/// Keeps background log writers alive; drop it only at exit
#[derive(Debug, Default)]
#[must_use]
pub struct TracingGuard {
    #[cfg(feature = "tracing-files")]
    _file_writer: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level (0 info, 1 debug, 2+ trace)
    pub verbosity: u8,
    pub format: TracingFormat,
    pub output: TracingOutput,
    /// Explicit filter; takes precedence over `RUST_LOG` and verbosity
    pub env_filter: Option<String>,
    /// Correlation id logged when the subscriber starts
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            output: TracingOutput::Console,
            env_filter: None,
            session_id: None,
        }
    }
}

impl TracingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Convert verbosity level to tracing filter string
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    fn build_filter(&self) -> anyhow::Result<EnvFilter> {
        if let Some(filter) = &self.env_filter {
            return Ok(EnvFilter::try_new(filter)?);
        }
        // RUST_LOG wins over -v flags
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => Ok(EnvFilter::try_new(self.verbosity_to_filter())?),
        }
    }

    fn console_layer(format: TracingFormat) -> BoxedLayer {
        match format {
            TracingFormat::Console => fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .with_target(false)
                .with_level(true)
                .compact()
                .boxed(),
            TracingFormat::Compact => fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(false)
                .compact()
                .boxed(),
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_span_list(true)
                .boxed(),
        }
    }

    #[cfg(feature = "tracing-files")]
    fn file_layer(
        path: &std::path::Path,
        format: TracingFormat,
    ) -> (BoxedLayer, tracing_appender::non_blocking::WorkerGuard) {
        use tracing_appender::{non_blocking, rolling};

        let file_appender = rolling::never(
            path.parent().unwrap_or_else(|| std::path::Path::new(".")),
            path.file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("bgremove.log")),
        );
        let (writer, guard) = non_blocking(file_appender);

        let layer = match format {
            TracingFormat::Console | TracingFormat::Compact => fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .compact()
                .boxed(),
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true)
                .with_span_list(true)
                .boxed(),
        };
        (layer, guard)
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directives
    /// - A global subscriber is already installed
    pub fn init(self) -> anyhow::Result<TracingGuard> {
        let filter = self.build_filter()?;
        let mut layers: Vec<BoxedLayer> = Vec::new();
        #[allow(unused_mut)]
        let mut guard = TracingGuard::default();

        match &self.output {
            TracingOutput::Console => layers.push(Self::console_layer(self.format)),
            #[cfg(feature = "tracing-files")]
            TracingOutput::File(path) => {
                let (layer, file_guard) = Self::file_layer(path, self.format);
                layers.push(layer);
                guard._file_writer = Some(file_guard);
            },
            #[cfg(feature = "tracing-files")]
            TracingOutput::Both(path) => {
                layers.push(Self::console_layer(self.format));
                let (layer, file_guard) = Self::file_layer(path, self.format);
                layers.push(layer);
                guard._file_writer = Some(file_guard);
            },
        }

        Registry::default().with(layers).with(filter).try_init()?;

        if let Some(session_id) = &self.session_id {
            tracing::debug!(session_id = %session_id, "🚀 Background removal session started");
        }

        Ok(guard)
    }
}

/// Install a console subscriber with CLI defaults
///
/// # Errors
/// - Same as [`TracingConfig::init`]
pub fn init_cli_tracing(verbosity: u8) -> anyhow::Result<TracingGuard> {
    TracingConfig::new()
        .with_verbosity(verbosity)
        .with_session_id(uuid::Uuid::new_v4().to_string())
        .init()
}
