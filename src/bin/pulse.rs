//! Pulse CLI - Command-line interface for Workforce Pulse
//!
//! Commands:
//! - process: Run a raw stream through the pipeline and print the feature map
//! - predict: Score a feature object with the three models
//! - run: Fetch from providers (or read a stream), process and score one user
//! - doctor: Diagnose configuration, models and token storage
//! - schema: Print input, feature and output schema information

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use workforce_pulse::clock::SystemClock;
use workforce_pulse::inference::{ModelKind, ModelSet};
use workforce_pulse::schema::SourceType;
use workforce_pulse::sources::Provider;
use workforce_pulse::storage::{LocalFileTokenStore, StoredTokenProvider, TokenStore};
use workforce_pulse::{
    PipelineError, PulseConfig, RawStreamData, WorkforceAnalytics, FEATURE_NAMES,
    PRODUCER_NAME, PULSE_VERSION, SCHEMA_VERSION,
};

/// Pulse - Workplace activity analytics and wellbeing inference
#[derive(Parser)]
#[command(name = "pulse")]
#[command(author = "Workforce Pulse Contributors")]
#[command(version = PULSE_VERSION)]
#[command(about = "Turn workplace activity into wellbeing predictions", long_about = None)]
struct Cli {
    /// Config file (defaults to $PULSE_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate, preprocess and extract features from a raw stream
    Process {
        /// Raw stream JSON file (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// User the stream belongs to
        #[arg(short, long)]
        user_id: String,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Score a feature object; missing or invalid features count as 0.0
    Predict {
        /// Feature JSON object file (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        user_id: Option<String>,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Fetch, process and score one user end to end
    Run {
        #[arg(short, long)]
        user_id: String,

        /// Providers to fetch from
        #[arg(long, value_delimiter = ',', default_value = "microsoft,slack,jira")]
        providers: Vec<String>,

        /// Days of history to analyse
        #[arg(long)]
        days_back: Option<u32>,

        /// Use this raw stream instead of fetching (use - for stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Token store file (overrides providers.token_store_path)
        #[arg(long, env = "PULSE_TOKEN_STORE")]
        token_store: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Diagnose configuration, models and token storage
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print
        #[arg(value_enum)]
        schema_type: SchemaType,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Compact single-line JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Raw stream input (pulse.raw_stream.v1)
    Input,
    /// The 23 model features
    Features,
    /// Inference output
    Output,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), PulseCliError> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Process {
            input,
            user_id,
            output_format,
        } => cmd_process(config_path, &input, &user_id, &output_format),

        Commands::Predict {
            input,
            user_id,
            output_format,
        } => cmd_predict(config_path, &input, user_id.as_deref(), &output_format),

        Commands::Run {
            user_id,
            providers,
            days_back,
            input,
            token_store,
            output_format,
        } => cmd_run(
            config_path,
            &user_id,
            &providers,
            days_back,
            input.as_deref(),
            token_store,
            &output_format,
        ),

        Commands::Doctor { json } => cmd_doctor(config_path, json),

        Commands::Schema { schema_type } => cmd_schema(schema_type),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, PulseCliError> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

fn read_input(input: &Path) -> Result<String, PulseCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn write_output<T: Serialize>(value: &T, format: &OutputFormat) -> Result<(), PulseCliError> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string(value)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(value)?,
    };
    println!("{}", rendered);
    Ok(())
}

fn cmd_process(
    config_path: Option<&Path>,
    input: &Path,
    user_id: &str,
    output_format: &OutputFormat,
) -> Result<(), PulseCliError> {
    let config = PulseConfig::load(config_path)?;
    let raw = RawStreamData::from_json(&read_input(input)?)?;
    let analytics = WorkforceAnalytics::from_config(&config)?;

    let output = runtime()?.block_on(analytics.process_stream(&raw, user_id))?;
    write_output(&output, output_format)
}

fn cmd_predict(
    config_path: Option<&Path>,
    input: &Path,
    user_id: Option<&str>,
    output_format: &OutputFormat,
) -> Result<(), PulseCliError> {
    let config = PulseConfig::load(config_path)?;
    let value: serde_json::Value = serde_json::from_str(&read_input(input)?)?;
    let features = value
        .as_object()
        .ok_or_else(|| PulseCliError::InvalidInput("expected a JSON object of features".to_string()))?;
    let analytics = WorkforceAnalytics::from_config(&config)?;

    let prediction = runtime()?.block_on(analytics.predict_custom(features, user_id));
    write_output(&prediction, output_format)
}

fn cmd_run(
    config_path: Option<&Path>,
    user_id: &str,
    providers: &[String],
    days_back: Option<u32>,
    input: Option<&Path>,
    token_store: Option<PathBuf>,
    output_format: &OutputFormat,
) -> Result<(), PulseCliError> {
    let config = PulseConfig::load(config_path)?;
    let providers = providers
        .iter()
        .map(|p| p.parse::<Provider>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(PulseCliError::InvalidInput)?;

    let custom_data = input
        .map(|path| -> Result<RawStreamData, PulseCliError> {
            Ok(RawStreamData::from_json(&read_input(path)?)?)
        })
        .transpose()?;

    let analytics = if custom_data.is_some() {
        WorkforceAnalytics::from_config(&config)?
    } else {
        let path = token_store
            .or_else(|| config.providers.token_store_path.clone())
            .ok_or(PulseCliError::NoTokenStore)?;
        let store: Arc<dyn TokenStore> = Arc::new(LocalFileTokenStore::new(path));
        let tokens = Arc::new(StoredTokenProvider::new(store, Arc::new(SystemClock)));
        WorkforceAnalytics::with_providers(&config, tokens)?
    };

    let report = runtime()?.block_on(analytics.process_and_predict(
        user_id,
        &providers,
        days_back,
        custom_data,
    ))?;
    write_output(&report, output_format)
}

fn cmd_doctor(config_path: Option<&Path>, json: bool) -> Result<(), PulseCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "pulse_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Pulse version {}", PULSE_VERSION),
    });

    checks.push(DoctorCheck {
        name: "schema_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Input schema: {}", SCHEMA_VERSION),
    });

    let config = match PulseConfig::load(config_path) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Config valid ({} day window, UTC offset {} min)",
                    config.analysis_days_back, config.utc_offset_minutes
                ),
            });
            Some(config)
        }
        Err(e) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            });
            None
        }
    };

    if let Some(config) = &config {
        let models = match &config.inference.models_dir {
            Some(dir) => ModelSet::load_dir(dir).map(|_| format!("Models loaded from {}", dir.display())),
            None => Ok("Using built-in baseline models".to_string()),
        };
        checks.push(match models {
            Ok(message) => DoctorCheck {
                name: "models".to_string(),
                status: CheckStatus::Ok,
                message,
            },
            Err(e) => DoctorCheck {
                name: "models".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            },
        });

        if let Ok(analytics) = WorkforceAnalytics::from_config(config) {
            let health = analytics.health();
            checks.push(DoctorCheck {
                name: "worker_pool".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "{} workers, {} ms model timeout",
                    health.worker_pool_size, health.model_timeout_ms
                ),
            });
        }

        checks.push(token_store_check(config.providers.token_store_path.as_deref()));

        if config.providers.jira_base_url.is_none() {
            checks.push(DoctorCheck {
                name: "jira".to_string(),
                status: CheckStatus::Warning,
                message: "No Jira site configured; Jira needs a cloud_id in token metadata".to_string(),
            });
        }
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass --input with a file)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (--input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: PULSE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Pulse Doctor Report");
        println!("===================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(PulseCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn token_store_check(path: Option<&Path>) -> DoctorCheck {
    let Some(path) = path else {
        return DoctorCheck {
            name: "token_store".to_string(),
            status: CheckStatus::Warning,
            message: "No token store configured; 'run' needs --token-store or --input".to_string(),
        };
    };
    if !path.exists() {
        return DoctorCheck {
            name: "token_store".to_string(),
            status: CheckStatus::Warning,
            message: format!("Token store {} does not exist yet", path.display()),
        };
    }
    match fs::read_to_string(path).map(|c| serde_json::from_str::<serde_json::Value>(&c)) {
        Ok(Ok(value)) => {
            let tokens = value
                .get("tokens")
                .and_then(|t| t.as_array())
                .map_or(0, Vec::len);
            DoctorCheck {
                name: "token_store".to_string(),
                status: CheckStatus::Ok,
                message: format!("Token store valid ({} tokens)", tokens),
            }
        }
        Ok(Err(e)) => DoctorCheck {
            name: "token_store".to_string(),
            status: CheckStatus::Error,
            message: format!("Invalid token store JSON: {}", e),
        },
        Err(e) => DoctorCheck {
            name: "token_store".to_string(),
            status: CheckStatus::Error,
            message: format!("Cannot read token store: {}", e),
        },
    }
}

fn cmd_schema(schema_type: SchemaType) -> Result<(), PulseCliError> {
    match schema_type {
        SchemaType::Input => {
            println!("Input Schema: {}", SCHEMA_VERSION);
            println!();
            println!("A JSON object mapping a source key to a list of provider records:");
            println!();
            for source in SourceType::ALL {
                println!("  - {}", source);
            }
            println!();
            println!("Unknown keys and non-list values are reported and skipped.");
        }
        SchemaType::Features => {
            println!("Feature map ({} features, all numeric):", FEATURE_NAMES.len());
            println!();
            for (i, name) in FEATURE_NAMES.iter().enumerate() {
                println!("  {:>2}. {}", i + 1, name);
            }
        }
        SchemaType::Output => {
            println!("Inference output:");
            println!();
            println!("- predictions: one result per model containing:");
            for kind in ModelKind::ALL {
                println!("  - {} (range {})", kind, kind.score_range());
            }
            println!("  - status, score, category, description, severity_level, recommendations");
            println!("- overall_assessment: {{ status, composite_health_score, breakdown }}");
            println!("- priority_actions: [{{ priority, category, action_text, icon }}]");
            println!("- feature_info: {{ total_features, provided_features, defaulted_features, data_completeness }}");
            println!("- performance: {{ total_inference_time_ms, parallel_speedup, models_executed }}");
        }
    }

    Ok(())
}

// Error handling

#[derive(Debug)]
enum PulseCliError {
    Io(io::Error),
    Pipeline(PipelineError),
    Json(serde_json::Error),
    InvalidInput(String),
    NoTokenStore,
    DoctorFailed,
}

impl From<io::Error> for PulseCliError {
    fn from(e: io::Error) -> Self {
        PulseCliError::Io(e)
    }
}

impl From<PipelineError> for PulseCliError {
    fn from(e: PipelineError) -> Self {
        PulseCliError::Pipeline(e)
    }
}

impl From<serde_json::Error> for PulseCliError {
    fn from(e: serde_json::Error) -> Self {
        PulseCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<PulseCliError> for CliError {
    fn from(e: PulseCliError) -> Self {
        match e {
            PulseCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            PulseCliError::Pipeline(PipelineError::Config(msg)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'pulse doctor' to check the configuration".to_string()),
            },
            PulseCliError::Pipeline(e) => CliError {
                code: "PIPELINE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Ensure input matches the pulse.raw_stream.v1 schema".to_string()),
            },
            PulseCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            PulseCliError::InvalidInput(msg) => CliError {
                code: "INVALID_INPUT".to_string(),
                message: msg,
                hint: Some("Run 'pulse schema features' for the expected input".to_string()),
            },
            PulseCliError::NoTokenStore => CliError {
                code: "NO_TOKEN_STORE".to_string(),
                message: "No token store configured".to_string(),
                hint: Some("Pass --token-store, set PULSE_TOKEN_STORE, or use --input".to_string()),
            },
            PulseCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
