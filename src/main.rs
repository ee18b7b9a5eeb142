use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use fall_audit::config::{self, ConfigError, InferencePaths};
use fall_audit::pipeline::diagnostic;
use fall_audit::pipeline::fall_audit::invoker::{DEFAULT_MAX_PROMPT_BYTES, DEFAULT_TIMEOUT_SECS};
use fall_audit::pipeline::fall_audit::{
    read_records, start_audit, write_report, AuditError, BatchRunner, CancellationToken,
    InvokerConfig, LlamafileInvoker, ProgressSnapshot, RunPhase, RunnerConfig, SourceOptions,
    DEFAULT_POLL_INTERVAL,
};

/// Convention: 128 + SIGINT(2).
const INTERRUPTED_EXIT_CODE: u8 = 130;

#[derive(Debug, Parser)]
#[command(name = "fall-audit", version)]
#[command(about = "Audit progress notes for evidence of falls with a local language model")]
struct Cli {
    /// Progress note export to audit (.csv)
    input: PathBuf,

    /// Where to write the report (.csv)
    output: PathBuf,

    /// AI Brain folder holding the llamafile executable and model weights.
    /// Remembered in the config file for later runs.
    #[arg(long, env = "FALL_AUDIT_BRAIN_DIR")]
    brain_dir: Option<PathBuf>,

    /// Inference executable, bypassing the AI Brain folder lookup
    #[arg(long, requires = "model", conflicts_with = "brain_dir")]
    executable: Option<PathBuf>,

    /// Model weights, bypassing the AI Brain folder lookup
    #[arg(long, requires = "executable", conflicts_with = "brain_dir")]
    model: Option<PathBuf>,

    /// Config file (defaults to the per-user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Kill an inference call after this many seconds (0 waits forever)
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// Notes whose prompt exceeds this size are recorded as errors, not sent
    #[arg(long, default_value_t = DEFAULT_MAX_PROMPT_BYTES)]
    max_prompt_bytes: usize,

    /// Kill the in-flight inference call on Ctrl+C instead of letting it finish
    #[arg(long)]
    hard_cancel: bool,

    /// Treat the first row of the input as a header
    #[arg(long)]
    skip_header: bool,

    /// Progress poll interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_millis() as u64)]
    poll_ms: u64,
}

#[derive(Error, Debug)]
enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Audit(#[from] AuditError),
}

fn main() -> ExitCode {
    fall_audit::init_tracing();
    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    match run(Cli::parse()) {
        Ok(RunPhase::Cancelled) => ExitCode::from(INTERRUPTED_EXIT_CODE),
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "Fall audit failed");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<RunPhase, CliError> {
    require_csv(&cli.input, "Input file")?;
    require_csv(&cli.output, "Save path")?;
    if !cli.input.is_file() {
        return Err(CliError::Usage(format!(
            "Input file does not exist: {}",
            cli.input.display()
        )));
    }

    let paths = resolve_inference_paths(&cli)?;
    let records = read_records(
        &cli.input,
        SourceOptions {
            skip_header: cli.skip_header,
        },
    )?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    let hard_cancel = cli.hard_cancel;
    if let Err(e) = ctrlc::set_handler(move || {
        if hard_cancel {
            tracing::info!("Cancel requested (Ctrl+C); stopping the current note");
        } else {
            tracing::info!("Cancel requested (Ctrl+C); stopping after the current note");
        }
        on_signal.cancel();
    }) {
        tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
    }

    let invoker = LlamafileInvoker::new(InvokerConfig {
        timeout: (cli.timeout_secs > 0).then(|| Duration::from_secs(cli.timeout_secs)),
        max_prompt_bytes: cli.max_prompt_bytes,
        hard_cancel: cli.hard_cancel,
        ..InvokerConfig::new(paths.executable, paths.model)
    });
    let runner = BatchRunner::with_cancel_token(
        Box::new(invoker),
        RunnerConfig {
            dump_dir: diagnostic::dump_dir_from_env(),
        },
        cancel,
    );

    let handle = start_audit(runner, records)?;
    let mut last_logged: Option<ProgressSnapshot> = None;
    let report = handle.wait(Duration::from_millis(cli.poll_ms), |snapshot| {
        if last_logged.as_ref() != Some(snapshot) {
            tracing::info!("{}", snapshot.status_line());
            last_logged = Some(*snapshot);
        }
    })?;

    write_report(&cli.output, &report.results)?;

    tracing::info!(
        phase = %report.phase,
        processed = report.rows_processed(),
        total = report.total_rows,
        falls_detected = report.falls_detected(),
        duration_ms = report.duration_ms,
        output = %cli.output.display(),
        "Fall audit finished"
    );

    Ok(report.phase)
}

fn require_csv(path: &Path, what: &str) -> Result<(), CliError> {
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        Ok(())
    } else {
        Err(CliError::Usage(format!("{what} must be a .csv file.")))
    }
}

/// Explicit paths win; otherwise the AI Brain folder from the flag (which
/// is then persisted) or from the saved config.
fn resolve_inference_paths(cli: &Cli) -> Result<InferencePaths, CliError> {
    if let (Some(executable), Some(model)) = (&cli.executable, &cli.model) {
        return Ok(InferencePaths {
            executable: executable.clone(),
            model: model.clone(),
        });
    }

    let config_path = cli
        .config
        .clone()
        .or_else(config::default_config_path)
        .ok_or_else(|| {
            CliError::Usage("Cannot determine the config directory; pass --config".into())
        })?;

    if let Some(dir) = &cli.brain_dir {
        let paths = InferencePaths::from_brain_dir(dir)?;
        let mut saved = config::load_brain_config(&config_path).unwrap_or_default();
        if saved.ai_brain_path.as_deref() != Some(dir.as_path()) {
            saved.ai_brain_path = Some(dir.clone());
            config::save_brain_config(&config_path, &saved)?;
            tracing::info!(path = %config_path.display(), "AI Brain folder remembered");
        }
        return Ok(paths);
    }

    let saved = config::load_brain_config(&config_path)?;
    Ok(InferencePaths::from_config(&saved)?)
}
