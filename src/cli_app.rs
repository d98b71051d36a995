//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Local;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use lahmo_daq::archive::{self, ArchiveReport};
use lahmo_daq::capture::ingest::IngestOutcome;
use lahmo_daq::capture::sink::session_file_name;
use lahmo_daq::capture::transport::ReaderTransport;
use lahmo_daq::core::config::Config;
use lahmo_daq::core::errors::LhmError;
use lahmo_daq::daemon::controller::{CaptureSummary, Controller};
use lahmo_daq::logger::activity::{
    ActivityEvent, ActivityLoggerHandle, CHANNEL_CAPACITY, spawn_logger,
};
use lahmo_daq::logger::jsonl::JsonlConfig;
use lahmo_daq::render::frame::{HeadlessSurface, PlotSurface};
#[cfg(feature = "tui")]
use lahmo_daq::render::terminal::TerminalSurface;

/// LaHMo wearable sensor capture and dataset tools.
#[derive(Debug, Parser)]
#[command(
    name = "lahmo",
    author,
    version,
    about = "LaHMo wearable sensor capture",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Stream records from a device, plot them live, and log them to CSV.
    Capture(CaptureArgs),
    /// Downsample a recorded dataset into a gzip archive.
    Archive(ArchiveArgs),
    /// View and check configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct CaptureArgs {
    /// Device node or file to read records from (`-` for stdin).
    #[arg(long, short, value_name = "PATH", default_value = "-")]
    input: PathBuf,
    /// CSV output file. Defaults to a timestamped file in the data directory.
    #[arg(long, short, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Number of recent samples kept for plotting.
    #[arg(long, value_name = "N")]
    max_len: Option<usize>,
    /// Seconds of undecodable input before the connection is declared stale.
    #[arg(long, value_name = "SECONDS")]
    conn_timeout: Option<f64>,
    /// Do not draw the live plot.
    #[arg(long)]
    headless: bool,
}

#[derive(Debug, Clone, Args)]
struct ArchiveArgs {
    /// Dataset category directory.
    #[arg(long, short)]
    category: String,
    /// Test date directory.
    #[arg(long, short)]
    date: String,
    /// Label (file stem) of the recording to archive.
    #[arg(long, short)]
    label: String,
    /// Keep one line out of every M after the preamble.
    #[arg(long, visible_alias = "ds", value_name = "M")]
    downsample: Option<usize>,
    /// Preamble lines copied verbatim from the start of the file.
    #[arg(long, visible_alias = "sr", value_name = "S")]
    skip_rows: Option<usize>,
    /// Dataset root. Defaults to `archive.dataset_dir`.
    #[arg(long, value_name = "DIR")]
    dataset_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Capture ended on its own before the user stopped it.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<LhmError> for CliError {
    fn from(e: LhmError) -> Self {
        match e {
            LhmError::InvalidConfig { .. }
            | LhmError::MissingConfig { .. }
            | LhmError::ConfigParse { .. } => Self::User(e.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Capture(args) => run_capture(cli, args),
        Command::Archive(args) => run_archive(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// capture
// ---------------------------------------------------------------------------

/// Upper bound for `--conn-timeout` (one day).
const MAX_CONN_TIMEOUT_SECS: f64 = 86_400.0;

fn apply_capture_overrides(config: &mut Config, args: &CaptureArgs) -> Result<(), CliError> {
    if let Some(max_len) = args.max_len {
        config.capture.max_len = max_len;
    }
    if let Some(secs) = args.conn_timeout {
        if !secs.is_finite() || secs <= 0.0 || secs > MAX_CONN_TIMEOUT_SECS {
            return Err(CliError::User(format!(
                "--conn-timeout must be between 0 and {MAX_CONN_TIMEOUT_SECS} seconds, got {secs}"
            )));
        }
        config.capture.conn_timeout_ms = Duration::from_secs_f64(secs)
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX);
    }
    config.validate()?;
    Ok(())
}

fn resolve_output_path(config: &Config, args: &CaptureArgs) -> PathBuf {
    args.output.clone().unwrap_or_else(|| {
        config
            .paths
            .data_dir
            .join(session_file_name(&config.capture.session_prefix, Local::now()))
    })
}

fn open_surface(headless: bool) -> Result<Box<dyn PlotSurface>, CliError> {
    if headless || !io::stdout().is_terminal() {
        return Ok(Box::new(HeadlessSurface::new()));
    }
    #[cfg(feature = "tui")]
    {
        Ok(Box::new(TerminalSurface::open()?))
    }
    #[cfg(not(feature = "tui"))]
    {
        Ok(Box::new(HeadlessSurface::new()))
    }
}

fn run_capture(cli: &Cli, args: &CaptureArgs) -> Result<(), CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    apply_capture_overrides(&mut config, args)?;
    let output = resolve_output_path(&config, args);
    let config_hash = config.stable_hash()?;

    let (activity, logger_thread) = start_activity_log(&config);
    activity.send(ActivityEvent::ConfigLoaded {
        path: config.paths.config_file.display().to_string(),
        config_hash: config_hash.clone(),
    });

    let transport = ReaderTransport::open(
        &args.input,
        Duration::from_millis(config.capture.read_timeout_ms),
    )?;
    let source = args.input.display().to_string();

    let mut controller = Controller::new(&config, &output)?.with_activity(activity.clone());
    #[cfg(feature = "daemon")]
    controller.stop_handle().register_os_signals();

    let surface = open_surface(args.headless)?;
    controller.start(Box::new(transport), surface)?;
    activity.send(ActivityEvent::CaptureStarted {
        source: source.clone(),
        output: output.display().to_string(),
        config_hash,
    });
    if cli.verbose {
        eprintln!("[LHM-INGEST] reading {source}, logging to {}", output.display());
    }

    let outcome = controller.wait();
    let summary = controller.summary();
    finish_activity_log(&activity, logger_thread);

    emit_capture_summary(cli, &summary)?;
    match outcome {
        Some(IngestOutcome::StaleConnection) => Err(CliError::Partial(format!(
            "connection to {source} went stale after {} ms of undecodable input",
            config.capture.conn_timeout_ms
        ))),
        Some(_) => Ok(()),
        None => Err(CliError::Runtime("capture ended without an outcome".to_string())),
    }
}

fn emit_capture_summary(cli: &Cli, summary: &CaptureSummary) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Human => {
            if cli.quiet {
                return Ok(());
            }
            let c = summary.counters;
            let reason = summary.outcome.map_or("unknown", IngestOutcome::as_str);
            let reason = match summary.outcome {
                Some(IngestOutcome::StaleConnection) => reason.red().bold(),
                Some(IngestOutcome::TransportClosed) => reason.yellow(),
                _ => reason.green(),
            };
            println!("{} {reason}", "Capture stopped:".bold());
            println!("  Output:      {}", summary.output.display());
            println!("  Duration:    {:.1}s", summary.duration_ms as f64 / 1000.0);
            println!("  Accepted:    {}", c.accepted);
            println!("  Duplicates:  {}", c.duplicates);
            println!("  Malformed:   {}", c.malformed);
            println!("  Undecodable: {}", c.decode_failures);
            if c.sink_errors > 0 {
                println!("  {} {}", "Sink errors:".red(), c.sink_errors);
            }
            if cli.verbose {
                println!("  Lines read:  {}", c.lines_read);
                println!("  In history:  {}", summary.history_len);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "capture",
                "summary": serde_json::to_value(summary)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// archive
// ---------------------------------------------------------------------------

fn run_archive(cli: &Cli, args: &ArchiveArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let dataset_dir = args
        .dataset_dir
        .clone()
        .unwrap_or_else(|| config.archive.dataset_dir.clone());
    let downsample = args.downsample.unwrap_or(config.archive.downsample);
    let skip_rows = args.skip_rows.unwrap_or(config.archive.skip_rows);
    if downsample == 0 {
        return Err(CliError::User("--downsample must be >= 1".to_string()));
    }

    let paths = archive::dataset_paths(&dataset_dir, &args.category, &args.date, &args.label);
    let (activity, logger_thread) = start_activity_log(&config);
    let result = archive::compress(&paths.source, &paths.archive, downsample, skip_rows);
    match &result {
        Ok(report) => activity.send(ActivityEvent::ArchiveWritten {
            path: paths.archive.display().to_string(),
            lines_in: report.lines_in,
            lines_out: report.lines_out,
        }),
        Err(e) => activity.send(ActivityEvent::Error {
            code: e.code().to_string(),
            message: e.to_string(),
        }),
    }
    finish_activity_log(&activity, logger_thread);
    let report = result?;

    emit_archive_report(cli, &paths.source, &paths.archive, report, downsample, skip_rows)
}

fn emit_archive_report(
    cli: &Cli,
    source: &Path,
    dest: &Path,
    report: ArchiveReport,
    downsample: usize,
    skip_rows: usize,
) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                println!(
                    "{} {} -> {}",
                    "Archived".green().bold(),
                    source.display(),
                    dest.display()
                );
                println!(
                    "  {} of {} lines kept (downsample {downsample}, skip rows {skip_rows})",
                    report.lines_out, report.lines_in
                );
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "archive",
                "source": source.to_string_lossy(),
                "archive": dest.to_string_lossy(),
                "downsample": downsample,
                "skip_rows": skip_rows,
                "lines_in": report.lines_in,
                "lines_out": report.lines_out,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => println!("{}", config.to_toml()?),
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("{}", "Configuration is valid.".green());
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Channels: {}", config.layout.channel_count());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("{} {e}", "Configuration is INVALID:".red().bold());
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error_code": e.code(),
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ---------------------------------------------------------------------------
// shared helpers
// ---------------------------------------------------------------------------

fn start_activity_log(config: &Config) -> (ActivityLoggerHandle, Option<JoinHandle<()>>) {
    match spawn_logger(JsonlConfig::from_config(config), CHANNEL_CAPACITY) {
        Ok((handle, join)) => (handle, Some(join)),
        Err(e) => {
            eprintln!("[LHM-JSONL] activity log disabled: {e}");
            (ActivityLoggerHandle::disabled(), None)
        }
    }
}

fn finish_activity_log(handle: &ActivityLoggerHandle, join: Option<JoinHandle<()>>) {
    handle.shutdown();
    if let Some(join) = join
        && join.join().is_err()
    {
        eprintln!("[LHM-JSONL] logger thread panicked");
    }
    let dropped = handle.dropped_events();
    if dropped > 0 {
        eprintln!("[LHM-JSONL] {dropped} activity events dropped");
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("LAHMO_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "lahmo",
            "--config",
            "/tmp/lahmo.toml",
            "--json",
            "--no-color",
            "-v",
            "config",
            "show",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["lahmo", "config", "show", "--json", "--no-color", "-q"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_capture_and_archive() {
        let cases = [
            vec!["lahmo", "capture"],
            vec!["lahmo", "capture", "--input", "/dev/ttyUSB0", "--headless"],
            vec![
                "lahmo",
                "capture",
                "-i",
                "-",
                "-o",
                "/tmp/out.csv",
                "--max-len",
                "500",
                "--conn-timeout",
                "2.5",
            ],
            vec!["lahmo", "archive", "-c", "swallow", "-d", "2023-05-02", "-l", "water"],
            vec![
                "lahmo", "archive", "-c", "cough", "-d", "d", "-l", "l", "--ds", "5", "--sr", "0",
            ],
            vec!["lahmo", "config", "validate"],
            vec!["lahmo", "config"],
        ];

        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn archive_requires_category_date_and_label() {
        assert!(Cli::try_parse_from(["lahmo", "archive", "-c", "x", "-d", "y"]).is_err());
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["lahmo", "-v", "-q", "config"]).is_err());
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["lahmo", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn capture_overrides_are_validated() {
        let mut config = Config::default();
        let args = CaptureArgs {
            max_len: Some(250),
            conn_timeout: Some(1.5),
            ..CaptureArgs::default()
        };
        apply_capture_overrides(&mut config, &args).unwrap();
        assert_eq!(config.capture.max_len, 250);
        assert_eq!(config.capture.conn_timeout_ms, 1_500);

        let zero = CaptureArgs {
            max_len: Some(0),
            ..CaptureArgs::default()
        };
        assert!(matches!(
            apply_capture_overrides(&mut Config::default(), &zero),
            Err(CliError::User(_))
        ));

        let negative = CaptureArgs {
            conn_timeout: Some(-1.0),
            ..CaptureArgs::default()
        };
        assert!(apply_capture_overrides(&mut Config::default(), &negative).is_err());
    }

    #[test]
    fn explicit_output_wins_over_generated_name() {
        let config = Config::default();
        let args = CaptureArgs {
            output: Some(PathBuf::from("/tmp/explicit.csv")),
            ..CaptureArgs::default()
        };
        assert_eq!(resolve_output_path(&config, &args), PathBuf::from("/tmp/explicit.csv"));

        let generated = resolve_output_path(&config, &CaptureArgs::default());
        assert!(generated.starts_with(&config.paths.data_dir));
        let name = generated.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("test-") && name.ends_with(".csv"));
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(
            resolve_output_mode(true, Some("human"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("json"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("human"), false),
            OutputMode::Human
        );
        assert_eq!(resolve_output_mode(false, None, true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn config_errors_map_to_user_exit_code() {
        let err: CliError = LhmError::InvalidConfig {
            details: "bad".to_string(),
        }
        .into();
        assert_eq!(err.exit_code(), 1);
        let err: CliError = LhmError::Runtime {
            details: "boom".to_string(),
        }
        .into();
        assert_eq!(err.exit_code(), 2);
    }
}
