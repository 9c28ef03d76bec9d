//! attn CLI - Command-line client for attention-link
//!
//! Commands:
//! - watch: Connect to a backend and print attention events live
//! - replay: Feed recorded server frames through the monitor (offline)
//! - roster: Print the monitored subjects
//! - doctor: Diagnose configuration and backend reachability
//! - schema: Print the wire protocol

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use attention_link::{
    connect_with_backoff, AlertEvent, AttentionMonitor, ConnectionManager, ConnectionState,
    Endpoint, Intent, LevelChanged, MonitorConfig, MonitorError, ReconnectPolicy, Roster,
    SubjectId, TimelineChanged, ATTN_VERSION, CLIENT_NAME,
};
use attention_link::config::DEFAULT_TIMELINE_CAPACITY;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// attn - Real-time attention dashboard client
#[derive(Parser)]
#[command(name = "attn")]
#[command(version = ATTN_VERSION)]
#[command(about = "Follow real-time attention levels from an analysis backend", long_about = None)]
struct Cli {
    /// Log verbosity when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a backend and print events until Ctrl-C
    Watch {
        /// Backend address (host:port or ws://host:port/path)
        #[arg(short, long)]
        endpoint: Option<String>,

        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Stream one subject's per-window samples
        #[arg(short, long)]
        profile: Option<SubjectId>,

        /// Enable low-attention alerts
        #[arg(long)]
        alerts: bool,

        /// Retry the initial connection with backoff
        #[arg(long)]
        retry: bool,

        /// Roster file (JSON) used for display names
        #[arg(long)]
        roster: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Feed recorded server frames (one JSON frame per line) through the monitor
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Treat this subject's profile as open during the replay
        #[arg(short, long)]
        profile: Option<SubjectId>,

        /// Enable low-attention alerts
        #[arg(long)]
        alerts: bool,

        /// Maximum samples kept per timeline
        #[arg(long)]
        capacity: Option<usize>,

        /// Roster file (JSON) used for display names
        #[arg(long)]
        roster: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Save monitor state to file after the replay
        #[arg(long)]
        save_state: Option<PathBuf>,
    },

    /// Print the monitored subjects
    Roster {
        /// Roster file (JSON); defaults to the built-in classroom
        #[arg(long)]
        file: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and backend reachability
    Doctor {
        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Try to open a connection to the configured endpoint
        #[arg(long)]
        probe: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the wire protocol
    Schema {
        /// Direction to print
        #[arg(value_enum)]
        direction: Direction,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable lines
    Text,
    /// Newline-delimited JSON (one event per line)
    Ndjson,
}

#[derive(Clone, ValueEnum)]
enum Direction {
    /// Frames sent by this client
    Client,
    /// Frames pushed by the backend
    Server,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<(), AttnCliError> {
    match cli.command {
        Commands::Watch {
            endpoint,
            config,
            profile,
            alerts,
            retry,
            roster,
            format,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(endpoint) = endpoint {
                config.endpoint = Endpoint::parse(&endpoint)?;
            }
            if alerts {
                config.alerts_enabled = true;
            }
            if !retry {
                config.reconnect = ReconnectPolicy::disabled();
            }
            let roster = load_roster(roster.as_deref())?;
            cmd_watch(config, profile, roster, format)
        }

        Commands::Replay {
            input,
            profile,
            alerts,
            capacity,
            roster,
            format,
            save_state,
        } => {
            let config = MonitorConfig {
                alerts_enabled: alerts,
                timeline_capacity: capacity.unwrap_or(DEFAULT_TIMELINE_CAPACITY),
                ..Default::default()
            };
            config.validate()?;
            let roster = load_roster(roster.as_deref())?;
            cmd_replay(&input, config, profile, roster, format, save_state.as_deref())
        }

        Commands::Roster { file, json } => cmd_roster(file.as_deref(), json),

        Commands::Doctor {
            config,
            probe,
            json,
        } => cmd_doctor(config.as_deref(), probe, json),

        Commands::Schema {
            direction,
            json_schema,
        } => cmd_schema(direction, json_schema),
    }
}

fn cmd_watch(
    config: MonitorConfig,
    profile: Option<SubjectId>,
    roster: Roster,
    format: OutputFormat,
) -> Result<(), AttnCliError> {
    if let Some(subject_id) = profile {
        if !roster.contains(subject_id) {
            return Err(AttnCliError::UnknownSubject(subject_id));
        }
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let connection = Arc::new(ConnectionManager::new());
        let monitor = AttentionMonitor::new(Arc::clone(&connection), &config);
        let _printers = attach_printer(&monitor, Arc::new(roster), format);

        // Requested before connecting; the monitor starts the stream on open
        if let Some(subject_id) = profile {
            monitor.send_intent(Intent::OpenProfile(subject_id));
        }

        if let Err(e) = connect_with_backoff(&connection, &config.endpoint, &config.reconnect).await {
            return Err(AttnCliError::from(e));
        }
        info!(endpoint = %config.endpoint, "watching; press Ctrl-C to stop");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                monitor.shutdown();
                // Let the I/O task flush stop_stream and the close frame
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            }
            state = connection.wait_until_ended() => {
                monitor.shutdown();
                match state {
                    ConnectionState::Failed => Err(AttnCliError::ConnectionLost),
                    _ => {
                        warn!("backend closed the connection");
                        Ok(())
                    }
                }
            }
        }
    })
}

fn cmd_replay(
    input: &Path,
    config: MonitorConfig,
    profile: Option<SubjectId>,
    roster: Roster,
    format: OutputFormat,
    save_state: Option<&Path>,
) -> Result<(), AttnCliError> {
    let reader: Box<dyn BufRead> = if input.as_os_str() == "-" {
        if atty::is(atty::Stream::Stdin) {
            warn!("reading frames from the terminal; end input with Ctrl-D");
        }
        Box::new(BufReader::new(io::stdin()))
    } else {
        Box::new(BufReader::new(fs::File::open(input)?))
    };

    let connection = Arc::new(ConnectionManager::new());
    let monitor = AttentionMonitor::new(Arc::clone(&connection), &config);
    let roster = Arc::new(roster);
    let _printers = attach_printer(&monitor, Arc::clone(&roster), format);

    let mut sent = connection.open_loopback();
    if let Some(subject_id) = profile {
        monitor.send_intent(Intent::OpenProfile(subject_id));
    }

    let mut report = ReplayReport::default();
    for line in reader.lines() {
        let line = line?;
        let frame = line.trim();
        if frame.is_empty() {
            continue;
        }
        report.frames += 1;
        if !connection.deliver(frame) {
            report.dropped += 1;
        }
    }

    if report.frames == 0 {
        return Err(AttnCliError::NoFrames);
    }

    if let Some(path) = save_state {
        fs::write(path, monitor.save_state()?)?;
    }

    monitor.shutdown();
    while let Ok(frame) = sent.try_recv() {
        report.sent.push(frame);
    }

    let snapshot = monitor.snapshot();
    report.low_set = snapshot.low_set.iter().copied().collect();
    report.levels = snapshot
        .levels
        .iter()
        .map(|(id, level)| (roster.display_name(*id), level.to_string()))
        .collect();
    if let Some(subject_id) = profile {
        report.timeline = monitor
            .timeline(subject_id)
            .into_iter()
            .map(|s| format!("{} {}", s.time, s.level))
            .collect();
    }

    match format {
        OutputFormat::Ndjson => {
            println!("{}", serde_json::to_string(&OutputEvent::Summary(&report))?);
        }
        OutputFormat::Text => {
            println!();
            println!("Replay Summary");
            println!("==============");
            println!("Frames:   {} ({} dropped)", report.frames, report.dropped);
            println!("Sent:     {}", report.sent.join(" "));
            let low: Vec<String> = report.low_set.iter().map(|id| roster.display_name(*id)).collect();
            println!("Low now:  {}", if low.is_empty() { "-".to_string() } else { low.join(", ") });
            for (name, level) in &report.levels {
                println!("  {}: {}", name, level);
            }
            if !report.timeline.is_empty() {
                println!("Timeline: {}", report.timeline.join(", "));
            }
        }
    }

    Ok(())
}

fn cmd_roster(file: Option<&Path>, json: bool) -> Result<(), AttnCliError> {
    let roster = load_roster(file)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&roster)?);
    } else {
        println!("{} ({} subjects)", roster.class_name, roster.len());
        for subject in roster.iter() {
            println!("  {:>3}  {}", subject.subject_id, subject.name);
        }
    }

    Ok(())
}

fn cmd_doctor(config: Option<&Path>, probe: bool, json: bool) -> Result<(), AttnCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("{} {}", CLIENT_NAME, ATTN_VERSION),
    });

    let loaded = match load_config(config) {
        Ok(loaded) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: match config {
                    Some(path) => format!("Loaded {} with environment overrides", path.display()),
                    None => "Defaults with environment overrides".to_string(),
                },
            });
            Some(loaded)
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

    if let Some(loaded) = &loaded {
        checks.push(DoctorCheck {
            name: "endpoint".to_string(),
            status: CheckStatus::Ok,
            message: loaded.endpoint.url(),
        });
        checks.push(DoctorCheck {
            name: "timeline".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "Capacity {} samples; alerts {}",
                loaded.timeline_capacity,
                if loaded.alerts_enabled { "on" } else { "off" }
            ),
        });

        if probe {
            checks.push(probe_endpoint(&loaded.endpoint));
        } else {
            checks.push(DoctorCheck {
                name: "probe".to_string(),
                status: CheckStatus::Warning,
                message: "Skipped; pass --probe to test reachability".to_string(),
            });
        }
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (replay ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        client: CLIENT_NAME.to_string(),
        version: ATTN_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("attn Doctor Report");
        println!("==================");
        println!("Client:  {}", report.client);
        println!("Version: {}", report.version);
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
        Err(AttnCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn probe_endpoint(endpoint: &Endpoint) -> DoctorCheck {
    let result = tokio::runtime::Runtime::new().map_err(MonitorError::from).and_then(|runtime| {
        runtime.block_on(async {
            let connection = ConnectionManager::new();
            match tokio::time::timeout(Duration::from_secs(3), connection.connect(endpoint)).await {
                Ok(result) => {
                    connection.close();
                    result
                }
                Err(_) => Err(MonitorError::ConnectError("timed out after 3s".to_string())),
            }
        })
    });

    match result {
        Ok(()) => DoctorCheck {
            name: "probe".to_string(),
            status: CheckStatus::Ok,
            message: format!("Connected to {}", endpoint),
        },
        Err(e) => DoctorCheck {
            name: "probe".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    }
}

fn cmd_schema(direction: Direction, json_schema: bool) -> Result<(), AttnCliError> {
    match direction {
        Direction::Client => {
            if json_schema {
                println!("{}", serde_json::to_string_pretty(&client_json_schema())?);
            } else {
                println!("Client → server frames (JSON text)");
                println!();
                println!("1. dashboard - identify as a dashboard client");
                println!("   {{\"type\":\"dashboard\"}}");
                println!();
                println!("2. start_stream - stream one subject's per-window samples");
                println!("   {{\"type\":\"start_stream\",\"child_id\":5}}");
                println!();
                println!("3. stop_stream - stop the stream and resume dashboard updates");
                println!("   {{\"type\":\"stop_stream\"}}");
            }
        }
        Direction::Server => {
            if json_schema {
                println!("{}", serde_json::to_string_pretty(&server_json_schema())?);
            } else {
                println!("Server → client frames (JSON text)");
                println!();
                println!("1. dashboard_update - current level of one subject");
                println!("   {{\"type\":\"dashboard_update\",\"child_id\":3,\"attention_level\":\"Low\"}}");
                println!();
                println!("2. profile_data - one 5-second window of the streamed subject");
                println!("   {{\"type\":\"profile_data\",\"window\":4,\"attention_level\":\"Mid\",\"time\":\"15-20s\"}}");
                println!("   - child_id is optional; time defaults to the window's label");
                println!();
                println!("attention_level is one of Low, Mid, High. Unknown types are ignored.");
            }
        }
    }

    Ok(())
}

// Helper functions

fn load_config(path: Option<&Path>) -> Result<MonitorConfig, AttnCliError> {
    let config = match path {
        Some(path) => MonitorConfig::from_file(path)?,
        None => MonitorConfig::default(),
    };
    Ok(config.with_env()?)
}

fn load_roster(path: Option<&Path>) -> Result<Roster, AttnCliError> {
    match path {
        Some(path) => Ok(Roster::from_file(path)?),
        None => Ok(Roster::classroom()),
    }
}

/// Print monitor events to stdout; the handles keep the printers attached
fn attach_printer(
    monitor: &AttentionMonitor,
    roster: Arc<Roster>,
    format: OutputFormat,
) -> Vec<attention_link::ListenerGuard> {
    let names = Arc::clone(&roster);
    let timeline = monitor.on_timeline_changed(move |event| match format {
        OutputFormat::Ndjson => print_json(&OutputEvent::Sample(event)),
        OutputFormat::Text => println!(
            "[sample] {} {} {}",
            names.display_name(event.subject_id),
            event.sample.time,
            event.sample.level
        ),
    });

    let names = Arc::clone(&roster);
    let level = monitor.on_current_level_changed(move |event| match format {
        OutputFormat::Ndjson => print_json(&OutputEvent::Level(event)),
        OutputFormat::Text => println!(
            "[level]  {}: {} -> {}",
            names.display_name(event.subject_id),
            event.previous.map_or("-", |l| l.as_str()),
            event.current
        ),
    });

    let alert = monitor.on_alert_fired(move |event| match format {
        OutputFormat::Ndjson => print_json(&OutputEvent::Alert(event)),
        OutputFormat::Text => println!(
            "[ALERT]  {} dropped to Low (was {})",
            roster.display_name(event.subject_id),
            event.previous
        ),
    });

    vec![timeline.into_guard(), level.into_guard(), alert.into_guard()]
}

fn print_json(event: &OutputEvent<'_>) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!(error = %e, "event not printed"),
    }
}

fn client_json_schema() -> serde_json::Value {
    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "ClientMessage",
        "oneOf": [
            {
                "type": "object",
                "required": ["type"],
                "properties": { "type": { "const": "dashboard" } }
            },
            {
                "type": "object",
                "required": ["type", "child_id"],
                "properties": {
                    "type": { "const": "start_stream" },
                    "child_id": { "type": "integer", "minimum": 0 }
                }
            },
            {
                "type": "object",
                "required": ["type"],
                "properties": { "type": { "const": "stop_stream" } }
            }
        ]
    })
}

fn server_json_schema() -> serde_json::Value {
    let level = serde_json::json!({ "enum": ["Low", "Mid", "High"] });
    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "ServerMessage",
        "oneOf": [
            {
                "type": "object",
                "required": ["type", "child_id", "attention_level"],
                "properties": {
                    "type": { "const": "dashboard_update" },
                    "child_id": { "type": "integer", "minimum": 0 },
                    "attention_level": level
                }
            },
            {
                "type": "object",
                "required": ["type", "window", "attention_level"],
                "properties": {
                    "type": { "const": "profile_data" },
                    "child_id": { "type": "integer", "minimum": 0 },
                    "window": { "type": "integer", "minimum": 1 },
                    "attention_level": level,
                    "time": { "type": "string" }
                }
            }
        ]
    })
}

// Error types

enum AttnCliError {
    Io(io::Error),
    Monitor(MonitorError),
    Json(serde_json::Error),
    UnknownSubject(SubjectId),
    NoFrames,
    ConnectionLost,
    DoctorFailed,
}

impl From<io::Error> for AttnCliError {
    fn from(e: io::Error) -> Self {
        AttnCliError::Io(e)
    }
}

impl From<MonitorError> for AttnCliError {
    fn from(e: MonitorError) -> Self {
        AttnCliError::Monitor(e)
    }
}

impl From<serde_json::Error> for AttnCliError {
    fn from(e: serde_json::Error) -> Self {
        AttnCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<AttnCliError> for CliError {
    fn from(e: AttnCliError) -> Self {
        match e {
            AttnCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            AttnCliError::Monitor(e) => {
                let hint = match &e {
                    MonitorError::ConnectError(_) => "Check that the backend is running; try 'attn doctor --probe'",
                    MonitorError::InvalidEndpoint(_) => "Use host:port or ws://host:port/path",
                    MonitorError::ConfigError(_) => "Check the config file and ATTN_* variables",
                    MonitorError::RosterError(_) => "Roster subjects need unique subject_id values",
                    _ => "Run 'attn doctor' for details",
                };
                CliError {
                    code: "MONITOR_ERROR".to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            AttnCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            AttnCliError::UnknownSubject(id) => CliError {
                code: "UNKNOWN_SUBJECT".to_string(),
                message: format!("Subject {} is not in the roster", id),
                hint: Some("Run 'attn roster' to list subjects".to_string()),
            },
            AttnCliError::NoFrames => CliError {
                code: "NO_FRAMES".to_string(),
                message: "No frames found in input".to_string(),
                hint: Some("Input must contain one JSON server frame per line".to_string()),
            },
            AttnCliError::ConnectionLost => CliError {
                code: "CONNECTION_LOST".to_string(),
                message: "Connection to the backend failed".to_string(),
                hint: Some("Re-run with --retry to reconnect with backoff".to_string()),
            },
            AttnCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more checks failed".to_string(),
                hint: Some("Fix the errors reported above".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum OutputEvent<'a> {
    Sample(&'a TimelineChanged),
    Level(&'a LevelChanged),
    Alert(&'a AlertEvent),
    Summary(&'a ReplayReport),
}

#[derive(Serialize, Default)]
struct ReplayReport {
    frames: usize,
    dropped: usize,
    sent: Vec<String>,
    low_set: Vec<SubjectId>,
    levels: Vec<(String, String)>,
    timeline: Vec<String>,
}

#[derive(Serialize)]
struct DoctorReport {
    client: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
