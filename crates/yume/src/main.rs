use std::env;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use log::{LevelFilter, debug, error, info, warn};
use tokio::sync::broadcast::error::RecvError;

use yume::StreamCore;
use yume::config::AppConfig;
use yume::context::MemoryContextStore;
use yume::events::{AppEvent, BroadcastSink, LogSink};
use yume::ingest::IngestStatus;
use yume::session::SessionKind;

const APP_NAME: &str = "yume";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_serve(ctx: RuntimeContext, cmd: ServeCommand) -> Result<()> {
    handle_serve(&ctx, cmd).await
}

#[tokio::main]
async fn async_chat(ctx: RuntimeContext, cmd: ChatCommand) -> Result<()> {
    handle_chat(&ctx, cmd).await
}

#[tokio::main]
async fn async_status(ctx: RuntimeContext, cmd: StatusCommand) -> Result<()> {
    handle_status(&ctx, cmd).await
}

#[tokio::main]
async fn async_health(ctx: RuntimeContext) -> Result<()> {
    handle_health(&ctx).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("config file: {}", ctx.paths.config_file.display());

    match cli.command {
        Command::Serve(cmd) => async_serve(ctx, cmd),
        Command::Chat(cmd) => async_chat(ctx, cmd),
        Command::Status(cmd) => async_status(ctx, cmd),
        Command::Health => async_health(ctx),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Yume - streaming connection core for the meeting assistant.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true, env = "YUME_CONFIG")]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true, conflicts_with = "yaml")]
    json: bool,
    /// Output machine readable YAML
    #[arg(long, global = true)]
    yaml: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true)]
    no_color: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the ingestion server and keep both backend sessions open
    Serve(ServeCommand),
    /// Send one message and stream the reply to stdout
    Chat(ChatCommand),
    /// Query a running server's ingestion status
    Status(StatusCommand),
    /// Probe the inference backend's health endpoint
    Health,
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Args)]
struct ServeCommand {
    /// Override the ingestion port
    #[arg(long)]
    port: Option<u16>,
    /// Only run the ingestion server
    #[arg(long)]
    no_sessions: bool,
}

#[derive(Debug, Args)]
struct ChatCommand {
    /// Message to send
    message: String,
    /// System prompt for the chat stream
    #[arg(long, default_value = yume::app::DEFAULT_SYSTEM_PROMPT)]
    system_prompt: String,
    /// Send to the markdown agent instead of the chat stream
    #[arg(long)]
    markdown_agent: bool,
    /// Workspace whose meeting context is attached
    #[arg(long, default_value_t = 0)]
    workspace: u64,
    /// Give up waiting for the reply after this many seconds
    #[arg(long, default_value_t = 120)]
    timeout: u64,
}

#[derive(Debug, Args)]
struct StatusCommand {
    /// Status URL (defaults to the configured ingestion server)
    #[arg(long)]
    url: Option<String>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Overwrite the configuration file with defaults
    Reset,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let paths = AppPaths::discover(common.config.clone())?;
        let config = load_or_init_config(&paths)?;
        Ok(Self {
            common,
            paths,
            config,
        })
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = self.effective_log_level();
        let directive = level.as_str().to_ascii_lowercase();
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "yume={directive},yume_protocol={directive},tower_http={directive}"
            ))
        });

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .ok();
        } else {
            let disable_color = self.common.no_color
                || env::var_os("NO_COLOR").is_some()
                || !io::stderr().is_terminal();

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(!disable_color),
                )
                .try_init()
                .ok();
        }

        // Also init env_logger for compatibility with log crate users
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        builder.filter_level(level);
        builder.try_init().ok();

        Ok(())
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => self
                    .config
                    .logging
                    .level
                    .parse()
                    .unwrap_or(LevelFilter::Info),
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

#[derive(Debug, Clone)]
struct AppPaths {
    config_file: PathBuf,
}

impl AppPaths {
    fn discover(override_path: Option<PathBuf>) -> Result<Self> {
        let config_file = match override_path {
            Some(path) => {
                let expanded = expand_path(path)?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => default_config_dir()?.join("config.toml"),
        };

        if config_file.parent().is_none() {
            return Err(anyhow!("invalid config file path: {config_file:?}"));
        }

        Ok(Self { config_file })
    }
}

async fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    let mut config = ctx.config.clone();
    if let Some(port) = cmd.port {
        config.ingest.port = port;
    }
    let retry_delay = config.reconnect.delay();

    let sink = Arc::new(BroadcastSink::new());
    let mut events = sink.subscribe();
    let core = Arc::new(StreamCore::new(
        config,
        sink,
        Arc::new(MemoryContextStore::new()),
    )?);

    let addr = core
        .start_ingest()
        .await
        .context("starting transcription server")?;
    info!("Transcription server ready on {}", addr);

    let mut connectors = Vec::new();
    if !cmd.no_sessions {
        for kind in [SessionKind::Chat, SessionKind::MarkdownAgent] {
            let core = Arc::clone(&core);
            connectors.push(tokio::spawn(async move {
                connect_with_retry(&core, kind, retry_delay).await
            }));
        }
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut stdout = io::stdout();
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Ok(event) => {
                    let line = serde_json::to_string(&event.to_notification())
                        .context("serializing notification")?;
                    writeln!(stdout, "{line}").context("writing notification")?;
                    stdout.flush().ok();
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Notification output lagged; skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("Shutdown signal received");
    for connector in connectors {
        connector.abort();
    }
    core.shutdown().await;
    Ok(())
}

/// Keep retrying the first connection; once connected the session's own
/// supervisor takes over.
async fn connect_with_retry(core: &StreamCore, kind: SessionKind, delay: Duration) {
    loop {
        let result = match kind {
            SessionKind::Chat => core.connect_chat().await,
            SessionKind::MarkdownAgent => core.connect_markdown_agent().await,
        };
        match result {
            Ok(()) => return,
            Err(e) => {
                warn!("{} connection failed, retrying in {:?}: {}", kind, delay, e);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn handle_chat(ctx: &RuntimeContext, cmd: ChatCommand) -> Result<()> {
    let kind = if cmd.markdown_agent {
        SessionKind::MarkdownAgent
    } else {
        SessionKind::Chat
    };

    let sink = Arc::new(BroadcastSink::new());
    let mut events = sink.subscribe();
    let core = StreamCore::new(
        ctx.config.clone(),
        sink,
        Arc::new(MemoryContextStore::new()),
    )?;

    match kind {
        SessionKind::Chat => {
            core.connect_chat().await?;
            core.send_chat_message(cmd.workspace, &cmd.message, &cmd.system_prompt)
                .await?;
        }
        SessionKind::MarkdownAgent => {
            core.connect_markdown_agent().await?;
            core.send_markdown_agent_message(&cmd.message).await?;
        }
    }

    let streamed = tokio::time::timeout(
        Duration::from_secs(cmd.timeout),
        stream_reply(&mut events, kind, ctx.common.json),
    )
    .await;
    core.shutdown().await;

    match streamed {
        Ok(result) => result,
        Err(_) => bail!("no complete reply within {}s", cmd.timeout),
    }
}

async fn stream_reply(
    events: &mut tokio::sync::broadcast::Receiver<AppEvent>,
    kind: SessionKind,
    json: bool,
) -> Result<()> {
    let mut stdout = io::stdout();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Reply output lagged; skipped {} events", skipped);
                continue;
            }
            Err(RecvError::Closed) => bail!("event channel closed"),
        };
        if event.session_kind() != Some(kind) {
            continue;
        }

        if json {
            let line = serde_json::to_string(&event.to_notification())?;
            writeln!(stdout, "{line}")?;
        }

        match event {
            AppEvent::StreamChunk { token, .. } if !json => {
                write!(stdout, "{token}")?;
                stdout.flush().ok();
            }
            AppEvent::StreamDone { .. } => {
                if !json {
                    writeln!(stdout)?;
                }
                return Ok(());
            }
            AppEvent::StreamError { error, .. } => bail!("backend error: {error}"),
            AppEvent::SessionDisconnected { .. } => bail!("connection closed before the reply completed"),
            _ => {}
        }
    }
}

async fn handle_status(ctx: &RuntimeContext, cmd: StatusCommand) -> Result<()> {
    let url = cmd.url.unwrap_or_else(|| {
        format!(
            "http://{}:{}/status",
            ctx.config.ingest.public_host, ctx.config.ingest.port
        )
    });

    let response = reqwest::Client::new()
        .get(&url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .with_context(|| format!("querying {url}"))?
        .error_for_status()
        .with_context(|| format!("querying {url}"))?;
    let status: IngestStatus = response.json().await.context("parsing status response")?;

    if ctx.common.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else if ctx.common.yaml {
        println!("{}", serde_yaml::to_string(&status)?);
    } else {
        println!(
            "running: {}\nclients: {}\nendpoint: {}",
            status.running, status.clients, status.endpoint
        );
        if let Some(message) = status.message {
            println!("{message}");
        }
    }
    Ok(())
}

async fn handle_health(ctx: &RuntimeContext) -> Result<()> {
    let core = StreamCore::new(
        ctx.config.clone(),
        Arc::new(LogSink),
        Arc::new(MemoryContextStore::new()),
    )?;
    let health = core.health_check().await?;

    if ctx.common.json {
        println!("{}", serde_json::to_string_pretty(&health)?);
    } else {
        println!("{}: {}", health.status, health.message);
    }
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else if ctx.common.yaml {
                println!(
                    "{}",
                    serde_yaml::to_string(&ctx.config).context("serializing config to YAML")?
                );
            } else {
                println!("{}", ctx.config.to_toml()?);
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => write_default_config(&ctx.paths.config_file),
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

fn load_or_init_config(paths: &AppPaths) -> Result<AppConfig> {
    if !paths.config_file.exists() {
        write_default_config(&paths.config_file)?;
    }
    AppConfig::load(&paths.config_file, &env_prefix())
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let mut body = default_config_header(path);
    body.push_str(&AppConfig::default().to_toml()?);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    format!(
        "# Configuration for {}\n# File: {}\n\n",
        APP_NAME,
        path.display()
    )
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        let expanded = shellexpand::full(text).context("expanding path")?;
        Ok(PathBuf::from(expanded.to_string()))
    } else {
        Ok(path)
    }
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn env_prefix() -> String {
    APP_NAME.to_ascii_uppercase()
}
