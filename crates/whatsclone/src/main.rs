use std::env;
use std::fmt;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use config::{Config, Environment, File, FileFormat};

use log::{LevelFilter, debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use whatsclone::api::{self, AppState};
use whatsclone::bridge::{ProcessConnector, ProcessConnectorConfig, ProtocolConnector};
use whatsclone::db::Database;
use whatsclone::relay::{Relay, ResyncReport, run_command_inbox};
use whatsclone::remote::{FirebaseChannel, MemoryChannel, RemoteChannel, SyncChannel};
use whatsclone::store::LocalStore;
use whatsclone::supervisor::{ReconnectPolicy, StatusBoard, Supervisor};

const APP_NAME: &str = "whatsclone";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_main(ctx: RuntimeContext, cmd: ServeCommand) -> Result<()> {
    handle_serve(&ctx, cmd).await
}

#[tokio::main]
async fn async_resync(ctx: RuntimeContext) -> Result<()> {
    handle_resync(&ctx).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved paths: {}", ctx.paths);

    match cli.command {
        Command::Serve(cmd) => async_main(ctx, cmd),
        Command::Resync => async_resync(ctx),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "WhatsApp to realtime-database message relay.",
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
    #[arg(long, value_name = "PATH", global = true)]
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
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Do not change anything on disk
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,
    /// Emit additional diagnostics for troubleshooting
    #[arg(long = "diagnostics", global = true)]
    diagnostics: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the relay and its status API
    Serve(ServeCommand),
    /// Mirror the whole local history to the remote store and exit
    Resync,
    /// Create config directories and default files
    Init(InitCommand),
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

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to (defaults to server.host)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (defaults to server.port)
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Regenerate the default configuration file
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
        let mut paths = AppPaths::discover(common.config.clone())?;
        let config = load_or_init_config(&mut paths, &common)?;
        let paths = paths.apply_overrides(&config)?;
        let ctx = Self {
            common,
            paths,
            config,
        };
        ctx.ensure_directories()?;
        Ok(ctx)
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "whatsclone={level},whatsclone_protocol={level},tower_http={level}"
            ))
        });

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(!disable_color)
                        .with_target(self.common.diagnostics)
                        .with_file(self.common.diagnostics)
                        .with_line_number(self.common.diagnostics),
                )
                .try_init()
                .ok();
        }

        // Also init env_logger for compatibility with log crate users
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        builder.filter_level(self.effective_log_level());
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

    fn ensure_directories(&self) -> Result<()> {
        if self.common.dry_run {
            info!(
                "dry-run: would ensure data dir {} and state dir {}",
                self.paths.data_dir.display(),
                self.paths.state_dir.display()
            );
            return Ok(());
        }

        fs::create_dir_all(&self.paths.data_dir).with_context(|| {
            format!("creating data directory {}", self.paths.data_dir.display())
        })?;
        fs::create_dir_all(&self.paths.state_dir).with_context(|| {
            format!(
                "creating state directory {}",
                self.paths.state_dir.display()
            )
        })?;
        Ok(())
    }

    fn database_path(&self) -> Result<PathBuf> {
        match &self.config.database.path {
            Some(path) => expand_str_path(path),
            None => Ok(self.paths.data_dir.join("whatsapp_local.db")),
        }
    }

    fn auth_dir(&self) -> Result<PathBuf> {
        match &self.config.bridge.auth_dir {
            Some(path) => expand_str_path(path),
            None => Ok(self.paths.state_dir.join("auth_info")),
        }
    }
}

#[derive(Debug, Clone)]
struct AppPaths {
    config_file: PathBuf,
    data_dir: PathBuf,
    state_dir: PathBuf,
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

        let data_dir = default_data_dir()?;
        let state_dir = default_state_dir()?;

        Ok(Self {
            config_file,
            data_dir,
            state_dir,
        })
    }

    fn apply_overrides(mut self, cfg: &AppConfig) -> Result<Self> {
        if let Some(ref data_override) = cfg.paths.data_dir {
            self.data_dir = expand_str_path(data_override)?;
        }
        if let Some(ref state_override) = cfg.paths.state_dir {
            self.state_dir = expand_str_path(state_override)?;
        }
        Ok(self)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
struct AppConfig {
    logging: LoggingConfig,
    paths: PathsConfig,
    server: ServerConfig,
    database: DatabaseConfig,
    remote: RemoteConfig,
    bridge: BridgeConfig,
    reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct LoggingConfig {
    level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
struct PathsConfig {
    data_dir: Option<String>,
    state_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct ServerConfig {
    host: String,
    port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
struct DatabaseConfig {
    /// SQLite file; defaults to `<data_dir>/whatsapp_local.db`.
    path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RemoteBackend {
    /// Realtime Database over its REST API.
    Firebase,
    /// In-process tree, nothing leaves the relay.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct RemoteConfig {
    backend: RemoteBackend,
    /// Database root URL.
    url: String,
    /// Database secret or ID token.
    auth_token: Option<String>,
    request_timeout_secs: u64,
    /// Pause before re-subscribing to the command inbox after a stream failure.
    resubscribe_delay_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: RemoteBackend::Firebase,
            url: String::new(),
            auth_token: None,
            request_timeout_secs: 30,
            resubscribe_delay_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct BridgeConfig {
    /// Protocol bridge executable.
    command: String,
    args: Vec<String>,
    /// Credential directory; defaults to `<state_dir>/auth_info`.
    auth_dir: Option<String>,
    request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: "whatsapp-bridge".to_string(),
            args: Vec::new(),
            auth_dir: None,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct ReconnectConfig {
    delay_secs: u64,
    /// Consecutive failed connections before giving up; unset retries forever.
    max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_secs: 5,
            max_attempts: None,
        }
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(cfg: &ReconnectConfig) -> Self {
        Self {
            delay: Duration::from_secs(cfg.delay_secs),
            max_attempts: cfg.max_attempts,
        }
    }
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.paths.config_file.exists() && !cmd.force {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.paths.config_file.display()
        ));
    }

    if ctx.common.dry_run {
        info!(
            "dry-run: would write default config to {}",
            ctx.paths.config_file.display()
        );
        return Ok(());
    }

    write_default_config(&ctx.paths.config_file)
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
                println!("{:#?}", ctx.config);
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                info!(
                    "dry-run: would reset config at {}",
                    ctx.paths.config_file.display()
                );
                return Ok(());
            }
            write_default_config(&ctx.paths.config_file)
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

async fn open_store(ctx: &RuntimeContext) -> Result<LocalStore> {
    let db_path = ctx.database_path()?;
    info!("Database path: {}", db_path.display());
    let database = Database::new(&db_path).await?;
    Ok(LocalStore::new(database))
}

fn build_remote(cfg: &RemoteConfig) -> Result<Arc<dyn RemoteChannel>> {
    match cfg.backend {
        RemoteBackend::Firebase => {
            if cfg.url.trim().is_empty() {
                bail!("remote.url must be set for the firebase backend");
            }
            info!("Remote backend: firebase at {}", cfg.url);
            let channel = FirebaseChannel::new(
                cfg.url.clone(),
                cfg.auth_token.clone(),
                Duration::from_secs(cfg.request_timeout_secs),
            )
            .context("creating remote client")?;
            Ok(Arc::new(channel))
        }
        RemoteBackend::Memory => {
            warn!("Remote backend: in-memory, nothing is mirrored outside this process");
            Ok(Arc::new(MemoryChannel::new()))
        }
    }
}

async fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    info!("Starting WhatsApp relay...");

    let store = open_store(ctx).await?;
    let sync = SyncChannel::new(build_remote(&ctx.config.remote)?);
    let relay = Arc::new(Relay::new(store.clone(), sync));
    let board = StatusBoard::new();

    let auth_dir = ctx.auth_dir()?;
    info!("Bridge credentials: {}", auth_dir.display());
    let connector: Arc<dyn ProtocolConnector> =
        Arc::new(ProcessConnector::new(ProcessConnectorConfig {
            command: ctx.config.bridge.command.clone(),
            args: ctx.config.bridge.args.clone(),
            auth_dir,
            request_timeout: Duration::from_secs(ctx.config.bridge.request_timeout_secs),
        }));

    let cancel = CancellationToken::new();

    let inbox_task = tokio::spawn(run_command_inbox(
        Arc::clone(&relay),
        cancel.clone(),
        Duration::from_secs(ctx.config.remote.resubscribe_delay_secs),
    ));

    let supervisor = Supervisor::new(
        Arc::clone(&relay),
        connector,
        board.clone(),
        ReconnectPolicy::from(&ctx.config.reconnect),
    );
    let supervisor_task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let exit = supervisor.run(cancel).await;
            info!("Connection supervisor stopped: {:?}", exit);
        }
    });

    let app = api::create_router(AppState::new(store.clone(), board));

    let host = cmd.host.unwrap_or_else(|| ctx.config.server.host.clone());
    let port = cmd.port.unwrap_or(ctx.config.server.port);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("invalid address")?;

    info!("Listening on http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .context("binding to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .context("running server")?;

    cancel.cancel();
    if let Err(e) = supervisor_task.await {
        warn!("Supervisor task failed: {}", e);
    }
    if let Err(e) = inbox_task.await {
        warn!("Command inbox task failed: {}", e);
    }
    store.database().close().await;

    info!("Shutdown complete");
    Ok(())
}

/// Resolve once a termination signal arrives, then cancel `cancel`.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
        _ = cancel.cancelled() => {},
    }

    info!("Shutdown signal received, closing connection...");
    cancel.cancel();
}

async fn handle_resync(ctx: &RuntimeContext) -> Result<()> {
    let store = open_store(ctx).await?;
    let sync = SyncChannel::new(build_remote(&ctx.config.remote)?);
    let relay = Relay::new(store.clone(), sync);

    let report = relay.resync_all().await.context("resyncing history")?;
    store.database().close().await;

    print_report(ctx, &report)
}

fn print_report(ctx: &RuntimeContext, report: &ResyncReport) -> Result<()> {
    let output = if ctx.common.json {
        serde_json::to_string_pretty(report).context("serializing report to JSON")?
    } else if ctx.common.yaml {
        serde_yaml::to_string(report).context("serializing report to YAML")?
    } else {
        format!(
            "Resynced {} conversations and {} messages ({} newly mirrored)",
            report.conversations, report.messages, report.pushed
        )
    };
    println!("{output}");
    Ok(())
}

fn load_or_init_config(paths: &mut AppPaths, common: &CommonOpts) -> Result<AppConfig> {
    if !paths.config_file.exists() {
        if common.dry_run {
            info!(
                "dry-run: would create default config at {}",
                paths.config_file.display()
            );
        } else {
            write_default_config(&paths.config_file)?;
        }
    }

    let env_prefix = env_prefix();
    let built = Config::builder()
        .set_default("logging.level", "info")?
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 3001_i64)?
        .set_default("remote.backend", "firebase")?
        .add_source(
            File::from(paths.config_file.as_path())
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(env_prefix.as_str()).separator("__"))
        .build()?;

    let config: AppConfig = built.try_deserialize()?;
    Ok(config)
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    let mut buffer = String::new();
    buffer.push_str("# Configuration for ");
    buffer.push_str(APP_NAME);
    buffer.push('\n');
    buffer.push_str("# File: ");
    buffer.push_str(&path.display().to_string());
    buffer.push('\n');
    buffer.push_str("# Set remote.url to your Realtime Database URL before running `serve`.\n");
    buffer.push('\n');
    buffer
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        let mut path = PathBuf::from(dir);
        path.push(APP_NAME);
        return Ok(path);
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn default_data_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::data_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("share").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine data directory"))
}

fn default_state_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_STATE_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::state_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("state").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine state directory"))
}

fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

impl fmt::Display for AppPaths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "config: {}, data: {}, state: {}",
            self.config_file.display(),
            self.data_dir.display(),
            self.state_dir.display()
        )
    }
}
