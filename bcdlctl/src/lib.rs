use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use bcdl_core::{
    load_config, Album, BcdlConfig, BrowserError, BrowserHandle, BrowserLauncher,
    BrowserSessionFactory, CatalogScanner, ConfigError, DownloadError, DownloadFlow,
    DownloadRequest, LaunchOverrides, MailError, PageSessionFactory, ScanError, ScanOutcome,
    ScanReport, TempMailClient, VerificationMailbox,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("download error: {0}")]
    Download(#[from] DownloadError),
    #[error("mail error: {0}")]
    Mail(#[from] MailError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("one or more checks failed")]
    CheckFailed,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Free digital album fetcher for Bandcamp-style stores", long_about = None)]
pub struct Cli {
    /// Path to the bcdl.toml configuration file
    #[arg(long, default_value = "configs/bcdl.toml")]
    pub config: PathBuf,
    /// Run the browser with a visible window
    #[arg(long, default_value_t = false)]
    pub headful: bool,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan an artist's catalog page and classify every release
    Scan(ScanArgs),
    /// Walk the checkout for one release and save the file
    Download(DownloadArgs),
    /// Run environment checks
    Check,
    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Artist catalog URL (the /music page)
    pub url: String,
    /// Stop after this many albums
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Album or track page URL
    pub url: String,
    /// Directory to save the file into
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// Encoding to request on the download page
    #[arg(long, default_value = "mp3-320")]
    pub audio_format: String,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to emit completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

pub async fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions(args) = &cli.command {
        emit_completions(args.shell);
        return Ok(());
    }

    let config = load_or_default(&cli.config)?;
    match &cli.command {
        Commands::Scan(args) => run_scan(&cli, &config, args).await,
        Commands::Download(args) => run_download(&cli, &config, args).await,
        Commands::Check => run_check(&cli, &config),
        Commands::Completions(_) => Ok(()),
    }
}

/// A missing config file is not an error; everything has a default.
fn load_or_default(path: &Path) -> Result<BcdlConfig> {
    if path.exists() {
        Ok(load_config(path)?)
    } else {
        warn!(path = %path.display(), "config file not found, using defaults");
        Ok(BcdlConfig::default())
    }
}

async fn launch_browser(cli: &Cli, config: &BcdlConfig) -> Result<Arc<BrowserHandle>> {
    let launcher = BrowserLauncher::new(config.chromium.clone(), config.session.clone());
    let overrides = LaunchOverrides {
        headless: cli.headful.then_some(false),
    };
    let handle = launcher.launch_with_overrides(overrides).await?;
    Ok(Arc::new(handle))
}

async fn shutdown_browser(handle: Arc<BrowserHandle>) {
    match Arc::try_unwrap(handle) {
        Ok(handle) => {
            if let Err(err) = handle.shutdown().await {
                warn!(error = %err, "browser shutdown failed");
            }
        }
        Err(_) => warn!("browser handle still shared, skipping shutdown"),
    }
}

async fn run_scan(cli: &Cli, config: &BcdlConfig, args: &ScanArgs) -> Result<()> {
    let handle = launch_browser(cli, config).await?;
    let factory: Arc<dyn PageSessionFactory> =
        Arc::new(BrowserSessionFactory::new(Arc::clone(&handle)));
    let scanner = CatalogScanner::new(config.scan.clone(), config.selectors.clone(), factory);

    let result = scan_catalog(&scanner, cli, args).await;
    drop(scanner);
    shutdown_browser(handle).await;

    let report = result?;
    match cli.format {
        OutputFormat::Text => match report.outcome {
            ScanOutcome::Completed => {
                println!("Scan complete: {} albums", report.albums.len());
            }
            ScanOutcome::Cancelled => {
                println!("Scan stopped after {} albums", report.albums.len());
            }
        },
        OutputFormat::Json => {
            let summary = serde_json::json!({
                "outcome": report.outcome,
                "albums": report.albums.len(),
            });
            println!("{summary}");
        }
    }
    Ok(())
}

async fn scan_catalog(scanner: &CatalogScanner, cli: &Cli, args: &ScanArgs) -> Result<ScanReport> {
    let scan = scanner.begin_scan()?;

    let interrupt = scan.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current album");
            interrupt.cancel();
        }
    });

    let limiter = scan.canceller();
    let format = cli.format;
    let mut seen = 0usize;
    let report = scanner
        .run(&scan, &args.url, |album| {
            seen += 1;
            print_album(album, format);
            if let Some(limit) = args.limit {
                if seen >= limit {
                    limiter.cancel();
                }
            }
        })
        .await?;
    Ok(report)
}

fn print_album(album: &Album, format: OutputFormat) {
    match format {
        OutputFormat::Text => {
            println!(
                "[{}] {} by {} ({})",
                album.status, album.title, album.artist, album.url
            );
        }
        OutputFormat::Json => {
            if let Ok(line) = serde_json::to_string(album) {
                println!("{line}");
            }
        }
    }
}

async fn run_download(cli: &Cli, config: &BcdlConfig, args: &DownloadArgs) -> Result<()> {
    let mailbox: Arc<dyn VerificationMailbox> =
        Arc::new(TempMailClient::new(config.mail.clone())?);

    let handle = launch_browser(cli, config).await?;
    let factory: Arc<dyn PageSessionFactory> =
        Arc::new(BrowserSessionFactory::new(Arc::clone(&handle)));
    let flow = DownloadFlow::new(
        config.download.clone(),
        config.mail.clone(),
        config.selectors.clone(),
        factory,
        mailbox,
    );

    let request = DownloadRequest {
        url: args.url.clone(),
        dir: args.dir.clone().unwrap_or_else(|| PathBuf::from("downloads")),
        format: args.audio_format.clone(),
    };

    let quiet = matches!(cli.format, OutputFormat::Json);
    let mut progress = |line: &str| {
        if !quiet {
            println!("{line}");
        }
    };
    let result = flow.run(&request, &mut progress).await;
    drop(flow);
    shutdown_browser(handle).await;

    let path = result?;
    if quiet {
        println!("{}", serde_json::json!({ "saved": path }));
    }
    Ok(())
}

fn run_check(cli: &Cli, config: &BcdlConfig) -> Result<()> {
    let entries = environment_checks(&cli.config, config);
    render(&entries, cli.format)?;
    if entries
        .iter()
        .any(|entry| matches!(entry.status, CheckStatus::Error))
    {
        return Err(AppError::CheckFailed);
    }
    Ok(())
}

fn environment_checks(config_path: &Path, config: &BcdlConfig) -> Vec<CheckEntry> {
    let mut results = Vec::new();

    results.push(if config_path.exists() {
        CheckEntry::ok("config", config_path.display().to_string())
    } else {
        CheckEntry::warn(
            "config",
            format!("{} not found, defaults in use", config_path.display()),
        )
    });

    results.push(match &config.chromium.executable_path {
        Some(path) if Path::new(path).exists() => CheckEntry::ok("chromium", path.clone()),
        Some(path) => CheckEntry::error("chromium", format!("{path} missing")),
        None => CheckEntry::ok("chromium", "using system default".to_string()),
    });

    results.push(if config.mail.base_url.starts_with("http") {
        CheckEntry::ok("mail", config.mail.base_url.clone())
    } else {
        CheckEntry::error(
            "mail",
            format!("base_url does not look like a URL: {}", config.mail.base_url),
        )
    });

    results.push(if config.download.fallback_format.is_empty() {
        CheckEntry::error("format", "fallback_format is empty".to_string())
    } else {
        CheckEntry::ok("format", config.download.fallback_format.clone())
    });

    results
}

fn emit_completions(shell: clap_complete::Shell) {
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    clap_complete::generate(shell, &mut command, name, &mut std::io::stdout());
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
pub struct CheckEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl CheckEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<CheckEntry> {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        for entry in self {
            lines.push(format!(
                "[{status}] {name}: {detail}",
                status = entry.status,
                name = entry.name,
                detail = entry.detail
            ));
        }
        lines.join("\n")
    }
}
