//! fdrive: encrypted file sharing CLI
//!
//! Owner commands:
//!   upload <path>                   - encrypt, store, print the share link
//!   link <id>                       - print the share link (key in the fragment)
//!   download <id> [--out PATH]      - owner download, ignores share state
//!   settings <id> -p P -e E         - set permission + expiry (re-activates revoked links)
//!   revoke <id>                     - toggle revocation
//!   status <id>                     - show share state
//!   config show                     - display current configuration
//!
//! Link holder commands:
//!   open <link-or-id> [--out PATH]  - gated fetch + decrypt

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use fdrive_core::access::AccessAction;
use fdrive_core::config::{expand_tilde, FdriveConfig};
use fdrive_core::types::{file_type_label, format_file_size};
use fdrive_core::{ExpiryOption, FdriveError, SharePermission, ShareRecord};
use fdrive_crypto::FileKey;
use fdrive_secrets::{parse_share_link, prompt_for_key, KeyCustody};
use fdrive_share::engine::{self, sanitize_file_name, OpenRequest, OpenedFile, ProgressFn, ShareContext};
use fdrive_storage::{build_from_config, check_health, S3Credentials};

/// Key prompts before giving up on a file
const MAX_KEY_ATTEMPTS: usize = 3;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "fdrive",
    version,
    about = "Encrypted file sharing client",
    long_about = "fdrive: encrypt files client-side, share them by link, and control who can open them"
)]
struct Cli {
    /// Path to fdrive.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "FDRIVE_CONFIG",
        default_value = "~/.config/fdrive/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides logging.level
    #[arg(long, env = "FDRIVE_LOG")]
    log: Option<String>,

    /// Log format; overrides logging.format
    #[arg(long, env = "FDRIVE_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt and upload a file, then print its share link
    Upload {
        /// Local file
        path: PathBuf,
        /// Owner id used in the storage path
        #[arg(long, env = "FDRIVE_OWNER", default_value = "anonymous")]
        owner: String,
        /// MIME type (default: guessed from the extension)
        #[arg(long = "type")]
        mime_type: Option<String>,
    },

    /// Print the share link for a file you own
    Link {
        file_id: String,
        /// Fail instead of prompting when the key is not cached
        #[arg(long)]
        no_prompt: bool,
    },

    /// Open a shared file from its link (or id)
    Open {
        /// Share link, `/share/<id>` path, or bare file id
        link: String,
        /// Output path, `-` for stdout (default: the file's name in the current directory)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
        /// Request download permission instead of view
        #[arg(long)]
        download: bool,
        /// Fail instead of prompting for a key
        #[arg(long)]
        no_prompt: bool,
    },

    /// Download a file you own, regardless of its share state
    Download {
        file_id: String,
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
        #[arg(long)]
        no_prompt: bool,
    },

    /// Set permission and expiry; also re-activates a revoked link
    Settings {
        file_id: String,
        /// view, download or view_download
        #[arg(long, short = 'p')]
        permission: SharePermission,
        /// 24h, 7d or never
        #[arg(long, short = 'e')]
        expiry: ExpiryOption,
    },

    /// Toggle revocation of a share link
    Revoke { file_id: String },

    /// Show the share state of a file
    Status { file_id: String },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        match e.chain().find_map(|cause| cause.downcast_ref::<FdriveError>()) {
            Some(fdrive_err) => {
                debug!("command failed: {e:#}");
                eprintln!("error: {}", fdrive_err.user_message());
            }
            None => eprintln!("error: {e:#}"),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = expand_tilde(&cli.config);
    let (mut config, found) = load_config(&config_path).await?;

    let level = cli.log.clone().unwrap_or_else(|| config.logging.level.clone());
    let format = cli.log_format.clone().unwrap_or_else(|| {
        if config.logging.format.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    });
    init_logging(&level, &format);

    if !found {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            config_path.display()
        );
    }
    if let Ok(base_url) = std::env::var("FDRIVE_BASE_URL") {
        if !base_url.trim().is_empty() {
            config.share.base_url = base_url;
        }
    }

    match cli.command {
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &config_path).await,
        Commands::Upload { path, owner, mime_type } => {
            cmd_upload(&config, &path, &owner, mime_type.as_deref()).await
        }
        Commands::Link { file_id, no_prompt } => cmd_link(&config, &file_id, no_prompt).await,
        Commands::Open { link, out, download, no_prompt } => {
            cmd_open(&config, &link, out.as_deref(), download, no_prompt).await
        }
        Commands::Download { file_id, out, no_prompt } => {
            cmd_download(&config, &file_id, out.as_deref(), no_prompt).await
        }
        Commands::Settings { file_id, permission, expiry } => {
            cmd_settings(&config, &file_id, permission, expiry).await
        }
        Commands::Revoke { file_id } => cmd_revoke(&config, &file_id).await,
        Commands::Status { file_id } => cmd_status(&config, &file_id).await,
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so `open --out -` can stream plaintext on stdout
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<(FdriveConfig, bool)> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((FdriveConfig::default(), false))
    }
}

/// Stores from `[storage]`, S3 credentials from the environment, and this
/// device's key cache.
fn build_context(config: &FdriveConfig) -> Result<ShareContext> {
    let creds = S3Credentials::from_env();
    let op = build_from_config(&config.storage, creds.as_ref()).context("building storage operator")?;
    let custody = KeyCustody::from_config(&config.keys);
    debug!(backend = %config.storage.backend, custody = ?custody, "share context ready");
    Ok(ShareContext::from_operator(op, custody, config))
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
        .map(|s| s.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── `fdrive upload` ───────────────────────────────────────────────────────────

async fn cmd_upload(config: &FdriveConfig, path: &Path, owner: &str, mime_type: Option<&str>) -> Result<()> {
    if !path.is_file() {
        anyhow::bail!("not a file: {}", path.display());
    }
    let ctx = build_context(config)?;

    let pb = make_progress_bar(0, "upload");
    pb.set_message(path.display().to_string());
    let pb_clone = pb.clone();
    let progress: ProgressFn = Box::new(move |done, total, msg| {
        pb_clone.set_length(total);
        pb_clone.set_position(done);
        pb_clone.set_message(msg.to_string());
    });

    let result = engine::upload_path(&ctx, owner, path, mime_type, Some(&progress))
        .await
        .with_context(|| format!("uploading {}", path.display()))?;
    pb.finish_with_message("done".to_string());

    let record = &result.record;
    println!("  id:        {}", record.id);
    println!("  name:      {}", record.display_name());
    println!("  size:      {}", format_file_size(record.display_size()));
    println!("  algorithm: {}", result.algorithm);
    println!("  link:      {}", result.link);
    println!();
    println!("Anyone holding the link can decrypt the file while it is shared.");
    Ok(())
}

// ── `fdrive link` ─────────────────────────────────────────────────────────────

async fn cmd_link(config: &FdriveConfig, file_id: &str, no_prompt: bool) -> Result<()> {
    let ctx = build_context(config)?;
    let link = match engine::share_link(&ctx, file_id, None).await {
        Err(FdriveError::KeyUnavailable(_)) if !no_prompt => {
            let key = prompt_for_key("Enter the decryption key for this file: ")?
                .ok_or_else(|| FdriveError::KeyUnavailable(file_id.to_string()))?;
            engine::share_link(&ctx, file_id, Some(&key)).await?
        }
        other => other?,
    };
    println!("{link}");
    Ok(())
}

// ── `fdrive open` ─────────────────────────────────────────────────────────────

async fn cmd_open(
    config: &FdriveConfig,
    link: &str,
    out: Option<&Path>,
    download: bool,
    no_prompt: bool,
) -> Result<()> {
    let parsed = parse_share_link(link)
        .ok_or_else(|| FdriveError::MalformedInput(format!("not a share link or file id: {link}")))?;
    let ctx = build_context(config)?;
    let action = if download {
        AccessAction::Download
    } else {
        AccessAction::View
    };
    let fragment = link.split_once('#').map(|(_, f)| f);

    let pb = make_spinner("open");
    pb.set_message(parsed.file_id.clone());

    let mut manual: Option<FileKey> = None;
    let mut attempts = 0;
    let opened = loop {
        let req = OpenRequest {
            file_id: &parsed.file_id,
            // A key that already failed is not retried from the link
            fragment: if attempts == 0 { fragment } else { None },
            manual_key: manual.as_ref(),
            action,
        };
        match engine::open_shared(&ctx, req).await {
            Ok(opened) => break opened,
            Err(e) if e.needs_key_prompt() && !no_prompt && attempts < MAX_KEY_ATTEMPTS => {
                pb.suspend(|| eprintln!("{}", e.user_message()));
                attempts += 1;
                manual = pb.suspend(|| prompt_for_key("Decryption key: "))?;
                if manual.is_none() {
                    return Err(FdriveError::KeyUnavailable(parsed.file_id.clone()).into());
                }
            }
            Err(e) => {
                pb.finish_and_clear();
                return Err(e.into());
            }
        }
    };
    pb.finish_and_clear();

    info!(id = %parsed.file_id, "opened shared file");
    write_opened(&opened, out)
}

// ── `fdrive download` ─────────────────────────────────────────────────────────

async fn cmd_download(config: &FdriveConfig, file_id: &str, out: Option<&Path>, no_prompt: bool) -> Result<()> {
    let ctx = build_context(config)?;
    let opened = match engine::download_owned(&ctx, file_id, None).await {
        Err(FdriveError::KeyUnavailable(_)) if !no_prompt => {
            let key = prompt_for_key("Enter the decryption key for this file: ")?
                .ok_or_else(|| FdriveError::KeyUnavailable(file_id.to_string()))?;
            engine::download_owned(&ctx, file_id, Some(&key)).await?
        }
        other => other?,
    };
    write_opened(&opened, out)
}

fn write_opened(opened: &OpenedFile, out: Option<&Path>) -> Result<()> {
    let bytes = &opened.file.bytes;
    match out {
        Some(p) if p == Path::new("-") => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(bytes).context("writing to stdout")?;
            stdout.flush().context("flushing stdout")?;
        }
        _ => {
            let dest = out
                .map(Path::to_path_buf)
                .unwrap_or_else(|| default_output_path(&opened.record));
            write_atomic(&dest, bytes)?;
            println!(
                "  wrote {} ({}, {})",
                dest.display(),
                format_file_size(bytes.len() as u64),
                opened.file.mime_type
            );
            if let Some(source) = opened.key_source {
                println!("  key from {source}");
            }
        }
    }
    Ok(())
}

/// The record's display name made safe as a file name in the current directory.
fn default_output_path(record: &ShareRecord) -> PathBuf {
    let name = sanitize_file_name(record.display_name());
    if name.trim_matches('.').is_empty() {
        PathBuf::from(sanitize_file_name(&record.id))
    } else {
        PathBuf::from(name)
    }
}

/// Write to a temp sibling and rename, so a failed write leaves no partial file.
fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory: {}", parent.display()))?;
    }
    let tmp = dest.with_extension("fdrive_tmp");
    std::fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, dest).with_context(|| format!("renaming to {}", dest.display()))?;
    Ok(())
}

// ── Owner mutations ───────────────────────────────────────────────────────────

async fn cmd_settings(
    config: &FdriveConfig,
    file_id: &str,
    permission: SharePermission,
    expiry: ExpiryOption,
) -> Result<()> {
    let ctx = build_context(config)?;
    let record = engine::update_settings(&ctx, file_id, permission, expiry).await?;
    println!("Updated share settings for {}", record.display_name());
    println!("  permission: {}", record.share_permission);
    println!("  expiry:     {expiry}");
    println!("  revoked:    {}", record.is_revoked);
    Ok(())
}

async fn cmd_revoke(config: &FdriveConfig, file_id: &str) -> Result<()> {
    let ctx = build_context(config)?;
    let record = engine::toggle_revoke(&ctx, file_id).await?;
    if record.is_revoked {
        println!("Share link revoked for {}", record.display_name());
    } else {
        println!("Share link restored for {}", record.display_name());
    }
    Ok(())
}

// ── `fdrive status` ───────────────────────────────────────────────────────────

async fn cmd_status(config: &FdriveConfig, file_id: &str) -> Result<()> {
    let ctx = build_context(config)?;
    let report = engine::share_status(&ctx, file_id).await?;
    let record = &report.record;

    println!("fdrive share status");
    println!("  id:           {}", record.id);
    println!("  name:         {}", record.display_name());
    println!(
        "  type:         {} ({})",
        record.display_type(),
        file_type_label(record.display_type())
    );
    println!("  size:         {}", format_file_size(record.display_size()));
    println!("  status:       {}", report.status);
    println!("  permission:   {}", record.share_permission);
    match record.expires_at {
        Some(t) => println!("  expires at:   {t} ms ({})", report.expiry_option),
        None => println!("  expires at:   never"),
    }
    println!("  can view:     {}", report.can_view);
    println!("  can download: {}", report.can_download);
    println!("  encrypted:    {}", record.is_encrypted);
    if record.is_encrypted {
        println!(
            "  algorithm:    {}",
            record.algorithm.as_deref().unwrap_or(fdrive_crypto::cipher::AES_GCM)
        );
        println!("  key cached:   {}", report.key_cached);
    }
    Ok(())
}

// ── `fdrive config show` ──────────────────────────────────────────────────────

async fn cmd_config_show(config: &FdriveConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");

    let creds = S3Credentials::from_env();
    match build_from_config(&config.storage, creds.as_ref()) {
        Ok(op) => match check_health(&op).await {
            Ok(()) => println!("\n# storage: reachable ({})", config.storage.backend),
            Err(e) => println!("\n# storage: unreachable: {e}"),
        },
        Err(e) => println!("\n# storage: not configured: {e:#}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_args_parse() {
        let cli = Cli::try_parse_from(["fdrive", "settings", "abc", "-p", "view", "-e", "7d"]).unwrap();
        match cli.command {
            Commands::Settings { file_id, permission, expiry } => {
                assert_eq!(file_id, "abc");
                assert_eq!(permission, SharePermission::View);
                assert_eq!(expiry, ExpiryOption::Days7);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_settings_rejects_unknown_permission() {
        assert!(Cli::try_parse_from(["fdrive", "settings", "abc", "-p", "edit", "-e", "never"]).is_err());
    }

    #[test]
    fn test_default_output_path_is_local() {
        let record = ShareRecord {
            id: "abc123".into(),
            original_file_name: Some("../../etc/passwd".into()),
            ..Default::default()
        };
        assert_eq!(default_output_path(&record), PathBuf::from(".._.._etc_passwd"));

        let dots = ShareRecord {
            id: "abc123".into(),
            original_file_name: Some("..".into()),
            ..Default::default()
        };
        assert_eq!(default_output_path(&dots), PathBuf::from("abc123"));
    }

    #[test]
    fn test_write_atomic_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("out.txt");
        write_atomic(&dest, b"hello").unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
        assert!(!dest.with_extension("fdrive_tmp").exists());
    }
}
