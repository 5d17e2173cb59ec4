use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

mod api;
mod config;
mod crawler;
mod errors;
mod logging;
mod models;
mod output;

use crate::config::settings::{mask_secret, Settings, SinkKind};

#[derive(Parser)]
#[command(name = "redmine-crawler")]
#[command(version)]
#[command(about = "Forward updated Redmine issues to the console or a chat room", long_about = None)]
struct Cli {
    /// for debugging purposes
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.redmine-crawler/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll Redmine and deliver updated issues until stopped
    Crawl {
        /// Only issues updated after this time (e.g., 2015-02-20T20:30:30Z). Defaults to now
        #[arg(long)]
        since: Option<String>,

        /// Run a single poll cycle right away and exit
        #[arg(long)]
        once: bool,
    },

    /// Print the URL the next poll would fetch
    Url {
        #[arg(long)]
        since: Option<String>,
    },

    /// Create the config file interactively
    Init,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Display current configuration (with masked secrets)
    Show,

    /// Get the path to the config file
    Path,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    logging::init_tracing(if cli.verbose { "debug" } else { "info" });

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Crawl { since, once } => handle_crawl(config_path, since.as_deref(), once).await,

        Commands::Url { since } => handle_url(config_path, since.as_deref()),

        Commands::Init => handle_init(config_path).await,

        Commands::Config { action } => handle_config(config_path, action),
    };

    if let Err(e) = result {
        eprintln!("\n{}", e);
        std::process::exit(1);
    }
}

fn resolve_config_path(config_path: Option<&Path>) -> anyhow::Result<PathBuf> {
    match config_path {
        Some(path) => Ok(path.to_path_buf()),
        None => Settings::config_path(),
    }
}

fn load_settings(config_path: Option<&Path>) -> anyhow::Result<Settings> {
    Settings::load_from(&resolve_config_path(config_path)?)
}

fn parse_since(since: Option<&str>) -> anyhow::Result<DateTime<Utc>> {
    match since {
        Some(text) => models::timestamp::normalize(text).map_err(|e| {
            errors::CrawlerError::Other(format!(
                "--since: {} (use 2015-02-20T20:30:30Z or 2015/02/20 20:30:30 +0000)",
                e
            ))
            .into()
        }),
        None => Ok(Utc::now()),
    }
}

async fn handle_crawl(config_path: Option<&Path>, since: Option<&str>, once: bool) -> anyhow::Result<()> {
    let settings = load_settings(config_path)?;
    let start = parse_since(since)?;

    match settings.output.sink {
        SinkKind::Console => run_crawler(&settings, output::ConsoleOutputter, start, once).await,
        SinkKind::Webhook => {
            let hook = settings.webhook_settings().ok_or_else(|| {
                errors::CrawlerError::ConfigInvalid("[output.webhook] is missing".to_string())
            })?;
            let notifier = output::RoomNotifier::new(hook, settings.timeout())?;
            run_crawler(&settings, notifier, start, once).await
        }
    }
}

async fn run_crawler<O: output::Outputter>(
    settings: &Settings,
    outputter: O,
    start: DateTime<Utc>,
    once: bool,
) -> anyhow::Result<()> {
    let transport = api::RedmineClient::new(settings.timeout())?;
    let mut crawler = crawler::Crawler::new(
        settings.query(),
        settings.interval(),
        transport,
        outputter,
        start,
    );
    if let Some(selector) = settings.selector() {
        crawler = crawler.with_selector(selector);
    }

    println!(
        "{}",
        format!("Watching {} for issues updated after {}", settings.redmine.url, start)
            .cyan()
            .bold()
    );
    if !once {
        println!(
            "{}",
            format!("  Polling every {}s, Ctrl-C to stop", crawler.interval().as_secs()).dimmed()
        );
    }
    println!();

    let result = if once {
        crawler.poll_once().await.map(|report| {
            println!();
            println!(
                "{}",
                format!("✓ Delivered {} of {} fetched issues", report.delivered, report.fetched).green()
            );
            tracing::debug!(watermark = %report.watermark, "single cycle finished");
        })
    } else {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, stopping after the current cycle");
                on_signal.cancel();
            }
        });
        crawler.crawl(cancel).await
    };

    let resume_at = crawler
        .watermark()
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

    match result {
        Ok(()) => {
            println!("{}", format!("  Resume with: --since {}", resume_at).dimmed());
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = ?e, watermark = %resume_at, "crawler stopped");
            eprintln!("{}", format!("  Resume with: --since {}", resume_at).yellow());
            Err(e.into())
        }
    }
}

fn handle_url(config_path: Option<&Path>, since: Option<&str>) -> anyhow::Result<()> {
    let settings = load_settings(config_path)?;
    let start = parse_since(since)?;
    println!("{}", settings.query().build(start));
    Ok(())
}

async fn handle_init(config_path: Option<&Path>) -> anyhow::Result<()> {
    use crate::api::Transport;
    use crate::config::settings::*;
    use dialoguer::{Input, Password, Select};

    let path = resolve_config_path(config_path)?;

    println!("{}", "Redmine Crawler Configuration Setup".cyan().bold());
    println!();
    println!(
        "{}",
        format!("This will store your settings in {}", path.display()).dimmed()
    );
    println!(
        "{}",
        "The file will be created with read-only permissions (600)".dimmed()
    );
    println!();

    println!("{}", "Redmine".bold());
    let url: String = Input::new()
        .with_prompt("Redmine URL (e.g., https://redmine.<company>.com)")
        .interact_text()?;
    let api_key: String = Password::new()
        .with_prompt("API key (leave empty for anonymous access)")
        .allow_empty_password(true)
        .interact()?;

    println!();
    println!("{}", "=== Crawling ===".bold());
    let interval_secs: u64 = Input::new()
        .with_prompt("Poll interval in seconds (minimum 10)")
        .default(CrawlConfig::default().interval_secs)
        .interact_text()?;
    let limit: u32 = Input::new()
        .with_prompt("Issues per fetch")
        .default(CrawlConfig::default().limit)
        .interact_text()?;

    println!();
    println!("{}", "=== Output ===".bold());
    let sink_choice = Select::new()
        .with_prompt("Deliver issues to")
        .items(&["console", "chat room webhook"])
        .default(0)
        .interact()?;

    let output = if sink_choice == 1 {
        let hook_url: String = Input::new()
            .with_prompt("Chat API base URL (e.g., https://api.hipchat.com)")
            .interact_text()?;
        let room_id: String = Input::new().with_prompt("Room ID").interact_text()?;
        let token: String = Password::new().with_prompt("Room notification token").interact()?;
        let color: String = Input::new()
            .with_prompt("Notification color")
            .default("yellow".to_string())
            .interact_text()?;
        OutputConfig {
            sink: SinkKind::Webhook,
            webhook: Some(WebhookConfig {
                url: hook_url,
                room_id,
                token,
                color,
            }),
        }
    } else {
        OutputConfig::default()
    };

    let settings = Settings {
        redmine: RedmineConfig {
            url,
            api_key: if api_key.is_empty() { None } else { Some(api_key) },
            client_side_filter: false,
        },
        crawl: CrawlConfig {
            interval_secs,
            limit,
            ..CrawlConfig::default()
        },
        output,
        select: SelectConfig::default(),
    };
    settings.validate()?;

    println!();
    println!("{}", "Validating configuration...".cyan());
    println!();

    print!("{}", "  Testing Redmine connection... ".dimmed());
    let mut check_query = settings.query();
    check_query.limit = 1;
    let client = api::RedmineClient::new(settings.timeout())?;
    let checked = match client.get(&check_query.build(Utc::now())).await {
        Ok(body) => serde_json::from_str::<models::IssuesPage>(&body)
            .map(|_| ())
            .map_err(errors::CrawlerError::from),
        Err(e) => Err(e),
    };
    match checked {
        Ok(()) => println!("{}", "✓".green().bold()),
        Err(e) => {
            println!("{}", "✗".red().bold());
            return Err(e.into());
        }
    }

    settings.save_to(&path)?;

    println!();
    println!("{}", "Configuration saved!".green().bold());
    println!("  Location: {}", path.display().to_string().bright_white());
    println!();
    println!("{}", "Start crawling with:".dimmed());
    println!("  {}", "redmine-crawler crawl".green());

    Ok(())
}

fn handle_config(config_path: Option<&Path>, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let settings = load_settings(config_path)?;

            println!("{}", "Current Configuration".cyan().bold());
            println!();

            println!("{}", "[redmine]".bold());
            println!("  {} {}", "url:".dimmed(), settings.redmine.url.bright_white());
            if let Some(key) = &settings.redmine.api_key {
                println!("  {} {}", "api_key:".dimmed(), mask_secret(key).yellow());
            }
            println!(
                "  {} {}",
                "filter:".dimmed(),
                format!("{:?}", settings.query().filter_mode()).to_lowercase().bright_white()
            );

            println!();
            println!("{}", "[crawl]".bold());
            println!("  {} {}", "interval_secs:".dimmed(), settings.interval().max(crawler::MIN_INTERVAL).as_secs());
            println!("  {} {}", "limit:".dimmed(), settings.crawl.limit);
            println!("  {} {}", "sort:".dimmed(), settings.crawl.sort.bright_white());
            println!("  {} {}", "status_id:".dimmed(), settings.crawl.status_id.bright_white());
            println!("  {} {}", "timeout_secs:".dimmed(), settings.crawl.timeout_secs);

            println!();
            println!("{}", "[output]".bold());
            match (&settings.output.sink, &settings.output.webhook) {
                (SinkKind::Webhook, Some(hook)) => {
                    println!("  {} {}", "sink:".dimmed(), "webhook".bright_white());
                    println!("  {} {}", "url:".dimmed(), hook.url.bright_white());
                    println!("  {} {}", "room_id:".dimmed(), hook.room_id.bright_white());
                    println!("  {} {}", "token:".dimmed(), mask_secret(&hook.token).yellow());
                    println!("  {} {}", "color:".dimmed(), hook.color.bright_white());
                }
                _ => println!("  {} {}", "sink:".dimmed(), "console".bright_white()),
            }

            if !settings.select.statuses.is_empty() || settings.select.subject_prefix.is_some() {
                println!();
                println!("{}", "[select]".bold());
                if !settings.select.statuses.is_empty() {
                    println!("  {} {}", "statuses:".dimmed(), settings.select.statuses.join(", "));
                }
                if let Some(prefix) = &settings.select.subject_prefix {
                    println!("  {} {}", "subject_prefix:".dimmed(), prefix.bright_white());
                }
            }

            Ok(())
        }

        ConfigAction::Path => {
            println!("{}", resolve_config_path(config_path)?.display());
            Ok(())
        }
    }
}
