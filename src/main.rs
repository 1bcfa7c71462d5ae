use armature::backend::BackendClient;
use armature::providers::provider_for;
use armature::settings::Settings;
use armature::tui::{App, TuiEvent};

use clap::Parser;
use colored::*;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::Layer;

struct TuiLayer {
    tx: broadcast::Sender<TuiEvent>,
}

impl<S> Layer<S> for TuiLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut message = String::new();
        let mut visitor = LogVisitor {
            message: &mut message,
        };
        event.record(&mut visitor);

        let metadata = event.metadata();
        let level = metadata.level().to_string();
        let target = metadata.target().to_string();
        let timestamp = chrono::Local::now().format("%H:%M:%S").to_string();

        let _ = self.tx.send(TuiEvent::LogMessage {
            level,
            target,
            message,
            timestamp,
        });
    }
}

struct LogVisitor<'a> {
    message: &'a mut String,
}

impl<'a> tracing::field::Visit for LogVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message.push_str(&format!("{:?}", value));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Terminal chat for the Blender node assistant", long_about = None)]
struct Args {
    /// Backend base URL, overriding the settings file.
    #[arg(long)]
    backend: Option<String>,
    #[arg(long, default_value = "armature.json")]
    settings: PathBuf,
    /// Directory for the rolling log file, overriding the settings file.
    #[arg(long)]
    log_dir: Option<String>,
    /// Provider id to use, overriding the settings file.
    #[arg(long)]
    provider: Option<String>,
    /// Probe the configured provider and print a capability report instead
    /// of starting the UI.
    #[arg(long, default_value_t = false)]
    check: bool,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let mut settings = Settings::load(&args.settings);
    if let Some(backend) = &args.backend {
        settings.backend_url = backend.clone();
    }
    if let Some(log_dir) = &args.log_dir {
        settings.log_dir = log_dir.clone();
    }
    if let Some(provider) = &args.provider {
        settings.provider = provider.clone();
    }

    // Setup TUI channel
    let (tx_tui, rx_tui) = broadcast::channel(armature::constants::TUI_CHANNEL_CAPACITY);

    // Setup Custom Logger that pipes to TUI
    use tracing_subscriber::prelude::*;

    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => "armature=debug".into(),
    };

    // Setup file logging
    let _ = std::fs::create_dir_all(&settings.log_dir);
    let file_appender = tracing_appender::rolling::daily(&settings.log_dir, "armature.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .with(TuiLayer { tx: tx_tui.clone() })
        .with(tracing_error::ErrorLayer::default())
        .init();

    // No total request timeout: an answer stream stays open for minutes.
    let client = match reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(4)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    if args.check {
        let ok = run_check(&client, &settings).await;
        std::process::exit(if ok { 0 } else { 1 });
    }

    let backend = BackendClient::new(client, &settings.backend_url);
    tracing::info!("Armature starting against {}", backend.base_url());

    // Connection probe and history prefetch race the first draw; the UI
    // renders "probing" until their events land.
    {
        let backend = backend.clone();
        let tx = tx_tui.clone();
        tokio::spawn(async move {
            let info = match backend.test_connection().await {
                Ok(info) => {
                    tracing::info!(
                        "[☁️  -> 🖥️ ] Backend reachable ({})",
                        info.service.as_deref().unwrap_or("unnamed service")
                    );
                    Some(info)
                }
                Err(e) => {
                    tracing::warn!("[☁️  -> 🖥️ ] Backend unreachable: {}", e.inner);
                    None
                }
            };
            let _ = tx.send(TuiEvent::Connection { info });
        });
    }
    {
        let backend = backend.clone();
        let tx = tx_tui.clone();
        tokio::spawn(async move {
            match backend.fetch_history().await {
                Ok(page) => {
                    tracing::info!("[☁️  -> 🖥️ ] Loaded {} past exchanges", page.count);
                    let _ = tx.send(TuiEvent::History { page });
                }
                Err(e) => tracing::warn!("[☁️  -> 🖥️ ] History unavailable: {}", e.inner),
            }
        });
    }

    // Run TUI on main thread
    let app = App::new(rx_tui, tx_tui.clone(), backend);
    if let Err(e) = app.run().await {
        eprintln!("TUI Error: {}", e);
    }
}

/// Prints a one-shot provider report for `--check` and returns whether the
/// endpoint answered.
async fn run_check(client: &reqwest::Client, settings: &Settings) -> bool {
    let provider = provider_for(&settings.provider, client, settings);
    println!("{}", "armature provider check".bold());
    println!("provider:  {}", provider.name().cyan());

    let reachable = provider.check_connectivity().await;
    if reachable {
        println!("endpoint:  {}", "reachable".green());
    } else {
        println!("endpoint:  {}", "unreachable".red());
        println!("(capability probes below fall back to static defaults)");
    }

    let models = provider.list_models().await;
    if models.is_empty() {
        println!("models:    {}", "none visible".yellow());
    } else {
        println!("models:    {}", models.len());
        for model in &models {
            println!("  - {} ({})", model.label, model.value.dimmed());
        }
    }

    let thinking = provider.test_thinking_support().await;
    let web = provider.test_web_support().await;
    println!("thinking:  {}", yes_no(thinking));
    println!("web:       {}", yes_no(web));

    reachable
}

fn yes_no(value: bool) -> ColoredString {
    if value {
        "yes".green()
    } else {
        "no".dimmed()
    }
}
