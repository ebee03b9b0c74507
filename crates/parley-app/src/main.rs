use std::sync::Arc;

use clap::Parser;
use parley_app::prelude::*;
use parley_app::reaper::spawn_configured_reaper;
use parley_channels::{ConsoleChannel, ConsoleSource, MessageFormat};
use parley_core::config::DEFAULT_LOG_FILTER;
use parley_core::ParleyConfig;
use parley_middleware::{IgnoreSelf, LogEvents};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Console chat bot demo: type messages on stdin, replies come back as JSON lines.
#[derive(Debug, Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Path to the config file (default: ./parley.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let loaded = ParleyConfig::load(cli.config.as_deref());
    let filter = loaded
        .as_ref()
        .map(|config| config.log.filter.clone())
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = loaded.unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        ParleyConfig::default()
    });

    let mut console = ConsoleChannel::stdout();
    console.connect().await?;
    let channel: Arc<dyn Channel> = Arc::new(console);

    let app = Arc::new(App::new(Arc::clone(&channel), config.clone())?);
    app.middlewares().register(LogEvents);
    app.middlewares().register(IgnoreSelf);
    register_flows(&app)?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received");
            on_signal.cancel();
        }
    });
    let reaper = spawn_configured_reaper(&app, shutdown.clone());

    let source = ConsoleSource::new(tokio::io::stdin(), &config.console);
    let handled = app.serve(source, shutdown.clone()).await;

    shutdown.cancel();
    if let Some(reaper) = reaper {
        let _ = reaper.await;
    }
    info!(handled, live = app.live(), "parley stopped");
    Ok(())
}

/// `/echo <text>` replies once; `/add` asks for two numbers and sums them.
fn register_flows(app: &Arc<App>) -> anyhow::Result<()> {
    let channel = app.channel();
    app.on_session("unique", root().join(command("echo")), move |(event, text), _stream| {
        let channel = Arc::clone(&channel);
        async move {
            channel.reply(&event, &text).await?;
            Ok(())
        }
    })?;

    let channel = app.channel();
    let options = app.get_options();
    let number = text().then(parse::<i64>()).fail("That is not a number, try again.");
    app.on_session("unique", root().join(command("add")).map(|(event, _)| event), move |event, mut stream| {
        let channel = Arc::clone(&channel);
        let number = number.clone();
        async move {
            channel.reply(&event, "First number?").await?;
            let a = stream.get(&number, options).await?;
            channel.reply(&event, "Second number?").await?;
            let b = stream.get(&number, options).await?;
            channel.send(&sum_reply(channel.name(), &event, a, b)).await?;
            Ok(())
        }
    })?;
    Ok(())
}

/// The `/add` answer, rendered as inline code; overflow gets a plain refusal.
fn sum_reply(channel: &str, event: &Event, a: i64, b: i64) -> OutboundMessage {
    match a.checked_add(b) {
        Some(sum) => OutboundMessage::reply_to(channel, event, format!("`{a} + {b} = {sum}`"))
            .with_format(MessageFormat::Markdown),
        None => OutboundMessage::reply_to(channel, event, "That sum is too large."),
    }
}
