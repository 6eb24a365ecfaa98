//! Консоль zprobe.
//!
//! Читает команды `psub` / `punsub` / `pub` построчно и выполняет их над
//! экземплярами сервиса, подключёнными к брокеру выбранного профиля.

use std::{io::IsTerminal, path::PathBuf, sync::Arc, thread};

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;
use rustyline::{error::ReadlineError, DefaultEditor};
use tokio::sync::mpsc;
use tracing::{debug, error};
use zprobe::{
    command::{LineOutcome, HELP_TEXT},
    init_logging, CommandProcessor, Connector, LocalConnector, Profile, ServiceRegistry, Settings,
};

/// Аргументы командной строки.
#[derive(Parser, Debug)]
#[command(name = "zprobe")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Pub/Sub broker test harness", long_about = None)]
struct Cli {
    /// Профиль строки подключения
    #[arg(help = "Connection profile: m1, m2, m3, s1, s2, s3 or dev; anything else uses default")]
    profile: Option<String>,
    /// Файл конфигурации
    #[arg(
        short,
        long,
        env = "ZPROBE_CONFIG",
        help = "Configuration file (default: optional zprobe.json in the working directory)"
    )]
    config: Option<PathBuf>,
    /// Работать с брокером внутри процесса
    #[arg(long, help = "Use the in-process broker instead of the configured connection")]
    local: bool,
    #[arg(short, long, help = "Enable debug logging")]
    verbose: bool,
    #[arg(short, long, help = "Only warnings and errors")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    settings.logging.apply_verbosity(cli.verbose, cli.quiet);
    let logging = init_logging(settings.logging.clone()).context("Failed to init logging")?;

    let profile = Profile::from_arg(cli.profile.as_deref());
    let connector: Arc<dyn Connector> = if cli.local {
        Arc::new(LocalConnector::default())
    } else {
        settings
            .connector(profile)
            .with_context(|| format!("Invalid connection settings for profile '{profile}'"))?
    };

    print_banner(profile, &connector.endpoint());

    let mut registry = ServiceRegistry::new(connector, settings.ack_timeout());
    if let Err(err) = registry.bootstrap().await {
        error!("Failed to start service instances: {err:?}");
        registry.dispose_all().await;
        logging.shutdown();
        return Err(err).context("Broker is not reachable");
    }

    println!("{HELP_TEXT}");
    println!();

    let mut processor = CommandProcessor::new(registry);
    let (tx, mut lines) = mpsc::unbounded_channel();
    thread::Builder::new()
        .name("zprobe-input".to_string())
        .spawn(move || read_lines(tx))
        .context("Failed to start input thread")?;

    let color = std::io::stdout().is_terminal();
    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            debug!("Input closed");
            break;
        };

        let outcome = processor.run_line(&line).await;
        print_outcome(&outcome, color);
        if outcome.is_quit() {
            break;
        }
    }

    processor.shutdown().await;
    logging.shutdown();
    Ok(())
}

/// Блокирующее чтение строк; строки уходят в async-цикл по каналу.
fn read_lines(tx: mpsc::UnboundedSender<String>) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("Failed to open console: {err}");
            return;
        }
    };

    loop {
        match editor.readline("zprobe> ") {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = editor.add_history_entry(line.as_str());
                }
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Console read error: {err}");
                break;
            }
        }
    }
}

fn print_outcome(
    outcome: &LineOutcome,
    color: bool,
) {
    match outcome {
        LineOutcome::Empty => {}
        LineOutcome::Reply(reply) => println!("{reply}"),
        LineOutcome::Failed(err) if color => println!("{}", err.client_message().red()),
        LineOutcome::Failed(err) => println!("{}", err.client_message()),
    }
}

fn print_banner(
    profile: Profile,
    endpoint: &str,
) {
    let version = env!("CARGO_PKG_VERSION");
    let pid = std::process::id();

    if std::io::stdout().is_terminal() {
        println!("{}", format!("zprobe {version}").bold().bright_blue());
        println!("Profile:   {}", profile.cyan());
        println!("Endpoint:  {}", endpoint.magenta());
        println!("PID:       {}", pid.dimmed());
    } else {
        println!("zprobe {version}");
        println!("Profile:   {profile}");
        println!("Endpoint:  {endpoint}");
        println!("PID:       {pid}");
    }
    println!();
    println!("Profiles are m1, m2, m3, s1, s2, s3 and dev (master1..3, slave1..3, dev).");
    println!("Any other value uses the default connection string.");
    println!();
}
