use clap::{Arg, ArgMatches, Command};
use imap_muxer::mailbox::MemoryConnector;
use imap_muxer::sieve::generate_script;
use imap_muxer::worker::{tidy, ConfigWatcher, Monitor};
use imap_muxer::{Config, RuntimeState};
use log::LevelFilter;
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn folder_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("folder")
                .long("folder")
                .value_name("FOLDER")
                .help("Folder to fetch the messages from (default: INBOX)"),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Print actions instead of running them")
                .action(clap::ArgAction::SetTrue),
        )
}

#[tokio::main]
async fn main() {
    let matches = Command::new("imap-muxer")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Sort mailbox messages with configurable rules, live or as a sieve script")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.yaml")
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(clap::ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(folder_args(
            Command::new("monitor").about("Watch the mailbox and apply rules on unseen messages"),
        ))
        .subcommand(folder_args(
            Command::new("tidy").about("Apply rules once on every message of a folder"),
        ))
        .subcommand(
            Command::new("sieve-export")
                .about("Write the rules as a sieve script")
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .help("Write the script to FILE instead of stdout"),
                ),
        )
        .subcommand(Command::new("check-config").about("Validate the configuration file"))
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    let config_path = matches
        .get_one::<String>("config")
        .cloned()
        .unwrap_or_else(|| "config.yaml".to_string());

    let result = match matches.subcommand() {
        Some(("monitor", sub)) => monitor(&config_path, sub).await,
        Some(("tidy", sub)) => run_tidy(&config_path, sub).await,
        Some(("sieve-export", sub)) => sieve_export(&config_path, sub),
        Some(("check-config", _)) => check_config(&config_path),
        _ => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("{e:#}");
        process::exit(1);
    }
}

fn folder_of(matches: &ArgMatches) -> Option<String> {
    matches.get_one::<String>("folder").cloned()
}

async fn monitor(config_path: &str, matches: &ArgMatches) -> anyhow::Result<()> {
    let state = Arc::new(RuntimeState::load(config_path)?);
    let reload = Arc::new(AtomicBool::new(false));
    let _watcher = ConfigWatcher::spawn(state.config_path(), reload.clone())?;

    log::warn!("No IMAP transport is linked in, monitoring an empty in-memory mailbox");
    let mut monitor = Monitor::new(MemoryConnector::new(), state, reload)
        .dry_run(matches.get_flag("dry-run"));
    if let Some(folder) = folder_of(matches) {
        monitor = monitor.folder(folder);
    }
    monitor.run().await
}

async fn run_tidy(config_path: &str, matches: &ArgMatches) -> anyhow::Result<()> {
    let state = RuntimeState::load(config_path)?;
    log::warn!("No IMAP transport is linked in, tidying an empty in-memory mailbox");
    let folder = folder_of(matches);
    let count = tidy(
        &MemoryConnector::new(),
        &state.snapshot(),
        folder.as_deref(),
        matches.get_flag("dry-run"),
    )
    .await?;
    println!();
    println!("{count} messages parsed.");
    Ok(())
}

fn sieve_export(config_path: &str, matches: &ArgMatches) -> anyhow::Result<()> {
    let config = Config::from_file(config_path)?;
    let script = generate_script(&config.rules, &config.actions, &config.settings.sieve)?;
    match matches.get_one::<String>("output") {
        Some(path) => {
            std::fs::write(path, script)?;
            println!("Sieve script written to: {path}");
        }
        None => print!("{script}"),
    }
    Ok(())
}

fn check_config(config_path: &str) -> anyhow::Result<()> {
    let config = Config::from_file(config_path)?;
    println!("Server: {} ({})", config.settings.server, config.settings.username);
    println!("Number of rules: {}", config.rules.len());
    for (i, rule) in config.rules.iter().enumerate() {
        println!("  Rule {}: {}", i + 1, rule.label());
    }
    println!("Named actions: {}", config.actions.names().collect::<Vec<_>>().join(", "));
    println!("✅ Configuration is valid");
    Ok(())
}
