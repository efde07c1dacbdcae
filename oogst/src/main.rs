use clap::ArgMatches;
use colored::Colorize;
use commands::command_argument_builder;
use oogst::handlers::{
    Settings, batch_mode, handle_discover, handle_init, handle_monitor, handle_process,
    handle_show, handle_stats, print_banner, resolve_settings,
};
use oogst_core::harvest::ShutdownSignal;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use url::Url;

mod commands;

#[tokio::main]
async fn main() {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    init_tracing(quiet);

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    if chosen_command.subcommand().is_none() {
        // No subcommand provided, just show the banner
        return;
    }

    let settings = match settings_from_args(&chosen_command) {
        Ok(settings) => settings,
        Err(e) => exit_with_error(e),
    };

    let shutdown = ShutdownSignal::new();
    watch_ctrl_c(shutdown.clone());

    let outcome = match chosen_command.subcommand() {
        Some(("init", args)) => handle_init(&settings, args.get_flag("force")),
        Some(("discover", args)) => {
            let max_pages = args.get_one::<u32>("max-pages").copied();
            handle_discover(&settings, max_pages, shutdown).await.map(|_| ())
        }
        Some(("process", args)) => {
            let mode = batch_mode(
                args.get_one::<usize>("limit").copied(),
                args.get_flag("claim"),
                Duration::from_secs(args.get_one::<u64>("lease-secs").copied().unwrap_or(600)),
            );
            handle_process(&settings, mode, shutdown).await.map(|_| ())
        }
        Some(("stats", args)) => {
            handle_stats(&settings, args.get_one::<u64>("window-mins").copied())
        }
        Some(("monitor", args)) => {
            let interval = args.get_one::<u64>("interval").copied();
            handle_monitor(&settings, interval, args.get_flag("plain"), shutdown).await
        }
        Some(("show", args)) => match args.get_one::<Url>("URL") {
            Some(url) => handle_show(&settings, url.as_str()),
            None => unreachable!("clap should ensure we don't get here"),
        },
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = outcome {
        exit_with_error(e);
    }
}

fn init_tracing(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn settings_from_args(matches: &ArgMatches) -> anyhow::Result<Settings> {
    let config = matches.get_one::<PathBuf>("config");
    let database = matches.get_one::<String>("database");
    resolve_settings(config.map(PathBuf::as_path), database.map(String::as_str))
}

fn watch_ctrl_c(shutdown: ShutdownSignal) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current page");
            shutdown.request();
        }
    });
}

fn exit_with_error(e: anyhow::Error) -> ! {
    eprintln!("{} {:#}", "✗".red().bold(), e);
    std::process::exit(1);
}

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
