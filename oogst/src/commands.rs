use crate::CLAP_STYLING;
use clap::{arg, command};
use oogst_core::config::{CONFIG_ENV, DATABASE_ENV};
use url::Url;

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("oogst")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("oogst")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .arg(
            arg!(-c --"config" <PATH>)
                .required(false)
                .global(true)
                .env(CONFIG_ENV)
                .help("TOML file with harvest settings")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(
            arg!(--"database" <PATH>)
                .required(false)
                .global(true)
                .env(DATABASE_ENV)
                .help("Frontier database location (overrides the config file)"),
        )
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Creates the frontier database")
                .arg(
                    arg!(-f --"force")
                        .help("Deletes and recreates an existing database")
                        .required(false),
                ),
        )
        .subcommand(
            command!("discover")
                .about("Walks the search result pages and queues every detail URL found")
                .arg(
                    arg!(-m --"max-pages" <N>)
                        .required(false)
                        .help("Stop after this many search pages")
                        .value_parser(clap::value_parser!(u32).range(1..)),
                ),
        )
        .subcommand(
            command!("process")
                .about("Visits queued detail pages and stores their captured metadata")
                .arg(
                    arg!(-l --"limit" <N>)
                        .required(false)
                        .help("Maximum number of URLs to process in this run")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"claim")
                        .required(false)
                        .help("Lease the batch so parallel workers on the same database don't overlap"),
                )
                .arg(
                    arg!(--"lease-secs" <SECONDS>)
                        .required(false)
                        .help("How long a claimed URL stays reserved")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("600")
                        .requires("claim"),
                ),
        )
        .subcommand(
            command!("stats")
                .about("Prints a one-line progress summary")
                .arg(
                    arg!(-w --"window-mins" <MINUTES>)
                        .required(false)
                        .help("Width of the recent-activity window")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
        .subcommand(
            command!("monitor")
                .about("Watches harvest progress until everything is processed")
                .arg(
                    arg!(-i --"interval" <SECONDS>)
                        .required(false)
                        .help("Seconds between polls")
                        .value_parser(clap::value_parser!(u64).range(1..)),
                )
                .arg(
                    arg!(--"plain")
                        .required(false)
                        .help("Print status lines instead of the full-screen dashboard"),
                ),
        )
        .subcommand(
            command!("show")
                .about("Prints the stored entry for one URL as JSON")
                .arg(
                    arg!(<URL>)
                        .required(true)
                        .help("Detail page URL")
                        .value_parser(clap::value_parser!(Url)),
                ),
        )
}
