use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use clap::{command, value_parser, Arg, ArgAction, ArgMatches, Command};
use console::style;
use tracing_subscriber::EnvFilter;

mod api;
mod credentials;
mod download;
mod error;
mod fetch;
mod github;
mod location;
mod output;
mod progress;
mod walker;

#[cfg(test)]
mod fake_api;

use crate::{
    api::RepoApi,
    download::{ProgressMode, DEFAULT_CONCURRENCY},
    fetch::FetchOptions,
    github::GithubApi,
};

fn cli() -> Command {
    command!()
        .arg(
            Arg::new("SOURCE")
                .required(true)
                .help("The directory to download, e.g. owner/repo/tree/main/path or a github.com url"),
        )
        .arg(
            Arg::new("NAME")
                .required(false)
                .help("The directory to download to, derived from the source when omitted"),
        )
        .arg(
            Arg::new("git")
                .long("git")
                .action(ArgAction::SetTrue)
                .help("Initialize a git repository with a single commit in the downloaded directory"),
        )
        .arg(
            Arg::new("jobs")
                .short('j')
                .long("jobs")
                .value_parser(value_parser!(usize))
                .default_value("8")
                .help("The maximum number of files downloaded at the same time"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Print debug output"),
        )
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}={level}", env!("CARGO_CRATE_NAME"))));

    // only fails if a subscriber is already installed
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .compact()
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("verbose"));

    match run(&matches).await {
        Ok(path) => {
            println!("{} {}", style("Downloaded to").green().bold(), path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{} {e:#}", style("error:").red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(matches: &ArgMatches) -> Result<PathBuf> {
    let source = matches
        .get_one::<String>("SOURCE")
        .context("no source given")?;
    let location = location::resolve(source)?;

    let api: Arc<dyn RepoApi> = Arc::new(GithubApi::new(credentials::discover().await));
    let options = FetchOptions {
        name: matches.get_one::<String>("NAME").cloned(),
        concurrency: matches
            .get_one::<usize>("jobs")
            .copied()
            .unwrap_or(DEFAULT_CONCURRENCY),
        init_git: matches.get_flag("git"),
        progress: ProgressMode::Bar,
        ..FetchOptions::new(location)
    };

    let cwd = std::env::current_dir().context("could not determine the current directory")?;
    let fetched = fetch::fetch(api, &options, &cwd).await.with_context(|| {
        format!(
            "failed to download {}/{} at {}",
            options.location.slug(),
            options.location.path,
            options.location.reference
        )
    })?;

    if options.init_git && !fetched.git_initialized {
        eprintln!(
            "{} the files were downloaded but the git repository could not be created",
            style("warning:").yellow().bold()
        );
    }

    Ok(fetched.path)
}
