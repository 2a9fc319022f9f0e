use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod db;
mod error;
mod feed;
mod models;
mod notify;
mod pipeline;
mod rate_limit;
mod services;
#[cfg(test)]
mod test_support;

use app::App;
use config::Config;
use error::{AppError, Result};
use models::SubscriberId;

const USAGE: &str = "usage: thread-watch [--config <path>] [--once | --enable <id> | --disable <id> | --watch <id> <url>... | --unwatch <id> <url>... | --list <id>]";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Serve,
    Once,
    Enable(SubscriberId),
    Disable(SubscriberId),
    Watch(SubscriberId, Vec<String>),
    Unwatch(SubscriberId, Vec<String>),
    List(SubscriberId),
}

#[derive(Debug, PartialEq, Eq)]
struct Args {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut config_path = None;
    let mut rest = args;

    if rest.first().map(String::as_str) == Some("--config") {
        let path = rest
            .get(1)
            .ok_or_else(|| AppError::Config("--config needs a path".into()))?;
        config_path = Some(PathBuf::from(path));
        rest = &rest[2..];
    }

    let subscriber = |rest: &[String]| -> Result<SubscriberId> {
        rest.get(1)
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| AppError::Config(format!("expected a subscriber id\n{}", USAGE)))
    };
    let urls = |rest: &[String]| -> Result<Vec<String>> {
        let urls = rest.get(2..).unwrap_or_default().to_vec();
        if urls.is_empty() {
            return Err(AppError::Config(format!("expected at least one URL\n{}", USAGE)));
        }
        Ok(urls)
    };

    let command = match rest.first().map(String::as_str) {
        None => Command::Serve,
        Some("--once") => Command::Once,
        Some("--enable") => Command::Enable(subscriber(rest)?),
        Some("--disable") => Command::Disable(subscriber(rest)?),
        Some("--watch") => Command::Watch(subscriber(rest)?, urls(rest)?),
        Some("--unwatch") => Command::Unwatch(subscriber(rest)?, urls(rest)?),
        Some("--list") => Command::List(subscriber(rest)?),
        Some(other) => {
            return Err(AppError::Config(format!("unknown argument {}\n{}", other, USAGE)));
        }
    };

    Ok(Args {
        config_path,
        command,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&args)?;

    let config = Config::load(args.config_path.as_deref())?;
    let app = App::new(&config).await?;

    match args.command {
        Command::Serve => {
            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("Ctrl-C received, shutting down");
                    }
                    cancel.cancel();
                }
            });
            app.run_service(cancel).await?;
        }
        Command::Once => {
            let (summary, stats) = app.run_once(CancellationToken::new()).await?;
            println!(
                "{} thread(s) changed, {} notification(s) delivered, {} failed, {} feed(s) failed",
                summary.changed, stats.delivered, stats.failed, summary.failed_feeds
            );
        }
        Command::Enable(id) => {
            if app.enable(id).await? {
                println!("Enabled notifications for {}", id);
            } else {
                println!("{} is already enabled", id);
            }
        }
        Command::Disable(id) => {
            if app.disable(id).await? {
                println!("Disabled notifications for {} and cleared their watchlist", id);
            } else {
                println!("{} was not enabled", id);
            }
        }
        Command::Watch(id, urls) => print!("{}", app.watch(id, &urls).await?),
        Command::Unwatch(id, urls) => print!("{}", app.unwatch(id, &urls).await?),
        Command::List(id) => {
            let threads = app.list(id).await?;
            if threads.is_empty() {
                println!("Watchlist is empty");
            }
            for thread in threads {
                println!("{}  {}", thread, thread.url);
            }
        }
    }

    Ok(())
}
