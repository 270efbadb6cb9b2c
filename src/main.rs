#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Result;
use fern::colors::ColoredLevelConfig;
use futures::future::TryFutureExt;
use structopt::StructOpt;
use tokio::sync::mpsc;

use mailq::actions::{
    self, AccountId, ActionEvent, ActionManager, ChannelBackend, FolderId, MessageId, PartLocation,
    Request, RetrievalSpec, SortKey,
};
use mailq::config::{Config, LogConfig};
use mailq::progress::ProgressTracker;
use mailq::{report_err, sim};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "mailq",
    about = "Runs mail backend requests through the action manager"
)]
struct Opt {
    /// Config file to use instead of the one in the XDG config directory
    #[structopt(long = "config", parse(from_os_str))]
    config: Option<PathBuf>,

    /// File to write logs to
    #[structopt(long = "log-file")]
    log_file: Option<String>,

    /// Log debug output
    #[structopt(short = "v", long = "verbose")]
    verbose: bool,

    /// Requests, submitted in order: `folders:<account>`,
    /// `messages:<account>:<folder>[:<minimum>]`, `part:<message>-<part path>`,
    /// `fetch:<message>[,<message>...]`
    #[structopt(name = "REQUEST", parse(try_from_str = parse_request))]
    requests: Vec<Request>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::from_args();

    let mut config = match &opt.config {
        Some(path) => Config::load(path)?,
        None => Config::discover()?,
    };
    if opt.log_file.is_some() {
        config.log.file = opt.log_file.clone();
    }
    if opt.verbose {
        config.log.level = "debug".to_owned();
    }
    setup_logger(&config.log)?;
    debug!("config: {:?}", config);

    let (backend, backend_rx) = ChannelBackend::new();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    tokio::spawn(
        sim::run_worker(backend_rx, events_tx, config.simulator.clone()).unwrap_or_else(report_err),
    );

    let manager = ActionManager::new(backend, config.actions.retry_limit());
    let (handle, actor) = actions::spawn(manager, events_rx);
    let mut events = handle.subscribe().await?;
    let tracker = ProgressTracker::default();

    let mut outstanding = HashSet::new();
    for request in opt.requests {
        let serial = handle.submit(request.clone()).await?;
        println!("[{}] submitted {:?}", serial, request);
        outstanding.insert(serial);
    }

    while !outstanding.is_empty() {
        let evt = match events.recv().await {
            Some(evt) => evt,
            None => bail!("action manager stopped before all requests finished"),
        };
        tracker.handle_event(&evt);

        match &evt {
            ActionEvent::Activity(serial, activity) => {
                println!("[{}] {:?}", serial, activity);
                if activity.is_terminal() {
                    outstanding.remove(serial);
                }
            }
            ActionEvent::Progress(serial, _, _) => {
                if let Some(fraction) = tracker.progress_of(*serial).and_then(|p| p.fraction()) {
                    println!("[{}] {:>3.0}%", serial, fraction * 100.0);
                }
            }
            ActionEvent::Status(serial, status) => println!("[{}] status: {}", serial, status),
            ActionEvent::Connectivity(serial, connectivity) => {
                println!("[{}] {:?}", serial, connectivity)
            }
            _ => {}
        }
    }

    drop(handle);
    actor.await?;
    Ok(())
}

fn parse_request(arg: &str) -> Result<Request> {
    let mut parts = arg.split(':');
    let kind = parts.next().unwrap_or_default();
    let rest = parts.collect::<Vec<_>>();

    let request = match (kind, rest.as_slice()) {
        ("folders", [account]) => Request::ListFolders {
            account: account.parse::<AccountId>()?,
            parent: None,
            descending: true,
        },
        ("messages", [account, folder]) | ("messages", [account, folder, _]) => {
            let minimum = match rest.get(2) {
                Some(min) => min.parse::<u32>()?,
                None => 20,
            };
            Request::ListMessages {
                account: account.parse::<AccountId>()?,
                folder: folder.parse::<FolderId>()?,
                minimum,
                sort: SortKey::default(),
            }
        }
        ("part", [location]) => Request::FetchPart {
            location: location.parse::<PartLocation>()?,
        },
        ("fetch", [ids]) => Request::FetchMessages {
            ids: ids
                .split(',')
                .map(|id| id.parse::<MessageId>())
                .collect::<Result<Vec<_>>>()?,
            spec: RetrievalSpec::Content,
        },
        _ => bail!("unrecognized request {:?}", arg),
    };
    Ok(request)
}

fn setup_logger(log_config: &LogConfig) -> Result<()> {
    let colors = ColoredLevelConfig::new();
    let file = log_config.file_path();
    let colored = file.is_none();

    let dispatch = fern::Dispatch::new()
        .format(move |out, message, record| {
            let level = if colored {
                colors.color(record.level()).to_string()
            } else {
                record.level().to_string()
            };
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                level,
                message
            ))
        })
        .level(log_config.level_filter()?);

    let dispatch = match file {
        Some(path) => dispatch.chain(fern::log_file(path)?),
        None => dispatch.chain(std::io::stderr()),
    };
    dispatch.apply()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_requests() -> Result<()> {
        assert_eq!(
            parse_request("folders:3")?,
            Request::ListFolders {
                account: AccountId(3),
                parent: None,
                descending: true,
            }
        );
        assert_eq!(
            parse_request("messages:1:2:50")?,
            Request::ListMessages {
                account: AccountId(1),
                folder: FolderId(2),
                minimum: 50,
                sort: SortKey::Default,
            }
        );
        assert_matches::assert_matches!(
            parse_request("part:42-1.2")?,
            Request::FetchPart { location } if location.key() == "42-1.2"
        );
        assert_eq!(
            parse_request("fetch:1,2")?,
            Request::FetchMessages {
                ids: vec![MessageId(1), MessageId(2)],
                spec: RetrievalSpec::Content,
            }
        );
        Ok(())
    }

    #[test]
    fn rejects_bad_requests() {
        assert!(parse_request("folders").is_err());
        assert!(parse_request("folders:x").is_err());
        assert!(parse_request("send:1").is_err());
        assert!(parse_request("messages:1:2:3:4").is_err());
    }
}
