mod scenario;

use std::fmt;
use std::path::PathBuf;

use course_core::model::CourseId;
use remote::{HttpConfig, HttpGateway, Remote};
use services::{Clock, LearningSession, SyncConfig};
use url::Url;

use crate::scenario::Scenario;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingArgument { name: &'static str },
    UnknownArg(String),
    InvalidCourseId { raw: String },
    InvalidUrl { raw: String },
    NoServer,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingArgument { name } => write!(f, "missing <{name}>"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidCourseId { raw } => write!(f, "invalid course id: {raw}"),
            ArgsError::InvalidUrl { raw } => write!(f, "invalid --base-url value: {raw}"),
            ArgsError::NoServer => {
                write!(f, "no server configured: pass --base-url or set COURSE_SYNC_API_URL")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  course-sync replay   <scenario.json> [--compact]");
    eprintln!("  course-sync snapshot <course_id> [--base-url <url>] [--token <token>]");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  COURSE_SYNC_API_URL, COURSE_SYNC_API_TOKEN, COURSE_SYNC_HTTP_TIMEOUT_SECS");
    eprintln!("  COURSE_SYNC_AUTOSAVE_INTERVAL_MS, COURSE_SYNC_ANSWER_DEBOUNCE_MS,");
    eprintln!("  COURSE_SYNC_NAVIGATION_DEBOUNCE_MS, COURSE_SYNC_LOAD_ATTEMPTS");
    eprintln!("  RUST_LOG (e.g. RUST_LOG=debug)");
}

#[derive(Debug, PartialEq)]
enum Command {
    Replay { path: PathBuf, compact: bool },
    Snapshot { course: CourseId, server: Option<HttpConfig> },
    Help,
}

impl Command {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        match args.next().as_deref() {
            None | Some("--help" | "-h") => Ok(Self::Help),
            Some("replay") => Self::parse_replay(&mut args),
            Some("snapshot") => Self::parse_snapshot(&mut args),
            Some(other) => Err(ArgsError::UnknownArg(other.to_string())),
        }
    }

    fn parse_replay(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut path = None;
        let mut compact = false;
        for arg in args {
            match arg.as_str() {
                "--compact" => compact = true,
                "--help" | "-h" => return Ok(Self::Help),
                _ if arg.starts_with("--") => return Err(ArgsError::UnknownArg(arg)),
                _ if path.is_none() => path = Some(PathBuf::from(arg)),
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }
        let path = path.ok_or(ArgsError::MissingArgument { name: "scenario.json" })?;
        Ok(Self::Replay { path, compact })
    }

    fn parse_snapshot(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut course = None;
        let mut server = HttpConfig::from_env();
        let mut token = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--base-url" => {
                    let value = require_value(args, "--base-url")?;
                    let url = Url::parse(value.trim())
                        .map_err(|_| ArgsError::InvalidUrl { raw: value.clone() })?;
                    let config = HttpConfig::new(url);
                    // Keep the token and timeout picked up from the environment.
                    server = Some(match server {
                        Some(previous) => {
                            let config = config.with_timeout(previous.timeout);
                            match previous.token {
                                Some(token) => config.with_token(token),
                                None => config,
                            }
                        }
                        None => config,
                    });
                }
                "--token" => token = Some(require_value(args, "--token")?),
                "--help" | "-h" => return Ok(Self::Help),
                _ if arg.starts_with("--") => return Err(ArgsError::UnknownArg(arg)),
                _ if course.is_none() => {
                    let parsed: u64 = arg
                        .parse()
                        .map_err(|_| ArgsError::InvalidCourseId { raw: arg.clone() })?;
                    course = Some(CourseId::new(parsed));
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        let course = course.ok_or(ArgsError::MissingArgument { name: "course_id" })?;
        if let Some(token) = token {
            server = server.map(|config| config.with_token(token));
        }
        Ok(Self::Snapshot { course, server })
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let command = Command::parse(std::env::args().skip(1)).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    match command {
        Command::Help => {
            print_usage();
            Ok(())
        }
        Command::Replay { path, compact } => {
            let raw = std::fs::read_to_string(&path)?;
            let scenario = Scenario::from_json(&raw)?;
            log::info!(
                "replaying {} ({} events)",
                path.display(),
                scenario.events.len()
            );
            let report = scenario::replay(scenario, SyncConfig::from_env()).await?;
            let json = if compact {
                serde_json::to_string(&report)?
            } else {
                serde_json::to_string_pretty(&report)?
            };
            println!("{json}");
            Ok(())
        }
        Command::Snapshot { course, server } => {
            let config = server.ok_or(ArgsError::NoServer)?;
            let gateway = HttpGateway::new(config)?;
            let session = LearningSession::load(
                Remote::from_gateway(gateway),
                course,
                SyncConfig::from_env(),
                Clock::system(),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&session.sidebar())?);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
