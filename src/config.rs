use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use mio::net::TcpListener;

use crate::error::ServerError;
use crate::poller::DEFAULT_EVENT_CAPACITY;
use crate::pool::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};
use crate::server::ServerOptions;
use crate::site::{ResourceCatalog, RouteTable, Site};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(String),
    #[error("invalid value for {flag}: {value}")]
    InvalidValue { flag: String, value: String },
    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(ServerConfig),
    Help,
    Version,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    // Directory holding the index page, the secondary page and the resource directory.
    pub root: PathBuf,
    pub workers: usize,
    pub queue_capacity: usize,
    pub event_capacity: usize,
    pub routes: RouteTable,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            root: PathBuf::from("root"),
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            routes: RouteTable::default(),
        }
    }
}

fn value_for(flag: &str, value: Option<String>) -> Result<String, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
}

fn number_for<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T, ConfigError> {
    let value = value_for(flag, value)?;
    value.parse().map_err(|_| ConfigError::InvalidValue {
        flag: flag.to_string(),
        value,
    })
}

impl ServerConfig {
    // Intent: parse command-line arguments (without the program name).
    // Result: a run configuration, or a request for help/version output.
    pub fn from_args<I>(args: I) -> Result<Command, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = ServerConfig::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--host" | "-h" => config.host = value_for(&arg, args.next())?,
                "--port" | "-p" => config.port = number_for(&arg, args.next())?,
                "--root" | "-r" => config.root = PathBuf::from(value_for(&arg, args.next())?),
                "--workers" | "-w" => config.workers = number_for(&arg, args.next())?,
                "--queue" | "-q" => config.queue_capacity = number_for(&arg, args.next())?,
                "--events" => config.event_capacity = number_for(&arg, args.next())?,
                "--help" => return Ok(Command::Help),
                "--version" | "-v" => return Ok(Command::Version),
                positional if !positional.starts_with('-') => {
                    config.port = positional.parse().map_err(|_| ConfigError::InvalidValue {
                        flag: "port".to_string(),
                        value: positional.to_string(),
                    })?;
                }
                unknown => return Err(ConfigError::UnknownArgument(unknown.to_string())),
            }
        }

        Ok(Command::Run(config))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    // Intent: create the listening socket the reactor is handed.
    // Result: a non-blocking listener with SO_REUSEADDR, bound and listening.
    pub fn bind(&self) -> io::Result<TcpListener> {
        let addr: SocketAddr = self.bind_address().parse().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid bind address {}", self.bind_address()),
            )
        })?;
        TcpListener::bind(addr)
    }

    pub fn resource_dir(&self) -> PathBuf {
        self.root.join(&self.routes.resource_dir)
    }

    // Intent: scan the resource directory once at startup.
    // Result: the served site, or a catalog error naming the directory that failed.
    pub fn load_site(&self) -> Result<Site, ServerError> {
        let dir = self.resource_dir();
        let catalog = ResourceCatalog::scan(&dir)
            .map_err(|source| ServerError::Catalog { path: dir, source })?;
        Ok(Site::new(self.root.clone(), self.routes.clone(), catalog))
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            event_capacity: self.event_capacity,
            table_capacity: None,
        }
    }
}
