pub mod config;
pub mod connection;
pub mod error;
pub mod mapping;
pub mod poller;
pub mod pool;
pub mod request;
pub mod response;
pub mod server;
pub mod signals;
pub mod site;
pub mod table;
pub mod window;

pub use config::{Command, ConfigError, ServerConfig};
pub use error::ServerError;
pub use response::ResponseCode;
pub use server::{Server, ServerOptions};
pub use site::{ResourceCatalog, RouteTable, Site};
pub use window::READ_BUFFER_SIZE;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
