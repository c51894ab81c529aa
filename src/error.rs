use std::io;
use std::path::PathBuf;

use crate::pool::PoolError;

// Failures that stop the server: startup problems and a broken readiness wait.
// Per-connection errors never surface here.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("worker pool: {0}")]
    Pool(#[from] PoolError),

    #[error("cannot read resource directory {}: {source}", path.display())]
    Catalog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("connection table needs at least one slot")]
    EmptyTable,
}
