use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not bind to {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("could not start the {0} thread: {1}")]
    Spawn(&'static str, io::Error),
}
