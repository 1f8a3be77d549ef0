use snafu::Snafu;
use std::io;
use std::path::PathBuf;

/// Possible errors from resource store operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display(
        "Version conflict on '{}': expected {}, store has {}",
        id,
        expected,
        found
    ))]
    Conflict {
        id: String,
        expected: String,
        found: String,
    },

    #[snafu(display("Resource id '{}' has invalid format: {}", id, msg))]
    InvalidId { id: String, msg: String },

    #[snafu(display("Resource name beyond maximum length {}: {}", max, name))]
    NameTooLong { name: String, max: usize },

    #[snafu(display("Resource would traverse outside data store: {}", id))]
    PathTraversal { id: String },

    #[snafu(display("Reading resource '{}' failed: {}", id, source))]
    ResourceRead { id: String, source: io::Error },

    #[snafu(display("Removing resource at '{}' failed: {}", path.display(), source))]
    DeleteResource { path: PathBuf, source: io::Error },

    #[snafu(display("IO error on '{}': {}", path.display(), source))]
    Io { path: PathBuf, source: io::Error },

    #[snafu(display("Data store integrity violation at {}: {}", path.display(), msg))]
    Corruption { msg: String, path: PathBuf },

    #[snafu(display("Error listing data store resources: {}", source))]
    ListResources { source: walkdir::Error },

    #[snafu(display("Another thread poisoned the data store lock by panicking"))]
    StoreLock,

    #[snafu(display("Data store logic error: {}", msg))]
    Internal { msg: String },
}

pub type Result<T> = std::result::Result<T, Error>;
