use http::StatusCode;
use snafu::Snafu;
use std::fmt;
use std::string::String;

use super::merge::Strategy;
use super::precondition::Header;
use super::Method;
use crate::identity;

// We want orchestrator, kind, and wire-format errors together so it's easy to define the outcome
// for all the high-level types of errors that could happen during a request.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    // =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

    // Request validation errors
    #[snafu(display("{} requires a payload", method))]
    MissingPayload { method: Method },

    #[snafu(display("Invalid {} payload: {}", kind, source))]
    InvalidJson {
        kind: &'static str,
        source: serde_json::Error,
    },

    #[snafu(display("{} resources can't be sent as '{}'", kind, given))]
    UnsupportedContentType { kind: &'static str, given: String },

    #[snafu(display("Invalid record: {}", msg))]
    InvalidRecord { msg: String },

    #[snafu(display("Invalid {} name '{}': {}", kind, name, msg))]
    InvalidName {
        kind: &'static str,
        name: String,
        msg: String,
    },

    #[snafu(display("Invalid resource id: {}", source))]
    InvalidResourceId {
        #[snafu(source(from(configstore::Error, Box::new)))]
        source: Box<configstore::Error>,
    },

    #[snafu(display("AU configuration for '{}' sent to '{}'", given, name))]
    MismatchedAuid { name: String, given: String },

    #[snafu(display("{}", source))]
    InvalidPeerIdentity { source: identity::Error },

    #[snafu(display("Unknown agreement type '{}'", given))]
    UnknownAgreementType { given: String },

    #[snafu(display("Invalid {} header '{}': {}", header, value, msg))]
    InvalidPrecondition {
        header: &'static str,
        value: String,
        msg: String,
    },

    // =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

    // Outcomes of the conditional-access checks
    #[snafu(display("Found no '{}' in data store", id))]
    NotFound { id: String },

    #[snafu(display("{} precondition failed for '{}'", header, id))]
    PreconditionFailed { id: String, header: Header },

    #[snafu(display("'{}' was changed by another writer: {}", id, source))]
    Conflict {
        id: String,
        #[snafu(source(from(configstore::Error, Box::new)))]
        source: Box<configstore::Error>,
    },

    #[snafu(display("'{}' was changed by another writer during the request", id))]
    ChangedDuringRequest { id: String },

    // =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

    // Unsupported operations
    #[snafu(display("{} is not supported on {} resources", method, kind))]
    UnsupportedMethod { kind: &'static str, method: Method },

    #[snafu(display("Config section '{}' is read-only", name))]
    ReadOnlySection { name: String },

    #[snafu(display("{} is not supported for this resource type", strategy))]
    UnsupportedStrategy { strategy: Strategy },

    // =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

    // Internal errors
    #[snafu(display("Data store error during {}: {}", op, source))]
    DataStore {
        op: String,
        #[snafu(source(from(configstore::Error, Box::new)))]
        source: Box<configstore::Error>,
    },

    #[snafu(display("Stored value of '{}' is unreadable: {}", id, msg))]
    StoredValue { id: String, msg: String },

    #[snafu(display("Error serializing {}: {}", given, source))]
    Serialization {
        given: String,
        source: serde_json::Error,
    },

    #[snafu(display("Unable to build '{}' header: {}", name, source))]
    HeaderValue {
        name: &'static str,
        source: http::header::InvalidHeaderValue,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// The named outcome families a failed request falls into.  Callers that speak HTTP can use
/// `status_code` to pick a response status.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    ValidationError,
    NotFound,
    PreconditionFailed,
    UnsupportedOperation,
    StoreUnavailable,
}

impl ErrorKind {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            ErrorKind::UnsupportedOperation => StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::StoreUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ValidationError => "bad request",
            ErrorKind::NotFound => "not found",
            ErrorKind::PreconditionFailed => "precondition failed",
            ErrorKind::UnsupportedOperation => "unsupported operation",
            ErrorKind::StoreUnavailable => "internal error",
        };
        write!(f, "{}", name)
    }
}

impl Error {
    /// Maps our error types to the outcome family they belong to.
    pub fn kind(&self) -> ErrorKind {
        use self::Error::*;
        match self {
            MissingPayload { .. } => ErrorKind::ValidationError,
            InvalidJson { .. } => ErrorKind::ValidationError,
            UnsupportedContentType { .. } => ErrorKind::ValidationError,
            InvalidRecord { .. } => ErrorKind::ValidationError,
            InvalidName { .. } => ErrorKind::ValidationError,
            InvalidResourceId { .. } => ErrorKind::ValidationError,
            MismatchedAuid { .. } => ErrorKind::ValidationError,
            InvalidPeerIdentity { .. } => ErrorKind::ValidationError,
            UnknownAgreementType { .. } => ErrorKind::ValidationError,
            InvalidPrecondition { .. } => ErrorKind::ValidationError,

            NotFound { .. } => ErrorKind::NotFound,

            PreconditionFailed { .. } => ErrorKind::PreconditionFailed,
            Conflict { .. } => ErrorKind::PreconditionFailed,
            ChangedDuringRequest { .. } => ErrorKind::PreconditionFailed,

            UnsupportedMethod { .. } => ErrorKind::UnsupportedOperation,
            ReadOnlySection { .. } => ErrorKind::UnsupportedOperation,
            UnsupportedStrategy { .. } => ErrorKind::UnsupportedOperation,

            DataStore { .. } => ErrorKind::StoreUnavailable,
            StoredValue { .. } => ErrorKind::StoreUnavailable,
            Serialization { .. } => ErrorKind::StoreUnavailable,
            HeaderValue { .. } => ErrorKind::StoreUnavailable,
        }
    }

    /// The HTTP status a routing layer should answer with for this error.
    pub fn status_code(&self) -> StatusCode {
        self.kind().status_code()
    }
}

/// Sorts errors from the resource store into conflicts, which are precondition failures from the
/// caller's point of view, and everything else, which the caller can't do anything about.
pub(crate) fn from_store<S: Into<String>>(id: S, op: &str, err: configstore::Error) -> Error {
    match err {
        configstore::Error::Conflict { .. } => Error::Conflict {
            id: id.into(),
            source: Box::new(err),
        },
        _ => Error::DataStore {
            op: op.to_string(),
            source: Box::new(err),
        },
    }
}
