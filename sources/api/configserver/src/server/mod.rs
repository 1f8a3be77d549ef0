//! The server module owns the request surface.  A routing layer (or the configctl CLI) builds a
//! `Request`, picks a resource kind, and hands both to `ResourceService`, which validates the
//! request and runs it against the resource store through the server::controller module.

mod controller;
pub mod envelope;
mod error;
pub mod http_date;
pub mod kinds;
pub mod merge;
pub mod precondition;

pub use envelope::Envelope;
pub use error::{Error, ErrorKind, Result};
pub use kinds::{KindName, ResourceKind};
pub use precondition::{ETagSet, Preconditions};

use bytes::Bytes;
use configstore::{ResourceId, ResourceStore, VersionStamp};
use kinds::{AuAgreements, AuConfig, AuState, AuSuspectUrls, ConfigSection, NoAuPeers, UserAccount};
use log::{debug, trace};
use merge::Strategy;
use snafu::{ensure, OptionExt, ResultExt};
use std::fmt;
use std::str::FromStr;

use crate::config::ServiceConfig;
use crate::identity::IdentityResolver;

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The HTTP methods the service answers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            _ => Err(format!(
                "unknown method '{}', expected GET, PUT, PATCH, or DELETE",
                s
            )),
        }
    }
}

impl TryFrom<&http::Method> for Method {
    type Error = String;

    fn try_from(method: &http::Method) -> std::result::Result<Self, Self::Error> {
        method.as_str().parse()
    }
}

/// The body of a write request.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    /// The Content-Type the client labeled the body with, if any.
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl Payload {
    pub fn new<B: Into<Bytes>>(body: B) -> Self {
        Self {
            content_type: None,
            body: body.into(),
        }
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// One request against one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub name: String,
    pub preconditions: Preconditions,
    pub payload: Option<Payload>,
}

impl Request {
    pub fn new<S: Into<String>>(method: Method, name: S) -> Self {
        Self {
            method,
            name: name.into(),
            preconditions: Preconditions::none(),
            payload: None,
        }
    }

    pub fn get<S: Into<String>>(name: S) -> Self {
        Self::new(Method::Get, name)
    }

    pub fn put<S: Into<String>, B: Into<Bytes>>(name: S, body: B) -> Self {
        Self::new(Method::Put, name).with_payload(Payload::new(body))
    }

    pub fn patch<S: Into<String>, B: Into<Bytes>>(name: S, body: B) -> Self {
        Self::new(Method::Patch, name).with_payload(Payload::new(body))
    }

    pub fn delete<S: Into<String>>(name: S) -> Self {
        Self::new(Method::Delete, name)
    }

    pub fn with_preconditions(mut self, preconditions: Preconditions) -> Self {
        self.preconditions = preconditions;
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// What a request that didn't fail produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A read found the resource.
    Found(Envelope),
    /// A read was short-circuited because the client's copy, at this stamp, is current.
    NotModified(VersionStamp),
    /// A write was stored at a new stamp; `created` says whether the resource was new.
    Stored { stamp: VersionStamp, created: bool },
    /// A delete finished; `existed` says whether there was anything to delete.
    Deleted { existed: bool },
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Runs requests against a resource store.  Everything it needs is handed to it at construction;
/// nothing is looked up from process-wide state.
pub struct ResourceService<S: ResourceStore> {
    store: S,
    resolver: Box<dyn IdentityResolver + Send + Sync>,
    config_sections: ConfigSection,
}

impl<S: ResourceStore> ResourceService<S> {
    pub fn new(
        store: S,
        resolver: Box<dyn IdentityResolver + Send + Sync>,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            config_sections: ConfigSection::new(config.read_only_sections.clone()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Handles a request against a resource of kind `K`.
    ///
    /// Everything that can be checked without the store is checked first: the name, whether
    /// the kind supports the method, whether the resource is writable, and the payload.  A
    /// request that fails any of those never touches the store.
    pub fn handle<K: ResourceKind>(&self, kind: &K, request: Request) -> Result<Outcome> {
        let Request {
            method,
            name,
            preconditions,
            payload,
        } = request;
        debug!("{} {}/{}", method, K::SCOPE, name);
        trace!("Preconditions: {:?}", preconditions);

        kind.check_name(&name)?;
        let id = ResourceId::new(K::SCOPE, &name).context(error::InvalidResourceIdSnafu)?;

        let strategy = match method {
            Method::Get => return controller::read(&self.store, kind, &id, &preconditions),
            Method::Delete => {
                kind.check_writable(&name)?;
                return controller::delete(&self.store, &id, &preconditions);
            }
            Method::Put => Strategy::Replace,
            Method::Patch => kind
                .patch_strategy()
                .context(error::UnsupportedMethodSnafu {
                    kind: K::SCOPE,
                    method,
                })?,
        };
        kind.check_writable(&name)?;

        let payload = payload.context(error::MissingPayloadSnafu { method })?;
        if let Some(content_type) = &payload.content_type {
            ensure!(
                kind.accepts_content_type(content_type),
                error::UnsupportedContentTypeSnafu {
                    kind: K::SCOPE,
                    given: content_type,
                }
            );
        }
        let value = kind.decode(&name, &payload.body, self.resolver.as_ref())?;

        controller::write(
            &self.store,
            kind,
            &id,
            &preconditions,
            value,
            strategy,
            self.resolver.as_ref(),
        )
    }

    /// Handles a request against a kind chosen at runtime.
    pub fn handle_named(&self, kind: KindName, request: Request) -> Result<Outcome> {
        match kind {
            KindName::ConfigSection => self.handle(&self.config_sections, request),
            KindName::AuConfig => self.handle(&AuConfig, request),
            KindName::AuState => self.handle(&AuState, request),
            KindName::AuAgreements => self.handle(&AuAgreements, request),
            KindName::AuSuspectUrls => self.handle(&AuSuspectUrls, request),
            KindName::NoAuPeers => self.handle(&NoAuPeers, request),
            KindName::UserAccount => self.handle(&UserAccount, request),
        }
    }

    /// Lists every AU configuration.
    pub fn list_au_configs(&self) -> Result<Envelope> {
        controller::list_au_configs(&self.store, self.resolver.as_ref())
    }
}

impl<S: ResourceStore + fmt::Debug> fmt::Debug for ResourceService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceService")
            .field("store", &self.store)
            .field("config_sections", &self.config_sections)
            .finish()
    }
}
