/*!
# Background

configserver serves the configuration resources that a fleet of preservation daemons share:
daemon config sections, archival unit (AU) configurations, per-AU state, poll agreements with
peers, suspect URL versions, no-AU peer sets, and user accounts.

Several daemons and operators may read and write the same resource at once.  Rather than locking,
clients use HTTP conditional requests: each resource carries a version stamp, exposed as an
`ETag` and a `Last-Modified` time, and requests can carry `If-Match`, `If-None-Match`,
`If-Modified-Since`, and `If-Unmodified-Since` headers.  A read whose client copy is current is
answered "not modified" without loading the resource.  A write whose preconditions don't hold
changes nothing.

Resources that hold records or keyed collections can also be updated partially with PATCH; the
fields or keys named in the request overwrite the stored ones and everything else is kept.

# Library

The `server` module holds the request surface.  `ResourceService` takes a `Request` for a
resource kind, validates it, and runs it against a `configstore::ResourceStore`.  The pieces it
uses are public for routing layers that want them directly:

* `server::precondition` evaluates conditional headers against a version stamp.
* `server::merge` combines stored values with incoming ones.
* `server::envelope` renders results as headers plus body, or as a multipart body.
* `server::kinds` defines each resource kind's names, payloads, and PATCH behavior.

`Error::status_code` gives the HTTP status for each kind of failure.

The `configctl` binary drives the service from the command line against a filesystem store.

# Current limitations

* There's no HTTP listener here; routing requests to `ResourceService` is left to the embedder.
* ETags are strong and derived from the last-modified time, so weak comparison isn't supported.
*/

pub mod config;
pub mod identity;
pub mod server;

pub use config::ServiceConfig;
pub use identity::{IdentityResolver, PeerId, V3IdentityResolver};
pub use server::{
    Envelope, Error, ErrorKind, KindName, Method, Outcome, Payload, Preconditions, Request,
    ResourceService, Result,
};
