//! Peer identities, as they appear in agreement maps and no-AU peer sets.
//!
//! The wire form is `TCP:[<ip>]:<port>`.  Resolving an identity parses and canonicalizes it, so
//! two spellings of the same peer (e.g. differently written IPv6 addresses) end up under one key
//! when collections are merged.

use serde::{Serialize, Serializer};
use snafu::{OptionExt, ResultExt};
use std::fmt;
use std::net::IpAddr;

pub mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub enum Error {
        #[snafu(display("Peer identity '{}' must look like 'TCP:[<ip>]:<port>'", given))]
        Format { given: String },

        #[snafu(display("Peer identity '{}' has an invalid IP address: {}", given, source))]
        Address {
            given: String,
            source: std::net::AddrParseError,
        },

        #[snafu(display("Peer identity '{}' has an invalid port: {}", given, msg))]
        Port { given: String, msg: String },
    }
}
pub use error::Error;

type Result<T> = std::result::Result<T, error::Error>;

const PROTOCOL_PREFIX: &str = "TCP:[";

/// A peer in the preservation network, identified by the address it listens on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    addr: IpAddr,
    port: u16,
}

impl PeerId {
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self { addr, port }
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TCP:[{}]:{}", self.addr, self.port)
    }
}

impl Serialize for PeerId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Turns the string form of a peer identity into a PeerId.
pub trait IdentityResolver {
    fn resolve(&self, given: &str) -> Result<PeerId>;
}

/// Resolves identities of peers speaking the current (V3) protocol, which are always TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct V3IdentityResolver;

impl IdentityResolver for V3IdentityResolver {
    fn resolve(&self, given: &str) -> Result<PeerId> {
        let rest = given
            .trim()
            .strip_prefix(PROTOCOL_PREFIX)
            .context(error::FormatSnafu { given })?;
        let (addr, port) = rest.rsplit_once("]:").context(error::FormatSnafu { given })?;

        let addr: IpAddr = addr.parse().context(error::AddressSnafu { given })?;
        let port: u16 = port.parse().map_err(|e: std::num::ParseIntError| {
            error::PortSnafu {
                given,
                msg: e.to_string(),
            }
            .build()
        })?;
        if port == 0 {
            return error::PortSnafu {
                given,
                msg: "port 0 is reserved",
            }
            .fail();
        }

        Ok(PeerId::new(addr, port))
    }
}
