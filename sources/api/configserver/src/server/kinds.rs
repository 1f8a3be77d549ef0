//! The kinds of resource the service stores, and what's specific to each: the scope its
//! resources live in, which names are valid, how payloads are decoded and validated, how values
//! are encoded for storage, and which merge strategy PATCH uses.
//!
//! Kinds are selected statically; the orchestrator is generic over `ResourceKind`, and callers
//! that only have a kind's name go through `KindName`.

use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use super::envelope::{APPLICATION_JSON, TEXT_PLAIN, TEXT_XML};
use super::error::{self, Error, Result};
use super::merge::{apply_patch, replace_only, KeyedCollection, Record, Strategy};
use crate::identity::{IdentityResolver, PeerId};

/// Behavior specific to one kind of resource.
pub trait ResourceKind {
    /// The decoded, validated form of a payload.
    type Value;

    /// The store scope holding resources of this kind; also the kind's name in messages.
    const SCOPE: &'static str;

    /// Checks a resource name before anything else happens with a request.
    fn check_name(&self, name: &str) -> Result<()>;

    /// The strategy PATCH uses, or None if PATCH isn't supported.
    fn patch_strategy(&self) -> Option<Strategy> {
        None
    }

    /// Checks whether the named resource may be changed at all.
    fn check_writable(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    /// Decodes and validates a payload, either one sent by a client or one read back from the
    /// store.  Peer identities are canonicalized with `resolver`.
    fn decode(
        &self,
        name: &str,
        payload: &[u8],
        resolver: &dyn IdentityResolver,
    ) -> Result<Self::Value>;

    /// Encodes a value into the bytes we store and return to readers.
    fn encode(&self, value: &Self::Value) -> Result<Vec<u8>>;

    /// Combines the stored value with an incoming one.
    fn merge(
        &self,
        _existing: Option<Self::Value>,
        patch: Self::Value,
        strategy: Strategy,
    ) -> Result<Self::Value> {
        replace_only(patch, strategy)
    }

    /// Whether a client may send a payload labeled with `content_type`.
    fn accepts_content_type(&self, content_type: &str) -> bool {
        media_type(content_type).eq_ignore_ascii_case(APPLICATION_JSON)
    }

    /// The content type of stored bytes, as returned to readers.
    fn content_type(&self, _payload: &[u8]) -> &'static str {
        APPLICATION_JSON
    }
}

/// The media type of a Content-Type value, without parameters.
fn media_type(content_type: &str) -> &str {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
}

fn decode_json<'a, T: Deserialize<'a>>(kind: &'static str, payload: &'a [u8]) -> Result<T> {
    serde_json::from_slice(payload).context(error::InvalidJsonSnafu { kind })
}

fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).context(error::SerializationSnafu {
        given: std::any::type_name::<T>(),
    })
}

fn decode_record(kind: &'static str, payload: &[u8]) -> Result<Record> {
    Record::from_json(decode_json(kind, payload)?)
}

/// Checks that `name` is an AUID, i.e. `pluginKey&auKey` with both parts non-empty and no
/// whitespace anywhere.
pub fn check_auid(kind: &'static str, name: &str) -> Result<()> {
    let (plugin, au) = name.split_once('&').context(error::InvalidNameSnafu {
        kind,
        name,
        msg: "AUID must look like 'pluginKey&auKey'",
    })?;
    ensure!(
        !plugin.is_empty() && !au.is_empty(),
        error::InvalidNameSnafu {
            kind,
            name,
            msg: "AUID plugin and AU keys must be non-empty",
        }
    );
    ensure!(
        !name.chars().any(char::is_whitespace),
        error::InvalidNameSnafu {
            kind,
            name,
            msg: "AUID can't contain whitespace",
        }
    );
    Ok(())
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Daemon configuration sections, e.g. "expert" or "cluster".  These are files the daemons read
/// as-is, so we keep the bytes untouched.
#[derive(Debug, Clone, Default)]
pub struct ConfigSection {
    read_only: BTreeSet<String>,
}

impl ConfigSection {
    pub fn new(read_only: BTreeSet<String>) -> Self {
        Self { read_only }
    }
}

impl ResourceKind for ConfigSection {
    type Value = Vec<u8>;
    const SCOPE: &'static str = "config";

    fn check_name(&self, name: &str) -> Result<()> {
        ensure!(
            !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
            error::InvalidNameSnafu {
                kind: Self::SCOPE,
                name,
                msg: "section names may only contain letters, digits, '_', and '-'",
            }
        );
        Ok(())
    }

    fn check_writable(&self, name: &str) -> Result<()> {
        ensure!(
            !self.read_only.contains(name),
            error::ReadOnlySectionSnafu { name }
        );
        Ok(())
    }

    fn accepts_content_type(&self, content_type: &str) -> bool {
        let media = media_type(content_type).to_ascii_lowercase();
        media.starts_with("text/") || media == "application/xml"
    }

    fn decode(&self, _name: &str, payload: &[u8], _: &dyn IdentityResolver) -> Result<Vec<u8>> {
        Ok(payload.to_vec())
    }

    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(value.clone())
    }

    fn content_type(&self, payload: &[u8]) -> &'static str {
        match payload.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'<') => TEXT_XML,
            _ => TEXT_PLAIN,
        }
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The configuration of one archival unit: its AUID and its parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuConfiguration {
    #[serde(rename = "auId")]
    pub auid: String,
    #[serde(rename = "auConfig", default)]
    pub au_config: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuConfig;

impl ResourceKind for AuConfig {
    type Value = AuConfiguration;
    const SCOPE: &'static str = "au-config";

    fn check_name(&self, name: &str) -> Result<()> {
        check_auid(Self::SCOPE, name)
    }

    fn decode(
        &self,
        name: &str,
        payload: &[u8],
        _: &dyn IdentityResolver,
    ) -> Result<AuConfiguration> {
        let config: AuConfiguration = decode_json(Self::SCOPE, payload)?;
        ensure!(
            config.auid == name,
            error::MismatchedAuidSnafu {
                name,
                given: config.auid,
            }
        );
        Ok(config)
    }

    fn encode(&self, value: &AuConfiguration) -> Result<Vec<u8>> {
        encode_json(value)
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Per-AU state the daemons track, like crawl and poll times.  Fields are updated independently.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuState;

impl ResourceKind for AuState {
    type Value = Record;
    const SCOPE: &'static str = "au-state";

    fn check_name(&self, name: &str) -> Result<()> {
        check_auid(Self::SCOPE, name)
    }

    fn patch_strategy(&self) -> Option<Strategy> {
        Some(Strategy::FieldMerge)
    }

    fn decode(&self, _name: &str, payload: &[u8], _: &dyn IdentityResolver) -> Result<Record> {
        decode_record(Self::SCOPE, payload)
    }

    fn encode(&self, value: &Record) -> Result<Vec<u8>> {
        encode_json(value)
    }

    fn merge(&self, existing: Option<Record>, patch: Record, strategy: Strategy) -> Result<Record> {
        apply_patch(existing, patch, strategy)
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The kinds of poll agreement measured with a peer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AgreementType {
    Por,
    Pop,
    SymmetricPor,
    SymmetricPop,
    PorHint,
    PopHint,
    SymmetricPorHint,
    SymmetricPopHint,
    WPor,
    WPop,
    WPorHint,
    WPopHint,
    WSymmetricPor,
    WSymmetricPop,
    WSymmetricPorHint,
    WSymmetricPopHint,
}

impl AgreementType {
    pub const ALL: [AgreementType; 16] = [
        AgreementType::Por,
        AgreementType::Pop,
        AgreementType::SymmetricPor,
        AgreementType::SymmetricPop,
        AgreementType::PorHint,
        AgreementType::PopHint,
        AgreementType::SymmetricPorHint,
        AgreementType::SymmetricPopHint,
        AgreementType::WPor,
        AgreementType::WPop,
        AgreementType::WPorHint,
        AgreementType::WPopHint,
        AgreementType::WSymmetricPor,
        AgreementType::WSymmetricPop,
        AgreementType::WSymmetricPorHint,
        AgreementType::WSymmetricPopHint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgreementType::Por => "POR",
            AgreementType::Pop => "POP",
            AgreementType::SymmetricPor => "SYMMETRIC_POR",
            AgreementType::SymmetricPop => "SYMMETRIC_POP",
            AgreementType::PorHint => "POR_HINT",
            AgreementType::PopHint => "POP_HINT",
            AgreementType::SymmetricPorHint => "SYMMETRIC_POR_HINT",
            AgreementType::SymmetricPopHint => "SYMMETRIC_POP_HINT",
            AgreementType::WPor => "W_POR",
            AgreementType::WPop => "W_POP",
            AgreementType::WPorHint => "W_POR_HINT",
            AgreementType::WPopHint => "W_POP_HINT",
            AgreementType::WSymmetricPor => "W_SYMMETRIC_POR",
            AgreementType::WSymmetricPop => "W_SYMMETRIC_POP",
            AgreementType::WSymmetricPorHint => "W_SYMMETRIC_POR_HINT",
            AgreementType::WSymmetricPopHint => "W_SYMMETRIC_POP_HINT",
        }
    }
}

impl FromStr for AgreementType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        AgreementType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .context(error::UnknownAgreementTypeSnafu { given: s })
    }
}

impl fmt::Display for AgreementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One agreement measurement with a peer.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerAgreement {
    pub percent_agreement: f64,
    pub percent_agreement_time: i64,
    pub highest_percent_agreement: f64,
    pub highest_percent_agreement_time: i64,
}

pub type Agreements = KeyedCollection<(PeerId, AgreementType), PeerAgreement>;

// The wire form: peer -> agreement type -> agreement.
type WireAgreements = BTreeMap<String, BTreeMap<String, PeerAgreement>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct AuAgreements;

impl ResourceKind for AuAgreements {
    type Value = Agreements;
    const SCOPE: &'static str = "au-agreements";

    fn check_name(&self, name: &str) -> Result<()> {
        check_auid(Self::SCOPE, name)
    }

    fn patch_strategy(&self) -> Option<Strategy> {
        Some(Strategy::KeyMerge)
    }

    /// Every key is validated here, so a patch with one bad peer or agreement type is refused
    /// as a whole.
    fn decode(
        &self,
        _name: &str,
        payload: &[u8],
        resolver: &dyn IdentityResolver,
    ) -> Result<Agreements> {
        let wire: WireAgreements = decode_json(Self::SCOPE, payload)?;
        let mut agreements = Agreements::new();
        for (peer, by_type) in wire {
            let peer = resolver
                .resolve(&peer)
                .context(error::InvalidPeerIdentitySnafu)?;
            for (agreement_type, agreement) in by_type {
                agreements.insert((peer, agreement_type.parse()?), agreement);
            }
        }
        Ok(agreements)
    }

    fn encode(&self, value: &Agreements) -> Result<Vec<u8>> {
        let mut wire: BTreeMap<String, BTreeMap<&'static str, PeerAgreement>> = BTreeMap::new();
        for ((peer, agreement_type), agreement) in value {
            wire.entry(peer.to_string())
                .or_default()
                .insert(agreement_type.as_str(), *agreement);
        }
        encode_json(&wire)
    }

    fn merge(
        &self,
        existing: Option<Agreements>,
        patch: Agreements,
        strategy: Strategy,
    ) -> Result<Agreements> {
        apply_patch(existing, patch, strategy)
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// A version of a URL whose content failed hash verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspectUrlVersion {
    pub url: String,
    pub version: u32,
    #[serde(default)]
    pub created: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_hash: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspectUrlVersions {
    #[serde(default)]
    pub suspect_versions: Vec<SuspectUrlVersion>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuSuspectUrls;

impl ResourceKind for AuSuspectUrls {
    type Value = SuspectUrlVersions;
    const SCOPE: &'static str = "au-suspect-urls";

    fn check_name(&self, name: &str) -> Result<()> {
        check_auid(Self::SCOPE, name)
    }

    fn decode(
        &self,
        _name: &str,
        payload: &[u8],
        _: &dyn IdentityResolver,
    ) -> Result<SuspectUrlVersions> {
        let versions: SuspectUrlVersions = decode_json(Self::SCOPE, payload)?;
        if let Some(bad) = versions.suspect_versions.iter().find(|v| v.url.is_empty()) {
            return error::InvalidRecordSnafu {
                msg: format!("suspect version {} has an empty URL", bad.version),
            }
            .fail();
        }
        Ok(versions)
    }

    fn encode(&self, value: &SuspectUrlVersions) -> Result<Vec<u8>> {
        encode_json(value)
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Peers known not to have an AU.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuPeers;

impl ResourceKind for NoAuPeers {
    type Value = BTreeSet<PeerId>;
    const SCOPE: &'static str = "au-noau-peers";

    fn check_name(&self, name: &str) -> Result<()> {
        check_auid(Self::SCOPE, name)
    }

    fn decode(
        &self,
        _name: &str,
        payload: &[u8],
        resolver: &dyn IdentityResolver,
    ) -> Result<BTreeSet<PeerId>> {
        let peers: Vec<String> = decode_json(Self::SCOPE, payload)?;
        peers
            .iter()
            .map(|p| resolver.resolve(p).context(error::InvalidPeerIdentitySnafu))
            .collect()
    }

    fn encode(&self, value: &BTreeSet<PeerId>) -> Result<Vec<u8>> {
        encode_json(value)
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Accounts of users of the daemons' web interfaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserAccount;

/// The record field naming the account; must agree with the resource name when present.
pub const USER_NAME_FIELD: &str = "userName";

impl ResourceKind for UserAccount {
    type Value = Record;
    const SCOPE: &'static str = "user-account";

    fn check_name(&self, name: &str) -> Result<()> {
        ensure!(
            !name.is_empty() && !name.chars().any(char::is_whitespace),
            error::InvalidNameSnafu {
                kind: Self::SCOPE,
                name,
                msg: "user names must be non-empty and contain no whitespace",
            }
        );
        Ok(())
    }

    fn patch_strategy(&self) -> Option<Strategy> {
        Some(Strategy::FieldMerge)
    }

    fn decode(&self, name: &str, payload: &[u8], _: &dyn IdentityResolver) -> Result<Record> {
        let record = decode_record(Self::SCOPE, payload)?;
        if let Some(given) = record.get(USER_NAME_FIELD) {
            ensure!(
                given.as_str() == Some(name),
                error::InvalidRecordSnafu {
                    msg: format!("'{}' is {}, not '{}'", USER_NAME_FIELD, given, name),
                }
            );
        }
        Ok(record)
    }

    fn encode(&self, value: &Record) -> Result<Vec<u8>> {
        encode_json(value)
    }

    fn merge(&self, existing: Option<Record>, patch: Record, strategy: Strategy) -> Result<Record> {
        apply_patch(existing, patch, strategy)
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Names of the kinds, for callers that pick a kind at runtime, like a CLI or a router.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KindName {
    ConfigSection,
    AuConfig,
    AuState,
    AuAgreements,
    AuSuspectUrls,
    NoAuPeers,
    UserAccount,
}

impl KindName {
    pub const ALL: [KindName; 7] = [
        KindName::ConfigSection,
        KindName::AuConfig,
        KindName::AuState,
        KindName::AuAgreements,
        KindName::AuSuspectUrls,
        KindName::NoAuPeers,
        KindName::UserAccount,
    ];

    pub fn scope(&self) -> &'static str {
        match self {
            KindName::ConfigSection => ConfigSection::SCOPE,
            KindName::AuConfig => AuConfig::SCOPE,
            KindName::AuState => AuState::SCOPE,
            KindName::AuAgreements => AuAgreements::SCOPE,
            KindName::AuSuspectUrls => AuSuspectUrls::SCOPE,
            KindName::NoAuPeers => NoAuPeers::SCOPE,
            KindName::UserAccount => UserAccount::SCOPE,
        }
    }
}

impl FromStr for KindName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        KindName::ALL
            .iter()
            .find(|k| k.scope() == s)
            .copied()
            .ok_or_else(|| {
                let known: Vec<_> = KindName::ALL.iter().map(KindName::scope).collect();
                format!("unknown kind '{}', expected one of: {}", s, known.join(", "))
            })
    }
}

impl fmt::Display for KindName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scope())
    }
}
