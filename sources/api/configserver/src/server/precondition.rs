//! The precondition module decides whether a request may touch a resource, given the
//! conditional headers the client sent and the resource's current version stamp.
//!
//! Rules are checked in a fixed order and the first one that decides wins:
//!
//! 1. If-Match: the resource must exist, and its ETag must be one of the listed ones (or the
//!    list must be `*`).
//! 2. If-Unmodified-Since: the resource must not have changed after the given time.  A write to
//!    an absent resource fails this check; a read ignores it.
//! 3. Writes with If-None-Match: `*` means the resource must not exist yet, and a listed ETag
//!    that matches the current one fails the write.
//! 4. Reads with If-None-Match: a match (or `*` on an existing resource) means the client's copy
//!    is current, so the read is short-circuited as not modified.
//! 5. Reads with If-Modified-Since, only when If-None-Match was not sent: a resource that hasn't
//!    changed after the given time is not modified.
//! 6. Otherwise the request proceeds.

use configstore::VersionStamp;
use http::header::{HeaderMap, IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_UNMODIFIED_SINCE};
use http::HeaderName;
use log::{trace, warn};
use snafu::ensure;
use std::fmt;

use super::error::{self, Result};
use super::http_date::{parse_http_date, truncate_to_second};

pub const WILDCARD: &str = "*";

/// The ETags listed in an If-Match or If-None-Match header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ETagSet {
    /// `*`, matching any existing version.
    Any,
    /// Literal ETags, unquoted.  Matching is any-of.
    Tags(Vec<String>),
}

impl ETagSet {
    /// Builds a set of literal ETags.  Surrounding quotes are removed if present.
    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ETagSet::Tags(tags.into_iter().map(|t| unquote(t.as_ref())).collect())
    }

    /// Parses a header value: either the wildcard or a comma-separated list of quoted ETags.
    /// Unquoted tokens are accepted as-is.  Weak tags (`W/"..."`) are kept as literals and so
    /// never match, since we only issue strong ETags.
    pub fn parse(header: &'static str, value: &str) -> Result<Self> {
        let tokens: Vec<&str> = value
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();

        if tokens.contains(&WILDCARD) {
            ensure!(
                tokens.len() == 1,
                error::InvalidPreconditionSnafu {
                    header,
                    value,
                    msg: "'*' can't be combined with other ETags",
                }
            );
            return Ok(ETagSet::Any);
        }
        Ok(Self::tags(tokens))
    }

    /// An empty list constrains nothing, same as not sending the header.
    pub fn is_empty(&self) -> bool {
        match self {
            ETagSet::Any => false,
            ETagSet::Tags(tags) => tags.is_empty(),
        }
    }

    /// Whether the set matches an existing resource with the given ETag.
    pub fn matches(&self, etag: &str) -> bool {
        match self {
            ETagSet::Any => true,
            ETagSet::Tags(tags) => tags.iter().any(|t| t == etag),
        }
    }

    fn merge(self, other: ETagSet) -> ETagSet {
        match (self, other) {
            (ETagSet::Any, _) | (_, ETagSet::Any) => ETagSet::Any,
            (ETagSet::Tags(mut ours), ETagSet::Tags(theirs)) => {
                ours.extend(theirs);
                ETagSet::Tags(ours)
            }
        }
    }
}

fn unquote(tag: &str) -> String {
    let tag = tag.trim();
    tag.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(tag)
        .to_string()
}

/// The conditions a client attached to a request.  Absent fields constrain nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preconditions {
    pub if_match: Option<ETagSet>,
    pub if_none_match: Option<ETagSet>,
    /// Milliseconds since the epoch.
    pub if_modified_since: Option<i64>,
    /// Milliseconds since the epoch.
    pub if_unmodified_since: Option<i64>,
}

impl Preconditions {
    pub fn none() -> Self {
        Default::default()
    }

    pub fn if_match(mut self, tags: ETagSet) -> Self {
        self.if_match = Some(tags);
        self
    }

    pub fn if_none_match(mut self, tags: ETagSet) -> Self {
        self.if_none_match = Some(tags);
        self
    }

    pub fn if_modified_since(mut self, millis: i64) -> Self {
        self.if_modified_since = Some(millis);
        self
    }

    pub fn if_unmodified_since(mut self, millis: i64) -> Self {
        self.if_unmodified_since = Some(millis);
        self
    }

    /// Reads the four conditional headers from a request's headers.  A header may be repeated;
    /// repeated ETag headers are combined.  Dates that can't be parsed are ignored, as HTTP
    /// requires, but malformed ETag lists are rejected.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self> {
        Ok(Self {
            if_match: etag_header(headers, IF_MATCH, "If-Match")?,
            if_none_match: etag_header(headers, IF_NONE_MATCH, "If-None-Match")?,
            if_modified_since: date_header(headers, IF_MODIFIED_SINCE, "If-Modified-Since")?,
            if_unmodified_since: date_header(
                headers,
                IF_UNMODIFIED_SINCE,
                "If-Unmodified-Since",
            )?,
        })
    }
}

fn header_str<'a>(
    value: &'a http::HeaderValue,
    header: &'static str,
) -> Result<&'a str> {
    value.to_str().map_err(|_| error::Error::InvalidPrecondition {
        header,
        value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
        msg: "not visible ASCII".to_string(),
    })
}

fn etag_header(
    headers: &HeaderMap,
    name: HeaderName,
    header: &'static str,
) -> Result<Option<ETagSet>> {
    let mut result: Option<ETagSet> = None;
    for value in headers.get_all(name).iter() {
        let parsed = ETagSet::parse(header, header_str(value, header)?)?;
        result = Some(match result {
            Some(existing) => existing.merge(parsed),
            None => parsed,
        });
    }
    Ok(result)
}

fn date_header(
    headers: &HeaderMap,
    name: HeaderName,
    header: &'static str,
) -> Result<Option<i64>> {
    let value = match headers.get(name) {
        Some(value) => header_str(value, header)?,
        None => return Ok(None),
    };
    let parsed = parse_http_date(value);
    if parsed.is_none() {
        warn!("Ignoring {} header with invalid date '{}'", header, value);
    }
    Ok(parsed)
}

/// Whether a request reads or changes the resource.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Verb {
    Read,
    Write,
}

/// The header whose check failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Header {
    IfMatch,
    IfNoneMatch,
    IfUnmodifiedSince,
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Header::IfMatch => "If-Match",
            Header::IfNoneMatch => "If-None-Match",
            Header::IfUnmodifiedSince => "If-Unmodified-Since",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Verdict {
    Proceed,
    NotModified,
    PreconditionFailed(Header),
}

/// Decides whether a request may proceed against a resource whose current stamp is `current`
/// (None if the resource doesn't exist).
pub fn evaluate(
    preconditions: &Preconditions,
    current: Option<&VersionStamp>,
    verb: Verb,
) -> Verdict {
    let verdict = check(preconditions, current, verb);
    trace!(
        "{:?} against {:?} with {:?}: {:?}",
        verb,
        current,
        preconditions,
        verdict
    );
    verdict
}

fn check(preconditions: &Preconditions, current: Option<&VersionStamp>, verb: Verb) -> Verdict {
    let if_match = preconditions.if_match.as_ref().filter(|s| !s.is_empty());
    let if_none_match = preconditions.if_none_match.as_ref().filter(|s| !s.is_empty());

    if let Some(if_match) = if_match {
        match current {
            Some(stamp) if if_match.matches(stamp.etag()) => {}
            // Includes If-Match: * against an absent resource.
            _ => return Verdict::PreconditionFailed(Header::IfMatch),
        }
    }

    if let Some(since) = preconditions.if_unmodified_since {
        match current {
            Some(stamp) if unchanged_since(stamp, since) => {}
            Some(_) => return Verdict::PreconditionFailed(Header::IfUnmodifiedSince),
            None if verb == Verb::Write => {
                return Verdict::PreconditionFailed(Header::IfUnmodifiedSince)
            }
            None => {}
        }
    }

    match verb {
        Verb::Write => {
            if let (Some(if_none_match), Some(stamp)) = (if_none_match, current) {
                if if_none_match.matches(stamp.etag()) {
                    return Verdict::PreconditionFailed(Header::IfNoneMatch);
                }
            }
        }
        Verb::Read => {
            if let Some(if_none_match) = if_none_match {
                if let Some(stamp) = current {
                    if if_none_match.matches(stamp.etag()) {
                        return Verdict::NotModified;
                    }
                }
            } else if let (Some(since), Some(stamp)) =
                (preconditions.if_modified_since, current)
            {
                if unchanged_since(stamp, since) {
                    return Verdict::NotModified;
                }
            }
        }
    }

    Verdict::Proceed
}

/// Dates only carry whole seconds, so both sides are compared at that resolution.  A client
/// echoing back our Last-Modified header names the same second its stamp falls in.
fn unchanged_since(stamp: &VersionStamp, since: i64) -> bool {
    truncate_to_second(stamp.last_modified_ms()) <= truncate_to_second(since)
}

#[cfg(test)]
mod test {
    use crate::server::http_date::format_http_date;
    use super::*;
    use http::HeaderValue;

    fn stamp() -> VersionStamp {
        VersionStamp::from_millis(1_697_040_000_123)
    }

    fn tags(tags: &[&str]) -> ETagSet {
        ETagSet::tags(tags)
    }

    #[test]
    fn no_preconditions_proceed() {
        let none = Preconditions::none();
        assert_eq!(evaluate(&none, Some(&stamp()), Verb::Read), Verdict::Proceed);
        assert_eq!(evaluate(&none, None, Verb::Read), Verdict::Proceed);
        assert_eq!(evaluate(&none, Some(&stamp()), Verb::Write), Verdict::Proceed);
        assert_eq!(evaluate(&none, None, Verb::Write), Verdict::Proceed);
    }

    #[test]
    fn if_match_any_of() {
        let s = stamp();
        for list in &[
            vec![s.etag(), "0"],
            vec!["0", s.etag()],
            vec![s.etag()],
        ] {
            let p = Preconditions::none().if_match(tags(list));
            assert_eq!(evaluate(&p, Some(&s), Verb::Write), Verdict::Proceed);
            assert_eq!(evaluate(&p, Some(&s), Verb::Read), Verdict::Proceed);
        }

        let p = Preconditions::none().if_match(tags(&["0", "1"]));
        assert_eq!(
            evaluate(&p, Some(&s), Verb::Write),
            Verdict::PreconditionFailed(Header::IfMatch)
        );
    }

    #[test]
    fn if_match_requires_existence() {
        for set in vec![ETagSet::Any, tags(&["0"])] {
            let p = Preconditions::none().if_match(set);
            for verb in &[Verb::Read, Verb::Write] {
                assert_eq!(
                    evaluate(&p, None, *verb),
                    Verdict::PreconditionFailed(Header::IfMatch)
                );
            }
        }
        let p = Preconditions::none().if_match(ETagSet::Any);
        assert_eq!(evaluate(&p, Some(&stamp()), Verb::Write), Verdict::Proceed);
    }

    #[test]
    fn empty_lists_are_absent() {
        let p = Preconditions::none()
            .if_match(ETagSet::Tags(vec![]))
            .if_none_match(ETagSet::Tags(vec![]));
        assert_eq!(evaluate(&p, None, Verb::Write), Verdict::Proceed);
        assert_eq!(evaluate(&p, Some(&stamp()), Verb::Read), Verdict::Proceed);
    }

    #[test]
    fn if_unmodified_since() {
        let s = stamp();
        let ms = s.last_modified_ms();

        let p = Preconditions::none().if_unmodified_since(ms);
        assert_eq!(evaluate(&p, Some(&s), Verb::Write), Verdict::Proceed);

        // Same second, so unchanged as far as a date can tell.
        let p = Preconditions::none().if_unmodified_since(ms - 1);
        assert_eq!(evaluate(&p, Some(&s), Verb::Write), Verdict::Proceed);

        let p = Preconditions::none().if_unmodified_since(ms - 1000);
        assert_eq!(
            evaluate(&p, Some(&s), Verb::Write),
            Verdict::PreconditionFailed(Header::IfUnmodifiedSince)
        );

        // Nothing to compare against.
        let p = Preconditions::none().if_unmodified_since(ms);
        assert_eq!(
            evaluate(&p, None, Verb::Write),
            Verdict::PreconditionFailed(Header::IfUnmodifiedSince)
        );
        assert_eq!(evaluate(&p, None, Verb::Read), Verdict::Proceed);
    }

    #[test]
    fn if_match_checked_before_if_unmodified_since() {
        let p = Preconditions::none()
            .if_match(tags(&["0"]))
            .if_unmodified_since(0);
        assert_eq!(
            evaluate(&p, Some(&stamp()), Verb::Write),
            Verdict::PreconditionFailed(Header::IfMatch)
        );
    }

    #[test]
    fn create_only_write() {
        let p = Preconditions::none().if_none_match(ETagSet::Any);
        assert_eq!(evaluate(&p, None, Verb::Write), Verdict::Proceed);
        assert_eq!(
            evaluate(&p, Some(&stamp()), Verb::Write),
            Verdict::PreconditionFailed(Header::IfNoneMatch)
        );
    }

    #[test]
    fn write_if_none_match_literal() {
        let s = stamp();
        let p = Preconditions::none().if_none_match(tags(&["0", s.etag()]));
        assert_eq!(
            evaluate(&p, Some(&s), Verb::Write),
            Verdict::PreconditionFailed(Header::IfNoneMatch)
        );
        let p = Preconditions::none().if_none_match(tags(&["0"]));
        assert_eq!(evaluate(&p, Some(&s), Verb::Write), Verdict::Proceed);
    }

    #[test]
    fn read_if_none_match() {
        let s = stamp();
        let p = Preconditions::none().if_none_match(tags(&[s.etag()]));
        assert_eq!(evaluate(&p, Some(&s), Verb::Read), Verdict::NotModified);

        let p = Preconditions::none().if_none_match(tags(&["0", s.etag()]));
        assert_eq!(evaluate(&p, Some(&s), Verb::Read), Verdict::NotModified);

        let p = Preconditions::none().if_none_match(tags(&["0"]));
        assert_eq!(evaluate(&p, Some(&s), Verb::Read), Verdict::Proceed);

        let p = Preconditions::none().if_none_match(ETagSet::Any);
        assert_eq!(evaluate(&p, Some(&s), Verb::Read), Verdict::NotModified);
        // Absent resources fall through, and the read reports not found.
        assert_eq!(evaluate(&p, None, Verb::Read), Verdict::Proceed);
    }

    #[test]
    fn read_if_modified_since() {
        let s = stamp();
        let ms = s.last_modified_ms();

        let p = Preconditions::none().if_modified_since(ms);
        assert_eq!(evaluate(&p, Some(&s), Verb::Read), Verdict::NotModified);

        let p = Preconditions::none().if_modified_since(ms - 1);
        assert_eq!(evaluate(&p, Some(&s), Verb::Read), Verdict::NotModified);

        let p = Preconditions::none().if_modified_since(ms - 1000);
        assert_eq!(evaluate(&p, Some(&s), Verb::Read), Verdict::Proceed);

        // Writes don't look at it.
        let p = Preconditions::none().if_modified_since(ms);
        assert_eq!(evaluate(&p, Some(&s), Verb::Write), Verdict::Proceed);
    }

    #[test]
    fn if_none_match_overrides_if_modified_since() {
        let s = stamp();
        let p = Preconditions::none()
            .if_none_match(tags(&["0"]))
            .if_modified_since(s.last_modified_ms() + 1000);
        assert_eq!(evaluate(&p, Some(&s), Verb::Read), Verdict::Proceed);
    }

    #[test]
    fn echoed_last_modified() {
        let s = stamp();
        let date = format_http_date(s.last_modified_ms());
        let mut headers = HeaderMap::new();
        headers.insert(IF_MODIFIED_SINCE, HeaderValue::from_str(&date).unwrap());
        headers.insert(IF_UNMODIFIED_SINCE, HeaderValue::from_str(&date).unwrap());
        let p = Preconditions::from_headers(&headers).unwrap();

        assert_eq!(evaluate(&p, Some(&s), Verb::Read), Verdict::NotModified);
        assert_eq!(evaluate(&p, Some(&s), Verb::Write), Verdict::Proceed);

        // A write one second later is a change.
        let later = VersionStamp::from_millis(s.last_modified_ms() + 1000);
        assert_eq!(evaluate(&p, Some(&later), Verb::Read), Verdict::Proceed);
        assert_eq!(
            evaluate(&p, Some(&later), Verb::Write),
            Verdict::PreconditionFailed(Header::IfUnmodifiedSince)
        );
    }

    #[test]
    fn parse_etag_lists() {
        assert_eq!(ETagSet::parse("If-Match", "*").unwrap(), ETagSet::Any);
        assert_eq!(
            ETagSet::parse("If-Match", "\"123\", \"456\"").unwrap(),
            tags(&["123", "456"])
        );
        assert_eq!(
            ETagSet::parse("If-Match", "123,,\"456\"").unwrap(),
            tags(&["123", "456"])
        );
        assert_eq!(
            ETagSet::parse("If-Match", "W/\"123\"").unwrap(),
            ETagSet::Tags(vec!["W/\"123\"".to_string()])
        );
        assert_eq!(ETagSet::parse("If-Match", "").unwrap(), tags(&[]));
        ETagSet::parse("If-Match", "*, \"123\"").unwrap_err();
    }

    #[test]
    fn from_headers() {
        let mut headers = HeaderMap::new();
        headers.append(IF_MATCH, HeaderValue::from_static("\"1\""));
        headers.append(IF_MATCH, HeaderValue::from_static("\"2\", \"3\""));
        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("*"));
        headers.insert(
            IF_MODIFIED_SINCE,
            HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"),
        );
        headers.insert(IF_UNMODIFIED_SINCE, HeaderValue::from_static("not a date"));

        let p = Preconditions::from_headers(&headers).unwrap();
        assert_eq!(p.if_match, Some(tags(&["1", "2", "3"])));
        assert_eq!(p.if_none_match, Some(ETagSet::Any));
        assert_eq!(p.if_modified_since, Some(784_111_777_000));
        assert_eq!(p.if_unmodified_since, None);

        assert_eq!(
            Preconditions::from_headers(&HeaderMap::new()).unwrap(),
            Preconditions::none()
        );
    }
}
