//! Runs the conditional-access lifecycle of a resource end to end through ResourceService, against
//! both store implementations.

use configserver::server::envelope::stamp_headers;
use configserver::server::precondition::ETagSet;
use configserver::{
    ErrorKind, KindName, Outcome, Preconditions, Request, ResourceService, ServiceConfig,
    V3IdentityResolver,
};
use configstore::{FilesystemResourceStore, MemoryResourceStore, ResourceStore, VersionStamp};
use http::header::{
    HeaderMap, HeaderValue, IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_UNMODIFIED_SINCE,
    LAST_MODIFIED,
};
use serde_json::{json, Value};

const AUID: &str = "org|lockss|plugin|TestPlugin&base_url~http%3A%2F%2Fexample%2Ecom%2F";

fn service<S: ResourceStore>(store: S) -> ResourceService<S> {
    ResourceService::new(
        store,
        Box::new(V3IdentityResolver),
        &ServiceConfig::with_datastore_path("/unused"),
    )
}

fn stored<S: ResourceStore>(service: &ResourceService<S>, request: Request) -> VersionStamp {
    match service.handle_named(KindName::AuAgreements, request).unwrap() {
        Outcome::Stored { stamp, .. } => stamp,
        other => panic!("expected Stored, got {:?}", other),
    }
}

fn found<S: ResourceStore>(service: &ResourceService<S>, request: Request) -> (Value, VersionStamp) {
    match service.handle_named(KindName::AuAgreements, request).unwrap() {
        Outcome::Found(envelope) => (
            serde_json::from_slice(envelope.payload()).unwrap(),
            envelope.stamp().unwrap().clone(),
        ),
        other => panic!("expected Found, got {:?}", other),
    }
}

fn agreement(percent: f64) -> Value {
    json!({"POR": {
        "percentAgreement": percent,
        "percentAgreementTime": 1_697_040_000_000i64,
        "highestPercentAgreement": percent,
        "highestPercentAgreementTime": 1_697_040_000_000i64
    }})
}

fn preconditions(headers: &[(http::HeaderName, &str)]) -> Preconditions {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.append(name.clone(), HeaderValue::from_str(value).unwrap());
    }
    Preconditions::from_headers(&map).unwrap()
}

fn lifecycle<S: ResourceStore>(store: S) {
    let service = service(store);
    let k = "TCP:[10.0.0.1]:9729";
    let j = "TCP:[10.0.0.2]:9729";

    // Absent, then created by an unconditional PUT.
    assert_eq!(
        service
            .handle_named(KindName::AuAgreements, Request::get(AUID))
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
    let body = json!({ k: agreement(0.1), j: agreement(0.2) });
    let s1 = stored(&service, Request::put(AUID, body.to_string()));

    // The client's copy is current.
    let tag = stamp_headers(&s1).unwrap()[http::header::ETAG]
        .to_str()
        .unwrap()
        .to_string();
    let request = Request::get(AUID).with_preconditions(preconditions(&[(IF_NONE_MATCH, tag.as_str())]));
    assert_eq!(
        service
            .handle_named(KindName::AuAgreements, request)
            .unwrap(),
        Outcome::NotModified(s1.clone())
    );

    // Same, by date.
    let date = stamp_headers(&s1).unwrap()[LAST_MODIFIED]
        .to_str()
        .unwrap()
        .to_string();
    let request =
        Request::get(AUID).with_preconditions(preconditions(&[(IF_MODIFIED_SINCE, date.as_str())]));
    assert_eq!(
        service
            .handle_named(KindName::AuAgreements, request)
            .unwrap(),
        Outcome::NotModified(s1.clone())
    );

    // A write against a version that doesn't exist is refused and changes nothing.
    let request = Request::put(AUID, json!({ k: agreement(0.9) }).to_string())
        .with_preconditions(preconditions(&[(IF_MATCH, "\"0\"")]));
    let err = service
        .handle_named(KindName::AuAgreements, request)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    assert_eq!(err.status_code(), http::StatusCode::PRECONDITION_FAILED);
    assert_eq!(found(&service, Request::get(AUID)), (body.clone(), s1.clone()));

    // A PATCH against the current version merges by key.
    let tags = format!("\"0\", {}", tag);
    let request = Request::patch(AUID, json!({ k: agreement(0.5) }).to_string())
        .with_preconditions(preconditions(&[(IF_MATCH, tags.as_str())]));
    let s2 = stored(&service, request);
    assert!(s2.last_modified_ms() > s1.last_modified_ms());

    let (value, stamp) = found(&service, Request::get(AUID));
    assert_eq!(stamp, s2);
    assert_eq!(value, json!({ k: agreement(0.5), j: agreement(0.2) }));

    // The old ETag no longer matches, so a read with it returns the new version.
    let request = Request::get(AUID).with_preconditions(
        Preconditions::none().if_none_match(ETagSet::tags(vec![s1.etag()])),
    );
    assert!(matches!(
        service.handle_named(KindName::AuAgreements, request),
        Ok(Outcome::Found(_))
    ));

    // Create-only writes fail once the resource exists.
    let request = Request::put(AUID, json!({}).to_string())
        .with_preconditions(Preconditions::none().if_none_match(ETagSet::Any));
    assert_eq!(
        service
            .handle_named(KindName::AuAgreements, request)
            .unwrap_err()
            .kind(),
        ErrorKind::PreconditionFailed
    );

    // Guarded delete, then the resource is gone.
    let request = Request::delete(AUID).with_preconditions(
        Preconditions::none().if_match(ETagSet::tags(vec![s2.etag()])),
    );
    assert_eq!(
        service
            .handle_named(KindName::AuAgreements, request)
            .unwrap(),
        Outcome::Deleted { existed: true }
    );
    assert_eq!(
        service
            .handle_named(KindName::AuAgreements, Request::get(AUID))
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn lifecycle_in_memory() {
    lifecycle(MemoryResourceStore::new());
}

#[test]
fn lifecycle_on_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    lifecycle(FilesystemResourceStore::new(dir.path()));
}

#[test]
fn filesystem_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let body = json!({"lastCrawlTime": 1_697_040_000_000i64, "crawlCount": 3});

    let first = {
        let service = service(FilesystemResourceStore::new(dir.path()));
        match service
            .handle_named(KindName::AuState, Request::put(AUID, body.to_string()))
            .unwrap()
        {
            Outcome::Stored { stamp, created } => {
                assert!(created);
                stamp
            }
            other => panic!("expected Stored, got {:?}", other),
        }
    };

    let service = service(FilesystemResourceStore::new(dir.path()));
    let request = Request::patch(AUID, json!({"crawlCount": 4}).to_string())
        .with_preconditions(Preconditions::none().if_match(ETagSet::tags(vec![first.etag()])));
    match service.handle_named(KindName::AuState, request).unwrap() {
        Outcome::Stored { stamp, created } => {
            assert!(!created);
            assert!(stamp.last_modified_ms() > first.last_modified_ms());
        }
        other => panic!("expected Stored, got {:?}", other),
    }

    match service
        .handle_named(KindName::AuState, Request::get(AUID))
        .unwrap()
    {
        Outcome::Found(envelope) => {
            let value: Value = serde_json::from_slice(envelope.payload()).unwrap();
            assert_eq!(
                value,
                json!({"lastCrawlTime": 1_697_040_000_000i64, "crawlCount": 4})
            );
        }
        other => panic!("expected Found, got {:?}", other),
    }
}

fn au_state_stamp<S: ResourceStore>(service: &ResourceService<S>, request: Request) -> VersionStamp {
    match service.handle_named(KindName::AuState, request).unwrap() {
        Outcome::Stored { stamp, .. } => stamp,
        other => panic!("expected Stored, got {:?}", other),
    }
}

#[test]
fn writes_guarded_by_echoed_last_modified() {
    let service = service(MemoryResourceStore::new());
    let mut stamp = au_state_stamp(
        &service,
        Request::put(AUID, json!({"crawlCount": 0}).to_string()),
    );

    // Each write is guarded by the Last-Modified date the previous one returned.
    for count in 1..=5 {
        let date = stamp_headers(&stamp).unwrap()[LAST_MODIFIED]
            .to_str()
            .unwrap()
            .to_string();
        let request = Request::patch(AUID, json!({ "crawlCount": count }).to_string())
            .with_preconditions(preconditions(&[(IF_UNMODIFIED_SINCE, date.as_str())]));
        let next = au_state_stamp(&service, request);
        assert!(next.last_modified_ms() > stamp.last_modified_ms());
        stamp = next;
    }

    // A date from before the resource last changed is refused.
    let before = stamp.last_modified_ms() - 1000;
    let request = Request::put(AUID, json!({"crawlCount": 99}).to_string())
        .with_preconditions(Preconditions::none().if_unmodified_since(before));
    assert_eq!(
        service
            .handle_named(KindName::AuState, request)
            .unwrap_err()
            .kind(),
        ErrorKind::PreconditionFailed
    );
    match service
        .handle_named(KindName::AuState, Request::get(AUID))
        .unwrap()
    {
        Outcome::Found(envelope) => {
            let value: Value = serde_json::from_slice(envelope.payload()).unwrap();
            assert_eq!(value, json!({"crawlCount": 5}));
        }
        other => panic!("expected Found, got {:?}", other),
    }
}

#[test]
fn long_auid_on_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(FilesystemResourceStore::new(dir.path()));
    let mut auid = AUID.to_string();
    while auid.len() < 210 {
        auid.push_str("%7E%26%7C");
    }

    let body = json!({"crawlCount": 1});
    let stamp = au_state_stamp(&service, Request::put(&auid, body.to_string()));
    match service
        .handle_named(KindName::AuState, Request::get(&auid))
        .unwrap()
    {
        Outcome::Found(envelope) => {
            assert_eq!(envelope.stamp(), Some(&stamp));
            let value: Value = serde_json::from_slice(envelope.payload()).unwrap();
            assert_eq!(value, body);
        }
        other => panic!("expected Found, got {:?}", other),
    }
}
