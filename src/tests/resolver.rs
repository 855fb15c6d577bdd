use super::common::{package, resolver, resolver_with_locks, FakeSource};
use crate::config::VersionLockDirectory;
use crate::manifest::MISSING_SHASUM;
use std::sync::Arc;

fn published() -> Arc<FakeSource> {
    let source = FakeSource::new();
    for version in ["1.0.0", "1.2.0", "2.0.0"] {
        source.publish(package("kit", version, &[]));
    }
    source
}

#[test]
fn lock_replaces_matching_version() {
    let mut locks = VersionLockDirectory::default();
    locks.lock("kit", "^1.0.0", "2.0.0");
    let resolver = resolver_with_locks(published(), locks);
    let manifest = resolver.resolve("kit@^1.0.0").unwrap().unwrap();
    assert_eq!(manifest.version, "2.0.0");
}

#[test]
fn lock_without_matching_range_keeps_resolution() {
    let mut locks = VersionLockDirectory::default();
    locks.lock("kit", "^1.0.0", "1.0.0");
    let resolver = resolver_with_locks(published(), locks);
    assert_eq!(resolver.resolve("kit@^2.0.0").unwrap().unwrap().version, "2.0.0");
    assert_eq!(resolver.resolve("kit@1.0.0").unwrap().unwrap().version, "1.0.0");
}

#[test]
fn cyclic_locks_terminate() {
    let mut locks = VersionLockDirectory::default();
    locks.lock("kit", "^1.0.0", "2.0.0");
    locks.lock("kit", "^2.0.0", "1.2.0");
    let resolver = resolver_with_locks(published(), locks);
    let manifest = resolver.resolve("kit@^1.0.0").unwrap().unwrap();
    assert_eq!(manifest.version, "1.2.0");
}

#[test]
fn same_tag_asks_the_source_once() {
    let source = published();
    let resolver = resolver(source.clone());
    for _ in 0..3 {
        assert_eq!(resolver.resolve("kit@^1.0.0").unwrap().unwrap().version, "1.2.0");
    }
    assert!(resolver.resolve("nope@*").unwrap().is_none());
    assert!(resolver.resolve("nope@*").unwrap().is_none());
    assert_eq!(source.queries().len(), 2);
}

#[test]
fn concurrent_lookups_collapse() {
    let source = published();
    let resolver = resolver(source.clone());
    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| resolver.resolve("kit@*").unwrap());
        }
    });
    assert_eq!(source.queries().len(), 1);
}

#[test]
fn forgotten_failures_are_asked_again() {
    let source = published();
    source.break_package("kit");
    let resolver = resolver(source.clone());
    assert!(resolver.resolve("kit@^1.0.0").is_err());

    source.repair("kit");
    assert!(resolver.resolve("kit@^1.0.0").is_err(), "failures stay memoised");
    assert_eq!(resolver.forget_failures(), 1);
    assert_eq!(resolver.resolve("kit@^1.0.0").unwrap().unwrap().version, "1.2.0");
    assert_eq!(resolver.forget_failures(), 0);
}

#[test]
fn git_sources_carry_integrity_sentinel() {
    let resolver = resolver(published());
    let manifest = resolver.resolve("kit@github:acme/kit#v2").unwrap().unwrap();
    let dist = manifest.dist.as_ref().unwrap();
    assert_eq!(dist.tarball, "https://codeload.github.com/acme/kit/tar.gz/v2");
    assert_eq!(dist.shasum.as_deref(), Some(MISSING_SHASUM));
    assert_eq!(manifest.integrity(), None);
}

#[test]
fn invalid_tag_is_an_error() {
    let resolver = resolver(published());
    assert!(resolver.resolve("").is_err());
}
