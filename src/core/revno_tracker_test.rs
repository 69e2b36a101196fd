use super::*;

#[test]
fn update_then_find_returns_revno() {
    let mut tracker = RevnoTracker::new();

    for (collection, id, revno) in [
        ("machines", "m-0", 1),
        ("machines", "uuid-1:m-0", 7),
        ("units", "wordpress/0", 42),
        ("units", "uuid-1:wordpress/0", i64::MAX),
    ] {
        tracker.update(collection, id, revno);
        assert_eq!(tracker.find(collection, id), Some(revno));
    }
    assert_eq!(tracker.len(), 4);
}

#[test]
fn never_updated_is_distinct_from_missing_revno() {
    let mut tracker = RevnoTracker::new();

    assert_eq!(tracker.find("machines", "m-0"), None);
    assert_eq!(tracker.find("machines", "uuid:m-0"), None);

    assert!(tracker.update("machines", "m-0", -1));
    assert!(tracker.update("machines", "uuid:m-0", -1));

    assert_eq!(tracker.find("machines", "m-0"), Some(-1));
    assert_eq!(tracker.find("machines", "uuid:m-0"), Some(-1));
}

#[test]
fn unknown_collection_is_not_found() {
    let mut tracker = RevnoTracker::new();
    tracker.update("machines", "m-0", 3);

    assert_eq!(tracker.find("units", "m-0"), None);
    assert!(tracker.opaque_revno("units", "m-0").is_none());
}

#[test]
fn repeated_update_with_same_revno_is_unchanged() {
    let mut tracker = RevnoTracker::new();

    assert!(tracker.update("machines", "uuid:m-0", 5));
    assert!(!tracker.update("machines", "uuid:m-0", 5));
    assert!(tracker.update("machines", "uuid:m-0", 6));
    assert!(!tracker.update("machines", "uuid:m-0", 6));

    assert!(tracker.update("machines", "m-0", 5));
    assert!(!tracker.update("machines", "m-0", 5));
    assert!(tracker.update("machines", "m-0", 4));
}

#[test]
fn removal_then_recreation_is_detected() {
    let mut tracker = RevnoTracker::new();

    assert!(tracker.update("machines", "uuid:m-0", 3));
    assert!(tracker.update("machines", "uuid:m-0", -1));
    assert!(!tracker.update("machines", "uuid:m-0", -1));
    assert!(tracker.update("machines", "uuid:m-0", 0));
}

#[test]
fn tenant_prefixed_ids_are_partitioned() {
    let mut tracker = RevnoTracker::new();

    tracker.update("machines", "tenantA:x", 1);
    tracker.update("machines", "tenantB:x", 2);
    tracker.update("units", "tenantA:x", 3);

    assert_eq!(tracker.find("machines", "tenantA:x"), Some(1));
    assert_eq!(tracker.find("machines", "tenantB:x"), Some(2));
    assert_eq!(tracker.find("units", "tenantA:x"), Some(3));

    assert_eq!(tracker.tenant_revno("machines", "tenantA", "x"), Some(1));
    assert_eq!(tracker.tenant_revno("machines", "tenantB", "x"), Some(2));
    assert_eq!(tracker.opaque_revno("machines", "tenantA:x"), None);
}

#[test]
fn only_first_separator_splits_tenant() {
    let mut tracker = RevnoTracker::new();

    tracker.update("settings", "uuid:a#b:c", 9);

    assert_eq!(tracker.tenant_revno("settings", "uuid", "a#b:c"), Some(9));
    assert_eq!(tracker.find("settings", "uuid:a#b:c"), Some(9));
}

#[test]
fn malformed_tenant_ids_fall_back_to_opaque_storage() {
    let mut tracker = RevnoTracker::new();

    tracker.update("machines", "foo:", 1);
    tracker.update("machines", ":foo", 2);
    tracker.update("machines", "foo", 3);
    tracker.update("machines", ":", 4);

    assert_eq!(tracker.opaque_revno("machines", "foo:"), Some(1));
    assert_eq!(tracker.opaque_revno("machines", ":foo"), Some(2));
    assert_eq!(tracker.opaque_revno("machines", "foo"), Some(3));
    assert_eq!(tracker.opaque_revno("machines", ":"), Some(4));

    assert_eq!(tracker.find("machines", "foo:"), Some(1));
    assert_eq!(tracker.find("machines", ":foo"), Some(2));
    assert_eq!(tracker.find("machines", "foo"), Some(3));
    assert_eq!(tracker.find("machines", ":"), Some(4));

    assert_eq!(tracker.tenant_revno("machines", "foo", ""), None);
    assert_eq!(tracker.tenant_revno("machines", "", "foo"), None);
}

#[test]
fn opaque_and_tenant_ids_coexist_in_one_collection() {
    let mut tracker = RevnoTracker::new();

    tracker.update("machines", "uuid:0", 10);
    tracker.update("machines", "0", 20);

    assert_eq!(tracker.find("machines", "uuid:0"), Some(10));
    assert_eq!(tracker.find("machines", "0"), Some(20));
    assert_eq!(tracker.len(), 2);
    assert!(!tracker.is_empty());
}
