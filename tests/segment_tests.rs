//! Tests for shared-memory segment creation policies and error taxonomy

use hermod::{
    memory::{AccessPolicy, Segment, SegmentConfig, SEGMENT_NAME_MAX},
    HermodError, SegmentError,
};

fn unique_name(tag: &str) -> String {
    format!("/hermod_seg_{}_{}", tag, std::process::id())
}

fn config(name: &str, policy: AccessPolicy) -> SegmentConfig {
    SegmentConfig::new(name, 64 * 1024, policy)
}

#[test]
fn test_empty_name_has_no_side_effects() {
    let err = Segment::new(1, config("", AccessPolicy::ExclusiveCreate));
    assert!(matches!(
        err,
        Err(HermodError::Segment {
            kind: SegmentError::EmptyName,
            ..
        })
    ));
}

#[test]
fn test_name_without_leading_slash() {
    let err = Segment::new(1, config("foo", AccessPolicy::ExclusiveCreate));
    assert!(matches!(
        err,
        Err(HermodError::Segment {
            kind: SegmentError::NameWithoutLeadingSlash,
            ..
        })
    ));
}

#[test]
fn test_exclusive_create_conflicts() {
    let name = unique_name("excl");
    let _segment = Segment::new(1, config(&name, AccessPolicy::PurgeAndCreate)).unwrap();

    let err = Segment::new(2, config(&name, AccessPolicy::ExclusiveCreate));
    assert!(matches!(
        err,
        Err(HermodError::Segment {
            kind: SegmentError::AlreadyExists,
            ..
        })
    ));
}

#[test]
fn test_open_requires_existing() {
    let err = Segment::new(1, config(&unique_name("absent"), AccessPolicy::Open));
    assert!(matches!(
        err,
        Err(HermodError::Segment {
            kind: SegmentError::DoesNotExist,
            ..
        })
    ));
}

#[test]
fn test_create_or_open_falls_back_to_non_owner() {
    let name = unique_name("coop");
    let owner = Segment::new(1, config(&name, AccessPolicy::PurgeAndCreate)).unwrap();
    assert!(owner.has_ownership());

    let attached = Segment::new(2, config(&name, AccessPolicy::CreateOrOpen)).unwrap();
    assert!(!attached.has_ownership());
    assert_eq!(attached.size(), owner.size());
}

#[test]
fn test_purge_and_create_takes_ownership() {
    let name = unique_name("purge");
    {
        let first = Segment::new(1, config(&name, AccessPolicy::PurgeAndCreate)).unwrap();
        assert!(first.has_ownership());
        // second purge-and-create replaces the first object
        let second = Segment::new(2, config(&name, AccessPolicy::PurgeAndCreate)).unwrap();
        assert!(second.has_ownership());
    }
    // both owners dropped; the object is gone
    let err = Segment::new(3, config(&name, AccessPolicy::Open));
    assert!(matches!(
        err,
        Err(HermodError::Segment {
            kind: SegmentError::DoesNotExist,
            ..
        })
    ));
}

#[test]
fn test_owner_unlinks_on_drop() {
    let name = unique_name("drop");
    {
        let _segment = Segment::new(1, config(&name, AccessPolicy::ExclusiveCreate)).unwrap();
    }
    assert!(matches!(
        Segment::new(1, config(&name, AccessPolicy::Open)),
        Err(HermodError::Segment {
            kind: SegmentError::DoesNotExist,
            ..
        })
    ));
}

#[test]
fn test_non_owner_does_not_unlink() {
    let name = unique_name("nonowner");
    let owner = Segment::new(1, config(&name, AccessPolicy::PurgeAndCreate)).unwrap();
    {
        let _attached = Segment::new(2, config(&name, AccessPolicy::CreateOrOpen)).unwrap();
    }
    // the object survives the non-owner
    let again = Segment::new(3, config(&name, AccessPolicy::Open)).unwrap();
    assert!(!again.has_ownership());
    drop(owner);
}

#[test]
fn test_maximum_length_name() {
    let mut name = unique_name("max");
    name.push_str(&"x".repeat(SEGMENT_NAME_MAX - name.len()));
    assert_eq!(name.len(), SEGMENT_NAME_MAX);

    let segment = Segment::new(1, config(&name, AccessPolicy::PurgeAndCreate)).unwrap();
    assert_eq!(segment.name(), name);
}

#[test]
fn test_mapping_is_writable() {
    let name = unique_name("write");
    let segment = Segment::new(1, config(&name, AccessPolicy::PurgeAndCreate)).unwrap();

    unsafe {
        let ptr = segment.ptr_at(128);
        ptr.write(0xAB);
        assert_eq!(*segment.ptr_at(128), 0xAB);
    }
    assert_eq!(segment.as_slice()[128], 0xAB);
}
