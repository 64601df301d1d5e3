//! End-to-end revision lifecycle: commit, historical reads, rollback,
//! durability across reopen, and the raw on-disk layout guarantees.

use revdb::config::{
    BOOTSTRAP_SLOT_SIZE, DATA_FILE_NAME, FIRST_BEACON, LENGTH_PREFIX_SIZE, PAGE_FRAGMENT_ALIGN,
    REVISION_OFFSET_ENTRY_SIZE, REVISION_OFFSET_FILE_NAME, REVISION_ROOT_ALIGN,
};
use revdb::{Resource, StorageError};
use tempfile::TempDir;

fn commit_n(resource: &Resource, n: u64) {
    for i in 1..=n {
        let mut trx = resource.begin().unwrap();
        trx.insert_record(i, format!("record-{}", i).into_bytes());
        assert_eq!(trx.commit().unwrap(), resource.latest_revision().unwrap());
    }
}

#[test]
fn every_revision_stays_readable_after_later_commits() {
    let dir = TempDir::new().unwrap();
    let resource = Resource::create(dir.path()).unwrap();
    commit_n(&resource, 5);

    for revision in 1..=5u64 {
        let read = resource.read(revision).unwrap();
        assert_eq!(read.revision(), revision);
        assert_eq!(read.record_count(), revision as usize);
        for key in 1..=revision {
            assert_eq!(
                read.record(key),
                Some(format!("record-{}", key).as_bytes())
            );
        }
        assert_eq!(read.record(revision + 1), None);
    }
}

#[test]
fn reopen_from_disk_preserves_the_full_history() {
    let dir = TempDir::new().unwrap();
    {
        let resource = Resource::create(dir.path()).unwrap();
        commit_n(&resource, 3);
    }

    let resource = Resource::open(dir.path()).unwrap();
    assert_eq!(resource.latest_revision().unwrap(), 3);
    assert_eq!(
        resource.read(1).unwrap().record(1),
        Some(b"record-1".as_slice())
    );
    assert_eq!(resource.read(3).unwrap().record_count(), 3);

    // And it keeps accepting commits.
    let mut trx = resource.begin().unwrap();
    trx.insert_record(42, b"post-reopen".to_vec());
    assert_eq!(trx.commit().unwrap(), 4);
}

#[test]
fn truncation_keeps_survivors_byte_identical() {
    let dir = TempDir::new().unwrap();
    let resource = Resource::create(dir.path()).unwrap();
    commit_n(&resource, 5);

    let data_path = dir.path().join(DATA_FILE_NAME);
    let before = std::fs::read(&data_path).unwrap();

    resource.truncate_to(2).unwrap();

    // The surviving prefix of the data file is untouched except for the
    // bootstrap slot.
    let after = std::fs::read(&data_path).unwrap();
    assert!(after.len() < before.len());
    assert_eq!(
        &after[BOOTSTRAP_SLOT_SIZE as usize..],
        &before[BOOTSTRAP_SLOT_SIZE as usize..after.len()]
    );

    // The offset side file shrank in lockstep.
    let ofs = std::fs::metadata(dir.path().join(REVISION_OFFSET_FILE_NAME)).unwrap();
    assert_eq!(ofs.len(), 2 * REVISION_OFFSET_ENTRY_SIZE);

    assert_eq!(resource.latest_revision().unwrap(), 2);
    let read = resource.read(2).unwrap();
    assert_eq!(read.record(2), Some(b"record-2".as_slice()));

    let err = resource.read(3).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StorageError>(),
        Some(StorageError::RevisionNotFound {
            revision: 3,
            latest: 2
        })
    ));
}

#[test]
fn revision_lookup_works_without_the_side_file() {
    let dir = TempDir::new().unwrap();
    let resource = Resource::create(dir.path()).unwrap();
    commit_n(&resource, 4);
    let expected: Vec<_> = (1..=4u64)
        .map(|r| resource.read(r).unwrap().commit_timestamp_millis())
        .collect();

    // Losing revisions.ofs degrades lookup to the uber chain walk.
    std::fs::write(dir.path().join(REVISION_OFFSET_FILE_NAME), []).unwrap();
    let resource = Resource::open(dir.path()).unwrap();
    for revision in 1..=4u64 {
        let read = resource.read(revision).unwrap();
        assert_eq!(read.revision(), revision);
        assert_eq!(
            read.commit_timestamp_millis(),
            expected[revision as usize - 1]
        );
    }
}

#[test]
fn data_file_layout_holds_its_alignment_rules() {
    let dir = TempDir::new().unwrap();
    let resource = Resource::create(dir.path()).unwrap();
    commit_n(&resource, 3);

    let raw = std::fs::read(dir.path().join(DATA_FILE_NAME)).unwrap();

    // The bootstrap slot points inside the file, past the beacon, at a
    // fragment-aligned offset.
    let slot = u64::from_le_bytes(raw[..8].try_into().unwrap());
    assert!(slot >= FIRST_BEACON);
    assert!(slot < raw.len() as u64);
    assert_eq!(slot % PAGE_FRAGMENT_ALIGN, 0);

    // Revision-root offsets in the side file satisfy the coarse alignment.
    let ofs = std::fs::read(dir.path().join(REVISION_OFFSET_FILE_NAME)).unwrap();
    assert_eq!(ofs.len() as u64, 3 * REVISION_OFFSET_ENTRY_SIZE);
    for entry in ofs.chunks_exact(REVISION_OFFSET_ENTRY_SIZE as usize) {
        let offset = u64::from_le_bytes(entry.try_into().unwrap());
        assert_eq!(offset % REVISION_ROOT_ALIGN, 0);
        // Its length prefix frames a record that ends inside the file.
        let prefix_end = offset + LENGTH_PREFIX_SIZE;
        let len = u32::from_le_bytes(
            raw[offset as usize..prefix_end as usize].try_into().unwrap(),
        ) as u64;
        assert!(prefix_end + len <= raw.len() as u64);
    }
}

#[test]
fn corrupting_a_committed_record_is_detected_on_read() {
    let dir = TempDir::new().unwrap();
    let resource = Resource::create(dir.path()).unwrap();
    commit_n(&resource, 1);
    drop(resource);

    // Flip a byte just past the beacon, inside the first record's body.
    let data_path = dir.path().join(DATA_FILE_NAME);
    let mut raw = std::fs::read(&data_path).unwrap();
    let victim = FIRST_BEACON as usize + LENGTH_PREFIX_SIZE as usize + 1;
    raw[victim] ^= 0x40;
    std::fs::write(&data_path, raw).unwrap();

    let resource = Resource::open(dir.path()).unwrap();
    let err = resource.read(1).unwrap_err();
    let storage = err.downcast_ref::<StorageError>().unwrap();
    assert!(storage.is_corruption(), "unexpected error: {}", storage);
}
