//! End-to-end behaviour of commit, truncate and block writes against a real
//! mount point in a temp dir.

use std::fs;

use strata_store::directory::TagDir;
use strata_store::physical::{inode, link_count, read_block_file};
use strata_store::{
    hash_block, status, BlockBitmap, CommitOutcome, ContentHashIndex, Storage, StorageError,
    StorageOptions, Superblock, TagState,
};
use tempfile::TempDir;

fn formatted() -> (TempDir, Storage) {
    let temp = TempDir::new().unwrap();
    let storage =
        Storage::format(temp.path(), Superblock::default(), StorageOptions::default()).unwrap();
    (temp, storage)
}

fn padded(data: &[u8]) -> Vec<u8> {
    let mut block = data.to_vec();
    block.resize(128, 0);
    block
}

fn bitmap(storage: &Storage) -> BlockBitmap {
    let sb = storage.superblock().unwrap();
    BlockBitmap::load(storage.layout(), &sb).unwrap()
}

/// Every logical block of a committed tag must resolve, by inode, to the
/// block the hash index names for its content.
fn assert_committed_invariant(storage: &Storage, name: &str, tag: &str) {
    let sb = storage.superblock().unwrap();
    let dir = TagDir::new(storage.layout(), name, tag).unwrap();
    let meta = dir.read_metadata().unwrap();
    assert_eq!(meta.state, TagState::Committed);

    let index = ContentHashIndex::load(storage.layout()).unwrap();
    for (i, &block) in meta.blocks.iter().enumerate() {
        let data = read_block_file(&dir.logical_block(i), sb.block_size).unwrap();
        assert_eq!(index.get(&hash_block(&data)), Some(block), "block {i}");
        assert_eq!(
            inode(&dir.logical_block(i)).unwrap(),
            inode(&storage.layout().physical_block(block)).unwrap()
        );
    }
}

#[test]
fn test_scenario_grow_then_commit_zero_blocks() {
    let (_temp, storage) = formatted();

    storage.create_file(1, "f", "v1").unwrap();
    let meta = storage.read_metadata("f", "v1").unwrap();
    assert_eq!(meta.size_bytes, 0);
    assert!(meta.blocks.is_empty());
    assert_eq!(meta.state, TagState::WorkInProgress);

    storage.truncate_file(2, "f", "v1", 300).unwrap();
    let meta = storage.read_metadata("f", "v1").unwrap();
    assert_eq!(meta.size_bytes, 300);
    assert_eq!(meta.blocks, vec![0, 0, 0]);

    let outcome = storage.commit_tag(3, "f", "v1").unwrap();
    assert!(matches!(outcome, CommitOutcome::Committed(_)));

    let meta = storage.read_metadata("f", "v1").unwrap();
    assert_eq!(meta.blocks, vec![0, 0, 0]);
    assert_committed_invariant(&storage, "f", "v1");
    assert!(storage.check().unwrap().is_clean());
}

#[test]
fn test_scenario_commit_missing_tag_mutates_nothing() {
    let (temp, storage) = formatted();
    let index_before = fs::read(temp.path().join("blocks_hash_index.config")).unwrap();
    let bitmap_before = fs::read(temp.path().join("bitmap.bin")).unwrap();

    let err = storage.commit_tag(1, "ghost", "v9").unwrap_err();
    assert_eq!(err.status(), strata_store::status::FILE_TAG_MISSING);

    assert!(!temp.path().join("files/ghost").exists());
    assert_eq!(
        fs::read(temp.path().join("blocks_hash_index.config")).unwrap(),
        index_before
    );
    assert_eq!(fs::read(temp.path().join("bitmap.bin")).unwrap(), bitmap_before);
}

#[test]
fn test_scenario_shrink_keeps_shared_zero_block() {
    let (_temp, storage) = formatted();
    storage.create_file(1, "f", "v1").unwrap();
    storage.truncate_file(2, "f", "v1", 300).unwrap();

    let zero = storage.layout().physical_block(0);
    let links_before = link_count(&zero).unwrap();
    storage.truncate_file(3, "f", "v1", 128).unwrap();

    assert_eq!(link_count(&zero).unwrap(), links_before - 2);
    assert!(!bitmap(&storage).is_free(0).unwrap());
    let dir = TagDir::new(storage.layout(), "f", "v1").unwrap();
    assert_eq!(dir.logical_count().unwrap(), 1);
    assert_eq!(storage.read_metadata("f", "v1").unwrap().size_bytes, 128);
}

#[test]
fn test_commit_is_idempotent_and_skips_shared_state() {
    let (temp, storage) = formatted();
    storage.create_file(1, "f", "v1").unwrap();
    storage.truncate_file(2, "f", "v1", 256).unwrap();
    storage.write_block(3, "f", "v1", 0, b"payload").unwrap();
    storage.commit_tag(4, "f", "v1").unwrap();
    let meta = storage.read_metadata("f", "v1").unwrap();

    // A second commit must not even open the index or the bitmap.
    let index = temp.path().join("blocks_hash_index.config");
    let bitmap_path = temp.path().join("bitmap.bin");
    let saved_index = fs::read(&index).unwrap();
    let saved_bitmap = fs::read(&bitmap_path).unwrap();
    fs::remove_file(&index).unwrap();
    fs::remove_file(&bitmap_path).unwrap();

    assert_eq!(
        storage.commit_tag(5, "f", "v1").unwrap(),
        CommitOutcome::AlreadyCommitted
    );
    assert_eq!(storage.read_metadata("f", "v1").unwrap(), meta);

    fs::write(&index, saved_index).unwrap();
    fs::write(&bitmap_path, saved_bitmap).unwrap();
    assert!(storage.check().unwrap().is_clean());
}

#[test]
fn test_identical_content_converges_and_frees_duplicate() {
    let (_temp, storage) = formatted();
    for tag in ["a", "b"] {
        storage.create_file(1, "f", tag).unwrap();
        storage.truncate_file(2, "f", tag, 128).unwrap();
    }
    let first = storage.write_block(3, "f", "a", 0, b"same bytes").unwrap();
    let second = storage.write_block(4, "f", "b", 0, b"same bytes").unwrap();
    assert_ne!(first, second);

    storage.commit_tag(5, "f", "a").unwrap();
    let outcome = storage.commit_tag(6, "f", "b").unwrap();
    match outcome {
        CommitOutcome::Committed(stats) => {
            assert_eq!(stats.deduplicated, 1);
            assert_eq!(stats.freed, 1);
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let a = TagDir::new(storage.layout(), "f", "a").unwrap();
    let b = TagDir::new(storage.layout(), "f", "b").unwrap();
    assert_eq!(
        inode(&a.logical_block(0)).unwrap(),
        inode(&b.logical_block(0)).unwrap()
    );
    assert!(bitmap(&storage).is_free(second).unwrap());
    assert_eq!(link_count(&storage.layout().physical_block(first)).unwrap(), 3);

    assert_committed_invariant(&storage, "f", "a");
    assert_committed_invariant(&storage, "f", "b");
    assert!(storage.check().unwrap().is_clean());
}

#[test]
fn test_commit_failure_keeps_processed_prefix_and_retry_converges() {
    let (_temp, storage) = formatted();
    storage.create_file(1, "f", "a").unwrap();
    storage.truncate_file(2, "f", "a", 128).unwrap();
    let canonical = storage.write_block(3, "f", "a", 0, b"shared").unwrap();
    storage.commit_tag(4, "f", "a").unwrap();

    storage.create_file(5, "f", "b").unwrap();
    storage.truncate_file(6, "f", "b", 256).unwrap();
    let duplicate = storage.write_block(7, "f", "b", 0, b"shared").unwrap();
    let unique = storage.write_block(8, "f", "b", 1, b"only in b").unwrap();

    let b = TagDir::new(storage.layout(), "f", "b").unwrap();
    fs::remove_file(b.logical_block(1)).unwrap();

    let err = storage.commit_tag(9, "f", "b").unwrap_err();
    assert_eq!(err.status(), status::IO_ERROR);

    // Logical block 0 was relinked before the failure and stays that way.
    let meta = storage.read_metadata("f", "b").unwrap();
    assert_eq!(meta.state, TagState::WorkInProgress);
    assert_eq!(meta.blocks, vec![canonical, unique]);
    assert_eq!(
        inode(&b.logical_block(0)).unwrap(),
        inode(&storage.layout().physical_block(canonical)).unwrap()
    );
    assert!(bitmap(&storage).is_free(duplicate).unwrap());
    let index = ContentHashIndex::load(storage.layout()).unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index.get(&hash_block(&padded(b"shared"))), Some(canonical));

    b.link_logical(1, &storage.layout().physical_block(unique)).unwrap();
    let outcome = storage.commit_tag(10, "f", "b").unwrap();
    assert!(matches!(outcome, CommitOutcome::Committed(stats) if stats.registered == 1));
    assert_committed_invariant(&storage, "f", "a");
    assert_committed_invariant(&storage, "f", "b");
    assert!(storage.check().unwrap().is_clean());
}

#[test]
fn test_commit_refuses_link_that_disagrees_with_metadata() {
    let (_temp, storage) = formatted();
    storage.create_file(1, "f", "v1").unwrap();
    storage.truncate_file(2, "f", "v1", 128).unwrap();
    let block = storage.write_block(3, "f", "v1", 0, b"payload").unwrap();

    let dir = TagDir::new(storage.layout(), "f", "v1").unwrap();
    dir.relink_logical(0, &storage.layout().physical_block(0)).unwrap();

    let err = storage.commit_tag(4, "f", "v1").unwrap_err();
    assert_eq!(err.status(), status::HARD_LINK_FAILED);
    assert!(ContentHashIndex::load(storage.layout()).unwrap().is_empty());

    let meta = storage.read_metadata("f", "v1").unwrap();
    assert_eq!(meta.state, TagState::WorkInProgress);
    assert_eq!(meta.blocks, vec![block]);
}

#[test]
fn test_duplicate_blocks_within_one_tag_collapse() {
    let (_temp, storage) = formatted();
    storage.create_file(1, "f", "v1").unwrap();
    storage.truncate_file(2, "f", "v1", 384).unwrap();
    for i in 0..3 {
        storage.write_block(3, "f", "v1", i, b"repeat").unwrap();
    }
    let free_before = bitmap(&storage).count_free();

    storage.commit_tag(4, "f", "v1").unwrap();
    let meta = storage.read_metadata("f", "v1").unwrap();
    assert_eq!(meta.blocks[0], meta.blocks[1]);
    assert_eq!(meta.blocks[1], meta.blocks[2]);
    assert_eq!(bitmap(&storage).count_free(), free_before + 2);
    assert_committed_invariant(&storage, "f", "v1");
}

#[test]
fn test_fork_edit_commit_keeps_base_intact() {
    let (_temp, storage) = formatted();
    storage.create_file(1, "doc", "v1").unwrap();
    storage.truncate_file(2, "doc", "v1", 256).unwrap();
    storage.write_block(3, "doc", "v1", 0, b"header").unwrap();
    storage.write_block(4, "doc", "v1", 1, b"body v1").unwrap();
    storage.commit_tag(5, "doc", "v1").unwrap();

    storage.tag_file(6, "doc", "v1", "doc", "v2").unwrap();
    storage.write_block(7, "doc", "v2", 1, b"body v2").unwrap();
    storage.commit_tag(8, "doc", "v2").unwrap();

    let v1 = storage.read_metadata("doc", "v1").unwrap();
    let v2 = storage.read_metadata("doc", "v2").unwrap();
    assert_eq!(v1.blocks[0], v2.blocks[0]);
    assert_ne!(v1.blocks[1], v2.blocks[1]);
    assert_eq!(&storage.read_block(9, "doc", "v1", 1).unwrap()[..7], b"body v1");
    assert_eq!(&storage.read_block(9, "doc", "v2", 1).unwrap()[..7], b"body v2");

    assert_committed_invariant(&storage, "doc", "v1");
    assert_committed_invariant(&storage, "doc", "v2");
    assert!(storage.check().unwrap().is_clean());

    assert_eq!(storage.list_tags("doc").unwrap(), vec!["v1", "v2"]);
    assert!(matches!(
        storage.list_tags("nope"),
        Err(StorageError::FileMissing { .. })
    ));
}

#[test]
fn test_committed_tags_reject_mutation() {
    let (_temp, storage) = formatted();
    storage.create_file(1, "f", "v1").unwrap();
    storage.truncate_file(2, "f", "v1", 128).unwrap();
    storage.commit_tag(3, "f", "v1").unwrap();

    assert!(matches!(
        storage.truncate_file(4, "f", "v1", 0),
        Err(StorageError::TagCommitted { .. })
    ));
    assert!(matches!(
        storage.write_block(5, "f", "v1", 0, b"late"),
        Err(StorageError::TagCommitted { .. })
    ));
    assert_eq!(storage.read_metadata("f", "v1").unwrap().blocks, vec![0]);
}

#[test]
fn test_reopen_sees_persisted_state() {
    let (temp, storage) = formatted();
    storage.create_file(1, "f", "v1").unwrap();
    storage.truncate_file(2, "f", "v1", 128).unwrap();
    storage.write_block(3, "f", "v1", 0, b"durable").unwrap();
    storage.commit_tag(4, "f", "v1").unwrap();
    drop(storage);

    let reopened = Storage::open(temp.path(), StorageOptions::default()).unwrap();
    assert_eq!(&reopened.read_block(5, "f", "v1", 0).unwrap()[..7], b"durable");
    assert_eq!(reopened.list_tags("f").unwrap(), vec!["v1".to_string()]);
    assert!(reopened.check().unwrap().is_clean());
}
