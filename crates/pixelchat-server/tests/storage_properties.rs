//! Properties shared by every storage backend.

use pixelchat_proto::Message;
use pixelchat_server::{MemoryStorage, RedbStorage, Storage};
use proptest::prelude::*;
use tempfile::tempdir;

const NAMES: [&str; 4] = ["lobby", "rust", "pixel", "\u{4f60}\u{597d}"];

fn text(id: u64) -> Message {
    Message { id, unix_time: 1_700_000_000, ..Message::text("prop", id.to_string()) }
}

/// Apply `ops` and check the recency index and bucket bounds.
fn check<S: Storage>(storage: &S, ops: &[(usize, i64)], keep: usize) -> Result<(), TestCaseError> {
    let mut expected: std::collections::HashMap<&str, i64> = std::collections::HashMap::new();

    for (id, (channel, secs)) in ops.iter().enumerate() {
        let name = NAMES[*channel];
        storage.append_message(name, &text(id as u64 + 1), *secs, keep).unwrap();
        expected.insert(name, *secs);
    }

    let recent = storage.recent_channels(usize::MAX).unwrap();
    prop_assert_eq!(recent.len(), expected.len());
    prop_assert!(recent.windows(2).all(|w| w[0].1 >= w[1].1));
    for (name, secs) in &recent {
        prop_assert_eq!(expected.get(name.as_str()), Some(secs));
        prop_assert_eq!(storage.last_active(name).unwrap(), Some(*secs));
        let stored = storage.load_messages(name).unwrap();
        prop_assert!(stored.len() <= keep);
        prop_assert!(stored.windows(2).all(|w| w[0].id < w[1].id));
    }
    prop_assert_eq!(storage.channel_count().unwrap(), expected.len());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_memory_index_one_entry_per_channel(
        ops in prop::collection::vec((0usize..4, 0i64..20), 1..60),
        keep in 1usize..8,
    ) {
        check(&MemoryStorage::new(), &ops, keep)?;
    }

    #[test]
    fn prop_redb_index_one_entry_per_channel(
        ops in prop::collection::vec((0usize..4, 0i64..20), 1..30),
        keep in 1usize..8,
    ) {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("prop.redb")).unwrap();
        check(&storage, &ops, keep)?;
    }
}

#[test]
fn same_timestamp_twice_is_idempotent() {
    let dir = tempdir().unwrap();
    let storage = RedbStorage::open(dir.path().join("idem.redb")).unwrap();

    storage.append_message("lobby", &text(1), 500, 50).unwrap();
    storage.append_message("lobby", &text(2), 500, 50).unwrap();

    assert_eq!(storage.recent_channels(10).unwrap(), vec![("lobby".to_string(), 500)]);
}

#[test]
fn backends_agree() {
    let dir = tempdir().unwrap();
    let redb = RedbStorage::open(dir.path().join("agree.redb")).unwrap();
    let memory = MemoryStorage::new();

    for (id, channel) in [(1, "a"), (2, "b"), (3, "a"), (4, "c"), (5, "a")] {
        redb.append_message(channel, &text(id), id as i64, 2).unwrap();
        memory.append_message(channel, &text(id), id as i64, 2).unwrap();
    }

    assert_eq!(redb.recent_channels(10).unwrap(), memory.recent_channels(10).unwrap());
    for channel in ["a", "b", "c"] {
        assert_eq!(redb.load_messages(channel).unwrap(), memory.load_messages(channel).unwrap());
    }
}
