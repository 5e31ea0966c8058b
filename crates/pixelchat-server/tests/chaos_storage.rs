//! Channels keep serving from memory while persistence fails at random.

mod common;

use common::{TestEnv, channel};
use pixelchat_proto::Message;
use pixelchat_render::ViewportClass;
use pixelchat_server::{Channel, ChannelError, ChaoticStorage, MemoryStorage, Storage, StorageError};

/// With this seed the two reads done while loading succeed and later writes
/// fail about half the time.
const SEED: u64 = 688;

fn chaotic() -> ChaoticStorage<MemoryStorage> {
    ChaoticStorage::with_seed(MemoryStorage::new(), 0.5, SEED)
}

#[test]
fn failed_writes_stay_in_memory() {
    let env = TestEnv::new(1);
    let storage = chaotic();
    let ch = channel("chaos", &env, storage.clone());

    let mut failures = 0;
    for i in 0..40 {
        match ch.append(Message::text("alice", i.to_string())) {
            Ok(_) => {},
            Err(ChannelError::Persistence(StorageError::Io(_))) => failures += 1,
            Err(e) => panic!("unexpected error {e}"),
        }
    }

    assert!(failures > 0, "seed should inject failures");
    assert_eq!(ch.messages().len(), 40);

    let persisted = storage.inner().load_messages("chaos").unwrap();
    assert_eq!(persisted.len(), 40 - failures);

    let in_memory: Vec<u64> = ch.messages().iter().map(|m| m.id).collect();
    assert!(persisted.iter().all(|m| in_memory.contains(&m.id)));
    assert!(persisted.windows(2).all(|w| w[0].id < w[1].id));
    assert_eq!(storage.operation_count(), 42);
}

#[test]
fn refresh_publishes_after_failed_write() {
    let env = TestEnv::new(2);
    let ch = channel("chaos", &env, chaotic());

    let mut failed = None;
    for i in 0..10 {
        if let Err(ChannelError::Persistence(_)) = ch.append(Message::text("alice", i.to_string())) {
            failed = Some(i.to_string());
            break;
        }
    }
    let failed = failed.expect("seed should inject a failure within ten writes");

    assert!(ch.refresh());
    assert!(ch.last_frame(ViewportClass::Narrow).is_some());
    assert_eq!(ch.messages().last().map(|m| m.text.clone()), Some(failed));
}

#[test]
fn load_failure_is_reported() {
    let env = TestEnv::new(3);
    let storage = ChaoticStorage::new(MemoryStorage::new(), 1.0);

    let loaded = Channel::load("lobby", env, storage, common::renderer(), Default::default());
    assert!(matches!(loaded, Err(StorageError::Io(_))));
}
