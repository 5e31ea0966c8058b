//! Room directory: lazy loading, sharing and the idle purge.

mod common;

use std::sync::Arc;

use common::{TestEnv, peer, renderer};
use pixelchat_proto::Message;
use pixelchat_render::ViewportClass;
use pixelchat_server::{ChannelConfig, DirectoryError, MemoryStorage, RoomDirectory};

fn directory(env: &TestEnv, storage: MemoryStorage) -> RoomDirectory<TestEnv, MemoryStorage> {
    RoomDirectory::new(env.clone(), storage, renderer(), ChannelConfig::default())
}

#[test]
fn open_returns_the_same_channel() {
    let env = TestEnv::new(1);
    let dir = directory(&env, MemoryStorage::new());

    let a = dir.open("lobby").unwrap();
    let b = dir.open("lobby").unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(dir.active_count(), 1);
}

#[test]
fn empty_name_is_rejected() {
    let env = TestEnv::new(2);
    let dir = directory(&env, MemoryStorage::new());

    assert!(matches!(dir.open(""), Err(DirectoryError::InvalidName)));
}

#[test]
fn find_does_not_load() {
    let env = TestEnv::new(3);
    let dir = directory(&env, MemoryStorage::new());

    assert!(dir.find("lobby").is_none());
    assert_eq!(dir.active_count(), 0);
}

#[test]
fn purge_evicts_only_idle_channels() {
    let env = TestEnv::new(4);
    let dir = directory(&env, MemoryStorage::new());

    let busy = dir.open("busy").unwrap();
    let idle = dir.open("idle").unwrap();
    let _viewer = busy.join("alice", ViewportClass::Narrow, peer(1)).unwrap();

    assert_eq!(dir.purge(), 1);

    assert!(idle.is_closed());
    assert!(dir.find("idle").is_none());
    assert!(dir.find("busy").is_some());
    assert_eq!(dir.total_viewers(), 1);
}

#[test]
fn purged_channel_reloads_from_storage() {
    let env = TestEnv::new(5);
    let storage = MemoryStorage::new();
    let dir = directory(&env, storage);

    let first = dir.open("lobby").unwrap();
    first.append(Message::text("alice", "remember me")).unwrap();
    dir.purge();

    let second = dir.open("lobby").unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.messages().len(), 1);
    assert_eq!(second.messages()[0].text, "remember me");
}

#[test]
fn statistics_come_from_storage() {
    let env = TestEnv::new(6);
    let dir = directory(&env, MemoryStorage::new());

    dir.open("old").unwrap().append(Message::text("alice", "a")).unwrap();
    env.advance(10);
    dir.open("new").unwrap().append(Message::text("alice", "b")).unwrap();
    dir.open("quiet").unwrap();

    assert_eq!(dir.channel_count().unwrap(), 2);
    let names: Vec<String> = dir.recent_channels(10).unwrap().into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["new".to_string(), "old".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn purge_task_runs_periodically() {
    let env = TestEnv::new(7);
    let dir = Arc::new(directory(&env, MemoryStorage::new()));
    let config = pixelchat_server::DirectoryConfig::default();

    dir.open("lobby").unwrap();
    let _task = dir.spawn_purge_task(&config);

    for _ in 0..10 {
        tokio::time::sleep(config.purge_period).await;
        if dir.active_count() == 0 {
            break;
        }
    }
    assert_eq!(dir.active_count(), 0);
}
