//! Channel behaviour: id assignment, history bound, join policy, fan-out and
//! the delivery loop.

mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use common::{START, TestEnv, channel, peer};
use image::{Rgba, RgbaImage};
use pixelchat_proto::{Message, MessageKind};
use pixelchat_render::{FacePool, FixedFace, FrameFormat, FrameRenderer, GlyphFace, GraphemeTable, ViewportClass};
use pixelchat_server::{
    Channel, ChannelConfig, ChannelError, Delivery, DeliveryOutcome, MemoryStorage, Storage, DISPLACED_NOTICE,
};
use proptest::prelude::*;
use tokio::io::AsyncReadExt;

const PART_HEADER: &[u8] = b"\r\n--frame\r\nContent-Type: image/jpeg\r\n\r\n";

/// Fixed metrics; rasterizing panics while `broken` is set.
struct FlakyFace {
    inner: FixedFace,
    broken: Arc<AtomicBool>,
}

impl GlyphFace for FlakyFace {
    fn advance(&mut self, c: char) -> f32 {
        self.inner.advance(c)
    }

    fn kern(&mut self, prev: char, c: char) -> f32 {
        self.inner.kern(prev, c)
    }

    fn draw_glyph(&mut self, canvas: &mut RgbaImage, x: f32, baseline: i32, c: char, color: Rgba<u8>) {
        if self.broken.load(Ordering::SeqCst) {
            panic!("rasterizer fault");
        }
        self.inner.draw_glyph(canvas, x, baseline, c, color);
    }
}

fn kinds(messages: &[Message]) -> Vec<MessageKind> {
    messages.iter().map(|m| m.kind).collect()
}

fn drain<E, S>(session: &pixelchat_server::ViewerSession<E, S>) -> Vec<Delivery>
where
    E: pixelchat_server::Environment,
    S: Storage,
{
    std::iter::from_fn(|| session.try_next()).take_while(|d| *d != Delivery::Closed).collect()
}

#[test]
fn append_assigns_increasing_ids_and_time() {
    let env = TestEnv::new(1);
    let ch = channel("lobby", &env, MemoryStorage::new());

    let a = ch.append(Message::text("alice", "one")).unwrap();
    let b = ch.append(Message::text("alice", "two")).unwrap();
    env.advance(5);
    let c = ch.append(Message::text("bob", "three")).unwrap();

    assert!(a.id < b.id && b.id < c.id);
    assert_eq!(a.unix_time, START);
    assert_eq!(c.unix_time, START + 5);
    assert_eq!(ch.active_secs(), START + 5);
}

#[test]
fn log_keeps_newest_fifty() {
    let env = TestEnv::new(2);
    let ch = channel("lobby", &env, MemoryStorage::new());

    for i in 0..75 {
        ch.append(Message::text("alice", i.to_string())).unwrap();
    }

    let log = ch.messages();
    assert_eq!(log.len(), 50);
    assert_eq!(log[0].text, "25");
    assert_eq!(log[49].text, "74");
}

#[test]
fn ids_increase_when_clock_steps_back() {
    let env = TestEnv::new(3);
    let ch = channel("lobby", &env, MemoryStorage::new());

    let first = ch.append(Message::text("alice", "late")).unwrap();
    env.set_clock(START - 3600);
    let second = ch.append(Message::text("alice", "early")).unwrap();

    assert!(second.id > first.id);
}

#[test]
fn only_text_is_persisted() {
    let env = TestEnv::new(4);
    let storage = MemoryStorage::new();
    let ch = channel("lobby", &env, storage.clone());

    let _session = ch.join("alice", ViewportClass::Narrow, peer(1)).unwrap();
    ch.append(Message::text("alice", "hello")).unwrap();

    assert_eq!(kinds(&ch.messages()), vec![MessageKind::Join, MessageKind::Text]);
    let stored = storage.load_messages("lobby").unwrap();
    assert_eq!(kinds(&stored), vec![MessageKind::Text]);
    assert_eq!(storage.last_active("lobby").unwrap(), Some(START));
}

#[test]
fn join_delivers_a_frame_immediately() {
    let env = TestEnv::new(5);
    let ch = channel("lobby", &env, MemoryStorage::new());

    let session = ch.join("alice", ViewportClass::Wide, peer(1)).unwrap();

    let deliveries = drain(&session);
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0], Delivery::Frame(ch.last_frame(ViewportClass::Wide).unwrap()));
    assert_eq!(ch.viewer_count(), 1);
}

#[test]
fn same_address_rejoin_displaces_without_leave() {
    let env = TestEnv::new(6);
    let ch = channel("lobby", &env, MemoryStorage::new());

    let first = ch.join("alice", ViewportClass::Narrow, peer(1)).unwrap();
    let second = ch.join("alice", ViewportClass::Wide, peer(1)).unwrap();

    match first.try_next() {
        Some(Delivery::Displaced(notice)) => assert_eq!(notice.content_type, "image/jpeg"),
        other => panic!("expected displacement, got {other:?}"),
    }
    assert_eq!(first.try_next(), Some(Delivery::Closed));
    assert!(matches!(second.try_next(), Some(Delivery::Frame(_))));

    assert_eq!(ch.viewer_count(), 1);
    assert_eq!(kinds(&ch.messages()), vec![MessageKind::Join]);

    // The displaced session leaving later is a no-op.
    ch.leave(first.session_id());
    assert_eq!(ch.viewer_count(), 1);
    assert_eq!(kinds(&ch.messages()), vec![MessageKind::Join]);
}

#[test]
fn different_address_join_is_rejected() {
    let env = TestEnv::new(7);
    let ch = channel("lobby", &env, MemoryStorage::new());

    let first = ch.join("alice", ViewportClass::Narrow, peer(1)).unwrap();
    drain(&first);
    let before = ch.messages();

    match ch.join("alice", ViewportClass::Narrow, peer(2)) {
        Err(ChannelError::JoinRejected { frame }) => {
            assert_eq!(frame.content_type, "image/jpeg");
            assert_eq!(&frame.data[..2], &[0xFF, 0xD8]);
        },
        Err(e) => panic!("unexpected error {e}"),
        Ok(_) => panic!("join from another address was admitted"),
    }

    assert_eq!(ch.viewer_count(), 1);
    assert_eq!(ch.messages(), before);
    assert_eq!(first.try_next(), None);
}

#[test]
fn slow_viewer_sees_only_latest_frame() {
    let env = TestEnv::new(8);
    let ch = channel("lobby", &env, MemoryStorage::new());
    let session = ch.join("alice", ViewportClass::Narrow, peer(1)).unwrap();
    drain(&session);

    for i in 0..5 {
        ch.append(Message::text("bob", format!("message {i}"))).unwrap();
        assert!(ch.refresh());
    }

    let deliveries = drain(&session);
    assert_eq!(deliveries, vec![Delivery::Frame(ch.last_frame(ViewportClass::Narrow).unwrap())]);
}

#[test]
fn viewers_get_their_own_viewport_class() {
    let env = TestEnv::new(9);
    let ch = channel("lobby", &env, MemoryStorage::new());
    let narrow = ch.join("alice", ViewportClass::Narrow, peer(1)).unwrap();
    let wide = ch.join("bob", ViewportClass::Wide, peer(2)).unwrap();
    drain(&narrow);
    drain(&wide);

    ch.refresh();

    assert_eq!(drain(&narrow), vec![Delivery::Frame(ch.last_frame(ViewportClass::Narrow).unwrap())]);
    assert_eq!(drain(&wide), vec![Delivery::Frame(ch.last_frame(ViewportClass::Wide).unwrap())]);
}

#[test]
fn traffic_counts_offered_bytes() {
    let env = TestEnv::new(10);
    let ch = channel("lobby", &env, MemoryStorage::new());
    assert_eq!(ch.traffic_bytes(), 0);

    let _session = ch.join("alice", ViewportClass::Narrow, peer(1)).unwrap();
    let before = ch.traffic_bytes();
    assert!(before > 0);

    ch.refresh();
    let frame = ch.last_frame(ViewportClass::Narrow).unwrap();
    assert_eq!(ch.traffic_bytes(), before + frame.len() as u64);
}

#[test]
fn links_resolve_by_index() {
    let env = TestEnv::new(11);
    let ch = channel("lobby", &env, MemoryStorage::new());

    ch.append(Message::text("alice", "see https://example.com/a and http://example.org/b")).unwrap();
    ch.refresh();

    for class in ViewportClass::ALL {
        assert_eq!(
            ch.links(class),
            vec!["https://example.com/a".to_string(), "http://example.org/b".to_string()]
        );
        assert_eq!(ch.link(class, 1).as_deref(), Some("http://example.org/b"));
        assert_eq!(ch.link(class, 2), None);
    }
}

#[test]
fn links_follow_each_class_truncation() {
    let env = TestEnv::new(13);
    let ch = channel("lobby", &env, MemoryStorage::new());

    // 80 glyphs fit one wide row but wrap to two narrow rows, so only the
    // narrow frame truncates the message and hides its trailing link.
    let filler = format!("{}\n", "x".repeat(80)).repeat(8);
    ch.append(Message::text("alice", "http://older")).unwrap();
    ch.append(Message::text("bob", format!("{filler}http://tail"))).unwrap();
    ch.refresh();

    assert_eq!(ch.links(ViewportClass::Wide), vec!["http://tail".to_string(), "http://older".to_string()]);
    assert_eq!(ch.links(ViewportClass::Narrow), vec!["http://older".to_string()]);
    assert_eq!(ch.link(ViewportClass::Narrow, 0).as_deref(), Some("http://older"));
    assert_eq!(ch.link(ViewportClass::Wide, 0).as_deref(), Some("http://tail"));
}

#[test]
fn frame_sizes_are_tracked_per_class() {
    let env = TestEnv::new(14);
    let ch = channel("lobby", &env, MemoryStorage::new());

    ch.append(Message::text("alice", "sizes")).unwrap();
    ch.refresh();

    for class in ViewportClass::ALL {
        assert_eq!(ch.last_frame_bytes(class), ch.last_frame(class).unwrap().len());
    }
    assert_ne!(ch.last_frame_bytes(ViewportClass::Narrow), ch.last_frame_bytes(ViewportClass::Wide));
}

#[test]
fn render_panic_keeps_previous_frame() {
    let env = TestEnv::new(15);
    let broken = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&broken);
    let faces = FacePool::new(move || {
        Box::new(FlakyFace { inner: FixedFace::new(7.0), broken: Arc::clone(&flag) }) as Box<dyn GlyphFace>
    });
    let renderer = Arc::new(FrameRenderer::new(faces, Arc::new(GraphemeTable::empty()), None, FrameFormat::default()));
    let ch = Channel::load("lobby", env.clone(), MemoryStorage::new(), Arc::clone(&renderer), ChannelConfig::default())
        .unwrap();
    let before = ch.last_frame(ViewportClass::Narrow).unwrap();

    broken.store(true, Ordering::SeqCst);
    ch.append(Message::text("alice", "never drawn")).unwrap();

    assert!(!ch.refresh());
    assert_eq!(ch.last_frame(ViewportClass::Narrow), Some(before));
    assert_eq!(renderer.idle_faces(), 1);

    broken.store(false, Ordering::SeqCst);
    assert!(ch.refresh());
}

#[test]
fn closed_channel_refuses_joins_and_appends() {
    let env = TestEnv::new(12);
    let ch = channel("lobby", &env, MemoryStorage::new());

    assert!(ch.close_if_idle());
    assert!(matches!(ch.join("alice", ViewportClass::Narrow, peer(1)), Err(ChannelError::Closed)));
    assert!(matches!(ch.append(Message::text("alice", "hi")), Err(ChannelError::Closed)));
}

#[test]
fn occupied_channel_is_not_idle() {
    let env = TestEnv::new(13);
    let ch = channel("lobby", &env, MemoryStorage::new());
    let _session = ch.join("alice", ViewportClass::Narrow, peer(1)).unwrap();

    assert!(!ch.close_if_idle());
    assert!(!ch.is_closed());
}

#[tokio::test]
async fn delivery_writes_parts_and_leaves_on_disconnect() {
    let env = TestEnv::new(14);
    let ch = channel("lobby", &env, MemoryStorage::new());
    let session = ch.join("alice", ViewportClass::Narrow, peer(1)).unwrap();

    let (mut writer, mut reader) = tokio::io::duplex(1 << 20);
    let task = tokio::spawn(async move { session.deliver(&mut writer).await });

    let mut header = vec![0u8; PART_HEADER.len()];
    reader.read_exact(&mut header).await.unwrap();
    assert_eq!(header, PART_HEADER);

    drop(reader);
    ch.append(Message::text("bob", "anyone there?")).unwrap();
    ch.refresh();

    assert_eq!(task.await.unwrap(), DeliveryOutcome::Disconnected);
    assert_eq!(ch.viewer_count(), 0);
    assert_eq!(kinds(&ch.messages()), vec![MessageKind::Join, MessageKind::Text, MessageKind::Leave]);
}

#[tokio::test]
async fn displaced_delivery_writes_notice_and_exits() {
    let env = TestEnv::new(15);
    let ch = channel("lobby", &env, MemoryStorage::new());
    let first = ch.join("alice", ViewportClass::Narrow, peer(1)).unwrap();
    drain(&first);

    let _second = ch.join("alice", ViewportClass::Narrow, peer(1)).unwrap();

    let mut sink = Vec::new();
    let outcome = first.deliver(&mut sink).await;

    assert_eq!(outcome, DeliveryOutcome::Displaced);
    assert!(sink.starts_with(PART_HEADER));
    assert_eq!(ch.viewer_count(), 1);
    assert_eq!(kinds(&ch.messages()), vec![MessageKind::Join]);
    assert!(!DISPLACED_NOTICE.is_empty());
}

#[tokio::test]
async fn close_ends_delivery() {
    let env = TestEnv::new(16);
    let ch = channel("lobby", &env, MemoryStorage::new());
    let session = ch.join("alice", ViewportClass::Narrow, peer(1)).unwrap();
    drain(&session);

    ch.close();
    let mut sink = Vec::new();

    assert_eq!(session.deliver(&mut sink).await, DeliveryOutcome::Closed);
    assert!(sink.is_empty());
    assert_eq!(ch.viewer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn auto_refresh_fires_after_quiet_period() {
    let env = TestEnv::new(17);
    let ch = channel("lobby", &env, MemoryStorage::new());
    let _timer = ch.spawn_auto_refresh();
    let session = ch.join("alice", ViewportClass::Narrow, peer(1)).unwrap();
    drain(&session);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(session.try_next(), None);

    let mut refreshed = false;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if session.try_next().is_some() {
            refreshed = true;
            break;
        }
    }
    assert!(refreshed, "no frame after the refresh period");
}

#[tokio::test(start_paused = true)]
async fn auto_refresh_stops_when_closed() {
    let env = TestEnv::new(18);
    let ch = channel("lobby", &env, MemoryStorage::new());
    let timer = ch.spawn_auto_refresh();

    ch.close();
    tokio::time::sleep(Duration::from_secs(11)).await;

    assert!(timer.is_finished());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_ids_strictly_increase(steps in prop::collection::vec(-3i64..5, 1..120)) {
        let env = TestEnv::new(19);
        let ch = channel("prop", &env, MemoryStorage::new());

        let mut last = 0;
        for step in steps {
            env.advance(step);
            let message = ch.append(Message::text("p", "x")).unwrap();
            prop_assert!(message.id > last);
            last = message.id;
        }

        let log = ch.messages();
        prop_assert!(log.len() <= 50);
        prop_assert!(log.windows(2).all(|w| w[0].id < w[1].id));
    }
}
