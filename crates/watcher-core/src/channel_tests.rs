use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;
use tokio::time::{sleep, Instant};
use url::Url;

use crate::channel::{parse_event, spawn_channel, ChannelFrame, ChannelLifecycle, FrameAction};
use crate::test_support::{offsets_ms, ScriptedChannel};

const DELAY: Duration = Duration::from_secs(3);

fn events_url() -> Url {
    Url::parse("ws://localhost:8000/ws/events").expect("valid url")
}

#[test]
fn lifecycle_duplicate_close_arms_a_single_reconnect() {
    // Arrange
    let mut lifecycle = ChannelLifecycle::new(DELAY);
    let generation = lifecycle.begin_attempt().expect("active");
    assert!(lifecycle.on_open(generation));

    // Act
    let first = lifecycle.on_close(generation);
    let second = lifecycle.on_close(generation);

    // Assert
    assert_eq!(first, Some(DELAY));
    assert_eq!(second, None, "a pending reconnect must not be stacked");
    assert!(!lifecycle.is_connected());
}

#[test]
fn lifecycle_never_reports_connected_twice_in_a_row() {
    // Arrange
    let mut lifecycle = ChannelLifecycle::new(DELAY);
    let generation = lifecycle.begin_attempt().expect("active");

    // Act / Assert
    assert!(lifecycle.on_open(generation));
    assert!(!lifecycle.on_open(generation));
}

#[test]
fn lifecycle_ignores_events_from_superseded_transport() {
    // Arrange
    let mut lifecycle = ChannelLifecycle::new(DELAY);
    let old = lifecycle.begin_attempt().expect("active");
    lifecycle.on_open(old);
    lifecycle.on_close(old);
    let current = lifecycle.begin_attempt().expect("active");
    lifecycle.on_open(current);

    // Act
    let stale_close = lifecycle.on_close(old);

    // Assert
    assert_eq!(stale_close, None);
    assert!(lifecycle.is_connected(), "stale close must not flip the live connection");
    assert!(!lifecycle.on_open(old));
    assert_eq!(lifecycle.on_frame(old), FrameAction::Ignore);
    assert!(!lifecycle.on_error(old));
    assert_eq!(lifecycle.on_frame(current), FrameAction::Publish);
}

#[test]
fn lifecycle_schedules_nothing_after_teardown() {
    // Arrange
    let mut lifecycle = ChannelLifecycle::new(DELAY);
    let generation = lifecycle.begin_attempt().expect("active");
    lifecycle.on_open(generation);

    // Act
    lifecycle.teardown();

    // Assert
    assert_eq!(lifecycle.on_close(generation), None);
    assert_eq!(lifecycle.begin_attempt(), None);
    assert!(!lifecycle.is_connected());
}

#[test]
fn parse_event_accepts_typed_frames_and_drops_garbage() {
    // Arrange
    let good = ChannelFrame::Text(r#"{"type":"motion","data":{"zone":2}}"#.to_string());
    let binary = ChannelFrame::Binary(br#"{"type":"ping"}"#.to_vec());
    let garbage = ChannelFrame::Text("not json {".to_string());
    let untyped = ChannelFrame::Text(r#"{"data":1}"#.to_string());

    // Act
    let event = parse_event(&good).expect("valid event");

    // Assert
    assert_eq!(event.kind, "motion");
    assert_eq!(event.data, json!({"zone": 2}));
    assert_eq!(parse_event(&binary).map(|e| e.kind), Some("ping".to_string()));
    assert!(parse_event(&garbage).is_none());
    assert!(parse_event(&untyped).is_none());
}

#[tokio::test(start_paused = true)]
async fn publishes_events_and_connection_state() {
    // Arrange
    let payload = json!({
        "type": "stream_status",
        "data": {
            "connected": true,
            "fps": 15.0,
            "width": 640,
            "height": 480,
            "reconnect_attempts": 0,
            "last_frame_at": null,
            "rtsp_url": "rtsp://cam",
            "error": null
        }
    });
    let transport =
        ScriptedChannel::new(vec![Ok(vec![ChannelFrame::Text(payload.to_string())])]);

    // Act
    let channel = spawn_channel(transport.clone(), events_url(), DELAY);
    let mut subscriber = channel.subscribe();
    sleep(Duration::from_millis(10)).await;

    // Assert
    assert!(channel.is_connected());
    let last = channel.last_event().borrow().clone().expect("event published");
    let status = last.stream_status().expect("typed stream status");
    assert_eq!(status.width, 640);
    assert_eq!(status.source_uri, "rtsp://cam");
    let delivered = subscriber.try_recv().expect("subscriber sees the event");
    assert_eq!(delivered.kind, "stream_status");

    channel.join().await;
    assert_eq!(transport.closes.load(Ordering::SeqCst), 1, "teardown closes the live transport");
}

#[tokio::test(start_paused = true)]
async fn malformed_frame_changes_nothing() {
    // Arrange
    let transport = ScriptedChannel::new(vec![Ok(vec![
        ChannelFrame::Text(r#"{"type":"hello","data":null}"#.to_string()),
        ChannelFrame::Text("}}} definitely not json".to_string()),
        ChannelFrame::Binary(vec![0xff, 0x00, 0x13]),
    ])]);

    // Act
    let channel = spawn_channel(transport.clone(), events_url(), DELAY);
    sleep(Duration::from_millis(10)).await;

    // Assert
    assert!(channel.is_connected());
    let last = channel.last_event().borrow().clone().expect("first event kept");
    assert_eq!(last.kind, "hello");
    assert_eq!(transport.connect_count(), 1, "malformed frames never force a reconnect");

    channel.join().await;
}

#[tokio::test(start_paused = true)]
async fn duplicate_close_reconnects_exactly_once() {
    // Arrange
    let transport = ScriptedChannel::new(vec![Ok(vec![
        ChannelFrame::Closed,
        ChannelFrame::Closed,
    ])]);
    let start = Instant::now();

    // Act
    let channel = spawn_channel(transport.clone(), events_url(), DELAY);
    let connected = channel.connected();
    sleep(Duration::from_millis(2900)).await;
    let before_delay = (transport.connect_count(), *connected.borrow());
    sleep(Duration::from_millis(200)).await;

    // Assert
    assert_eq!(before_delay, (1, false));
    assert_eq!(offsets_ms(&transport.connects, start), vec![0, 3000]);
    assert!(channel.is_connected());

    channel.join().await;
}

#[tokio::test(start_paused = true)]
async fn errors_force_close_and_retry_through_close_path() {
    // Arrange
    let transport = ScriptedChannel::new(vec![
        Ok(vec![ChannelFrame::Error("connection reset".to_string())]),
        Err("refused".to_string()),
        Ok(vec![]),
    ]);
    let start = Instant::now();

    // Act
    let channel = spawn_channel(transport.clone(), events_url(), DELAY);
    sleep(Duration::from_secs(7)).await;

    // Assert
    assert_eq!(offsets_ms(&transport.connects, start), vec![0, 3000, 6000]);
    assert_eq!(transport.closes.load(Ordering::SeqCst), 1, "error closes the transport once");
    assert!(channel.is_connected());

    channel.join().await;
}

#[tokio::test(start_paused = true)]
async fn teardown_during_reconnect_delay_schedules_nothing() {
    // Arrange
    let transport = ScriptedChannel::new(vec![Ok(vec![ChannelFrame::Closed])]);
    let channel = spawn_channel(transport.clone(), events_url(), DELAY);
    let connected = channel.connected();
    sleep(Duration::from_secs(1)).await;

    // Act
    channel.join().await;
    sleep(Duration::from_secs(10)).await;

    // Assert
    assert_eq!(transport.connect_count(), 1);
    assert!(!*connected.borrow());
}
