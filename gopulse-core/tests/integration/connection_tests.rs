use std::time::Duration;
use tokio::time::{Instant, sleep};

use gopulse_core::{
    AppState, ConnectionState, models::presence::PresenceSnapshot,
    websocket::connection::ConnectionSession,
};

use crate::helpers::{MockConnector, identity, settings, settle, signed_in_session};

const DELAY: Duration = Duration::from_millis(5_000);
const KEEPALIVE: Duration = Duration::from_millis(15_000);

#[tokio::test(start_paused = true)]
async fn test_frames_update_counters() {
    let state = AppState::new();
    let connector = MockConnector::accepting();
    let mut session = signed_in_session(&state, &connector, settings(DELAY, KEEPALIVE), 7);

    session.open(&identity(7));
    settle().await;

    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(connector.urls(), vec!["ws://localhost:8088/ws?uid=7".to_string()]);

    let channel = connector.latest();
    channel.push(r#"{"type":0,"body":{"msgnum":5}}"#);
    settle().await;
    assert_eq!(state.session.unread_count(), Some(5));

    channel.push(r#"{"type":1,"body":{"online":12,"maxonline":40}}"#);
    settle().await;
    assert_eq!(
        state.presence.snapshot(),
        PresenceSnapshot {
            online: 12,
            max_online: 40
        }
    );
    assert_eq!(session.stats().frames_applied, 2);
    assert!(session.stats().connected_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frames_change_nothing() {
    let state = AppState::new();
    let connector = MockConnector::accepting();
    let mut session = signed_in_session(&state, &connector, settings(DELAY, KEEPALIVE), 7);
    session.open(&identity(7));
    settle().await;

    let channel = connector.latest();
    channel.push(r#"{"type":0,"body":{"msgnum":3}}"#);
    channel.push(r#"{"type":1,"body":{"online":4,"maxonline":9}}"#);
    settle().await;
    let presence = state.presence.snapshot();
    let unread = state.session.unread_count();

    let garbage = [
        "pong",
        "{",
        "[]",
        r#"{"type":0}"#,
        r#"{"type":0,"body":"5"}"#,
        r#"{"type":7,"body":{"msgnum":99}}"#,
        r#"{"type":"1","body":{"online":99,"maxonline":99}}"#,
    ];
    for frame in garbage {
        channel.push(frame);
    }
    settle().await;

    assert_eq!(state.presence.snapshot(), presence);
    assert_eq!(state.session.unread_count(), unread);
    assert_eq!(session.stats().frames_dropped, garbage.len() as u64);
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_counts_coerce_to_zero() {
    let state = AppState::new();
    let connector = MockConnector::accepting();
    let mut session = signed_in_session(&state, &connector, settings(DELAY, KEEPALIVE), 7);
    session.open(&identity(7));
    settle().await;

    let channel = connector.latest();
    channel.push(r#"{"type":0,"body":{"msgnum":4}}"#);
    channel.push(r#"{"type":0,"body":{"msgnum":-2}}"#);
    channel.push(r#"{"type":1,"body":{"online":"many"}}"#);
    settle().await;

    assert_eq!(state.session.unread_count(), Some(0));
    assert_eq!(state.presence.snapshot(), PresenceSnapshot::default());
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_fixed_delay() {
    let state = AppState::new();
    let connector = MockConnector::accepting();
    let mut session = signed_in_session(&state, &connector, settings(DELAY, KEEPALIVE), 7);
    session.open(&identity(7));
    settle().await;

    let dropped_at = Instant::now();
    connector.latest().drop_connection();
    settle().await;
    assert_eq!(session.state(), ConnectionState::Reconnecting);

    sleep(Duration::from_millis(4_900)).await;
    assert_eq!(connector.attempts(), 1);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(connector.attempts(), 2);
    let waited = connector.attempt_times()[1] - dropped_at;
    assert!(waited >= DELAY, "reconnected after {waited:?}");
    assert!(waited < DELAY + Duration::from_millis(50), "reconnected after {waited:?}");
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_one_reconnect_per_close() {
    let state = AppState::new();
    let connector = MockConnector::accepting();
    let mut session = signed_in_session(&state, &connector, settings(DELAY, KEEPALIVE), 7);
    session.open(&identity(7));
    settle().await;

    for round in 1..=3 {
        connector.latest().drop_connection();
        sleep(DELAY + Duration::from_millis(100)).await;
        assert_eq!(connector.attempts(), round + 1);
    }

    // nothing else is pending while connected
    sleep(DELAY * 4).await;
    assert_eq!(connector.attempts(), 4);

    let times = connector.attempt_times();
    for pair in times.windows(2).skip(1) {
        assert!(pair[1] - pair[0] >= DELAY);
    }
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_closes_and_reconnects() {
    let state = AppState::new();
    let connector = MockConnector::accepting();
    let mut session = signed_in_session(&state, &connector, settings(DELAY, KEEPALIVE), 7);
    session.open(&identity(7));
    settle().await;

    let first = connector.latest();
    first.fail();
    settle().await;
    assert!(first.is_closed());
    assert_eq!(session.state(), ConnectionState::Reconnecting);

    sleep(DELAY).await;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_refused_connects_retry_without_limit() {
    let state = AppState::new();
    let connector = MockConnector::refusing();
    let mut session = signed_in_session(&state, &connector, settings(DELAY, KEEPALIVE), 7);
    session.open(&identity(7));
    settle().await;

    assert_eq!(session.state(), ConnectionState::Reconnecting);
    sleep(DELAY * 10 + Duration::from_millis(100)).await;
    assert_eq!(connector.attempts(), 11);

    connector.set_accept(true);
    sleep(DELAY).await;
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_close_cancels_pending_reconnect() {
    let state = AppState::new();
    let connector = MockConnector::accepting();
    let mut session = signed_in_session(&state, &connector, settings(DELAY, KEEPALIVE), 7);
    session.open(&identity(7));
    settle().await;

    connector.latest().drop_connection();
    settle().await;
    assert_eq!(session.state(), ConnectionState::Reconnecting);

    session.close();
    assert_eq!(session.state(), ConnectionState::Closed);

    sleep(DELAY * 6).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(session.state(), ConnectionState::Closed);
    assert!(!session.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_no_writes_after_close() {
    let state = AppState::new();
    let connector = MockConnector::accepting();
    let mut session = signed_in_session(&state, &connector, settings(DELAY, KEEPALIVE), 7);
    session.open(&identity(7));
    settle().await;

    let channel = connector.latest();
    channel.push(r#"{"type":0,"body":{"msgnum":1}}"#);
    settle().await;

    session.close();
    channel.push(r#"{"type":0,"body":{"msgnum":50}}"#);
    channel.push(r#"{"type":1,"body":{"online":50,"maxonline":50}}"#);
    channel.fail();
    sleep(KEEPALIVE * 4).await;

    assert!(channel.is_closed());
    assert!(channel.sent().is_empty());
    assert_eq!(state.session.unread_count(), Some(1));
    assert_eq!(state.presence.snapshot(), PresenceSnapshot::default());
    assert_eq!(connector.attempts(), 1);
    assert_eq!(session.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_close_is_idempotent_and_reopenable() {
    let state = AppState::new();
    let connector = MockConnector::accepting();
    let mut session = signed_in_session(&state, &connector, settings(DELAY, KEEPALIVE), 7);

    session.close();
    session.close();
    assert_eq!(session.state(), ConnectionState::Closed);

    session.open(&identity(7));
    settle().await;
    assert_eq!(session.state(), ConnectionState::Connected);
    session.close();
    session.close();
    settle().await;
    assert_eq!(session.state(), ConnectionState::Closed);

    session.open(&identity(7));
    settle().await;
    assert_eq!(connector.attempts(), 2);
    assert!(connector.channel(0).is_closed());
    assert!(!connector.channel(1).is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_only_while_connected() {
    let state = AppState::new();
    let connector = MockConnector::accepting();
    let mut session = signed_in_session(&state, &connector, settings(DELAY, KEEPALIVE), 7);
    session.open(&identity(7));
    settle().await;

    let channel = connector.latest();
    sleep(KEEPALIVE - Duration::from_millis(10)).await;
    assert!(channel.sent().is_empty());

    sleep(KEEPALIVE * 2 + Duration::from_millis(20)).await;
    assert_eq!(channel.sent(), vec!["ping", "ping", "ping"]);
    assert_eq!(session.stats().keepalives_sent, 3);

    session.close();
    sleep(KEEPALIVE * 3).await;
    assert_eq!(channel.sent().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_zero_keepalive_disables_pings() {
    let state = AppState::new();
    let connector = MockConnector::accepting();
    let mut session = signed_in_session(&state, &connector, settings(DELAY, Duration::ZERO), 7);
    session.open(&identity(7));
    settle().await;

    sleep(Duration::from_secs(120)).await;
    assert!(connector.latest().sent().is_empty());
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_open_requires_signed_in_identity() {
    let state = AppState::new();
    let connector = MockConnector::accepting();
    let mut session = ConnectionSession::new(settings(DELAY, KEEPALIVE), connector.clone(), state.clone());

    session.open(&identity(7));
    settle().await;
    assert_eq!(connector.attempts(), 0);
    assert_eq!(session.state(), ConnectionState::Disconnected);

    // signed in as somebody else
    state.session.set_identity(identity(8));
    session.open(&identity(7));
    settle().await;
    assert_eq!(connector.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_open_twice_keeps_one_connection() {
    let state = AppState::new();
    let connector = MockConnector::accepting();
    let mut session = signed_in_session(&state, &connector, settings(DELAY, KEEPALIVE), 7);

    session.open(&identity(7));
    session.open(&identity(7));
    settle().await;
    session.open(&identity(7));
    settle().await;

    assert_eq!(connector.attempts(), 1);
    assert!(session.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_no_reconnect_once_identity_is_gone() {
    let state = AppState::new();
    let connector = MockConnector::accepting();
    let mut session = signed_in_session(&state, &connector, settings(DELAY, KEEPALIVE), 7);
    session.open(&identity(7));
    settle().await;

    state.session.clear_identity();
    connector.latest().drop_connection();
    sleep(DELAY * 3).await;

    assert_eq!(connector.attempts(), 1);
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(!session.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_drop_releases_channel() {
    let state = AppState::new();
    let connector = MockConnector::accepting();
    let mut session = signed_in_session(&state, &connector, settings(DELAY, KEEPALIVE), 7);
    session.open(&identity(7));
    settle().await;

    let channel = connector.latest();
    drop(session);
    settle().await;
    channel.push(r#"{"type":0,"body":{"msgnum":9}}"#);
    sleep(KEEPALIVE * 2).await;

    assert!(channel.is_closed());
    assert!(channel.sent().is_empty());
    assert_eq!(state.session.unread_count(), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_clearing_identity_closes_live_channel() {
    let state = AppState::new();
    let connector = MockConnector::accepting();
    let mut session = signed_in_session(&state, &connector, settings(DELAY, KEEPALIVE), 7);
    session.open(&identity(7));
    settle().await;
    assert_eq!(session.state(), ConnectionState::Connected);

    state.session.clear_identity();
    settle().await;

    let channel = connector.channel(0);
    assert!(channel.is_closed());
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(!session.is_open());

    sleep(DELAY * 3).await;
    assert_eq!(connector.attempts(), 1);
    assert!(channel.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_switching_identity_stops_old_channel() {
    let state = AppState::new();
    let connector = MockConnector::accepting();
    let mut session = signed_in_session(&state, &connector, settings(DELAY, KEEPALIVE), 7);
    session.open(&identity(7));
    settle().await;

    let channel = connector.latest();
    state.session.set_identity(identity(8));
    channel.push(r#"{"type":0,"body":{"msgnum":42}}"#);
    settle().await;

    assert_eq!(state.session.identity().map(|me| me.id.get()), Some(8));
    assert_eq!(state.session.unread_count(), Some(0));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(channel.is_closed());
    assert_eq!(session.stats().frames_applied, 0);

    sleep(DELAY * 2).await;
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_own_unread_updates_keep_channel_open() {
    let state = AppState::new();
    let connector = MockConnector::accepting();
    let mut session = signed_in_session(&state, &connector, settings(DELAY, KEEPALIVE), 7);
    session.open(&identity(7));
    settle().await;

    let channel = connector.latest();
    channel.push(r#"{"type":0,"body":{"msgnum":3}}"#);
    settle().await;
    state.session.set_identity(identity(7).with_unread(5));
    settle().await;

    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(!channel.is_closed());
    assert_eq!(state.session.unread_count(), Some(5));
}

#[tokio::test(start_paused = true)]
async fn test_close_and_wait_closes_socket() {
    let state = AppState::new();
    let connector = MockConnector::accepting();
    let mut session = signed_in_session(&state, &connector, settings(DELAY, KEEPALIVE), 7);
    session.open(&identity(7));
    settle().await;

    let channel = connector.latest();
    session.close_and_wait().await;

    assert!(channel.is_closed());
    assert_eq!(session.state(), ConnectionState::Closed);
    assert!(!session.is_open());

    // nothing to wait for the second time
    session.close_and_wait().await;
    assert_eq!(session.state(), ConnectionState::Closed);
}
