//! Integration tests for RoomCoordinator

mod harness;

use harness::{settle, EngineFixture, PARTNER_ID, ROOM_ID, USER_ID};
use pairlink_core::message_types;
use pairlink_webrtc::{
    CallPhase, CallRole, EndReason, PeerConnectionState, RoomConfig, RoomCoordinator,
};
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;

async fn room(role: CallRole, config: RoomConfig) -> (EngineFixture, RoomCoordinator) {
    let fx = EngineFixture::new(role).await;
    let room = RoomCoordinator::new(fx.engine.clone(), fx.relay.channel.clone(), config)
        .expect("Failed to create coordinator");
    room.start();
    settle().await;
    (fx, room)
}

#[tokio::test(start_paused = true)]
async fn test_call_starts_when_relay_connected() {
    let (fx, room) = room(CallRole::Caller, RoomConfig::default()).await;

    assert!(fx.engine.is_started());
    assert_eq!(fx.transports.created(), 1);
    assert!(!room.status().complete);
}

#[tokio::test(start_paused = true)]
async fn test_auto_start_disabled() {
    let config = RoomConfig {
        auto_start: false,
        ..Default::default()
    };
    let (fx, _room) = room(CallRole::Caller, config).await;

    assert!(!fx.engine.is_started());
    assert_eq!(fx.transports.created(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_partner_call_ended_completes_room() {
    let (fx, room) = room(CallRole::Callee, RoomConfig::default()).await;
    let transport = fx.transport();

    fx.relay.deliver(json!({
        "type": "call_ended",
        "roomId": "other-room",
        "from": PARTNER_ID
    }));
    fx.relay.deliver(json!({
        "type": "call_ended",
        "roomId": ROOM_ID,
        "from": USER_ID
    }));
    settle().await;
    assert!(!room.status().complete);

    fx.relay.deliver(json!({
        "type": "call_ended",
        "roomId": ROOM_ID,
        "from": PARTNER_ID
    }));
    settle().await;

    let status = room.status();
    assert!(status.complete);
    assert_eq!(status.end_reason, Some(EndReason::Partner));
    assert!(transport.is_closed());
    assert!(!fx.engine.is_started());
    assert_eq!(fx.engine.snapshot().phase, CallPhase::Ended);
}

#[tokio::test(start_paused = true)]
async fn test_partner_unreachable_times_out() {
    let (fx, room) = room(CallRole::Callee, RoomConfig::default()).await;
    let transport = fx.transport();
    transport.set_connection_state(PeerConnectionState::Connected);
    settle().await;

    transport.set_connection_state(PeerConnectionState::Disconnected);
    settle().await;

    let status = room.status();
    assert!(status.partner_disconnected);
    assert_eq!(status.reconnect_remaining_secs, 30);

    sleep(Duration::from_millis(10_500)).await;
    assert_eq!(room.status().reconnect_remaining_secs, 20);
    assert!(!room.status().complete);

    sleep(Duration::from_secs(20)).await;
    settle().await;

    let status = room.status();
    assert!(status.complete);
    assert_eq!(status.end_reason, Some(EndReason::Timeout));
    assert_eq!(status.reconnect_remaining_secs, 0);
    assert!(transport.is_closed());
    assert!(!fx.engine.is_started());
}

#[tokio::test(start_paused = true)]
async fn test_reconnection_cancels_countdown() {
    let (fx, room) = room(CallRole::Callee, RoomConfig::default()).await;
    let transport = fx.transport();

    transport.set_connection_state(PeerConnectionState::Failed);
    settle().await;
    sleep(Duration::from_millis(5_500)).await;
    assert_eq!(room.status().reconnect_remaining_secs, 25);

    transport.set_connection_state(PeerConnectionState::Connected);
    settle().await;

    let status = room.status();
    assert!(!status.partner_disconnected);
    assert_eq!(status.reconnect_remaining_secs, 30);

    sleep(Duration::from_secs(40)).await;
    assert!(!room.status().complete);
    assert!(fx.engine.is_started());
}

#[tokio::test(start_paused = true)]
async fn test_partner_ending_during_countdown_clears_disconnect() {
    let (fx, room) = room(CallRole::Callee, RoomConfig::default()).await;
    fx.transport().set_connection_state(PeerConnectionState::Disconnected);
    settle().await;
    assert!(room.status().partner_disconnected);

    fx.relay.deliver(json!({
        "type": "call_ended",
        "roomId": ROOM_ID,
        "from": PARTNER_ID
    }));
    settle().await;

    let status = room.status();
    assert!(status.complete);
    assert_eq!(status.end_reason, Some(EndReason::Partner));
    assert!(!status.partner_disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_elapsed_time_counts_only_active_call() {
    let (fx, room) = room(CallRole::Callee, RoomConfig::default()).await;
    let transport = fx.transport();
    sleep(Duration::from_secs(3)).await;
    assert_eq!(room.status().elapsed_secs, 0);

    transport.set_connection_state(PeerConnectionState::Connected);
    settle().await;
    sleep(Duration::from_millis(5_500)).await;
    assert_eq!(room.status().elapsed_secs, 5);

    transport.set_connection_state(PeerConnectionState::Disconnected);
    settle().await;
    sleep(Duration::from_secs(3)).await;
    assert_eq!(room.status().elapsed_secs, 5);

    transport.set_connection_state(PeerConnectionState::Connected);
    settle().await;
    sleep(Duration::from_millis(2_500)).await;
    assert_eq!(room.status().elapsed_secs, 7);

    room.end_interview().await;
    settle().await;
    sleep(Duration::from_secs(5)).await;
    assert_eq!(room.status().elapsed_secs, 7);
}

#[tokio::test(start_paused = true)]
async fn test_partner_disconnected_frame_starts_countdown() {
    let (fx, room) = room(CallRole::Callee, RoomConfig::default()).await;

    fx.relay.deliver(json!({
        "type": "partner_disconnected",
        "roomId": ROOM_ID,
        "from": PARTNER_ID
    }));
    settle().await;
    assert!(room.status().partner_disconnected);

    sleep(Duration::from_millis(3_500)).await;
    fx.relay.deliver(json!({
        "type": "partner_disconnected",
        "roomId": ROOM_ID,
        "from": PARTNER_ID
    }));
    settle().await;
    assert_eq!(room.status().reconnect_remaining_secs, 27);
}

#[tokio::test(start_paused = true)]
async fn test_end_interview_notifies_partner() {
    let (mut fx, room) = room(CallRole::Callee, RoomConfig::default()).await;
    let transport = fx.transport();

    room.end_interview().await;
    room.end_interview().await;
    settle().await;

    let ended = fx.relay.drain_kind(message_types::CALL_ENDED);
    assert_eq!(ended.len(), 1);
    assert_eq!(ended[0]["roomId"], ROOM_ID);

    let status = room.status();
    assert!(status.complete);
    assert_eq!(status.end_reason, Some(EndReason::Local));
    assert!(transport.is_closed());
    assert!(!fx.engine.is_started());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_removes_listeners() {
    let (fx, room) = room(CallRole::Callee, RoomConfig::default()).await;
    let channel = fx.relay.channel.clone();
    assert_eq!(channel.listener_count(message_types::CALL_ENDED), 1);
    assert_eq!(channel.listener_count(message_types::PARTNER_DISCONNECTED), 1);

    room.shutdown();
    assert_eq!(channel.listener_count(message_types::CALL_ENDED), 0);
    assert_eq!(channel.listener_count(message_types::PARTNER_DISCONNECTED), 0);

    fx.relay.deliver(json!({
        "type": "call_ended",
        "roomId": ROOM_ID,
        "from": PARTNER_ID
    }));
    settle().await;
    assert!(!room.status().complete);
}

#[test]
fn test_invalid_room_config_rejected() {
    let config = RoomConfig {
        partner_timeout_secs: 0,
        ..Default::default()
    };
    assert!(config.validate().is_err());
}
