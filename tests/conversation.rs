mod common;

use agent_room::error::InviteError;
use agent_room::invite::AgentInviter;
use agent_room::media::OpusTrackSource;
use agent_room::{AgentConversationController, ChannelConnector, RoomState};
use async_trait::async_trait;
use common::*;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

/// Запоминает приглашения; может отвечать заданным статусом
#[derive(Default)]
struct RecordingInviter {
    invited: Mutex<Vec<String>>,
    fail_with: Option<u16>,
}

#[async_trait]
impl AgentInviter for RecordingInviter {
    async fn invite(&self, context_id: &str) -> Result<(), InviteError> {
        self.invited.lock().push(context_id.to_owned());
        match self.fail_with {
            Some(status) => Err(InviteError::Status(status)),
            None => Ok(()),
        }
    }
}

fn controller(
    inviter: Arc<RecordingInviter>,
) -> (
    AgentConversationController,
    tokio::sync::mpsc::UnboundedReceiver<agent_room::signaling::RemoteEnd>,
) {
    let (connector, remotes) = ChannelConnector::new();
    let controller = AgentConversationController::new(
        test_settings(),
        Arc::new(OpusTrackSource::default()),
        inviter,
        Arc::new(connector),
    );
    (controller, remotes)
}

#[tokio::test]
async fn test_initialize_invites_when_agent_missing() {
    let inviter = Arc::new(RecordingInviter::default());
    let (c, mut remotes) = controller(inviter.clone());

    let init = tokio::spawn({
        let c = c.clone();
        async move { c.initialize("ctx-1").await }
    });
    let mut server = FakeServer::accept(&mut remotes).await;
    let params = server
        .accept_join(json!([{"peer_id": "u2", "self_description": "User"}]))
        .await;
    assert_eq!(params["room_id"], "ctx-1");

    init.await.unwrap().unwrap();
    assert_eq!(*inviter.invited.lock(), vec!["ctx-1"]);

    let s = c.state();
    assert_eq!(s.audio_devices.len(), 1);
    assert_eq!(s.selected_audio_device.as_ref().unwrap().device_id, "default");
    assert!(s.is_connecting);
    assert!(s.initialization_error.is_none());
    assert!(c.local_stream().is_some());

    c.leave_room().await;
    assert!(c.session().is_none());
    assert_eq!(c.state(), Default::default());
}

#[tokio::test]
async fn test_initialize_skips_invite_when_agent_present() {
    let inviter = Arc::new(RecordingInviter::default());
    let (c, mut remotes) = controller(inviter.clone());

    let init = tokio::spawn({
        let c = c.clone();
        async move { c.initialize("ctx-2").await }
    });
    let mut server = FakeServer::accept(&mut remotes).await;
    server
        .accept_join(json!([{"peer_id": "a1", "self_description": "Agent"}]))
        .await;

    let response = init.await.unwrap().unwrap();
    assert_eq!(response.existing_peers.len(), 1);
    assert!(inviter.invited.lock().is_empty());
    assert_eq!(c.session().unwrap().state(), RoomState::Joined);

    c.leave_room().await;
}

#[tokio::test]
async fn test_invite_failure_is_reported() {
    let inviter = Arc::new(RecordingInviter {
        fail_with: Some(500),
        ..Default::default()
    });
    let (c, mut remotes) = controller(inviter);

    let init = tokio::spawn({
        let c = c.clone();
        async move { c.initialize("ctx-3").await }
    });
    let mut server = FakeServer::accept(&mut remotes).await;
    server.accept_join(json!([])).await;

    let err = init.await.unwrap().unwrap_err();
    assert_eq!(err.to_string(), "Failed to invite agent: 500");

    let s = c.state();
    assert_eq!(s.initialization_error.as_deref(), Some("Failed to invite agent: 500"));
    assert!(!s.is_connecting);
    assert!(c.session().is_none());
    server.drain_until_closed().await;
}

#[tokio::test]
async fn test_refused_signaling_is_reported() {
    let c = AgentConversationController::new(
        test_settings(),
        Arc::new(OpusTrackSource::default()),
        Arc::new(RecordingInviter::default()),
        Arc::new(ChannelConnector::refusing()),
    );

    let err = c.initialize("ctx-4").await.unwrap_err();
    let s = c.state();
    assert_eq!(s.initialization_error, Some(err.to_string()));
    assert!(!s.is_connecting);
}

#[tokio::test]
async fn test_no_devices_is_reported() {
    let c = AgentConversationController::new(
        test_settings(),
        Arc::new(OpusTrackSource::new(vec![])),
        Arc::new(RecordingInviter::default()),
        Arc::new(ChannelConnector::new().0),
    );

    assert!(c.initialize("ctx-5").await.is_err());
    assert!(c.state().initialization_error.is_some());
    assert!(c.local_stream().is_none());
}

#[tokio::test]
async fn test_toggle_and_switch_device_after_initialize() {
    let inviter = Arc::new(RecordingInviter::default());
    let (c, mut remotes) = controller(inviter);

    let init = tokio::spawn({
        let c = c.clone();
        async move { c.initialize("ctx-6").await }
    });
    let mut server = FakeServer::accept(&mut remotes).await;
    server
        .accept_join(json!([{"peer_id": "a1", "self_description": "Agent"}]))
        .await;
    init.await.unwrap().unwrap();

    assert_eq!(c.toggle_microphone(), Some(true));
    assert!(c.state().audio_muted);
    assert_eq!(c.toggle_microphone(), Some(false));
    assert!(!c.state().audio_muted);

    let before = c.local_stream().unwrap();
    c.select_audio_device("default").await.unwrap();
    let after = c.local_stream().unwrap();
    assert_ne!(before.id(), after.id());
    assert!(before.tracks().iter().all(|t| t.is_stopped()));

    assert!(c.select_audio_device("missing").await.is_err());
    c.leave_room().await;
}
