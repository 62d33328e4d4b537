use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, warn};

use poker_session::{CredentialService, PokerError, StoryRef};
use poker_types::api::Claims;
use poker_types::events::{CommandError, ErrorCode, GatewayCommand, GatewayEvent, Ready};

use crate::dispatcher::ConnectionHandle;
use crate::sync::{Command, SyncGateway};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long an unauthenticated socket may take to send `identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Drive one WebSocket connection. `claims` is set when the token was already
/// checked at upgrade time; otherwise the client must send `identify` first.
pub async fn handle_connection(
    socket: WebSocket,
    gateway: SyncGateway,
    credentials: CredentialService,
    claims: Option<Claims>,
) {
    let (mut sender, mut receiver) = socket.split();

    let claims = match claims {
        Some(claims) => claims,
        None => match wait_for_identify(&mut receiver, &credentials).await {
            Some(claims) => claims,
            None => {
                warn!("WebSocket client failed to identify, closing");
                return;
            }
        },
    };

    info!("{} ({}) connected to gateway", claims.email, claims.sub);

    let ready = GatewayEvent::Ready(Ready {
        user_id: claims.sub,
        email: claims.email.clone(),
    });
    let Ok(text) = serde_json::to_string(&ready) else {
        return;
    };
    if sender.send(Message::Text(text.into())).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, gateway, claims).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    gateway: SyncGateway,
    claims: Claims,
) {
    let (handle, mut outbound) = ConnectionHandle::new(claims.sub);

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room events + direct replies -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    let Some(frame) = frame else { break };
                    if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_gateway = gateway.clone();
    let recv_handle = handle.clone();
    let email = claims.email.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => dispatch_command(&recv_gateway, &recv_handle, cmd).await,
                    Err(e) => {
                        // Raw frame stays out of the log: it may carry a vote value.
                        warn!(
                            "{} ({}) bad command ({} bytes): {}",
                            email,
                            recv_handle.user_id(),
                            text.len(),
                            e
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.disconnect(&handle).await;
    info!("{} ({}) disconnected from gateway", claims.email, claims.sub);
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    credentials: &CredentialService,
) -> Option<Claims> {
    let identify = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    return credentials.authenticate(&token).ok();
                }
            }
        }
        None
    });

    identify.await.ok().flatten()
}

/// Run one push command and, if it fails, tell only the sender why.
pub async fn dispatch_command(gateway: &SyncGateway, conn: &ConnectionHandle, cmd: GatewayCommand) {
    let name = cmd.name();
    if let Err(e) = handle_command(gateway, conn, cmd).await {
        let code = match &e {
            PokerError::InvalidInput(_) => ErrorCode::InvalidInput,
            PokerError::NotFound(_) => ErrorCode::NotFound,
            PokerError::Forbidden => ErrorCode::Forbidden,
            PokerError::Unauthorized => ErrorCode::Unauthorized,
            PokerError::Storage(_) => ErrorCode::Internal,
        };
        let message = if code == ErrorCode::Internal {
            error!("{} from {} failed: {}", name, conn.user_id(), e);
            "internal error".to_string()
        } else {
            warn!("{} from {} rejected: {}", name, conn.user_id(), e);
            e.to_string()
        };

        conn.send_event(&GatewayEvent::Error(CommandError {
            event: name.to_string(),
            code,
            message,
        }));
    }
}

/// The acting user is always the connection's; `userId` in payloads is ignored.
async fn handle_command(
    gateway: &SyncGateway,
    conn: &ConnectionHandle,
    cmd: GatewayCommand,
) -> Result<(), PokerError> {
    let actor = conn.user_id();

    let command = match cmd {
        GatewayCommand::Identify { .. } => return Ok(()), // Already handled

        GatewayCommand::JoinSession(join) => {
            return gateway.join(join.session_id, conn, join.name).await;
        }

        GatewayCommand::LeaveSession(leave) => {
            gateway.leave(leave.session_id, conn).await;
            return Ok(());
        }

        GatewayCommand::AddStory(add) => Command::AddStory {
            session_id: add.session_id,
            title: add.title,
            description: add.description,
        },

        GatewayCommand::CastVote(vote) => Command::CastVote {
            story: StoryRef::in_session(vote.session_id, vote.story_id),
            value: vote.value.map(|v| v.into_text()).unwrap_or_default(),
            anon_id: vote.anon_id,
        },

        GatewayCommand::RevealVotes(reveal) => Command::RevealVotes {
            story: StoryRef::in_session(reveal.session_id, reveal.story_id),
        },

        GatewayCommand::FinalizeStory(finalize) => Command::FinalizeStory {
            story: StoryRef::in_session(finalize.session_id, finalize.story_id),
            final_point: finalize
                .final_point
                .map(|v| v.into_text())
                .unwrap_or_default(),
        },
    };

    gateway.apply(actor, command).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{Value, json};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use poker_db::{Database, Store};
    use poker_session::SessionMachine;

    use super::*;
    use crate::dispatcher::{Dispatcher, Frame};

    fn gateway() -> SyncGateway {
        let machine = SessionMachine::new(Arc::new(Database::open_in_memory().unwrap()));
        SyncGateway::new(machine, Dispatcher::new())
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    fn command(raw: Value) -> GatewayCommand {
        serde_json::from_value(raw).unwrap()
    }

    #[tokio::test]
    async fn push_reveal_is_host_gated() {
        let gw = gateway();
        let host = Uuid::new_v4();
        let session = gw.machine().create_session(host, None).await.unwrap();
        let story = gw.machine().add_story(session.id, "Login page", None).await.unwrap();

        let (host_conn, mut host_rx) = ConnectionHandle::new(host);
        let (guest_conn, mut guest_rx) = ConnectionHandle::new(Uuid::new_v4());
        for conn in [&host_conn, &guest_conn] {
            dispatch_command(&gw, conn, command(json!({
                "event": "join_session",
                "data": { "sessionId": session.id }
            })))
            .await;
        }
        drain(&mut host_rx);
        drain(&mut guest_rx);

        let reveal = json!({
            "event": "reveal_votes",
            "data": { "sessionId": session.id, "storyId": story.id }
        });
        dispatch_command(&gw, &guest_conn, command(reveal.clone())).await;

        let guest_events = drain(&mut guest_rx);
        assert_eq!(guest_events.len(), 1);
        assert_eq!(guest_events[0]["event"], "error");
        assert_eq!(guest_events[0]["data"]["code"], "forbidden");
        assert_eq!(guest_events[0]["data"]["event"], "reveal_votes");
        assert!(drain(&mut host_rx).is_empty());

        dispatch_command(&gw, &host_conn, command(reveal)).await;
        assert_eq!(drain(&mut guest_rx)[0]["event"], "votes_revealed");
        assert_eq!(drain(&mut host_rx)[0]["event"], "votes_revealed");
    }

    #[tokio::test]
    async fn push_vote_uses_connection_identity() {
        let gw = gateway();
        let session = gw.machine().create_session(Uuid::new_v4(), None).await.unwrap();
        let story = gw.machine().add_story(session.id, "Login page", None).await.unwrap();

        let voter = Uuid::new_v4();
        let (conn, mut rx) = ConnectionHandle::new(voter);
        dispatch_command(&gw, &conn, command(json!({
            "event": "join_session",
            "data": { "sessionId": session.id, "name": "Vic" }
        })))
        .await;
        drain(&mut rx);

        dispatch_command(&gw, &conn, command(json!({
            "event": "cast_vote",
            "data": {
                "sessionId": session.id,
                "storyId": story.id,
                "userId": Uuid::new_v4(),
                "value": 8
            }
        })))
        .await;

        let events = drain(&mut rx);
        assert_eq!(events[0]["event"], "vote_summary");
        assert_eq!(events[0]["data"]["count"], 1);

        let votes = gw.machine().store().list_votes(story.id).unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].user_id, voter);
        assert_eq!(votes[0].value, "8");
    }

    #[tokio::test]
    async fn push_failures_are_acknowledged_to_sender() {
        let gw = gateway();
        let host = Uuid::new_v4();
        let session = gw.machine().create_session(host, None).await.unwrap();
        let (conn, mut rx) = ConnectionHandle::new(host);

        dispatch_command(&gw, &conn, command(json!({
            "event": "join_session",
            "data": { "sessionId": Uuid::new_v4() }
        })))
        .await;
        let events = drain(&mut rx);
        assert_eq!(events[0]["data"]["code"], "not_found");

        dispatch_command(&gw, &conn, command(json!({
            "event": "join_session",
            "data": { "sessionId": session.id }
        })))
        .await;
        drain(&mut rx);

        dispatch_command(&gw, &conn, command(json!({
            "event": "add_story",
            "data": { "sessionId": session.id }
        })))
        .await;
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["data"]["code"], "invalid_input");
        assert_eq!(events[0]["data"]["event"], "add_story");

        dispatch_command(&gw, &conn, command(json!({
            "event": "add_story",
            "data": { "sessionId": session.id, "title": "Checkout" }
        })))
        .await;
        let events = drain(&mut rx);
        assert_eq!(events[0]["event"], "story_added");
        assert_eq!(events[0]["data"]["title"], "Checkout");
    }

    #[tokio::test]
    async fn push_finalize_broadcasts_story() {
        let gw = gateway();
        let host = Uuid::new_v4();
        let session = gw.machine().create_session(host, None).await.unwrap();
        let story = gw.machine().add_story(session.id, "Login page", None).await.unwrap();

        let (conn, mut rx) = ConnectionHandle::new(host);
        dispatch_command(&gw, &conn, command(json!({
            "event": "join_session",
            "data": { "sessionId": session.id }
        })))
        .await;
        drain(&mut rx);

        dispatch_command(&gw, &conn, command(json!({
            "event": "finalize_story",
            "data": { "sessionId": session.id, "storyId": story.id, "finalPoint": "5" }
        })))
        .await;

        let events = drain(&mut rx);
        assert_eq!(events[0]["event"], "story_finalized");
        assert_eq!(events[0]["data"]["finalPoint"], "5");
        assert_eq!(events[0]["data"]["sessionId"], session.id.to_string());
    }
}
