use tracing::info;
use uuid::Uuid;

use poker_session::{PokerError, Revealed, SessionMachine, StoryRef};
use poker_types::events::{
    GatewayEvent, ParticipantChange, ParticipantUpdate, VoteSummary, VotesRevealed,
};
use poker_types::models::{Story, Vote};

use crate::dispatcher::{ConnectionHandle, Dispatcher};

/// A state-changing action, independent of the surface it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    AddStory {
        session_id: Uuid,
        title: String,
        description: Option<String>,
    },
    CastVote {
        story: StoryRef,
        value: String,
        anon_id: Option<String>,
    },
    RevealVotes {
        story: StoryRef,
    },
    FinalizeStory {
        story: StoryRef,
        final_point: String,
    },
}

/// What a command produced, for the caller's reply.
#[derive(Debug, Clone)]
pub enum Applied {
    StoryAdded(Story),
    VoteCast(Vote),
    VotesRevealed(Revealed),
    StoryFinalized(Story),
}

/// The one place mutations happen. Each command is applied to the state
/// machine first and only broadcast once that succeeded, so anything a room
/// sees can already be read back through the session view.
#[derive(Clone)]
pub struct SyncGateway {
    machine: SessionMachine,
    dispatcher: Dispatcher,
}

impl SyncGateway {
    pub fn new(machine: SessionMachine, dispatcher: Dispatcher) -> Self {
        Self {
            machine,
            dispatcher,
        }
    }

    pub fn machine(&self) -> &SessionMachine {
        &self.machine
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Apply a command on behalf of `actor` and publish the result to the
    /// affected session room.
    pub async fn apply(&self, actor: Uuid, command: Command) -> Result<Applied, PokerError> {
        match command {
            Command::AddStory {
                session_id,
                title,
                description,
            } => {
                let story = self.machine.add_story(session_id, &title, description).await?;
                self.dispatcher
                    .publish(story.session_id, &GatewayEvent::StoryAdded(story.clone()))
                    .await;
                Ok(Applied::StoryAdded(story))
            }

            Command::CastVote {
                story,
                value,
                anon_id,
            } => {
                let receipt = self.machine.cast_vote(story, actor, &value, anon_id).await?;
                // Count only. Values stay hidden until reveal or finalize.
                let summary = VoteSummary {
                    story_id: receipt.vote.story_id,
                    count: receipt.count,
                };
                self.dispatcher
                    .publish(receipt.session_id, &GatewayEvent::VoteSummary(summary))
                    .await;
                Ok(Applied::VoteCast(receipt.vote))
            }

            Command::RevealVotes { story } => {
                let revealed = self.machine.reveal_votes(story, actor).await?;
                let event = GatewayEvent::VotesRevealed(VotesRevealed {
                    story_id: revealed.story_id,
                    votes: revealed.votes.clone(),
                });
                self.dispatcher.publish(revealed.session_id, &event).await;
                Ok(Applied::VotesRevealed(revealed))
            }

            Command::FinalizeStory { story, final_point } => {
                let story = self.machine.finalize_story(story, actor, &final_point).await?;
                self.dispatcher
                    .publish(story.session_id, &GatewayEvent::StoryFinalized(story.clone()))
                    .await;
                Ok(Applied::StoryFinalized(story))
            }
        }
    }

    /// Subscribe a connection to a session room and announce it to everyone
    /// in the room, the joiner included. The joiner also gets one `join`
    /// update per connection that was already there.
    pub async fn join(
        &self,
        session_id: Uuid,
        conn: &ConnectionHandle,
        name: Option<String>,
    ) -> Result<(), PokerError> {
        if !self.machine.session_exists(session_id).await? {
            return Err(PokerError::NotFound("session"));
        }

        let name = name.filter(|n| !n.trim().is_empty());
        if self.dispatcher.subscribe(session_id, conn, name.clone()).await {
            info!(
                "User {} joined session {} ({} connections)",
                conn.user_id(),
                session_id,
                self.dispatcher.room_size(session_id).await
            );
        }

        for member in self.dispatcher.members(session_id).await {
            if member.conn_id == conn.id() {
                continue;
            }
            conn.send_event(&GatewayEvent::ParticipantUpdate(ParticipantUpdate {
                user_id: member.user_id,
                name: member.name,
                change: ParticipantChange::Join,
            }));
        }

        let update = ParticipantUpdate {
            user_id: conn.user_id(),
            name,
            change: ParticipantChange::Join,
        };
        self.dispatcher
            .publish(session_id, &GatewayEvent::ParticipantUpdate(update))
            .await;
        Ok(())
    }

    pub async fn leave(&self, session_id: Uuid, conn: &ConnectionHandle) {
        if let Some(member) = self.dispatcher.unsubscribe(session_id, conn.id()).await {
            info!("User {} left session {}", member.user_id, session_id);
            self.announce_leave(session_id, member.user_id).await;
        }
    }

    /// Connection lost: leave every room it was in.
    pub async fn disconnect(&self, conn: &ConnectionHandle) {
        for (session_id, member) in self.dispatcher.unsubscribe_all(conn.id()).await {
            self.announce_leave(session_id, member.user_id).await;
        }
    }

    async fn announce_leave(&self, session_id: Uuid, user_id: Uuid) {
        let update = ParticipantUpdate {
            user_id,
            name: None,
            change: ParticipantChange::Leave,
        };
        self.dispatcher
            .publish(session_id, &GatewayEvent::ParticipantUpdate(update))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use poker_db::Database;

    use super::*;
    use crate::dispatcher::Frame;

    fn gateway() -> SyncGateway {
        let machine = SessionMachine::new(Arc::new(Database::open_in_memory().unwrap()));
        SyncGateway::new(machine, Dispatcher::new())
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn vote_broadcast_is_count_only() {
        let gw = gateway();
        let host = Uuid::new_v4();
        let session = gw.machine().create_session(host, None).await.unwrap();
        let story = gw.machine().add_story(session.id, "Login page", None).await.unwrap();

        let (watcher, mut rx) = ConnectionHandle::new(host);
        gw.join(session.id, &watcher, None).await.unwrap();
        drain(&mut rx);

        let voter = Uuid::new_v4();
        let command = Command::CastVote {
            story: StoryRef::in_session(session.id, story.id),
            value: "13".into(),
            anon_id: None,
        };
        gw.apply(voter, command).await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event"], "vote_summary");
        assert_eq!(events[0]["data"]["count"], 1);
        assert!(!events[0].to_string().contains("13"));
    }

    #[tokio::test]
    async fn reveal_publishes_values_to_the_room() {
        let gw = gateway();
        let (u1, u2, u3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let session = gw.machine().create_session(u1, None).await.unwrap();
        let story = gw.machine().add_story(session.id, "Login page", None).await.unwrap();
        let sref = StoryRef::in_session(session.id, story.id);

        let (conn, mut rx) = ConnectionHandle::new(u2);
        gw.join(session.id, &conn, Some("Bea".into())).await.unwrap();

        for (user, value) in [(u2, "3"), (u3, "5")] {
            let cmd = Command::CastVote {
                story: sref,
                value: value.into(),
                anon_id: None,
            };
            gw.apply(user, cmd).await.unwrap();
        }
        drain(&mut rx);

        gw.apply(u1, Command::RevealVotes { story: sref }).await.unwrap();
        let events = drain(&mut rx);
        assert_eq!(events[0]["event"], "votes_revealed");
        let mut values: Vec<String> = events[0]["data"]["votes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["value"].as_str().unwrap().to_string())
            .collect();
        values.sort();
        assert_eq!(values, ["3", "5"]);

        gw.apply(
            u1,
            Command::FinalizeStory {
                story: sref,
                final_point: "5".into(),
            },
        )
        .await
        .unwrap();
        let events = drain(&mut rx);
        assert_eq!(events[0]["event"], "story_finalized");
        assert_eq!(events[0]["data"]["finalPoint"], "5");

        let view = gw.machine().session_view(session.id, u3).await.unwrap();
        assert!(view.stories[0].votes.iter().all(|v| v.value.is_some()));
    }

    #[tokio::test]
    async fn rejected_command_publishes_nothing() {
        let gw = gateway();
        let host = Uuid::new_v4();
        let session = gw.machine().create_session(host, None).await.unwrap();
        let story = gw.machine().add_story(session.id, "Login page", None).await.unwrap();

        let (conn, mut rx) = ConnectionHandle::new(host);
        gw.join(session.id, &conn, None).await.unwrap();
        drain(&mut rx);

        let intruder = Uuid::new_v4();
        let err = gw
            .apply(
                intruder,
                Command::RevealVotes {
                    story: StoryRef::in_session(session.id, story.id),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PokerError::Forbidden));

        let err = gw
            .apply(
                host,
                Command::AddStory {
                    session_id: session.id,
                    title: String::new(),
                    description: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PokerError::InvalidInput(_)));

        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn story_added_is_readable_when_broadcast() {
        let gw = gateway();
        let host = Uuid::new_v4();
        let session = gw.machine().create_session(host, None).await.unwrap();

        let (conn, mut rx) = ConnectionHandle::new(host);
        gw.join(session.id, &conn, None).await.unwrap();
        drain(&mut rx);

        let applied = gw
            .apply(
                host,
                Command::AddStory {
                    session_id: session.id,
                    title: "Checkout".into(),
                    description: Some("Card payments".into()),
                },
            )
            .await
            .unwrap();
        let Applied::StoryAdded(story) = applied else {
            panic!("expected StoryAdded");
        };

        let events = drain(&mut rx);
        assert_eq!(events[0]["event"], "story_added");
        assert_eq!(events[0]["data"]["id"], story.id.to_string());

        let view = gw.machine().session_view(session.id, host).await.unwrap();
        assert_eq!(view.stories[0].id, story.id);
    }

    #[tokio::test]
    async fn join_leave_and_disconnect_announce_participants() {
        let gw = gateway();
        let session = gw.machine().create_session(Uuid::new_v4(), None).await.unwrap();

        let (alice, mut alice_rx) = ConnectionHandle::new(Uuid::new_v4());
        let (bob, mut bob_rx) = ConnectionHandle::new(Uuid::new_v4());

        gw.join(session.id, &alice, Some("Alice".into())).await.unwrap();
        let events = drain(&mut alice_rx);
        assert_eq!(events[0]["data"]["type"], "join");
        assert_eq!(events[0]["data"]["name"], "Alice");

        gw.join(session.id, &bob, None).await.unwrap();
        assert_eq!(drain(&mut alice_rx)[0]["data"]["userId"], bob.user_id().to_string());
        drain(&mut bob_rx);

        gw.leave(session.id, &bob).await;
        let events = drain(&mut alice_rx);
        assert_eq!(events[0]["data"]["type"], "leave");
        assert_eq!(events[0]["data"]["userId"], bob.user_id().to_string());
        // Bob is already out of the room
        assert!(drain(&mut bob_rx).is_empty());

        // Leaving twice is silent
        gw.leave(session.id, &bob).await;
        assert!(drain(&mut alice_rx).is_empty());

        gw.join(session.id, &bob, None).await.unwrap();
        drain(&mut alice_rx);
        gw.disconnect(&alice).await;
        let events = drain(&mut bob_rx);
        assert!(events.iter().any(|e| e["data"]["type"] == "leave"
            && e["data"]["userId"] == alice.user_id().to_string()));
        assert_eq!(gw.dispatcher().room_size(session.id).await, 1);
    }

    #[tokio::test]
    async fn joiner_receives_current_roster() {
        let gw = gateway();
        let session = gw.machine().create_session(Uuid::new_v4(), None).await.unwrap();

        let (alice, mut alice_rx) = ConnectionHandle::new(Uuid::new_v4());
        let (bob, _bob_rx) = ConnectionHandle::new(Uuid::new_v4());
        gw.join(session.id, &alice, Some("Alice".into())).await.unwrap();
        gw.join(session.id, &bob, None).await.unwrap();
        drain(&mut alice_rx);

        let (carol, mut carol_rx) = ConnectionHandle::new(Uuid::new_v4());
        gw.join(session.id, &carol, Some("Carol".into())).await.unwrap();

        let events = drain(&mut carol_rx);
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e["data"]["type"] == "join"));
        let mut seen: Vec<String> = events
            .iter()
            .map(|e| e["data"]["userId"].as_str().unwrap().to_string())
            .collect();
        seen.sort();
        let mut expected = vec![
            alice.user_id().to_string(),
            bob.user_id().to_string(),
            carol.user_id().to_string(),
        ];
        expected.sort();
        assert_eq!(seen, expected);
        assert!(events.iter().any(|e| e["data"]["name"] == "Alice"));

        // Existing members only hear about the newcomer
        let events = drain(&mut alice_rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["data"]["userId"], carol.user_id().to_string());

        // Re-joining does not list the connection to itself
        gw.join(session.id, &carol, None).await.unwrap();
        let events = drain(&mut carol_rx);
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn join_unknown_session_is_not_found() {
        let gw = gateway();
        let (conn, _rx) = ConnectionHandle::new(Uuid::new_v4());
        let missing = Uuid::new_v4();

        let err = gw.join(missing, &conn, None).await.unwrap_err();
        assert!(matches!(err, PokerError::NotFound("session")));
        assert_eq!(gw.dispatcher().room_size(missing).await, 0);
    }
}
