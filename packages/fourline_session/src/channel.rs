//! Realtime presence channel: the seam between a controller and whatever
//! carries its session-scoped broadcast group.
//!
//! A [`Subscription`] is the controller's end: it sends [`Outbound`]
//! intents and receives [`ChannelEvent`]s. The implementation holds the
//! matching [`SubscriptionRemote`]. Dropping the subscription closes the
//! outbound queue after whatever was already queued, which is how the
//! remote learns the subscriber is gone.

use serde_json::Value;
use tokio::sync::mpsc;

use crate::engine_io::ProtocolError;
use crate::protocol::{BoardPatch, OnlineSnapshot, PartyId, PresenceIntent, SessionId};

/// Inbound wire event carrying a membership snapshot after a join.
pub const EVENT_CONNECTED: &str = "connected";
/// Inbound wire event carrying a membership snapshot after a leave.
pub const EVENT_DISCONNECTED: &str = "disconnected";
/// Inbound wire event carrying a board update.
pub const EVENT_UPDATE: &str = "update";

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Transport is (re)connected.
    LinkUp,
    /// Transport dropped or could not connect. Presence is stale until the
    /// next snapshot.
    LinkDown { reason: String },
    /// Full membership of the session's group.
    Presence {
        game_id: SessionId,
        online: Vec<PartyId>,
    },
    BoardChanged(BoardPatch),
}

impl ChannelEvent {
    /// Map a named wire event to a channel event. Unknown names yield
    /// `Ok(None)`.
    pub fn from_wire(name: &str, payload: Option<&Value>) -> Result<Option<Self>, ProtocolError> {
        match name {
            EVENT_CONNECTED | EVENT_DISCONNECTED => {
                let payload = payload
                    .ok_or_else(|| ProtocolError::MalformedEvent(format!("{name} without payload")))?;
                let snapshot: OnlineSnapshot = serde_json::from_value(payload.clone())?;
                Ok(Some(Self::Presence {
                    game_id: snapshot.game_id,
                    online: snapshot.online,
                }))
            }
            EVENT_UPDATE => {
                let patch: BoardPatch = match payload {
                    Some(p) => serde_json::from_value(p.clone())?,
                    None => BoardPatch::default(),
                };
                Ok(Some(Self::BoardChanged(patch)))
            }
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Join(PresenceIntent),
    Leave(PresenceIntent),
}

impl Outbound {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Leave(_) => "leave",
        }
    }

    pub fn intent(&self) -> &PresenceIntent {
        match self {
            Self::Join(intent) | Self::Leave(intent) => intent,
        }
    }
}

/// Opens session-scoped subscriptions.
pub trait PresenceChannel: Send + Sync + 'static {
    /// Start a subscription for `game_id`. Must return without waiting on
    /// the network; connection progress arrives as `LinkUp`/`LinkDown`.
    fn subscribe(&self, game_id: &SessionId) -> Subscription;
}

/// Controller-side end of one subscription.
#[derive(Debug)]
pub struct Subscription {
    game_id: SessionId,
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// Implementation-side end of one subscription.
#[derive(Debug)]
pub struct SubscriptionRemote {
    pub game_id: SessionId,
    pub events: mpsc::UnboundedSender<ChannelEvent>,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl SubscriptionRemote {
    /// Deliver an event to the subscriber. False once it has gone away.
    pub fn deliver(&self, event: ChannelEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

impl Subscription {
    pub fn pair(game_id: &SessionId) -> (Subscription, SubscriptionRemote) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Subscription {
                game_id: game_id.clone(),
                outbound: outbound_tx,
                events: events_rx,
            },
            SubscriptionRemote {
                game_id: game_id.clone(),
                events: events_tx,
                outbound: outbound_rx,
            },
        )
    }

    pub fn game_id(&self) -> &SessionId {
        &self.game_id
    }

    /// Queue an intent. False if the remote side has already shut down.
    pub fn send(&self, msg: Outbound) -> bool {
        self.outbound.send(msg).is_ok()
    }

    /// Next inbound event; `None` once the remote side has shut down.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn presence_events_decode_from_both_names() {
        for name in [EVENT_CONNECTED, EVENT_DISCONNECTED] {
            let payload = json!({"game_id": "42", "online": ["p1", "p2"]});
            let event = ChannelEvent::from_wire(name, Some(&payload)).unwrap().unwrap();
            assert_eq!(
                event,
                ChannelEvent::Presence {
                    game_id: SessionId::from(42),
                    online: vec!["p1".to_string(), "p2".to_string()],
                }
            );
        }
    }

    #[test]
    fn presence_event_without_payload_is_malformed() {
        assert!(ChannelEvent::from_wire(EVENT_CONNECTED, None).is_err());
    }

    #[test]
    fn update_event_decodes_patch() {
        let payload = json!({"position": 3, "next": 1, "player": "p1"});
        let Some(ChannelEvent::BoardChanged(patch)) =
            ChannelEvent::from_wire(EVENT_UPDATE, Some(&payload)).unwrap()
        else {
            panic!("expected board change");
        };
        assert_eq!(patch.next, Some(1));
        assert_eq!(patch.player, json!("p1"));
    }

    #[test]
    fn unknown_events_are_ignored() {
        assert!(ChannelEvent::from_wire("chat", None).unwrap().is_none());
    }

    #[tokio::test]
    async fn dropping_subscription_closes_outbound_after_queued_messages() {
        let id = SessionId::from(42);
        let (sub, mut remote) = Subscription::pair(&id);
        let intent = PresenceIntent {
            game_id: id.clone(),
            player: 2,
        };
        assert!(sub.send(Outbound::Leave(intent.clone())));
        drop(sub);

        assert_eq!(remote.outbound.recv().await, Some(Outbound::Leave(intent)));
        assert_eq!(remote.outbound.recv().await, None);
        assert!(!remote.deliver(ChannelEvent::LinkUp));
    }

    #[test]
    fn outbound_names() {
        let intent = PresenceIntent {
            game_id: SessionId::from(1),
            player: 1,
        };
        assert_eq!(Outbound::Join(intent.clone()).event_name(), "join");
        assert_eq!(Outbound::Leave(intent).event_name(), "leave");
    }
}
