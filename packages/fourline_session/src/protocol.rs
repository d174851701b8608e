//! Session identity, roles, entry context, and the JSON payloads exchanged
//! with the game server over HTTP and the realtime channel.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::board::{Board, Mark};

/// Identity of one party subscribed to a session's channel, as reported by
/// the server.
pub type PartyId = String;

/// Opaque identifier naming one session.
///
/// Numeric ids travel as JSON numbers, anything else as a string. Inbound
/// payloads may use either form; ids compare by their textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Parse a user-supplied id. Blank input is not an id. Numeric ids are
    /// stored in canonical form so `"042"` and `42` name the same session.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.parse::<u64>() {
            Ok(n) => Some(Self::from(n)),
            Err(_) => Some(Self(trimmed.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn as_number(&self) -> Option<u64> {
        self.0
            .parse::<u64>()
            .ok()
            .filter(|n| n.to_string() == self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl FromStr for SessionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionId::parse(s).ok_or_else(|| "session id must not be empty".to_string())
    }
}

impl Serialize for SessionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_number() {
            Some(n) => serializer.serialize_u64(n),
            None => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(u64),
            Text(String),
        }

        match RawId::deserialize(deserializer)? {
            RawId::Number(n) => Ok(SessionId::from(n)),
            RawId::Text(s) => {
                SessionId::parse(&s).ok_or_else(|| serde::de::Error::custom("empty session id"))
            }
        }
    }
}

/// How the local party arrived at the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Create,
    Join,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Join => write!(f, "JOIN"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATE" => Ok(Self::Create),
            "JOIN" => Ok(Self::Join),
            _ => Err(format!("unknown mode: {s} (expected create or join)")),
        }
    }
}

/// Which side the local party plays. Fixed for the life of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    Joiner,
}

impl Role {
    pub fn from_mode(mode: Mode) -> Self {
        match mode {
            Mode::Create => Self::Initiator,
            Mode::Join => Self::Joiner,
        }
    }

    /// Player number used on the wire (`player` and `next` fields).
    pub fn player_code(self) -> u8 {
        match self {
            Self::Initiator => 1,
            Self::Joiner => 2,
        }
    }

    pub fn from_player_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Initiator),
            2 => Some(Self::Joiner),
            _ => None,
        }
    }

    pub fn mark(self) -> Mark {
        match self {
            Self::Initiator => Mark::First,
            Self::Joiner => Mark::Second,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiator => write!(f, "initiator"),
            Self::Joiner => write!(f, "joiner"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryError {
    #[error("no entry context supplied")]
    MissingContext,

    #[error("entry context has no game id")]
    MissingGameId,
}

/// Navigation context a controller is constructed with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryContext {
    #[serde(rename = "gameId", default)]
    pub game_id: Option<SessionId>,
    #[serde(default)]
    pub mode: Option<Mode>,
}

impl EntryContext {
    pub fn new(game_id: SessionId, mode: Mode) -> Self {
        Self {
            game_id: Some(game_id),
            mode: Some(mode),
        }
    }

    /// Resolve the session id and local role. A missing mode means the
    /// party is joining someone else's session.
    pub fn resolve(context: Option<&EntryContext>) -> Result<(SessionId, Role), EntryError> {
        let context = context.ok_or(EntryError::MissingContext)?;
        let game_id = context.game_id.clone().ok_or(EntryError::MissingGameId)?;
        let role = Role::from_mode(context.mode.unwrap_or(Mode::Join));
        Ok((game_id, role))
    }
}

/// Payload of the outbound `join` and `leave` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceIntent {
    pub game_id: SessionId,
    pub player: u8,
}

impl PresenceIntent {
    pub fn new(game_id: &SessionId, role: Role) -> Self {
        Self {
            game_id: game_id.clone(),
            player: role.player_code(),
        }
    }
}

/// Payload of the inbound `connected` and `disconnected` events: the full
/// membership of the session's broadcast group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineSnapshot {
    pub game_id: SessionId,
    #[serde(default)]
    pub online: Vec<PartyId>,
}

/// Payload of the inbound `update` event.
///
/// Only `next` and a full `board` are applied; `position` and `player`
/// are carried through untouched until the move protocol is pinned down.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board: Option<Board>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub player: serde_json::Value,
}

/// Discriminant carried by every HTTP response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultTag {
    Success,
    Fail,
}

/// Body of `GET <base>/fetch/game/<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchGameResponse {
    pub result: ResultTag,
    #[serde(default)]
    pub board: Option<Board>,
    #[serde(default)]
    pub next: Option<u8>,
}
