//! Gateway wire protocol: the frame envelope, opcodes and payload shapes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::flags::CapabilityFlags;
use crate::models::{Account, MemberPayload, OwnAccount, Role, Server};
use crate::snowflake::Snowflake;

/// Frame purpose tags. Serialized as their integer values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Opcode {
    /// A named event payload to route (inbound).
    Dispatch,
    /// Keepalive carrying the last seen sequence (outbound, or inbound as a
    /// demand for an immediate beat).
    Heartbeat,
    /// Initial authentication (outbound).
    Identify,
    /// Continue a previous session (outbound).
    Resume,
    /// The server demands a fresh connection (inbound).
    Reconnect,
    /// The session is invalid; `d` says whether it can be resumed (inbound).
    InvalidSession,
    /// First frame on every connection, carries the heartbeat interval
    /// (inbound).
    Hello,
    /// Acknowledges the last heartbeat (inbound).
    HeartbeatAck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown gateway opcode {0}")]
pub struct UnknownOpcode(pub u8);

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        match op {
            Opcode::Dispatch => 0,
            Opcode::Heartbeat => 1,
            Opcode::Identify => 2,
            Opcode::Resume => 6,
            Opcode::Reconnect => 7,
            Opcode::InvalidSession => 9,
            Opcode::Hello => 10,
            Opcode::HeartbeatAck => 11,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = UnknownOpcode;

    fn try_from(value: u8) -> Result<Self, UnknownOpcode> {
        match value {
            0 => Ok(Opcode::Dispatch),
            1 => Ok(Opcode::Heartbeat),
            2 => Ok(Opcode::Identify),
            6 => Ok(Opcode::Resume),
            7 => Ok(Opcode::Reconnect),
            9 => Ok(Opcode::InvalidSession),
            10 => Ok(Opcode::Hello),
            11 => Ok(Opcode::HeartbeatAck),
            other => Err(UnknownOpcode(other)),
        }
    }
}

/// The envelope every gateway frame travels in.
///
/// `d` serializes even when absent (`null`): heartbeats on a fresh session
/// carry no sequence yet. `s` and `t` only appear on dispatch frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub op: Opcode,
    #[serde(default)]
    pub d: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl Frame {
    pub fn event_name(&self) -> Option<&str> {
        self.t.as_deref()
    }
}

/// `d` of a Hello frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Hello {
    /// Milliseconds between heartbeats.
    pub heartbeat_interval: u64,
}

/// `d` of a READY dispatch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Ready {
    pub user: OwnAccount,
    pub session_id: String,
    /// Servers the session belongs to, delivered afterwards one
    /// GUILD_CREATE at a time.
    #[serde(default)]
    pub guilds: Vec<UnavailableServer>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UnavailableServer {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}

/// `d` of a GUILD_CREATE dispatch: the server object with its initial
/// member and role lists alongside.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerCreate {
    #[serde(flatten)]
    pub server: Server,
    #[serde(default)]
    pub members: Vec<MemberPayload>,
    #[serde(default)]
    pub roles: Vec<Role>,
}

/// `d` of a GUILD_DELETE dispatch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerDelete {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}

/// `d` of GUILD_MEMBER_ADD and GUILD_MEMBER_UPDATE dispatches.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MemberEvent {
    pub guild_id: Snowflake,
    #[serde(flatten)]
    pub member: MemberPayload,
}

/// `d` of a GUILD_MEMBER_REMOVE dispatch. Carries the account as it was on
/// the wire; the cached member is already gone by the time listeners run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MemberRemove {
    pub guild_id: Snowflake,
    pub user: Account,
}

/// `d` of GUILD_ROLE_CREATE and GUILD_ROLE_UPDATE dispatches.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoleEvent {
    pub guild_id: Snowflake,
    pub role: Role,
}

/// `d` of a GUILD_ROLE_DELETE dispatch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoleDelete {
    pub guild_id: Snowflake,
    pub role_id: Snowflake,
}

/// Static client metadata sent with Identify.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientProperties {
    pub os: String,
    pub client: String,
}

impl Default for ClientProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            client: "chatwire".to_string(),
        }
    }
}

/// Builds a heartbeat frame carrying the last known sequence.
pub fn heartbeat(sequence: Option<u64>) -> Frame {
    Frame {
        op: Opcode::Heartbeat,
        d: sequence.map(Value::from),
        s: None,
        t: None,
    }
}

/// Builds the Identify frame for a fresh session.
pub fn identify(token: &str, capabilities: CapabilityFlags, properties: &ClientProperties) -> Frame {
    Frame {
        op: Opcode::Identify,
        d: Some(json!({
            "token": token,
            "intents": capabilities.bits(),
            "properties": {
                "$os": properties.os,
                "$browser": properties.client,
                "$device": properties.client,
            },
        })),
        s: None,
        t: None,
    }
}

/// Builds the Resume frame continuing a prior session.
pub fn resume(token: &str, session_id: &str, sequence: u64) -> Frame {
    Frame {
        op: Opcode::Resume,
        d: Some(json!({
            "token": token,
            "session_id": session_id,
            "seq": sequence,
        })),
        s: None,
        t: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_frame_decodes() {
        let frame: Frame = serde_json::from_str(r#"{"op":10,"d":{"heartbeat_interval":41250}}"#).unwrap();
        assert_eq!(frame.op, Opcode::Hello);
        let hello: Hello = serde_json::from_value(frame.d.unwrap()).unwrap();
        assert_eq!(hello.heartbeat_interval, 41250);
    }

    #[test]
    fn dispatch_frame_carries_sequence_and_name() {
        let frame: Frame = serde_json::from_str(
            r#"{"op":0,"t":"GUILD_MEMBER_REMOVE","s":5,"d":{"guild_id":10,"user":{"id":99,"username":"u","discriminator":"0001"}}}"#,
        )
        .unwrap();
        assert_eq!(frame.op, Opcode::Dispatch);
        assert_eq!(frame.s, Some(5));
        assert_eq!(frame.event_name(), Some("GUILD_MEMBER_REMOVE"));
        let removal: MemberRemove = serde_json::from_value(frame.d.unwrap()).unwrap();
        assert_eq!(removal.guild_id, Snowflake::new(10));
        assert_eq!(removal.user.id, Snowflake::new(99));
    }

    #[test]
    fn heartbeat_serializes_null_without_sequence() {
        let value = serde_json::to_value(heartbeat(None)).unwrap();
        assert_eq!(value, json!({"op": 1, "d": null}));

        let value = serde_json::to_value(heartbeat(Some(41))).unwrap();
        assert_eq!(value, json!({"op": 1, "d": 41}));
    }

    #[test]
    fn identify_carries_token_capabilities_and_properties() {
        let properties = ClientProperties {
            os: "linux".to_string(),
            client: "chatwire".to_string(),
        };
        let frame = identify("tok", CapabilityFlags::standard(), &properties);
        assert_eq!(frame.op, Opcode::Identify);
        let d = frame.d.unwrap();
        assert_eq!(d["token"], "tok");
        assert_eq!(d["intents"], CapabilityFlags::standard().bits());
        assert_eq!(d["properties"]["$os"], "linux");
        assert_eq!(d["properties"]["$browser"], "chatwire");
    }

    #[test]
    fn resume_carries_session_and_sequence() {
        let frame = resume("tok", "abc", 42);
        assert_eq!(frame.op, Opcode::Resume);
        let d = frame.d.unwrap();
        assert_eq!(d["session_id"], "abc");
        assert_eq!(d["seq"], 42);
    }

    #[test]
    fn unknown_opcode_is_an_error() {
        assert!(serde_json::from_str::<Frame>(r#"{"op":42,"d":null}"#).is_err());
    }

    #[test]
    fn server_create_splits_lists_from_fields() {
        let create: ServerCreate = serde_json::from_value(json!({
            "id": 10,
            "name": "den",
            "unavailable": false,
            "members": [{"user": {"id": 99, "username": "u", "discriminator": "0001"}}],
            "roles": [{"id": 10, "name": "everyone", "position": 0}]
        }))
        .unwrap();
        assert_eq!(create.server.id, Snowflake::new(10));
        assert_eq!(create.server.unavailable, Some(false));
        assert_eq!(create.members.len(), 1);
        assert_eq!(create.roles.len(), 1);
        assert!(create.server.members.is_empty());
    }
}
