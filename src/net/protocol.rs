//! Socket wire protocol
//!
//! Text frames carrying JSON. The first frame a client sends is the
//! handshake `{"token": ...}`; every frame after that, in both directions,
//! is an envelope `{"status": "ok", "kind": ..., "data": ...}`.

use std::fmt;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::session::ClientSession;
use crate::constants::protocol::{STATUS_ERR, STATUS_OK};
use crate::game::catalog::{Catalog, ItemRef};
use crate::game::inventory::{Balances, CellUpdate, Inventory};

/// Kind tag of server messages, the dispatch key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Session claims for this connection
    Session,
    /// User-facing notification
    Toast,
    /// Whether the game is running
    GameState,
    /// Full inventory replace
    Inventory,
    /// Money and energy only
    InventoryBalances,
    /// Single cell replace
    InventoryCell,
    /// Discovered references replace
    InventoryDiscovered,
    /// Catalog replace
    ConfigItems,
}

impl MessageKind {
    pub const ALL: [MessageKind; 8] = [
        MessageKind::Session,
        MessageKind::Toast,
        MessageKind::GameState,
        MessageKind::Inventory,
        MessageKind::InventoryBalances,
        MessageKind::InventoryCell,
        MessageKind::InventoryDiscovered,
        MessageKind::ConfigItems,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Session => "session",
            MessageKind::Toast => "toast",
            MessageKind::GameState => "game_state",
            MessageKind::Inventory => "inventory",
            MessageKind::InventoryBalances => "inventory_balances",
            MessageKind::InventoryCell => "inventory_cell",
            MessageKind::InventoryDiscovered => "inventory_discovered",
            MessageKind::ConfigItems => "config_items",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded server message
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Session(Option<ClientSession>),
    Toast(String),
    GameState(bool),
    Inventory(Inventory),
    InventoryBalances(Balances),
    InventoryCell(CellUpdate),
    InventoryDiscovered(HashSet<ItemRef>),
    ConfigItems(Catalog),
}

impl InboundMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            InboundMessage::Session(_) => MessageKind::Session,
            InboundMessage::Toast(_) => MessageKind::Toast,
            InboundMessage::GameState(_) => MessageKind::GameState,
            InboundMessage::Inventory(_) => MessageKind::Inventory,
            InboundMessage::InventoryBalances(_) => MessageKind::InventoryBalances,
            InboundMessage::InventoryCell(_) => MessageKind::InventoryCell,
            InboundMessage::InventoryDiscovered(_) => MessageKind::InventoryDiscovered,
            InboundMessage::ConfigItems(_) => MessageKind::ConfigItems,
        }
    }

    /// Decode the `data` payload of a message of the given kind
    pub fn from_parts(kind: MessageKind, data: Value) -> Result<Self, ProtocolError> {
        let invalid = |e: serde_json::Error| ProtocolError::InvalidPayload {
            kind,
            reason: e.to_string(),
        };

        Ok(match kind {
            MessageKind::Session => InboundMessage::Session(serde_json::from_value(data).map_err(invalid)?),
            MessageKind::Toast => InboundMessage::Toast(serde_json::from_value(data).map_err(invalid)?),
            MessageKind::GameState => InboundMessage::GameState(serde_json::from_value(data).map_err(invalid)?),
            MessageKind::Inventory => InboundMessage::Inventory(serde_json::from_value(data).map_err(invalid)?),
            MessageKind::InventoryBalances => {
                InboundMessage::InventoryBalances(serde_json::from_value(data).map_err(invalid)?)
            }
            MessageKind::InventoryCell => {
                InboundMessage::InventoryCell(serde_json::from_value(data).map_err(invalid)?)
            }
            MessageKind::InventoryDiscovered => {
                InboundMessage::InventoryDiscovered(serde_json::from_value(data).map_err(invalid)?)
            }
            MessageKind::ConfigItems => {
                InboundMessage::ConfigItems(serde_json::from_value(data).map_err(invalid)?)
            }
        })
    }
}

/// Client messages
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Request game, catalog and inventory state
    GetGame,
    /// Request the full inventory
    GetInventory,
    /// Swap two cells
    ActionSwap { cell: usize, other: usize },
    /// Merge `other` into `cell`
    ActionMerge { cell: usize, other: usize },
    /// Buy an item into a cell
    ActionBuy { cell: usize, item: ItemRef },
    /// Sell the item in a cell
    ActionSell { cell: usize },
}

impl OutboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::GetGame => "get_game",
            OutboundMessage::GetInventory => "get_inventory",
            OutboundMessage::ActionSwap { .. } => "action_swap",
            OutboundMessage::ActionMerge { .. } => "action_merge",
            OutboundMessage::ActionBuy { .. } => "action_buy",
            OutboundMessage::ActionSell { .. } => "action_sell",
        }
    }

    fn data(&self) -> Value {
        match self {
            OutboundMessage::GetGame | OutboundMessage::GetInventory => Value::Null,
            OutboundMessage::ActionSwap { cell, other } | OutboundMessage::ActionMerge { cell, other } => {
                json!({ "cell": cell, "other": other })
            }
            OutboundMessage::ActionBuy { cell, item } => json!({ "cell": cell, "item": item }),
            OutboundMessage::ActionSell { cell } => json!({ "cell": cell }),
        }
    }

    pub fn into_envelope(self) -> Envelope {
        Envelope {
            status: STATUS_OK.to_string(),
            kind: self.kind().to_string(),
            data: self.data(),
        }
    }
}

/// Post-handshake message wrapper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub status: String,
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

/// First frame on a fresh connection
#[derive(Debug, Clone, Serialize)]
pub struct Handshake<'a> {
    pub token: Option<&'a str>,
}

/// Inbound frame before the kind is resolved
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Protocol faults, all of them recoverable by dropping the frame
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(String),
    #[error("Frame has no kind")]
    MissingKind,
    #[error("Unknown message kind '{0}'")]
    UnknownKind(String),
    #[error("Invalid '{kind}' payload: {reason}")]
    InvalidPayload { kind: MessageKind, reason: String },
    #[error("Server reported error: {0}")]
    ServerError(String),
    #[error("Encode error: {0}")]
    Encode(String),
}

/// Encode a frame as JSON text
pub fn encode<T: Serialize>(frame: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(frame).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decode a raw text frame from the server
pub fn decode(raw: &str) -> Result<InboundMessage, ProtocolError> {
    let frame: RawFrame =
        serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    if frame.status.as_deref() == Some(STATUS_ERR) {
        let reason = match frame.data {
            Value::String(reason) => reason,
            Value::Null => frame.kind.unwrap_or_default(),
            other => other.to_string(),
        };
        return Err(ProtocolError::ServerError(reason));
    }

    let kind = frame.kind.ok_or(ProtocolError::MissingKind)?;
    let kind = MessageKind::parse(&kind).ok_or(ProtocolError::UnknownKind(kind))?;
    InboundMessage::from_parts(kind, frame.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_roundtrip() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::parse("leaderboard"), None);
    }

    #[test]
    fn test_envelope_shape() {
        let encoded = encode(&OutboundMessage::GetGame.into_envelope()).unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value, json!({ "status": "ok", "kind": "get_game", "data": null }));

        let encoded = encode(&OutboundMessage::ActionBuy {
            cell: 4,
            item: ItemRef::from("t1.1"),
        }
        .into_envelope())
        .unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(
            value,
            json!({ "status": "ok", "kind": "action_buy", "data": { "cell": 4, "item": "t1.1" } })
        );
    }

    #[test]
    fn test_handshake_shape() {
        let encoded = encode(&Handshake { token: Some("abc") }).unwrap();
        assert_eq!(encoded, r#"{"token":"abc"}"#);

        let encoded = encode(&Handshake { token: None }).unwrap();
        assert_eq!(encoded, r#"{"token":null}"#);
    }

    #[test]
    fn test_decode_balances() {
        let msg = decode(r#"{"status":"ok","kind":"inventory_balances","data":{"money":10,"energy":3}}"#)
            .unwrap();
        match msg {
            InboundMessage::InventoryBalances(b) => {
                assert_eq!(b.money, 10);
                assert_eq!(b.energy, 3);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_decode_cell_clear() {
        let msg = decode(r#"{"status":"ok","kind":"inventory_cell","data":{"index":3,"item":null}}"#).unwrap();
        match msg {
            InboundMessage::InventoryCell(update) => {
                assert_eq!(update.index, 3);
                assert!(update.item.is_none());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_decode_session_null() {
        let msg = decode(r#"{"status":"ok","kind":"session","data":null}"#).unwrap();
        assert!(matches!(msg, InboundMessage::Session(None)));
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode("not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(decode(r#"{"data": 1}"#), Err(ProtocolError::MissingKind)));
        assert!(matches!(
            decode(r#"{"status":"ok","kind":"stats","data":{}}"#),
            Err(ProtocolError::UnknownKind(kind)) if kind == "stats"
        ));
        assert!(matches!(
            decode(r#"{"status":"ok","kind":"game_state","data":"yes"}"#),
            Err(ProtocolError::InvalidPayload { kind: MessageKind::GameState, .. })
        ));
        assert!(matches!(
            decode(r#"{"status":"err","data":"Internal error"}"#),
            Err(ProtocolError::ServerError(reason)) if reason == "Internal error"
        ));
    }
}
