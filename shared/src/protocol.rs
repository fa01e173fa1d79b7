use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Values per entry in `Snapshot::new_marbles`: entryId, userId, name, size, color.
pub const NEW_MARBLE_STRIDE: usize = 5;
/// Values per entry in `Snapshot::finished_marbles`: entryId, time.
pub const FINISHED_MARBLE_STRIDE: usize = 2;

/// Round life-cycle state as seen by viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/generated/")]
#[serde(rename_all = "lowercase")]
pub enum GameStateName {
    Waiting,
    Enter,
    Starting,
    Started,
}

impl GameStateName {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStateName::Waiting => "waiting",
            GameStateName::Enter => "enter",
            GameStateName::Starting => "starting",
            GameStateName::Started => "started",
        }
    }
}

impl std::fmt::Display for GameStateName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scalar inside the flat `n` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/generated/")]
#[serde(untagged)]
pub enum WireValue {
    Int(u64),
    Float(f64),
    Text(String),
    Null,
}

/// Per-tick state delta. Every key is optional; absence means "unchanged".
///
/// Encoded as a MessagePack map (`rmp_serde::to_vec_named`) and sent as a
/// binary WebSocket frame. Clients must apply snapshots in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/generated/")]
pub struct Snapshot {
    /// [entryPeriodLength, finishPeriodLength] in seconds
    #[serde(rename = "s")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub server_constants: Option<[f64; 2]>,
    #[serde(rename = "l")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub level_id: Option<String>,
    #[serde(rename = "g")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub game_state: Option<GameStateName>,
    /// Milliseconds: enter period remaining (enter) or race time (started)
    #[serde(rename = "c")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub state_context: Option<u64>,
    #[serde(rename = "n")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub new_marbles: Option<Vec<WireValue>>,
    #[serde(rename = "f")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub finished_marbles: Option<Vec<u64>>,
    #[serde(rename = "p")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub positions: Option<Vec<f32>>,
    #[serde(rename = "r")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub rotations: Option<Vec<f32>>,
}

/// Decoded view of one `n` quintuple.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMarbleWire {
    pub entry_id: u64,
    pub user_id: Option<String>,
    pub name: String,
    pub size: f64,
    pub color: String,
}

impl NewMarbleWire {
    pub fn to_values(&self) -> [WireValue; NEW_MARBLE_STRIDE] {
        [
            WireValue::Int(self.entry_id),
            self.user_id
                .clone()
                .map(WireValue::Text)
                .unwrap_or(WireValue::Null),
            WireValue::Text(self.name.clone()),
            WireValue::Float(self.size),
            WireValue::Text(self.color.clone()),
        ]
    }

    fn from_values(values: &[WireValue]) -> Option<Self> {
        let entry_id = match values.first()? {
            WireValue::Int(id) => *id,
            _ => return None,
        };
        let user_id = match values.get(1)? {
            WireValue::Text(id) => Some(id.clone()),
            WireValue::Null => None,
            WireValue::Int(id) => Some(id.to_string()),
            WireValue::Float(_) => return None,
        };
        let name = match values.get(2)? {
            WireValue::Text(name) => name.clone(),
            _ => return None,
        };
        let size = match values.get(3)? {
            WireValue::Float(size) => *size,
            WireValue::Int(size) => *size as f64,
            _ => return None,
        };
        let color = match values.get(4)? {
            WireValue::Text(color) => color.clone(),
            _ => return None,
        };
        Some(Self {
            entry_id,
            user_id,
            name,
            size,
            color,
        })
    }
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        *self == Snapshot::default()
    }

    pub fn encode(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }

    /// Split the flat `n` array back into marbles. Malformed tails are dropped.
    pub fn new_marble_entries(&self) -> Vec<NewMarbleWire> {
        self.new_marbles
            .as_deref()
            .unwrap_or_default()
            .chunks_exact(NEW_MARBLE_STRIDE)
            .filter_map(NewMarbleWire::from_values)
            .collect()
    }

    /// (entryId, time in ms) pairs from the flat `f` array.
    pub fn finished_entries(&self) -> Vec<(u64, u64)> {
        self.finished_marbles
            .as_deref()
            .unwrap_or_default()
            .chunks_exact(FINISHED_MARBLE_STRIDE)
            .map(|pair| (pair[0], pair[1]))
            .collect()
    }
}

// === Text frames ===

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/generated/")]
#[serde(tag = "type")]
pub enum ServerMsg {
    #[serde(rename = "notification")]
    Notification(NotificationMsg),
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/generated/")]
pub struct NotificationMsg {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/generated/")]
#[serde(tag = "type")]
pub enum ClientMsg {
    /// A chat line relayed by a chat front end.
    #[serde(rename = "chat", rename_all = "camelCase")]
    Chat {
        user_id: String,
        username: String,
        content: String,
    },
}
