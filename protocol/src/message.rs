//! The two message kinds exchanged between broker and viewers.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::update::{UpdatePayload, UpdateType};

/// A decoded wire message.
///
/// Viewers send [`WireMessage::Subscribe`]; the broker sends
/// [`WireMessage::Update`]. The `msg_type` tag of a subscription is
/// `"register"` for compatibility with existing viewers.
///
/// ```text
/// {"msg_type": "register", "for_types": ["stack", "bt"]}
/// {"msg_type": "update", "update_type": "bt", "data": "#0 main () at a.c:3\n"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msg_type")]
pub enum WireMessage {
    /// Replace the sender's subscription with `for_types`
    #[serde(rename = "register")]
    Subscribe { for_types: BTreeSet<UpdateType> },

    /// Debugger state pushed to a subscriber
    #[serde(rename = "update")]
    Update(UpdatePayload),
}

impl WireMessage {
    /// Build a subscription message from any collection of update types.
    pub fn subscribe<I>(types: I) -> Self
    where
        I: IntoIterator<Item = UpdateType>,
    {
        WireMessage::Subscribe {
            for_types: types.into_iter().collect(),
        }
    }

    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Subscribe { .. } => "subscribe",
            WireMessage::Update(_) => "update",
        }
    }
}

impl From<UpdatePayload> for WireMessage {
    fn from(payload: UpdatePayload) -> Self {
        WireMessage::Update(payload)
    }
}
