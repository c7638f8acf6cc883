//! Protocol definitions for the Veil broker
//!
//! All messages are sent as JSON text frames over WebSocket. Field names are
//! camelCase on the wire so existing web clients keep working unchanged.
//!
//! ## Encryption
//!
//! The broker never decrypts anything. An encrypted message carries the
//! sender's key fingerprint (partition key), a sealed copy of the passphrase
//! (`envelope_key`, proof of possession), and the sealed message text
//! (`payload`). A public message has empty `key_fingerprint` and
//! `envelope_key` and a plaintext `payload`. See the `envelope` module for
//! the exact sealing format.

use serde::{Deserialize, Serialize};

/// A connected identity: opaque session handle plus server-generated
/// display name. Created on admission, immutable, destroyed on disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u32,
    pub username: String,
}

/// A finalized chat message as relayed to every client
///
/// `id` and `timestamp` are server-assigned; `timestamp` is unix
/// milliseconds and monotonically non-decreasing across the broker's
/// lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub username: String,
    /// Partition key: base64 SHA-256 of the group passphrase, or "" for public
    pub key_fingerprint: String,
    /// Sealed copy of the passphrase itself, or "" for public
    pub envelope_key: String,
    /// Sealed message text, or plaintext for public messages
    pub payload: String,
    pub timestamp: u64,
}

/// Client request messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Send a chat message (public or sealed)
    ChatSend {
        key_fingerprint: String,
        envelope_key: String,
        payload: String,
    },
}

/// Server event messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Sent once to a newly admitted connection: its own identity, the
    /// current presence set, and the merged message history.
    Welcome {
        user: User,
        users: Vec<User>,
        messages: Vec<ChatMessage>,
    },
    /// A finalized message, broadcast to all connections including the sender
    ChatMessage { message: ChatMessage },
    /// Broadcast to all connections except the one that joined
    UserJoined { user: User },
    /// Broadcast on disconnect
    UserLeft { user: User },
}
