//! Transport-agnostic view of an inbound message.

use crate::media::InboundAttachment;

/// Chat the message arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInfo {
    /// Chat id.
    pub id: i64,
    /// Chat type (`private`, `group`, `supergroup`, `channel`).
    pub kind: String,
    /// Chat title, for groups and channels.
    pub title: Option<String>,
}

/// Author of the message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SenderInfo {
    /// User id.
    pub id: i64,
    /// Username without the leading `@`.
    pub username: Option<String>,
    /// First name.
    pub first_name: Option<String>,
    /// Last name.
    pub last_name: Option<String>,
}

/// One inbound notification, reduced to what the relay needs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InboundMessage {
    /// Platform message id, used for log correlation.
    pub message_id: i32,
    /// Source chat, when resolvable.
    pub chat: Option<ChatInfo>,
    /// Sender, absent for anonymous channel posts.
    pub sender: Option<SenderInfo>,
    /// Message text or media caption.
    pub text: Option<String>,
    /// At most one attachment.
    pub attachment: Option<InboundAttachment>,
}

impl InboundMessage {
    /// Source chat id, if any.
    #[must_use]
    pub fn chat_id(&self) -> Option<i64> {
        self.chat.as_ref().map(|c| c.id)
    }
}
