//! Provenance caption attached to every relayed still.

use crate::relay::message::{ChatInfo, InboundMessage, SenderInfo};

/// Maximum caption length accepted by `sendPhoto`, in characters.
pub const CAPTION_LIMIT: usize = 1024;

/// Human label for the message author.
#[must_use]
pub fn sender_label(sender: Option<&SenderInfo>) -> String {
    let Some(sender) = sender else {
        return "unknown".to_string();
    };
    if let Some(username) = sender.username.as_deref().filter(|u| !u.is_empty()) {
        return format!("@{username}");
    }
    let name = [sender.first_name.as_deref(), sender.last_name.as_deref()]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let name = name.trim();
    if name.is_empty() {
        format!("user:{}", sender.id)
    } else {
        name.to_string()
    }
}

/// Human label for the source chat.
#[must_use]
pub fn source_label(chat: Option<&ChatInfo>) -> String {
    match chat {
        None => "unknown".to_string(),
        Some(ChatInfo {
            id,
            title: Some(title),
            ..
        }) if !title.is_empty() => format!("{title} ({id})"),
        Some(ChatInfo { id, kind, .. }) => format!("{kind} ({id})"),
    }
}

/// Caption for a still extracted from `kind`, truncated to [`CAPTION_LIMIT`].
#[must_use]
pub fn compose_caption(kind: &str, message: &InboundMessage) -> String {
    let mut caption = format!(
        "Extracted still from {kind}\nFrom: {}\nSource: {}",
        sender_label(message.sender.as_ref()),
        source_label(message.chat.as_ref()),
    );
    if let Some(text) = message.text.as_deref().filter(|t| !t.is_empty()) {
        caption.push_str("\nText: ");
        caption.push_str(text);
    }
    truncate_str(caption, CAPTION_LIMIT)
}

/// Truncates a string to `max_chars` characters, respecting char boundaries.
#[must_use]
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> SenderInfo {
        SenderInfo {
            id: 7,
            username: Some("alice".to_string()),
            first_name: Some("Alice".to_string()),
            last_name: None,
        }
    }

    #[test]
    fn test_sender_label_precedence() {
        assert_eq!(sender_label(Some(&alice())), "@alice");

        let named = SenderInfo {
            id: 7,
            username: None,
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
        };
        assert_eq!(sender_label(Some(&named)), "Ada Lovelace");

        let first_only = SenderInfo {
            first_name: Some(" Ada ".to_string()),
            ..SenderInfo::default()
        };
        assert_eq!(sender_label(Some(&first_only)), "Ada");

        let anonymous = SenderInfo {
            id: 99,
            ..SenderInfo::default()
        };
        assert_eq!(sender_label(Some(&anonymous)), "user:99");
        assert_eq!(sender_label(None), "unknown");
    }

    #[test]
    fn test_source_label() {
        let group = ChatInfo {
            id: -100_123,
            kind: "supergroup".to_string(),
            title: Some("Memes".to_string()),
        };
        assert_eq!(source_label(Some(&group)), "Memes (-100123)");

        let private = ChatInfo {
            id: 42,
            kind: "private".to_string(),
            title: None,
        };
        assert_eq!(source_label(Some(&private)), "private (42)");
        assert_eq!(source_label(None), "unknown");
    }

    #[test]
    fn test_caption_for_video_sticker_from_alice() {
        let message = InboundMessage {
            message_id: 1,
            chat: Some(ChatInfo {
                id: 42,
                kind: "private".to_string(),
                title: None,
            }),
            sender: Some(alice()),
            text: None,
            attachment: None,
        };
        assert_eq!(
            compose_caption("video sticker", &message),
            "Extracted still from video sticker\nFrom: @alice\nSource: private (42)"
        );
    }

    #[test]
    fn test_caption_includes_text_only_when_present() {
        let mut message = InboundMessage {
            sender: Some(alice()),
            text: Some(String::new()),
            ..InboundMessage::default()
        };
        assert!(!compose_caption("sticker", &message).contains("Text:"));

        message.text = Some("look at this".to_string());
        assert!(compose_caption("sticker", &message).ends_with("\nText: look at this"));
    }

    #[test]
    fn test_caption_is_truncated_on_char_boundary() {
        let message = InboundMessage {
            text: Some("ж".repeat(2000)),
            ..InboundMessage::default()
        };
        let caption = compose_caption("animation/GIF", &message);
        assert_eq!(caption.chars().count(), CAPTION_LIMIT);
        assert!(caption.starts_with("Extracted still from animation/GIF\nFrom: unknown"));
    }

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello", 3), "hel");
        assert_eq!(truncate_str("привет", 2), "пр");
        assert_eq!(truncate_str("", 0), "");
    }
}
