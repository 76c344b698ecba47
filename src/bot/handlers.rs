use crate::bot::TelegramPipeline;
use crate::media::{InboundAttachment, RemoteFile};
use crate::relay::{ChatInfo, InboundMessage, SenderInfo};
use anyhow::Result;
use std::sync::Arc;
use teloxide::{
    prelude::*,
    types::{Chat, FileMeta, User},
    utils::command::BotCommands,
};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

/// Supported commands for the bot
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Liveness check
    #[command(description = "Check that the relay is alive.")]
    Ping,
}

/// Ping handler
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn ping(bot: Bot, msg: Message) -> Result<()> {
    bot.send_message(msg.chat.id, "pong").await?;
    info!(chat_id = msg.chat.id.0, "Responded 'pong' to ping.");
    Ok(())
}

/// Command endpoint. Errors are logged and never reach the dispatcher.
pub async fn handle_command(bot: Bot, msg: Message, cmd: Command) -> ResponseResult<()> {
    let res = match cmd {
        Command::Ping => ping(bot, msg).await,
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

/// Relay endpoint: hands the message to the pipeline on a tracked task and
/// returns immediately.
pub async fn handle_relay(
    msg: Message,
    pipeline: Arc<TelegramPipeline>,
    tracker: TaskTracker,
) -> ResponseResult<()> {
    let inbound = inbound_from_message(&msg);
    debug!(
        chat_id = msg.chat.id.0,
        message_id = msg.id.0,
        has_attachment = inbound.attachment.is_some(),
        "Inbound message"
    );
    tracker.spawn(async move {
        pipeline.handle(&inbound).await;
    });
    respond(())
}

/// Reduce a Telegram message to the relay's inbound model.
///
/// Attachment precedence is sticker, then animation, then document.
#[must_use]
pub fn inbound_from_message(msg: &Message) -> InboundMessage {
    InboundMessage {
        message_id: msg.id.0,
        chat: Some(chat_info(&msg.chat)),
        sender: msg.from.as_ref().map(sender_info),
        text: msg.text().or_else(|| msg.caption()).map(str::to_string),
        attachment: attachment_of(msg),
    }
}

fn attachment_of(msg: &Message) -> Option<InboundAttachment> {
    if let Some(sticker) = msg.sticker() {
        return Some(InboundAttachment::Sticker {
            file: remote_file(&sticker.file),
            is_animated: sticker.is_animated(),
            is_video: sticker.is_video(),
        });
    }
    if let Some(animation) = msg.animation() {
        return Some(InboundAttachment::Animation {
            file: remote_file(&animation.file),
        });
    }
    msg.document().map(|doc| InboundAttachment::Document {
        file: remote_file(&doc.file),
        mime_type: doc.mime_type.as_ref().map(ToString::to_string),
        file_name: doc.file_name.clone(),
    })
}

fn remote_file(meta: &FileMeta) -> RemoteFile {
    RemoteFile {
        id: meta.id.0.clone(),
        // Telegram omits file_size for some media; 0 means unknown here
        size: (meta.size > 0).then(|| u64::from(meta.size)),
    }
}

fn chat_info(chat: &Chat) -> ChatInfo {
    let kind = if chat.is_private() {
        "private"
    } else if chat.is_group() {
        "group"
    } else if chat.is_supergroup() {
        "supergroup"
    } else if chat.is_channel() {
        "channel"
    } else {
        "unknown"
    };
    ChatInfo {
        id: chat.id.0,
        kind: kind.to_string(),
        title: chat.title().map(str::to_string),
    }
}

fn sender_info(user: &User) -> SenderInfo {
    SenderInfo {
        id: user.id.0.cast_signed(),
        username: user.username.clone(),
        first_name: Some(user.first_name.clone()).filter(|n| !n.is_empty()),
        last_name: user.last_name.clone(),
    }
}
