//! Telegram update handlers.
//!
//! Each handler is a small adapter that turns a Telegram message into a
//! `qrmate-core` call (scan orchestration, direct connect, deep-link encode) and
//! reports the outcome back to the chat.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use qrmate_core::{
    deeplink::ScannedPayload,
    orchestrator::ScanOutcome,
    ports::{ScanUi, ToastKind},
};

use crate::{router::AppState, ChatUi};

mod commands;
mod photo;

pub(crate) const HELP: &str = "QR Mate\n\n\
Send a photo of a QR Mate code to connect with its owner.\n\n\
/myqr [eventId] [title] - your personal QR code\n\
/connect <userId> <score> [eventId] - connect with a recommended attendee\n\
/scanned - how many people you connected with by scanning\n\
/help - this message";

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return commands::handle_command(bot, msg, state).await;
        }
    }

    if msg.photo().is_some() {
        return photo::handle_photo(bot, msg, state).await;
    }

    if let Some(doc) = msg.document() {
        let is_image = doc
            .mime_type
            .as_ref()
            .map(|m| m.essence_str().starts_with("image/"))
            .unwrap_or(false);
        if is_image {
            return photo::handle_image_document(bot, msg, state).await;
        }
    }

    let _ = bot.send_message(msg.chat.id, HELP).await;
    Ok(())
}

/// Run one scan through the orchestrator and report non-UI outcomes.
pub(crate) async fn run_scan(bot: &Bot, state: &AppState, chat_id: ChatId, scanned: ScannedPayload) {
    let ui = ChatUi::new(bot.clone(), chat_id);

    let session = match state.sessions.session(chat_id.0).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(chat_id = chat_id.0, error = %e, "scan session unavailable");
            let _ = ui
                .toast(ToastKind::Error, "Local storage is unavailable, please try again later.")
                .await;
            return;
        }
    };

    let outcome = state.orchestrator.handle(&session, &ui, scanned).await;
    tracing::info!(chat_id = chat_id.0, outcome = outcome_label(&outcome), "scan handled");

    let note = match outcome {
        ScanOutcome::Busy => Some("⏳ Still processing your previous scan.".to_string()),
        ScanOutcome::Passthrough(ScannedPayload::Url(url)) => {
            Some(format!("🔗 This QR code is a regular link:\n{url}"))
        }
        ScanOutcome::Passthrough(ScannedPayload::Text(text)) if !text.is_empty() => {
            Some(format!("📝 This QR code contains text:\n{text}"))
        }
        ScanOutcome::Passthrough(_) => Some("This QR code is empty.".to_string()),
        ScanOutcome::Navigated { .. } | ScanOutcome::Rejected { .. } | ScanOutcome::Failed { .. } => None,
    };
    if let Some(note) = note {
        let _ = bot.send_message(chat_id, note).await;
    }
}

fn outcome_label(outcome: &ScanOutcome) -> &'static str {
    match outcome {
        ScanOutcome::Navigated { created: true, .. } => "created",
        ScanOutcome::Navigated { created: false, .. } => "deduplicated",
        ScanOutcome::Rejected { .. } => "rejected",
        ScanOutcome::Failed { .. } => "failed",
        ScanOutcome::Busy => "busy",
        ScanOutcome::Passthrough(_) => "passthrough",
    }
}
