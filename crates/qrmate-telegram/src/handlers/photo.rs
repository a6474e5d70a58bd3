use std::sync::Arc;

use teloxide::{net::Download, prelude::*, types::FileMeta};

use qrmate_core::deeplink;

use crate::router::AppState;

use super::run_scan;

/// Telegram rejects bot downloads above 20 MB anyway; refuse early.
const MAX_IMAGE_BYTES: u32 = 20 * 1024 * 1024;

async fn download(bot: &Bot, file: &FileMeta) -> anyhow::Result<Vec<u8>> {
    if file.size > MAX_IMAGE_BYTES {
        anyhow::bail!("image is too large ({} bytes)", file.size);
    }
    let file = bot.get_file(file.id.clone()).await?;
    let mut buf: Vec<u8> = Vec::with_capacity(file.size as usize);
    bot.download_file(&file.path, &mut buf).await?;
    Ok(buf)
}

pub async fn handle_photo(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(photos) = msg.photo() else {
        return Ok(());
    };
    // Largest size last.
    let Some(best) = photos.last() else {
        return Ok(());
    };
    scan_file(bot, msg.chat.id, state, best.file.clone()).await
}

pub async fn handle_image_document(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(doc) = msg.document() else {
        return Ok(());
    };
    scan_file(bot, msg.chat.id, state, doc.file.clone()).await
}

async fn scan_file(bot: Bot, chat_id: ChatId, state: Arc<AppState>, file: FileMeta) -> ResponseResult<()> {
    let bytes = match download(&bot, &file).await {
        Ok(b) => b,
        Err(e) => {
            let _ = bot
                .send_message(
                    chat_id,
                    format!(
                        "❌ Failed to download image: {}",
                        e.to_string().chars().take(100).collect::<String>()
                    ),
                )
                .await;
            return Ok(());
        }
    };

    let decoded = tokio::task::spawn_blocking(move || qrmate_qr::decode_image_bytes(&bytes)).await;
    let text = match decoded {
        Ok(Ok(Some(text))) => text,
        Ok(Ok(None)) => {
            let _ = bot
                .send_message(chat_id, "🔍 No QR code found. Try a sharper, well-lit photo.")
                .await;
            return Ok(());
        }
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "uploaded image unreadable");
            let _ = bot
                .send_message(chat_id, "❌ Could not read this image.")
                .await;
            return Ok(());
        }
        Err(e) => {
            tracing::error!(error = %e, "decode task failed");
            return Ok(());
        }
    };

    run_scan(&bot, &state, chat_id, deeplink::decode(&text)).await;
    Ok(())
}
