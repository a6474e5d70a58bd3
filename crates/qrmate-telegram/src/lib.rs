//! Telegram adapter (teloxide).
//!
//! Acts as the upload acquisition layer (QR photos sent to the bot) and as the
//! notification/navigation surface of the scan flow (`ScanUi`).

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup},
};

use tokio::time::{sleep, Duration};

pub mod handlers;
pub mod router;

use qrmate_core::{
    errors::Error,
    ports::{ScanUi, ToastKind},
    Result,
};

/// `ScanUi` bound to one Telegram chat.
#[derive(Clone)]
pub struct ChatUi {
    bot: Bot,
    chat_id: ChatId,
}

impl ChatUi {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(retry_delay(d)).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

/// Flood-wait requested by a Telegram 429.
fn retry_delay(after: Duration) -> Duration {
    after
}

pub(crate) fn toast_text(kind: ToastKind, text: &str) -> String {
    let icon = match kind {
        ToastKind::Success => "✅",
        ToastKind::Error => "❌",
        ToastKind::Info => "ℹ️",
    };
    format!("{icon} {text}")
}

#[async_trait]
impl ScanUi for ChatUi {
    async fn toast(&self, kind: ToastKind, text: &str) -> Result<()> {
        let body = toast_text(kind, text);
        self.with_retry(|| self.bot.send_message(self.chat_id, body.clone()))
            .await?;
        Ok(())
    }

    async fn navigate(&self, target: &str) -> Result<()> {
        // Relative targets cannot be buttons; show them as text.
        let Ok(url) = url::Url::parse(target) else {
            self.with_retry(|| self.bot.send_message(self.chat_id, format!("🔗 {target}")))
                .await?;
            return Ok(());
        };
        let markup = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::url(
            "Open connection",
            url,
        )]]);
        self.with_retry(|| {
            self.bot
                .send_message(self.chat_id, "🤝 Your new connection is ready.")
                .reply_markup(markup.clone())
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toast_text_prefixes_icon() {
        assert_eq!(toast_text(ToastKind::Success, "Connection created"), "✅ Connection created");
        assert!(toast_text(ToastKind::Error, "x").starts_with("❌"));
    }

    #[test]
    fn retry_waits_for_the_requested_flood_delay() {
        let after = Duration::from_secs(37);
        assert_eq!(retry_delay(after), Duration::from_secs(37));
    }
}
