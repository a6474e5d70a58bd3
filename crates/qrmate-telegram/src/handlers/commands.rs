use std::sync::Arc;

use teloxide::{prelude::*, types::InputFile};

use qrmate_core::{
    deeplink::{self, DeepLinkPayload},
    direct_connect::DIRECT_CONNECT_THRESHOLD,
    domain::{CachedUser, EventId, UserId},
    errors::Error,
    orchestrator::failure_message,
    store,
};

use crate::router::AppState;

use super::{run_scan, HELP};

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

#[derive(Debug, PartialEq, Eq)]
struct ConnectArgs {
    user_id: UserId,
    score: u8,
    event_id: Option<EventId>,
}

fn parse_connect_args(args: &str) -> Option<ConnectArgs> {
    let mut it = args.split_whitespace();
    let user_id = UserId(it.next()?.parse().ok()?);
    let score = it
        .next()?
        .trim_end_matches('%')
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite())?
        .clamp(0.0, 100.0)
        .floor() as u8;
    let event_id = match it.next() {
        Some(e) => Some(EventId(e.parse().ok()?)),
        None => None,
    };
    Some(ConnectArgs {
        user_id,
        score,
        event_id,
    })
}

/// `/myqr [eventId] [title...]`
fn parse_myqr_args(args: &str) -> (Option<String>, Option<String>) {
    let mut parts = args.trim().splitn(2, char::is_whitespace);
    let event = parts
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let title = parts
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    (event, title)
}

pub async fn handle_command(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let (cmd, args) = parse_command(text);
    let chat_id = msg.chat.id;

    match cmd.as_str() {
        "start" => {
            if args.is_empty() {
                bot.send_message(chat_id, HELP).await?;
            } else {
                run_scan(&bot, &state, chat_id, deeplink::decode_start_param(&args)).await;
            }
        }
        "help" => {
            bot.send_message(chat_id, HELP).await?;
        }
        "myqr" => {
            let telegram_id = msg.from().map(|u| u.id.0 as i64);
            handle_myqr(&bot, &state, chat_id, telegram_id, &args).await?;
        }
        "connect" => {
            handle_connect(&bot, &state, chat_id, &args).await?;
        }
        "scanned" => {
            let text = match state.sessions.session(chat_id.0).await {
                Ok(s) => format!(
                    "You connected with {} people by scanning.",
                    s.scanned_user_ids().len()
                ),
                Err(e) => format!("❌ Local storage unavailable: {e}"),
            };
            bot.send_message(chat_id, text).await?;
        }
        _ => {
            bot.send_message(chat_id, format!("Unknown command /{cmd}\n\n{HELP}"))
                .await?;
        }
    }
    Ok(())
}

async fn own_profile(state: &AppState, chat_id: ChatId) -> Result<CachedUser, Error> {
    let session = state.sessions.session(chat_id.0).await?;
    let local = session.store().as_ref();
    if let Some(user) = store::cached_user(local)? {
        return Ok(user);
    }
    state.api.refresh_cached_user(local).await
}

async fn handle_myqr(
    bot: &Bot,
    state: &AppState,
    chat_id: ChatId,
    telegram_id: Option<i64>,
    args: &str,
) -> ResponseResult<()> {
    let user = match own_profile(state, chat_id).await {
        Ok(u) => u,
        Err(e) => {
            tracing::warn!(chat_id = chat_id.0, error = %e, "profile lookup failed");
            bot.send_message(chat_id, "❌ Could not load your profile.").await?;
            return Ok(());
        }
    };

    let (event, title) = parse_myqr_args(args);
    let mut payload = DeepLinkPayload::for_user(user.id.to_string());
    payload.event_id = event;
    payload.title = title;
    payload.telegram_user_id = user.telegram_id.or(telegram_id).map(|id| id.to_string());

    let link = match state.codec.encode(&payload) {
        Ok(l) => l,
        Err(e) => {
            tracing::warn!(error = %e, "deep link encode failed");
            bot.send_message(chat_id, format!("❌ Cannot build your link: {e}"))
                .await?;
            return Ok(());
        }
    };

    let renderer = state.renderer.clone();
    let data = link.clone();
    let rendered = match tokio::task::spawn_blocking(move || renderer.render(&data)).await {
        Ok(Ok(r)) => r,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "qr render failed");
            bot.send_message(chat_id, "❌ Could not render your QR code.").await?;
            return Ok(());
        }
        Err(e) => {
            tracing::error!(error = %e, "render task failed");
            return Ok(());
        }
    };

    bot.send_photo(chat_id, InputFile::memory(rendered.png).file_name("qrmate.png"))
        .caption(format!("{}\n\n{link}", user.display_name()))
        .await?;
    Ok(())
}

async fn handle_connect(bot: &Bot, state: &AppState, chat_id: ChatId, args: &str) -> ResponseResult<()> {
    let Some(parsed) = parse_connect_args(args) else {
        bot.send_message(chat_id, "Usage: /connect <userId> <score> [eventId]")
            .await?;
        return Ok(());
    };

    let text = match state
        .direct
        .connect(parsed.event_id, parsed.user_id, parsed.score)
        .await
    {
        Ok(result) => format!("✅ {}", result.user_message()),
        Err(Error::Locked { score, .. }) => format!(
            "🔒 Direct connect unlocks at {DIRECT_CONNECT_THRESHOLD}% similarity (this match: {score}%)."
        ),
        Err(e) => format!("❌ {}", failure_message(&e)),
    };
    bot.send_message(chat_id, text).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_with_bot_suffix() {
        assert_eq!(
            parse_command("/start@qrmate_bot user7_event42"),
            ("start".to_string(), "user7_event42".to_string())
        );
        assert_eq!(parse_command("/HELP"), ("help".to_string(), String::new()));
    }

    #[test]
    fn parses_connect_args() {
        assert_eq!(
            parse_connect_args("7 50"),
            Some(ConnectArgs {
                user_id: UserId(7),
                score: 50,
                event_id: None
            })
        );
        assert_eq!(
            parse_connect_args("7 87.5% 3"),
            Some(ConnectArgs {
                user_id: UserId(7),
                score: 87,
                event_id: Some(EventId(3))
            })
        );
        assert_eq!(parse_connect_args("7 250").map(|a| a.score), Some(100));
        assert_eq!(parse_connect_args("7"), None);
        assert_eq!(parse_connect_args("x 50"), None);
        assert_eq!(parse_connect_args("7 50 nope"), None);
    }

    #[test]
    fn parses_myqr_args() {
        assert_eq!(parse_myqr_args(""), (None, None));
        assert_eq!(parse_myqr_args("42"), (Some("42".to_string()), None));
        assert_eq!(
            parse_myqr_args("42  Rust Meetup "),
            (Some("42".to_string()), Some("Rust Meetup".to_string()))
        );
    }
}
