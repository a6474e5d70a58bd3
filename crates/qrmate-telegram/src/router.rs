use std::{collections::HashMap, path::PathBuf, sync::Arc};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::sync::Mutex;

use qrmate_api::ApiClient;
use qrmate_core::{
    config::Config,
    deeplink::DeepLinkCodec,
    direct_connect::DirectConnect,
    errors::Error,
    orchestrator::ScanOrchestrator,
    policy::CreationPolicy,
    ports::{KeyValueStore, NetworkApi},
    session::ScanSession,
    store::FileStore,
};
use qrmate_qr::QrRenderer;

use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub api: Arc<ApiClient>,
    pub codec: DeepLinkCodec,
    pub renderer: QrRenderer,
    pub orchestrator: Arc<ScanOrchestrator>,
    pub direct: Arc<DirectConnect>,
    pub sessions: Arc<ChatSessions>,
}

impl AppState {
    pub fn new(cfg: Arc<Config>, api: Arc<ApiClient>, renderer: QrRenderer) -> Self {
        let policy = CreationPolicy::new(cfg.optimistic_on_repeated_5xx);
        let network: Arc<dyn NetworkApi> = api.clone();
        Self {
            codec: DeepLinkCodec::from_config(&cfg),
            orchestrator: Arc::new(ScanOrchestrator::new(
                network.clone(),
                policy,
                cfg.view_url.clone(),
            )),
            direct: Arc::new(DirectConnect::new(network, policy)),
            sessions: Arc::new(ChatSessions::new(cfg.state_dir.clone())),
            renderer,
            api,
            cfg,
        }
    }
}

/// One scan session (and one local store) per chat, standing in for a device.
pub struct ChatSessions {
    state_dir: PathBuf,
    inner: Mutex<HashMap<i64, Arc<ScanSession>>>,
}

impl ChatSessions {
    pub fn new(state_dir: PathBuf) -> Self {
        Self {
            state_dir,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub async fn session(&self, chat_id: i64) -> Result<Arc<ScanSession>, Error> {
        let mut map = self.inner.lock().await;
        if let Some(s) = map.get(&chat_id) {
            return Ok(s.clone());
        }
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(
            self.state_dir.join(format!("chat-{chat_id}.json")),
        )?);
        let session = Arc::new(ScanSession::new(store));
        map.insert(chat_id, session.clone());
        Ok(session)
    }
}

pub async fn run_polling(state: Arc<AppState>) -> anyhow::Result<()> {
    let token = state
        .cfg
        .telegram_bot_token
        .clone()
        .ok_or_else(|| anyhow::anyhow!("TELEGRAM_BOT_TOKEN environment variable is required"))?;
    let bot = Bot::new(token);

    match bot.get_me().await {
        Ok(me) => tracing::info!(bot = %me.username(), "qrmate bot started"),
        Err(e) => tracing::warn!(error = %e, "get_me failed"),
    }
    tracing::info!(api = %state.api.base_url(), view = %state.cfg.view_url, "scan flow configured");
    if state.cfg.bot_username.is_none() {
        tracing::warn!("QRMATE_BOT_USERNAME not set; /myqr will be unavailable");
    }

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrmate_core::domain::UserId;

    #[tokio::test]
    async fn sessions_are_cached_per_chat_and_persisted() {
        let dir = std::env::temp_dir().join(format!(
            "qrmate-sessions-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));
        let sessions = ChatSessions::new(dir.clone());

        let a = sessions.session(1).await.unwrap();
        let again = sessions.session(1).await.unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        a.record_scanned(UserId(7)).unwrap();

        let b = sessions.session(2).await.unwrap();
        assert!(!b.has_scanned(UserId(7)));

        // A new process sees chat 1's scanned ids.
        let reopened = ChatSessions::new(dir.clone()).session(1).await.unwrap();
        assert!(reopened.has_scanned(UserId(7)));

        let _ = std::fs::remove_dir_all(dir);
    }
}
