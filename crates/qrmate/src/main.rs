use std::sync::Arc;

use qrmate_api::ApiClient;
use qrmate_core::{config::Config, store::FileStore};
use qrmate_qr::QrRenderer;
use qrmate_telegram::router::{run_polling, AppState};

#[tokio::main]
async fn main() -> Result<(), qrmate_core::Error> {
    qrmate_core::logging::init("qrmate")?;

    let cfg = Arc::new(Config::load()?);
    cfg.prepare_state_dir()?;

    // Bot-wide store; per-chat stores live next to it.
    let device = FileStore::open(cfg.state_dir.join("device.json"))?;
    let api = Arc::new(ApiClient::from_config(&cfg, Some(&device))?);
    let renderer = QrRenderer::from_config(&cfg)?;
    let state = Arc::new(AppState::new(cfg, api, renderer));

    run_polling(state)
        .await
        .map_err(|e| qrmate_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
