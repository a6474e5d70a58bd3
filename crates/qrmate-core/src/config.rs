use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration for QR Mate.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: Option<String>,
    pub bot_username: Option<String>,
    pub app_name: String,
    pub view_url: String,

    // Remote API
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub http_timeout: Duration,

    // Scan flow
    pub optimistic_on_repeated_5xx: bool,
    pub frame_interval: Duration,

    // Local persistence
    pub state_dir: PathBuf,

    // Renderer
    pub qr_module_px: u32,
    pub qr_border: u32,
    pub qr_logo_path: Option<PathBuf>,
}

impl Config {
    /// Load from `.env` (if present) and the process environment.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Build from an arbitrary key lookup. `load()` uses the environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |k: &str| lookup(k).and_then(non_empty);

        let Some(api_base_url) = get("QRMATE_API_BASE_URL") else {
            return Err(Error::Config(
                "QRMATE_API_BASE_URL environment variable is required".to_string(),
            ));
        };
        let api_base_url = api_base_url.trim().trim_end_matches('/').to_string();
        if !(api_base_url.starts_with("http://") || api_base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "QRMATE_API_BASE_URL must be an http(s) URL, got {api_base_url}"
            )));
        }

        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN");
        let api_token = get("QRMATE_API_TOKEN");
        let bot_username = get("QRMATE_BOT_USERNAME")
            .map(|s| s.trim().trim_start_matches('@').to_string());
        let app_name = get("QRMATE_APP_NAME").unwrap_or_else(|| "app".to_string());

        // Navigation target defaults to the Mini-App's network view.
        let view_url = match get("QRMATE_VIEW_URL") {
            Some(v) => v,
            None => match &bot_username {
                Some(bot) => format!("https://t.me/{bot}/{app_name}/network"),
                None => format!("{api_base_url}/network/view"),
            },
        };

        let http_timeout =
            Duration::from_millis(parse_u64(get("QRMATE_HTTP_TIMEOUT_MS")).unwrap_or(10_000));
        let optimistic_on_repeated_5xx = parse_bool(get("QRMATE_OPTIMISTIC_5XX")).unwrap_or(true);
        let frame_interval =
            Duration::from_millis(parse_u64(get("QRMATE_FRAME_INTERVAL_MS")).unwrap_or(16).max(1));

        let state_dir = PathBuf::from(get("QRMATE_STATE_DIR").unwrap_or("/tmp/qrmate".to_string()));

        let qr_module_px = parse_u64(get("QRMATE_QR_MODULE_PX")).unwrap_or(10).clamp(1, 64) as u32;
        let qr_border = parse_u64(get("QRMATE_QR_BORDER")).unwrap_or(4).min(16) as u32;
        let qr_logo_path = get("QRMATE_QR_LOGO").map(PathBuf::from);

        Ok(Self {
            telegram_bot_token,
            bot_username,
            app_name,
            view_url,
            api_base_url,
            api_token,
            http_timeout,
            optimistic_on_repeated_5xx,
            frame_interval,
            state_dir,
            qr_module_px,
            qr_border,
            qr_logo_path,
        })
    }

    /// Ensure the state directory exists.
    pub fn prepare_state_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.state_dir)?;
        Ok(())
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_bool(v: Option<String>) -> Option<bool> {
    v.map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn parse_u64(v: Option<String>) -> Option<u64> {
    v.and_then(|s| s.trim().parse::<u64>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn api_base_url_is_required() {
        assert!(matches!(cfg(&[]), Err(Error::Config(_))));
        assert!(matches!(
            cfg(&[("QRMATE_API_BASE_URL", "ftp://x")]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn defaults() {
        let c = cfg(&[("QRMATE_API_BASE_URL", "https://api.example.com/")]).unwrap();
        assert_eq!(c.api_base_url, "https://api.example.com");
        assert_eq!(c.app_name, "app");
        assert_eq!(c.bot_username, None);
        assert_eq!(c.view_url, "https://api.example.com/network/view");
        assert_eq!(c.http_timeout, Duration::from_secs(10));
        assert!(c.optimistic_on_repeated_5xx);
        assert_eq!(c.frame_interval, Duration::from_millis(16));
        assert_eq!(c.qr_module_px, 10);
        assert_eq!(c.qr_border, 4);
    }

    #[test]
    fn overrides() {
        let c = cfg(&[
            ("QRMATE_API_BASE_URL", "https://api.example.com"),
            ("QRMATE_BOT_USERNAME", "@zefe_bot"),
            ("QRMATE_APP_NAME", "mate"),
            ("QRMATE_OPTIMISTIC_5XX", "off"),
            ("QRMATE_HTTP_TIMEOUT_MS", "2500"),
            ("QRMATE_QR_MODULE_PX", "500"),
            ("TELEGRAM_BOT_TOKEN", "  "),
        ])
        .unwrap();
        assert_eq!(c.bot_username.as_deref(), Some("zefe_bot"));
        assert_eq!(c.view_url, "https://t.me/zefe_bot/mate/network");
        assert!(!c.optimistic_on_repeated_5xx);
        assert_eq!(c.http_timeout, Duration::from_millis(2500));
        assert_eq!(c.qr_module_px, 64);
        assert_eq!(c.telegram_bot_token, None);
    }
}
