//! Deep-link codec.
//!
//! Packs a user's identity into a Telegram Mini-App `startapp` link and turns any
//! scanned string back into a [`ScannedPayload`]. Decoding never fails: input
//! that does not match a known schema degrades to [`ScannedPayload::Url`] or
//! [`ScannedPayload::Text`] so the scan flow can decide what to do with it.

use std::sync::OnceLock;

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use regex::Regex;
use serde_json::{Map, Value};
use url::{form_urlencoded, Url};

use crate::{
    config::Config,
    domain::{EventId, TelegramUserId, UserId},
    errors::Error,
    Result,
};

/// Query parameter Telegram uses to carry the Mini-App launch payload.
pub const START_PARAM: &str = "startapp";

const LENIENT: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_encode_padding(false)
    .with_decode_padding_mode(DecodePaddingMode::Indifferent);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);

/// Identity carried by a QR deep link. Blank fields are treated as absent;
/// any other value travels byte for byte.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeepLinkPayload {
    pub event_id: Option<String>,
    pub user_id: Option<String>,
    pub telegram_user_id: Option<String>,
    pub title: Option<String>,
}

impl DeepLinkPayload {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn with_event(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_telegram_user(mut self, telegram_user_id: impl Into<String>) -> Self {
        self.telegram_user_id = Some(telegram_user_id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Non-blank fields in wire order.
    pub fn fields(&self) -> Vec<(&'static str, &str)> {
        [
            ("eventId", self.event_id.as_deref()),
            ("userId", self.user_id.as_deref()),
            ("telegramUserId", self.telegram_user_id.as_deref()),
            ("title", self.title.as_deref()),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.filter(|v| !v.trim().is_empty()).map(|v| (k, v)))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    pub fn user_id(&self) -> Option<UserId> {
        parse_id(self.user_id.as_deref()).map(UserId)
    }

    pub fn event_id(&self) -> Option<EventId> {
        parse_id(self.event_id.as_deref()).map(EventId)
    }

    pub fn telegram_user_id(&self) -> Option<TelegramUserId> {
        parse_id(self.telegram_user_id.as_deref()).map(TelegramUserId)
    }

    /// Assign a known key. Accepts camelCase and snake_case spellings.
    fn set(&mut self, key: &str, value: String) -> bool {
        if value.trim().is_empty() {
            return false;
        }
        let slot = match key {
            "eventId" | "event_id" => &mut self.event_id,
            "userId" | "user_id" => &mut self.user_id,
            "telegramUserId" | "telegram_user_id" => &mut self.telegram_user_id,
            "title" => &mut self.title,
            _ => return false,
        };
        *slot = Some(value);
        true
    }
}

fn parse_id(v: Option<&str>) -> Option<i64> {
    v.and_then(|s| s.trim().parse::<i64>().ok())
}

/// Start-parameter encodings, in decode priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StartParamSchema {
    /// Base64 (standard or URL-safe) of a JSON object.
    Base64Json,
    /// `eventId=..&userId=..` form-urlencoded map.
    QueryString,
    /// `user<id>_event<id>` underscore-joined prefixed tokens.
    Legacy,
}

impl StartParamSchema {
    pub const PRIORITY: [StartParamSchema; 3] = [
        StartParamSchema::Base64Json,
        StartParamSchema::QueryString,
        StartParamSchema::Legacy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StartParamSchema::Base64Json => "base64-json",
            StartParamSchema::QueryString => "query-string",
            StartParamSchema::Legacy => "legacy",
        }
    }

    fn parse(self, raw: &str) -> Option<DeepLinkPayload> {
        match self {
            StartParamSchema::Base64Json => from_base64_json(raw),
            StartParamSchema::QueryString => from_query_string(raw),
            StartParamSchema::Legacy => from_legacy(raw),
        }
    }
}

/// Result of decoding a scanned string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScannedPayload {
    /// Structured deep link. `schema` records which encoding matched.
    Link {
        payload: DeepLinkPayload,
        schema: StartParamSchema,
    },
    /// A URL that is not one of our deep links.
    Url(String),
    /// Anything else, including a `startapp` value no schema understood.
    Text(String),
    /// The user dismissed the scanner.
    Cancel,
}

impl ScannedPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            ScannedPayload::Link { .. } => "link",
            ScannedPayload::Url(_) => "url",
            ScannedPayload::Text(_) => "text",
            ScannedPayload::Cancel => "cancel",
        }
    }
}

/// Encoder for shareable `https://t.me/<bot>/<app>/?startapp=...` links.
#[derive(Clone, Debug)]
pub struct DeepLinkCodec {
    bot: Option<String>,
    app: String,
}

impl DeepLinkCodec {
    pub fn new(bot: Option<String>, app: impl Into<String>) -> Self {
        let bot = bot
            .map(|b| b.trim().trim_start_matches('@').to_string())
            .filter(|b| !b.is_empty());
        Self {
            bot,
            app: app.into().trim().trim_matches('/').to_string(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.bot_username.clone(), cfg.app_name.clone())
    }

    /// `https://t.me/<bot>/<app>/`. Fails when no bot identifier is configured.
    pub fn base_url(&self) -> Result<Url> {
        let Some(bot) = &self.bot else {
            return Err(Error::Config(
                "QRMATE_BOT_USERNAME is required to build deep links".to_string(),
            ));
        };
        let raw = if self.app.is_empty() {
            format!("https://t.me/{bot}/")
        } else {
            format!("https://t.me/{bot}/{}/", self.app)
        };
        Url::parse(&raw).map_err(|e| Error::Config(format!("invalid deep link base {raw}: {e}")))
    }

    /// Encode as a form-urlencoded query string inside `startapp`.
    pub fn encode(&self, payload: &DeepLinkPayload) -> Result<String> {
        self.encode_with(payload, StartParamSchema::QueryString)
    }

    pub fn encode_with(&self, payload: &DeepLinkPayload, schema: StartParamSchema) -> Result<String> {
        if payload.user_id.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(Error::InvalidPayload("userId is required".to_string()));
        }

        let value = match schema {
            StartParamSchema::QueryString => to_query_string(payload),
            StartParamSchema::Base64Json => to_base64_json(payload)?,
            StartParamSchema::Legacy => to_legacy(payload)?,
        };

        let mut url = self.base_url()?;
        url.query_pairs_mut().append_pair(START_PARAM, &value);
        Ok(url.to_string())
    }
}

/// Decode any scanned string. Never fails.
pub fn decode(input: &str) -> ScannedPayload {
    let input = input.trim();
    if input.is_empty() {
        return ScannedPayload::Text(String::new());
    }

    let Ok(url) = Url::parse(input) else {
        return ScannedPayload::Text(input.to_string());
    };

    let start = url
        .query_pairs()
        .find(|(k, _)| k == START_PARAM)
        .map(|(_, v)| v.into_owned());

    match start {
        Some(raw) => decode_start_param(&raw),
        None => ScannedPayload::Url(input.to_string()),
    }
}

/// Decode a bare start parameter (`start_param` from Telegram init data, or the
/// `startapp` value of a link). Schemas are tried in [`StartParamSchema::PRIORITY`]
/// order; no match yields `Text(raw)`.
pub fn decode_start_param(raw: &str) -> ScannedPayload {
    let raw = raw.trim();
    for schema in StartParamSchema::PRIORITY {
        if let Some(payload) = schema.parse(raw) {
            tracing::debug!(schema = schema.as_str(), "start param matched");
            return ScannedPayload::Link { payload, schema };
        }
    }
    tracing::debug!("start param matched no schema");
    ScannedPayload::Text(raw.to_string())
}

fn to_query_string(payload: &DeepLinkPayload) -> String {
    let mut ser = form_urlencoded::Serializer::new(String::new());
    for (k, v) in payload.fields() {
        ser.append_pair(k, v);
    }
    ser.finish()
}

fn to_base64_json(payload: &DeepLinkPayload) -> Result<String> {
    let map: Map<String, Value> = payload
        .fields()
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    let json = serde_json::to_vec(&Value::Object(map))?;
    Ok(URL_SAFE_LENIENT.encode(json))
}

fn to_legacy(payload: &DeepLinkPayload) -> Result<String> {
    if payload.title.is_some() {
        return Err(Error::InvalidPayload(
            "legacy start params cannot carry a title".to_string(),
        ));
    }
    let ids = [
        ("user", &payload.user_id),
        ("event", &payload.event_id),
        ("tg", &payload.telegram_user_id),
    ];
    let mut tokens = Vec::new();
    for (prefix, value) in ids {
        let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) else {
            continue;
        };
        if !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidPayload(format!(
                "legacy start params need numeric ids, got {prefix}={value}"
            )));
        }
        tokens.push(format!("{prefix}{value}"));
    }
    Ok(tokens.join("_"))
}

fn from_base64_json(raw: &str) -> Option<DeepLinkPayload> {
    if raw.is_empty() {
        return None;
    }
    let bytes = URL_SAFE_LENIENT
        .decode(raw)
        .or_else(|_| STANDARD_LENIENT.decode(raw))
        .ok()?;
    let Value::Object(map) = serde_json::from_slice::<Value>(&bytes).ok()? else {
        return None;
    };

    let mut payload = DeepLinkPayload::default();
    let mut matched = false;
    for (k, v) in map {
        let value = match v {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            _ => continue,
        };
        matched |= payload.set(&k, value);
    }
    matched.then_some(payload)
}

fn from_query_string(raw: &str) -> Option<DeepLinkPayload> {
    if !raw.contains('=') {
        return None;
    }
    let mut payload = DeepLinkPayload::default();
    let mut matched = false;
    for (k, v) in form_urlencoded::parse(raw.as_bytes()) {
        matched |= payload.set(&k, v.into_owned());
    }
    matched.then_some(payload)
}

fn legacy_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(user|event|tg)(\d+)$").expect("legacy token regex"))
}

fn from_legacy(raw: &str) -> Option<DeepLinkPayload> {
    if raw.is_empty() {
        return None;
    }
    let mut payload = DeepLinkPayload::default();
    for token in raw.split('_') {
        let caps = legacy_token_re().captures(token)?;
        let key = match &caps[1] {
            "user" => "userId",
            "event" => "eventId",
            _ => "telegramUserId",
        };
        payload.set(key, caps[2].to_string());
    }
    Some(payload)
}
