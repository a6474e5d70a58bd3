//! Scan-to-connection orchestration.
//!
//! Per scan: validate the decoded link, skip the backend for users already
//! connected from this device, create the connection (see [`CreationPolicy`]),
//! then notify and navigate to the connection view.

use std::sync::Arc;

use url::form_urlencoded;

use crate::{
    deeplink::{DeepLinkPayload, ScannedPayload},
    domain::UserId,
    errors::Error,
    policy::{CreationPolicy, CreationResult},
    ports::{CreateNetworkRequest, NetworkApi, ScanUi, ToastKind},
    session::ScanSession,
};

#[derive(Clone, Debug, PartialEq)]
pub enum ScanOutcome {
    /// Terminal success; `created` is false when the dedup set short-circuited.
    Navigated {
        target: String,
        user_id: UserId,
        created: bool,
    },
    /// Link without a usable user id.
    Rejected { reason: String },
    /// Creation failed; the user may rescan.
    Failed { error: String },
    /// Another scan is still being processed.
    Busy,
    /// Not a deep link; the caller decides what to do.
    Passthrough(ScannedPayload),
}

pub struct ScanOrchestrator {
    api: Arc<dyn NetworkApi>,
    policy: CreationPolicy,
    view_url: String,
}

impl ScanOrchestrator {
    pub fn new(api: Arc<dyn NetworkApi>, policy: CreationPolicy, view_url: impl Into<String>) -> Self {
        Self {
            api,
            policy,
            view_url: view_url.into(),
        }
    }

    pub async fn handle(
        &self,
        session: &ScanSession,
        ui: &dyn ScanUi,
        scanned: ScannedPayload,
    ) -> ScanOutcome {
        let (payload, schema) = match scanned {
            ScannedPayload::Link { payload, schema } => (payload, schema),
            other => return ScanOutcome::Passthrough(other),
        };

        let Some(_guard) = session.try_begin() else {
            tracing::debug!("scan ignored: another scan is in flight");
            return ScanOutcome::Busy;
        };

        // Validating
        let Some(user_id) = payload.user_id() else {
            let reason = match payload.user_id.as_deref() {
                Some(raw) => format!("invalid user id {raw:?}"),
                None => "missing user id".to_string(),
            };
            tracing::debug!(schema = schema.as_str(), %reason, "scan rejected");
            notify(ui, ToastKind::Error, "This QR code is not a valid QR Mate profile").await;
            return ScanOutcome::Rejected { reason };
        };
        let target = view_target(&self.view_url, &payload);

        // Deduplicating
        if session.has_scanned(user_id) {
            tracing::debug!(user_id = user_id.0, "already connected from this device; skipping create");
            go(ui, &target).await;
            return ScanOutcome::Navigated {
                target,
                user_id,
                created: false,
            };
        }

        // Creating (and Retrying, inside the policy)
        let req = CreateNetworkRequest::new(payload.event_id(), user_id);
        tracing::debug!(
            user_id = user_id.0,
            event_id = ?req.base_event_id,
            schema = schema.as_str(),
            "creating connection"
        );
        match self.policy.execute(self.api.as_ref(), &req).await {
            Ok(result) => {
                if let Err(e) = session.record_scanned(user_id) {
                    tracing::warn!(user_id = user_id.0, error = %e, "failed to persist scanned user id");
                }
                if let CreationResult::AssumedCreated { status } = &result {
                    tracing::info!(user_id = user_id.0, status, "connection assumed created");
                }
                notify(ui, ToastKind::Success, result.user_message()).await;
                go(ui, &target).await;
                ScanOutcome::Navigated {
                    target,
                    user_id,
                    created: true,
                }
            }
            Err(e) => {
                tracing::info!(user_id = user_id.0, error = %e, "connection creation failed");
                notify(ui, ToastKind::Error, &failure_message(&e)).await;
                ScanOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Connection view URL carrying the scanned identity as query parameters.
pub fn view_target(base: &str, payload: &DeepLinkPayload) -> String {
    let mut ser = form_urlencoded::Serializer::new(String::new());
    let fields = [
        ("userId", payload.user_id.as_deref()),
        ("eventId", payload.event_id.as_deref()),
        ("telegramUserId", payload.telegram_user_id.as_deref()),
    ];
    let mut any = false;
    for (k, v) in fields {
        if let Some(v) = v.map(str::trim).filter(|v| !v.is_empty()) {
            ser.append_pair(k, v);
            any = true;
        }
    }
    if !any {
        return base.to_string();
    }
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{base}{sep}{}", ser.finish())
}

pub fn failure_message(e: &Error) -> String {
    match e {
        Error::Api { message, .. } if !message.trim().is_empty() => {
            format!("Could not create the connection: {}", message.trim())
        }
        Error::Api { status, .. } => format!("Could not create the connection (HTTP {status})"),
        Error::Transport(_) => "Network error. Please check your connection and try again.".to_string(),
        other => format!("Could not create the connection: {other}"),
    }
}

async fn notify(ui: &dyn ScanUi, kind: ToastKind, text: &str) {
    if let Err(e) = ui.toast(kind, text).await {
        tracing::warn!(error = %e, "toast failed");
    }
}

async fn go(ui: &dyn ScanUi, target: &str) {
    if let Err(e) = ui.navigate(target).await {
        tracing::warn!(error = %e, "navigation failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deeplink::{decode, DeepLinkCodec, StartParamSchema};
    use crate::policy::testing::{ok, status, FakeApi};
    use crate::store::MemoryStore;
    use crate::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const VIEW: &str = "https://t.me/qrmate_bot/app/network";

    #[derive(Default)]
    struct RecordingUi {
        toasts: Mutex<Vec<(ToastKind, String)>>,
        navigations: Mutex<Vec<String>>,
    }

    impl RecordingUi {
        fn toasts(&self) -> Vec<(ToastKind, String)> {
            self.toasts.lock().unwrap().clone()
        }
        fn navigations(&self) -> Vec<String> {
            self.navigations.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ScanUi for RecordingUi {
        async fn toast(&self, kind: ToastKind, text: &str) -> Result<()> {
            self.toasts.lock().unwrap().push((kind, text.to_string()));
            Ok(())
        }
        async fn navigate(&self, target: &str) -> Result<()> {
            self.navigations.lock().unwrap().push(target.to_string());
            Ok(())
        }
    }

    fn setup(script: Vec<Result<crate::ports::CreateNetworkResponse>>) -> (Arc<FakeApi>, ScanOrchestrator, ScanSession) {
        let api = Arc::new(FakeApi::with(script));
        let orch = ScanOrchestrator::new(api.clone(), CreationPolicy::default(), VIEW);
        let session = ScanSession::new(Arc::new(MemoryStore::default()));
        (api, orch, session)
    }

    fn scanned(user: &str, event: &str, tg: &str) -> ScannedPayload {
        let codec = DeepLinkCodec::new(Some("qrmate_bot".to_string()), "app");
        let token = codec
            .encode(
                &DeepLinkPayload::for_user(user)
                    .with_event(event)
                    .with_telegram_user(tg),
            )
            .unwrap();
        decode(&token)
    }

    #[tokio::test]
    async fn creates_connection_then_navigates() {
        let (api, orch, session) = setup(vec![ok()]);
        let ui = RecordingUi::default();

        let out = orch.handle(&session, &ui, scanned("7", "42", "99")).await;

        let expected = format!("{VIEW}?userId=7&eventId=42&telegramUserId=99");
        assert_eq!(
            out,
            ScanOutcome::Navigated {
                target: expected.clone(),
                user_id: UserId(7),
                created: true
            }
        );
        let calls = api.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![CreateNetworkRequest::new(Some(crate::domain::EventId(42)), UserId(7))]);
        assert_eq!(ui.toasts(), vec![(ToastKind::Success, "Connection created".to_string())]);
        assert_eq!(ui.navigations(), vec![expected]);
        assert!(session.has_scanned(UserId(7)));
    }

    #[tokio::test]
    async fn second_scan_of_same_user_skips_backend() {
        let (api, orch, session) = setup(vec![]);
        let ui = RecordingUi::default();

        orch.handle(&session, &ui, scanned("7", "42", "99")).await;
        let out = orch.handle(&session, &ui, scanned("7", "42", "99")).await;

        assert!(matches!(out, ScanOutcome::Navigated { created: false, .. }));
        assert_eq!(api.call_count(), 1);
        assert_eq!(ui.navigations().len(), 2);
    }

    #[tokio::test]
    async fn repeated_server_errors_end_in_success() {
        let (api, orch, session) = setup(vec![status(500, "boom"), status(500, "boom")]);
        let ui = RecordingUi::default();

        let out = orch.handle(&session, &ui, scanned("7", "42", "99")).await;

        assert!(matches!(out, ScanOutcome::Navigated { created: true, .. }));
        assert_eq!(api.call_count(), 2);
        assert_eq!(ui.toasts()[0].0, ToastKind::Success);
        assert_eq!(ui.navigations().len(), 1);
        assert!(session.has_scanned(UserId(7)));
    }

    #[tokio::test]
    async fn client_error_fails_without_navigation() {
        let (api, orch, session) = setup(vec![status(404, "Event not found")]);
        let ui = RecordingUi::default();

        let out = orch.handle(&session, &ui, scanned("7", "42", "99")).await;

        assert!(matches!(out, ScanOutcome::Failed { .. }));
        assert_eq!(api.call_count(), 1);
        assert_eq!(
            ui.toasts(),
            vec![(
                ToastKind::Error,
                "Could not create the connection: Event not found".to_string()
            )]
        );
        assert!(ui.navigations().is_empty());
        assert!(!session.has_scanned(UserId(7)));
        assert!(!session.is_in_flight());
    }

    #[tokio::test]
    async fn missing_user_is_rejected() {
        let (api, orch, session) = setup(vec![]);
        let ui = RecordingUi::default();

        let link = crate::deeplink::decode_start_param("eventId=42");
        let out = orch.handle(&session, &ui, link).await;

        assert!(matches!(out, ScanOutcome::Rejected { .. }));
        assert_eq!(api.call_count(), 0);
        assert_eq!(ui.toasts()[0].0, ToastKind::Error);
    }

    #[tokio::test]
    async fn busy_session_ignores_new_scans() {
        let (api, orch, session) = setup(vec![]);
        let ui = RecordingUi::default();

        let _pending = session.try_begin().unwrap();
        let out = orch.handle(&session, &ui, scanned("7", "42", "99")).await;

        assert_eq!(out, ScanOutcome::Busy);
        assert_eq!(api.call_count(), 0);
        assert!(ui.toasts().is_empty());
    }

    #[tokio::test]
    async fn non_links_pass_through() {
        let (api, orch, session) = setup(vec![]);
        let ui = RecordingUi::default();

        for p in [
            ScannedPayload::Url("https://example.com".into()),
            ScannedPayload::Text("hello".into()),
            ScannedPayload::Cancel,
        ] {
            let out = orch.handle(&session, &ui, p.clone()).await;
            assert_eq!(out, ScanOutcome::Passthrough(p));
        }
        assert_eq!(api.call_count(), 0);
        assert!(ui.toasts().is_empty());
    }

    #[tokio::test]
    async fn legacy_link_without_event_omits_it() {
        let (api, orch, session) = setup(vec![]);
        let ui = RecordingUi::default();

        let link = ScannedPayload::Link {
            payload: DeepLinkPayload::for_user("5"),
            schema: StartParamSchema::Legacy,
        };
        let out = orch.handle(&session, &ui, link).await;

        assert_eq!(
            out,
            ScanOutcome::Navigated {
                target: format!("{VIEW}?userId=5"),
                user_id: UserId(5),
                created: true
            }
        );
        assert_eq!(api.calls.lock().unwrap()[0].base_event_id, None);
    }

    #[test]
    fn view_target_appends_to_existing_query() {
        let p = DeepLinkPayload::for_user("1").with_event("2");
        assert_eq!(
            view_target("https://x/app?tab=net", &p),
            "https://x/app?tab=net&userId=1&eventId=2"
        );
        assert_eq!(view_target("/view", &DeepLinkPayload::default()), "/view");
    }
}
