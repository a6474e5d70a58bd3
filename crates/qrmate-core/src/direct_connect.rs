//! Similarity-gated "direct connect" to a recommended user.
//!
//! Independent of scanning: it always issues its own request (the device's
//! scanned-id set is not consulted) and shares the creation retry policy.

use std::sync::Arc;

use crate::{
    domain::{EventId, UserId},
    errors::Error,
    policy::{CreationPolicy, CreationResult},
    ports::{CreateNetworkRequest, NetworkApi},
    Result,
};

/// Minimum similarity score (percent) that unlocks direct connect.
pub const DIRECT_CONNECT_THRESHOLD: u8 = 50;

pub fn is_unlocked(score: u8) -> bool {
    score >= DIRECT_CONNECT_THRESHOLD
}

pub struct DirectConnect {
    api: Arc<dyn NetworkApi>,
    policy: CreationPolicy,
}

impl DirectConnect {
    pub fn new(api: Arc<dyn NetworkApi>, policy: CreationPolicy) -> Self {
        Self { api, policy }
    }

    pub async fn connect(
        &self,
        event_id: Option<EventId>,
        user_id: UserId,
        score: u8,
    ) -> Result<CreationResult> {
        if !is_unlocked(score) {
            return Err(Error::Locked {
                score,
                threshold: DIRECT_CONNECT_THRESHOLD,
            });
        }
        tracing::debug!(user_id = user_id.0, score, "direct connect");
        let req = CreateNetworkRequest::new(event_id, user_id);
        self.policy.execute(self.api.as_ref(), &req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::testing::{status, FakeApi};

    #[test]
    fn threshold_edges() {
        assert!(!is_unlocked(0));
        assert!(!is_unlocked(49));
        assert!(is_unlocked(50));
        assert!(is_unlocked(100));
    }

    #[tokio::test]
    async fn locked_score_never_calls_backend() {
        let api = Arc::new(FakeApi::default());
        let dc = DirectConnect::new(api.clone(), CreationPolicy::default());
        let err = dc.connect(None, UserId(3), 49).await;
        assert!(matches!(err, Err(Error::Locked { score: 49, threshold: 50 })));
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn unlocked_at_threshold_and_optimistic_on_repeated_5xx() {
        let api = Arc::new(FakeApi::with(vec![status(500, "x"), status(502, "y")]));
        let dc = DirectConnect::new(api.clone(), CreationPolicy::default());
        let out = dc.connect(Some(EventId(1)), UserId(3), 50).await.unwrap();
        assert_eq!(out, CreationResult::AssumedCreated { status: 502 });
        assert_eq!(api.call_count(), 2);
    }

    #[tokio::test]
    async fn repeated_requests_are_not_deduplicated() {
        let api = Arc::new(FakeApi::default());
        let dc = DirectConnect::new(api.clone(), CreationPolicy::default());
        dc.connect(None, UserId(3), 80).await.unwrap();
        dc.connect(None, UserId(3), 80).await.unwrap();
        assert_eq!(api.call_count(), 2);
    }
}
