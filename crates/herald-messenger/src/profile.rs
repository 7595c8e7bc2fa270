//! User-profile enrichment.
//!
//! A cache-checked GET of the platform user profile, producing a state patch
//! for the conversation. Skipped when the state already carries a `user`
//! object, so the platform is asked at most once per conversation.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use herald_core::{HeraldResult, TransportError};

use crate::api::BoxedGraphTransport;

/// Base URL of the profile endpoint.
pub const PROFILE_API_URL: &str = "https://graph.facebook.com/v2.8";

/// Public profile fields of a platform user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Given name.
    pub first_name: Option<String>,
    /// Family name.
    pub last_name: Option<String>,
    /// Avatar URL.
    pub profile_pic: Option<String>,
    /// Locale tag.
    pub locale: Option<String>,
    /// Self-reported gender.
    pub gender: Option<String>,
}

/// Loads user profiles through the Graph API.
pub struct ProfileLoader {
    page_token: String,
    api_url: String,
    transport: BoxedGraphTransport,
}

impl ProfileLoader {
    /// Creates a loader using the default profile endpoint.
    pub fn new(page_token: impl Into<String>, transport: BoxedGraphTransport) -> Self {
        Self {
            page_token: page_token.into(),
            api_url: PROFILE_API_URL.to_string(),
            transport,
        }
    }

    /// Overrides the profile endpoint base URL.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Fetches the profile of one user.
    pub async fn load(&self, user_id: &str) -> HeraldResult<UserProfile> {
        let url = format!("{}/{}", self.api_url, user_id);
        let response = self.transport.get(&url, &self.page_token).await?;
        let profile = serde_json::from_value(response)
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        Ok(profile)
    }

    /// Returns a `{"user": ...}` state patch, or `None` when the state
    /// already carries a `user` entry (a null value also counts as loaded).
    pub async fn load_if_missing(
        &self,
        state: &Value,
        user_id: &str,
    ) -> HeraldResult<Option<Value>> {
        match state.get("user") {
            Some(Value::Object(_)) | Some(Value::Null) => return Ok(None),
            _ => {}
        }
        let profile = self.load(user_id).await?;
        Ok(Some(json!({"user": profile})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use herald_core::TransportResult;

    use crate::api::GraphTransport;

    struct ProfileTransport {
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GraphTransport for ProfileTransport {
        async fn post(&self, _url: &str, _token: &str, _body: &Value) -> TransportResult<Value> {
            Err(TransportError::Network("unexpected post".into()))
        }

        async fn get(&self, url: &str, _token: &str) -> TransportResult<Value> {
            self.urls.lock().push(url.to_string());
            Ok(json!({
                "first_name": "Ada",
                "last_name": "Lovelace",
                "profile_pic": "https://example.com/pic.jpg",
                "locale": "en_GB",
                "gender": "female"
            }))
        }
    }

    fn loader() -> (ProfileLoader, Arc<ProfileTransport>) {
        let transport = Arc::new(ProfileTransport {
            urls: Mutex::new(Vec::new()),
        });
        (
            ProfileLoader::new("pt", Arc::clone(&transport) as BoxedGraphTransport),
            transport,
        )
    }

    #[tokio::test]
    async fn test_load_maps_profile_fields() {
        let (loader, transport) = loader();

        let profile = loader.load("user-1").await.unwrap();
        assert_eq!(profile.first_name.as_deref(), Some("Ada"));
        assert_eq!(profile.locale.as_deref(), Some("en_GB"));
        assert_eq!(
            transport.urls.lock()[0],
            format!("{PROFILE_API_URL}/user-1")
        );
    }

    #[tokio::test]
    async fn test_load_if_missing_produces_state_patch() {
        let (loader, _) = loader();

        let patch = loader
            .load_if_missing(&json!({"step": 1}), "user-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(patch["user"]["first_name"], "Ada");
    }

    #[tokio::test]
    async fn test_load_if_missing_skips_loaded_state() {
        let (loader, transport) = loader();

        let loaded = json!({"user": {"first_name": "Ada"}});
        assert_eq!(loader.load_if_missing(&loaded, "user-1").await.unwrap(), None);

        let null_user = json!({"user": null});
        assert_eq!(
            loader.load_if_missing(&null_user, "user-1").await.unwrap(),
            None
        );

        assert!(transport.urls.lock().is_empty());
    }
}
