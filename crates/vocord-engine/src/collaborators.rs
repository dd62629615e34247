//! Seams to the host application: token issuance, subscription gating, and
//! conversation persistence all live outside the engine, behind these traits.

use std::time::Instant;

use async_trait::async_trait;

use crate::events::ConversationEvent;
use vocord_foundation::AuthError;

/// Short-lived credential for the realtime endpoint.
#[derive(Debug, Clone)]
pub struct AuthToken {
    pub secret: String,
    pub expires_at: Option<Instant>,
}

impl AuthToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            expires_at: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }
}

/// Called before every connect and reconnect attempt; a stale token is never
/// reused.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn voice_token(&self) -> Result<AuthToken, AuthError>;
}

/// Receives every published event, in publication order, before subscribers
/// see it.
pub trait ConversationLogger: Send + Sync {
    fn record(&self, event: &ConversationEvent);
}

/// Subscription check consulted by `start()`.
pub trait PaywallGate: Send + Sync {
    fn is_authorized(&self) -> bool;
}

/// Fixed token, for tests and development endpoints.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn voice_token(&self) -> Result<AuthToken, AuthError> {
        Ok(AuthToken::new(self.token.clone()))
    }
}

/// Reads the token from an environment variable on every call, so a rotated
/// credential is picked up at the next reconnect.
pub struct EnvTokenProvider {
    var: String,
}

impl EnvTokenProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl TokenProvider for EnvTokenProvider {
    async fn voice_token(&self) -> Result<AuthToken, AuthError> {
        match std::env::var(&self.var) {
            Ok(secret) if !secret.is_empty() => Ok(AuthToken::new(secret)),
            _ => Err(AuthError::FetchFailed(format!(
                "environment variable {} is not set",
                self.var
            ))),
        }
    }
}

/// Logs each event through `tracing`.
pub struct TracingConversationLogger;

impl ConversationLogger for TracingConversationLogger {
    fn record(&self, event: &ConversationEvent) {
        match event {
            ConversationEvent::Error { kind, detail } => {
                tracing::warn!("Conversation error ({:?}): {}", kind, detail);
            }
            ConversationEvent::TranscriptDelta(segment) => {
                tracing::debug!(
                    "Transcript [{:?}{}]: {}",
                    segment.role,
                    if segment.is_final { ", final" } else { "" },
                    segment.text
                );
            }
            other => tracing::info!("Conversation event: {:?}", other),
        }
    }
}

pub struct AllowAllGate;

impl PaywallGate for AllowAllGate {
    fn is_authorized(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn token_without_expiry_never_expires() {
        assert!(!AuthToken::new("tok").is_expired());
    }

    #[test]
    fn expired_token_reports_it() {
        let token = AuthToken {
            secret: "tok".into(),
            expires_at: Some(Instant::now() - Duration::from_secs(1)),
        };
        assert!(token.is_expired());
    }

    #[tokio::test]
    async fn env_provider_fails_cleanly_when_unset() {
        let provider = EnvTokenProvider::new("VOCORD_TEST_TOKEN_DOES_NOT_EXIST");
        assert!(matches!(
            provider.voice_token().await,
            Err(AuthError::FetchFailed(_))
        ));
    }

    #[tokio::test]
    async fn static_provider_hands_out_its_token() {
        let provider = StaticTokenProvider::new("tok-123");
        assert_eq!(provider.voice_token().await.unwrap().secret, "tok-123");
    }
}
