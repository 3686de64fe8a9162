//! Bearer-token acquisition and per-repository caching
//!
//! OCI registries either answer an unauthenticated request with
//! `401` plus a `WWW-Authenticate: Bearer realm=...` challenge, or hand out
//! anonymous pull tokens from a fixed endpoint. Either way the resulting
//! token is scoped to one repository, so it is cached per repository name
//! and never shared across repositories. The catalog token has its own key.

use crate::error::Result;
use crate::logging::Logger;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// Parsed `WWW-Authenticate: Bearer ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

impl TokenResponse {
    pub(crate) fn into_token(self) -> Option<String> {
        self.token
            .or(self.access_token)
            .filter(|token| !token.is_empty())
    }
}

/// Outcome of authenticating against one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// The registry served the repository without a challenge
    NoAuthNeeded,
    Bearer(String),
}

impl AuthState {
    pub fn token(&self) -> Option<&str> {
        match self {
            AuthState::NoAuthNeeded => None,
            AuthState::Bearer(token) => Some(token),
        }
    }
}

/// Parse a bearer challenge header.
///
/// Quoted values may contain commas (`scope="repository:a:pull,push"`).
/// Returns `None` for non-bearer schemes or when `realm` is missing.
pub fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let header = header.trim();
    let (scheme, rest) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut params: HashMap<String, String> = HashMap::new();
    let mut remaining = rest;
    loop {
        remaining = remaining.trim_start_matches([' ', ',']);
        if remaining.is_empty() {
            break;
        }

        let eq = remaining.find('=')?;
        let key = remaining[..eq].trim().to_ascii_lowercase();
        remaining = &remaining[eq + 1..];

        let value = if let Some(quoted) = remaining.strip_prefix('"') {
            let close = quoted.find('"')?;
            let value = &quoted[..close];
            remaining = &quoted[close + 1..];
            value
        } else {
            let end = remaining.find(',').unwrap_or(remaining.len());
            let value = remaining[..end].trim();
            remaining = &remaining[end..];
            value
        };

        params.insert(key, value.to_string());
    }

    let realm = params.remove("realm")?;
    Some(BearerChallenge {
        realm,
        service: params.remove("service"),
        scope: params.remove("scope"),
    })
}

/// Per-repository token cache owned by one client instance.
///
/// At most one authentication per repository is in flight: concurrent
/// callers for the same repository wait for the first one's result. A
/// failed acquisition is not cached, so the next call tries again.
/// Entries are never refreshed; a new client starts from scratch.
#[derive(Debug)]
pub struct AuthTokenCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<AuthState>>>>,
    output: Logger,
}

impl AuthTokenCache {
    pub fn new(output: Logger) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            output,
        }
    }

    /// Token to send for `repository`, running `acquire` on first use.
    ///
    /// Returns `None` when no auth is needed or acquisition failed; in the
    /// latter case requests go out unauthenticated and fail on their own.
    pub async fn authorize<F, Fut>(&self, repository: &str, acquire: F) -> Option<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AuthState>>,
    {
        let cell = {
            let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(
                entries
                    .entry(repository.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        match cell.get_or_try_init(acquire).await {
            Ok(state) => state.token().map(str::to_string),
            Err(e) => {
                self.output.warning(&format!(
                    "Could not get auth token for {}: {}",
                    repository, e
                ));
                None
            }
        }
    }

    /// Cached state for `repository`, if authentication already completed
    pub fn cached(&self, repository: &str) -> Option<AuthState> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.get(repository).and_then(|cell| cell.get().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_parse_full_challenge() {
        let header = r#"Bearer realm="https://mcr.microsoft.com/oauth2/token",service="mcr.microsoft.com",scope="repository:dotnet/runtime:pull""#;
        let challenge = parse_bearer_challenge(header).unwrap();
        assert_eq!(challenge.realm, "https://mcr.microsoft.com/oauth2/token");
        assert_eq!(challenge.service.as_deref(), Some("mcr.microsoft.com"));
        assert_eq!(challenge.scope.as_deref(), Some("repository:dotnet/runtime:pull"));
    }

    #[test]
    fn test_parse_quoted_value_with_comma() {
        let header = r#"Bearer realm="https://auth.example/token", scope="repository:a/b:pull,push", service=registry"#;
        let challenge = parse_bearer_challenge(header).unwrap();
        assert_eq!(challenge.scope.as_deref(), Some("repository:a/b:pull,push"));
        assert_eq!(challenge.service.as_deref(), Some("registry"));
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        assert!(parse_bearer_challenge(r#"Basic realm="Registry""#).is_none());
        assert!(parse_bearer_challenge(r#"Bearer service="x""#).is_none());
        assert!(parse_bearer_challenge("Bearer").is_none());
    }

    #[tokio::test]
    async fn test_tokens_are_cached_per_repository() {
        let cache = AuthTokenCache::new(Logger::new_quiet());
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let token = cache
                .authorize("chainguard/python", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(AuthState::Bearer("py-token".to_string()))
                })
                .await;
            assert_eq!(token.as_deref(), Some("py-token"));
        }

        let other = cache
            .authorize("chainguard/node", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(AuthState::Bearer("node-token".to_string()))
            })
            .await;

        assert_eq!(other.as_deref(), Some("node-token"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_auth_needed_is_permanent() {
        let cache = AuthTokenCache::new(Logger::new_quiet());
        let token = cache
            .authorize("library/python", || async { Ok(AuthState::NoAuthNeeded) })
            .await;
        assert_eq!(token, None);
        assert_eq!(cache.cached("library/python"), Some(AuthState::NoAuthNeeded));

        let token = cache
            .authorize("library/python", || async {
                Ok(AuthState::Bearer("unexpected".to_string()))
            })
            .await;
        assert_eq!(token, None);
    }

    #[tokio::test]
    async fn test_failures_are_retried() {
        let cache = AuthTokenCache::new(Logger::new_quiet());
        let token = cache
            .authorize("dotnet/sdk", || async {
                Err(RegistryError::Auth("token endpoint down".to_string()))
            })
            .await;
        assert_eq!(token, None);
        assert_eq!(cache.cached("dotnet/sdk"), None);

        let token = cache
            .authorize("dotnet/sdk", || async { Ok(AuthState::Bearer("t".to_string())) })
            .await;
        assert_eq!(token.as_deref(), Some("t"));
    }

    #[tokio::test]
    async fn test_single_flight_per_repository() {
        let cache = Arc::new(AuthTokenCache::new(Logger::new_quiet()));
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .authorize("shared/repo", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(AuthState::Bearer("once".to_string()))
                        })
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().as_deref(), Some("once"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
