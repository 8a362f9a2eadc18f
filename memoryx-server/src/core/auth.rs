//! API-key authentication.
//!
//! Full session/JWT auth, key issuance and rotation are out-of-scope
//! collaborators (spec.md §1); this module only verifies a presented
//! `X-API-Key` against the relational store and resolves it to an
//! [`Owner`] partition.

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::core::cache::TtlCache;
use crate::core::tri_store::traits::RelationalStore;
use crate::models::owner::Owner;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// An owner partition (user, project) resolved from an API key, attached
/// to the request extensions by [`api_key_middleware`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedOwner(pub Owner);

/// Resolves a presented API key to its owning partition. Implemented by
/// the relational store.
#[async_trait]
pub trait ApiKeyVerifier: Send + Sync {
    async fn resolve(&self, api_key: &str) -> Option<Owner>;
}

/// Axum middleware enforcing the `X-API-Key` header against a verifier
/// held in shared state.
pub async fn api_key_middleware(
    State(verifier): State<std::sync::Arc<dyn ApiKeyVerifier>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let key = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let Some(key) = key else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    match verifier.resolve(&key).await {
        Some(owner) => {
            req.extensions_mut().insert(AuthenticatedOwner(owner));
            Ok(next.run(req).await)
        }
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Caches API-key-to-owner resolutions in front of any [`ApiKeyVerifier`],
/// using [`TtlCache`] the way the teacher caches chat completions —
/// avoids a relational round trip on every authenticated request.
pub struct CachingApiKeyVerifier<V> {
    inner: V,
    cache: TtlCache<String, Owner>,
}

impl<V: ApiKeyVerifier> CachingApiKeyVerifier<V> {
    pub fn new(inner: V, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new(10_000, ttl),
        }
    }
}

#[async_trait]
impl<V: ApiKeyVerifier> ApiKeyVerifier for CachingApiKeyVerifier<V> {
    async fn resolve(&self, api_key: &str) -> Option<Owner> {
        if let Some(owner) = self.cache.get(&api_key.to_string()) {
            return Some(owner);
        }
        let owner = self.inner.resolve(api_key).await?;
        self.cache.put(api_key.to_string(), owner.clone());
        Some(owner)
    }
}

/// Adapts any [`RelationalStore`] (held behind its trait object, as
/// `AppState` does) into an [`ApiKeyVerifier`], so the caching layer can
/// wrap it without the relational store itself depending on the auth
/// middleware's trait.
pub struct RelationalKeyVerifier(pub Arc<dyn RelationalStore>);

#[async_trait]
impl ApiKeyVerifier for RelationalKeyVerifier {
    async fn resolve(&self, api_key: &str) -> Option<Owner> {
        self.0.resolve_api_key(api_key).await.ok().flatten()
    }
}

/// Result of `/agents/auto-register` minting or replaying a per-device
/// API key (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub agent_id: Uuid,
    pub api_key: String,
    pub owner: Owner,
}

/// Computes the machine-fingerprint used by `/agents/auto-register`
/// (spec.md §6): SHA-256 over a canonical join of host, platform, arch,
/// first CPU model string and total memory bytes, truncated to the first
/// 32 hex characters.
pub fn machine_fingerprint(
    host: &str,
    platform: &str,
    arch: &str,
    cpu_model: &str,
    total_memory_bytes: u64,
) -> String {
    use sha2::{Digest, Sha256};
    let canonical = format!("{host}|{platform}|{arch}|{cpu_model}|{total_memory_bytes}");
    let digest = Sha256::digest(canonical.as_bytes());
    let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
    hex[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_32_hex_chars() {
        let a = machine_fingerprint("host1", "linux", "x86_64", "Intel", 16_000_000_000);
        let b = machine_fingerprint("host1", "linux", "x86_64", "Intel", 16_000_000_000);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_differs_on_any_input_change() {
        let a = machine_fingerprint("host1", "linux", "x86_64", "Intel", 16_000_000_000);
        let b = machine_fingerprint("host2", "linux", "x86_64", "Intel", 16_000_000_000);
        assert_ne!(a, b);
    }
}
