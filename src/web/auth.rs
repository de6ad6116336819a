use std::{
    collections::HashMap,
    env,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

use crate::web::{AppState, error::AppError};

const JWKS_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const JWKS_HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const CLOCK_SKEW_SECS: u64 = 60;

/// Identity claims extracted from a verified bearer token.
#[derive(Debug, Clone)]
pub struct AuthClaims {
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub preferred_username: Option<String>,
}

impl AuthClaims {
    /// Best display name available from the token, in the order the
    /// identity provider tends to populate them.
    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or(self.preferred_username.as_deref())
            .or(self.given_name.as_deref())
    }
}

#[derive(Clone)]
struct JwksCacheEntry {
    keys_by_kid: HashMap<String, Arc<DecodingKey>>,
    expires_at: Instant,
}

/// Verifier for identity-provider-issued bearer tokens.
///
/// Signing keys are fetched from the realm JWKS endpoint and cached for 24
/// hours; an unrecognized `kid` forces a single refresh before the token is
/// rejected.
pub struct TokenVerifier {
    http: reqwest::Client,
    issuer: String,
    jwks_url: String,
    jwks_cache: RwLock<Option<JwksCacheEntry>>,
    refresh_lock: Mutex<()>,
}

impl TokenVerifier {
    pub fn from_env() -> Result<Self> {
        let base_url = env::var("KEYCLOAK_URL").context("KEYCLOAK_URL env var is missing")?;
        let realm = env::var("KEYCLOAK_REALM").context("KEYCLOAK_REALM env var is missing")?;

        let (issuer, jwks_url) = realm_urls(&base_url, &realm);

        let http = reqwest::Client::builder()
            .timeout(JWKS_HTTP_TIMEOUT)
            .build()
            .context("failed to build HTTP client for token verification")?;

        Ok(Self {
            http,
            issuer,
            jwks_url,
            jwks_cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Verify a bearer token and return the identity claims it carries.
    pub async fn verify(&self, token: &str) -> Result<AuthClaims, AppError> {
        let header = decode_header(token)
            .map_err(|err| AppError::InvalidToken(format!("invalid token header: {err}")))?;

        if header.alg != Algorithm::RS256 {
            return Err(AppError::InvalidToken(format!(
                "unexpected token algorithm: {:?}",
                header.alg
            )));
        }

        let kid = header
            .kid
            .ok_or_else(|| AppError::InvalidToken("token is missing a key id".to_string()))?;

        let decoding_key = self.decoding_key_for_kid(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.validate_aud = false;
        validation.leeway = CLOCK_SKEW_SECS;

        let token_data = decode::<TokenClaims>(token, decoding_key.as_ref(), &validation)
            .map_err(|err| AppError::InvalidToken(format!("token validation failed: {err}")))?;

        let claims = token_data.claims;

        Ok(AuthClaims {
            subject: claims.sub,
            email: claims.email,
            name: claims.name,
            given_name: claims.given_name,
            family_name: claims.family_name,
            preferred_username: claims.preferred_username,
        })
    }

    async fn decoding_key_for_kid(&self, kid: &str) -> Result<Arc<DecodingKey>, AppError> {
        if let Some(key) = self.lookup_cached_key(kid).await {
            return Ok(key);
        }

        for force_refresh in [false, true] {
            self.refresh_jwks(force_refresh).await?;
            if let Some(key) = self.lookup_cached_key(kid).await {
                return Ok(key);
            }
        }

        Err(AppError::InvalidToken(format!(
            "token signing key not found in JWKS: {kid}"
        )))
    }

    async fn lookup_cached_key(&self, kid: &str) -> Option<Arc<DecodingKey>> {
        let cache = self.jwks_cache.read().await;
        let now = Instant::now();
        cache
            .as_ref()
            .filter(|entry| entry.expires_at > now)
            .and_then(|entry| entry.keys_by_kid.get(kid))
            .cloned()
    }

    async fn refresh_jwks(&self, force_refresh: bool) -> Result<(), AppError> {
        let _guard = self.refresh_lock.lock().await;

        if !force_refresh {
            let cache = self.jwks_cache.read().await;
            if cache
                .as_ref()
                .is_some_and(|entry| entry.expires_at > Instant::now())
            {
                return Ok(());
            }
        }

        tracing::debug!(jwks_url = %self.jwks_url, "refreshing signing key cache");

        let response = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|err| AppError::Internal(anyhow!("JWKS request failed: {err}")))?;

        if !response.status().is_success() {
            return Err(AppError::Internal(anyhow!(
                "JWKS request returned status {}",
                response.status()
            )));
        }

        let jwks: Jwks = response
            .json()
            .await
            .map_err(|err| AppError::Internal(anyhow!("invalid JWKS JSON: {err}")))?;

        let mut keys_by_kid: HashMap<String, Arc<DecodingKey>> = HashMap::new();

        for jwk in jwks.keys {
            if jwk.kty != "RSA" || jwk.kid.trim().is_empty() {
                continue;
            }

            if let Some(use_) = &jwk.use_ {
                if use_ != "sig" {
                    continue;
                }
            }

            match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(key) => {
                    keys_by_kid.insert(jwk.kid, Arc::new(key));
                }
                Err(err) => {
                    tracing::warn!(%err, kid = %jwk.kid, "skipping invalid RSA key in JWKS");
                }
            }
        }

        if keys_by_kid.is_empty() {
            return Err(AppError::Internal(anyhow!(
                "JWKS response did not include any usable RSA signing keys"
            )));
        }

        let entry = JwksCacheEntry {
            keys_by_kid,
            expires_at: Instant::now() + JWKS_CACHE_TTL,
        };

        *self.jwks_cache.write().await = Some(entry);

        Ok(())
    }
}

/// Middleware that requires a valid bearer token on the request.
///
/// On success the verified [`AuthClaims`] are inserted as a request
/// extension for handlers to consume.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(TypedHeader(Authorization(bearer))) = bearer else {
        return Err(AppError::AuthRequired);
    };

    let claims = state.verifier().verify(bearer.token()).await?;
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

fn realm_urls(base_url: &str, realm: &str) -> (String, String) {
    let issuer = format!("{}/realms/{}", base_url.trim_end_matches('/'), realm);
    let jwks_url = format!("{issuer}/protocol/openid-connect/certs");
    (issuer, jwks_url)
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    given_name: Option<String>,
    #[serde(default)]
    family_name: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    n: String,
    e: String,
    #[serde(rename = "use")]
    use_: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realm_urls_handle_trailing_slash() {
        let (issuer, jwks) = realm_urls("https://id.example.com/", "journal");
        assert_eq!(issuer, "https://id.example.com/realms/journal");
        assert_eq!(
            jwks,
            "https://id.example.com/realms/journal/protocol/openid-connect/certs"
        );

        let (issuer, _) = realm_urls("https://id.example.com", "journal");
        assert_eq!(issuer, "https://id.example.com/realms/journal");
    }

    #[test]
    fn token_claims_tolerate_missing_profile_fields() {
        let claims: TokenClaims =
            serde_json::from_value(serde_json::json!({ "sub": "abc-123" })).expect("parse claims");

        assert_eq!(claims.sub, "abc-123");
        assert!(claims.email.is_none());
        assert!(claims.preferred_username.is_none());
    }

    #[test]
    fn display_name_prefers_full_name() {
        let claims = AuthClaims {
            subject: "abc".to_string(),
            email: Some("jo@example.com".to_string()),
            name: Some("Jo Doe".to_string()),
            given_name: Some("Jo".to_string()),
            family_name: Some("Doe".to_string()),
            preferred_username: Some("jodoe".to_string()),
        };
        assert_eq!(claims.display_name(), Some("Jo Doe"));

        let claims = AuthClaims {
            name: None,
            ..claims
        };
        assert_eq!(claims.display_name(), Some("jodoe"));
    }
}
