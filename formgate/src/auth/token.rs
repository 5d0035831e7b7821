//! Bearer token validation.
//!
//! Tokens are issued by the identity provider; this crate only verifies them. Two key sources
//! are supported:
//!
//! - a shared HMAC secret, for development and for providers that sign with HS256
//! - a remote JWKS document, fetched on demand and cached for `cache_ttl`. A token whose `kid`
//!   is not in the cached set forces one refetch, so key rotation is picked up without waiting
//!   for the TTL.

use async_trait::async_trait;
use jsonwebtoken::{
    Algorithm, DecodingKey, Header, Validation, decode, decode_header,
    errors::ErrorKind,
    jwk::{AlgorithmParameters, JwkSet},
};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{sync::Arc, time::Duration};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::{
    config::{AuthConfig, TokenKeyConfig},
    lookup::{self, LookupError},
};

const HMAC_ALGORITHMS: &[Algorithm] = &[Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
const RSA_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];
const EC_ALGORITHMS: &[Algorithm] = &[Algorithm::ES256, Algorithm::ES384];
const OKP_ALGORITHMS: &[Algorithm] = &[Algorithm::EdDSA];

/// Shortest gap between two refetches forced by an unknown `kid`.
const MIN_FORCED_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Claims carried by an identity-provider token.
///
/// Only `sub` and `exp` are interpreted here; everything else is passed through to the session
/// service untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Verifies bearer tokens and exposes their claims.
///
/// `Ok(false)` / `Ok(None)` mean the token was rejected. `Err` is reserved for failures to
/// obtain verification keys.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> lookup::Result<bool>;

    async fn claims(&self, token: &str) -> lookup::Result<Option<TokenClaims>>;
}

enum KeySource {
    Secret(DecodingKey),
    Jwks(JwksSource),
}

struct JwksSource {
    client: reqwest::Client,
    url: Url,
    cache: Cache<String, Arc<JwkSet>>,
    /// Holds the url while a forced refetch is still within [`MIN_FORCED_REFRESH_INTERVAL`]
    forced_refreshes: Cache<String, ()>,
}

impl JwksSource {
    async fn key_set(&self) -> lookup::Result<Arc<JwkSet>> {
        let client = self.client.clone();
        let url = self.url.clone();
        self.cache
            .try_get_with(self.url.to_string(), async move { fetch_key_set(&client, url).await })
            .await
            .map_err(|e| LookupError::Other(anyhow::anyhow!("Failed to fetch JWKS: {e}")))
    }

    /// Resolve the verification key named by the token header's `kid`.
    async fn decoding_key(&self, header: &Header) -> lookup::Result<Option<DecodingKey>> {
        let Some(kid) = header.kid.as_deref() else {
            debug!("Token has no kid; rejecting against JWKS key source");
            return Ok(None);
        };

        let mut keys = self.key_set().await?;
        if keys.find(kid).is_none() {
            let claimed = self.forced_refreshes.entry(self.url.to_string()).or_insert(()).await;
            if !claimed.is_fresh() {
                debug!(kid, "kid not in cached key set, refetched too recently to retry");
                return Ok(None);
            }

            debug!(kid, "kid not in cached key set, refetching");
            self.cache.invalidate(self.url.as_str()).await;
            keys = self.key_set().await?;
        }

        let Some(jwk) = keys.find(kid) else {
            debug!(kid, "kid not in key set");
            return Ok(None);
        };

        if !algorithms_for(&jwk.algorithm).contains(&header.alg) {
            debug!(kid, alg = ?header.alg, "Token algorithm does not match key type");
            return Ok(None);
        }

        DecodingKey::from_jwk(jwk)
            .map(Some)
            .map_err(|e| LookupError::Decode(format!("unusable JWK {kid}: {e}")))
    }
}

async fn fetch_key_set(client: &reqwest::Client, url: Url) -> lookup::Result<Arc<JwkSet>> {
    debug!(%url, "Fetching JWKS");
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(LookupError::Status { status, body });
    }

    Ok(Arc::new(response.json::<JwkSet>().await?))
}

fn algorithms_for(params: &AlgorithmParameters) -> &'static [Algorithm] {
    match params {
        AlgorithmParameters::OctetKey(_) => HMAC_ALGORITHMS,
        AlgorithmParameters::RSA(_) => RSA_ALGORITHMS,
        AlgorithmParameters::EllipticCurve(_) => EC_ALGORITHMS,
        AlgorithmParameters::OctetKeyPair(_) => OKP_ALGORITHMS,
    }
}

/// [`TokenValidator`] backed by `jsonwebtoken`.
pub struct JwtTokenValidator {
    keys: KeySource,
    issuer: Option<String>,
    audience: Option<String>,
    leeway: u64,
}

impl JwtTokenValidator {
    pub fn with_secret(secret: &str) -> Self {
        Self {
            keys: KeySource::Secret(DecodingKey::from_secret(secret.as_bytes())),
            issuer: None,
            audience: None,
            leeway: 0,
        }
    }

    pub fn with_jwks(url: Url, cache_ttl: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        let cache = Cache::builder().max_capacity(1).time_to_live(cache_ttl).build();
        let forced_refreshes = Cache::builder()
            .max_capacity(1)
            .time_to_live(MIN_FORCED_REFRESH_INTERVAL)
            .build();

        Ok(Self {
            keys: KeySource::Jwks(JwksSource {
                client,
                url,
                cache,
                forced_refreshes,
            }),
            issuer: None,
            audience: None,
            leeway: 0,
        })
    }

    pub fn from_config(config: &AuthConfig) -> anyhow::Result<Self> {
        let validator = match &config.key {
            TokenKeyConfig::Secret { secret } => Self::with_secret(secret),
            TokenKeyConfig::Jwks { url, cache_ttl } => Self::with_jwks(url.clone(), *cache_ttl)?,
        };

        Ok(Self {
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            leeway: config.leeway.as_secs(),
            ..validator
        })
    }

    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    #[instrument(skip_all)]
    async fn verify(&self, token: &str) -> lookup::Result<Option<TokenClaims>> {
        let header = match decode_header(token) {
            Ok(header) => header,
            Err(e) => {
                debug!("Malformed token header: {e}");
                return Ok(None);
            }
        };

        let key = match &self.keys {
            KeySource::Secret(key) => {
                if !HMAC_ALGORITHMS.contains(&header.alg) {
                    debug!(alg = ?header.alg, "Token algorithm does not match shared secret");
                    return Ok(None);
                }
                key.clone()
            }
            KeySource::Jwks(source) => match source.decoding_key(&header).await? {
                Some(key) => key,
                None => return Ok(None),
            },
        };

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.leeway;
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        match decode::<TokenClaims>(token, &key, &validation) {
            Ok(data) => Ok(Some(data.claims)),
            Err(e) => match e.kind() {
                // Client errors - malformed, expired, or mis-addressed tokens
                ErrorKind::InvalidToken
                | ErrorKind::InvalidSignature
                | ErrorKind::ExpiredSignature
                | ErrorKind::MissingRequiredClaim(_)
                | ErrorKind::InvalidIssuer
                | ErrorKind::InvalidAudience
                | ErrorKind::InvalidSubject
                | ErrorKind::ImmatureSignature
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_)
                | ErrorKind::InvalidAlgorithm => {
                    debug!("Token rejected: {e}");
                    Ok(None)
                }

                // Server errors - key material we were configured with is unusable
                _ => {
                    warn!("JWT verification failed: {e}");
                    Err(LookupError::Other(anyhow::anyhow!("JWT verification: {e}")))
                }
            },
        }
    }
}

#[async_trait]
impl TokenValidator for JwtTokenValidator {
    async fn validate(&self, token: &str) -> lookup::Result<bool> {
        Ok(self.verify(token).await?.is_some())
    }

    async fn claims(&self, token: &str) -> lookup::Result<Option<TokenClaims>> {
        self.verify(token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::install_crypto_provider;
    use chrono::Utc;
    use jsonwebtoken::{EncodingKey, encode};
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    const SECRET: &str = "test-secret-key-for-jwt";
    // base64url of "formgate-jwks-key-material-001234567890"
    const JWKS_SECRET: &str = "formgate-jwks-key-material-001234567890";
    const JWKS_SECRET_B64: &str = "Zm9ybWdhdGUtandrcy1rZXktbWF0ZXJpYWwtMDAxMjM0NTY3ODkw";

    fn sign(claims: &Value, secret: &str, kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = kid.map(str::to_string);
        encode(&header, claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn claims_expiring_in(seconds: i64) -> Value {
        json!({
            "sub": "abc123@idir",
            "exp": Utc::now().timestamp() + seconds,
            "iss": "https://idp.example.com",
            "aud": "forms",
            "idp_username": "jdoe"
        })
    }

    fn jwks_body() -> Value {
        json!({
            "keys": [{"kty": "oct", "kid": "k1", "alg": "HS256", "k": JWKS_SECRET_B64}]
        })
    }

    #[tokio::test]
    async fn test_valid_secret_token_exposes_all_claims() {
        let validator = JwtTokenValidator::with_secret(SECRET);
        let token = sign(&claims_expiring_in(3600), SECRET, None);

        assert!(validator.validate(&token).await.unwrap());

        let claims = validator.claims(&token).await.unwrap().unwrap();
        assert_eq!(claims.sub, "abc123@idir");
        assert_eq!(claims.iss.as_deref(), Some("https://idp.example.com"));
        assert_eq!(claims.extra.get("idp_username"), Some(&json!("jdoe")));
    }

    #[tokio::test]
    async fn test_rejected_tokens_are_invalid_not_errors() {
        let validator = JwtTokenValidator::with_secret(SECRET);

        let wrong_secret = sign(&claims_expiring_in(3600), "different-secret", None);
        assert!(!validator.validate(&wrong_secret).await.unwrap());

        let expired = sign(&claims_expiring_in(-3600), SECRET, None);
        assert!(!validator.validate(&expired).await.unwrap());

        assert!(!validator.validate("invalid.token.here").await.unwrap());
        assert!(!validator.validate("").await.unwrap());

        let no_subject = sign(&json!({"exp": Utc::now().timestamp() + 3600}), SECRET, None);
        assert!(validator.claims(&no_subject).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_issuer_and_audience_checks() {
        let token = sign(&claims_expiring_in(3600), SECRET, None);

        let matching = JwtTokenValidator::with_secret(SECRET)
            .issuer("https://idp.example.com")
            .audience("forms");
        assert!(matching.validate(&token).await.unwrap());

        let other_issuer = JwtTokenValidator::with_secret(SECRET).issuer("https://elsewhere.example.com");
        assert!(!other_issuer.validate(&token).await.unwrap());

        let other_audience = JwtTokenValidator::with_secret(SECRET).audience("reports");
        assert!(!other_audience.validate(&token).await.unwrap());
    }

    #[tokio::test]
    async fn test_jwks_is_fetched_once_and_cached() {
        install_crypto_provider();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body()))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/jwks", server.uri())).unwrap();
        let validator = JwtTokenValidator::with_jwks(url, Duration::from_secs(300)).unwrap();
        let token = sign(&claims_expiring_in(3600), JWKS_SECRET, Some("k1"));

        assert!(validator.validate(&token).await.unwrap());
        let claims = validator.claims(&token).await.unwrap().unwrap();
        assert_eq!(claims.sub, "abc123@idir");
    }

    #[tokio::test]
    async fn test_unknown_kid_refetches_once_then_rejects() {
        install_crypto_provider();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body()))
            .expect(2)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/jwks", server.uri())).unwrap();
        let validator = JwtTokenValidator::with_jwks(url, Duration::from_secs(300)).unwrap();

        let rotated = sign(&claims_expiring_in(3600), JWKS_SECRET, Some("k2"));
        assert!(!validator.validate(&rotated).await.unwrap());

        let no_kid = sign(&claims_expiring_in(3600), JWKS_SECRET, None);
        assert!(!validator.validate(&no_kid).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_kid_refetch_is_rate_limited() {
        install_crypto_provider();
        let server = MockServer::start().await;
        // The initial fetch plus a single forced refetch, however many unknown kids arrive
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body()))
            .expect(2)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/jwks", server.uri())).unwrap();
        let validator = JwtTokenValidator::with_jwks(url, Duration::from_secs(300)).unwrap();

        for kid in ["k2", "k3", "k4", "k2"] {
            let token = sign(&claims_expiring_in(3600), JWKS_SECRET, Some(kid));
            assert!(!validator.validate(&token).await.unwrap());
        }

        // Known keys keep working from the cache
        let token = sign(&claims_expiring_in(3600), JWKS_SECRET, Some("k1"));
        assert!(validator.validate(&token).await.unwrap());
    }

    #[tokio::test]
    async fn test_jwks_fetch_failure_is_an_error() {
        install_crypto_provider();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/jwks", server.uri())).unwrap();
        let validator = JwtTokenValidator::with_jwks(url, Duration::from_secs(300)).unwrap();
        let token = sign(&claims_expiring_in(3600), JWKS_SECRET, Some("k1"));

        assert!(validator.validate(&token).await.is_err());
    }
}
