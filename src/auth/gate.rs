//! # Authentication Gate
//!
//! Per-route authentication decision plus credential validation. The gate is a
//! no-op for routes without `auth_required` and for OPTIONS requests (CORS
//! preflight never authenticates).
//!
//! Credential order: the API key header is checked first against the in-memory
//! allowlist; a present and valid key skips bearer validation entirely.
//! Otherwise the `Authorization: Bearer <token>` header is validated, either
//! remotely against the auth service's validation endpoint (the default) or
//! locally by decoding the HS256 token, depending on
//! `auth.validation_strategy`.

use axum::http::Method;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::api_keys::ApiKeyStore;
use crate::core::config::GatewayConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{Principal, RequestContext, Route};

/// Hard timeout on remote token validation, independent of upstream config
const VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Request body sent to the auth service's validation endpoint
#[derive(Debug, Serialize)]
struct TokenValidationRequest<'a> {
    token: &'a str,
}

/// Response shape of the validation endpoint
#[derive(Debug, Deserialize)]
struct TokenValidationResponse {
    valid: bool,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    metadata: HashMap<String, Value>,
}

/// The authentication gate
pub struct AuthGate {
    http: reqwest::Client,
    api_keys: ApiKeyStore,
}

impl AuthGate {
    pub fn new<I>(seed_keys: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            http: reqwest::Client::new(),
            api_keys: ApiKeyStore::new(seed_keys),
        }
    }

    /// Runtime access to the allowlist
    pub fn api_keys(&self) -> &ApiKeyStore {
        &self.api_keys
    }

    /// Run the gate for a matched route
    ///
    /// Returns `Ok(None)` when no authentication applies, `Ok(Some(principal))`
    /// on success, and an `Unauthenticated` error otherwise. The route is never
    /// dispatched after a failure.
    pub async fn authenticate(
        &self,
        ctx: &RequestContext,
        route: &Route,
        config: &GatewayConfig,
    ) -> GatewayResult<Option<Principal>> {
        if !route.auth_required || ctx.method == Method::OPTIONS {
            return Ok(None);
        }

        let api_key_header = config.auth.api_key_header.to_ascii_lowercase();
        if let Some(key) = ctx.header(&api_key_header) {
            if self.api_keys.contains(key) {
                debug!(request_id = %ctx.request_id, "API key accepted");
                return Ok(Some(Principal::api_key_user()));
            }
            warn!(request_id = %ctx.request_id, "Invalid API key presented");
        }

        let auth_header = ctx
            .header("authorization")
            .ok_or_else(|| GatewayError::unauthenticated("Missing authorization header"))?;
        let token = parse_bearer(auth_header)?;

        let principal = match config.auth.validation_strategy.as_str() {
            "local" => self.validate_local(token, config)?,
            _ => self.validate_remote(token, config).await?,
        };

        debug!(
            request_id = %ctx.request_id,
            user_id = %principal.id,
            "Token validated successfully"
        );
        Ok(Some(principal))
    }

    /// POST the token to the auth service's validation endpoint
    async fn validate_remote(
        &self,
        token: &str,
        config: &GatewayConfig,
    ) -> GatewayResult<Principal> {
        let auth_service = config
            .service("auth")
            .ok_or_else(|| GatewayError::internal("auth service not configured"))?;
        let url = format!("{}{}", auth_service.url, config.auth.validation_endpoint);

        let response = self
            .http
            .post(&url)
            .timeout(VALIDATION_TIMEOUT)
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {token}"))
            .json(&TokenValidationRequest { token })
            .send()
            .await
            .map_err(|err| {
                warn!(error = %err, "Token validation request failed");
                GatewayError::unauthenticated("Invalid or expired token")
            })?;

        if response.status() != reqwest::StatusCode::OK {
            debug!(status = %response.status(), "Token validation rejected");
            return Err(GatewayError::unauthenticated("Invalid or expired token"));
        }

        let validation: TokenValidationResponse = response
            .json()
            .await
            .map_err(|_| GatewayError::unauthenticated("Invalid or expired token"))?;

        if !validation.valid {
            debug!(message = %validation.message, "Token reported invalid");
            return Err(GatewayError::unauthenticated("Invalid or expired token"));
        }

        Ok(Principal {
            id: validation.user_id,
            username: String::new(),
            email: validation.email,
            roles: validation.roles,
            metadata: validation.metadata,
        })
    }

    /// Decode the token locally with the configured HS256 secret
    fn validate_local(&self, token: &str, config: &GatewayConfig) -> GatewayResult<Principal> {
        let key = DecodingKey::from_secret(config.auth.jwt_secret.as_bytes());
        let validation = Validation::new(Algorithm::HS256);

        let data =
            jsonwebtoken::decode::<HashMap<String, Value>>(token, &key, &validation).map_err(
                |err| {
                    warn!(error = %err, "JWT validation failed");
                    GatewayError::unauthenticated("Invalid or expired token")
                },
            )?;
        let claims = data.claims;

        let roles = claims
            .get("roles")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut principal = Principal {
            id: string_claim(&claims, "sub"),
            username: string_claim(&claims, "username"),
            email: string_claim(&claims, "email"),
            roles,
            metadata: HashMap::new(),
        };

        // remaining claims travel as principal metadata
        for (name, value) in claims {
            if !matches!(
                name.as_str(),
                "sub" | "username" | "email" | "roles" | "exp" | "iat"
            ) {
                principal.metadata.insert(name, value);
            }
        }

        Ok(principal)
    }
}

/// Extract the token from a `Bearer <token>` header, scheme case-insensitive
fn parse_bearer(header: &str) -> GatewayResult<&str> {
    match header.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() => {
            Ok(token)
        }
        _ => Err(GatewayError::unauthenticated(
            "Invalid authorization header format",
        )),
    }
}

fn string_claim(claims: &HashMap<String, Value>, name: &str) -> String {
    claims
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
