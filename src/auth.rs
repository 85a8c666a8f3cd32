//! Tenant authentication (`/tenant-auth/*`).

use std::sync::{Arc, OnceLock, RwLock};

use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::types::{Ack, AuthResponse, AuthToken, Page, User};

/// Shortest password the client will submit
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Registration payload
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Profile fields to change; unset fields are left alone
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"))
}

/// Reject obviously malformed addresses before hitting the network.
pub fn validate_email(email: &str) -> Result<()> {
    if email_regex().is_match(email) {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid email address: {}", email)))
    }
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(Error::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

/// Client for the tenant auth endpoints.
///
/// A successful `login` or `register` stores the access token on the shared
/// transport, so every other resource client is authenticated afterwards.
pub struct AuthClient {
    http: Arc<HttpClient>,
    current_user: RwLock<Option<User>>,
}

impl AuthClient {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self {
            http,
            current_user: RwLock::new(None),
        }
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<AuthResponse> {
        validate_email(&request.email)?;
        validate_password(&request.password)?;

        let response: AuthResponse = self.http.post("/tenant-auth/register", &request).await?;
        self.store_session(&response);
        Ok(response)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse> {
        validate_email(email)?;
        if password.is_empty() {
            return Err(Error::Validation("password is required".to_string()));
        }

        let response: AuthResponse = self
            .http
            .post(
                "/tenant-auth/login",
                &json!({ "email": email, "password": password }),
            )
            .await?;
        self.store_session(&response);
        Ok(response)
    }

    /// End the session. Local state is always cleared; server errors only
    /// show up as `false`.
    pub async fn logout(&self) -> bool {
        let result: Result<Value> = self.http.post("/tenant-auth/logout", &json!({})).await;
        self.http.set_token(None);
        self.set_cached_user(None);
        match result {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "logout request failed");
                false
            }
        }
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<AuthToken> {
        let token: AuthToken = self
            .http
            .post(
                "/tenant-auth/refresh",
                &json!({ "refreshToken": refresh_token }),
            )
            .await?;
        self.http.set_token(Some(token.access_token.clone()));
        Ok(token)
    }

    /// The signed-in user, fetched once and then served from cache.
    pub async fn current_user(&self) -> Result<User> {
        if let Some(user) = self.cached_user() {
            return Ok(user);
        }
        let user: User = self.http.get("/tenant-auth/me", &[]).await?;
        self.set_cached_user(Some(user.clone()));
        Ok(user)
    }

    pub fn cached_user(&self) -> Option<User> {
        self.current_user.read().ok().and_then(|u| u.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.http.token().is_some()
    }

    pub async fn update_profile(&self, update: UpdateProfile) -> Result<User> {
        let user: User = self.http.put("/tenant-auth/profile", &update).await?;
        self.set_cached_user(Some(user.clone()));
        Ok(user)
    }

    pub async fn change_password(&self, current: &str, new_password: &str) -> Result<Ack> {
        validate_password(new_password)?;
        self.http
            .post(
                "/tenant-auth/change-password",
                &json!({ "currentPassword": current, "newPassword": new_password }),
            )
            .await
    }

    pub async fn forgot_password(&self, email: &str) -> Result<Ack> {
        validate_email(email)?;
        self.http
            .post("/tenant-auth/forgot-password", &json!({ "email": email }))
            .await
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<Ack> {
        validate_password(new_password)?;
        self.http
            .post(
                "/tenant-auth/reset-password",
                &json!({ "token": token, "newPassword": new_password }),
            )
            .await
    }

    pub async fn verify_email(&self, token: &str) -> Result<Ack> {
        self.http
            .post("/tenant-auth/verify-email", &json!({ "token": token }))
            .await
    }

    pub async fn resend_verification(&self, email: &str) -> Result<Ack> {
        validate_email(email)?;
        self.http
            .post("/tenant-auth/resend-verification", &json!({ "email": email }))
            .await
    }

    /// Tenant users, paginated.
    pub async fn list_users(&self, page: u32, limit: u32) -> Result<Page<User>> {
        self.http
            .get(
                "/tenant-auth/users",
                &[("page", page.to_string()), ("limit", limit.to_string())],
            )
            .await
    }

    /// `true` when the configured API key is accepted. Any failure, including
    /// network errors, reads as `false`.
    pub async fn validate_api_key(&self) -> bool {
        match self.http.get::<Value>("/tenant-auth/validate-key", &[]).await {
            Ok(body) => body
                .get("valid")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            Err(e) => {
                warn!(error = %e, "api key validation failed");
                false
            }
        }
    }

    fn store_session(&self, response: &AuthResponse) {
        self.http.set_token(Some(response.token.access_token.clone()));
        self.set_cached_user(Some(response.user.clone()));
    }

    fn set_cached_user(&self, user: Option<User>) {
        if let Ok(mut guard) = self.current_user.write() {
            *guard = user;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("alice@example.com").is_ok());
        assert!(validate_email("a.b+c@sub.example.io").is_ok());
        assert!(validate_email("alice").is_err());
        assert!(validate_email("alice@example").is_err());
        assert!(validate_email("al ice@example.com").is_err());
        assert!(validate_email("").is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("12345678").is_ok());
        assert!(matches!(
            validate_password("short"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_register_request_wire_names() {
        let req = RegisterRequest {
            email: "a@b.co".to_string(),
            password: "password1".to_string(),
            first_name: Some("Ada".to_string()),
            ..Default::default()
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["firstName"], "Ada");
        assert!(v.get("lastName").is_none());
    }
}
