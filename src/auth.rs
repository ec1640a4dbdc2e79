// ABOUTME: Token service, authorization guard, and user account handlers
// ABOUTME: Issues and validates stateless signed claims; owner-or-admin gating for mutations

use axum::{
    Json,
    extract::{FromRequestParts, Host, Path, Query, State},
    http::{HeaderMap, StatusCode, header, request::Parts},
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::AppState;
use crate::config::JwtConfig;
use crate::email;
use crate::error::{AppError, Result};
use crate::types::*;

/// Decoded, validated payload of an identity token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub roles: Vec<String>,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
}

/// Claims for verification/reset links handed to the mailer. Scoped by purpose
/// so an email token can never pass as an identity token or vice versa.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmailClaims {
    sub: String,
    purpose: String,
    iss: String,
    aud: String,
    exp: i64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TokenError {
    Expired,
    InvalidSignature,
    Malformed,
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        let msg = match err {
            TokenError::Expired => "token expired",
            TokenError::InvalidSignature => "invalid token signature",
            TokenError::Malformed => "malformed token",
        };
        AppError::Unauthorized(msg.to_string())
    }
}

/// Stateless token issuance and validation over a process-wide symmetric key.
/// No revocation list exists: an issued token stays valid until its expiry.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    expire_minutes: i64,
    email_token_expire_minutes: i64,
}

impl TokenService {
    pub fn new(config: &JwtConfig) -> Result<Self> {
        if config.secret.is_empty() || config.issuer.is_empty() || config.audience.is_empty() {
            return Err(AppError::Configuration(
                "token signing settings are incomplete".to_string(),
            ));
        }

        Ok(Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            expire_minutes: config.expire_minutes,
            email_token_expire_minutes: config.email_token_expire_minutes,
        })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.leeway = 0;
        validation
    }

    pub fn issue(&self, user: &User, roles: &[String]) -> Result<String> {
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            roles: roles.to_vec(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: (chrono::Utc::now() + chrono::Duration::minutes(self.expire_minutes)).timestamp(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::Unauthorized(format!("failed to sign token: {}", e)))
    }

    pub fn validate(&self, token: &str) -> std::result::Result<Claims, TokenError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation())
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                _ => TokenError::Malformed,
            })
    }

    /// Re-issues for the same subject with a fresh expiry. The caller must
    /// already hold currently-valid claims; there is no standalone refresh path.
    pub fn refresh(&self, claims: &Claims) -> Result<String> {
        let fresh = Claims {
            exp: (chrono::Utc::now() + chrono::Duration::minutes(self.expire_minutes)).timestamp(),
            ..claims.clone()
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &fresh, &self.encoding)
            .map_err(|e| AppError::Unauthorized(format!("failed to sign token: {}", e)))
    }

    pub fn issue_email_token(&self, user_id: &ObjectId, purpose: &str) -> Result<String> {
        let claims = EmailClaims {
            sub: user_id.to_string(),
            purpose: purpose.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: (chrono::Utc::now()
                + chrono::Duration::minutes(self.email_token_expire_minutes))
            .timestamp(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::Unauthorized(format!("failed to sign token: {}", e)))
    }

    pub fn validate_email_token(&self, token: &str, purpose: &str) -> Result<ObjectId> {
        let claims =
            jsonwebtoken::decode::<EmailClaims>(token, &self.decoding, &self.validation())
                .map(|data| data.claims)
                .map_err(|_| AppError::Unauthorized("invalid or expired link".to_string()))?;

        if claims.purpose != purpose {
            return Err(AppError::Unauthorized("invalid or expired link".to_string()));
        }
        ObjectId::parse(&claims.sub)
    }
}

/// Authorization rule for mutating profile/media/relation operations: admin
/// role, or ownership of the target profile. Reads stay anonymous by design.
pub fn can_act(claims: &Claims, owns_profile: bool) -> bool {
    claims.roles.iter().any(|r| r == "admin") || owns_profile
}

/// Resolves the target profile and applies `can_act`. Missing profile is
/// NotFound; an existing profile the caller may not touch is Forbidden —
/// profiles are anonymously readable, so existence is never a secret here.
pub async fn require_can_act(
    state: &AppState,
    claims: &Claims,
    profile_id: &ObjectId,
) -> Result<()> {
    state.storage.get_profile(profile_id).await?;

    let subject = ObjectId::parse(&claims.sub)?;
    let owns = state.storage.is_owner(&subject, profile_id).await?;
    if can_act(claims, owns) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "user {} cannot act on profile {}",
            claims.sub, profile_id
        )))
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for Claims {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;

        Ok(state.tokens.validate(bearer)?)
    }
}

/// Absolute base URL for the current request; media URLs and email links are
/// computed per request, never stored.
pub fn base_url(host: &str, headers: &HeaderMap) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    format!("{}://{}", scheme, host)
}

// Handlers

pub async fn register(
    State(state): State<AppState>,
    Host(host): Host,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    if req.password.len() < 6 {
        return Err(AppError::Validation(
            "password must be at least 6 characters".to_string(),
        ));
    }
    if !req.email.contains('@') {
        return Err(AppError::Validation("invalid email address".to_string()));
    }

    let roles = vec![req.role.clone()];
    let user = state
        .storage
        .create_user(
            &req.display_name,
            &req.email,
            &req.password,
            &roles,
            req.skip_email_verification,
        )
        .await?;

    if !req.skip_email_verification {
        let token = state.tokens.issue_email_token(&user.id, "verify_email")?;
        let link = format!(
            "{}/api/users/verify-email?token={}",
            base_url(&host, &headers),
            token
        );
        state
            .mailer
            .send(&user.email, "Confirm your email", &email::verification_body(&link))
            .await?;
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": user.id, "username": user.username })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailQuery {
    pub token: String,
}

pub async fn verify_email(
    State(state): State<AppState>,
    Query(query): Query<VerifyEmailQuery>,
) -> Result<Json<serde_json::Value>> {
    let user_id = state
        .tokens
        .validate_email_token(&query.token, "verify_email")?;
    state.storage.set_email_confirmed(&user_id).await?;

    Ok(Json(json!({ "message": "email verified" })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>> {
    let user = state
        .storage
        .get_user_by_email(&req.email)
        .await?
        .ok_or_else(|| AppError::Unauthorized("wrong email or password".to_string()))?;

    if !state.storage.verify_password(&user, &req.password)? {
        return Err(AppError::Unauthorized("wrong email or password".to_string()));
    }

    let roles = state.storage.roles_for(&user.id).await?;
    let token = state.tokens.issue(&user, &roles)?;

    Ok(Json(TokenResponse { token }))
}

pub async fn refresh_token(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<TokenResponse>> {
    // Confirm the subject still exists before extending its lifetime.
    let user_id = ObjectId::parse(&claims.sub)?;
    state.storage.get_user(&user_id).await?;

    let token = state.tokens.refresh(&claims)?;
    Ok(Json(TokenResponse { token }))
}

pub async fn me(State(state): State<AppState>, claims: Claims) -> Result<Json<UserView>> {
    let user_id = ObjectId::parse(&claims.sub)?;
    let user = state.storage.get_user(&user_id).await?;

    Ok(Json(user_view(&state, user).await?))
}

pub async fn list_users(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<UserView>>> {
    if !claims.roles.iter().any(|r| r == "admin") {
        return Err(AppError::Forbidden("admin role required".to_string()));
    }

    let mut views = Vec::new();
    for user in state.storage.list_users().await? {
        views.push(user_view(&state, user).await?);
    }
    Ok(Json(views))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserView>> {
    let id = ObjectId::parse(&id)?;
    let user = state.storage.get_user(&id).await?;

    Ok(Json(user_view(&state, user).await?))
}

pub async fn update_user(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<StatusCode> {
    let id = ObjectId::parse(&id)?;
    require_self_or_admin(&claims, &id)?;

    state
        .storage
        .update_user(&id, req.display_name.as_deref(), req.email.as_deref())
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Deletes the account. Owned profiles are left in place; only the ownership
/// rows go away (see DESIGN.md).
pub async fn delete_user(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id = ObjectId::parse(&id)?;
    require_self_or_admin(&claims, &id)?;

    state.storage.delete_user(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn forgot_password(
    State(state): State<AppState>,
    Host(host): Host,
    headers: HeaderMap,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<Json<serde_json::Value>> {
    if let Some(user) = state.storage.get_user_by_email(&req.email).await? {
        let token = state.tokens.issue_email_token(&user.id, "reset_password")?;
        let link = format!(
            "{}/reset-password?token={}",
            base_url(&host, &headers),
            token
        );
        state
            .mailer
            .send(&user.email, "Reset your password", &email::password_reset_body(&link))
            .await?;
    }

    // Same answer whether or not the address exists.
    Ok(Json(json!({
        "message": "if the address exists, reset instructions were sent"
    })))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<serde_json::Value>> {
    if req.new_password.len() < 6 {
        return Err(AppError::Validation(
            "password must be at least 6 characters".to_string(),
        ));
    }

    let user_id = state
        .tokens
        .validate_email_token(&req.token, "reset_password")?;
    state.storage.set_password(&user_id, &req.new_password).await?;

    Ok(Json(json!({ "message": "password updated" })))
}

fn require_self_or_admin(claims: &Claims, target: &ObjectId) -> Result<()> {
    if claims.sub == target.as_str() || claims.roles.iter().any(|r| r == "admin") {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "user {} cannot modify user {}",
            claims.sub, target
        )))
    }
}

async fn user_view(state: &AppState, user: User) -> Result<UserView> {
    let roles = state.storage.roles_for(&user.id).await?;
    let profile_ids = state.storage.owned_profile_ids(&user.id).await?;

    Ok(UserView {
        id: user.id,
        username: user.username,
        email: user.email,
        display_name: user.display_name,
        email_confirmed: user.email_confirmed,
        created_at: user.created_at,
        roles,
        profile_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_service(expire_minutes: i64) -> TokenService {
        TokenService::new(&JwtConfig {
            secret: "test-secret-test-secret-test-secret".to_string(),
            issuer: "memoria-tests".to_string(),
            audience: "memoria-clients".to_string(),
            expire_minutes,
            email_token_expire_minutes: expire_minutes,
        })
        .unwrap()
    }

    fn test_user() -> User {
        User {
            id: ObjectId::generate(),
            username: "ada".to_string(),
            email: "ada@example.com".to_string(),
            display_name: "Ada".to_string(),
            password_hash: String::new(),
            email_confirmed: true,
            created_at: 0,
        }
    }

    #[test]
    fn issued_token_validates_with_subject_email_and_roles() {
        let service = test_service(30);
        let user = test_user();
        let roles = vec!["comun".to_string(), "admin".to_string()];

        let token = service.issue(&user, &roles).unwrap();
        let claims = service.validate(&token).unwrap();

        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.email, user.email);
        assert_eq!(claims.roles, roles);
        assert!(claims.exp > chrono::Utc::now().timestamp());
    }

    #[test]
    fn expired_token_fails_as_expired() {
        let service = test_service(-5);
        let token = service.issue(&test_user(), &[]).unwrap();

        assert_eq!(service.validate(&token).unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn wrong_key_fails_as_invalid_signature() {
        let service = test_service(30);
        let other = TokenService::new(&JwtConfig {
            secret: "a-completely-different-secret-key".to_string(),
            issuer: "memoria-tests".to_string(),
            audience: "memoria-clients".to_string(),
            expire_minutes: 30,
            email_token_expire_minutes: 30,
        })
        .unwrap();

        let token = other.issue(&test_user(), &[]).unwrap();
        assert_eq!(
            service.validate(&token).unwrap_err(),
            TokenError::InvalidSignature
        );
    }

    #[test]
    fn garbage_token_fails_as_malformed() {
        let service = test_service(30);
        assert_eq!(
            service.validate("not.a.token").unwrap_err(),
            TokenError::Malformed
        );
    }

    #[test]
    fn refresh_extends_expiry_for_same_subject() {
        let service = test_service(30);
        let token = service.issue(&test_user(), &["comun".to_string()]).unwrap();
        let claims = service.validate(&token).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(1100));
        let refreshed = service.refresh(&claims).unwrap();
        let fresh = service.validate(&refreshed).unwrap();

        assert_eq!(fresh.sub, claims.sub);
        assert_eq!(fresh.roles, claims.roles);
        assert!(fresh.exp > claims.exp);
    }

    #[test]
    fn email_token_is_purpose_scoped() {
        let service = test_service(30);
        let user_id = ObjectId::generate();
        let token = service.issue_email_token(&user_id, "verify_email").unwrap();

        assert_eq!(
            service.validate_email_token(&token, "verify_email").unwrap(),
            user_id
        );
        assert!(service.validate_email_token(&token, "reset_password").is_err());
        // An email token is not an identity token.
        assert!(service.validate(&token).is_err());
    }

    #[test]
    fn can_act_truth_table() {
        let make_claims = |admin: bool| Claims {
            sub: "0123456789abcdef01234567".to_string(),
            email: "x@example.com".to_string(),
            roles: if admin {
                vec!["admin".to_string()]
            } else {
                vec!["comun".to_string()]
            },
            iss: "i".to_string(),
            aud: "a".to_string(),
            exp: 0,
        };

        assert!(can_act(&make_claims(true), true));
        assert!(can_act(&make_claims(true), false));
        assert!(can_act(&make_claims(false), true));
        assert!(!can_act(&make_claims(false), false));
    }
}
