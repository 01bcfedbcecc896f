use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::json;
use uuid::Uuid;

use ballotbox_core::PollEngine;
use ballotbox_db::Database;
use ballotbox_db::models::UserRow;
use ballotbox_types::api::{
    Claims, LoginRequest, LoginResponse, ProfileResponse, RegisterRequest, RegisterResponse,
    UpdateProfileRequest, UserSummary,
};
use ballotbox_types::models::Role;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub engine: PollEngine,
    pub jwt_secret: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate input
    if req.username.len() < 3 || req.username.len() > 20 {
        return Err(ApiError::bad_request("Username must be 3 to 20 characters"));
    }
    if req.username.contains(char::is_whitespace) {
        return Err(ApiError::bad_request("Username cannot contain spaces"));
    }
    if !req.email.contains('@') {
        return Err(ApiError::bad_request("Please provide a valid email address"));
    }
    if req.password.len() < 6 || req.password.len() > 50 {
        return Err(ApiError::bad_request("Password must be 6 to 50 characters"));
    }

    // Distinct messages so the UI can say which field to fix.
    if state.db.get_user_by_email(&req.email)?.is_some() {
        return Err(ApiError::bad_request("Email already in use"));
    }
    if state.db.get_user_by_username(&req.username)?.is_some() {
        return Err(ApiError::bad_request("Username already used"));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|_| ApiError::internal())?
        .to_string();

    let user_id = Uuid::new_v4();
    let role = req.role.unwrap_or(Role::User);

    state.db.create_user(
        &user_id.to_string(),
        &req.username,
        &req.email,
        &password_hash,
        role.as_str(),
        &Utc::now().to_rfc3339(),
    )?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id,
            username: req.username,
            email: req.email,
            role,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // One generic message for both unknown email and wrong password.
    let user = state
        .db
        .get_user_by_email(&req.email)?
        .ok_or_else(|| ApiError::unauthorized("Invalid email or password"))?;

    let parsed_hash = PasswordHash::new(&user.password).map_err(|_| ApiError::internal())?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::unauthorized("Invalid email or password"))?;

    let user_id: Uuid = user.id.parse().map_err(|_| ApiError::internal())?;
    let role = Role::parse(&user.role).unwrap_or(Role::User);

    let token = create_token(&state.jwt_secret, user_id, &user.email, role)
        .map_err(|_| ApiError::internal())?;

    Ok(Json(LoginResponse { access_token: token }))
}

pub async fn logout() -> impl IntoResponse {
    // Tokens are stateless; the client just drops its copy.
    Json(json!({ "message": "Logout successful" }))
}

pub async fn profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or_else(|| ApiError::not_found("Profile not found"))?;
    Ok(Json(profile_response(user)?))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // A password change needs both the current and the new password.
    let (Some(old_password), Some(password)) = (req.old_password, req.password) else {
        return Err(ApiError::bad_request(
            "Old password and new password are required",
        ));
    };

    let user = state
        .db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let parsed_hash = PasswordHash::new(&user.password).map_err(|_| ApiError::internal())?;
    Argon2::default()
        .verify_password(old_password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::bad_request("Current password is incorrect"))?;

    if password.len() < 6 || password.len() > 50 {
        return Err(ApiError::bad_request("Password must be 6 to 50 characters"));
    }

    let salt = SaltString::generate(&mut OsRng);
    let new_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| ApiError::internal())?
        .to_string();
    state.db.update_user_password(&user.id, &new_hash)?;

    let user = state
        .db
        .get_user_by_id(&user.id)?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(profile_response(user)?))
}

pub async fn delete_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.delete_user(&claims.sub.to_string())?;
    Ok(Json(json!({ "message": "Profile deleted" })))
}

/// GET /auth/voted-polls — the caller's voting history.
pub async fn voted_polls(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let polls = state.engine.voted_polls(claims.sub)?;
    Ok(Json(polls))
}

/// GET /auth/users — admin only; regular accounts, for composing allow-lists.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    if !claims.role.is_admin() {
        return Err(ApiError::forbidden("Admin access required"));
    }

    let users = state.db.list_users_by_role(Role::User.as_str())?;
    let summaries: Vec<UserSummary> = users
        .into_iter()
        .filter_map(|u| {
            Some(UserSummary {
                id: u.id.parse().ok()?,
                username: u.username,
                email: u.email,
            })
        })
        .collect();
    Ok(Json(summaries))
}

fn profile_response(user: UserRow) -> Result<ProfileResponse, ApiError> {
    Ok(ProfileResponse {
        id: user.id.parse().map_err(|_| ApiError::internal())?,
        username: user.username,
        email: user.email,
        role: Role::parse(&user.role).unwrap_or(Role::User),
        created_at: chrono::DateTime::parse_from_rfc3339(&user.created_at)
            .map_err(|_| ApiError::internal())?
            .with_timezone(&Utc),
    })
}

fn create_token(secret: &str, user_id: Uuid, email: &str, role: Role) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        role,
        exp: (Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation, decode};

    #[test]
    fn token_roundtrip_preserves_claims() {
        let id = Uuid::new_v4();
        let token = create_token("secret", id, "alice@example.com", Role::User).unwrap();
        let data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"secret"),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(data.claims.sub, id);
        assert_eq!(data.claims.email, "alice@example.com");
        assert_eq!(data.claims.role, Role::User);
    }

    #[test]
    fn token_rejects_wrong_secret() {
        let token = create_token("secret", Uuid::new_v4(), "a@example.com", Role::Admin).unwrap();
        let result = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"other-secret"),
            &Validation::default(),
        );
        assert!(result.is_err());
    }
}
