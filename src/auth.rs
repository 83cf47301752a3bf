//! Bearer-token sessions and the ownership rules that decide which documents a
//! caller may see.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    Json,
};

use crate::error::{ApiError, FieldError};
use crate::models::{Document, MessageResponse};
use crate::routes::AppState;
use crate::user_models::{CredentialsRequest, LoginResponse, Role, User, UserProfile, UserResponse};

const MIN_PASSWORD_LEN: usize = 6;

/// Which owners' records a caller is allowed to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    All,
    Owner(String),
}

impl Visibility {
    pub fn includes(&self, owner_id: &str) -> bool {
        match self {
            Visibility::All => true,
            Visibility::Owner(id) => id == owner_id,
        }
    }
}

/// Anything that belongs to a single user.
pub trait Owned {
    fn owner_id(&self) -> &str;
}

impl Owned for Document {
    fn owner_id(&self) -> &str {
        &self.owner
    }
}

/// The authenticated user behind a request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub id: String,
    pub username: String,
    pub role: Role,
    token: String,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn scope(&self) -> Visibility {
        if self.is_admin() {
            Visibility::All
        } else {
            Visibility::Owner(self.id.clone())
        }
    }

    pub fn can_access<R: Owned + ?Sized>(&self, resource: &R) -> bool {
        self.scope().includes(resource.owner_id())
    }

    pub fn authorize<R: Owned + ?Sized>(&self, resource: &R) -> Result<(), ApiError> {
        if self.can_access(resource) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "Not authorized to access this document".to_string(),
            ))
        }
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            username: self.username.clone(),
            role: self.role,
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::Unauthorized("Not authorized, no token".to_string()))?;

        let user = state
            .users
            .user_for_token(token)
            .await
            .map_err(|e| ApiError::storage("Failed to resolve session", e))?
            .ok_or_else(|| ApiError::Unauthorized("Not authorized, token invalid".to_string()))?;

        Ok(Caller {
            id: user.id,
            username: user.username,
            role: user.role,
            token: token.to_string(),
        })
    }
}

async fn hash_password(password: String, cost: u32) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .context("Password hashing task failed")?
        .context("Failed to hash password")
}

async fn verify_password(password: String, hash: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .context("Password verification task failed")?
        .context("Failed to verify password")
}

#[tracing::instrument(skip_all)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let username = payload.username.trim().to_string();

    let mut errors = Vec::new();
    if username.is_empty() {
        errors.push(FieldError::new("username", "Username cannot be empty"));
    } else if username.chars().any(char::is_whitespace) {
        errors.push(FieldError::new("username", "Username cannot contain spaces"));
    }
    if payload.password.len() < MIN_PASSWORD_LEN {
        errors.push(FieldError::new(
            "password",
            format!("Password must be at least {MIN_PASSWORD_LEN} characters long"),
        ));
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let role = if state.config.is_admin_username(&username) {
        Role::Admin
    } else {
        Role::User
    };

    let password_hash = hash_password(payload.password, state.config.password_hash_cost)
        .await
        .map_err(|e| ApiError::storage("Failed to register user", e))?;

    let user = state
        .users
        .create_user(User::new(username, password_hash, role))
        .await
        .map_err(|e| ApiError::storage("Failed to register user", e))?
        .ok_or_else(|| ApiError::Conflict("Username already exists".to_string()))?;

    tracing::info!(user_id = %user.id, username = %user.username, role = ?user.role, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            success: true,
            user: user.profile(),
        }),
    ))
}

#[tracing::instrument(skip_all)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let invalid = || ApiError::Unauthorized("Invalid username or password".to_string());

    let user = state
        .users
        .get_user_by_username(payload.username.trim())
        .await
        .map_err(|e| ApiError::storage("Failed to log in", e))?
        .ok_or_else(invalid)?;

    let valid = verify_password(payload.password, user.password_hash.clone())
        .await
        .map_err(|e| ApiError::storage("Failed to log in", e))?;
    if !valid {
        return Err(invalid());
    }

    let session = state
        .users
        .create_session(&user.id)
        .await
        .map_err(|e| ApiError::storage("Failed to log in", e))?;

    tracing::info!(user_id = %user.id, username = %user.username, "user logged in");

    Ok(Json(LoginResponse {
        success: true,
        token: session.token,
        user: user.profile(),
    }))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .users
        .end_session(&caller.token)
        .await
        .map_err(|e| ApiError::storage("Failed to log out", e))?;

    Ok(Json(MessageResponse::ok("Logged out successfully")))
}

pub async fn me(caller: Caller) -> Json<UserResponse> {
    Json(UserResponse {
        success: true,
        user: caller.profile(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(id: &str, role: Role) -> Caller {
        Caller {
            id: id.to_string(),
            username: id.to_string(),
            role,
            token: "t".to_string(),
        }
    }

    struct Note {
        owner: String,
    }

    impl Owned for Note {
        fn owner_id(&self) -> &str {
            &self.owner
        }
    }

    #[test]
    fn owners_see_only_their_own_records() {
        let note = Note {
            owner: "u1".to_string(),
        };
        assert!(caller("u1", Role::User).can_access(&note));
        assert!(!caller("u2", Role::User).can_access(&note));
        assert!(matches!(
            caller("u2", Role::User).authorize(&note),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn admins_see_everything() {
        let note = Note {
            owner: "u1".to_string(),
        };
        let admin = caller("root", Role::Admin);
        assert!(admin.is_admin());
        assert!(admin.can_access(&note));
        assert_eq!(admin.scope(), Visibility::All);
    }
}
