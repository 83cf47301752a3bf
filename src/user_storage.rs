use crate::models::OwnerRef;
use crate::persistence::{load_or_default, save_to_disk};
use crate::user_models::{Session, User};
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

const USERS_FILE: &str = "users.json";
const SESSIONS_FILE: &str = "sessions.json";

pub struct UserStorage {
    users_path: PathBuf,
    sessions_path: PathBuf,
    users: RwLock<Vec<User>>,
    sessions: RwLock<Vec<Session>>,
    session_ttl: Duration,
}

impl UserStorage {
    pub fn open(data_dir: &Path, session_ttl: Duration) -> Result<Self> {
        let users_path = data_dir.join(USERS_FILE);
        let sessions_path = data_dir.join(SESSIONS_FILE);

        let users = load_or_default(&users_path).context("Failed to load users")?;
        let sessions = load_or_default(&sessions_path).context("Failed to load sessions")?;

        Ok(Self {
            users_path,
            sessions_path,
            users: RwLock::new(users),
            sessions: RwLock::new(sessions),
            session_ttl,
        })
    }

    /// Returns `None` when the username is already taken.
    pub async fn create_user(&self, user: User) -> Result<Option<User>> {
        let mut users = self.users.write().await;

        if users
            .iter()
            .any(|u| u.username.eq_ignore_ascii_case(&user.username))
        {
            return Ok(None);
        }

        users.push(user.clone());
        save_to_disk(&self.users_path, users.as_slice()).context("Failed to save users")?;
        Ok(Some(user))
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users
            .iter()
            .find(|u| u.username.eq_ignore_ascii_case(username))
            .cloned())
    }

    pub async fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    pub async fn owner_ref(&self, id: &str) -> OwnerRef {
        let users = self.users.read().await;
        OwnerRef {
            id: id.to_string(),
            username: users
                .iter()
                .find(|u| u.id == id)
                .map(|u| u.username.clone()),
        }
    }

    /// Issues a new token and drops every session that has already expired.
    pub async fn create_session(&self, user_id: &str) -> Result<Session> {
        let session = Session::new(user_id.to_string(), self.session_ttl);
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        sessions.retain(|s| !s.is_expired(now));
        sessions.push(session.clone());
        save_to_disk(&self.sessions_path, sessions.as_slice()).context("Failed to save sessions")?;
        Ok(session)
    }

    /// Resolves a bearer token to the user it was issued to.
    pub async fn user_for_token(&self, token: &str) -> Result<Option<User>> {
        let user_id = {
            let sessions = self.sessions.read().await;
            match sessions.iter().find(|s| s.token == token) {
                Some(session) if !session.is_expired(Utc::now()) => session.user_id.clone(),
                _ => return Ok(None),
            }
        };
        self.get_user_by_id(&user_id).await
    }

    pub async fn end_session(&self, token: &str) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|s| s.token != token);

        if sessions.len() == before {
            return Ok(false);
        }

        save_to_disk(&self.sessions_path, sessions.as_slice()).context("Failed to save sessions")?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user_models::Role;
    use tempfile::tempdir;

    #[tokio::test]
    async fn rejects_duplicate_usernames_case_insensitively() {
        let dir = tempdir().unwrap();
        let storage = UserStorage::open(dir.path(), Duration::hours(1)).unwrap();

        let first = User::new("alice".to_string(), "hash".to_string(), Role::User);
        assert!(storage.create_user(first).await.unwrap().is_some());

        let second = User::new("Alice".to_string(), "hash".to_string(), Role::User);
        assert!(storage.create_user(second).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sessions_survive_reopen_and_can_be_ended() {
        let dir = tempdir().unwrap();
        let user = User::new("bob".to_string(), "hash".to_string(), Role::Admin);
        let token = {
            let storage = UserStorage::open(dir.path(), Duration::hours(1)).unwrap();
            storage.create_user(user.clone()).await.unwrap();
            storage.create_session(&user.id).await.unwrap().token
        };

        let storage = UserStorage::open(dir.path(), Duration::hours(1)).unwrap();
        let resolved = storage.user_for_token(&token).await.unwrap().unwrap();
        assert_eq!(resolved.id, user.id);
        assert_eq!(resolved.role, Role::Admin);

        assert!(storage.end_session(&token).await.unwrap());
        assert!(storage.user_for_token(&token).await.unwrap().is_none());
        assert!(!storage.end_session(&token).await.unwrap());
    }

    #[tokio::test]
    async fn expired_tokens_do_not_resolve_and_are_pruned() {
        let dir = tempdir().unwrap();
        let storage = UserStorage::open(dir.path(), Duration::zero()).unwrap();
        let user = User::new("carol".to_string(), "hash".to_string(), Role::User);
        storage.create_user(user.clone()).await.unwrap();

        let stale = storage.create_session(&user.id).await.unwrap();
        assert!(storage.user_for_token(&stale.token).await.unwrap().is_none());

        storage.create_session(&user.id).await.unwrap();
        let sessions = storage.sessions.read().await;
        assert_eq!(sessions.len(), 1);
        assert!(sessions.iter().all(|s| s.token != stale.token));
    }
}
