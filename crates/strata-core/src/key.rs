//! Session and user keys.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key validation failures.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// App name empty.
    #[error("app name is required")]
    MissingAppName,
    /// User id empty.
    #[error("user id is required")]
    MissingUserId,
    /// Session id empty.
    #[error("session id is required")]
    MissingSessionId,
}

/// Identifies one session: `(app, user, session)`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    /// Application name.
    pub app_name: String,
    /// User identifier.
    pub user_id: String,
    /// Session identifier. May be empty before creation.
    pub session_id: String,
}

impl Key {
    /// Build a key from its parts.
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }

    /// Validate app and user only (session id may still be generated).
    pub fn check_user_key(&self) -> Result<(), KeyError> {
        check_app_user(&self.app_name, &self.user_id)
    }

    /// Validate all three components.
    pub fn check_session_key(&self) -> Result<(), KeyError> {
        self.check_user_key()?;
        if self.session_id.is_empty() {
            return Err(KeyError::MissingSessionId);
        }
        Ok(())
    }

    /// The owning user key.
    pub fn user_key(&self) -> UserKey {
        UserKey::new(self.app_name.clone(), self.user_id.clone())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.app_name, self.user_id, self.session_id)
    }
}

/// Identifies one user within an app.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserKey {
    /// Application name.
    pub app_name: String,
    /// User identifier.
    pub user_id: String,
}

impl UserKey {
    /// Build a user key from its parts.
    pub fn new(app_name: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
        }
    }

    /// Validate both components.
    pub fn check_user_key(&self) -> Result<(), KeyError> {
        check_app_user(&self.app_name, &self.user_id)
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.app_name, self.user_id)
    }
}

fn check_app_user(app_name: &str, user_id: &str) -> Result<(), KeyError> {
    if app_name.is_empty() {
        return Err(KeyError::MissingAppName);
    }
    if user_id.is_empty() {
        return Err(KeyError::MissingUserId);
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_key_valid() {
        assert!(Key::new("a", "u", "s").check_session_key().is_ok());
    }

    #[test]
    fn missing_components() {
        assert_eq!(
            Key::new("", "u", "s").check_session_key(),
            Err(KeyError::MissingAppName)
        );
        assert_eq!(
            Key::new("a", "", "s").check_session_key(),
            Err(KeyError::MissingUserId)
        );
        assert_eq!(
            Key::new("a", "u", "").check_session_key(),
            Err(KeyError::MissingSessionId)
        );
    }

    #[test]
    fn user_key_allows_empty_session() {
        assert!(Key::new("a", "u", "").check_user_key().is_ok());
    }

    #[test]
    fn user_key_validation() {
        assert_eq!(
            UserKey::new("", "u").check_user_key(),
            Err(KeyError::MissingAppName)
        );
        assert!(UserKey::new("a", "u").check_user_key().is_ok());
    }

    #[test]
    fn display() {
        assert_eq!(Key::new("a", "u", "s").to_string(), "a:u:s");
        assert_eq!(UserKey::new("a", "u").to_string(), "a:u");
    }
}
