//! App, user, and session state operations.

use strata_core::{Context, Key, Result, StateMap, UserKey};

use super::SessionService;

impl SessionService {
    /// Upsert app-scoped keys. An `app:` prefix on a key is stripped.
    pub async fn update_app_state(&self, ctx: &Context, app_name: &str, state: &StateMap) -> Result<()> {
        self.ensure_open()?;
        self.store.update_app_state(ctx, app_name, state)
    }

    /// Active app-scoped state.
    pub async fn list_app_states(&self, ctx: &Context, app_name: &str) -> Result<StateMap> {
        self.ensure_open()?;
        self.store.list_app_states(ctx, app_name)
    }

    /// Delete one app-scoped key.
    pub async fn delete_app_state(&self, ctx: &Context, app_name: &str, key: &str) -> Result<()> {
        self.ensure_open()?;
        self.store.delete_app_state(ctx, app_name, key)
    }

    /// Upsert user-scoped keys. A `user:` prefix on a key is stripped.
    pub async fn update_user_state(&self, ctx: &Context, user: &UserKey, state: &StateMap) -> Result<()> {
        self.ensure_open()?;
        self.store.update_user_state(ctx, user, state)
    }

    /// Active user-scoped state.
    pub async fn list_user_states(&self, ctx: &Context, user: &UserKey) -> Result<StateMap> {
        self.ensure_open()?;
        self.store.list_user_states(ctx, user)
    }

    /// Delete one user-scoped key.
    pub async fn delete_user_state(&self, ctx: &Context, user: &UserKey, key: &str) -> Result<()> {
        self.ensure_open()?;
        self.store.delete_user_state(ctx, user, key)
    }

    /// Merge keys into the stored session state. Scoped keys are rejected.
    pub async fn update_session_state(&self, ctx: &Context, key: &Key, state: &StateMap) -> Result<()> {
        self.ensure_open()?;
        self.store.update_session_state(ctx, key, state)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use crate::{ServiceOptions, SessionService};
    use strata_core::{Context, ErrorKind, Key, Options, StateMap, UserKey};

    #[tokio::test]
    async fn scoped_state_is_visible_on_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ServiceOptions::default().with_path(dir.path().join("state.db").to_string_lossy());
        let svc = SessionService::new(opts).await.unwrap();
        let ctx = Context::background();
        let user = UserKey::new("a", "u");

        svc.update_app_state(&ctx, "a", &StateMap::from([("app:theme".to_string(), b"dark".to_vec())]))
            .await
            .unwrap();
        svc.update_user_state(&ctx, &user, &StateMap::from([("lang".to_string(), b"fr".to_vec())]))
            .await
            .unwrap();

        let session = svc
            .create_session(&ctx, &Key::new("a", "u", "s"), &StateMap::new())
            .await
            .unwrap();
        assert_eq!(session.get_state("app:theme"), Some(b"dark".to_vec()));
        assert_eq!(session.get_state("user:lang"), Some(b"fr".to_vec()));

        svc.delete_user_state(&ctx, &user, "user:lang").await.unwrap();
        let reloaded = svc
            .get_session(&ctx, session.key(), &Options::default())
            .await
            .unwrap()
            .unwrap();
        assert!(reloaded.get_state("user:lang").is_none());
        assert_eq!(svc.list_app_states(&ctx, "a").await.unwrap().len(), 1);
        assert!(svc.list_user_states(&ctx, &user).await.unwrap().is_empty());

        svc.delete_app_state(&ctx, "a", "theme").await.unwrap();
        assert!(svc.list_app_states(&ctx, "a").await.unwrap().is_empty());
        svc.close().await;
    }

    #[tokio::test]
    async fn session_state_updates_need_an_existing_session() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ServiceOptions::default().with_path(dir.path().join("state.db").to_string_lossy());
        let svc = SessionService::new(opts).await.unwrap();
        let ctx = Context::background();
        let state = StateMap::from([("k".to_string(), b"v".to_vec())]);
        let err = svc
            .update_session_state(&ctx, &Key::new("a", "u", "missing"), &state)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        svc.close().await;
    }
}
