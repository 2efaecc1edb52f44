use std::sync::Arc;

use tracing::info;

use portal_core::model::{Role, User, UserDraft, UserId, normalize_email};

use crate::Clock;
use crate::error::AuthError;
use crate::store::{Namespace, PortalStore};

/// Sign-up, log-in and the current session.
#[derive(Clone)]
pub struct AuthService {
    clock: Clock,
    store: Arc<PortalStore>,
}

impl AuthService {
    #[must_use]
    pub fn new(clock: Clock, store: Arc<PortalStore>) -> Self {
        Self { clock, store }
    }

    /// Register a new account and log it in.
    ///
    /// The first account becomes an administrator when no administrator
    /// exists yet.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::DuplicateEmail` when the email is taken, or
    /// `AuthError::User` for invalid input.
    pub async fn sign_up(&self, draft: UserDraft) -> Result<User, AuthError> {
        let email = normalize_email(&draft.email)?;
        if self.store.read(|s| s.user_by_email(&email).is_some()).await {
            return Err(AuthError::DuplicateEmail);
        }
        // Placeholder id and role; both are fixed under the write lock below.
        let mut user = draft.validate(UserId::new(0), Role::Student, self.clock.now())?;

        let created = self
            .store
            .update(Namespace::Users, |s| {
                if s.user_by_email(&user.email).is_some() {
                    return Err(AuthError::DuplicateEmail);
                }
                user.id = UserId::next_after(s.users.iter().map(|u| &u.id));
                if !s.users.iter().any(User::is_admin) {
                    user.role = Role::Admin;
                }
                s.users.push(user.clone());
                Ok(user)
            })
            .await?;

        self.store.set_current_user(created.id).await;
        info!(user_id = %created.id, role = created.role.as_str(), "account created");
        Ok(created)
    }

    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` for an unknown email or a wrong
    /// password.
    pub async fn log_in(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = normalize_email(email).map_err(|_| AuthError::InvalidCredentials)?;
        let user = self
            .store
            .read(|s| s.user_by_email(&email).cloned())
            .await
            .ok_or(AuthError::InvalidCredentials)?;
        if !user.password_hash.verify(password)? {
            return Err(AuthError::InvalidCredentials);
        }
        self.store.set_current_user(user.id).await;
        info!(user_id = %user.id, "logged in");
        Ok(user)
    }

    pub async fn log_out(&self) {
        if let Some(user) = self.store.current_user().await {
            info!(user_id = %user.id, "logged out");
        }
        self.store.clear_session().await;
    }

    pub async fn current_user(&self) -> Option<User> {
        self.store.current_user().await
    }

    /// # Errors
    ///
    /// Returns `AuthError::NotLoggedIn` without a session.
    pub async fn require_user(&self) -> Result<User, AuthError> {
        self.store.current_user().await.ok_or(AuthError::NotLoggedIn)
    }

    /// # Errors
    ///
    /// Returns `AuthError::NotLoggedIn` or `AuthError::Forbidden`.
    pub async fn require_admin(&self) -> Result<User, AuthError> {
        let user = self.require_user().await?;
        if user.is_admin() {
            Ok(user)
        } else {
            Err(AuthError::Forbidden)
        }
    }

    /// # Errors
    ///
    /// Returns `AuthError::NotLoggedIn` or `AuthError::User` for a blank name.
    pub async fn update_profile(&self, name: &str) -> Result<User, AuthError> {
        let user = self.require_user().await?;
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(portal_core::model::UserError::EmptyName.into());
        }
        self.store
            .update_user(user.id, |u| u.name = name)
            .await
            .ok_or(AuthError::NotLoggedIn)
    }

    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` when `old` does not match, or
    /// `AuthError::User` for a weak new password.
    pub async fn change_password(&self, old: &str, new: &str) -> Result<(), AuthError> {
        let mut user = self.require_user().await?;
        if !user.password_hash.verify(old)? {
            return Err(AuthError::InvalidCredentials);
        }
        user.set_password(new)?;
        let hash = user.password_hash;
        self.store
            .update_user(user.id, |u| u.password_hash = hash)
            .await
            .ok_or(AuthError::NotLoggedIn)?;
        info!(user_id = %user.id, "password changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::time::fixed_clock;
    use storage::repository::InMemoryKeyValueStore;

    async fn service() -> AuthService {
        let store = PortalStore::load(Arc::new(InMemoryKeyValueStore::new())).await;
        AuthService::new(fixed_clock(), Arc::new(store))
    }

    fn draft(email: &str) -> UserDraft {
        UserDraft {
            name: "Learner".into(),
            email: email.into(),
            password: "secret123".into(),
        }
    }

    #[tokio::test]
    async fn first_account_becomes_admin() {
        let auth = service().await;
        let first = auth.sign_up(draft("first@example.com")).await.unwrap();
        let second = auth.sign_up(draft("second@example.com")).await.unwrap();
        assert_eq!(first.role, Role::Admin);
        assert_eq!(second.role, Role::Student);
        assert_eq!(second.id, UserId::new(2));
        assert_eq!(auth.current_user().await.unwrap().id, second.id);
    }

    #[tokio::test]
    async fn duplicate_email_leaves_users_untouched() {
        let auth = service().await;
        auth.sign_up(draft("a@example.com")).await.unwrap();
        let err = auth.sign_up(draft(" A@Example.com ")).await.unwrap_err();
        assert!(matches!(err, AuthError::DuplicateEmail));
        assert_eq!(auth.store.users().await.len(), 1);
    }

    #[tokio::test]
    async fn log_in_checks_password() {
        let auth = service().await;
        auth.sign_up(draft("a@example.com")).await.unwrap();
        auth.log_out().await;
        assert!(auth.current_user().await.is_none());

        let err = auth.log_in("a@example.com", "wrong-pass").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        let user = auth.log_in("A@EXAMPLE.COM", "secret123").await.unwrap();
        assert_eq!(auth.require_user().await.unwrap().id, user.id);
    }

    #[tokio::test]
    async fn change_password_requires_old_one() {
        let auth = service().await;
        auth.sign_up(draft("a@example.com")).await.unwrap();
        assert!(matches!(
            auth.change_password("nope", "another1").await,
            Err(AuthError::InvalidCredentials)
        ));
        auth.change_password("secret123", "another1").await.unwrap();
        auth.log_out().await;
        auth.log_in("a@example.com", "another1").await.unwrap();
    }

    #[tokio::test]
    async fn students_are_not_admins() {
        let auth = service().await;
        auth.sign_up(draft("admin@example.com")).await.unwrap();
        auth.sign_up(draft("student@example.com")).await.unwrap();
        assert!(matches!(
            auth.require_admin().await,
            Err(AuthError::Forbidden)
        ));
        auth.log_out().await;
        assert!(matches!(
            auth.require_admin().await,
            Err(AuthError::NotLoggedIn)
        ));
    }
}
