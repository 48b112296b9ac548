//! Session provider backed by the Supabase auth client

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{AuthResult, AuthSession, SessionPersistence, SupabaseAuthClient};
use crate::remote::{SessionProvider, TokenSource};

/// Supplies identity, connectivity and a valid bearer token to the engine.
///
/// The host flips the online flag; an expired session is refreshed once
/// when the gate asks whether it is still valid.
pub struct AuthSessionProvider<S: SessionPersistence> {
    client: SupabaseAuthClient<S>,
    session: RwLock<Option<AuthSession>>,
    online: AtomicBool,
}

impl<S: SessionPersistence> AuthSessionProvider<S> {
    pub fn new(client: SupabaseAuthClient<S>, session: Option<AuthSession>) -> Self {
        Self {
            client,
            session: RwLock::new(session),
            online: AtomicBool::new(true),
        }
    }

    /// Build a provider from whatever session the persistence layer holds
    pub async fn restore(client: SupabaseAuthClient<S>) -> AuthResult<Self> {
        let session = client.restore_session().await?;
        Ok(Self::new(client, session))
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn session(&self) -> Option<AuthSession> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_session(&self, session: Option<AuthSession>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        let session = self.client.sign_in(email, password).await?;
        self.replace_session(Some(session.clone()));
        Ok(session)
    }

    pub async fn sign_out(&self) -> AuthResult<()> {
        if let Some(session) = self.session() {
            self.client.sign_out(&session.access_token).await?;
        } else {
            self.client.store().clear_session()?;
        }
        self.replace_session(None);
        Ok(())
    }
}

#[async_trait]
impl<S: SessionPersistence> SessionProvider for AuthSessionProvider<S> {
    fn current_identity(&self) -> Option<String> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|session| session.owner_id().to_string())
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    async fn session_valid(&self) -> bool {
        let Some(session) = self.session() else {
            return false;
        };
        if !session.is_expired() {
            return true;
        }

        match self.client.refresh_session(&session.refresh_token).await {
            Ok(refreshed) => {
                self.replace_session(Some(refreshed));
                true
            }
            Err(error) => {
                tracing::warn!(%error, "Session refresh failed");
                false
            }
        }
    }
}

#[async_trait]
impl<S: SessionPersistence> TokenSource for AuthSessionProvider<S> {
    async fn access_token(&self) -> Option<String> {
        self.session().map(|session| session.access_token)
    }
}
