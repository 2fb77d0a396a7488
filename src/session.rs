//! Session lifecycle management
//!
//! Every pipeline invocation acquires its own session against the
//! configured slot and releases it on every exit path. Sessions are
//! never pooled; under concurrent load the module's session table is
//! the limit.

use std::sync::Arc;

use crate::config::ModuleConfig;
use crate::error::WalletError;
use crate::pkcs11::{ModuleGateway, ModuleSession, SessionMode};

/// An open, possibly authenticated session. Consumed by
/// [`SessionManager::stop`], so release can only happen once.
pub struct ActiveSession<G: ModuleGateway> {
    session: G::Session,
    authenticated: bool,
}

impl<G: ModuleGateway> ActiveSession<G> {
    pub fn session(&self) -> &G::Session {
        &self.session
    }
}

pub struct SessionManager<G: ModuleGateway> {
    gateway: Arc<G>,
    config: ModuleConfig,
}

impl<G: ModuleGateway> SessionManager<G> {
    pub fn new(gateway: Arc<G>, config: ModuleConfig) -> Self {
        Self { gateway, config }
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// Open a session on the configured slot, logging in as a normal
    /// user when a PIN is configured.
    pub fn start(&self, mode: SessionMode) -> Result<ActiveSession<G>, WalletError> {
        let available = self.gateway.slot_count()?;
        if self.config.slot >= available {
            return Err(WalletError::Configuration(format!(
                "requested slot index {} is out of range of {} available slots",
                self.config.slot, available
            )));
        }

        let session = self.gateway.open_session(self.config.slot, mode)?;

        let mut authenticated = false;
        if let Some(pin) = &self.config.pin {
            if let Err(e) = session.login(pin) {
                // The session is already open; do not leak it.
                let _ = session.close();
                return Err(e);
            }
            authenticated = true;
        }

        Ok(ActiveSession {
            session,
            authenticated,
        })
    }

    /// Log out when the session was authenticated, then close
    /// unconditionally. A logout failure does not skip the close.
    pub fn stop(&self, active: ActiveSession<G>) -> Result<(), WalletError> {
        let logout = if active.authenticated {
            active.session.logout()
        } else {
            Ok(())
        };
        let close = active.session.close();
        logout.and(close)
    }
}
