//! Access guard for vault destinations.
//!
//! Before a host opens anything that needs decrypted vault data it asks the
//! guard.  The guard answers with a [`GuardDecision`] and, for the blocking
//! outcomes, emits the matching bus event (`authBlocked` or `lockedUrl`) so
//! that whoever drives navigation can react.

use lockward_kernel::Event;
use serde::Serialize;

use crate::account::AccountId;
use crate::error::{LockError, Result};
use crate::service::VaultTimeoutService;

/// Outcome of a guard check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum GuardDecision {
    Allow,
    /// No authenticated session.
    AuthBlocked,
    /// The vault is locked and must be unlocked first.
    Locked { prompt_biometric: bool },
    /// The account must drop its master password for a key connector first.
    RemovePassword,
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Guard over one [`VaultTimeoutService`].
#[derive(Clone)]
pub struct AuthGuard {
    service: VaultTimeoutService,
}

impl AuthGuard {
    pub fn new(service: VaultTimeoutService) -> Self {
        Self { service }
    }

    /// Decide whether `account` (the active account when `None`) may open
    /// `url`.
    pub async fn check(
        &self,
        account: Option<&AccountId>,
        url: Option<&str>,
    ) -> Result<GuardDecision> {
        let account = match account {
            Some(id) => Some(id.clone()),
            None => self.service.registry().active(),
        };

        let Some(account) = account else {
            self.emit(Event::AuthBlocked { account_id: None });
            return Ok(GuardDecision::AuthBlocked);
        };

        if !self.service.is_authenticated(&account).await? {
            self.emit(Event::AuthBlocked {
                account_id: Some(account),
            });
            return Ok(GuardDecision::AuthBlocked);
        }

        if self.service.is_locked(&account).await? {
            if let Some(url) = url {
                self.emit(Event::LockedUrl {
                    account_id: Some(account.clone()),
                    url: url.to_owned(),
                });
            }
            let prompt_biometric = self.service.is_biometric_lock_set(&account).await?;
            return Ok(GuardDecision::Locked { prompt_biometric });
        }

        let convert = self
            .service
            .inner
            .state
            .convert_account_to_key_connector(&account)
            .await
            .map_err(|e| LockError::state(&account, "convert_account_to_key_connector", e))?;
        if convert {
            tracing::debug!(account_id = %account, "key connector migration required");
            return Ok(GuardDecision::RemovePassword);
        }

        Ok(GuardDecision::Allow)
    }

    fn emit(&self, event: Event) {
        tracing::trace!(event = event.name(), "guard event");
        if let Err(err) = self.service.bus().publish(event) {
            tracing::warn!(error = %err, "failed to publish guard event");
        }
    }
}
