//! Temporary role elevation so writes can be attributed to their real author.
//!
//! The destination only accepts an impersonated write when the impersonated
//! account may write to the container. Before such a write the account is
//! granted (or raised to) the elevation role; afterwards its prior state is
//! restored exactly.
//!
//! ```text
//! Idle -> Granting -> Granted -> Revoking -> Idle
//! ```
//!
//! A still-granted [`Elevation`] revokes itself on drop, so a panicking write
//! does not leave a stale grant behind.

use tracing::{debug, info, warn};

use crate::config::MigrationConfig;
use crate::error::Result;
use crate::lock::{ElevationLocks, PairLock};
use crate::store::{AccessLevel, DestinationAccount, DestinationStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElevationState {
    Idle,
    Granting,
    Granted,
    Revoking,
}

/// What the grant changed, and therefore what revoke must undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prior {
    /// The account was not a member; the membership was created.
    Absent,
    /// The account had a lower raw level that was raised.
    Lower(u32),
    /// The account already had enough access; nothing was touched.
    Sufficient,
}

/// An active grant for one (container, account) pair.
pub struct Elevation<'a, S: DestinationStore + ?Sized> {
    store: &'a S,
    container: u64,
    account_id: u64,
    prior: Prior,
    state: ElevationState,
    lock: Option<PairLock>,
}

impl<'a, S: DestinationStore + ?Sized> Elevation<'a, S> {
    /// Ensure `account_id` holds at least `role` on `container`.
    ///
    /// Holds the pair lock until revoke.
    pub fn grant(
        store: &'a S,
        locks: &ElevationLocks,
        container: u64,
        account_id: u64,
        role: AccessLevel,
    ) -> Result<Self> {
        debug!(
            container,
            account_id,
            state = ?ElevationState::Granting,
            "acquiring elevation lock"
        );

        let lock = locks.acquire(container, account_id)?;

        let prior = match store.get_membership(container, account_id)? {
            None => {
                store.grant_membership(container, account_id, role)?;
                info!(container, account_id, %role, "granted temporary membership");
                Prior::Absent
            }
            Some(membership) if !membership.satisfies(role) => {
                store.set_membership_role(container, account_id, role.as_level())?;
                info!(
                    container,
                    account_id,
                    from = membership.access_level,
                    to = %role,
                    "raised membership role"
                );
                Prior::Lower(membership.access_level)
            }
            Some(membership) => {
                debug!(
                    container,
                    account_id,
                    level = membership.access_level,
                    "membership already sufficient"
                );
                Prior::Sufficient
            }
        };

        Ok(Self {
            store,
            container,
            account_id,
            prior,
            state: ElevationState::Granted,
            lock: Some(lock),
        })
    }

    #[must_use]
    pub const fn state(&self) -> ElevationState {
        self.state
    }

    /// Restore the membership to what it was before [`Elevation::grant`].
    pub fn revoke(mut self) -> Result<()> {
        self.restore()
    }

    fn restore(&mut self) -> Result<()> {
        if self.state != ElevationState::Granted {
            return Ok(());
        }
        self.state = ElevationState::Revoking;

        let outcome = match self.prior {
            Prior::Absent => self
                .store
                .remove_membership(self.container, self.account_id)
                .map(|()| {
                    info!(
                        container = self.container,
                        account_id = self.account_id,
                        "removed temporary membership"
                    );
                }),
            Prior::Lower(level) => self
                .store
                .set_membership_role(self.container, self.account_id, level)
                .map(|()| {
                    info!(
                        container = self.container,
                        account_id = self.account_id,
                        level,
                        "restored membership role"
                    );
                }),
            Prior::Sufficient => Ok(()),
        };

        self.state = ElevationState::Idle;
        self.lock = None;
        outcome.map_err(Into::into)
    }
}

impl<S: DestinationStore + ?Sized> Drop for Elevation<'_, S> {
    fn drop(&mut self) {
        if self.state != ElevationState::Granted {
            return;
        }
        if let Err(err) = self.restore() {
            warn!(
                container = self.container,
                account_id = self.account_id,
                error = %err,
                "failed to revoke elevation during unwind; membership left elevated"
            );
        }
    }
}

/// Wraps attributed writes in grant/revoke according to configuration.
#[derive(Debug, Clone)]
pub struct Elevator {
    locks: ElevationLocks,
    role: AccessLevel,
    enabled: bool,
    service_user: Option<String>,
}

impl Elevator {
    #[must_use]
    pub fn new(config: &MigrationConfig, locks: ElevationLocks) -> Self {
        Self {
            locks,
            role: config.elevation_role,
            enabled: config.elevate_permissions,
            service_user: config.gitlab_service_user.clone(),
        }
    }

    /// `true` when writes as `account` go through grant/revoke.
    #[must_use]
    pub fn applies_to(&self, account: &DestinationAccount) -> bool {
        self.enabled && self.service_user.as_deref() != Some(account.username.as_str())
    }

    /// Run `write` while `account` holds the elevation role on `container`.
    ///
    /// The write's error takes precedence over a revoke error; a revoke error
    /// after a successful write is returned as the result.
    pub fn with_elevation<S, T, F>(
        &self,
        store: &S,
        container: u64,
        account: &DestinationAccount,
        write: F,
    ) -> Result<T>
    where
        S: DestinationStore + ?Sized,
        F: FnOnce() -> Result<T>,
    {
        if !self.applies_to(account) {
            return write();
        }

        let elevation = Elevation::grant(store, &self.locks, container, account.id, self.role)?;
        let written = write();
        let revoked = elevation.revoke();

        match (written, revoked) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(revoke_err)) => Err(revoke_err),
            (Err(write_err), Ok(())) => Err(write_err),
            (Err(write_err), Err(revoke_err)) => {
                warn!(
                    container,
                    account = %account.username,
                    error = %revoke_err,
                    "revoke failed after a failed write"
                );
                Err(write_err)
            }
        }
    }
}
