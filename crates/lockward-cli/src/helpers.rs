//! Shared helper functions used across CLI subcommands.
//!
//! Includes tracing initialization, configuration loading and wiring the
//! lock service onto the on-disk stores.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use lockward_kernel::IpcBus;
use lockward_store::{Backends, SessionTeardown};
use lockward_vault::{AccountId, LockwardConfig, SymmetricKey, VaultTimeoutService};
use rand::Rng;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Everything a subcommand needs.
pub struct App {
    pub config: LockwardConfig,
    pub backends: Backends,
    pub service: VaultTimeoutService,
}

/// Load configuration, open the stores and build the lock service.
///
/// Accounts stored in the database are registered with the service, and
/// the stored active account is restored.
pub async fn open_app(config_path: &Path) -> Result<App> {
    let config = LockwardConfig::load(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let backends = Backends::open(&config.store)
        .await
        .with_context(|| format!("failed to open {}", config.store.database.display()))?;

    let service = backends
        .service_builder()
        .bus(IpcBus::new(config.bus.capacity))
        .settings(config.timeout.clone())
        .build()
        .context("failed to build vault timeout service")?;
    service.register_hook(Arc::new(SessionTeardown::new(&backends)));

    restore_accounts(&backends, &service).await?;

    Ok(App {
        config,
        backends,
        service,
    })
}

async fn restore_accounts(backends: &Backends, service: &VaultTimeoutService) -> Result<()> {
    let rows = backends
        .state
        .list_accounts()
        .await
        .context("failed to list accounts")?;
    for row in &rows {
        service
            .registry()
            .register(row.account_id.as_str(), row.label.as_deref());
    }

    if let Some(active) = backends
        .state
        .active_account()
        .await
        .context("failed to read active account")?
    {
        match service.registry().set_active(&active) {
            Ok(_) => debug!(account_id = %active, "active account restored"),
            Err(err) => warn!(
                account_id = %active,
                error = %err,
                "stored active account is not registered"
            ),
        }
    }

    debug!(accounts = rows.len(), "accounts restored");
    Ok(())
}

/// Put the keys of each named account into this process's memory.
///
/// Keys with a persisted copy are restored from the database.  When no
/// user key can be restored a fresh session key stands in for it; the lock
/// core only needs to know that key material is held.
pub async fn unlock_accounts(app: &App, ids: &[String]) -> Result<Vec<AccountId>> {
    let mut unlocked = Vec::with_capacity(ids.len());
    for id in ids {
        let account = known_account(&app.service, id)?;
        if !app.service.is_authenticated(&account).await? {
            anyhow::bail!("account '{id}' is signed out; add it again to sign in");
        }

        let keys = &app.backends.keys;
        let presence = keys
            .restore(&account)
            .await
            .with_context(|| format!("failed to restore keys for {id}"))?;
        if !presence.user_key {
            keys.install_user_key(&account, session_key());
        }
        info!(account_id = %account, restored = presence.user_key, "account unlocked");
        unlocked.push(account);
    }
    Ok(unlocked)
}

fn session_key() -> SymmetricKey {
    let mut bytes = vec![0u8; 64];
    rand::rng().fill(&mut bytes[..]);
    SymmetricKey::new(bytes)
}

/// Fail unless `id` names a stored account.
pub fn known_account(service: &VaultTimeoutService, id: &str) -> Result<AccountId> {
    let account = AccountId::from(id);
    if !service.registry().contains(&account) {
        anyhow::bail!("unknown account '{id}' (add it with `lockward account add {id}`)");
    }
    Ok(account)
}

/// Render an effective timeout for humans.
pub fn describe_timeout(minutes: Option<i64>) -> String {
    match minutes {
        None => "never".to_owned(),
        Some(m) if m < 0 => "never".to_owned(),
        Some(1) => "1 minute".to_owned(),
        Some(m) => format!("{m} minutes"),
    }
}

/// Render an idle duration for humans.
pub fn describe_idle(idle: Option<chrono::Duration>) -> String {
    match idle {
        None => "-".to_owned(),
        Some(d) if d.num_minutes() > 0 => format!("{}m", d.num_minutes()),
        Some(d) => format!("{}s", d.num_seconds().max(0)),
    }
}
