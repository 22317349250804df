//! Subcommand handlers.
//!
//! Each handler receives an [`App`] that has already been wired onto the
//! configured database.

use anyhow::{Context, Result};
use chrono::Utc;
use lockward_vault::{
    AccountId, AccountOutcome, LockOutcome, OrgTimeoutPolicy, PolicyKind, TickReport,
    TimeoutAction,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::cli::{AccountAction, ActionArg, PolicyAction};
use crate::helpers::{App, describe_idle, describe_timeout, known_account, unlock_accounts};

// ---------------------------------------------------------------------------
// Subcommand: run
// ---------------------------------------------------------------------------

pub async fn cmd_run(app: App, unlock: Vec<String>) -> Result<()> {
    let unlocked = unlock_accounts(&app, &unlock).await?;
    let check_on_interval = app.config.timeout.check_on_interval;
    let interval = app.config.timeout.check_interval();

    let mut events = app.service.subscribe();
    let listener = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(
                    event = event.name(),
                    account_id = ?event.account_id().map(AccountId::as_str),
                    "vault event"
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let Some(handle) = app
        .service
        .init(check_on_interval)
        .context("failed to start timeout scheduler")?
    else {
        warn!("timeout.check_on_interval is false, nothing to run");
        listener.abort();
        return Ok(());
    };

    info!(
        accounts = app.service.registry().count(),
        unlocked = unlocked.len(),
        interval_secs = interval.as_secs(),
        "lockward running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    info!("shutting down");
    app.service.shutdown();
    if let Err(err) = handle.await {
        warn!(error = %err, "scheduler task ended abnormally");
    }
    listener.abort();

    let stats = app.service.scheduler_stats().await;
    info!(
        runs_completed = stats.runs_completed,
        runs_failed = stats.runs_failed,
        "scheduler stopped"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: check
// ---------------------------------------------------------------------------

/// Unlock the named accounts, then run one timeout check.
async fn check_once(app: &App, unlock: &[String]) -> Result<TickReport> {
    unlock_accounts(app, unlock).await?;
    Ok(app.service.check_vault_timeout().await)
}

pub async fn cmd_check(app: App, unlock: Vec<String>) -> Result<()> {
    let report = check_once(&app, &unlock).await?;

    println!();
    if report.suppressed {
        println!("  Check suppressed: a vault view is open.");
        println!();
        return Ok(());
    }
    if report.outcomes.is_empty() {
        println!("  No accounts.");
    }
    for (account, outcome) in &report.outcomes {
        let rendered = match outcome {
            AccountOutcome::Locked => "locked".to_owned(),
            AccountOutcome::LoggedOut => "logged out".to_owned(),
            AccountOutcome::Skipped(reason) => format!("skipped ({})", reason.as_str()),
            AccountOutcome::Failed(reason) => format!("FAILED: {reason}"),
        };
        println!("  {:<24} {rendered}", account.as_str());
    }
    println!();

    if !report.failed().is_empty() {
        anyhow::bail!("{} account(s) failed", report.failed().len());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: status
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct StatusLine {
    account_id: String,
    label: Option<String>,
    active: bool,
    authenticated: bool,
    locked: bool,
    timeout_minutes: Option<i64>,
    action: TimeoutAction,
    idle_secs: Option<i64>,
    pin: bool,
    biometric: bool,
    incomplete_teardown: bool,
}

pub async fn cmd_status(app: App, json: bool) -> Result<()> {
    let rows = app
        .backends
        .state
        .list_accounts()
        .await
        .context("failed to list accounts")?;
    let now = Utc::now();

    let mut lines = Vec::with_capacity(rows.len());
    for row in rows {
        let account = AccountId::from(row.account_id.as_str());
        let service = &app.service;
        lines.push(StatusLine {
            active: service.registry().is_active(&account),
            authenticated: row.authenticated,
            locked: service.is_locked(&account).await?,
            timeout_minutes: service.get_vault_timeout(&account).await?,
            action: service.vault_timeout_action(&account).await?,
            idle_secs: row.last_active.map(|at| (now - at).num_seconds()),
            pin: service.is_pin_lock_set(&account).await?.is_set(),
            biometric: service.is_biometric_lock_set(&account).await?,
            incomplete_teardown: service.incomplete_teardown_since(&account).is_some(),
            label: row.label,
            account_id: row.account_id,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&lines)?);
        return Ok(());
    }

    println!();
    println!("  Lockward Status");
    println!("  ===============");
    println!();
    println!("  Database:         {}", app.config.store.database.display());
    println!(
        "  Check interval:   {}s",
        app.config.timeout.check_interval_secs
    );
    println!();
    if lines.is_empty() {
        println!("  No accounts. Add one with `lockward account add <id>`.");
        println!();
        return Ok(());
    }
    for line in &lines {
        let marker = if line.active { "*" } else { " " };
        let state = match (line.authenticated, line.locked) {
            (false, _) => "signed out",
            (true, true) => "locked",
            (true, false) => "unlocked",
        };
        println!(
            "  {marker} {:<20} {:<10} timeout: {:<12} action: {:<7} idle: {:<6} pin: {:<3} biometric: {}",
            line.account_id,
            state,
            describe_timeout(line.timeout_minutes),
            line.action.as_str(),
            describe_idle(line.idle_secs.map(chrono::Duration::seconds)),
            if line.pin { "yes" } else { "no" },
            if line.biometric { "yes" } else { "no" },
        );
        if line.incomplete_teardown {
            println!("      last lock did not finish; it will be retried");
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: account
// ---------------------------------------------------------------------------

pub async fn cmd_account(app: App, action: AccountAction) -> Result<()> {
    match action {
        AccountAction::Add { account, label } => {
            let id = AccountId::from(account.as_str());
            let state = &app.backends.state;
            state
                .ensure_account(&id, label.as_deref())
                .await
                .context("failed to store account")?;
            state.set_authenticated(&id, true).await?;
            app.service.registry().register(id.clone(), label.as_deref());
            app.service.touch(&id).await?;
            println!("  [+] Added account {id}");

            if app.service.registry().active().is_none() {
                activate(&app, &id).await?;
            }
        }
        AccountAction::Remove { account } => {
            let id = known_account(&app.service, &account)?;
            let b = &app.backends;
            b.keys.forget(&id).await?;
            b.tokens.clear(&id).await?;
            b.policies.clear(&id, PolicyKind::MaximumVaultTimeout).await?;
            b.state.remove_account(&id).await?;
            app.service.registry().unregister(&id);
            println!("  [-] Removed account {id}");
        }
        AccountAction::Activate { account } => {
            let id = known_account(&app.service, &account)?;
            activate(&app, &id).await?;
        }
    }
    Ok(())
}

async fn activate(app: &App, id: &AccountId) -> Result<()> {
    app.service.switch_active_account(id).await?;
    app.backends
        .state
        .set_active_account(Some(id))
        .await
        .context("failed to store active account")?;
    println!("  [*] {id} is now the active account");
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommands: touch, set-timeout, lock, logout
// ---------------------------------------------------------------------------

pub async fn cmd_touch(app: App, account: String) -> Result<()> {
    let id = known_account(&app.service, &account)?;
    let at = app.service.touch(&id).await?;
    println!("  Activity recorded for {id} at {}", at.to_rfc3339());
    Ok(())
}

pub async fn cmd_set_timeout(
    app: App,
    account: String,
    minutes: Option<i64>,
    never: bool,
    action: ActionArg,
) -> Result<()> {
    let id = known_account(&app.service, &account)?;
    if minutes.is_none() && !never {
        anyhow::bail!("give either --minutes <N> or --never");
    }
    let minutes = if never { None } else { minutes };

    app.service
        .set_timeout_options(&id, minutes, action.into())
        .await?;

    let effective = app.service.get_vault_timeout(&id).await?;
    println!(
        "  {id}: {} after {}",
        TimeoutAction::from(action),
        describe_timeout(effective)
    );
    if effective != minutes {
        println!("  (clamped by organization policy)");
    }
    Ok(())
}

pub async fn cmd_lock(app: App, account: Option<String>) -> Result<()> {
    let id = match account {
        Some(account) => known_account(&app.service, &account)?,
        None => app
            .service
            .registry()
            .active()
            .context("no active account; name one or run `lockward account activate <id>`")?,
    };

    // Keys with a persisted copy are openable by this device, so they are
    // restored first and then torn down with everything else.
    app.backends
        .keys
        .restore(&id)
        .await
        .with_context(|| format!("failed to restore keys for {id}"))?;

    let message = match app.service.lock(&id, false).await? {
        LockOutcome::Locked => "locked",
        LockOutcome::AlreadyLocked => "already locked",
        LockOutcome::NotAuthenticated => "not signed in, nothing to lock",
        LockOutcome::InProgress => "a lock is already in progress",
    };
    println!("  {id}: {message}");
    Ok(())
}

pub async fn cmd_logout(app: App, account: String) -> Result<()> {
    let id = known_account(&app.service, &account)?;
    app.service.log_out(&id).await?;
    println!("  {id}: logged out");
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: policy
// ---------------------------------------------------------------------------

pub async fn cmd_policy(app: App, action: PolicyAction) -> Result<()> {
    let kind = PolicyKind::MaximumVaultTimeout;
    match action {
        PolicyAction::Set {
            account,
            max_minutes,
        } => {
            let id = known_account(&app.service, &account)?;
            if max_minutes < 0 {
                anyhow::bail!("--max-minutes must not be negative");
            }
            app.backends
                .policies
                .set_policy(&id, kind, OrgTimeoutPolicy { max_minutes })
                .await
                .context("failed to store policy")?;
            // Resolving applies and persists the clamp right away.
            let effective = app.service.get_vault_timeout(&id).await?;
            println!(
                "  {id}: maximum timeout {max_minutes} minutes, effective {}",
                describe_timeout(effective)
            );
        }
        PolicyAction::Clear { account } => {
            let id = known_account(&app.service, &account)?;
            let removed = app.backends.policies.clear(&id, kind).await?;
            if removed {
                println!("  {id}: maximum timeout policy removed");
            } else {
                println!("  {id}: no policy was set");
            }
        }
    }
    Ok(())
}
