//! CLI argument definitions for Lockward.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use lockward_vault::TimeoutAction;

/// Lockward -- vault lock and timeout daemon.
#[derive(Parser)]
#[command(
    name = "lockward",
    version,
    about = "Lockward -- vault lock and timeout daemon",
    long_about = "Tracks per-account activity, locks or logs out vault accounts once their \
                  inactivity timeout elapses, and enforces organization timeout ceilings."
)]
pub struct Cli {
    /// Path to the configuration file (TOML, or JSON by extension).
    #[arg(long, short, global = true, default_value = "config/default.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the timeout scheduler until interrupted.
    Run {
        /// Unlock an account in this process before the scheduler starts
        /// (repeatable).
        #[arg(long, value_name = "ACCOUNT")]
        unlock: Vec<String>,
    },

    /// Run a single timeout check and print what happened.
    Check {
        /// Unlock an account in this process before the check (repeatable).
        #[arg(long, value_name = "ACCOUNT")]
        unlock: Vec<String>,
    },

    /// Show lock state for every account.
    Status {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Manage accounts.
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },

    /// Record activity for an account now.
    Touch {
        /// Account id.
        account: String,
    },

    /// Change an account's timeout preference.
    SetTimeout {
        /// Account id.
        account: String,
        /// Minutes of inactivity before the action runs.
        #[arg(long, short, conflicts_with = "never", allow_negative_numbers = true)]
        minutes: Option<i64>,
        /// Never time out.
        #[arg(long)]
        never: bool,
        /// What happens when the timeout elapses.
        #[arg(long, short, value_enum, default_value_t = ActionArg::Lock)]
        action: ActionArg,
    },

    /// Lock an account now (the active account when none is given).
    Lock {
        /// Account id.
        account: Option<String>,
    },

    /// Log an account out now.
    Logout {
        /// Account id.
        account: String,
    },

    /// Manage organization timeout policies.
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },
}

/// Actions for managing accounts.
#[derive(Subcommand)]
pub enum AccountAction {
    /// Register a signed-in account.
    Add {
        /// Account id.
        account: String,
        /// Human-readable label.
        #[arg(long, short)]
        label: Option<String>,
    },
    /// Forget an account and everything stored for it.
    Remove {
        /// Account id.
        account: String,
    },
    /// Make an account the active one.
    Activate {
        /// Account id.
        account: String,
    },
}

/// Actions for managing organization policies.
#[derive(Subcommand)]
pub enum PolicyAction {
    /// Set the maximum vault timeout for an account's organization.
    Set {
        /// Account id.
        account: String,
        /// Longest timeout members may configure, in minutes.
        #[arg(long)]
        max_minutes: i64,
    },
    /// Remove the maximum vault timeout policy.
    Clear {
        /// Account id.
        account: String,
    },
}

/// Command-line spelling of [`TimeoutAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ActionArg {
    Lock,
    LogOut,
}

impl From<ActionArg> for TimeoutAction {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Lock => TimeoutAction::Lock,
            ActionArg::LogOut => TimeoutAction::LogOut,
        }
    }
}
