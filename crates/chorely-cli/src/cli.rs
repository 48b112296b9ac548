use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chorely")]
#[command(about = "Track household chores and rewards, offline first")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name for auth/sync configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,

    /// Sync against an in-process remote instead of the configured backend
    #[arg(long, global = true)]
    pub demo_remote: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage chores
    #[command(subcommand)]
    Task(TaskCommands),
    /// Manage rewards
    #[command(subcommand)]
    Reward(RewardCommands),
    /// Spend points on a reward
    Redeem {
        /// Reward ID or unique ID prefix
        reward: String,
        /// Profile that redeems the reward
        #[arg(long, value_name = "PROFILE_ID")]
        profile_id: Option<String>,
    },
    /// Manage household profiles
    #[command(subcommand)]
    Profile(ProfileCommands),
    /// Run one sync pass against the remote
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Show pending changes and sync state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List outbox entries waiting to be pushed
    Outbox {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage CLI profiles and backend config
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Authenticate CLI profile sessions
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Create a new chore
    #[command(alias = "new")]
    Add {
        /// Chore title
        title: Vec<String>,
        /// Points granted per completion
        #[arg(short, long, default_value = "1")]
        points: i64,
        /// Profile the chore is assigned to
        #[arg(long, value_name = "PROFILE_ID")]
        assignee: Option<String>,
        /// Recurrence rule, e.g. "daily" or "weekly:mon"
        #[arg(long)]
        recurrence: Option<String>,
    },
    /// List chores
    List {
        /// Include archived chores
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record a completion of a chore
    Done {
        /// Task ID or unique ID prefix
        id: String,
    },
    /// Delete a chore
    Delete {
        /// Task ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum RewardCommands {
    /// Create a new reward
    Add {
        /// Reward title
        title: Vec<String>,
        /// Price in points
        #[arg(short, long)]
        cost: i64,
    },
    /// List rewards
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ProfileCommands {
    /// Create a household profile
    Add {
        /// Display name
        name: Vec<String>,
    },
    /// List household profiles
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Keep syncing in the background and print status changes until Ctrl-C
    Watch,
    /// List recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update a CLI profile
    Init {
        /// Profile name to write (defaults to --profile/global/default)
        #[arg(long)]
        profile: Option<String>,
        /// Supabase project URL
        #[arg(long)]
        supabase_url: Option<String>,
        /// Supabase anon key
        #[arg(long)]
        supabase_anon_key: Option<String>,
        /// Do not set this profile as active
        #[arg(long)]
        no_activate: bool,
    },
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Sign in with Supabase email/password credentials
    Login {
        /// Profile to sign into (defaults to active profile)
        #[arg(long)]
        profile: Option<String>,
        /// Account email
        #[arg(long)]
        email: String,
        /// Account password
        #[arg(long)]
        password: String,
    },
    /// Show current auth status for a profile
    Status {
        /// Profile to inspect (defaults to active profile)
        #[arg(long)]
        profile: Option<String>,
    },
    /// Sign out and clear the stored session
    Logout {
        /// Profile to sign out (defaults to active profile)
        #[arg(long)]
        profile: Option<String>,
    },
}
