use clap::{Parser, Subcommand, ValueEnum};

use carebloom::auth::PhoneScope;

/// CareBloom: donor and NGO account and notification client
#[derive(Parser)]
#[command(name = "carebloom", version, about)]
pub struct Cli {
    /// Run against the in-process memory backend instead of the hosted project
    #[arg(long, global = true)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check whether an email is already registered
    CheckEmail {
        email: String,
    },

    /// Check whether a phone number is already registered
    CheckPhone {
        phone: String,
        #[arg(long, value_enum, default_value = "both")]
        scope: ScopeArg,
    },

    /// Sign in and print the landing destination
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "CAREBLOOM_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Register a donor account
    SignupDonor {
        #[arg(long)]
        email: String,
        #[arg(long, env = "CAREBLOOM_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        age: Option<u32>,
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        pin_code: Option<String>,
        #[arg(long)]
        address: Option<String>,
    },

    /// Register an NGO account
    SignupNgo {
        #[arg(long)]
        email: String,
        #[arg(long, env = "CAREBLOOM_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        org_type: Option<String>,
        #[arg(long)]
        registration_number: Option<String>,
        /// YYYY-MM-DD
        #[arg(long)]
        registration_date: Option<String>,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        pin_code: Option<String>,
        #[arg(long)]
        website: Option<String>,
    },

    /// Sign in and stream notifications until Ctrl-C
    Watch {
        #[arg(long)]
        email: String,
        #[arg(long, env = "CAREBLOOM_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Raise notifications as a signed-in account
    Notify {
        #[arg(long)]
        email: String,
        #[arg(long, env = "CAREBLOOM_PASSWORD", hide_env_values = true)]
        password: String,
        #[command(subcommand)]
        command: NotifyCommands,
    },
}

#[derive(Subcommand)]
pub enum NotifyCommands {
    /// An NGO requested a donation
    DonationRequest {
        #[arg(long)]
        donation_id: String,
        #[arg(long)]
        ngo_name: String,
    },
    /// A donor answered a donation request
    RequestStatus {
        #[arg(long)]
        request_id: String,
        /// accepted or rejected; anything else notifies nobody
        #[arg(long)]
        status: String,
        #[arg(long)]
        donor_name: String,
    },
    /// A delivery changed status
    Delivery {
        #[arg(long)]
        tracking_id: String,
        #[arg(long)]
        status: String,
        #[arg(long)]
        ngo_name: String,
    },
    /// Send the test notification to yourself
    Test,
    /// Mark one of your notifications as read
    MarkRead {
        id: uuid::Uuid,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ScopeArg {
    Donor,
    Ngo,
    Both,
}

impl From<ScopeArg> for PhoneScope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::Donor => PhoneScope::Donor,
            ScopeArg::Ngo => PhoneScope::Ngo,
            ScopeArg::Both => PhoneScope::Both,
        }
    }
}
