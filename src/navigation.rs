use std::sync::Mutex;

/// Where a flow sends the user next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    OrganizationDashboard,
    DonorDashboard,
    RoleSelection,
    Login { message: Option<String> },
}

pub const REGISTERED_PLEASE_SIGN_IN: &str = "Registration successful! Please sign in.";

impl Destination {
    pub fn login_with(message: impl Into<String>) -> Self {
        Destination::Login {
            message: Some(message.into()),
        }
    }

    /// Page path relative to the site root.
    pub fn path(&self) -> String {
        match self {
            Destination::OrganizationDashboard => "ngodashboard.html".to_string(),
            Destination::DonorDashboard => "dashboard.html".to_string(),
            Destination::RoleSelection => "DonorOrNgo.html".to_string(),
            Destination::Login { message: None } => "LoginSignUp.html".to_string(),
            Destination::Login {
                message: Some(message),
            } => format!("LoginSignUp.html?message={}", urlencoding::encode(message)),
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}

/// Receives the destinations produced by auth flows.
pub trait Navigator: Send + Sync {
    fn navigate(&self, destination: Destination);
}

/// Records every hop and logs it.
#[derive(Default)]
pub struct NavigationLog {
    hops: Mutex<Vec<Destination>>,
}

impl NavigationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hops(&self) -> Vec<Destination> {
        self.hops
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn last(&self) -> Option<Destination> {
        self.hops().pop()
    }
}

impl Navigator for NavigationLog {
    fn navigate(&self, destination: Destination) {
        tracing::info!(destination = %destination, "navigating");
        self.hops
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(destination);
    }
}
