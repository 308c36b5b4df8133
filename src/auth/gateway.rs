use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::accounts::{AccountDirectory, PhoneScope};
use crate::backend::{IdentityProvider, RowStore};
use crate::config::Config;
use crate::errors::AppError;
use crate::models::account::{
    normalize_phone, Account, DonorSignup, OrganizationSignup, Role,
};
use crate::models::session::{Session, User};
use crate::navigation::{Destination, Navigator, REGISTERED_PLEASE_SIGN_IN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Routed(Destination),
    /// Another login was still in flight; nothing was done.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignupOutcome {
    pub user_id: Uuid,
    pub destination: Destination,
    /// False when the automatic sign-in failed and the user was sent to log in manually.
    pub signed_in: bool,
}

/// Lets one login run at a time. No timeout: a hung login holds the flag
/// until it resolves.
#[derive(Default)]
struct SingleFlight(AtomicBool);

struct FlightGuard<'a>(&'a AtomicBool);

impl SingleFlight {
    fn try_acquire(&self) -> Option<FlightGuard<'_>> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard(&self.0))
    }

    fn is_held(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Signup, login, session and logout flows.
pub struct AuthGateway {
    identity: Arc<dyn IdentityProvider>,
    accounts: AccountDirectory,
    navigator: Arc<dyn Navigator>,
    ngo_login_delay: Duration,
    login_flight: SingleFlight,
}

impl AuthGateway {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn RowStore>,
        navigator: Arc<dyn Navigator>,
        config: &Config,
    ) -> Self {
        Self {
            identity,
            accounts: AccountDirectory::new(store),
            navigator,
            ngo_login_delay: config.ngo_login_delay,
            login_flight: SingleFlight::default(),
        }
    }

    pub fn login_in_progress(&self) -> bool {
        self.login_flight.is_held()
    }

    // -- Uniqueness checks --

    /// True if either profile table already holds `email`.
    ///
    /// Query errors are logged and count as "not found".
    pub async fn check_email_exists(&self, email: &str) -> bool {
        debug!(email, "checking if email exists");
        for role in [Role::Donor, Role::Organization] {
            match self.accounts.email_taken_in(role, email).await {
                Ok(true) => {
                    info!(email, table = role.table(), "email already registered");
                    return true;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(email, table = role.table(), error = %e, "email check failed, treating as available");
                }
            }
        }
        debug!(email, "email is available");
        false
    }

    /// True if a profile in `scope` already holds the normalized `phone`.
    ///
    /// Same fail-open policy as [`AuthGateway::check_email_exists`].
    pub async fn check_phone_exists(&self, phone: &str, scope: PhoneScope) -> bool {
        let phone = normalize_phone(phone);
        if phone.is_empty() {
            return false;
        }

        for role in scope.roles() {
            match self.accounts.phone_taken_in(*role, &phone).await {
                Ok(true) => {
                    info!(phone = %phone, table = role.table(), "phone number already registered");
                    return true;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(phone = %phone, table = role.table(), error = %e, "phone check failed, treating as available");
                }
            }
        }
        debug!(phone = %phone, "phone number is available");
        false
    }

    // -- Login --

    /// Authenticate and route by role.
    ///
    /// Returns `LoginOutcome::Skipped` without touching the identity
    /// provider while another login is in flight.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AppError> {
        let Some(_flight) = self.login_flight.try_acquire() else {
            info!(email, "login already in progress, skipping");
            return Ok(LoginOutcome::Skipped);
        };

        info!(email, "attempting login");
        let destination = match self.authenticate_and_route(email, password).await {
            Ok(destination) => destination,
            Err(e) if e.is_no_rows() => {
                info!(email, "no profile row, sending to role selection");
                Destination::RoleSelection
            }
            Err(e) => {
                error!(email, error = %e, "login failed");
                return Err(e);
            }
        };

        self.navigator.navigate(destination.clone());
        Ok(LoginOutcome::Routed(destination))
    }

    async fn authenticate_and_route(&self, email: &str, password: &str) -> Result<Destination, AppError> {
        let session = self.identity.sign_in_with_password(email, password).await?;
        let user_id = session.user.id;
        info!(user_id = %user_id, "login successful");

        let role = match self.accounts.role_of(user_id).await {
            Ok(role) => role,
            Err(e) if e.is_no_rows() => return Err(e),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "profile lookup failed");
                None
            }
        };

        Ok(match role {
            Some(Role::Organization) => {
                info!(user_id = %user_id, "user is an NGO");
                Destination::OrganizationDashboard
            }
            Some(Role::Donor) => {
                info!(user_id = %user_id, "user is a donor");
                Destination::DonorDashboard
            }
            None => {
                info!(user_id = %user_id, "user has no profile");
                Destination::RoleSelection
            }
        })
    }

    // -- Signup --

    pub async fn signup_donor(&self, form: &DonorSignup) -> Result<SignupOutcome, AppError> {
        info!(email = %form.email, "starting donor registration");
        self.register_donor(form)
            .await
            .inspect_err(|e| error!(email = %form.email, error = %e, "donor registration failed"))
    }

    async fn register_donor(&self, form: &DonorSignup) -> Result<SignupOutcome, AppError> {
        if self.check_email_exists(&form.email).await {
            return Err(AppError::EmailAlreadyRegistered);
        }
        if let Some(phone) = form.provided_phone() {
            if self.check_phone_exists(phone, PhoneScope::Both).await {
                return Err(AppError::PhoneAlreadyRegistered);
            }
        }

        let user = self.create_identity(&form.email, &form.password).await?;
        self.accounts.create_donor(&form.profile(user.id)).await?;
        info!(user_id = %user.id, "donor profile created");

        Ok(self
            .auto_sign_in(user.id, &form.email, &form.password, Destination::DonorDashboard)
            .await)
    }

    /// Register an NGO. The automatic sign-in waits `ngo_login_delay` after
    /// the profile insert, then goes straight to the NGO dashboard.
    pub async fn signup_ngo(&self, form: &OrganizationSignup) -> Result<SignupOutcome, AppError> {
        info!(email = %form.email, "starting NGO registration");
        self.register_ngo(form)
            .await
            .inspect_err(|e| error!(email = %form.email, error = %e, "NGO registration failed"))
    }

    async fn register_ngo(&self, form: &OrganizationSignup) -> Result<SignupOutcome, AppError> {
        if self.check_email_exists(&form.email).await {
            return Err(AppError::EmailAlreadyRegistered);
        }
        let phone = form.contact_number.as_deref().unwrap_or_default();
        if self.check_phone_exists(phone, PhoneScope::Both).await {
            return Err(AppError::PhoneAlreadyRegistered);
        }

        let user = self.create_identity(&form.email, &form.password).await?;
        self.accounts
            .create_organization(&form.profile(user.id))
            .await?;
        info!(user_id = %user.id, "NGO profile created");

        if !self.ngo_login_delay.is_zero() {
            debug!(delay_ms = self.ngo_login_delay.as_millis() as u64, "waiting before NGO auto sign-in");
            tokio::time::sleep(self.ngo_login_delay).await;
        }

        Ok(self
            .auto_sign_in(user.id, &form.email, &form.password, Destination::OrganizationDashboard)
            .await)
    }

    async fn create_identity(&self, email: &str, password: &str) -> Result<User, AppError> {
        let user = match self.identity.sign_up(email, password).await {
            Ok(user) => user,
            Err(AppError::Identity { message, .. }) if message.contains("already registered") => {
                return Err(AppError::EmailAlreadyRegistered);
            }
            Err(e) => return Err(e),
        };
        let user = user.ok_or(AppError::UserCreationFailed)?;
        info!(user_id = %user.id, "auth user created");
        Ok(user)
    }

    /// Sign in after registration. A failure here keeps the registration
    /// and sends the user to the login page instead.
    async fn auto_sign_in(
        &self,
        user_id: Uuid,
        email: &str,
        password: &str,
        destination: Destination,
    ) -> SignupOutcome {
        let (destination, signed_in) = match self.identity.sign_in_with_password(email, password).await {
            Ok(_) => {
                info!(user_id = %user_id, destination = %destination, "registration complete");
                (destination, true)
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "auto sign-in failed, but registration successful");
                (Destination::login_with(REGISTERED_PLEASE_SIGN_IN), false)
            }
        };

        self.navigator.navigate(destination.clone());
        SignupOutcome {
            user_id,
            destination,
            signed_in,
        }
    }

    // -- Session --

    pub async fn check_auth(&self) -> Result<Option<Session>, AppError> {
        self.identity.session().await
    }

    pub async fn get_current_user(&self) -> Result<Option<User>, AppError> {
        self.identity.user().await
    }

    pub async fn resolve_account(&self, id: Uuid) -> Result<Option<Account>, AppError> {
        self.accounts.resolve(id).await
    }

    /// Sign out and return to the login page. The navigation happens even
    /// when the server-side sign-out fails; that error is still returned.
    pub async fn logout(&self) -> Result<(), AppError> {
        let result = self.identity.sign_out().await;
        if let Err(ref e) = result {
            warn!(error = %e, "sign-out failed");
        }
        self.navigator.navigate(Destination::Login { message: None });
        result
    }
}
