use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::backend::{RowStore, Select};
use crate::errors::AppError;
use crate::models::account::{Account, DonorProfile, OrganizationProfile, Role};

/// Which profile tables a phone uniqueness check covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhoneScope {
    Donor,
    Ngo,
    Both,
}

impl PhoneScope {
    pub fn roles(&self) -> &'static [Role] {
        match self {
            PhoneScope::Donor => &[Role::Donor],
            PhoneScope::Ngo => &[Role::Organization],
            PhoneScope::Both => &[Role::Donor, Role::Organization],
        }
    }
}

/// Profile lookups and inserts over the two role tables.
#[derive(Clone)]
pub struct AccountDirectory {
    store: Arc<dyn RowStore>,
}

impl AccountDirectory {
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self { store }
    }

    /// Resolve the account bound to an identity id.
    ///
    /// The organization table is consulted first, so an id that owns both
    /// profiles resolves to `Account::Organization`.
    pub async fn resolve(&self, id: Uuid) -> Result<Option<Account>, AppError> {
        let org = self
            .store
            .maybe_single(&Select::from(Role::Organization.table()).eq("id", id.to_string()))
            .await?;
        if let Some(row) = org {
            let profile: OrganizationProfile = serde_json::from_value(row)?;
            return Ok(Some(Account::Organization(profile)));
        }

        let donor = self
            .store
            .maybe_single(&Select::from(Role::Donor.table()).eq("id", id.to_string()))
            .await?;
        match donor {
            Some(row) => {
                let profile: DonorProfile = serde_json::from_value(row)?;
                Ok(Some(Account::Donor(profile)))
            }
            None => Ok(None),
        }
    }

    /// Which role table holds a row for `id`. Only existence is checked, so
    /// sparse profile rows still route.
    ///
    /// A failed organization lookup is logged and the donor table is tried
    /// next. Donor lookup errors are returned.
    pub async fn role_of(&self, id: Uuid) -> Result<Option<Role>, AppError> {
        match self.has_profile(Role::Organization, id).await {
            Ok(true) => return Ok(Some(Role::Organization)),
            Ok(false) => {}
            Err(e) => {
                warn!(user_id = %id, error = %e, "organization lookup failed, checking donor profile");
            }
        }

        if self.has_profile(Role::Donor, id).await? {
            return Ok(Some(Role::Donor));
        }
        Ok(None)
    }

    async fn has_profile(&self, role: Role, id: Uuid) -> Result<bool, AppError> {
        let row = self
            .store
            .maybe_single(&Select::from(role.table()).columns("id").eq("id", id.to_string()))
            .await?;
        Ok(row.is_some())
    }

    pub async fn email_taken_in(&self, role: Role, email: &str) -> Result<bool, AppError> {
        let column = role.email_column();
        let row = self
            .store
            .maybe_single(&Select::from(role.table()).columns(column).eq(column, email))
            .await?;
        Ok(row.is_some())
    }

    /// `phone` must already be normalized.
    pub async fn phone_taken_in(&self, role: Role, phone: &str) -> Result<bool, AppError> {
        let column = role.phone_column();
        let row = self
            .store
            .maybe_single(&Select::from(role.table()).columns(column).eq(column, phone))
            .await?;
        Ok(row.is_some())
    }

    pub async fn create_donor(&self, profile: &DonorProfile) -> Result<(), AppError> {
        self.store
            .insert(Role::Donor.table(), serde_json::to_value(profile)?)
            .await?;
        Ok(())
    }

    pub async fn create_organization(&self, profile: &OrganizationProfile) -> Result<(), AppError> {
        self.store
            .insert(Role::Organization.table(), serde_json::to_value(profile)?)
            .await?;
        Ok(())
    }
}
