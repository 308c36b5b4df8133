//! Notifications raised by donation workflow events.
//!
//! Each trigger looks up the owner of the affected row and notifies them
//! with a canned message. Unknown statuses are `Dispatch::Skipped`.

use serde_json::Value;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::channel::{Dispatch, NotificationChannel};
use super::templates;
use crate::backend::Select;
use crate::errors::AppError;
use crate::models::notification::NewNotification;

pub const DONATIONS_TABLE: &str = "donations";
pub const DONATION_REQUESTS_TABLE: &str = "donation_requests";
pub const DELIVERY_TRACKING_TABLE: &str = "delivery_tracking";

impl NotificationChannel {
    /// An NGO requested a donation; notify its donor.
    pub async fn trigger_donation_request_notification(&self, donation_id: &str, ngo_name: &str) -> Dispatch {
        info!(donation_id, ngo_name, "donation request event");
        match self.owner_of(DONATIONS_TABLE, "id", donation_id, "donor_id").await {
            Ok(donor) => {
                self.create_notification(templates::donation_requested(donor, donation_id, ngo_name))
                    .await
            }
            Err(e) => {
                error!(donation_id, error = %e, "could not resolve donation owner");
                Dispatch::Failed(e)
            }
        }
    }

    /// The donor answered a request; notify the requesting NGO.
    ///
    /// Only `accepted` and `rejected` produce a notification.
    pub async fn trigger_request_status_notification(
        &self,
        request_id: &str,
        status: &str,
        donor_name: &str,
    ) -> Dispatch {
        let template: fn(Uuid, &str, &str) -> NewNotification = match status {
            "accepted" => templates::request_accepted,
            "rejected" => templates::request_declined,
            other => {
                debug!(request_id, status = other, "no notification for request status");
                return Dispatch::Skipped;
            }
        };

        info!(request_id, status, "request status event");
        match self
            .owner_of(DONATION_REQUESTS_TABLE, "id", request_id, "ngo_id")
            .await
        {
            Ok(ngo) => self.create_notification(template(ngo, request_id, donor_name)).await,
            Err(e) => {
                error!(request_id, error = %e, "could not resolve requesting NGO");
                Dispatch::Failed(e)
            }
        }
    }

    /// A delivery changed status; on `delivered`, notify the donor.
    pub async fn trigger_delivery_notification(&self, tracking_id: &str, status: &str, ngo_name: &str) -> Dispatch {
        if status != "delivered" {
            debug!(tracking_id, status, "no notification for delivery status");
            return Dispatch::Skipped;
        }

        info!(tracking_id, "delivery completed event");
        match self
            .owner_of(DELIVERY_TRACKING_TABLE, "tracking_id", tracking_id, "donor_id")
            .await
        {
            Ok(donor) => {
                self.create_notification(templates::delivery_completed(donor, tracking_id, ngo_name))
                    .await
            }
            Err(e) => {
                error!(tracking_id, error = %e, "could not resolve delivery owner");
                Dispatch::Failed(e)
            }
        }
    }

    async fn owner_of(
        &self,
        table: &str,
        key_column: &str,
        key: &str,
        owner_column: &str,
    ) -> Result<Uuid, AppError> {
        let row = self
            .store
            .single(&Select::from(table).columns(owner_column).eq(key_column, key))
            .await?;
        let owner = row
            .get(owner_column)
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::store(table, format!("row has no {}", owner_column)))?;
        Uuid::parse_str(owner)
            .map_err(|e| AppError::store(table, format!("invalid {} {:?}: {}", owner_column, owner, e)))
    }
}
