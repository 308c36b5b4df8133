//! Canned notifications.
//!
//! Each constructor addresses the notification to the party on the other
//! side of the action, never to the acting user.

use uuid::Uuid;

use crate::models::notification::{NewNotification, NotificationType};

pub const WELCOME_TITLE: &str = "Welcome to CareBloom! 🎉";

pub fn welcome(owner: Uuid) -> NewNotification {
    NewNotification::new(
        owner,
        WELCOME_TITLE,
        "Your notification system is working correctly.",
        NotificationType::Success,
    )
}

pub fn test_notification(owner: Uuid) -> NewNotification {
    NewNotification::new(
        owner,
        "Test Notification 🧪",
        "This is a test notification from CareBloom!",
        NotificationType::Info,
    )
}

/// An NGO asked for a donation; tell the donor.
pub fn donation_requested(donor: Uuid, donation_id: &str, ngo_name: &str) -> NewNotification {
    NewNotification::new(
        donor,
        "New Donation Request 📬",
        format!("{} has requested your donation item.", ngo_name),
        NotificationType::Info,
    )
    .related_to("donation_request", donation_id)
}

/// The donor accepted an NGO's request; tell the NGO.
pub fn request_accepted(ngo: Uuid, request_id: &str, donor_name: &str) -> NewNotification {
    NewNotification::new(
        ngo,
        "Request Accepted! ✅",
        format!("{} has accepted your donation request.", donor_name),
        NotificationType::Success,
    )
    .related_to("donation_request", request_id)
}

pub fn request_declined(ngo: Uuid, request_id: &str, donor_name: &str) -> NewNotification {
    NewNotification::new(
        ngo,
        "Request Declined ❌",
        format!("{} has declined your donation request.", donor_name),
        NotificationType::Warning,
    )
    .related_to("donation_request", request_id)
}

/// A delivery reached the NGO; tell the donor.
pub fn delivery_completed(donor: Uuid, tracking_id: &str, ngo_name: &str) -> NewNotification {
    NewNotification::new(
        donor,
        "Delivery Complete! 🎉",
        format!("Your donation has been successfully delivered to {}.", ngo_name),
        NotificationType::Success,
    )
    .related_to("delivery", tracking_id)
}
