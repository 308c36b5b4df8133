//! Donor and organization accounts.
//!
//! Each role lives in its own table keyed by the identity id, so the same
//! identity could in principle own both rows. [`Account`] is the single
//! resolved view the rest of the crate works with.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

pub const DONOR_TABLE: &str = "donor_profiles";
pub const ORGANIZATION_TABLE: &str = "ngo_profiles";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Donor,
    Organization,
}

impl Role {
    pub fn table(&self) -> &'static str {
        match self {
            Role::Donor => DONOR_TABLE,
            Role::Organization => ORGANIZATION_TABLE,
        }
    }

    pub fn email_column(&self) -> &'static str {
        match self {
            Role::Donor => "email",
            Role::Organization => "contact_email",
        }
    }

    pub fn phone_column(&self) -> &'static str {
        match self {
            Role::Donor => "phone_number",
            Role::Organization => "contact_phone",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonorProfile {
    pub id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
    pub phone_number: Option<String>,
    pub age: Option<u32>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pin_code: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationProfile {
    pub id: Uuid,
    pub ngo_name: String,
    pub org_type: Option<String>,
    pub registration_number: Option<String>,
    pub registration_date: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pin_code: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: String,
    pub website_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Account {
    Donor(DonorProfile),
    Organization(OrganizationProfile),
}

impl Account {
    pub fn role(&self) -> Role {
        match self {
            Account::Donor(_) => Role::Donor,
            Account::Organization(_) => Role::Organization,
        }
    }

    pub fn email(&self) -> &str {
        match self {
            Account::Donor(p) => &p.email,
            Account::Organization(p) => &p.contact_email,
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Account::Donor(p) => match (&p.first_name, &p.last_name) {
                (Some(first), Some(last)) => format!("{} {}", first, last),
                (Some(first), None) => first.clone(),
                _ => p.email.clone(),
            },
            Account::Organization(p) => p.ngo_name.clone(),
        }
    }
}

/// Strip everything but ASCII digits, the form phone numbers are stored in.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Signup form for a donor.
#[derive(Debug, Clone, Default)]
pub struct DonorSignup {
    pub email: String,
    pub password: Zeroizing<String>,
    pub phone_number: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub age: Option<u32>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pin_code: Option<String>,
    pub address: Option<String>,
}

impl DonorSignup {
    /// Phone as given, or `None` when blank.
    pub fn provided_phone(&self) -> Option<&str> {
        self.phone_number.as_deref().filter(|p| !p.trim().is_empty())
    }

    pub fn profile(&self, id: Uuid) -> DonorProfile {
        DonorProfile {
            id,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            phone_number: self
                .phone_number
                .as_deref()
                .map(normalize_phone)
                .filter(|p| !p.is_empty()),
            age: self.age,
            city: self.city.clone(),
            state: self.state.clone(),
            pin_code: self.pin_code.clone(),
            address: self.address.clone(),
        }
    }
}

/// Signup form for an NGO.
#[derive(Debug, Clone, Default)]
pub struct OrganizationSignup {
    pub email: String,
    pub password: Zeroizing<String>,
    pub contact_number: Option<String>,
    pub ngo_name: String,
    pub org_type: Option<String>,
    pub registration_number: Option<String>,
    pub registration_date: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pin_code: Option<String>,
    pub website: Option<String>,
}

impl OrganizationSignup {
    pub fn profile(&self, id: Uuid) -> OrganizationProfile {
        OrganizationProfile {
            id,
            ngo_name: self.ngo_name.clone(),
            org_type: self.org_type.clone(),
            registration_number: self.registration_number.clone(),
            registration_date: self.registration_date.clone(),
            address: self.address.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            pin_code: self.pin_code.clone(),
            contact_phone: self
                .contact_number
                .as_deref()
                .map(normalize_phone)
                .filter(|p| !p.is_empty()),
            contact_email: self.email.clone(),
            website_url: self.website.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone_keeps_digits_only() {
        assert_eq!(normalize_phone("+91 (999) 888-7777"), "919998887777");
        assert_eq!(normalize_phone("999.888.7777"), "9998887777");
        assert_eq!(normalize_phone("n/a"), "");
    }

    #[test]
    fn test_blank_donor_phone_is_not_provided() {
        let signup = DonorSignup {
            email: "a@x.com".into(),
            phone_number: Some("   ".into()),
            ..Default::default()
        };
        assert!(signup.provided_phone().is_none());
    }

    #[test]
    fn test_profiles_store_normalized_phone() {
        let id = Uuid::new_v4();
        let donor = DonorSignup {
            email: "a@x.com".into(),
            phone_number: Some("999-888-7777".into()),
            ..Default::default()
        }
        .profile(id);
        assert_eq!(donor.phone_number.as_deref(), Some("9998887777"));

        let ngo = OrganizationSignup {
            email: "ngo@x.com".into(),
            ngo_name: "Helping Hands".into(),
            contact_number: Some("(011) 2345 6789".into()),
            ..Default::default()
        }
        .profile(id);
        assert_eq!(ngo.contact_phone.as_deref(), Some("01123456789"));
        assert_eq!(ngo.contact_email, "ngo@x.com");
    }

    #[test]
    fn test_account_accessors_follow_role() {
        let id = Uuid::new_v4();
        let account = Account::Organization(
            OrganizationSignup {
                email: "ngo@x.com".into(),
                ngo_name: "Helping Hands".into(),
                ..Default::default()
            }
            .profile(id),
        );
        assert_eq!(account.role(), Role::Organization);
        assert_eq!(account.email(), "ngo@x.com");
        assert_eq!(account.display_name(), "Helping Hands");
        assert_eq!(Role::Organization.phone_column(), "contact_phone");
    }
}
