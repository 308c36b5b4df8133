//! Integration tests for signup, login and logout against the memory backend.
//!
//! These tests verify:
//! 1. Email and phone uniqueness across donors and NGOs
//! 2. Role routing after login, including accounts with no profile
//! 3. Single-flight login
//! 4. Auto sign-in after registration and its fallback

use std::sync::Arc;
use std::time::Duration;

use carebloom::auth::{AuthGateway, LoginOutcome, PhoneScope};
use carebloom::backend::memory::MemoryBackend;
use carebloom::config::Config;
use carebloom::errors::AppError;
use carebloom::models::account::{DonorSignup, OrganizationSignup};
use carebloom::navigation::{Destination, NavigationLog, REGISTERED_PLEASE_SIGN_IN};
use serde_json::json;
use zeroize::Zeroizing;

struct Harness {
    backend: MemoryBackend,
    nav: Arc<NavigationLog>,
    gateway: AuthGateway,
}

fn harness() -> Harness {
    harness_with_delay(Duration::ZERO)
}

fn harness_with_delay(ngo_login_delay: Duration) -> Harness {
    let config = Config {
        ngo_login_delay,
        ..Config::default()
    };
    let backend = MemoryBackend::new();
    let nav = Arc::new(NavigationLog::new());
    let shared = Arc::new(backend.clone());
    let gateway = AuthGateway::new(shared.clone(), shared, nav.clone(), &config);
    Harness {
        backend,
        nav,
        gateway,
    }
}

fn donor(email: &str, phone: Option<&str>) -> DonorSignup {
    DonorSignup {
        email: email.into(),
        password: Zeroizing::new("s3cret-pass".into()),
        phone_number: phone.map(Into::into),
        first_name: Some("Asha".into()),
        last_name: Some("Rao".into()),
        age: Some(29),
        city: Some("Pune".into()),
        ..Default::default()
    }
}

fn ngo(email: &str, phone: Option<&str>) -> OrganizationSignup {
    OrganizationSignup {
        email: email.into(),
        password: Zeroizing::new("s3cret-pass".into()),
        contact_number: phone.map(Into::into),
        ngo_name: "Seva Trust".into(),
        org_type: Some("trust".into()),
        ..Default::default()
    }
}

mod signup_tests {
    use super::*;

    /// Donor signup creates the identity, stores the normalized phone and
    /// lands on the donor dashboard.
    #[tokio::test]
    async fn test_signup_donor_end_to_end() {
        let h = harness();
        let outcome = h
            .gateway
            .signup_donor(&donor("asha@example.com", Some("999-888-7777")))
            .await
            .unwrap();

        assert!(outcome.signed_in);
        assert_eq!(outcome.destination, Destination::DonorDashboard);
        assert_eq!(h.nav.last(), Some(Destination::DonorDashboard));

        let rows = h.backend.rows("donor_profiles");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], outcome.user_id.to_string());
        assert_eq!(rows[0]["phone_number"], "9998887777");
        assert_eq!(rows[0]["email"], "asha@example.com");

        let session = h.gateway.check_auth().await.unwrap().unwrap();
        assert_eq!(session.user.id, outcome.user_id);
    }

    /// NGO signup goes straight to the NGO dashboard.
    #[tokio::test]
    async fn test_signup_ngo_routes_to_ngo_dashboard() {
        let h = harness();
        let outcome = h
            .gateway
            .signup_ngo(&ngo("seva@example.org", Some("+91 11 2345 6789")))
            .await
            .unwrap();

        assert_eq!(outcome.destination, Destination::OrganizationDashboard);
        let rows = h.backend.rows("ngo_profiles");
        assert_eq!(rows[0]["contact_phone"], "911123456789");
        assert_eq!(rows[0]["contact_email"], "seva@example.org");
        assert_eq!(h.backend.sign_in_calls(), 1);
    }

    /// Email registered as an NGO blocks a donor signup with the same email.
    #[tokio::test]
    async fn test_email_unique_across_roles() {
        let h = harness();
        h.gateway
            .signup_ngo(&ngo("shared@example.org", None))
            .await
            .unwrap();

        let err = h
            .gateway
            .signup_donor(&donor("shared@example.org", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EmailAlreadyRegistered));
        assert!(err.to_string().contains("already registered"));
        assert!(h.backend.rows("donor_profiles").is_empty());
    }

    /// A donor's phone, in any formatting, blocks an NGO with the same digits.
    #[tokio::test]
    async fn test_phone_unique_across_roles_after_normalization() {
        let h = harness();
        h.gateway
            .signup_donor(&donor("a@example.com", Some("(999) 888 7777")))
            .await
            .unwrap();

        let err = h
            .gateway
            .signup_ngo(&ngo("n@example.org", Some("999.888.7777")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PhoneAlreadyRegistered));
        assert!(h.gateway.check_phone_exists("9998887777", PhoneScope::Donor).await);
        assert!(!h.gateway.check_phone_exists("9998887777", PhoneScope::Ngo).await);
    }

    /// Blank donor phone skips the phone check entirely.
    #[tokio::test]
    async fn test_blank_phone_is_not_checked() {
        let h = harness();
        h.gateway
            .signup_donor(&donor("a@example.com", Some("  ")))
            .await
            .unwrap();
        assert!(h.backend.rows("donor_profiles")[0]["phone_number"].is_null());
    }

    /// The identity provider's own duplicate error maps to the email message.
    #[tokio::test]
    async fn test_provider_duplicate_maps_to_email_error() {
        let h = harness();
        h.backend.register_user("ghost@example.com", "x");

        let err = h
            .gateway
            .signup_donor(&donor("ghost@example.com", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EmailAlreadyRegistered));
    }

    /// Failed auto sign-in keeps the registration and asks for a manual login.
    #[tokio::test]
    async fn test_auto_sign_in_failure_sends_to_login() {
        let h = harness();
        h.backend.reject_sign_in(true);

        let outcome = h
            .gateway
            .signup_donor(&donor("late@example.com", None))
            .await
            .unwrap();

        assert!(!outcome.signed_in);
        assert_eq!(outcome.destination, Destination::login_with(REGISTERED_PLEASE_SIGN_IN));
        assert_eq!(h.backend.rows("donor_profiles").len(), 1);
        assert!(h.gateway.check_auth().await.unwrap().is_none());
    }

    /// Uniqueness checks fail open when the store is down.
    #[tokio::test]
    async fn test_checks_fail_open() {
        let h = harness();
        h.backend.seed("donor_profiles", json!({"id": uuid::Uuid::new_v4().to_string(), "email": "x@example.com"}));
        h.backend.fail_table("donor_profiles", "connection reset");

        assert!(!h.gateway.check_email_exists("x@example.com").await);
        assert!(!h.gateway.check_phone_exists("123", PhoneScope::Both).await);

        h.backend.heal_table("donor_profiles");
        assert!(h.gateway.check_email_exists("x@example.com").await);
    }

    /// NGO auto sign-in only starts once the configured delay has elapsed.
    #[tokio::test(start_paused = true)]
    async fn test_ngo_auto_sign_in_waits_for_delay() {
        let h = harness_with_delay(Duration::from_millis(1000));
        let form = ngo("slow@example.org", None);
        let signup = h.gateway.signup_ngo(&form);
        tokio::pin!(signup);

        tokio::select! {
            biased;
            _ = &mut signup => panic!("signup finished before the delay elapsed"),
            _ = tokio::time::sleep(Duration::from_millis(999)) => {}
        }
        assert_eq!(h.backend.rows("ngo_profiles").len(), 1);
        assert_eq!(h.backend.sign_in_calls(), 0);

        let outcome = signup.await.unwrap();
        assert!(outcome.signed_in);
        assert_eq!(outcome.destination, Destination::OrganizationDashboard);
        assert_eq!(h.backend.sign_in_calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_phone_is_never_taken() {
        let h = harness();
        assert!(!h.gateway.check_phone_exists("", PhoneScope::Both).await);
        assert!(!h.gateway.check_phone_exists("n/a", PhoneScope::Both).await);
    }
}

mod login_tests {
    use super::*;

    /// An id with both profiles is routed as an organization.
    #[tokio::test]
    async fn test_organization_profile_wins() {
        let h = harness();
        let id = h.backend.register_user("both@example.com", "pw");
        h.backend.seed("donor_profiles", json!({"id": id.to_string(), "email": "both@example.com"}));
        h.backend.seed(
            "ngo_profiles",
            json!({"id": id.to_string(), "ngo_name": "Both Org", "contact_email": "both@example.com"}),
        );

        let outcome = h.gateway.login("both@example.com", "pw").await.unwrap();
        assert_eq!(outcome, LoginOutcome::Routed(Destination::OrganizationDashboard));
    }

    #[tokio::test]
    async fn test_donor_routes_to_donor_dashboard() {
        let h = harness();
        let id = h.backend.register_user("d@example.com", "pw");
        h.backend.seed("donor_profiles", json!({"id": id.to_string(), "email": "d@example.com"}));

        let outcome = h.gateway.login("d@example.com", "pw").await.unwrap();
        assert_eq!(outcome, LoginOutcome::Routed(Destination::DonorDashboard));
        assert_eq!(h.nav.hops(), vec![Destination::DonorDashboard]);
    }

    /// No profile at all is role selection, not an error.
    #[tokio::test]
    async fn test_no_profile_routes_to_role_selection() {
        let h = harness();
        h.backend.register_user("new@example.com", "pw");

        let outcome = h.gateway.login("new@example.com", "pw").await.unwrap();
        assert_eq!(outcome, LoginOutcome::Routed(Destination::RoleSelection));
    }

    /// A failing organization table does not hide the donor profile.
    #[tokio::test]
    async fn test_organization_lookup_failure_still_routes_donor() {
        let h = harness();
        let id = h.backend.register_user("d@example.com", "pw");
        h.backend.seed("donor_profiles", json!({"id": id.to_string(), "email": "d@example.com"}));
        h.backend.fail_table("ngo_profiles", "connection reset");

        let outcome = h.gateway.login("d@example.com", "pw").await.unwrap();
        assert_eq!(outcome, LoginOutcome::Routed(Destination::DonorDashboard));
    }

    /// Routing only needs the profile to exist, not every column to be filled.
    #[tokio::test]
    async fn test_sparse_organization_row_still_routes() {
        let h = harness();
        let id = h.backend.register_user("n@example.org", "pw");
        h.backend.seed(
            "ngo_profiles",
            json!({"id": id.to_string(), "ngo_name": null, "contact_email": null}),
        );

        let outcome = h.gateway.login("n@example.org", "pw").await.unwrap();
        assert_eq!(outcome, LoginOutcome::Routed(Destination::OrganizationDashboard));
    }

    /// A "no rows" (PGRST116) answer from the profile lookup is role
    /// selection, not a failed login.
    #[tokio::test]
    async fn test_no_rows_lookup_routes_to_role_selection() {
        let h = harness();
        let id = h.backend.register_user("dup@example.com", "pw");
        // Two rows for one id make the single-row lookup answer PGRST116.
        h.backend.seed("donor_profiles", json!({"id": id.to_string(), "email": "dup@example.com"}));
        h.backend.seed("donor_profiles", json!({"id": id.to_string(), "email": "dup@example.com"}));

        let outcome = h.gateway.login("dup@example.com", "pw").await.unwrap();
        assert_eq!(outcome, LoginOutcome::Routed(Destination::RoleSelection));
        assert_eq!(h.nav.last(), Some(Destination::RoleSelection));
        assert!(!h.gateway.login_in_progress());
    }

    /// Bad credentials propagate and navigate nowhere.
    #[tokio::test]
    async fn test_bad_credentials_propagate() {
        let h = harness();
        h.backend.register_user("d@example.com", "pw");

        let err = h.gateway.login("d@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err, AppError::Identity { status: Some(400), .. }));
        assert!(h.nav.hops().is_empty());
        assert!(!h.gateway.login_in_progress());
    }

    /// A second login issued while the first is in flight does nothing.
    #[tokio::test]
    async fn test_concurrent_login_is_skipped() {
        let h = harness();
        h.backend.register_user("d@example.com", "pw");
        h.backend.set_sign_in_latency(Duration::from_millis(100));

        let (first, second) = tokio::join!(
            h.gateway.login("d@example.com", "pw"),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                h.gateway.login("d@example.com", "pw").await
            }
        );

        assert_eq!(first.unwrap(), LoginOutcome::Routed(Destination::RoleSelection));
        assert_eq!(second.unwrap(), LoginOutcome::Skipped);
        assert_eq!(h.backend.sign_in_calls(), 1);
        assert_eq!(h.nav.hops().len(), 1);

        // The flag is released once the first login resolves.
        h.backend.set_sign_in_latency(Duration::ZERO);
        assert!(matches!(
            h.gateway.login("d@example.com", "pw").await.unwrap(),
            LoginOutcome::Routed(_)
        ));
    }

    #[tokio::test]
    async fn test_logout_clears_session_and_navigates() {
        let h = harness();
        h.backend.register_user("d@example.com", "pw");
        h.gateway.login("d@example.com", "pw").await.unwrap();
        assert!(h.gateway.get_current_user().await.unwrap().is_some());

        h.gateway.logout().await.unwrap();
        assert!(h.gateway.get_current_user().await.unwrap().is_none());
        assert_eq!(h.nav.last(), Some(Destination::Login { message: None }));
    }
}
