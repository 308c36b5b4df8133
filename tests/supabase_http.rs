//! Integration tests for the Supabase HTTP adapters against wiremock.
//!
//! These tests verify:
//! 1. GoTrue requests carry the project headers and the session is kept
//! 2. PostgREST query strings, write headers and error mapping
//! 3. The auth gateway routes by role over real HTTP adapters

use std::sync::Arc;
use std::time::Duration;

use carebloom::auth::{AuthGateway, LoginOutcome};
use carebloom::backend::{Filter, IdentityProvider, RowStore, Select};
use carebloom::config::Config;
use carebloom::errors::AppError;
use carebloom::navigation::{Destination, NavigationLog};
use carebloom::supabase::Supabase;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const USER_ID: &str = "0f8fad5b-d9cb-469f-a165-70867728950e";

fn config(server: &MockServer) -> Config {
    Config {
        supabase_url: server.uri(),
        anon_key: "anon-key".into(),
        http_timeout: Duration::from_secs(5),
        read_retries: 1,
        ..Config::default()
    }
}

fn token_body() -> serde_json::Value {
    json!({
        "access_token": "user-jwt",
        "token_type": "bearer",
        "expires_in": 3600,
        "expires_at": 4_000_000_000_i64,
        "refresh_token": "refresh-1",
        "user": {"id": USER_ID, "email": "d@example.com"}
    })
}

async fn mount_sign_in(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .and(header("apikey", "anon-key"))
        .and(body_json(json!({"email": "d@example.com", "password": "pw"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
        .mount(server)
        .await;
}

mod auth_adapter_tests {
    use super::*;

    #[tokio::test]
    async fn test_sign_in_stores_session_and_bearer() {
        let server = MockServer::start().await;
        mount_sign_in(&server).await;

        // Once signed in, reads go out with the user's token.
        Mock::given(method("GET"))
            .and(path("/rest/v1/notifications"))
            .and(header("authorization", "Bearer user-jwt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let supabase = Supabase::connect(&config(&server)).unwrap();
        let session = supabase.auth.sign_in_with_password("d@example.com", "pw").await.unwrap();
        assert_eq!(session.user.id.to_string(), USER_ID);
        assert_eq!(supabase.auth.session().await.unwrap(), Some(session));

        supabase
            .rest
            .select(&Select::from("notifications"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_credentials_map_to_identity_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })))
            .mount(&server)
            .await;

        let supabase = Supabase::connect(&config(&server)).unwrap();
        let err = supabase
            .auth
            .sign_in_with_password("d@example.com", "bad")
            .await
            .unwrap_err();
        match err {
            AppError::Identity { status, code, message } => {
                assert_eq!(status, Some(400));
                assert_eq!(code.as_deref(), Some("invalid_grant"));
                assert_eq!(message, "Invalid login credentials");
            }
            other => panic!("expected identity error, got {:?}", other),
        }
        assert!(supabase.auth.session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sign_up_returns_user_without_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .and(header("authorization", "Bearer anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": USER_ID,
                "email": "d@example.com",
                "confirmation_sent_at": "2024-05-01T10:00:00Z"
            })))
            .mount(&server)
            .await;

        let supabase = Supabase::connect(&config(&server)).unwrap();
        let user = supabase.auth.sign_up("d@example.com", "pw").await.unwrap().unwrap();
        assert_eq!(user.id.to_string(), USER_ID);
        assert!(supabase.auth.session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_revokes_and_clears() {
        let server = MockServer::start().await;
        mount_sign_in(&server).await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .and(header("authorization", "Bearer user-jwt"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let supabase = Supabase::connect(&config(&server)).unwrap();
        supabase.auth.sign_in_with_password("d@example.com", "pw").await.unwrap();
        supabase.auth.sign_out().await.unwrap();
        assert!(supabase.auth.session().await.unwrap().is_none());
        // Nothing left to revoke.
        supabase.auth.sign_out().await.unwrap();
    }
}

mod rest_adapter_tests {
    use super::*;

    #[tokio::test]
    async fn test_select_sends_postgrest_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/notifications"))
            .and(query_param("select", "*"))
            .and(query_param("user_id", format!("eq.{}", USER_ID).as_str()))
            .and(query_param("is_read", "eq.false"))
            .and(query_param("order", "created_at.desc"))
            .and(query_param("limit", "5"))
            .and(header("apikey", "anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "n1"}])))
            .expect(1)
            .mount(&server)
            .await;

        let supabase = Supabase::connect(&config(&server)).unwrap();
        let rows = supabase
            .rest
            .select(
                &Select::from("notifications")
                    .eq("user_id", USER_ID)
                    .eq("is_read", false)
                    .order("created_at", false)
                    .limit(5),
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({"id": "n1"})]);
    }

    #[tokio::test]
    async fn test_reads_retry_transient_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/donor_profiles"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/donor_profiles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let supabase = Supabase::connect(&config(&server)).unwrap();
        let rows = supabase
            .rest
            .select(&Select::from("donor_profiles").eq("email", "a@x.com"))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_writes_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/notifications"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let supabase = Supabase::connect(&config(&server)).unwrap();
        let err = supabase
            .rest
            .insert("notifications", json!({"title": "t"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Store { .. }));
    }

    #[tokio::test]
    async fn test_insert_asks_for_representation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/notifications"))
            .and(header("prefer", "return=representation"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{"id": "n1", "title": "t"}])))
            .mount(&server)
            .await;

        let supabase = Supabase::connect(&config(&server)).unwrap();
        let row = supabase
            .rest
            .insert("notifications", json!({"title": "t"}))
            .await
            .unwrap();
        assert_eq!(row["id"], "n1");
    }

    #[tokio::test]
    async fn test_update_filters_by_column() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/notifications"))
            .and(query_param("id", "eq.n1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let supabase = Supabase::connect(&config(&server)).unwrap();
        supabase
            .rest
            .update("notifications", &[Filter::eq("id", "n1")], json!({"is_read": true}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_error_body_keeps_postgrest_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/donations"))
            .respond_with(ResponseTemplate::new(406).set_body_json(json!({
                "code": "PGRST116",
                "message": "JSON object requested, multiple (or no) rows returned",
                "details": "The result contains 0 rows",
                "hint": null
            })))
            .mount(&server)
            .await;

        let supabase = Supabase::connect(&config(&server)).unwrap();
        let err = supabase
            .rest
            .select(&Select::from("donations"))
            .await
            .unwrap_err();
        assert!(err.is_no_rows());
        assert!(err.to_string().contains("0 rows"));
    }
}

mod gateway_over_http_tests {
    use super::*;

    /// Login over HTTP: organization profile found first, routed to the NGO dashboard.
    #[tokio::test]
    async fn test_login_routes_organization() {
        let server = MockServer::start().await;
        mount_sign_in(&server).await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/ngo_profiles"))
            .and(query_param("id", format!("eq.{}", USER_ID).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": USER_ID,
                "ngo_name": "Seva Trust",
                "contact_email": "d@example.com"
            }])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/donor_profiles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&server)
            .await;

        let cfg = config(&server);
        let supabase = Supabase::connect(&cfg).unwrap();
        let nav = Arc::new(NavigationLog::new());
        let gateway = AuthGateway::new(supabase.auth.clone(), supabase.rest.clone(), nav.clone(), &cfg);

        let outcome = gateway.login("d@example.com", "pw").await.unwrap();
        assert_eq!(outcome, LoginOutcome::Routed(Destination::OrganizationDashboard));
        assert_eq!(nav.last(), Some(Destination::OrganizationDashboard));
    }

    /// A server-side sign-out failure is reported, but the session is gone
    /// locally and the user still lands on the login page.
    #[tokio::test]
    async fn test_logout_navigates_even_when_revoke_fails() {
        let server = MockServer::start().await;
        mount_sign_in(&server).await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/ngo_profiles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/donor_profiles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"msg": "boom"})))
            .expect(1)
            .mount(&server)
            .await;

        let cfg = config(&server);
        let supabase = Supabase::connect(&cfg).unwrap();
        let nav = Arc::new(NavigationLog::new());
        let gateway = AuthGateway::new(supabase.auth.clone(), supabase.rest.clone(), nav.clone(), &cfg);

        gateway.login("d@example.com", "pw").await.unwrap();
        assert!(gateway.logout().await.is_err());
        assert_eq!(nav.last(), Some(Destination::Login { message: None }));
        assert!(gateway.check_auth().await.unwrap().is_none());
    }
}
