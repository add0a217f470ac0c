//! Mock HTTP server tests for the identity and mail clients.
//!
//! Coverage:
//! - Keycloak profile fetch, verified and unverified email
//! - Keycloak 404, 403 and 5xx classification
//! - Mailgun delivery, auth and form fields
//! - Mailgun 429, 5xx and 400 classification
//! - A reminder run wired to both mock services

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ticketflow::config::TicketflowConfig;
use ticketflow::errors::{IdentityError, MailError};
use ticketflow::identity::{IdentityLookup, KeycloakIdentityClient};
use ticketflow::jobs::Jobs;
use ticketflow::mail::{MailMessage, Mailer, MailgunMailer};
use ticketflow::records::ApplicationStatus;
use ticketflow::store::InMemoryUserStore;
use ticketflow::testing::{fast_retry, templates, user};

fn keycloak(server: &MockServer) -> KeycloakIdentityClient {
    KeycloakIdentityClient::new(server.uri(), "hack", "admin-token", Duration::from_secs(2)).unwrap()
}

fn mailgun(server: &MockServer) -> MailgunMailer {
    MailgunMailer::new(
        server.uri(),
        "mg.example.org",
        "key",
        "Team <team@example.org>",
        Duration::from_secs(2),
    )
    .unwrap()
}

fn message() -> MailMessage {
    MailMessage::new("ada@example.com", "Reminder", "<p>Upload your CV</p>")
}

// ── Keycloak ───────────────────────────────────────────────────────────

#[tokio::test]
async fn keycloak_returns_verified_profile() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin/realms/hack/users/kc-1"))
        .and(header("Authorization", "Bearer admin-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "kc-1",
            "username": "ada",
            "email": "ada@example.com",
            "emailVerified": true,
            "firstName": "Ada",
            "lastName": "Lovelace"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let profile = keycloak(&server).lookup("kc-1").await.unwrap();

    assert_eq!(profile.verified_email.as_deref(), Some("ada@example.com"));
    assert_eq!(profile.display_name.as_deref(), Some("Ada Lovelace"));
}

#[tokio::test]
async fn keycloak_hides_unverified_email() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin/realms/hack/users/kc-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "username": "grace",
            "email": "grace@example.com",
            "emailVerified": false
        })))
        .mount(&server)
        .await;

    let profile = keycloak(&server).lookup("kc-2").await.unwrap();

    assert!(profile.verified_email.is_none());
    assert_eq!(profile.display_name.as_deref(), Some("grace"));
}

#[tokio::test]
async fn keycloak_404_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = keycloak(&server).lookup("kc-missing").await.unwrap_err();

    assert_eq!(err, IdentityError::not_found("kc-missing"));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn keycloak_403_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = keycloak(&server).lookup("kc-1").await.unwrap_err();

    assert!(matches!(err, IdentityError::Rejected { .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn keycloak_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = keycloak(&server).lookup("kc-1").await.unwrap_err();

    assert!(err.is_transient());
}

#[tokio::test]
async fn keycloak_malformed_body_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = keycloak(&server).lookup("kc-1").await.unwrap_err();

    assert!(matches!(err, IdentityError::Rejected { .. }));
}

// ── Mailgun ────────────────────────────────────────────────────────────

#[tokio::test]
async fn mailgun_posts_form_with_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/mg.example.org/messages"))
        .and(header("Authorization", "Basic YXBpOmtleQ=="))
        .and(body_string_contains("to=ada%40example.com"))
        .and(body_string_contains("subject=Reminder"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "<20240115.1@mg.example.org>",
            "message": "Queued. Thank you."
        })))
        .expect(1)
        .mount(&server)
        .await;

    mailgun(&server).send(&message()).await.unwrap();
}

#[tokio::test]
async fn mailgun_rate_limit_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = mailgun(&server).send(&message()).await.unwrap_err();

    assert!(err.is_transient());
}

#[tokio::test]
async fn mailgun_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    assert!(mailgun(&server).send(&message()).await.unwrap_err().is_transient());
}

#[tokio::test]
async fn mailgun_bad_request_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("'to' parameter is not a valid address"))
        .mount(&server)
        .await;

    let err = mailgun(&server).send(&message()).await.unwrap_err();

    assert!(matches!(err, MailError::Rejected { .. }));
    assert!(err.to_string().contains("not a valid address"));
}

// ── Jobs over HTTP ─────────────────────────────────────────────────────

#[tokio::test]
async fn reminder_run_retries_transient_mail_failure() {
    let identity = MockServer::start().await;
    let mail = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/admin/realms/hack/users/kc-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "email": "a.verified@example.com",
            "emailVerified": true,
            "firstName": "Ada"
        })))
        .mount(&identity)
        .await;
    Mock::given(method("GET"))
        .and(path("/admin/realms/hack/users/kc-b"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&identity)
        .await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mail)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&mail)
        .await;

    let mut config = TicketflowConfig::default();
    config.identity.retry = fast_retry(3);
    config.mail.retry = fast_retry(3);

    let store = InMemoryUserStore::with_records(vec![
        user("a", ApplicationStatus::Submitted, 0),
        user("b", ApplicationStatus::Unsubmitted, 1),
    ]);
    let jobs = Jobs::new(
        config,
        Arc::new(store),
        Arc::new(keycloak(&identity)),
        Arc::new(mailgun(&mail)),
        Arc::new(templates()),
    );

    let report = jobs.run_reminders().await.unwrap();

    assert_eq!(report.records_read, 2);
    assert_eq!(report.committed, 2);
    assert_eq!(report.degraded, 1);
    assert_eq!(report.failures[0].user_id, "b");
}
