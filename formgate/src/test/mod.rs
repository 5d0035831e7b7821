//! End-to-end tests through the full router.

use axum::http::StatusCode;
use axum_test::TestServer;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use std::io::Write;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    AppState, Application,
    auth::current_user::CurrentUser,
    config::{DirectoryConfig, TokenKeyConfig},
    test_utils::{FakeDirectory, FakeTokens, claims, create_test_config, grant, user_with},
    types::{Permission, Role},
};

const API: &str = "/authorize/api/v1";

fn server(tokens: FakeTokens, directory: &Arc<FakeDirectory>) -> TestServer {
    let state = AppState::builder()
        .config(create_test_config())
        .validator(Arc::new(tokens))
        .directory(directory.directory())
        .build();
    Application::from_state(state).into_test_server()
}

#[test_log::test(tokio::test)]
async fn test_healthz_needs_no_token() {
    let directory = FakeDirectory::new().into_shared();
    let server = server(FakeTokens::new(), &directory);

    let response = server.get("/healthz").await;
    response.assert_status_ok();
    response.assert_text("OK");
    assert!(directory.calls().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_invalid_token_is_unauthenticated() {
    let directory = FakeDirectory::new().into_shared();
    let server = server(FakeTokens::new(), &directory);

    let response = server
        .get(&format!("{API}/forms/{}", Uuid::new_v4()))
        .authorization_bearer("forged")
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    response.assert_text("Invalid authorization token");
    assert_eq!(directory.call_count("login"), 0);
}

#[test_log::test(tokio::test)]
async fn test_form_routes_check_the_method_specific_permission() {
    let form_id = Uuid::new_v4();
    let user = user_with(vec![grant(form_id, &[Permission::FormRead], &[])]);
    let user_id = user.id;
    let directory = FakeDirectory::new().with_user("reader", user).into_shared();
    let server = server(FakeTokens::new().accept("t1", claims("reader")), &directory);

    let path = format!("{API}/forms/{form_id}");

    let response = server.get(&path).authorization_bearer("t1").await;
    response.assert_status_ok();
    response.assert_json(&json!({
        "userId": user_id,
        "apiUser": false,
        "formIdWithDeletePermission": null
    }));

    let response = server.put(&path).authorization_bearer("t1").await;
    response.assert_status(StatusCode::FORBIDDEN);

    let response = server.delete(&path).authorization_bearer("t1").await;
    response.assert_status(StatusCode::FORBIDDEN);

    // The session service sees the form the route refers to
    let logins = directory.logins();
    assert_eq!(logins.len(), 3);
    assert_eq!(logins[0].1.get("formId"), Some(&form_id.to_string()));
}

#[test_log::test(tokio::test)]
async fn test_read_only_grant_cannot_update_submission() {
    let form_id = Uuid::new_v4();
    let submission_id = Uuid::new_v4();
    let user = user_with(vec![grant(form_id, &[Permission::FormRead, Permission::SubmissionRead], &[])]);
    let directory = FakeDirectory::new()
        .with_user("reader", user)
        .with_submission(submission_id, form_id, false, false)
        .into_shared();
    let server = server(FakeTokens::new().accept("t1", claims("reader")), &directory);

    let path = format!("{API}/submissions/{submission_id}");
    server.get(&path).authorization_bearer("t1").await.assert_status_ok();

    let response = server.put(&path).authorization_bearer("t1").await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(directory.call_count("check_submission_permission"), 1);
}

#[test_log::test(tokio::test)]
async fn test_anonymous_reads_public_submission_but_cannot_edit_it() {
    let form_id = Uuid::new_v4();
    let submission_id = Uuid::new_v4();
    let directory = FakeDirectory::new()
        .with_submission(submission_id, form_id, false, true)
        .into_shared();
    let server = server(FakeTokens::new(), &directory);

    let path = format!("{API}/submissions/{submission_id}");

    let response = server.get(&path).await;
    response.assert_status_ok();
    let decision: Value = response.json();
    assert_eq!(decision["userId"], Value::Null);

    server.put(&path).await.assert_status(StatusCode::FORBIDDEN);
}

#[test_log::test(tokio::test)]
async fn test_anonymous_session_carries_public_form_grants() {
    let form_id = Uuid::new_v4();
    let anonymous = CurrentUser {
        forms: vec![grant(form_id, &[Permission::FormRead, Permission::SubmissionCreate], &[])],
        ..CurrentUser::anonymous()
    };
    let directory = FakeDirectory::new().with_anonymous(anonymous).into_shared();
    let server = server(FakeTokens::new(), &directory);

    let response = server.get(&format!("{API}/forms/{form_id}")).await;
    response.assert_status_ok();
    let decision: Value = response.json();
    assert_eq!(decision["userId"], Value::Null);

    server
        .post(&format!("{API}/forms/{form_id}/submissions"))
        .await
        .assert_status_ok();
    server
        .put(&format!("{API}/forms/{form_id}"))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    // Only the public form is open
    server
        .get(&format!("{API}/forms/{}", Uuid::new_v4()))
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[test_log::test(tokio::test)]
async fn test_unknown_submission_is_not_found() {
    let user = user_with(vec![]);
    let directory = FakeDirectory::new().with_user("someone", user).into_shared();
    let server = server(FakeTokens::new().accept("t1", claims("someone")), &directory);

    let missing = Uuid::new_v4();
    let response = server
        .get(&format!("{API}/submissions/{missing}"))
        .authorization_bearer("t1")
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    response.assert_text(format!("Submission with ID {missing} not found"));

    let response = server
        .get(&format!("{API}/submissions/not-a-uuid"))
        .authorization_bearer("t1")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_text("Bad submissionId");
}

#[test_log::test(tokio::test)]
async fn test_bulk_delete_is_scoped_to_one_form() {
    let form_id = Uuid::new_v4();
    let other_form = Uuid::new_v4();
    let (anchor, a, b, foreign) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let user = user_with(vec![grant(
        form_id,
        &[Permission::SubmissionRead, Permission::SubmissionDelete],
        &[],
    )]);
    let directory = FakeDirectory::new()
        .with_user("deleter", user)
        .with_submission(anchor, form_id, false, false)
        .with_submission(a, form_id, false, false)
        .with_submission(b, form_id, true, false)
        .with_submission(foreign, other_form, false, false)
        .into_shared();
    let server = server(FakeTokens::new().accept("t1", claims("deleter")), &directory);

    let path = format!("{API}/submissions/{anchor}/{form_id}/submissions");

    let response = server
        .delete(&path)
        .authorization_bearer("t1")
        .json(&json!({"submissionIds": [a, b]}))
        .await;
    response.assert_status_ok();
    let decision: Value = response.json();
    assert_eq!(decision["formIdWithDeletePermission"], json!(form_id));

    let response = server
        .delete(&path)
        .authorization_bearer("t1")
        .json(&json!({"submissionIds": [a, foreign]}))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    let response = server
        .delete(&path)
        .authorization_bearer("t1")
        .json(&json!({"ids": [a]}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_text("Bad submissionIds");

    // Delete rights on the anchor's form don't extend to another form in the path
    let response = server
        .delete(&format!("{API}/submissions/{anchor}/{other_form}/submissions"))
        .authorization_bearer("t1")
        .json(&json!({"submissionIds": [foreign]}))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
}

#[test_log::test(tokio::test)]
async fn test_team_manager_role_changes() {
    let form_id = Uuid::new_v4();
    let manager = user_with(vec![grant(
        form_id,
        &[Permission::TeamRead, Permission::TeamUpdate],
        &[Role::TeamManager],
    )]);
    let manager_id = manager.id.unwrap();
    let colleague = Uuid::new_v4();
    let owner = Uuid::new_v4();

    let directory = FakeDirectory::new()
        .with_user("manager", manager)
        .with_roles(manager_id, form_id, &[Role::TeamManager])
        .with_roles(colleague, form_id, &[Role::SubmissionReviewer])
        .with_roles(owner, form_id, &[Role::Owner])
        .into_shared();
    let server = server(FakeTokens::new().accept("t1", claims("manager")), &directory);

    let update = |user_id: Uuid| format!("{API}/rbac/users?formId={form_id}&userId={user_id}");

    let response = server
        .put(&update(colleague))
        .authorization_bearer("t1")
        .json(&json!([{"role": "submission_reviewer"}, {"role": "form_submitter"}]))
        .await;
    response.assert_status_ok();

    let response = server
        .put(&update(manager_id))
        .authorization_bearer("t1")
        .json(&json!([{"role": "form_submitter"}]))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    response.assert_text("You cannot remove your own team manager role");

    let response = server
        .delete(&format!("{API}/rbac/users?formId={form_id}"))
        .authorization_bearer("t1")
        .json(&json!([owner]))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    response.assert_text("You cannot modify an owner's roles");

    let response = server
        .delete(&format!("{API}/rbac/users?formId={form_id}"))
        .authorization_bearer("t1")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_text("Missing request body");
}

#[test_log::test(tokio::test)]
async fn test_role_membership_routes() {
    let form_id = Uuid::new_v4();
    let manager = user_with(vec![grant(form_id, &[Permission::FormRead], &[Role::TeamManager])]);
    let directory = FakeDirectory::new().with_user("manager", manager).into_shared();
    let server = server(FakeTokens::new().accept("t1", claims("manager")), &directory);

    // ANY [owner, team_manager]
    server
        .put(&format!("{API}/forms/{form_id}/subscriptions"))
        .authorization_bearer("t1")
        .await
        .assert_status_ok();

    // ALL [owner]
    server
        .get(&format!("{API}/forms/{form_id}/apiKey"))
        .authorization_bearer("t1")
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[test_log::test(tokio::test)]
async fn test_unavailable_directory_is_bad_gateway() {
    let directory = FakeDirectory::new().unavailable().into_shared();
    let server = server(FakeTokens::new(), &directory);

    let response = server.get(&format!("{API}/forms/{}", Uuid::new_v4())).await;
    response.assert_status(StatusCode::BAD_GATEWAY);
    response.assert_text("Upstream service error");
}

/// Real token validation and the YAML directory, configured the way a deployment would be.
#[test_log::test(tokio::test)]
async fn test_configured_application_with_signed_tokens() {
    const SECRET: &str = "e2e-signing-secret";
    let form_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();

    let mut fixture = tempfile::NamedTempFile::new().unwrap();
    write!(
        fixture,
        r#"
users:
  - sub: owner@idir
    id: {user_id}
    forms:
      - formId: {form_id}
        roles: [owner]
        permissions: [form_read, form_update]
forms:
  - id: {form_id}
    identityProviders: [{{code: idir}}]
"#
    )
    .unwrap();

    let mut config = create_test_config();
    config.auth.key = TokenKeyConfig::Secret {
        secret: SECRET.to_string(),
    };
    config.directory = DirectoryConfig::Static {
        path: fixture.path().to_path_buf(),
    };

    let server = Application::new(config).await.unwrap().into_test_server();

    let token = encode(
        &Header::default(),
        &json!({"sub": "owner@idir", "exp": chrono::Utc::now().timestamp() + 3600}),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();
    let forged = encode(
        &Header::default(),
        &json!({"sub": "owner@idir", "exp": chrono::Utc::now().timestamp() + 3600}),
        &EncodingKey::from_secret(b"not-the-secret"),
    )
    .unwrap();

    let path = format!("{API}/forms/{form_id}");

    let response = server.put(&path).authorization_bearer(&token).await;
    response.assert_status_ok();
    let decision: Value = response.json();
    assert_eq!(decision["userId"], json!(user_id));

    server
        .delete(&path)
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::FORBIDDEN);
    server
        .get(&path)
        .authorization_bearer(&forged)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    server
        .get(&format!("{API}/forms/{form_id}/apiKey"))
        .authorization_bearer(&token)
        .await
        .assert_status_ok();
}
