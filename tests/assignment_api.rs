use axum::http::StatusCode;
use nbexchange_server::model::exchange::ActionKind;
use nbexchange_server::response::ApiResponse;
use serde_json::Value;
use serial_test::serial;
use std::fs;

mod helpers;
use helpers::{
    assignment_is_active, count_actions, count_assignment_rows, count_notebook_rows,
    create_test_assignment, create_test_course, last_action, release_form,
    setup_test_environment, setup_test_environment_with_cap, with_identity,
};

// POST /assignment (release)

#[tokio::test]
#[serial]
async fn test_release_must_be_authenticated() {
    let (server, _pool) = setup_test_environment().await;

    let response = server.post("/assignment").await;

    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
}

#[tokio::test]
#[serial]
async fn test_release_requires_both_codes() {
    let (server, _pool) = setup_test_environment().await;

    let response =
        with_identity(server.post("/assignment"), "1-ada", "course_2", "Instructor").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<Value> = response.json();
    assert!(!body.success);
    assert_eq!(
        body.note.as_deref(),
        Some("Posting an Assigment requires a course code and an assignment code")
    );
}

#[tokio::test]
#[serial]
async fn test_release_rejects_unsubscribed_course() {
    let (server, _pool) = setup_test_environment().await;

    let response = with_identity(server.post("/assignment"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_9")
        .add_query_param("assignment_id", "assign_a")
        .await;

    let body: ApiResponse<Value> = response.json();
    assert!(!body.success);
    assert_eq!(
        body.note.as_deref(),
        Some("User not subscribed to course course_9")
    );
}

#[tokio::test]
#[serial]
async fn test_release_requires_instructor() {
    let (server, _pool) = setup_test_environment().await;

    let response = with_identity(server.post("/assignment"), "1-kim", "course_2", "Student")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .await;

    let body: ApiResponse<Value> = response.json();
    assert!(!body.success);
    assert_eq!(
        body.note.as_deref(),
        Some("User not an instructor to course course_2")
    );
}

#[tokio::test]
#[serial]
async fn test_release_without_file_is_precondition_failure() {
    let (server, _pool) = setup_test_environment().await;

    let response = with_identity(server.post("/assignment"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .await;

    assert_eq!(response.status_code(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
#[serial]
async fn test_release_stores_archive_and_ledger() {
    let (server, pool) = setup_test_environment().await;

    let response = with_identity(server.post("/assignment"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .multipart(release_form(&["nb1"], b"released archive"))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<Value> = response.json();
    assert!(body.success);
    assert_eq!(body.note.as_deref(), Some("Released"));

    assert_eq!(count_actions(&pool, ActionKind::Released).await, 1);
    let (location, _) = last_action(&pool, ActionKind::Released)
        .await
        .expect("released action");
    let location = location.expect("released action carries a location");
    assert_eq!(
        fs::read(&location).expect("stored archive"),
        b"released archive".to_vec()
    );
    assert_eq!(count_assignment_rows(&pool).await, 1);
    assert_eq!(count_notebook_rows(&pool).await, 1);
}

#[tokio::test]
#[serial]
async fn test_release_oversize_upload_rejected() {
    let (server, pool) = setup_test_environment_with_cap(50).await;

    let response = with_identity(server.post("/assignment"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .multipart(release_form(&[], &[b'x'; 51]))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<Value> = response.json();
    assert!(!body.success);
    assert_eq!(
        body.note.as_deref(),
        Some(
            "File upload oversize, and rejected. Please reduce the files in your submission and try again."
        )
    );
    assert_eq!(count_actions(&pool, ActionKind::Released).await, 0);

    // With the artifact removed and no ledger entry, there is nothing to
    // fetch.
    let response = with_identity(server.get("/assignment"), "1-kim", "course_2", "Student")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .await;
    let body: ApiResponse<Value> = response.json();
    assert!(!body.success);
    assert_eq!(body.note.as_deref(), Some("Assignment assign_a does not exist"));
}

#[tokio::test]
#[serial]
async fn test_release_at_cap_accepted() {
    let (server, pool) = setup_test_environment_with_cap(50).await;

    let response = with_identity(server.post("/assignment"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .multipart(release_form(&[], &[b'x'; 50]))
        .await;

    let body: ApiResponse<Value> = response.json();
    assert!(body.success);
    assert_eq!(body.note.as_deref(), Some("Released"));
    assert_eq!(count_actions(&pool, ActionKind::Released).await, 1);
}

// GET /assignment (fetch)

#[tokio::test]
#[serial]
async fn test_fetch_must_be_authenticated() {
    let (server, _pool) = setup_test_environment().await;

    let response = server.get("/assignment").await;

    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
}

#[tokio::test]
#[serial]
async fn test_fetch_requires_both_codes() {
    let (server, _pool) = setup_test_environment().await;

    let response = with_identity(server.get("/assignment"), "1-kim", "course_2", "Student").await;

    let body: ApiResponse<Value> = response.json();
    assert!(!body.success);
    assert_eq!(
        body.note.as_deref(),
        Some("Assigment call requires both a course code and an assignment code!!")
    );
}

#[tokio::test]
#[serial]
async fn test_fetch_rejects_unsubscribed_course() {
    let (server, _pool) = setup_test_environment().await;

    let response = with_identity(server.get("/assignment"), "1-kim", "course_2", "Student")
        .add_query_param("course_id", "course_9")
        .add_query_param("assignment_id", "assign_a")
        .await;

    let body: ApiResponse<Value> = response.json();
    assert!(!body.success);
    assert_eq!(
        body.note.as_deref(),
        Some("User not subscribed to course course_9")
    );
}

#[tokio::test]
#[serial]
async fn test_fetch_unknown_assignment() {
    let (server, _pool) = setup_test_environment().await;

    let response = with_identity(server.get("/assignment"), "1-kim", "course_2", "Student")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .await;

    let body: ApiResponse<Value> = response.json();
    assert!(!body.success);
    assert_eq!(body.note.as_deref(), Some("Assignment assign_a does not exist"));
}

#[tokio::test]
#[serial]
async fn test_fetch_serves_archive_and_records_action() {
    let (server, pool) = setup_test_environment().await;

    with_identity(server.post("/assignment"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .multipart(release_form(&["nb1"], b"released archive"))
        .await;

    let response = with_identity(server.get("/assignment"), "1-kim", "course_2", "Student")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.as_bytes().to_vec(), b"released archive".to_vec());

    let released = last_action(&pool, ActionKind::Released)
        .await
        .expect("released action");
    let fetched = last_action(&pool, ActionKind::Fetched)
        .await
        .expect("fetched action");
    assert_eq!(fetched.0, released.0);
}

#[tokio::test]
#[serial]
async fn test_rerelease_appends_and_fetch_serves_latest() {
    let (server, pool) = setup_test_environment().await;

    let mut locations = Vec::new();
    for contents in [&b"first archive"[..], b"second archive", b"third archive"] {
        with_identity(server.post("/assignment"), "1-ada", "course_2", "Instructor")
            .add_query_param("course_id", "course_2")
            .add_query_param("assignment_id", "assign_a")
            .multipart(release_form(&[], contents))
            .await;
        let (location, _) = last_action(&pool, ActionKind::Released)
            .await
            .expect("released action");
        locations.push(location.expect("release location"));
    }

    // Each release is its own ledger entry on the one active row.
    assert_eq!(count_actions(&pool, ActionKind::Released).await, 3);
    assert_eq!(count_assignment_rows(&pool).await, 1);
    locations.sort();
    locations.dedup();
    assert_eq!(locations.len(), 3);

    let response = with_identity(server.get("/assignment"), "1-kim", "course_2", "Student")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .await;
    assert_eq!(response.as_bytes().to_vec(), b"third archive".to_vec());
}

#[tokio::test]
#[serial]
async fn test_fetch_after_unrelease_reports_missing() {
    let (server, _pool) = setup_test_environment().await;

    with_identity(server.post("/assignment"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .multipart(release_form(&[], b"released archive"))
        .await;
    with_identity(server.delete("/assignment"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .await;

    let response = with_identity(server.get("/assignment"), "1-kim", "course_2", "Student")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .await;

    let body: ApiResponse<Value> = response.json();
    assert!(!body.success);
    assert_eq!(body.note.as_deref(), Some("Assignment assign_a does not exist"));
}

// DELETE /assignment (unrelease / purge)

#[tokio::test]
#[serial]
async fn test_delete_requires_both_codes() {
    let (server, _pool) = setup_test_environment().await;

    let response =
        with_identity(server.delete("/assignment"), "1-ada", "course_2", "Instructor").await;

    let body: ApiResponse<Value> = response.json();
    assert!(!body.success);
    assert_eq!(
        body.note.as_deref(),
        Some("Unreleasing an Assigment requires a course code and an assignment code")
    );
}

#[tokio::test]
#[serial]
async fn test_delete_requires_instructor() {
    let (server, _pool) = setup_test_environment().await;

    let response = with_identity(server.delete("/assignment"), "1-kim", "course_2", "Student")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .await;

    let body: ApiResponse<Value> = response.json();
    assert!(!body.success);
    assert_eq!(
        body.note.as_deref(),
        Some("User not an instructor to course course_2")
    );
}

#[tokio::test]
#[serial]
async fn test_delete_unknown_assignment() {
    let (server, _pool) = setup_test_environment().await;

    let response = with_identity(server.delete("/assignment"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .await;

    let body: ApiResponse<Value> = response.json();
    assert!(!body.success);
    assert_eq!(body.note.as_deref(), Some("Assignment assign_a does not exist"));
}

#[tokio::test]
#[serial]
async fn test_unrelease_flips_active_and_appends_removed() {
    let (server, pool) = setup_test_environment().await;
    let course_id = create_test_course(&pool, "course_2").await;
    let assignment_id = create_test_assignment(&pool, course_id, "assign_a", true).await;

    let response = with_identity(server.delete("/assignment"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .await;

    let body: ApiResponse<Value> = response.json();
    assert!(body.success);
    assert_eq!(body.note.as_deref(), Some("Assignment unreleased"));

    assert!(!assignment_is_active(&pool, assignment_id).await);
    assert_eq!(count_actions(&pool, ActionKind::Removed).await, 1);
    // The row and its ledger survive an unrelease.
    assert_eq!(count_assignment_rows(&pool).await, 1);
}

#[tokio::test]
#[serial]
async fn test_purge_removes_assignment_rows() {
    let (server, pool) = setup_test_environment().await;

    with_identity(server.post("/assignment"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .multipart(release_form(&["nb1"], b"released archive"))
        .await;

    let response = with_identity(server.delete("/assignment"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .add_query_param("purge", "true")
        .await;

    let body: ApiResponse<Value> = response.json();
    assert!(body.success);
    assert_eq!(
        body.note.as_deref(),
        Some("Assignment deleted and purged from the database")
    );

    assert_eq!(count_assignment_rows(&pool).await, 0);
    assert_eq!(count_notebook_rows(&pool).await, 0);
    assert_eq!(count_actions(&pool, ActionKind::Released).await, 0);
}

#[tokio::test]
#[serial]
async fn test_release_after_unrelease_creates_fresh_row() {
    let (server, pool) = setup_test_environment().await;

    with_identity(server.post("/assignment"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .multipart(release_form(&[], b"first archive"))
        .await;
    with_identity(server.delete("/assignment"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .await;
    with_identity(server.post("/assignment"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .multipart(release_form(&[], b"second archive"))
        .await;

    // The unreleased row stays behind; the re-release gets a fresh one.
    assert_eq!(count_assignment_rows(&pool).await, 2);

    let response = with_identity(server.get("/assignment"), "1-kim", "course_2", "Student")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .await;
    assert_eq!(response.as_bytes().to_vec(), b"second archive".to_vec());
}
