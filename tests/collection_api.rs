use axum::http::StatusCode;
use nbexchange_server::model::exchange::ActionKind;
use nbexchange_server::payloads::exchange::CollectionEntry;
use nbexchange_server::response::ApiResponse;
use serde_json::Value;
use serial_test::serial;

mod helpers;
use helpers::{count_actions, last_action, release_form, setup_test_environment, with_identity};

async fn seed_submissions(server: &axum_test::TestServer) {
    let response = with_identity(server.post("/assignment"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .multipart(release_form(&["nb1"], b"released archive"))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    for (student, email) in [("1-kim", "kim@example.com"), ("1-lee", "lee@example.com")] {
        let response = with_identity(server.post("/submission"), student, "course_2", "Student")
            .add_query_param("course_id", "course_2")
            .add_query_param("assignment_id", "assign_a")
            .add_header("x-exchange-full-name", format!("Student {student}"))
            .add_header("x-exchange-email", email)
            .multipart(release_form(&[], format!("archive from {student}").as_bytes()))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }
}

// GET /collections

#[tokio::test]
#[serial]
async fn test_collections_must_be_authenticated() {
    let (server, _pool) = setup_test_environment().await;

    let response = server.get("/collections").await;

    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
}

#[tokio::test]
#[serial]
async fn test_collections_requires_both_codes() {
    let (server, _pool) = setup_test_environment().await;

    let response =
        with_identity(server.get("/collections"), "1-ada", "course_2", "Instructor").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<Value> = response.json();
    assert!(!body.success);
    assert_eq!(
        body.note.as_deref(),
        Some("Collections call requires both a course code and an assignment code")
    );
}

#[tokio::test]
#[serial]
async fn test_collections_requires_instructor() {
    let (server, _pool) = setup_test_environment().await;

    let response = with_identity(server.get("/collections"), "1-kim", "course_2", "Student")
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
async fn test_collections_empty_when_nothing_submitted() {
    let (server, _pool) = setup_test_environment().await;

    let response = with_identity(server.get("/collections"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<Vec<CollectionEntry>> = response.json();
    assert!(body.success);
    assert!(body.value.expect("value should be present").is_empty());
}

#[tokio::test]
#[serial]
async fn test_collections_lists_submissions() {
    let (server, _pool) = setup_test_environment().await;
    seed_submissions(&server).await;

    let response = with_identity(server.get("/collections"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<Vec<CollectionEntry>> = response.json();
    assert!(body.success);
    let entries = body.value.expect("value should be present");
    assert_eq!(entries.len(), 2);

    let students: Vec<&str> = entries.iter().map(|entry| entry.student_id.as_str()).collect();
    assert_eq!(students, vec!["1-kim", "1-lee"]);
    for entry in &entries {
        assert_eq!(entry.assignment_id, "assign_a");
        assert_eq!(entry.course_id, "course_2");
        assert_eq!(entry.status, ActionKind::Submitted);
        assert!(entry.path.is_some());
        let notebooks: Vec<&str> = entry
            .notebooks
            .iter()
            .map(|notebook| notebook.notebook_id.as_str())
            .collect();
        assert_eq!(notebooks, vec!["nb1"]);
    }
}

#[tokio::test]
#[serial]
async fn test_collections_scoped_to_assignment() {
    let (server, _pool) = setup_test_environment().await;
    seed_submissions(&server).await;

    with_identity(server.post("/assignment"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_b")
        .multipart(release_form(&[], b"other release"))
        .await;
    with_identity(server.post("/submission"), "1-kim", "course_2", "Student")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_b")
        .multipart(release_form(&[], b"other submission"))
        .await;

    let response = with_identity(server.get("/collections"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_b")
        .await;

    let body: ApiResponse<Vec<CollectionEntry>> = response.json();
    let entries = body.value.expect("value should be present");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].assignment_id, "assign_b");
    assert_eq!(entries[0].student_id, "1-kim");
}

#[tokio::test]
#[serial]
async fn test_collections_filters_by_user() {
    let (server, _pool) = setup_test_environment().await;
    seed_submissions(&server).await;

    let response = with_identity(server.get("/collections"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .add_query_param("user_id", "1-kim")
        .await;

    let body: ApiResponse<Vec<CollectionEntry>> = response.json();
    let entries = body.value.expect("value should be present");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].student_id, "1-kim");
}

#[tokio::test]
#[serial]
async fn test_collections_unknown_user_filter_is_empty() {
    let (server, _pool) = setup_test_environment().await;
    seed_submissions(&server).await;

    let response = with_identity(server.get("/collections"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .add_query_param("user_id", "1-zzz")
        .await;

    let body: ApiResponse<Vec<CollectionEntry>> = response.json();
    assert!(body.success);
    assert!(body.value.expect("value should be present").is_empty());
}

#[tokio::test]
#[serial]
async fn test_collections_exposes_student_profile() {
    let (server, _pool) = setup_test_environment().await;
    seed_submissions(&server).await;

    let response = with_identity(server.get("/collections"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .add_query_param("user_id", "1-kim")
        .await;

    let body: ApiResponse<Vec<CollectionEntry>> = response.json();
    let entries = body.value.expect("value should be present");
    assert_eq!(entries[0].full_name.as_deref(), Some("Student 1-kim"));
    assert_eq!(entries[0].email.as_deref(), Some("kim@example.com"));
}

// GET /collection

#[tokio::test]
#[serial]
async fn test_collection_requires_all_params() {
    let (server, _pool) = setup_test_environment().await;

    let response = with_identity(server.get("/collection"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .await;

    let body: ApiResponse<Value> = response.json();
    assert!(!body.success);
    assert_eq!(
        body.note.as_deref(),
        Some("Collection call requires a course code, an assignment code, and a path")
    );
}

#[tokio::test]
#[serial]
async fn test_collection_requires_instructor() {
    let (server, _pool) = setup_test_environment().await;

    let response = with_identity(server.get("/collection"), "1-kim", "course_2", "Student")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .add_query_param("path", "/tmp/nowhere.tar.gz")
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
async fn test_collection_unknown_path_serves_nothing() {
    let (server, pool) = setup_test_environment().await;
    seed_submissions(&server).await;

    let response = with_identity(server.get("/collection"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .add_query_param("path", "/tmp/nowhere.tar.gz")
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert!(response.as_bytes().is_empty());
    assert_eq!(count_actions(&pool, ActionKind::Collected).await, 0);
}

#[tokio::test]
#[serial]
async fn test_collection_serves_submission_and_records_action() {
    let (server, pool) = setup_test_environment().await;
    seed_submissions(&server).await;
    let (location, _) = last_action(&pool, ActionKind::Submitted)
        .await
        .expect("submitted action");
    let path = location.expect("submitted action carries a location");

    let response = with_identity(server.get("/collection"), "1-ada", "course_2", "Instructor")
        .add_query_param("course_id", "course_2")
        .add_query_param("assignment_id", "assign_a")
        .add_query_param("path", path.clone())
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        response.as_bytes().to_vec(),
        b"archive from 1-lee".to_vec()
    );

    assert_eq!(count_actions(&pool, ActionKind::Collected).await, 1);
    let (collected_location, _) = last_action(&pool, ActionKind::Collected)
        .await
        .expect("collected action");
    assert_eq!(collected_location.as_deref(), Some(path.as_str()));
}

// Verbs the collection surface does not offer

#[tokio::test]
#[serial]
async fn test_collections_post_not_implemented() {
    let (server, _pool) = setup_test_environment().await;

    let response =
        with_identity(server.post("/collections"), "1-ada", "course_2", "Instructor").await;

    assert_eq!(response.status_code(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
#[serial]
async fn test_collection_post_not_implemented() {
    let (server, _pool) = setup_test_environment().await;

    let response =
        with_identity(server.post("/collection"), "1-ada", "course_2", "Instructor").await;

    assert_eq!(response.status_code(), StatusCode::NOT_IMPLEMENTED);
}
