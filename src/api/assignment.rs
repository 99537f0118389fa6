use super::helper;
use crate::AppState;
use crate::errors::AppError;
use crate::identity::Identity;
use crate::model::exchange::{ActionKind, NewAction, NewAssignment, NewNotebook, Notebook};
use crate::payloads::exchange::{AssignmentEntry, AssignmentParams, DeleteParams, ListParams};
use crate::response::ApiResponse;
use crate::schema::{
    actions::dsl as actions_dsl, assignments::dsl as assignments_dsl,
    feedback::dsl as feedback_dsl, notebooks::dsl as notebooks_dsl,
};
use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Query, Request, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use diesel::prelude::*;
use tracing::{debug, info, instrument, warn};

/// Lists every ledger action the requester may see for one course.
///
/// Returns (wrapped in `ApiResponse`)
/// * `Vec<AssignmentEntry>`: one entry per visible action (200 OK).
/// * `success: false` with a note for a missing/unsubscribed/unknown course.
#[instrument(skip(state, identity))]
pub async fn list_assignments(
    State(state): State<AppState>,
    identity: Identity,
    Query(params): Query<ListParams>,
) -> Result<ApiResponse<Vec<AssignmentEntry>>, AppError> {
    let Some(course_code) = params.course_id else {
        let note = "Assigment call requires a course id";
        info!("{note}");
        return Ok(ApiResponse::failure(note));
    };

    let user = identity.resolve(&state.pool).await?;
    info!("Assignment list for course {} by {}", course_code, user.name);

    if !user.subscribed_to(&course_code) {
        let note = format!("User not subscribed to course {course_code}");
        info!("{note}");
        return Ok(ApiResponse::failure(note));
    }

    let query_course = course_code.clone();
    let entries = helper::run_query(&state.pool, move |conn_sync| {
        let Some(course) = helper::find_course(conn_sync, user.org_id, &query_course)? else {
            return Ok(None);
        };
        helper::build_assignment_list(conn_sync, &user, &course).map(Some)
    })
    .await?;

    match entries {
        Some(entries) => {
            debug!("Assignment list for {course_code}: {} entries", entries.len());
            Ok(ApiResponse::ok(entries))
        }
        None => {
            let note = format!("Course {course_code} does not exist");
            info!("{note}");
            Ok(ApiResponse::failure(note))
        }
    }
}

/// Releases an assignment: stores the uploaded archive and appends a
/// `released` action. Instructors only; multipart body with an `assignment`
/// file field and any number of `notebooks` text fields.
#[instrument(skip(state, identity, request))]
pub async fn release_assignment(
    State(state): State<AppState>,
    identity: Identity,
    Query(params): Query<AssignmentParams>,
    request: Request,
) -> Result<ApiResponse<()>, AppError> {
    let (Some(course_code), Some(assignment_code)) = (params.course_id, params.assignment_id)
    else {
        let note = "Posting an Assigment requires a course code and an assignment code";
        info!("{note}");
        return Ok(ApiResponse::failure(note));
    };

    let user = identity.resolve(&state.pool).await?;
    info!(
        "Release of {}/{} by {}",
        course_code, assignment_code, user.name
    );

    if !user.subscribed_to(&course_code) {
        let note = format!("User not subscribed to course {course_code}");
        info!("{note}");
        return Ok(ApiResponse::failure(note));
    }
    if !user.is_current_instructor() {
        let note = format!("User not an instructor to course {course_code}");
        info!("{note}");
        return Ok(ApiResponse::failure(note));
    }

    let (filename, notebooks, body) = read_upload(request, "assignment").await?;

    let org_id = user.org_id;
    let user_id = user.id;
    let query_course = course_code.clone();
    let query_assignment = assignment_code.clone();
    let assignment = helper::run_query(&state.pool, move |conn_sync| {
        let Some(course) = helper::find_course(conn_sync, org_id, &query_course)? else {
            return Ok(None);
        };
        let assignment =
            match helper::find_active_assignment(conn_sync, course.id, &query_assignment)? {
                Some(existing) => existing,
                None => {
                    diesel::insert_into(assignments_dsl::assignments)
                        .values(NewAssignment {
                            course_id: course.id,
                            assignment_code: query_assignment.clone(),
                            active: true,
                        })
                        .on_conflict_do_nothing()
                        .execute(conn_sync)?;
                    helper::find_active_assignment(conn_sync, course.id, &query_assignment)?
                        .ok_or(diesel::result::Error::NotFound)?
                }
            };
        Ok(Some(assignment))
    })
    .await?;

    let Some(assignment) = assignment else {
        let note = format!("Course {course_code} does not exist");
        info!("{note}");
        return Ok(ApiResponse::failure(note));
    };

    let path = state
        .store
        .release_path(org_id, &course_code, &assignment_code, &filename);
    if !state.store.write_checked(&path, &body)? {
        let note = "File upload oversize, and rejected. Please reduce the files in your submission and try again.";
        info!("{note}");
        return Ok(ApiResponse::failure(note));
    }
    let location = path.display().to_string();

    helper::run_query(&state.pool, move |conn_sync| {
        diesel::insert_into(actions_dsl::actions)
            .values(NewAction {
                user_id,
                assignment_id: assignment.id,
                action: ActionKind::Released,
                location: Some(location.clone()),
                checksum: None,
                timestamp: Utc::now(),
            })
            .execute(conn_sync)?;
        for name in &notebooks {
            let existing = notebooks_dsl::notebooks
                .filter(notebooks_dsl::assignment_id.eq(assignment.id))
                .filter(notebooks_dsl::name.eq(name))
                .first::<Notebook>(conn_sync)
                .optional()?;
            if existing.is_none() {
                diesel::insert_into(notebooks_dsl::notebooks)
                    .values(NewNotebook {
                        assignment_id: assignment.id,
                        name: name.clone(),
                    })
                    .on_conflict_do_nothing()
                    .execute(conn_sync)?;
            }
        }
        Ok(())
    })
    .await?;

    info!("Released {}/{}", course_code, assignment_code);
    Ok(ApiResponse::success("Released"))
}

/// Downloads the latest release of an assignment and appends a `fetched`
/// action crediting the requester.
#[instrument(skip(state, identity))]
pub async fn fetch_assignment(
    State(state): State<AppState>,
    identity: Identity,
    Query(params): Query<AssignmentParams>,
) -> Result<Response, AppError> {
    let (Some(course_code), Some(assignment_code)) = (params.course_id, params.assignment_id)
    else {
        let note = "Assigment call requires both a course code and an assignment code!!";
        info!("{note}");
        return Ok(ApiResponse::<()>::failure(note).into_response());
    };

    let user = identity.resolve(&state.pool).await?;
    info!(
        "Fetch of {}/{} by {}",
        course_code, assignment_code, user.name
    );

    if !user.subscribed_to(&course_code) {
        let note = format!("User not subscribed to course {course_code}");
        info!("{note}");
        return Ok(ApiResponse::<()>::failure(note).into_response());
    }

    let org_id = user.org_id;
    let user_id = user.id;
    let query_course = course_code.clone();
    let query_assignment = assignment_code.clone();
    let release = helper::run_query(&state.pool, move |conn_sync| {
        let Some(course) = helper::find_course(conn_sync, org_id, &query_course)? else {
            return Ok(FetchLookup::CourseMissing);
        };
        let Some(assignment) = helper::find_active_assignment_with_action(
            conn_sync,
            course.id,
            &query_assignment,
            ActionKind::Released,
        )?
        else {
            return Ok(FetchLookup::AssignmentMissing);
        };
        let release = helper::find_most_recent_action(
            conn_sync,
            assignment.id,
            Some(ActionKind::Released),
        )?
        .ok_or(diesel::result::Error::NotFound)?;
        Ok(FetchLookup::Found {
            assignment_id: assignment.id,
            location: release.location,
        })
    })
    .await?;

    let (assignment_id, location) = match release {
        FetchLookup::CourseMissing => {
            let note = format!("Course {course_code} does not exist");
            info!("{note}");
            return Ok(ApiResponse::<()>::failure(note).into_response());
        }
        FetchLookup::AssignmentMissing => {
            let note = format!("Assignment {assignment_code} does not exist");
            info!("{note}");
            return Ok(ApiResponse::<()>::failure(note).into_response());
        }
        FetchLookup::Found {
            assignment_id,
            location,
        } => (
            assignment_id,
            location.ok_or(diesel::result::Error::NotFound)?,
        ),
    };

    let data = state.store.read(&location)?;

    let fetch_location = location.clone();
    helper::run_query(&state.pool, move |conn_sync| {
        diesel::insert_into(actions_dsl::actions)
            .values(NewAction {
                user_id,
                assignment_id,
                action: ActionKind::Fetched,
                location: Some(fetch_location.clone()),
                checksum: None,
                timestamp: Utc::now(),
            })
            .execute(conn_sync)
    })
    .await?;

    debug!(
        "Serving {} bytes of {}/{} from {}",
        data.len(),
        course_code,
        assignment_code,
        location
    );
    Ok(([(header::CONTENT_TYPE, "application/gzip")], data).into_response())
}

enum FetchLookup {
    CourseMissing,
    AssignmentMissing,
    Found {
        assignment_id: i64,
        location: Option<String>,
    },
}

/// Unreleases an assignment (default) or, with `purge`, hard-deletes it and
/// its ledger. Instructors only.
///
/// Unrelease appends a `removed` action and flips the assignment inactive,
/// leaving the ledger intact. Purge removes every assignment row carrying the
/// code plus all attached notebooks, actions and feedback.
#[instrument(skip(state, identity))]
pub async fn delete_assignment(
    State(state): State<AppState>,
    identity: Identity,
    Query(params): Query<DeleteParams>,
) -> Result<ApiResponse<()>, AppError> {
    let (Some(course_code), Some(assignment_code)) = (params.course_id, params.assignment_id)
    else {
        let note = "Unreleasing an Assigment requires a course code and an assignment code";
        info!("{note}");
        return Ok(ApiResponse::failure(note));
    };
    let purge = params
        .purge
        .as_deref()
        .is_some_and(|value| value.eq_ignore_ascii_case("true") || value == "1");

    let user = identity.resolve(&state.pool).await?;
    info!(
        "Delete of {}/{} (purge: {}) by {}",
        course_code, assignment_code, purge, user.name
    );

    if !user.subscribed_to(&course_code) {
        let note = format!("User not subscribed to course {course_code}");
        info!("{note}");
        return Ok(ApiResponse::failure(note));
    }
    if !user.is_current_instructor() {
        let note = format!("User not an instructor to course {course_code}");
        info!("{note}");
        return Ok(ApiResponse::failure(note));
    }

    let org_id = user.org_id;
    let user_id = user.id;
    let query_course = course_code.clone();
    let query_assignment = assignment_code.clone();
    let outcome = helper::run_query(&state.pool, move |conn_sync| {
        let Some(course) = helper::find_course(conn_sync, org_id, &query_course)? else {
            return Ok(DeleteOutcome::CourseMissing);
        };
        let Some(assignment) =
            helper::find_active_assignment(conn_sync, course.id, &query_assignment)?
        else {
            return Ok(DeleteOutcome::AssignmentMissing);
        };

        if purge {
            conn_sync.transaction(|tx_conn| {
                let assignment_ids = assignments_dsl::assignments
                    .filter(assignments_dsl::course_id.eq(course.id))
                    .filter(assignments_dsl::assignment_code.eq(&query_assignment))
                    .select(assignments_dsl::id)
                    .load::<i64>(tx_conn)?;
                let notebook_ids = notebooks_dsl::notebooks
                    .filter(notebooks_dsl::assignment_id.eq_any(&assignment_ids))
                    .select(notebooks_dsl::id)
                    .load::<i64>(tx_conn)?;

                diesel::delete(
                    feedback_dsl::feedback.filter(feedback_dsl::notebook_id.eq_any(&notebook_ids)),
                )
                .execute(tx_conn)?;
                diesel::delete(
                    actions_dsl::actions.filter(actions_dsl::assignment_id.eq_any(&assignment_ids)),
                )
                .execute(tx_conn)?;
                diesel::delete(
                    notebooks_dsl::notebooks.filter(notebooks_dsl::id.eq_any(&notebook_ids)),
                )
                .execute(tx_conn)?;
                diesel::delete(
                    assignments_dsl::assignments.filter(assignments_dsl::id.eq_any(&assignment_ids)),
                )
                .execute(tx_conn)?;
                Ok(DeleteOutcome::Purged)
            })
        } else {
            conn_sync.transaction(|tx_conn| {
                diesel::insert_into(actions_dsl::actions)
                    .values(NewAction {
                        user_id,
                        assignment_id: assignment.id,
                        action: ActionKind::Removed,
                        location: None,
                        checksum: None,
                        timestamp: Utc::now(),
                    })
                    .execute(tx_conn)?;
                diesel::update(
                    assignments_dsl::assignments.filter(assignments_dsl::id.eq(assignment.id)),
                )
                .set(assignments_dsl::active.eq(false))
                .execute(tx_conn)?;
                Ok(DeleteOutcome::Unreleased)
            })
        }
    })
    .await?;

    let note = match outcome {
        DeleteOutcome::CourseMissing => {
            let note = format!("Course {course_code} does not exist");
            info!("{note}");
            return Ok(ApiResponse::failure(note));
        }
        DeleteOutcome::AssignmentMissing => {
            let note = format!("Assignment {assignment_code} does not exist");
            info!("{note}");
            return Ok(ApiResponse::failure(note));
        }
        DeleteOutcome::Unreleased => "Assignment unreleased",
        DeleteOutcome::Purged => "Assignment deleted and purged from the database",
    };
    info!("{note}");
    Ok(ApiResponse::success(note))
}

enum DeleteOutcome {
    CourseMissing,
    AssignmentMissing,
    Unreleased,
    Purged,
}

/// Pulls the upload and any `notebooks` text fields out of a multipart body.
///
/// An unreadable body or a missing file field is a precondition failure, kept
/// separate from the business-rule notes.
pub(super) async fn read_upload(
    request: Request,
    file_field: &str,
) -> Result<(String, Vec<String>, Bytes), AppError> {
    let mut multipart = Multipart::from_request(request, &()).await.map_err(|err| {
        warn!("Request body is not usable multipart: {err}");
        AppError::PreconditionFailed("No file supplied".to_string())
    })?;

    let mut notebooks = Vec::new();
    let mut upload: Option<(String, Bytes)> = None;
    while let Some(field) = multipart.next_field().await.map_err(|err| {
        warn!("Failed to read multipart field: {err}");
        AppError::PreconditionFailed("Upload could not be read".to_string())
    })? {
        let field_name = field.name().unwrap_or_default().to_string();
        if field_name == "notebooks" {
            let name = field.text().await.map_err(|err| {
                warn!("Failed to read notebooks field: {err}");
                AppError::PreconditionFailed("Upload could not be read".to_string())
            })?;
            notebooks.push(name);
        } else if field_name == file_field {
            let filename = field
                .file_name()
                .unwrap_or("assignment.tar.gz")
                .to_string();
            let body = field.bytes().await.map_err(|err| {
                warn!("Failed to read uploaded file: {err}");
                AppError::PreconditionFailed("Upload could not be read".to_string())
            })?;
            debug!("Received file {} ({} bytes)", filename, body.len());
            upload = Some((filename, body));
        }
    }

    let Some((filename, body)) = upload else {
        info!("Upload is missing the {file_field} file field");
        return Err(AppError::PreconditionFailed("No file supplied".to_string()));
    };
    Ok((filename, notebooks, body))
}
