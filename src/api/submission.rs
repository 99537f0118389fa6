use super::assignment::read_upload;
use super::helper;
use crate::AppState;
use crate::errors::AppError;
use crate::identity::Identity;
use crate::model::exchange::{ActionKind, NewAction};
use crate::payloads::exchange::SubmissionParams;
use crate::response::ApiResponse;
use crate::schema::actions::dsl as actions_dsl;
use axum::extract::{Query, Request, State};
use chrono::Utc;
use diesel::prelude::*;
use tracing::{info, instrument, warn};

/// Stores a student's submission and appends a `submitted` action.
///
/// The assignment must have been released. A client-supplied `timestamp`
/// query parameter becomes the action's event time and the key feedback is
/// correlated against; without one the server clock is used.
#[instrument(skip(state, identity, request))]
pub async fn submit_assignment(
    State(state): State<AppState>,
    identity: Identity,
    Query(params): Query<SubmissionParams>,
    request: Request,
) -> Result<ApiResponse<()>, AppError> {
    let (Some(course_code), Some(assignment_code)) = (params.course_id, params.assignment_id)
    else {
        let note = "Submission call requires both a course code and an assignment code";
        info!("{note}");
        return Ok(ApiResponse::failure(note));
    };

    let user = identity.resolve(&state.pool).await?;
    info!(
        "Submission to {}/{} by {}",
        course_code, assignment_code, user.name
    );

    if !user.subscribed_to(&course_code) {
        let note = format!("User not subscribed to course {course_code}");
        info!("{note}");
        return Ok(ApiResponse::failure(note));
    }

    let org_id = user.org_id;
    let user_id = user.id;
    let username = user.name.clone();
    let query_course = course_code.clone();
    let query_assignment = assignment_code.clone();
    let gate = helper::run_query(&state.pool, move |conn_sync| {
        let Some(course) = helper::find_course(conn_sync, org_id, &query_course)? else {
            return Ok(SubmitGate::CourseMissing);
        };
        match helper::find_active_assignment_with_action(
            conn_sync,
            course.id,
            &query_assignment,
            ActionKind::Released,
        )? {
            Some(assignment) => Ok(SubmitGate::Ready {
                assignment_id: assignment.id,
            }),
            None => Ok(SubmitGate::NotReleased),
        }
    })
    .await?;

    let assignment_id = match gate {
        SubmitGate::CourseMissing => {
            let note = format!("Course {course_code} does not exist");
            info!("{note}");
            return Ok(ApiResponse::failure(note));
        }
        SubmitGate::NotReleased => {
            let note = format!("User not fetched assignment {assignment_code}");
            info!("{note}");
            return Ok(ApiResponse::failure(note));
        }
        SubmitGate::Ready { assignment_id } => assignment_id,
    };

    let (filename, _notebooks, body) = read_upload(request, "assignment").await?;

    let timestamp = match params.timestamp.as_deref() {
        Some(raw) => match helper::parse_client_timestamp(raw) {
            Some(parsed) => parsed,
            None => {
                warn!("Unparseable submission timestamp {raw:?}, using server time");
                Utc::now()
            }
        },
        None => Utc::now(),
    };

    let path = state.store.submission_path(
        org_id,
        &course_code,
        &assignment_code,
        &username,
        &filename,
    );
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
                assignment_id,
                action: ActionKind::Submitted,
                location: Some(location.clone()),
                checksum: None,
                timestamp,
            })
            .execute(conn_sync)
    })
    .await?;

    info!("Submitted {}/{} for {}", course_code, assignment_code, username);
    Ok(ApiResponse::success("Submitted"))
}

enum SubmitGate {
    CourseMissing,
    NotReleased,
    Ready { assignment_id: i64 },
}
