use super::helper;
use crate::AppState;
use crate::errors::AppError;
use crate::identity::Identity;
use crate::model::exchange::{ActionKind, NewAction};
use crate::payloads::exchange::{CollectionEntry, CollectionParams, CollectionsParams};
use crate::response::ApiResponse;
use crate::schema::{actions::dsl as actions_dsl, assignments::dsl as assignments_dsl};
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use diesel::prelude::*;
use tracing::{info, instrument};

/// Lists the `submitted` actions on an assignment, one entry per submission,
/// joined with the submitter's profile. Instructors only.
#[instrument(skip(state, identity))]
pub async fn list_collections(
    State(state): State<AppState>,
    identity: Identity,
    Query(params): Query<CollectionsParams>,
) -> Result<ApiResponse<Vec<CollectionEntry>>, AppError> {
    let (Some(course_code), Some(assignment_code)) = (params.course_id, params.assignment_id)
    else {
        let note = "Collections call requires both a course code and an assignment code";
        info!("{note}");
        return Ok(ApiResponse::failure(note));
    };

    let user = identity.resolve(&state.pool).await?;
    info!(
        "Collections for {}/{} requested by {}",
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

    let org_id = user.org_id;
    let query_course = course_code.clone();
    let query_assignment = assignment_code;
    let username_filter = params.user_id;
    let entries = helper::run_query(&state.pool, move |conn_sync| {
        let Some(course) = helper::find_course(conn_sync, org_id, &query_course)? else {
            return Ok(None);
        };
        let Some(assignment) = helper::find_active_assignment_with_action(
            conn_sync,
            course.id,
            &query_assignment,
            ActionKind::Submitted,
        )?
        else {
            // Nothing submitted yet is not an error.
            return Ok(Some(Vec::new()));
        };
        helper::build_collection_list(
            conn_sync,
            &course,
            &assignment,
            username_filter.as_deref(),
        )
        .map(Some)
    })
    .await?;

    match entries {
        Some(entries) => Ok(ApiResponse::ok(entries)),
        None => {
            let note = format!("Course {course_code} does not exist");
            info!("{note}");
            Ok(ApiResponse::failure(note))
        }
    }
}

/// Streams one submitted artifact back to an instructor and appends a
/// `collected` action for it. The path must belong to a `submitted` action on
/// the course; an unknown path yields an empty body rather than an error.
#[instrument(skip(state, identity))]
pub async fn download_collection(
    State(state): State<AppState>,
    identity: Identity,
    Query(params): Query<CollectionParams>,
) -> Result<Response, AppError> {
    let (Some(course_code), Some(assignment_code), Some(path)) =
        (params.course_id, params.assignment_id, params.path)
    else {
        let note = "Collection call requires a course code, an assignment code, and a path";
        info!("{note}");
        return Ok(ApiResponse::<()>::failure(note).into_response());
    };

    let user = identity.resolve(&state.pool).await?;
    info!(
        "Collection of {} from {}/{} by {}",
        path, course_code, assignment_code, user.name
    );

    if !user.subscribed_to(&course_code) {
        let note = format!("User not subscribed to course {course_code}");
        info!("{note}");
        return Ok(ApiResponse::<()>::failure(note).into_response());
    }
    if !user.is_current_instructor() {
        let note = format!("User not an instructor to course {course_code}");
        info!("{note}");
        return Ok(ApiResponse::<()>::failure(note).into_response());
    }

    let org_id = user.org_id;
    let query_course = course_code.clone();
    let query_path = path.clone();
    let lookup = helper::run_query(&state.pool, move |conn_sync| {
        let Some(course) = helper::find_course(conn_sync, org_id, &query_course)? else {
            return Ok(CollectLookup::CourseMissing);
        };
        let assignment_id = actions_dsl::actions
            .inner_join(assignments_dsl::assignments)
            .filter(assignments_dsl::course_id.eq(course.id))
            .filter(actions_dsl::action.eq(ActionKind::Submitted))
            .filter(actions_dsl::location.eq(query_path))
            .select(assignments_dsl::id)
            .first::<i64>(conn_sync)
            .optional()?;
        match assignment_id {
            Some(assignment_id) => Ok(CollectLookup::Found { assignment_id }),
            None => Ok(CollectLookup::NoMatch),
        }
    })
    .await?;

    let assignment_id = match lookup {
        CollectLookup::CourseMissing => {
            let note = format!("Course {course_code} does not exist");
            info!("{note}");
            return Ok(ApiResponse::<()>::failure(note).into_response());
        }
        CollectLookup::NoMatch => {
            // Matches nothing we handed out.
            return Ok((
                [(header::CONTENT_TYPE, "application/gzip")],
                Vec::<u8>::new(),
            )
                .into_response());
        }
        CollectLookup::Found { assignment_id } => assignment_id,
    };

    let data = state.store.read(&path)?;

    let user_id = user.id;
    let location = path.clone();
    helper::run_query(&state.pool, move |conn_sync| {
        diesel::insert_into(actions_dsl::actions)
            .values(NewAction {
                user_id,
                assignment_id,
                action: ActionKind::Collected,
                location: Some(location.clone()),
                checksum: None,
                timestamp: Utc::now(),
            })
            .execute(conn_sync)
    })
    .await?;

    info!("Collected {} from assignment {}", path, assignment_id);
    Ok(([(header::CONTENT_TYPE, "application/gzip")], data).into_response())
}

enum CollectLookup {
    CourseMissing,
    NoMatch,
    Found { assignment_id: i64 },
}
