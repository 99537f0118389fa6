use super::assignment::read_upload;
use super::helper;
use crate::AppState;
use crate::errors::AppError;
use crate::identity::Identity;
use crate::model::exchange::{
    ActionKind, Assignment, Feedback, NewAction, NewFeedback, Notebook, User,
};
use crate::payloads::exchange::{
    FeedbackDocument, FeedbackGetParams, FeedbackList, FeedbackPostParams,
};
use crate::response::ApiResponse;
use crate::schema::{
    actions::dsl as actions_dsl, assignments::dsl as assignments_dsl,
    courses::dsl as courses_dsl, feedback::dsl as feedback_dsl, notebooks::dsl as notebooks_dsl,
    users::dsl as users_dsl,
};
use axum::Json;
use axum::extract::{Query, Request, State};
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use tracing::{debug, info, instrument, warn};

/// Returns every feedback document graded for the requester on an
/// assignment, bodies base64-encoded, and appends one `feedback_fetched`
/// action per document handed out.
#[instrument(skip(state, identity))]
pub async fn fetch_feedback(
    State(state): State<AppState>,
    identity: Identity,
    Query(params): Query<FeedbackGetParams>,
) -> Result<Response, AppError> {
    let (Some(course_code), Some(assignment_code)) = (params.course_id, params.assignment_id)
    else {
        let note = "Feedback call requires an assignment id and a course id";
        info!("{note}");
        return Ok(ApiResponse::<()>::failure(note).into_response());
    };

    let user = identity.resolve(&state.pool).await?;
    debug!(
        "Checking for feedback for {} on {}",
        assignment_code, course_code
    );

    let org_id = user.org_id;
    let user_id = user.id;
    let query_course = course_code.clone();
    let query_assignment = assignment_code.clone();
    let lookup = helper::run_query(&state.pool, move |conn_sync| {
        let assignment = assignments_dsl::assignments
            .inner_join(courses_dsl::courses)
            .filter(assignments_dsl::assignment_code.eq(query_assignment))
            .filter(assignments_dsl::active.eq(true))
            .filter(courses_dsl::course_code.eq(query_course))
            .filter(courses_dsl::org_id.eq(org_id))
            .order(assignments_dsl::id.desc())
            .select((
                assignments_dsl::id,
                assignments_dsl::course_id,
                assignments_dsl::assignment_code,
                assignments_dsl::active,
            ))
            .first::<Assignment>(conn_sync)
            .optional()?;
        let Some(assignment) = assignment else {
            return Ok(None);
        };

        let rows = feedback_dsl::feedback
            .inner_join(notebooks_dsl::notebooks)
            .filter(feedback_dsl::student_id.eq(user_id))
            .filter(notebooks_dsl::assignment_id.eq(assignment.id))
            .order(feedback_dsl::id.asc())
            .load::<(Feedback, Notebook)>(conn_sync)?;

        let records = rows
            .into_iter()
            .filter_map(|(row, notebook)| {
                // A row without a stored document has nothing to serve.
                row.location.map(|location| FeedbackRecord {
                    location,
                    checksum: row.checksum,
                    timestamp: row.timestamp,
                    filename: format!("{}.html", notebook.name),
                })
            })
            .collect::<Vec<_>>();
        Ok(Some((assignment.id, records)))
    })
    .await?;

    let Some((assignment_id, records)) = lookup else {
        info!(
            "No active assignment {} on {} for feedback fetch",
            assignment_code, course_code
        );
        return Err(AppError::NotFound(
            "Could not find requested resource".to_string(),
        ));
    };

    let mut documents = Vec::with_capacity(records.len());
    for record in &records {
        let data = state.store.read(&record.location)?;
        documents.push(FeedbackDocument {
            content: STANDARD.encode(&data),
            filename: record.filename.clone(),
            timestamp: helper::canonical_timestamp(record.timestamp),
            checksum: record.checksum.clone(),
        });
    }

    if !records.is_empty() {
        let fetch_actions: Vec<NewAction> = records
            .iter()
            .map(|_| NewAction {
                user_id,
                assignment_id,
                action: ActionKind::FeedbackFetched,
                location: None,
                checksum: None,
                timestamp: Utc::now(),
            })
            .collect();
        helper::run_query(&state.pool, move |conn_sync| {
            diesel::insert_into(actions_dsl::actions)
                .values(&fetch_actions)
                .execute(conn_sync)
        })
        .await?;
    }

    info!(
        "Handing {} feedback document(s) for {}/{} to {}",
        documents.len(),
        course_code,
        assignment_code,
        user.name
    );
    Ok(Json(FeedbackList {
        success: true,
        feedback: documents,
    })
    .into_response())
}

struct FeedbackRecord {
    location: String,
    checksum: Option<String>,
    timestamp: DateTime<Utc>,
    filename: String,
}

/// Stores a graded notebook for one student and appends a
/// `feedback_released` action. Instructors only.
///
/// The client-supplied `timestamp` names the submission being graded; the
/// assignment list correlates on it, so it is stored verbatim on the feedback
/// row.
#[instrument(skip(state, identity, request))]
pub async fn release_feedback(
    State(state): State<AppState>,
    identity: Identity,
    Query(params): Query<FeedbackPostParams>,
    request: Request,
) -> Result<ApiResponse<()>, AppError> {
    let (
        Some(course_code),
        Some(assignment_code),
        Some(notebook_name),
        Some(student_name),
        Some(raw_timestamp),
        Some(checksum),
    ) = (
        params.course_id,
        params.assignment_id,
        params.notebook,
        params.student,
        params.timestamp,
        params.checksum,
    )
    else {
        let note = "Feedback call requires a course id, assignment id, notebook name, student id, checksum and timestamp.";
        debug!("{note}");
        return Ok(ApiResponse::failure(note));
    };

    let user = identity.resolve(&state.pool).await?;
    info!(
        "Feedback upload for {} / {} on {}/{} by {}",
        notebook_name, student_name, course_code, assignment_code, user.name
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
    let instructor_id = user.id;
    let query_course = course_code.clone();
    let query_assignment = assignment_code.clone();
    let query_notebook = notebook_name.clone();
    let query_student = student_name.clone();
    let target = helper::run_query(&state.pool, move |conn_sync| {
        let Some(course) = helper::find_course(conn_sync, org_id, &query_course)? else {
            return Ok(FeedbackTarget::CourseMissing);
        };
        let Some(assignment) =
            helper::find_active_assignment(conn_sync, course.id, &query_assignment)?
        else {
            return Ok(FeedbackTarget::AssignmentMissing);
        };
        let notebook = notebooks_dsl::notebooks
            .filter(notebooks_dsl::name.eq(query_notebook))
            .filter(notebooks_dsl::assignment_id.eq(assignment.id))
            .first::<Notebook>(conn_sync)
            .optional()?;
        let Some(notebook) = notebook else {
            return Ok(FeedbackTarget::NotebookMissing);
        };
        let student = users_dsl::users
            .filter(users_dsl::name.eq(query_student))
            .first::<User>(conn_sync)
            .optional()?;
        match student {
            Some(student) => Ok(FeedbackTarget::Found {
                assignment_id: assignment.id,
                notebook_id: notebook.id,
                student_id: student.id,
            }),
            None => Ok(FeedbackTarget::StudentMissing),
        }
    })
    .await?;

    let (assignment_id, notebook_id, student_id) = match target {
        FeedbackTarget::CourseMissing => {
            let note = format!("Could not find requested resource course {course_code}");
            info!("{note}");
            return Err(AppError::NotFound(note));
        }
        FeedbackTarget::AssignmentMissing => {
            let note = format!("Could not find requested resource assignment {assignment_code}");
            info!("{note}");
            return Err(AppError::NotFound(note));
        }
        FeedbackTarget::NotebookMissing => {
            let note = format!("Could not find requested resource notebook {notebook_name}");
            info!("{note}");
            return Err(AppError::NotFound(note));
        }
        FeedbackTarget::StudentMissing => {
            let note = format!("Could not find requested resource student {student_name}");
            info!("{note}");
            return Err(AppError::NotFound(note));
        }
        FeedbackTarget::Found {
            assignment_id,
            notebook_id,
            student_id,
        } => (assignment_id, notebook_id, student_id),
    };

    let (_filename, _notebooks, body) = read_upload(request, "feedback").await?;

    // No size cap on feedback documents.
    let path = state
        .store
        .feedback_path(org_id, &course_code, &assignment_code, &checksum);
    state.store.write(&path, &body)?;
    let location = path.display().to_string();

    let timestamp = match helper::parse_client_timestamp(&raw_timestamp) {
        Some(parsed) => parsed,
        None => {
            warn!("Unparseable feedback timestamp {raw_timestamp:?}, using server time");
            Utc::now()
        }
    };

    helper::run_query(&state.pool, move |conn_sync| {
        conn_sync.transaction(|tx_conn| {
            diesel::insert_into(feedback_dsl::feedback)
                .values(NewFeedback {
                    notebook_id,
                    instructor_id,
                    student_id,
                    location: Some(location.clone()),
                    checksum: Some(checksum.clone()),
                    timestamp,
                })
                .execute(tx_conn)?;
            diesel::insert_into(actions_dsl::actions)
                .values(NewAction {
                    user_id: instructor_id,
                    assignment_id,
                    action: ActionKind::FeedbackReleased,
                    location: Some(location.clone()),
                    checksum: None,
                    timestamp: Utc::now(),
                })
                .execute(tx_conn)
        })
    })
    .await?;

    info!(
        "Feedback released for {} / {} on {}/{}",
        notebook_name, student_name, course_code, assignment_code
    );
    Ok(ApiResponse::success("Feedback released"))
}

enum FeedbackTarget {
    CourseMissing,
    AssignmentMissing,
    NotebookMissing,
    StudentMissing,
    Found {
        assignment_id: i64,
        notebook_id: i64,
        student_id: i64,
    },
}
