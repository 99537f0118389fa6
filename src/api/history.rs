use super::helper;
use crate::AppState;
use crate::errors::AppError;
use crate::identity::Identity;
use crate::model::exchange::ActionKind;
use crate::payloads::exchange::{HistoryCourse, HistoryParams};
use crate::response::ApiResponse;
use axum::extract::{Query, State};
use tracing::{info, instrument};

/// Audit view over the requester's courses: roles held, active assignments,
/// and every ledger entry they are entitled to see, optionally narrowed to
/// one course code or one action kind.
#[instrument(skip(state, identity))]
pub async fn view_history(
    State(state): State<AppState>,
    identity: Identity,
    Query(params): Query<HistoryParams>,
) -> Result<ApiResponse<Vec<HistoryCourse>>, AppError> {
    let action_filter = match params.action.as_deref() {
        Some(label) => match ActionKind::parse(label) {
            Some(kind) => Some(kind),
            None => {
                let note = format!("{label} is not a valid assignment action.");
                info!("{note}");
                return Ok(ApiResponse::failure(note));
            }
        },
        None => None,
    };

    let user = identity.resolve(&state.pool).await?;
    info!("History requested by {}", user.name);

    let course_code_filter = params.course_code;
    let courses = helper::run_query(&state.pool, move |conn_sync| {
        helper::build_history(
            conn_sync,
            &user,
            action_filter,
            course_code_filter.as_deref(),
        )
    })
    .await?;

    Ok(ApiResponse::ok(courses))
}
