use crate::model::exchange::ActionKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Deserialize, Debug)]
pub struct ListParams {
    pub course_id: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct AssignmentParams {
    pub course_id: Option<String>,
    pub assignment_id: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct DeleteParams {
    pub course_id: Option<String>,
    pub assignment_id: Option<String>,
    pub purge: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct SubmissionParams {
    pub course_id: Option<String>,
    pub assignment_id: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct CollectionsParams {
    pub course_id: Option<String>,
    pub assignment_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct CollectionParams {
    pub course_id: Option<String>,
    pub assignment_id: Option<String>,
    pub path: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct FeedbackGetParams {
    pub course_id: Option<String>,
    pub assignment_id: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct FeedbackPostParams {
    pub course_id: Option<String>,
    pub assignment_id: Option<String>,
    pub notebook: Option<String>,
    pub student: Option<String>,
    pub timestamp: Option<String>,
    pub checksum: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct HistoryParams {
    pub course_code: Option<String>,
    pub action: Option<String>,
}

/// Per-notebook feedback annotation on an assignment list entry.
///
/// `feedback_timestamp` is serialised even when null; clients key off its
/// presence.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NotebookAnnotation {
    pub notebook_id: String,
    pub has_exchange_feedback: bool,
    pub feedback_updated: bool,
    pub feedback_timestamp: Option<String>,
}

/// One ledger entry as seen through `GET /assignments`.
#[derive(Serialize, Deserialize, Debug)]
pub struct AssignmentEntry {
    pub assignment_id: String,
    pub course_id: String,
    pub student_id: i64,
    pub status: ActionKind,
    pub path: Option<String>,
    pub notebooks: Vec<NotebookAnnotation>,
    pub timestamp: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CollectionNotebook {
    pub notebook_id: String,
}

/// One submission as seen through `GET /collections`.
#[derive(Serialize, Deserialize, Debug)]
pub struct CollectionEntry {
    pub student_id: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub lms_user_id: Option<String>,
    pub assignment_id: String,
    pub course_id: String,
    pub status: ActionKind,
    pub path: Option<String>,
    pub notebooks: Vec<CollectionNotebook>,
    pub timestamp: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HistoryAction {
    pub action: String,
    pub timestamp: String,
    pub user: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HistoryAssignment {
    pub assignment_id: i64,
    pub assignment_code: String,
    pub actions: Vec<HistoryAction>,
    pub action_summary: HashMap<String, i64>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HistoryCourse {
    pub course_id: i64,
    pub course_code: String,
    pub course_title: String,
    pub role: HashMap<String, i32>,
    pub user_id: HashMap<String, i32>,
    #[serde(rename = "isInstructor")]
    pub is_instructor: bool,
    pub assignments: Vec<HistoryAssignment>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct FeedbackDocument {
    pub content: String,
    pub filename: String,
    pub timestamp: String,
    pub checksum: Option<String>,
}

/// Envelope for `GET /feedback`, which historically keys its payload under
/// `feedback` rather than `value`.
#[derive(Serialize, Deserialize, Debug)]
pub struct FeedbackList {
    pub success: bool,
    pub feedback: Vec<FeedbackDocument>,
}
