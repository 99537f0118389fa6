use crate::errors::AppError;
use crate::identity::CurrentUser;
use crate::model::exchange::{
    Action, ActionKind, Assignment, Course, Feedback, Notebook, Subscription, User,
};
use crate::payloads::exchange::{
    AssignmentEntry, CollectionEntry, CollectionNotebook, HistoryAction, HistoryAssignment,
    HistoryCourse, NotebookAnnotation,
};
use crate::schema::{
    actions::dsl as actions_dsl, assignments::dsl as assignments_dsl,
    courses::dsl as courses_dsl, feedback::dsl as feedback_dsl, notebooks::dsl as notebooks_dsl,
    subscriptions::dsl as subscriptions_dsl, users::dsl as users_dsl,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use deadpool_diesel::postgres::Pool;
use diesel::PgConnection;
use diesel::prelude::*;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Wire format for every timestamp the service emits.
pub(super) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f %Z";

pub(super) fn canonical_timestamp(value: DateTime<Utc>) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a client-supplied timestamp.
///
/// Clients have historically sent RFC 3339, offset-suffixed, and
/// zone-name-suffixed shapes. `%Z` carries no offset information, so those
/// values are taken as UTC.
pub(super) fn parse_client_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f %z") {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f %Z") {
        return Some(parsed.and_utc());
    }
    None
}

pub(super) async fn run_query<T, F>(pool: &Pool, query: F) -> Result<T, AppError>
where
    F: FnOnce(&mut PgConnection) -> Result<T, diesel::result::Error> + Send + 'static,
    T: Send + 'static,
{
    let conn = pool.get().await?;
    debug!("DB connection object obtained from pool for interaction");
    Ok(conn.interact(query).await??)
}

pub(super) fn find_course(
    conn_sync: &mut PgConnection,
    org_id: i32,
    course_code: &str,
) -> Result<Option<Course>, diesel::result::Error> {
    courses_dsl::courses
        .filter(courses_dsl::org_id.eq(org_id))
        .filter(courses_dsl::course_code.eq(course_code))
        .first::<Course>(conn_sync)
        .optional()
}

/// Latest active assignment row for a code. Unrelease leaves inactive rows
/// with the same code behind, so lookups pin `active` and take the newest.
pub(super) fn find_active_assignment(
    conn_sync: &mut PgConnection,
    course_id: i64,
    assignment_code: &str,
) -> Result<Option<Assignment>, diesel::result::Error> {
    assignments_dsl::assignments
        .filter(assignments_dsl::course_id.eq(course_id))
        .filter(assignments_dsl::assignment_code.eq(assignment_code))
        .filter(assignments_dsl::active.eq(true))
        .order(assignments_dsl::id.desc())
        .first::<Assignment>(conn_sync)
        .optional()
}

/// As [`find_active_assignment`], but only when the assignment's ledger
/// contains at least one action of the given kind.
pub(super) fn find_active_assignment_with_action(
    conn_sync: &mut PgConnection,
    course_id: i64,
    assignment_code: &str,
    kind: ActionKind,
) -> Result<Option<Assignment>, diesel::result::Error> {
    assignments_dsl::assignments
        .inner_join(actions_dsl::actions)
        .filter(assignments_dsl::course_id.eq(course_id))
        .filter(assignments_dsl::assignment_code.eq(assignment_code))
        .filter(assignments_dsl::active.eq(true))
        .filter(actions_dsl::action.eq(kind))
        .order(assignments_dsl::id.desc())
        .select((
            assignments_dsl::id,
            assignments_dsl::course_id,
            assignments_dsl::assignment_code,
            assignments_dsl::active,
        ))
        .first::<Assignment>(conn_sync)
        .optional()
}

pub(super) fn find_most_recent_action(
    conn_sync: &mut PgConnection,
    assignment_id: i64,
    kind: Option<ActionKind>,
) -> Result<Option<Action>, diesel::result::Error> {
    let mut query = actions_dsl::actions
        .filter(actions_dsl::assignment_id.eq(assignment_id))
        .into_boxed();
    if let Some(kind) = kind {
        query = query.filter(actions_dsl::action.eq(kind));
    }
    query
        .order(actions_dsl::id.desc())
        .first::<Action>(conn_sync)
        .optional()
}

/// Assignment List reconstruction: one entry per visible ledger action.
///
/// Students see `released` actions and their own; a requester holding an
/// instructor subscription on the course sees everything. Assignments are
/// walked newest first, each assignment's ledger in insertion order.
pub(super) fn build_assignment_list(
    conn_sync: &mut PgConnection,
    requester: &CurrentUser,
    course: &Course,
) -> Result<Vec<AssignmentEntry>, diesel::result::Error> {
    let assignment_rows = assignments_dsl::assignments
        .filter(assignments_dsl::course_id.eq(course.id))
        .filter(assignments_dsl::active.eq(true))
        .order(assignments_dsl::id.desc())
        .load::<Assignment>(conn_sync)?;

    let is_instructor = requester.instructor_on(&course.course_code);

    let mut entries = Vec::new();
    for assignment in assignment_rows {
        let notebook_rows = notebooks_dsl::notebooks
            .filter(notebooks_dsl::assignment_id.eq(assignment.id))
            .order(notebooks_dsl::id.asc())
            .load::<Notebook>(conn_sync)?;

        let action_rows = actions_dsl::actions
            .filter(actions_dsl::assignment_id.eq(assignment.id))
            .order(actions_dsl::id.asc())
            .load::<Action>(conn_sync)?;

        // Feedback per (notebook, student), newest first.
        let feedback_rows = feedback_dsl::feedback
            .inner_join(notebooks_dsl::notebooks)
            .filter(notebooks_dsl::assignment_id.eq(assignment.id))
            .order((feedback_dsl::timestamp.desc(), feedback_dsl::id.desc()))
            .select((
                feedback_dsl::id,
                feedback_dsl::notebook_id,
                feedback_dsl::instructor_id,
                feedback_dsl::student_id,
                feedback_dsl::location,
                feedback_dsl::checksum,
                feedback_dsl::timestamp,
                feedback_dsl::created_at,
            ))
            .load::<Feedback>(conn_sync)?;

        let mut feedback_by_key: HashMap<(i64, i64), Vec<Feedback>> = HashMap::new();
        for row in feedback_rows {
            feedback_by_key
                .entry((row.notebook_id, row.student_id))
                .or_default()
                .push(row);
        }

        // Every submission timestamp per student, the correlation universe.
        let mut submitted_stamps: HashMap<i64, Vec<String>> = HashMap::new();
        for action in &action_rows {
            if action.action == ActionKind::Submitted {
                submitted_stamps
                    .entry(action.user_id)
                    .or_default()
                    .push(canonical_timestamp(action.timestamp));
            }
        }

        for action in &action_rows {
            let included = action.action == ActionKind::Released
                || action.user_id == requester.id
                || is_instructor;
            if !included {
                continue;
            }

            let notebooks = if action.action == ActionKind::Submitted {
                annotate_submission(action, &notebook_rows, &feedback_by_key, &submitted_stamps)
            } else {
                notebook_rows
                    .iter()
                    .map(|notebook| NotebookAnnotation {
                        notebook_id: notebook.name.clone(),
                        has_exchange_feedback: false,
                        feedback_updated: false,
                        feedback_timestamp: None,
                    })
                    .collect()
            };

            entries.push(AssignmentEntry {
                assignment_id: assignment.assignment_code.clone(),
                course_id: course.course_code.clone(),
                student_id: action.user_id,
                status: action.action,
                path: action.location.clone(),
                notebooks,
                timestamp: canonical_timestamp(action.timestamp),
            });
        }
    }
    Ok(entries)
}

/// Correlates a `submitted` entry with released feedback, per notebook.
///
/// A feedback row whose timestamp string-matches the submission's is an exact
/// hit. Failing that, the newest feedback for the pair decides: if its
/// timestamp belongs to some other submission by the same student it is not
/// ours, otherwise it matches no submission at all and every entry collapses
/// onto it.
fn annotate_submission(
    action: &Action,
    notebook_rows: &[Notebook],
    feedback_by_key: &HashMap<(i64, i64), Vec<Feedback>>,
    submitted_stamps: &HashMap<i64, Vec<String>>,
) -> Vec<NotebookAnnotation> {
    let submitted_stamp = canonical_timestamp(action.timestamp);
    let own_stamps = submitted_stamps.get(&action.user_id);

    notebook_rows
        .iter()
        .map(|notebook| {
            let rows = feedback_by_key.get(&(notebook.id, action.user_id));

            let exact = rows.and_then(|rows| {
                rows.iter()
                    .find(|row| canonical_timestamp(row.timestamp) == submitted_stamp)
            });
            if exact.is_some() {
                return NotebookAnnotation {
                    notebook_id: notebook.name.clone(),
                    has_exchange_feedback: true,
                    feedback_updated: false,
                    feedback_timestamp: Some(submitted_stamp.clone()),
                };
            }

            let fallback = rows.and_then(|rows| rows.first()).and_then(|newest| {
                let newest_stamp = canonical_timestamp(newest.timestamp);
                let claimed = own_stamps.is_some_and(|stamps| stamps.contains(&newest_stamp));
                // Claimed by a different submission: not ours. Orphaned:
                // every submission reports it.
                if claimed { None } else { Some(newest_stamp) }
            });

            match fallback {
                Some(stamp) => NotebookAnnotation {
                    notebook_id: notebook.name.clone(),
                    has_exchange_feedback: true,
                    feedback_updated: false,
                    feedback_timestamp: Some(stamp),
                },
                None => NotebookAnnotation {
                    notebook_id: notebook.name.clone(),
                    has_exchange_feedback: false,
                    feedback_updated: false,
                    feedback_timestamp: None,
                },
            }
        })
        .collect()
}

/// Collection List reconstruction: every `submitted` action on the
/// assignment, joined with the submitter's profile, in insertion order.
pub(super) fn build_collection_list(
    conn_sync: &mut PgConnection,
    course: &Course,
    assignment: &Assignment,
    username_filter: Option<&str>,
) -> Result<Vec<CollectionEntry>, diesel::result::Error> {
    let mut query = actions_dsl::actions
        .inner_join(users_dsl::users)
        .filter(actions_dsl::assignment_id.eq(assignment.id))
        .filter(actions_dsl::action.eq(ActionKind::Submitted))
        .into_boxed();
    if let Some(username) = username_filter {
        query = query.filter(users_dsl::name.eq(username.to_string()));
    }
    let rows = query
        .order(actions_dsl::id.asc())
        .load::<(Action, User)>(conn_sync)?;

    let notebook_rows = notebooks_dsl::notebooks
        .filter(notebooks_dsl::assignment_id.eq(assignment.id))
        .order(notebooks_dsl::id.asc())
        .load::<Notebook>(conn_sync)?;

    let entries = rows
        .into_iter()
        .map(|(action, user)| CollectionEntry {
            student_id: user.name,
            full_name: user.full_name,
            email: user.email,
            lms_user_id: user.lms_user_id,
            assignment_id: assignment.assignment_code.clone(),
            course_id: course.course_code.clone(),
            status: action.action,
            path: action.location,
            notebooks: notebook_rows
                .iter()
                .map(|notebook| CollectionNotebook {
                    notebook_id: notebook.name.clone(),
                })
                .collect(),
            timestamp: canonical_timestamp(action.timestamp),
        })
        .collect();
    Ok(entries)
}

/// History reconstruction: per subscribed course, the union of the
/// requester's roles plus every visible action of every active assignment.
pub(super) fn build_history(
    conn_sync: &mut PgConnection,
    requester: &CurrentUser,
    action_filter: Option<ActionKind>,
    course_code_filter: Option<&str>,
) -> Result<Vec<HistoryCourse>, diesel::result::Error> {
    let subscription_rows = subscriptions_dsl::subscriptions
        .inner_join(courses_dsl::courses)
        .filter(subscriptions_dsl::user_id.eq(requester.id))
        .load::<(Subscription, Course)>(conn_sync)?;

    // BTreeMap keyed on course id keeps the output sorted.
    let mut by_course: BTreeMap<i64, HistoryCourse> = BTreeMap::new();
    for (subscription, course) in subscription_rows {
        if let Some(filter) = course_code_filter {
            if course.course_code != filter {
                continue;
            }
        }
        let entry = by_course.entry(course.id).or_insert_with(|| HistoryCourse {
            course_id: course.id,
            course_code: course.course_code.clone(),
            course_title: course.course_title.clone(),
            role: HashMap::new(),
            user_id: HashMap::from([(requester.id.to_string(), 1)]),
            is_instructor: false,
            assignments: Vec::new(),
        });
        entry.role.insert(subscription.role.clone(), 1);
        if subscription.role.eq_ignore_ascii_case("instructor") {
            entry.is_instructor = true;
        }
    }

    for entry in by_course.values_mut() {
        let assignment_rows = assignments_dsl::assignments
            .filter(assignments_dsl::course_id.eq(entry.course_id))
            .filter(assignments_dsl::active.eq(true))
            .order(assignments_dsl::id.asc())
            .load::<Assignment>(conn_sync)?;

        for assignment in assignment_rows {
            let action_rows = actions_dsl::actions
                .inner_join(users_dsl::users)
                .filter(actions_dsl::assignment_id.eq(assignment.id))
                .order(actions_dsl::id.asc())
                .load::<(Action, User)>(conn_sync)?;

            let mut history_actions = Vec::new();
            let mut summary: HashMap<String, i64> = HashMap::new();
            for (action, user) in action_rows {
                let included = action.action == ActionKind::Released
                    || action.user_id == requester.id
                    || entry.is_instructor;
                if !included {
                    continue;
                }
                if let Some(filter) = action_filter {
                    if action.action != filter {
                        continue;
                    }
                }
                *summary
                    .entry(action.action.as_str().to_string())
                    .or_insert(0) += 1;
                history_actions.push(HistoryAction {
                    action: format!("AssignmentActions.{}", action.action),
                    timestamp: canonical_timestamp(action.timestamp),
                    user: user.name,
                });
            }

            // Assignments with nothing visible still appear.
            entry.assignments.push(HistoryAssignment {
                assignment_id: assignment.id,
                assignment_code: assignment.assignment_code,
                actions: history_actions,
                action_summary: summary,
            });
        }
    }

    Ok(by_course.into_values().collect())
}
