use crate::schema::actions;
use crate::schema::assignments;
use crate::schema::courses;
use crate::schema::feedback;
use crate::schema::notebooks;
use crate::schema::subscriptions;
use crate::schema::users;
use chrono::{DateTime, Utc};
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;

/// The closed set of events the ledger records.
///
/// The `action` column stores the snake_case label; an unrecognised label in
/// the database is a deserialization error, never coerced into a default.
#[derive(AsExpression, FromSqlRow, Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Released,
    Fetched,
    Submitted,
    Removed,
    Collected,
    FeedbackReleased,
    FeedbackFetched,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Released => "released",
            ActionKind::Fetched => "fetched",
            ActionKind::Submitted => "submitted",
            ActionKind::Removed => "removed",
            ActionKind::Collected => "collected",
            ActionKind::FeedbackReleased => "feedback_released",
            ActionKind::FeedbackFetched => "feedback_fetched",
        }
    }

    /// Maps a wire label back to its kind. `None` for anything outside the
    /// closed set.
    pub fn parse(label: &str) -> Option<ActionKind> {
        match label {
            "released" => Some(ActionKind::Released),
            "fetched" => Some(ActionKind::Fetched),
            "submitted" => Some(ActionKind::Submitted),
            "removed" => Some(ActionKind::Removed),
            "collected" => Some(ActionKind::Collected),
            "feedback_released" => Some(ActionKind::FeedbackReleased),
            "feedback_fetched" => Some(ActionKind::FeedbackFetched),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql<Text, Pg> for ActionKind {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for ActionKind {
    fn from_sql(value: PgValue<'_>) -> deserialize::Result<Self> {
        let label = std::str::from_utf8(value.as_bytes())?;
        ActionKind::parse(label)
            .ok_or_else(|| format!("Unrecognised action label in database: {label}").into())
    }
}

#[derive(Queryable, Debug, Clone)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub full_name: Option<String>,
    pub org_id: i32,
    pub email: Option<String>,
    pub lms_user_id: Option<String>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub name: String,
    pub full_name: Option<String>,
    pub org_id: i32,
    pub email: Option<String>,
    pub lms_user_id: Option<String>,
}

#[derive(Queryable, Debug, Clone)]
pub struct Course {
    pub id: i64,
    pub org_id: i32,
    pub course_code: String,
    pub course_title: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = courses)]
pub struct NewCourse {
    pub org_id: i32,
    pub course_code: String,
    pub course_title: String,
}

#[derive(Queryable, Debug, Clone)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub role: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = subscriptions)]
pub struct NewSubscription {
    pub user_id: i64,
    pub course_id: i64,
    pub role: String,
}

#[derive(Queryable, Debug, Clone)]
pub struct Assignment {
    pub id: i64,
    pub course_id: i64,
    pub assignment_code: String,
    pub active: bool,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = assignments)]
pub struct NewAssignment {
    pub course_id: i64,
    pub assignment_code: String,
    pub active: bool,
}

#[derive(Queryable, Debug, Clone)]
pub struct Notebook {
    pub id: i64,
    pub assignment_id: i64,
    pub name: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = notebooks)]
pub struct NewNotebook {
    pub assignment_id: i64,
    pub name: String,
}

#[derive(Queryable, Debug, Clone)]
pub struct Action {
    pub id: i64,
    pub user_id: i64,
    pub assignment_id: i64,
    pub action: ActionKind,
    pub location: Option<String>,
    pub checksum: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = actions)]
pub struct NewAction {
    pub user_id: i64,
    pub assignment_id: i64,
    pub action: ActionKind,
    pub location: Option<String>,
    pub checksum: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Queryable, Debug, Clone)]
pub struct Feedback {
    pub id: i64,
    pub notebook_id: i64,
    pub instructor_id: i64,
    pub student_id: i64,
    pub location: Option<String>,
    pub checksum: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = feedback)]
pub struct NewFeedback {
    pub notebook_id: i64,
    pub instructor_id: i64,
    pub student_id: i64,
    pub location: Option<String>,
    pub checksum: Option<String>,
    pub timestamp: DateTime<Utc>,
    // created_at has a DB default (CURRENT_TIMESTAMP)
}
