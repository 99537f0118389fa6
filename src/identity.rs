use crate::errors::AppError;
use crate::model::exchange::{Course, NewCourse, NewSubscription, NewUser, Subscription, User};
use crate::schema::{
    courses::dsl as courses_dsl, subscriptions::dsl as subscriptions_dsl, users::dsl as users_dsl,
};
use anyhow::anyhow;
use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use deadpool_diesel::postgres::Pool;
use diesel::prelude::*;
use std::collections::HashMap;
use tracing::{debug, info};

/// Caller identity as asserted by the fronting hub, read from the
/// `x-exchange-*` request headers. No header means no caller.
#[derive(Debug, Clone)]
pub struct Identity {
    pub name: String,
    pub course: Option<String>,
    pub role: Option<String>,
    pub course_title: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub lms_user_id: Option<String>,
    pub org_id: i32,
}

fn read_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        let name = read_header(headers, "x-exchange-user")
            .ok_or_else(|| AppError::Forbidden("Authentication required".to_string()))?;

        let org_id = read_header(headers, "x-exchange-org")
            .and_then(|value| value.parse::<i32>().ok())
            .unwrap_or(1);

        Ok(Identity {
            name,
            course: read_header(headers, "x-exchange-course"),
            role: read_header(headers, "x-exchange-role"),
            course_title: read_header(headers, "x-exchange-course-title")
                .unwrap_or_else(|| "no_title".to_string()),
            full_name: read_header(headers, "x-exchange-full-name"),
            email: read_header(headers, "x-exchange-email"),
            lms_user_id: read_header(headers, "x-exchange-lms-user-id"),
            org_id,
        })
    }
}

/// The resolved caller: a persisted user plus every subscription they hold,
/// keyed by course code.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: i64,
    pub name: String,
    pub org_id: i32,
    pub current_course: String,
    pub current_role: String,
    pub courses: HashMap<String, Vec<String>>,
}

impl CurrentUser {
    pub fn subscribed_to(&self, course_code: &str) -> bool {
        self.courses.contains_key(course_code)
    }

    pub fn is_current_instructor(&self) -> bool {
        self.current_role.eq_ignore_ascii_case("instructor")
    }

    pub fn instructor_on(&self, course_code: &str) -> bool {
        self.courses.get(course_code).is_some_and(|roles| {
            roles.iter().any(|role| role.eq_ignore_ascii_case("instructor"))
        })
    }
}

impl Identity {
    /// Persists the asserted identity and returns the resolved caller.
    ///
    /// User, course and subscription rows are created on first sight, so a
    /// request is itself an enrolment. A caller without both a course and a
    /// role cannot be placed anywhere and is a hard error.
    pub async fn resolve(self, pool: &Pool) -> Result<CurrentUser, AppError> {
        let (Some(current_course), Some(current_role)) = (self.course.clone(), self.role.clone())
        else {
            let note = format!(
                "Both current_course ('{}') and current_role ('{}') must have values. User was '{}'",
                self.course.as_deref().unwrap_or("None"),
                self.role.as_deref().unwrap_or("None"),
                self.name
            );
            info!("{note}");
            return Err(AppError::InternalServerError(anyhow!(note)));
        };

        let conn = pool.get().await?;
        let current_user = conn
            .interact(move |conn_sync| {
                resolve_in_db(conn_sync, &self, &current_course, &current_role)
            })
            .await??;
        Ok(current_user)
    }
}

fn resolve_in_db(
    conn_sync: &mut PgConnection,
    identity: &Identity,
    current_course: &str,
    current_role: &str,
) -> Result<CurrentUser, diesel::result::Error> {
    let existing_user = users_dsl::users
        .filter(users_dsl::name.eq(&identity.name))
        .first::<User>(conn_sync)
        .optional()?;

    let user = match existing_user {
        Some(user) => {
            if user.full_name != identity.full_name {
                diesel::update(users_dsl::users.filter(users_dsl::id.eq(user.id)))
                    .set(users_dsl::full_name.eq(identity.full_name.clone()))
                    .execute(conn_sync)?;
            }
            user
        }
        None => {
            debug!(
                "New user details: name:{}, org_id:{}",
                identity.name, identity.org_id
            );
            // Insert-or-ignore then re-read, so a lost race still returns
            // the row the winner created.
            diesel::insert_into(users_dsl::users)
                .values(NewUser {
                    name: identity.name.clone(),
                    full_name: identity.full_name.clone(),
                    org_id: identity.org_id,
                    email: identity.email.clone(),
                    lms_user_id: identity.lms_user_id.clone(),
                })
                .on_conflict_do_nothing()
                .execute(conn_sync)?;
            users_dsl::users
                .filter(users_dsl::name.eq(&identity.name))
                .first::<User>(conn_sync)?
        }
    };

    let existing_course = courses_dsl::courses
        .filter(courses_dsl::course_code.eq(current_course))
        .filter(courses_dsl::org_id.eq(identity.org_id))
        .first::<Course>(conn_sync)
        .optional()?;

    let course = match existing_course {
        Some(course) => course,
        None => {
            debug!(
                "New course details: code:{}, org_id:{}",
                current_course, identity.org_id
            );
            diesel::insert_into(courses_dsl::courses)
                .values(NewCourse {
                    org_id: identity.org_id,
                    course_code: current_course.to_string(),
                    course_title: identity.course_title.clone(),
                })
                .on_conflict_do_nothing()
                .execute(conn_sync)?;
            courses_dsl::courses
                .filter(courses_dsl::course_code.eq(current_course))
                .filter(courses_dsl::org_id.eq(identity.org_id))
                .first::<Course>(conn_sync)?
        }
    };

    let existing_subscription = subscriptions_dsl::subscriptions
        .filter(subscriptions_dsl::user_id.eq(user.id))
        .filter(subscriptions_dsl::course_id.eq(course.id))
        .filter(subscriptions_dsl::role.eq(current_role))
        .first::<Subscription>(conn_sync)
        .optional()?;

    if existing_subscription.is_none() {
        debug!(
            "New subscription details: user:{}, course:{}, role:{}",
            user.id, course.id, current_role
        );
        diesel::insert_into(subscriptions_dsl::subscriptions)
            .values(NewSubscription {
                user_id: user.id,
                course_id: course.id,
                role: current_role.to_string(),
            })
            .on_conflict_do_nothing()
            .execute(conn_sync)?;
    }

    let subscription_rows = subscriptions_dsl::subscriptions
        .inner_join(courses_dsl::courses)
        .filter(subscriptions_dsl::user_id.eq(user.id))
        .select((courses_dsl::course_code, subscriptions_dsl::role))
        .load::<(String, String)>(conn_sync)?;

    let mut courses: HashMap<String, Vec<String>> = HashMap::new();
    for (code, role) in subscription_rows {
        let roles = courses.entry(code).or_default();
        if !roles.contains(&role) {
            roles.push(role);
        }
    }

    Ok(CurrentUser {
        id: user.id,
        name: user.name,
        org_id: user.org_id,
        current_course: current_course.to_string(),
        current_role: current_role.to_string(),
        courses,
    })
}
