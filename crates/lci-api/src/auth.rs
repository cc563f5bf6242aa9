use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use lci_model::CourseId;

use crate::ApiError;

/// Header carrying the authenticated user, set by the fronting proxy.
pub const USER_HEADER: &str = "x-lci-user";

/// The user a request is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::Unauthenticated)?;
        Ok(Caller(user.to_string()))
    }
}

/// Decides what a caller may do. Course endpoints need at least instructor rights
/// for that course; agent administration needs admin rights.
#[async_trait]
pub trait Authorizer: Send + Sync + 'static {
    async fn is_instructor(&self, user: &str, course: &CourseId) -> bool;
    async fn is_admin(&self, user: &str) -> bool;
}

/// Lets every identified caller through. For single-tenant setups and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn is_instructor(&self, _: &str, _: &CourseId) -> bool {
        true
    }

    async fn is_admin(&self, _: &str) -> bool {
        true
    }
}

/// Fixed admin and per-course instructor lists. Admins pass every course check.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthorizer {
    admins: HashSet<String>,
    instructors: HashMap<CourseId, HashSet<String>>,
}

impl StaticAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_admin(mut self, user: impl Into<String>) -> Self {
        self.admins.insert(user.into());
        self
    }

    pub fn with_instructor(mut self, course: impl Into<CourseId>, user: impl Into<String>) -> Self {
        self.instructors.entry(course.into()).or_default().insert(user.into());
        self
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn is_instructor(&self, user: &str, course: &CourseId) -> bool {
        self.admins.contains(user)
            || self
                .instructors
                .get(course)
                .is_some_and(|users| users.contains(user))
    }

    async fn is_admin(&self, user: &str) -> bool {
        self.admins.contains(user)
    }
}
