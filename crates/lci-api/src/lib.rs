//! Administrative REST surface over the build queue and agent registry.
//!
//! [`HttpApi`] mounts the routes on an axum [`Router`](axum::Router). Requests are
//! attributed to the user named in the [`USER_HEADER`] header and checked against an
//! [`Authorizer`] before any [`ApiHandler`] call.
mod error;
pub use error::ApiError;

mod auth;
pub use auth::{AllowAll, Authorizer, Caller, StaticAuthorizer, USER_HEADER};

mod handler;
pub use handler::ApiHandler;

mod adapter;
pub use adapter::CoreApiAdapter;

mod http;
pub use http::{HttpApi, SubmitJobRequest, SubmitJobResponse};
