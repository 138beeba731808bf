//! Admin HTTP API for Fleet Guardian using Actix Web.
//!
//! Exposes every administrative operation of the [`FleetController`](crate::FleetController)
//! as a JSON route, plus a Server-Sent Events feed of the Guardian log.
//! Requests are logged, CORS is open, and a bearer token is required when
//! one is configured.
//!
//! The operator behind a request is taken from the `X-Actor` header and
//! recorded in the Guardian log.

pub use self::server::{AdminApi, AdminApiHandle, configure};

pub mod actix_error;
pub mod auth;
pub mod events;
pub mod handlers;
pub mod server;
pub mod types;
