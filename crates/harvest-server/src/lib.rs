//! REST API: collection jobs with SSE result streams, saved records,
//! deep collection, and OpenAPI documentation.

pub mod auth;
pub mod dto;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod state;
