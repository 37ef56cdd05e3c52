//! REST API server: routes, DTOs, error mapping and OpenAPI documentation.

pub mod backends;
pub mod config;
pub mod dto;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod state;
