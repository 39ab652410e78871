//! One module per resource, under the `api::handlers::<resource>`
//! convention.

pub mod admin;
pub mod executions;
pub mod webhooks;
pub mod workflows;

pub use crate::AppState;
