//! Ordered request pipeline.
//!
//! A request passes through a fixed list of stages. Each stage may continue,
//! answer the request itself, or fail. Once the route handler (or a stage)
//! has produced a response, the `after` hooks of every stage that was entered
//! run in reverse order.

pub mod context;
pub mod driver;
pub mod error;
pub mod form;
pub mod routes;
pub mod stage;
pub mod stages;

pub use context::RequestContext;
pub use driver::Pipeline;
pub use error::{StageError, StageResult, error_response};
pub use form::FormData;
pub use routes::Routes;
pub use stage::{FailureMode, Flow, RouteHandler, Stage};

#[cfg(test)]
mod driver_tests;
