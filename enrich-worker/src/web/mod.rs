//! Inbound HTTP surface: state wiring, routes, middleware, and error
//! mapping.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

pub use routes::router;
pub use state::AppState;
