// HTTP server setup (Axum + server-sent events)
pub mod app;
pub mod routes;

pub use app::*;
