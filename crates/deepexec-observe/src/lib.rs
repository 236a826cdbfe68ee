//! Observability for the deep execution engine: subscriber setup and the
//! field names shared by engine spans and events.

pub mod attrs;
pub mod tracing_setup;
