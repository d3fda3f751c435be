//! Builders that wire services together from configuration.

pub mod service_builder;

pub use service_builder::{ServiceBuilder, Services};
