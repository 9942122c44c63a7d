//! Schema documentation checks

pub mod validator;

pub use validator::{friendly_error_message, validate, SchemaCatalog, SchemaValidation};
