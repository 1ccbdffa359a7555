//! Static validation: syntax, imports, forbidden operations, entry signature.

pub mod rules;
pub mod validator;

pub use validator::validate;
