//! Configuration: execution requests, security profiles and validation.

pub mod profile;
pub mod types;
pub mod validator;
