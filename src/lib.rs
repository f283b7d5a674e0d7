mod auth;
pub mod args;
pub mod commands;
mod config;
mod error;
mod utils;

#[cfg(test)]
mod test;

pub use auth::{EndpointError, Resolution, Source, TokenFile, TokenGrant};
pub use config::{Config, Overrides};
pub use error::AuthError;
pub use error::Error;
pub use error::Result;
