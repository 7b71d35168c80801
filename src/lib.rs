pub mod auth;
pub mod config;
pub mod domain;
pub mod intake;
pub mod metrics;
pub mod models;
pub mod store;
pub mod upstream;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
