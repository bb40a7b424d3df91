pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod presence;
pub mod services;
pub mod startup;

#[cfg(test)]
pub(crate) mod testing;

pub use startup::{router, AppState, Application};
