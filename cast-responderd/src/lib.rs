pub mod config;
pub mod connector;
pub mod controller;
pub mod discovery;
pub mod dispatcher;
pub mod enablement;
pub mod error;
pub mod identity;
pub mod platform;
pub mod registry;
#[cfg(test)]
mod testing;
