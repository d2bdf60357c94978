//! Local translation service.
//!
//! Language packages are installed on first use: a request for an
//! uninstalled pair looks the pair up in the package index, installs the
//! needed packages (directly or through a pivot language) and then
//! translates with the loaded models.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod index;
pub mod installer;
pub mod invoker;
pub mod metrics;
pub mod package;
pub mod resolver;
pub mod server;
pub mod service;
pub mod single_flight;

#[cfg(test)]
pub(crate) mod testing;
