// ABOUTME: Root module for emris - task manager for distributed model compute.
// ABOUTME: Re-exports the service facade and its component types.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod limiter;
pub mod prelude;
pub mod registry;
pub mod service;
pub mod worker;

pub use error::EmrisError;
pub use service::TaskManagerService;
