//! Plugin system: manifests on disk, per-tenant installs, job execution and
//! raw event ingestion

pub mod events;
pub mod executor;
pub mod invoker;
pub mod loader;
pub mod manifest;

pub use executor::JobExecutor;
pub use invoker::{HttpJobInvoker, JobInvoker};
pub use loader::PluginCatalog;
