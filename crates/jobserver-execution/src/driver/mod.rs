mod actor;
mod entrypoint;
mod event;
mod executor;
mod failure;
mod options;
mod server;
mod state;

pub use actor::DriverTaskEngine;
pub use entrypoint::{run_driver, serve_driver};
pub use event::DriverEvent;
pub use executor::{JobError, JobExecutor, JobLog, ShellJobExecutor};
pub use failure::{classify_failure, strip_exception_prefix, ArtifactResolver, SearchPathResolver};
pub use options::DriverOptions;
pub use server::driver_routes;
