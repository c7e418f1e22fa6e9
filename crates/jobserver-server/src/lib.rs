pub mod actor;
mod builder;
mod retry;

pub use builder::ServerBuilder;
pub use retry::RetryStrategy;
