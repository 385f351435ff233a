#![doc = include_str!("../README.md")]

mod error;
mod executor;
mod handlers;

pub use error::Error;
pub use executor::Executor;
pub use handlers::{HandlerError, NoopHandlers, OperationHandlers};
