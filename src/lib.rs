//! Skein core library: scenario model, runtime, and shared types used by
//! the CLI.

#[path = "runtime/assertions.rs"]
mod assertions;
#[path = "runtime/chain.rs"]
mod chain;
#[path = "platform/config.rs"]
mod config;
#[path = "platform/error.rs"]
mod error;
#[path = "runtime/executor.rs"]
mod executor;
#[path = "platform/literals.rs"]
mod literals;
#[path = "runtime/nodes.rs"]
mod nodes;
#[path = "model/reporting.rs"]
mod reporting;
#[path = "model/scenario.rs"]
mod scenario;
#[path = "runtime/services.rs"]
mod services;

pub use assertions::*;
pub use chain::*;
pub use config::*;
pub use error::*;
pub use executor::*;
pub use literals::*;
pub use nodes::*;
pub use reporting::*;
pub use scenario::*;
pub use services::*;
