//! Host runtime the monitored program executes in
//!
//! Units are plain-text programs (see [`unit`]); the [`Environment`] wires
//! resolvers together and [`Invocation`] runs an entry point against them.

mod environment;
mod error;
mod exec;
mod resolver;
pub mod unit;

pub use environment::{Environment, EnvironmentBuilder, InstallGuard, InstallMode};
pub use error::ExecError;
pub use exec::{Invocation, MAX_CALL_DEPTH};
pub use resolver::{ChainResolver, DefinedUnits, PathResolver, Resolver};
pub use unit::{Instruction, UnitProgram};
