//! Build lifecycle hooks for platform engines.
//!
//! At the `setup` and `cleanup` points of a build the hooks run the engine's
//! optional scripts, stream their output into a formatted build log, publish
//! the build into the deploy directory and stash the package cache.
//!
//! - **[`core`]**: Pure, deterministic logic (log formatting, directory
//!   layout, engine payloads). No I/O.
//! - **[`io`]**: Side-effecting operations (processes, config, registry,
//!   build log sinks).
//!
//! [`hooks`] coordinates the two to implement the CLI commands.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod hooks;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
