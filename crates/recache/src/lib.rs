//! Administrative CLI for the recache purge log
//!
//! Applies purges to the shared purge file that every recache process
//! polls, and answers validity queries against it.
//!
//! ```text
//! recache [--config FILE] [-L LEVEL] <command>
//!   purge <URL>...             invalidate URLs as of now
//!   purge-all                  raise the global invalidation timestamp to now
//!   check <URL> <TIMESTAMP_MS> report whether a resource fetched then is valid
//!   show                       print the parsed purge file
//! ```

#![expect(
    clippy::missing_errors_doc,
    reason = "Errors are described on the CliError variants"
)]

pub mod cli;
pub mod commands;
pub mod logging;

pub use cli::{Cli, CliError, Command, EXIT_CLI, EXIT_FAILED, EXIT_OK, exit_code_for};
pub use commands::Runner;
