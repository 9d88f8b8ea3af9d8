//! recache CLI entry point

#![allow(clippy::print_stderr)]

use recache::cli::{self, EXIT_CLI, EXIT_OK, exit_code_for, render_error};
use recache::{Runner, logging};
use recache_core::SystemTimer;
use std::io::{self, Write};
use std::sync::Arc;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = cli::parse();

    if let Err(e) = logging::init_tracing(cli.level, cli.log_format) {
        eprintln!("{e:?}");
        return EXIT_CLI;
    }

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            let code = exit_code_for(&e);
            render_error(e);
            return code;
        }
    };

    let runner = Runner::new(&config, Arc::new(SystemTimer));
    let mut stdout = io::stdout().lock();
    let result = runner.execute(&cli.command, &mut stdout);
    let _ = stdout.flush();
    match result {
        Ok(()) => EXIT_OK,
        Err(e) => {
            let code = exit_code_for(&e);
            render_error(e);
            code
        }
    }
}
