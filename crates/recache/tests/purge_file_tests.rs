//! CLI commands against a real purge file and lock directory

use recache::{Command, EXIT_FAILED, Runner, exit_code_for};
use recache_core::{Config, SystemTimer, Timer};
use std::sync::Arc;
use tempfile::TempDir;

fn config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.purge.file = dir.path().join("cache.purge");
    config.purge.lock_dir = dir.path().join("locks");
    config
}

fn run(runner: &Runner, command: Command) -> (Result<(), recache::CliError>, String) {
    let mut out = Vec::new();
    let result = runner.execute(&command, &mut out);
    (result, String::from_utf8(out).unwrap())
}

#[test]
fn test_purges_are_visible_to_a_second_process() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let timer: Arc<dyn Timer> = Arc::new(SystemTimer);

    let writer = Runner::new(&config, Arc::clone(&timer));
    let before = timer.now_ms() - 1;
    let (result, _) = run(
        &writer,
        Command::Purge {
            urls: vec!["http://example.com/a.css".into(), "http://example.com/b.js".into()],
        },
    );
    result.unwrap();

    let contents = std::fs::read_to_string(dir.path().join("cache.purge")).unwrap();
    assert_eq!(contents.lines().count(), 3);

    // A fresh runner only knows what is on disk
    let reader = Runner::new(&config, timer);
    let (result, out) = run(
        &reader,
        Command::Check {
            url: "http://example.com/a.css".into(),
            timestamp_ms: before,
        },
    );
    let err = result.unwrap_err();
    assert_eq!(exit_code_for(&err), EXIT_FAILED);
    assert_eq!(out, "invalid\n");

    let (result, out) = run(
        &reader,
        Command::Check {
            url: "http://example.com/other.png".into(),
            timestamp_ms: before,
        },
    );
    result.unwrap();
    assert_eq!(out, "valid\n");

    let (result, out) = run(&reader, Command::Show);
    result.unwrap();
    assert_eq!(out, contents);
}

#[test]
fn test_show_on_missing_file_prints_empty_set() {
    let dir = TempDir::new().unwrap();
    let runner = Runner::new(&config(&dir), Arc::new(SystemTimer));
    let (result, out) = run(&runner, Command::Show);
    result.unwrap();
    assert_eq!(out, "0\n");
}

#[test]
fn test_purge_all_then_show() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let runner = Runner::new(&config, Arc::new(SystemTimer));
    run(&runner, Command::PurgeAll).0.unwrap();

    let reader = Runner::new(&config, Arc::new(SystemTimer));
    let (_, out) = run(&reader, Command::Show);
    let global: i64 = out.trim().parse().unwrap();
    assert!(global > 0);

    let locks: Vec<_> = std::fs::read_dir(dir.path().join("locks"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "lock"))
        .collect();
    assert!(locks.is_empty(), "lock released after the batch");
}
