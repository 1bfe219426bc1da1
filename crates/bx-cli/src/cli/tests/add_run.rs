//! Tests for the `run` subcommand.

use super::parse;
use crate::cli::CliCommand;

#[test]
fn cli_parse_run_single_url() {
    match parse(&["bx", "run", "https://example.com/file.iso"]) {
        CliCommand::Run {
            urls,
            dest,
            group,
            priority,
            retries,
            max_concurrent,
            max_concurrent_by_host,
            max_concurrent_by_group,
        } => {
            assert_eq!(urls, vec!["https://example.com/file.iso".to_string()]);
            assert!(dest.is_none());
            assert_eq!(group, "default");
            assert_eq!(priority, 5);
            assert_eq!(retries, 0);
            assert!(max_concurrent.is_none());
            assert!(max_concurrent_by_host.is_none());
            assert!(max_concurrent_by_group.is_none());
        }
        _ => panic!("expected Run"),
    }
}

#[test]
fn cli_parse_run_multiple_urls() {
    match parse(&[
        "bx",
        "run",
        "https://example.com/a",
        "https://example.com/b",
    ]) {
        CliCommand::Run { urls, .. } => {
            assert_eq!(
                urls,
                vec![
                    "https://example.com/a".to_string(),
                    "https://example.com/b".to_string()
                ]
            );
        }
        _ => panic!("expected Run with two urls"),
    }
}

#[test]
fn cli_parse_run_dest() {
    match parse(&["bx", "run", "https://example.com/x", "--dest", "/tmp"]) {
        CliCommand::Run { dest, .. } => {
            assert_eq!(dest.as_deref(), Some(std::path::Path::new("/tmp")));
        }
        _ => panic!("expected Run with --dest"),
    }
}

#[test]
fn cli_parse_run_group_and_priority() {
    match parse(&[
        "bx",
        "run",
        "https://example.com/x",
        "--group",
        "batch",
        "--priority",
        "1",
    ]) {
        CliCommand::Run {
            group, priority, ..
        } => {
            assert_eq!(group, "batch");
            assert_eq!(priority, 1);
        }
        _ => panic!("expected Run with --group/--priority"),
    }
}

#[test]
fn cli_parse_run_retries_and_caps() {
    match parse(&[
        "bx",
        "run",
        "https://example.com/x",
        "--retries",
        "3",
        "--max-concurrent",
        "2",
        "--max-concurrent-by-host",
        "1",
        "--max-concurrent-by-group",
        "4",
    ]) {
        CliCommand::Run {
            retries,
            max_concurrent,
            max_concurrent_by_host,
            max_concurrent_by_group,
            ..
        } => {
            assert_eq!(retries, 3);
            assert_eq!(max_concurrent, Some(2));
            assert_eq!(max_concurrent_by_host, Some(1));
            assert_eq!(max_concurrent_by_group, Some(4));
        }
        _ => panic!("expected Run with --retries and caps"),
    }
}
