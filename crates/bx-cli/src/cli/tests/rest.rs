//! Tests for the `checksum` subcommand.

use super::parse;
use crate::cli::CliCommand;

#[test]
fn cli_parse_checksum() {
    match parse(&["bx", "checksum", "/path/to/file.bin"]) {
        CliCommand::Checksum { path } => assert_eq!(path, "/path/to/file.bin"),
        _ => panic!("expected Checksum"),
    }
}
