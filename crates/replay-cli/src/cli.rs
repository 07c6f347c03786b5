//! Command-line definition

use clap::{value_parser, Arg, ArgAction, ArgGroup, Command};
use replay_artifact::{ArtifactKind, SchemaId};
use std::path::PathBuf;

const KINDS: [&str; 3] = [
    ArtifactKind::ExecutionRequest.as_str(),
    ArtifactKind::ExecutionResult.as_str(),
    ArtifactKind::EvaluationResult.as_str(),
];

const SCHEMAS: [&str; 3] = [
    SchemaId::ExecutionRequest.as_str(),
    SchemaId::ExecutionResult.as_str(),
    SchemaId::EvaluationResult.as_str(),
];

pub(crate) fn build() -> Command {
    Command::new("replayctl")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Deterministic execution and offline replay of execution artifacts")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("artifacts-dir")
                .long("artifacts-dir")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Directory holding last slots and NDJSON histories"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML pipeline configuration"),
        )
        .arg(
            Arg::new("timeout-secs")
                .long("timeout-secs")
                .global(true)
                .value_parser(value_parser!(u64))
                .help("Agent deadline in seconds (0 disables it)"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON on stderr"),
        )
        .subcommand(
            Command::new("submit")
                .about("Execute and evaluate a request file")
                .arg(
                    Arg::new("request")
                        .long("request")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON request to submit"),
                ),
        )
        .subcommand(Command::new("consume").about("Execute and evaluate the last stored request"))
        .subcommand(Command::new("evaluate").about("Evaluate the last stored result"))
        .subcommand(
            Command::new("replay")
                .about("Re-run a stored request and compare result hashes (exit 1 on mismatch)")
                .arg(
                    Arg::new("task-id")
                        .long("task-id")
                        .help("Most recent request with this task id"),
                )
                .arg(
                    Arg::new("request-hash")
                        .long("request-hash")
                        .help("Request with this canonical hash"),
                )
                .arg(
                    Arg::new("index")
                        .long("index")
                        .value_parser(value_parser!(usize))
                        .help("0-based position in request history"),
                )
                .group(
                    ArgGroup::new("selector")
                        .args(["task-id", "request-hash", "index"])
                        .multiple(false),
                ),
        )
        .subcommand(
            Command::new("history")
                .about("Count records and skipped lines in a history")
                .arg(
                    Arg::new("kind")
                        .required(true)
                        .value_parser(KINDS)
                        .help("Artifact kind"),
                ),
        )
        .subcommand(
            Command::new("schema")
                .about("Print an embedded JSON Schema")
                .arg(
                    Arg::new("id")
                        .required(true)
                        .value_parser(SCHEMAS)
                        .help("Schema identifier"),
                ),
        )
        .subcommand(
            Command::new("hash")
                .about("Canonical hash of a JSON file")
                .arg(
                    Arg::new("file")
                        .long("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON file to hash"),
                )
                .arg(
                    Arg::new("kind")
                        .long("kind")
                        .value_parser(KINDS)
                        .help("Also validate against this kind's schema"),
                ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_well_formed() {
        build().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let matches = build()
            .try_get_matches_from([
                "replayctl",
                "replay",
                "--task-id",
                "T-1",
                "--artifacts-dir",
                "/tmp/a",
                "--log-json",
            ])
            .unwrap();
        assert_eq!(
            matches.get_one::<PathBuf>("artifacts-dir"),
            Some(&PathBuf::from("/tmp/a"))
        );
        assert!(matches.get_flag("log-json"));
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "replay");
        assert_eq!(sub.get_one::<String>("task-id").map(String::as_str), Some("T-1"));
    }

    #[test]
    fn replay_selectors_are_exclusive() {
        let result = build().try_get_matches_from([
            "replayctl",
            "replay",
            "--task-id",
            "T-1",
            "--index",
            "0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn history_rejects_unknown_kind() {
        assert!(build()
            .try_get_matches_from(["replayctl", "history", "plan"])
            .is_err());
    }
}
