//! Data the charm publishes to related applications

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::config::HostLayout;

/// Scheduler hook locations handed to the Slurm controller charm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrologEpilogData {
    pub prolog: PathBuf,
    pub epilog: PathBuf,
}

impl PrologEpilogData {
    pub fn from_layout(layout: &HostLayout) -> Self {
        Self {
            prolog: layout.prolog_path(),
            epilog: layout.epilog_path(),
        }
    }
}

const LOG_TAG: &str = "license-manager-agent";

/// `YYYY-MM-DD HH:MM:SS` at the start of a line opens a new record
const RECORD_START: &str = r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}";

static RECORD_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(RECORD_START).expect("valid record start regex"));

/// Continuation lines: anything not opening a record (shipper-side lookahead)
const RECORD_CONT: &str = r"^(?!\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailInput {
    pub name: String,
    pub path: String,
    pub tag: String,
    pub path_key: String,
    pub multiline_parser: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultilineRule {
    pub state: String,
    pub regex: String,
    pub next_state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultilineParser {
    pub name: String,
    #[serde(rename = "type")]
    pub parser_type: String,
    pub flush_timeout: u32,
    pub rules: Vec<MultilineRule>,
}

/// Tail input plus multiline parser for a log shipper
///
/// Agent log records span several lines when they carry a traceback, so
/// the parser folds every line that does not open with a timestamp into
/// the record before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogForwardingDescriptor {
    pub input: TailInput,
    pub multiline_parser: MultilineParser,
}

impl LogForwardingDescriptor {
    pub fn for_log_dir(log_dir: &Path) -> Self {
        Self {
            input: TailInput {
                name: "tail".to_string(),
                path: log_dir.join("*.log").display().to_string(),
                tag: LOG_TAG.to_string(),
                path_key: "filename".to_string(),
                multiline_parser: LOG_TAG.to_string(),
            },
            multiline_parser: MultilineParser {
                name: LOG_TAG.to_string(),
                parser_type: "regex".to_string(),
                flush_timeout: 1000,
                rules: vec![
                    MultilineRule {
                        state: "start_state".to_string(),
                        regex: format!("/{RECORD_START}/"),
                        next_state: "cont".to_string(),
                    },
                    MultilineRule {
                        state: "cont".to_string(),
                        regex: format!("/{RECORD_CONT}/"),
                        next_state: "cont".to_string(),
                    },
                ],
            },
        }
    }
}

/// Whether `line` opens a new log record
pub fn is_record_start(line: &str) -> bool {
    RECORD_START_RE.is_match(line)
}

/// Opening line of the last record in a log
pub fn last_record_start(content: &str) -> Option<&str> {
    content.lines().rev().find(|line| is_record_start(line))
}
