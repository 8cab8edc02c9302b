//! The append-only `conda-meta/history` journal of a prefix.
//!
//! Every executed transaction appends one entry: a timestamp header, comment
//! lines recording the command and the specs the user asked for, and one line
//! per linked (`+dist`) or unlinked (`-dist`) package:
//!
//! ```txt
//! ==> 2023-02-13 14:08:50 <==
//! # cmd: krait install numpy=1.23
//! # version: 0.1.0
//! +conda-forge::python-3.9.0-h1_0
//! +conda-forge::numpy-1.23.0-py39h1_0
//! # update specs: ['numpy=1.23']
//! ```
//!
//! Reading the journal back yields the sequence of user requests. The
//! derived [`requested_specs_map`] is the last-writer-wins projection of the
//! requested specs per package name, which future solves replay as keep
//! jobs.

use std::{
    collections::BTreeSet,
    io::Write,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use thiserror::Error;

use crate::MatchSpec;

/// One entry of the history journal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryEntry {
    /// The timestamp of the entry, `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,

    /// The command that was run (from `# cmd: ...`).
    pub cmd: Option<String>,

    /// The tool version that wrote the entry (from `# version: ...`).
    pub tool_version: Option<String>,

    /// Distribution strings that were unlinked.
    pub removed: BTreeSet<String>,

    /// Distribution strings that were linked.
    pub added: BTreeSet<String>,

    /// The specs of an install/update/create request.
    pub update_specs: Vec<String>,

    /// The specs of a remove request.
    pub remove_specs: Vec<String>,

    /// Specs that were weakened to make a request solvable.
    pub neutered_specs: Vec<String>,
}

/// Errors that can occur while reading or writing a history file.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// An I/O error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// A line could not be interpreted.
    #[error("failed to parse history: {0}")]
    ParseError(String),
}

/// Read and append access to the `conda-meta/history` file of a prefix.
#[derive(Debug, Clone)]
pub struct History {
    path: PathBuf,
}

impl History {
    /// Creates a handle for the history file of the given prefix.
    pub fn from_prefix(prefix: impl AsRef<Path>) -> Self {
        Self {
            path: prefix.as_ref().join("conda-meta").join("history"),
        }
    }

    /// The path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parses all entries of the journal. A missing file parses as an empty
    /// journal.
    pub fn parse(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        let content = match fs_err::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        parse_entries(&content)
    }

    /// Appends a single entry to the journal, creating the file (and the
    /// `conda-meta` directory) if necessary. The file is only ever appended
    /// to.
    pub fn append(&self, entry: &HistoryEntry) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let mut file = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        write!(file, "{}", format_entry(entry))?;
        Ok(())
    }

    /// Returns the last-writer-wins projection of the requested specs: every
    /// `update specs` entry overwrites the spec stored for its package name,
    /// every `remove specs` entry deletes it.
    pub fn requested_specs_map(&self) -> Result<IndexMap<String, MatchSpec>, HistoryError> {
        Ok(requested_specs_map(&self.parse()?))
    }
}

/// See [`History::requested_specs_map`].
pub fn requested_specs_map(entries: &[HistoryEntry]) -> IndexMap<String, MatchSpec> {
    let mut map = IndexMap::new();
    for entry in entries {
        for spec_str in &entry.update_specs {
            let Ok(spec) = spec_str.parse::<MatchSpec>() else {
                tracing::warn!("ignoring malformed spec '{spec_str}' in history");
                continue;
            };
            let Some(name) = spec.name.as_ref() else {
                continue;
            };
            map.insert(name.as_normalized().to_string(), spec);
        }
        for spec_str in &entry.remove_specs {
            let Ok(spec) = spec_str.parse::<MatchSpec>() else {
                continue;
            };
            if let Some(name) = spec.name.as_ref() {
                map.shift_remove(name.as_normalized());
            }
        }
    }
    map
}

fn format_specs(specs: &[String]) -> String {
    let quoted: Vec<String> = specs.iter().map(|spec| format!("'{spec}'")).collect();
    format!("[{}]", quoted.join(", "))
}

fn format_entry(entry: &HistoryEntry) -> String {
    let mut out = String::new();
    out.push_str(&format!("==> {} <==\n", entry.timestamp));
    if let Some(cmd) = &entry.cmd {
        out.push_str(&format!("# cmd: {cmd}\n"));
    }
    if let Some(tool_version) = &entry.tool_version {
        out.push_str(&format!("# version: {tool_version}\n"));
    }
    for dist in &entry.removed {
        out.push_str(&format!("-{dist}\n"));
    }
    for dist in &entry.added {
        out.push_str(&format!("+{dist}\n"));
    }
    if !entry.update_specs.is_empty() {
        out.push_str(&format!(
            "# update specs: {}\n",
            format_specs(&entry.update_specs)
        ));
    }
    if !entry.remove_specs.is_empty() {
        out.push_str(&format!(
            "# remove specs: {}\n",
            format_specs(&entry.remove_specs)
        ));
    }
    if !entry.neutered_specs.is_empty() {
        out.push_str(&format!(
            "# neutered specs: {}\n",
            format_specs(&entry.neutered_specs)
        ));
    }
    out
}

fn parse_entries(content: &str) -> Result<Vec<HistoryEntry>, HistoryError> {
    let header_re = lazy_regex::regex!(r"^==>\s*(.+?)\s*<==$");
    let cmd_re = lazy_regex::regex!(r"^#\s*cmd:\s*(.+)$");
    let version_re = lazy_regex::regex!(r"^#\s*(?:conda )?version:\s*(.+)$");
    let specs_re = lazy_regex::regex!(r"^#\s*(\w+)\s*specs:\s*(.*)$");

    let mut entries = Vec::new();
    let mut current: Option<HistoryEntry> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = header_re.captures(line) {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(HistoryEntry {
                timestamp: caps[1].to_string(),
                ..HistoryEntry::default()
            });
            continue;
        }

        let Some(entry) = current.as_mut() else {
            return Err(HistoryError::ParseError(format!(
                "unexpected line before the first revision header: '{line}'"
            )));
        };

        if let Some(caps) = cmd_re.captures(line) {
            entry.cmd = Some(caps[1].to_string());
        } else if let Some(caps) = version_re.captures(line) {
            entry.tool_version = Some(caps[1].to_string());
        } else if let Some(caps) = specs_re.captures(line) {
            let specs = parse_specs_list(caps.get(2).map_or("", |m| m.as_str()));
            match &caps[1] {
                "update" | "install" | "create" => entry.update_specs = specs,
                "remove" | "uninstall" => entry.remove_specs = specs,
                "neutered" => entry.neutered_specs = specs,
                _ => {}
            }
        } else if line.starts_with('#') {
            // Unknown comments are preserved by conda but carry no meaning.
        } else if let Some(dist) = line.strip_prefix('-') {
            entry.removed.insert(dist.to_string());
        } else if let Some(dist) = line.strip_prefix('+') {
            entry.added.insert(dist.to_string());
        } else {
            // The initial revision lists its packages without a diff marker.
            entry.added.insert(line.to_string());
        }
    }

    if let Some(entry) = current.take() {
        entries.push(entry);
    }
    Ok(entries)
}

/// Parses `['numpy=1.23', 'scipy']` style lists, tolerating bare
/// comma-separated specs as well.
fn parse_specs_list(input: &str) -> Vec<String> {
    input
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|spec| spec.trim().trim_matches(|c| matches!(c, '\'' | '"')))
        .filter(|spec| !spec.is_empty())
        .map(String::from)
        .collect()
}
