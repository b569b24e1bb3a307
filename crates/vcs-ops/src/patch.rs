//! Patch assembly and local diffs for files the server has never seen.

use std::collections::BTreeMap;
use std::fmt;

use crate::config::DiffFormat;
use crate::resource::ResourcePath;

const SEPARATOR_WIDTH: usize = 67;
const EPOCH: &str = "1 Jan 1970 00:00:00 -0000";

/// Render a whole-file-added diff for a new file.
///
/// Returns `None` for an empty file; there is nothing to show.
pub fn new_file_diff(path: &str, contents: &str, format: DiffFormat) -> Option<String> {
    let lines: Vec<&str> = contents.lines().collect();
    if lines.is_empty() {
        return None;
    }
    let count = lines.len();
    let mut out = String::new();
    out.push_str(&format!("Index: {}\n", path));
    out.push_str(&"=".repeat(SEPARATOR_WIDTH));
    out.push('\n');
    out.push_str(&format!("RCS file: {}\n", path));
    out.push_str(&format!("diff -N {}\n", path));

    let prefix = match format {
        DiffFormat::Unified => {
            out.push_str(&format!("--- /dev/null\t{}\n", EPOCH));
            out.push_str(&format!("+++ {}\t{}\n", path, EPOCH));
            out.push_str(&format!("@@ -0,0 +1,{} @@\n", count));
            "+"
        }
        DiffFormat::Context => {
            out.push_str(&format!("*** /dev/null\t{}\n", EPOCH));
            out.push_str(&format!("--- {}\t{}\n", path, EPOCH));
            out.push_str("***************\n");
            out.push_str("*** 0 ****\n");
            out.push_str(&format!("--- 1,{} ----\n", count));
            "+ "
        }
        DiffFormat::Standard => {
            out.push_str(&format!("0a1,{}\n", count));
            "> "
        }
    };
    for line in lines {
        out.push_str(prefix);
        out.push_str(line);
        out.push('\n');
    }
    Some(out)
}

/// Diff text for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchEntry {
    pub path: ResourcePath,
    pub text: String,
    /// Synthesized locally rather than produced by the server
    pub new_file: bool,
}

/// Per-file diffs emitted in path order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
    entries: BTreeMap<ResourcePath, PatchEntry>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the diff for a file
    pub fn add(&mut self, entry: PatchEntry) {
        self.entries.insert(entry.path.clone(), entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &PatchEntry> {
        self.entries.values()
    }

    pub fn get(&self, path: &ResourcePath) -> Option<&PatchEntry> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_new_files(&self) -> bool {
        self.entries.values().any(|e| e.new_file)
    }

    pub fn has_contents(&self) -> bool {
        self.entries.values().any(|e| !e.text.is_empty())
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in self.entries.values() {
            write!(f, "{}", entry.text)?;
            if !entry.text.ends_with('\n') {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
