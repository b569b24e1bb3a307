//! Global and local command options.
//!
//! Options are opaque to the engine except for the recursion flags: an
//! option is identified by its token (`-l`, `-m`, ...) and a list never
//! carries the same token twice.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VcsError};
use crate::tag::{Tag, TagKind};

/// Option sent before the command name, common to all commands
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalOption(String);

impl GlobalOption {
    pub fn new(option: impl Into<String>) -> Self {
        Self(option.into())
    }

    /// Do not change any files
    pub fn do_not_change() -> Self {
        Self::new("-n")
    }

    /// Do not record the command in history
    pub fn do_not_log() -> Self {
        Self::new("-l")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GlobalOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Command specific option, optionally carrying an argument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalOption {
    option: String,
    argument: Option<String>,
}

impl LocalOption {
    pub fn new(option: impl Into<String>) -> Self {
        Self {
            option: option.into(),
            argument: None,
        }
    }

    pub fn with_argument(option: impl Into<String>, argument: impl Into<String>) -> Self {
        Self {
            option: option.into(),
            argument: Some(argument.into()),
        }
    }

    pub const DO_NOT_RECURSE: &'static str = "-l";
    pub const RECURSE: &'static str = "-R";
    pub const PRUNE_EMPTY_DIRECTORIES: &'static str = "-P";
    pub const BUILD_DIRECTORIES: &'static str = "-d";
    pub const IGNORE_LOCAL_CHANGES: &'static str = "-C";
    pub const CLEAR_STICKY: &'static str = "-A";
    pub const MESSAGE: &'static str = "-m";
    pub const FORCE_REASSIGNMENT: &'static str = "-F";
    pub const BRANCH_TAG: &'static str = "-b";
    pub const DELETE_TAG: &'static str = "-d";
    pub const CHECK_UNMODIFIED: &'static str = "-c";
    pub const INCLUDE_NEW_FILES: &'static str = "-N";
    pub const UNIFIED_FORMAT: &'static str = "-u";
    pub const CONTEXT_FORMAT: &'static str = "-c";
    pub const TAG_REVISION: &'static str = "-r";
    pub const TAG_DATE: &'static str = "-D";
    pub const TARGET_DIRECTORY: &'static str = "-d";

    pub fn do_not_recurse() -> Self {
        Self::new(Self::DO_NOT_RECURSE)
    }

    /// `-m <text>`; a missing message is sent as an empty argument
    pub fn message(text: Option<&str>) -> Self {
        Self::with_argument(Self::MESSAGE, text.unwrap_or(""))
    }

    /// `-r <name>` for branches and versions, `-D <date>` for dates
    pub fn tag(tag: &Tag) -> Result<Self> {
        match tag.kind() {
            TagKind::Branch | TagKind::Version => {
                Ok(Self::with_argument(Self::TAG_REVISION, tag.name()))
            }
            TagKind::Date => Ok(Self::with_argument(Self::TAG_DATE, tag.name())),
            TagKind::Head => Err(VcsError::Validation(
                "HEAD cannot be used as a tag option".to_string(),
            )),
        }
    }

    pub fn option(&self) -> &str {
        &self.option
    }

    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }

    /// Tokens as they are sent to the server
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens = vec![self.option.clone()];
        if let Some(argument) = &self.argument {
            tokens.push(argument.clone());
        }
        tokens
    }
}

/// Options compare by token only, the argument is ignored
impl PartialEq for LocalOption {
    fn eq(&self, other: &Self) -> bool {
        self.option == other.option
    }
}

impl Eq for LocalOption {}

impl fmt::Display for LocalOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.argument {
            Some(argument) if !argument.is_empty() => write!(f, "{} \"{}\"", self.option, argument),
            _ => write!(f, "{}", self.option),
        }
    }
}

/// Keyword substitution mode of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KSubstMode {
    Binary,
    Text,
    TextExpand,
    TextExpandLocker,
    TextValuesOnly,
    TextKeywordsOnly,
}

impl KSubstMode {
    pub fn from_mode(mode: &str) -> Option<Self> {
        match mode {
            "-kb" => Some(Self::Binary),
            "-ko" => Some(Self::Text),
            "" | "-kkv" => Some(Self::TextExpand),
            "-kkvl" => Some(Self::TextExpandLocker),
            "-kv" => Some(Self::TextValuesOnly),
            "-kk" => Some(Self::TextKeywordsOnly),
            _ => None,
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Self::Binary => "-kb",
            Self::Text => "-ko",
            Self::TextExpand => "-kkv",
            Self::TextExpandLocker => "-kkvl",
            Self::TextValuesOnly => "-kv",
            Self::TextKeywordsOnly => "-kk",
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary)
    }

    pub fn to_option(&self) -> LocalOption {
        LocalOption::new(self.mode())
    }
}

/// Ordered list of global options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalOptions(Vec<GlobalOption>);

impl GlobalOptions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GlobalOption> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Ordered list of local options without duplicate tokens
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalOptions(Vec<LocalOption>);

impl LocalOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an option unless one with the same token is present
    pub fn add(&mut self, option: LocalOption) {
        if !self.contains(option.option()) {
            self.0.push(option);
        }
    }

    pub fn with(mut self, option: LocalOption) -> Self {
        self.add(option);
        self
    }

    pub fn remove(&mut self, option: &str) {
        self.0.retain(|o| o.option() != option);
    }

    pub fn contains(&self, option: &str) -> bool {
        self.find(option).is_some()
    }

    pub fn find(&self, option: &str) -> Option<&LocalOption> {
        self.0.iter().find(|o| o.option() == option)
    }

    /// Arguments of every option with the given token
    pub fn collect_arguments(&self, option: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|o| o.option() == option)
            .filter_map(|o| o.argument())
            .collect()
    }

    /// Copy of these options adjusted for a pass of the given depth
    pub fn for_recursion(&self, recurse: bool) -> Self {
        let mut options = self.clone();
        if recurse {
            options.remove(LocalOption::DO_NOT_RECURSE);
        } else {
            options.remove(LocalOption::RECURSE);
            options.add(LocalOption::do_not_recurse());
        }
        options
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocalOption> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Display form of each option, for logs and assertions
    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(|o| o.to_string()).collect()
    }
}

impl FromIterator<LocalOption> for LocalOptions {
    fn from_iter<I: IntoIterator<Item = LocalOption>>(iter: I) -> Self {
        let mut options = Self::new();
        for option in iter {
            options.add(option);
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_does_not_duplicate() {
        let mut options = LocalOptions::new();
        options.add(LocalOption::message(Some("first")));
        options.add(LocalOption::message(Some("second")));
        assert_eq!(options.len(), 1);
        assert_eq!(options.find("-m").and_then(|o| o.argument()), Some("first"));
    }

    #[test]
    fn test_for_recursion_toggles_flag() {
        let options = LocalOptions::new().with(LocalOption::new(LocalOption::RECURSE));
        let shallow = options.for_recursion(false);
        assert!(shallow.contains("-l"));
        assert!(!shallow.contains("-R"));

        let deep = shallow.for_recursion(true);
        assert!(!deep.contains("-l"));

        let twice = shallow.for_recursion(false);
        assert_eq!(twice.collect_arguments("-l").len(), 0);
        assert_eq!(twice.iter().filter(|o| o.option() == "-l").count(), 1);
    }

    #[test]
    fn test_tag_options() {
        let branch = Tag::branch("B1");
        let option = LocalOption::tag(&branch).unwrap();
        assert_eq!(option.tokens(), vec!["-r".to_string(), "B1".to_string()]);

        let date = Tag::date("2024-01-01 00:00:00 +0000");
        assert_eq!(LocalOption::tag(&date).unwrap().option(), "-D");

        assert!(LocalOption::tag(&Tag::head()).is_err());
    }

    #[test]
    fn test_ksubst_modes() {
        assert_eq!(KSubstMode::from_mode("-kb"), Some(KSubstMode::Binary));
        assert_eq!(KSubstMode::from_mode(""), Some(KSubstMode::TextExpand));
        assert!(KSubstMode::Binary.is_binary());
        assert!(!KSubstMode::Text.is_binary());
        assert_eq!(KSubstMode::from_mode("-kx"), None);
    }

    #[test]
    fn test_display_quotes_argument() {
        assert_eq!(LocalOption::message(Some("fix it")).to_string(), "-m \"fix it\"");
        assert_eq!(LocalOption::message(None).to_string(), "-m");
    }
}
