use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const HELP_TEXT: &str = "\
Usage: warden [OPTIONS] <COMMAND>...

Commands:
  -h          show this help
  -e=PATH     encrypt the file or directory at PATH (asks for a password)
  -d=PATH     decrypt the file or directory at PATH (asks for a password)
  -a=PATH     add PATH to the protected paths list
  -r=PATH     remove PATH from the protected paths list
  -p          decrypt every protected path (asks for a password)
  -c          encrypt every protected path, then stop the service (asks for a password)
  -vp         show the protected paths list

Options:
  --socket <PATH>        service socket to use
  --service-bin <PATH>   service executable to start when none is running";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Help,
    Encrypt,
    Decrypt,
    Add,
    Remove,
    DecryptCatalog,
    EncryptCatalog,
    ViewCatalog,
}

impl Verb {
    pub const ALL: [Verb; 8] = [
        Verb::Help,
        Verb::Encrypt,
        Verb::Decrypt,
        Verb::Add,
        Verb::Remove,
        Verb::DecryptCatalog,
        Verb::EncryptCatalog,
        Verb::ViewCatalog,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Verb::Help => "-h",
            Verb::Encrypt => "-e=",
            Verb::Decrypt => "-d=",
            Verb::Add => "-a=",
            Verb::Remove => "-r=",
            Verb::DecryptCatalog => "-p",
            Verb::EncryptCatalog => "-c",
            Verb::ViewCatalog => "-vp",
        }
    }

    /// Matches the verb part of a raw token: everything up to and including
    /// the first `=`, or the whole token when there is none.
    pub fn of(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let prefix = match raw.find('=') {
            Some(idx) => &raw[..=idx],
            None => raw,
        };
        Verb::ALL.into_iter().find(|v| v.token() == prefix)
    }

    pub fn takes_path(self) -> bool {
        matches!(self, Verb::Encrypt | Verb::Decrypt | Verb::Add | Verb::Remove)
    }

    pub fn requires_password(self) -> bool {
        matches!(
            self,
            Verb::Encrypt | Verb::Decrypt | Verb::DecryptCatalog | Verb::EncryptCatalog
        )
    }
}

/// One parsed command token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: Verb,
    pub path: Option<String>,
}

impl Command {
    pub fn parse(raw: &str) -> Result<Self> {
        let verb = Verb::of(raw).ok_or_else(|| {
            WardenError::InvalidArgument(format!(
                "No such argument, please try -h argument for help [argument={raw}]"
            ))
        })?;
        if !verb.takes_path() {
            return Ok(Self { verb, path: None });
        }
        let trimmed = raw.trim();
        let argument = clean_path_argument(&trimmed[verb.token().len()..]);
        if argument.is_empty() {
            return Err(WardenError::InvalidArgument("Path cannot be empty".into()));
        }
        Ok(Self {
            verb,
            path: Some(argument),
        })
    }
}

/// Strips surrounding whitespace and any double quotes.
pub fn clean_path_argument(raw: &str) -> String {
    raw.replace('"', "").trim().to_string()
}

/// Outcome of one command, as rendered to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum CommandResult {
    Success(String),
    Warning(String),
    Error(String),
}

impl CommandResult {
    pub fn message(&self) -> &str {
        match self {
            CommandResult::Success(m) | CommandResult::Warning(m) | CommandResult::Error(m) => m,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CommandResult::Error(_))
    }
}

impl From<WardenError> for CommandResult {
    fn from(err: WardenError) -> Self {
        match err {
            WardenError::SecurityViolation(_) => CommandResult::Warning(err.to_string()),
            other => CommandResult::Error(other.to_string()),
        }
    }
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CommandResult::Success(_) => "Success",
            CommandResult::Warning(_) => "Warning",
            CommandResult::Error(_) => "Error",
        };
        write!(f, "[{label}]: {}", self.message())
    }
}
