//! Relaunch contract between generations
//!
//! A [`ResumeToken`] is everything a relaunched generation needs. On the
//! command line it travels as
//!
//! ```text
//! --token-version <v> --generation <n> <scan paths> <entry point> <destination> <include:bool> <linger millis> [main arguments...]
//! ```
//!
//! while the ambient search path travels in `DEPCAPTURE_SEARCH_PATH`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::paths::{join_path_list, split_path_list};

/// Current token layout
pub const RESUME_TOKEN_VERSION: u32 = 1;

const VERSION_FLAG: &str = "--token-version";
const GENERATION_FLAG: &str = "--generation";
const POSITIONAL_COUNT: usize = 5;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResumeTokenError {
    #[error("unsupported resume token version {0} (expected {RESUME_TOKEN_VERSION})")]
    UnsupportedVersion(u32),
    #[error("resume arguments are missing `{0}`")]
    Missing(&'static str),
    #[error("invalid value `{value}` for {field}")]
    Invalid { field: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeToken {
    pub version: u32,
    /// Generation the token launches, starting at 2
    pub generation: u32,
    /// Paths the relaunched generation indexes
    pub scan_paths: Vec<PathBuf>,
    /// Ambient search path of the relaunched generation
    pub search_path: Vec<PathBuf>,
    pub entry_point: String,
    pub destination: PathBuf,
    pub include_entry_point: bool,
    pub linger: Option<Duration>,
    pub main_arguments: Vec<String>,
}

impl ResumeToken {
    pub fn linger_millis(&self) -> u64 {
        self.linger
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    /// Command-line form; the search path is not part of it
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            VERSION_FLAG.to_string(),
            self.version.to_string(),
            GENERATION_FLAG.to_string(),
            self.generation.to_string(),
            join_path_list(self.scan_paths.iter().cloned()),
            self.entry_point.clone(),
            self.destination.display().to_string(),
            self.include_entry_point.to_string(),
            self.linger_millis().to_string(),
        ];
        args.extend(self.main_arguments.iter().cloned());
        args
    }

    /// Parse the command-line form produced by [`to_args`](Self::to_args).
    /// `search_path` comes from the environment of the relaunched process.
    pub fn from_args(args: &[String], search_path: Vec<PathBuf>) -> Result<Self, ResumeTokenError> {
        let mut version = RESUME_TOKEN_VERSION;
        let mut generation = 2;
        let mut rest = args;
        loop {
            match rest {
                [flag, value, tail @ ..] if flag == VERSION_FLAG => {
                    version = parse_number("token version", value)?;
                    rest = tail;
                }
                [flag, value, tail @ ..] if flag == GENERATION_FLAG => {
                    generation = parse_number("generation", value)?;
                    rest = tail;
                }
                [flag] if flag == VERSION_FLAG || flag == GENERATION_FLAG => {
                    return Err(ResumeTokenError::Missing("flag value"));
                }
                _ => break,
            }
        }
        if version != RESUME_TOKEN_VERSION {
            return Err(ResumeTokenError::UnsupportedVersion(version));
        }

        let [scan_paths, entry_point, destination, include, linger] = match rest.get(..POSITIONAL_COUNT) {
            Some([a, b, c, d, e]) => [a, b, c, d, e],
            _ => {
                let names = ["scan paths", "entry point", "destination", "include flag", "linger millis"];
                return Err(ResumeTokenError::Missing(names[rest.len().min(POSITIONAL_COUNT - 1)]));
            }
        };

        if entry_point.is_empty() {
            return Err(ResumeTokenError::Missing("entry point"));
        }
        let include_entry_point = include.parse::<bool>().map_err(|_| ResumeTokenError::Invalid {
            field: "include flag",
            value: include.clone(),
        })?;
        let linger_millis: u64 = parse_number("linger millis", linger)?;

        Ok(Self {
            version,
            generation,
            scan_paths: split_path_list(scan_paths),
            search_path,
            entry_point: entry_point.clone(),
            destination: PathBuf::from(destination),
            include_entry_point,
            linger: (linger_millis > 0).then(|| Duration::from_millis(linger_millis)),
            main_arguments: rest[POSITIONAL_COUNT..].to_vec(),
        })
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ResumeTokenError> {
    value.parse().map_err(|_| ResumeTokenError::Invalid {
        field,
        value: value.to_string(),
    })
}
