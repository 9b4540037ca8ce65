//! Unit file format
//!
//! ```text
//! # comments start with '#'
//! unit app.Main
//!
//! proc init
//!   resource conf/app.properties
//! end
//!
//! proc main
//!   load lib.Util
//!   call lib.Util greet
//!   lookup lib.Plugin
//!   resources META-INF/services/lib.Plugin
//!   defer 50 load lib.Late
//!   arg 0
//! end
//! ```

use std::collections::HashMap;
use std::str::FromStr;

use super::error::ExecError;

/// Read just the declared name from a unit file.
///
/// Returns `None` when the first meaningful line is not a `unit <name>`
/// header with a valid name.
pub fn sniff_unit_name(content: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(content).ok()?;
    let header = meaningful_lines(text).next()?.1;
    parse_header(header)
}

fn parse_header(line: &str) -> Option<String> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "unit" {
        return None;
    }
    let name = parts.next()?;
    if parts.next().is_some() || !is_valid_name(name) {
        return None;
    }
    Some(name.to_string())
}

/// Dotted identifier: segments of `[A-Za-z0-9_$-]`, no empty segment
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '-'))
        })
}

/// Non-blank, non-comment lines with their 1-based line numbers
fn meaningful_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines().enumerate().filter_map(|(i, line)| {
        let line = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        }
        .trim();
        (!line.is_empty()).then_some((i + 1, line))
    })
}

/// A single instruction of a proc
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Resolve a unit through the current resolver and initialise it
    Load(String),
    /// Resolve a unit and run one of its procs
    Call { unit: String, proc_name: String },
    /// Resolve a unit through the ambient chain only
    Lookup(String),
    /// First resource ending with the suffix
    Resource(String),
    /// Every resource ending with the suffix
    Resources(String),
    /// Run an instruction on a background thread after a delay
    Defer { millis: u64, then: Box<Instruction> },
    /// Load the unit named by a main argument
    Arg(usize),
    /// Raise a failure unrelated to resolution
    Fail(String),
}

impl FromStr for Instruction {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (op, rest) = match line.split_once(char::is_whitespace) {
            Some((op, rest)) => (op, rest.trim()),
            None => (line, ""),
        };
        let single_name = |what: &str| -> Result<String, String> {
            if rest.is_empty() || rest.contains(char::is_whitespace) {
                return Err(format!("`{op}` expects exactly one {what}"));
            }
            Ok(rest.to_string())
        };
        let unit_name = || -> Result<String, String> {
            let name = single_name("unit name")?;
            if is_valid_name(&name) {
                Ok(name)
            } else {
                Err(format!("invalid unit name `{name}`"))
            }
        };

        match op {
            "load" => Ok(Instruction::Load(unit_name()?)),
            "lookup" => Ok(Instruction::Lookup(unit_name()?)),
            "call" => {
                let mut parts = rest.split_whitespace();
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(unit), Some(proc_name), None) if is_valid_name(unit) => {
                        Ok(Instruction::Call {
                            unit: unit.to_string(),
                            proc_name: proc_name.to_string(),
                        })
                    }
                    _ => Err("`call` expects a unit name and a proc name".to_string()),
                }
            }
            "resource" => Ok(Instruction::Resource(single_name("resource path")?)),
            "resources" => Ok(Instruction::Resources(single_name("resource path")?)),
            "defer" => {
                let (millis, then) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| "`defer` expects a delay and an instruction".to_string())?;
                let millis = millis
                    .parse::<u64>()
                    .map_err(|_| format!("invalid delay `{millis}`"))?;
                let then: Instruction = then.trim().parse()?;
                if matches!(then, Instruction::Defer { .. }) {
                    return Err("`defer` cannot be nested".to_string());
                }
                Ok(Instruction::Defer {
                    millis,
                    then: Box::new(then),
                })
            }
            "arg" => rest
                .parse::<usize>()
                .map(Instruction::Arg)
                .map_err(|_| format!("invalid argument index `{rest}`")),
            "fail" => Ok(Instruction::Fail(rest.to_string())),
            other => Err(format!("unknown instruction `{other}`")),
        }
    }
}

/// Fully parsed unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitProgram {
    pub name: String,
    procs: HashMap<String, Vec<Instruction>>,
}

impl UnitProgram {
    /// Entry method run by an invocation
    pub const ENTRY_PROC: &'static str = "main";
    /// Run once, the first time a unit is loaded
    pub const INIT_PROC: &'static str = "init";

    pub fn parse(content: &[u8]) -> Result<Self, ExecError> {
        let text = std::str::from_utf8(content).map_err(|_| ExecError::Malformed {
            unit: "<unknown>".to_string(),
            line: 0,
            reason: "unit is not valid UTF-8".to_string(),
        })?;
        let mut lines = meaningful_lines(text);

        let name = lines
            .next()
            .and_then(|(_, line)| parse_header(line))
            .ok_or_else(|| ExecError::Malformed {
                unit: "<unknown>".to_string(),
                line: 1,
                reason: "missing `unit <name>` header".to_string(),
            })?;
        let malformed = |line: usize, reason: String| ExecError::Malformed {
            unit: name.clone(),
            line,
            reason,
        };

        let mut procs = HashMap::new();
        let mut current: Option<(String, Vec<Instruction>)> = None;
        for (number, line) in lines {
            match (line.strip_prefix("proc "), line == "end", current.take()) {
                (Some(proc_name), _, None) => {
                    let proc_name = proc_name.trim();
                    if procs.contains_key(proc_name) {
                        return Err(malformed(number, format!("duplicate proc `{proc_name}`")));
                    }
                    current = Some((proc_name.to_string(), Vec::new()));
                }
                (Some(_), _, Some(_)) => {
                    return Err(malformed(number, "`proc` inside another proc".to_string()));
                }
                (None, true, Some((proc_name, body))) => {
                    procs.insert(proc_name, body);
                }
                (None, true, None) => {
                    return Err(malformed(number, "`end` outside of a proc".to_string()));
                }
                (None, false, Some((proc_name, mut body))) => {
                    body.push(line.parse().map_err(|reason| malformed(number, reason))?);
                    current = Some((proc_name, body));
                }
                (None, false, None) => {
                    return Err(malformed(number, "instruction outside of a proc".to_string()));
                }
            }
        }
        if let Some((proc_name, _)) = current {
            return Err(malformed(0, format!("proc `{proc_name}` is missing `end`")));
        }

        Ok(Self { name, procs })
    }

    pub fn proc_body(&self, proc_name: &str) -> Option<&[Instruction]> {
        self.procs.get(proc_name).map(Vec::as_slice)
    }

    pub fn has_proc(&self, proc_name: &str) -> bool {
        self.procs.contains_key(proc_name)
    }
}
