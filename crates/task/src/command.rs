//! Oracle and candidate backed by an external command
//!
//! Every check writes its fragments into a fresh scratch directory, runs the
//! command there with the fragment paths as trailing arguments, and pulls the
//! diagnostic codes out of everything the command printed.

use crosscheck_core::{
    Candidate, Configuration, Error, Oracle, Result, SourceFragment, UNKNOWN_FRESHNESS_KEY,
};
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Output};

/// Matches `error TS2322:` as well as plain `error 2322`
pub const DEFAULT_CODE_PATTERN: &str = r"error\s+[A-Za-z]*(\d+)";

#[derive(Debug, Clone)]
pub struct CommandChecker {
    program: String,
    args: Vec<String>,
    pattern: Regex,
}

impl CommandChecker {
    /// Parse a shell-style command line such as `tsc --noEmit --pretty false`
    pub fn parse(command_line: &str) -> Result<Self> {
        let mut words = shlex::split(command_line)
            .ok_or_else(|| Error::configuration(format!("cannot parse command '{command_line}'")))?
            .into_iter();
        let program = words
            .next()
            .ok_or_else(|| Error::configuration("command must not be empty"))?;
        Ok(Self {
            program,
            args: words.collect(),
            pattern: compile_pattern(DEFAULT_CODE_PATTERN)?,
        })
    }

    /// Use a different pattern; its first capture group is the code
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        self.pattern = compile_pattern(pattern)?;
        Ok(self)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// First line of `<program> --version`, or `"unknown"`
    pub fn freshness_key(&self) -> String {
        let output = Command::new(&self.program).arg("--version").output();
        let key = match output {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|line| line.trim().to_string())
                .unwrap_or_default(),
            Ok(output) => {
                tracing::debug!(program = %self.program, status = %output.status, "Version query failed");
                String::new()
            }
            Err(e) => {
                tracing::debug!(program = %self.program, error = %e, "Version query failed");
                String::new()
            }
        };
        if key.is_empty() {
            UNKNOWN_FRESHNESS_KEY.to_string()
        } else {
            key
        }
    }

    /// Codes in the order they were printed
    pub fn parse_codes(&self, output: &str) -> Vec<u32> {
        self.pattern
            .captures_iter(output)
            .filter_map(|captures| captures.get(1)?.as_str().parse().ok())
            .collect()
    }

    fn run(&self, fragments: &[SourceFragment], configuration: &Configuration) -> Result<Vec<u32>> {
        let scratch = tempfile::tempdir().map_err(|e| {
            Error::file_system(std::env::temp_dir(), "create scratch directory", e)
        })?;

        let mut files = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let relative = scratch_name(&fragment.name)?;
            let path = scratch.path().join(&relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::file_system(parent, "create fragment directory", e))?;
            }
            std::fs::write(&path, &fragment.content)
                .map_err(|e| Error::file_system(&path, "write fragment", e))?;
            files.push(relative);
        }

        let mut args = self.args.clone();
        for (key, value) in configuration.iter() {
            args.push(format!("--{key}"));
            args.push(value.clone());
        }
        args.extend(files.iter().map(|file| file.to_string_lossy().into_owned()));

        let output = Command::new(&self.program)
            .args(&args)
            .current_dir(scratch.path())
            .output()
            .map_err(|e| {
                Error::command_execution(&self.program, args.clone(), format!("failed to run: {e}"), None)
            })?;
        self.codes_from(&output, args)
    }

    fn codes_from(&self, output: &Output, args: Vec<String>) -> Result<Vec<u32>> {
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push('\n');
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let codes = self.parse_codes(&text);

        // Checkers exit non-zero when they report errors; only a signal or a
        // failing exit with nothing to show for it is a failure
        let failed = match output.status.code() {
            None => true,
            Some(0) => false,
            Some(_) => codes.is_empty(),
        };
        if failed {
            let tail: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).rev().take(5).collect();
            let message = if tail.is_empty() {
                "no output".to_string()
            } else {
                tail.join(" | ")
            };
            return Err(Error::command_exited(&self.program, args, message, &output.status));
        }
        Ok(codes)
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    let regex = Regex::new(pattern)
        .map_err(|e| Error::configuration(format!("invalid code pattern '{pattern}': {e}")))?;
    if regex.captures_len() < 2 {
        return Err(Error::configuration(format!(
            "code pattern '{pattern}' needs a capture group for the code"
        )));
    }
    Ok(regex)
}

/// Fragment name as a path that stays inside the scratch directory
fn scratch_name(name: &str) -> Result<PathBuf> {
    let path: PathBuf = Path::new(name)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    if path.as_os_str().is_empty() {
        return Err(Error::configuration(format!("invalid fragment name '{name}'")));
    }
    Ok(path)
}

impl Oracle for CommandChecker {
    fn check(&self, fragments: &[SourceFragment], configuration: &Configuration) -> Result<Vec<u32>> {
        self.run(fragments, configuration)
    }
}

impl Candidate for CommandChecker {
    fn check(&self, fragments: &[SourceFragment], configuration: &Configuration) -> Result<Vec<u32>> {
        self.run(fragments, configuration)
    }
}
