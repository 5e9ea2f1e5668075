//! Command templating: `{key}` placeholders resolved against an [`Environment`].

use std::fmt;
use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::env::Environment;
use crate::core::types::ConfigError;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}|\{|\}").expect("placeholder regex")
});

/// A command line as a list of argument templates.
///
/// `{{` and `}}` produce literal braces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandTemplate {
    args: Vec<String>,
}

/// A fully resolved command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCommand {
    pub program: String,
    pub args: Vec<String>,
}

enum Piece<'a> {
    Literal(&'a str),
    Key(&'a str),
}

impl CommandTemplate {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a command line on whitespace. No shell quoting is interpreted.
    pub fn parse(line: &str) -> Self {
        Self::new(line.split_whitespace())
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Every placeholder key, in argument order (duplicates kept).
    pub fn placeholders(&self) -> Result<Vec<String>, ConfigError> {
        let mut keys = Vec::new();
        for arg in &self.args {
            for piece in split_arg(arg)? {
                if let Piece::Key(key) = piece {
                    keys.push(key.to_string());
                }
            }
        }
        Ok(keys)
    }

    /// Substitute every placeholder.
    ///
    /// Fails on the first undefined key in argument order; nothing is spawned
    /// by the caller in that case.
    pub fn resolve(&self, env: &Environment) -> Result<ResolvedCommand, ConfigError> {
        let mut argv = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            let pieces = split_arg(arg)?;
            if let [Piece::Key(key)] = pieces.as_slice() {
                argv.extend(env.require(key)?.to_args());
                continue;
            }
            let mut rendered = String::new();
            for piece in pieces {
                match piece {
                    Piece::Literal(text) => rendered.push_str(text),
                    Piece::Key(key) => rendered.push_str(&env.require(key)?.render()),
                }
            }
            argv.push(rendered);
        }

        let mut argv = argv.into_iter();
        let program = argv.next().ok_or_else(|| ConfigError::InvalidTemplate {
            template: self.to_string(),
            reason: "resolves to an empty command".to_string(),
        })?;
        if program.trim().is_empty() {
            return Err(ConfigError::InvalidTemplate {
                template: self.to_string(),
                reason: "program is empty".to_string(),
            });
        }
        Ok(ResolvedCommand {
            program,
            args: argv.collect(),
        })
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.args.join(" "))
    }
}

impl ResolvedCommand {
    /// Build a [`Command`] rooted at `workdir`.
    pub fn to_command(&self, workdir: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).current_dir(workdir);
        command
    }
}

impl fmt::Display for ResolvedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Resolve a single string (not an argv) against `env`. Flags are space joined.
pub fn render_str(template: &str, env: &Environment) -> Result<String, ConfigError> {
    let mut rendered = String::new();
    for piece in split_arg(template)? {
        match piece {
            Piece::Literal(text) => rendered.push_str(text),
            Piece::Key(key) => rendered.push_str(&env.require(key)?.render()),
        }
    }
    Ok(rendered)
}

fn split_arg(arg: &str) -> Result<Vec<Piece<'_>>, ConfigError> {
    let mut pieces = Vec::new();
    let mut last = 0;
    for caps in PLACEHOLDER_RE.captures_iter(arg) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if whole.start() > last {
            pieces.push(Piece::Literal(&arg[last..whole.start()]));
        }
        match whole.as_str() {
            "{{" => pieces.push(Piece::Literal("{")),
            "}}" => pieces.push(Piece::Literal("}")),
            "{" | "}" => {
                return Err(ConfigError::InvalidTemplate {
                    template: arg.to_string(),
                    reason: format!("unbalanced `{}` at byte {}", whole.as_str(), whole.start()),
                });
            }
            _ => {
                if let Some(key) = caps.get(1) {
                    pieces.push(Piece::Key(key.as_str()));
                }
            }
        }
        last = whole.end();
    }
    if last < arg.len() {
        pieces.push(Piece::Literal(&arg[last..]));
    }
    Ok(pieces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::env::Value;
    use std::path::PathBuf;

    fn env() -> Environment {
        let mut env = Environment::new("/tests", "build");
        env.set("bc2firm", "bytecode2firm");
        env.set("classname", "Hello");
        env.set("executable", PathBuf::from("build/Hello.exe"));
        env
    }

    #[test]
    fn resolves_placeholders_in_order() {
        let mut env = env();
        env.set("bc2firmflags", Value::flags_from_str("-O3 -g"));
        let template =
            CommandTemplate::parse("{bc2firm} {classname} {bc2firmflags} -o {executable}");
        let command = template.resolve(&env).expect("resolve");
        assert_eq!(command.program, "bytecode2firm");
        assert_eq!(
            command.args,
            vec!["Hello", "-O3", "-g", "-o", "build/Hello.exe"]
        );
    }

    #[test]
    fn empty_flags_contribute_no_argument() {
        let mut env = env();
        env.set("bc2firmflags", Value::flags_from_str(""));
        let template = CommandTemplate::parse("{bc2firm} {classname} {bc2firmflags} -o out");
        let command = template.resolve(&env).expect("resolve");
        assert_eq!(command.args, vec!["Hello", "-o", "out"]);
    }

    #[test]
    fn composes_values_inside_an_argument() {
        let env = env();
        let rendered = render_str("{builddir}/{classname}.exe", &env).expect("render");
        assert_eq!(rendered, "build/Hello.exe");
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        let env = env();
        let template = CommandTemplate::parse("{javac} {testname}");
        let err = template.resolve(&env).expect_err("missing key");
        assert_eq!(
            err,
            ConfigError::MissingConfiguration {
                key: "javac".to_string()
            }
        );
    }

    #[test]
    fn escaped_braces_are_literal() {
        let env = env();
        let template = CommandTemplate::new(["echo", "{{{classname}}}"]);
        let command = template.resolve(&env).expect("resolve");
        assert_eq!(command.args, vec!["{Hello}"]);
    }

    #[test]
    fn unbalanced_brace_is_rejected() {
        let template = CommandTemplate::new(["echo", "{classname"]);
        let err = template.resolve(&env()).expect_err("unbalanced");
        assert!(matches!(err, ConfigError::InvalidTemplate { .. }));
    }

    #[test]
    fn lists_placeholders() {
        let template = CommandTemplate::parse("{javac} {testname} -d {builddir}");
        assert_eq!(
            template.placeholders().expect("placeholders"),
            vec!["javac", "testname", "builddir"]
        );
    }

    #[test]
    fn resolution_is_order_independent_of_env_construction() {
        let mut first = Environment::default();
        first.set("a", "1");
        first.set("b", "2");
        let mut second = Environment::default();
        second.set("b", "2");
        second.set("a", "1");
        let template = CommandTemplate::parse("prog {a} {b}");
        assert_eq!(template.resolve(&first), template.resolve(&second));
    }

    #[test]
    fn display_joins_arguments() {
        let command = ResolvedCommand {
            program: "javac".to_string(),
            args: vec!["Hello.java".to_string()],
        };
        assert_eq!(command.to_string(), "javac Hello.java");
    }
}
