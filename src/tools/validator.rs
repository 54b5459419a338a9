//! Command Validation Module
//!
//! This module provides command validation to prevent shell injection attacks.
//! It uses a whitelist approach to ensure only known-safe commands can be executed,
//! then scans every argument for injection, destructive patterns, environment
//! expansion and path traversal.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::path_safety::{escapes_start, DefaultPathSafety, PathSafety};

/// Machine-readable classification of a rejected command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskClass {
    UnauthorizedCommand,
    CommandInjection,
    DangerousArgument,
    UnsafePath,
    PathTraversal,
    EnvVarExpansion,
}

impl RiskClass {
    /// Stable string form, used in logs and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskClass::UnauthorizedCommand => "UNAUTHORIZED_COMMAND",
            RiskClass::CommandInjection => "COMMAND_INJECTION",
            RiskClass::DangerousArgument => "DANGEROUS_ARGUMENT",
            RiskClass::UnsafePath => "UNSAFE_PATH",
            RiskClass::PathTraversal => "PATH_TRAVERSAL",
            RiskClass::EnvVarExpansion => "ENV_VAR_EXPANSION",
        }
    }
}

impl fmt::Display for RiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types for command validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandValidationError {
    #[error("Command is empty")]
    EmptyCommand,

    #[error("Command '{0}' contains shell syntax")]
    CompoundCommand(String),

    #[error("Command '{command}' is not in the allowed whitelist{}", pattern_note(.pattern))]
    NotAllowed {
        command: String,
        pattern: Option<String>,
    },

    #[error("Command '{0}' does not resolve to an executable file")]
    NotExecutable(String),

    #[error("Command argument '{argument}' contains shell metacharacter {metachar:?}")]
    ShellMetacharacter { argument: String, metachar: String },

    #[error("Command argument '{argument}' matches dangerous pattern '{pattern}'")]
    DangerousPattern { argument: String, pattern: String },

    #[error("Command argument '{0}' contains environment variable expansion")]
    EnvVarExpansion(String),

    #[error("Command path contains directory traversal: '{0}'")]
    DirectoryTraversal(String),

    #[error("Command path failed the path safety check: '{0}'")]
    UnsafePath(String),
}

fn pattern_note(pattern: &Option<String>) -> String {
    match pattern {
        Some(p) => format!(" (matches dangerous pattern '{}')", p),
        None => String::new(),
    }
}

impl CommandValidationError {
    /// Risk classification for this rejection
    pub fn risk_class(&self) -> RiskClass {
        match self {
            CommandValidationError::EmptyCommand
            | CommandValidationError::NotAllowed { .. }
            | CommandValidationError::NotExecutable(_) => RiskClass::UnauthorizedCommand,
            CommandValidationError::CompoundCommand(_)
            | CommandValidationError::ShellMetacharacter { .. } => RiskClass::CommandInjection,
            CommandValidationError::DangerousPattern { .. } => RiskClass::DangerousArgument,
            CommandValidationError::EnvVarExpansion(_) => RiskClass::EnvVarExpansion,
            CommandValidationError::DirectoryTraversal(_) => RiskClass::PathTraversal,
            CommandValidationError::UnsafePath(_) => RiskClass::UnsafePath,
        }
    }
}

/// Safe command wrapper that has been validated
#[derive(Debug, Clone)]
pub struct SafeCommand {
    /// The command as requested by the caller
    pub command: String,

    /// Absolute path the command resolved to at validation time
    pub program: PathBuf,

    /// The arguments to pass to the command
    pub args: Vec<String>,
}

/// Shell metacharacters; `&&` and `||` are covered by their single-char forms
const SHELL_METACHARACTERS: [&str; 9] = [";", "&", "|", ">", "<", "`", "$(", "\n", "\r"];

/// Destructive command fragments (matched lowercase, whitespace-collapsed)
const DESTRUCTIVE_PATTERNS: [&str; 10] = [
    "rm -rf",
    "rm -fr",
    "rm -r -f",
    "mkfs",
    "dd if=",
    ":(){",
    "shred -",
    "chmod -r 777",
    "format c:",
    "del /f",
];

/// Attempts to reach a shell through an allow-listed binary
const SHELL_INVOCATIONS: [&str; 12] = [
    "sh -c",
    "bash -c",
    "zsh -c",
    "dash -c",
    "ksh -c",
    "/bin/sh",
    "/bin/bash",
    "/bin/zsh",
    "/usr/bin/env sh",
    "cmd /c",
    "cmd.exe",
    "powershell",
];

/// Default set of permitted executables
const DEFAULT_WHITELIST: [&str; 18] = [
    "nmap", "masscan", "nikto", "sqlmap", "gobuster", "ffuf", "whatweb", "nuclei", "subfinder",
    "curl", "dig", "whois", "ping", "traceroute", "python3", "node", "echo", "sleep",
];

/// Command validator that enforces security policies
///
/// # Security Principles
///
/// 1. **Whitelist Only**: Only known-safe executables are allowed
/// 2. **No Shell Injection**: Commands are never interpreted by a shell
/// 3. **Resolved Program**: The command must resolve to an executable file
/// 4. **Argument Sanitization**: All arguments are checked for metacharacters,
///    destructive fragments and environment expansion
/// 5. **Path Validation**: Path-like arguments cannot traverse upwards
#[derive(Debug, Clone)]
pub struct CommandValidator {
    /// Whitelist of allowed executable names
    allowed_commands: Vec<String>,

    /// Search path for bare command names (host `PATH` when `None`)
    search_path: Option<OsString>,

    /// Policy for path-like arguments
    path_safety: Arc<dyn PathSafety>,
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::with_default_whitelist()
    }
}

impl CommandValidator {
    /// Create a new validator with the default whitelist
    pub fn new() -> Self {
        Self::with_default_whitelist()
    }

    /// Create a new validator with the default whitelist
    ///
    /// The default whitelist covers the reconnaissance tools the agent drives,
    /// `python3`/`node` interpreters and the `echo`/`sleep` utilities.
    pub fn with_default_whitelist() -> Self {
        Self::with_whitelist(DEFAULT_WHITELIST.iter().map(|s| s.to_string()).collect())
    }

    /// Create a new validator with a custom whitelist
    pub fn with_whitelist(allowed: Vec<String>) -> Self {
        Self {
            allowed_commands: allowed,
            search_path: None,
            path_safety: Arc::new(DefaultPathSafety::default()),
        }
    }

    /// Resolve bare command names against this search path instead of `PATH`
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    /// Use a custom path safety policy
    pub fn with_path_safety(mut self, path_safety: Arc<dyn PathSafety>) -> Self {
        self.path_safety = path_safety;
        self
    }

    /// Validate a command and its arguments
    ///
    /// Checks run in a fixed order and stop at the first failure.
    ///
    /// # Example
    ///
    /// ```
    /// use toolguard::tools::{CommandValidator, RiskClass};
    ///
    /// let validator = CommandValidator::default();
    /// let err = validator.validate("bash", &["-c", "id"]).unwrap_err();
    /// assert_eq!(err.risk_class(), RiskClass::UnauthorizedCommand);
    /// ```
    pub fn validate<S: AsRef<str>>(
        &self,
        command: &str,
        args: &[S],
    ) -> Result<SafeCommand, CommandValidationError> {
        self.check_command_syntax(command)?;
        self.check_whitelist(command, args)?;
        let program = self.resolve_executable(command)?;

        for arg in args {
            self.check_argument(arg.as_ref())?;
        }
        self.check_joined_arguments(args)?;

        for arg in args {
            self.check_path_argument(arg.as_ref())?;
        }

        Ok(SafeCommand {
            command: command.to_string(),
            program,
            args: args.iter().map(|s| s.as_ref().to_string()).collect(),
        })
    }

    /// Reject empty commands and commands that are themselves shell expressions
    fn check_command_syntax(&self, command: &str) -> Result<(), CommandValidationError> {
        if command.trim().is_empty() {
            return Err(CommandValidationError::EmptyCommand);
        }

        let decoded = percent_decode(command);
        for form in [command, decoded.as_str()] {
            if form.chars().any(char::is_whitespace)
                || find_metacharacter(form).is_some()
                || contains_env_expansion(form)
            {
                return Err(CommandValidationError::CompoundCommand(preview(command)));
            }
        }

        Ok(())
    }

    /// Check if the command basename is in the whitelist
    fn check_whitelist<S: AsRef<str>>(
        &self,
        command: &str,
        args: &[S],
    ) -> Result<(), CommandValidationError> {
        if self.is_allowed(command) {
            return Ok(());
        }

        let mut line = command_basename(command);
        for arg in args {
            line.push(' ');
            line.push_str(arg.as_ref());
        }

        Err(CommandValidationError::NotAllowed {
            command: preview(command),
            pattern: find_dangerous_pattern(&line).map(str::to_string),
        })
    }

    /// Resolve the command to an executable file
    fn resolve_executable(&self, command: &str) -> Result<PathBuf, CommandValidationError> {
        if command.contains('/') || command.contains('\\') {
            if escapes_start(command) {
                return Err(CommandValidationError::DirectoryTraversal(preview(command)));
            }
            let path = PathBuf::from(command);
            if !is_executable_file(&path) {
                return Err(CommandValidationError::NotExecutable(preview(command)));
            }
            return Ok(path);
        }

        let resolved = match &self.search_path {
            Some(search_path) => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
                which::which_in(command, Some(search_path), cwd)
            }
            None => which::which(command),
        };

        resolved.map_err(|_| CommandValidationError::NotExecutable(preview(command)))
    }

    /// Scan a single argument for injection, destructive fragments and env expansion
    fn check_argument(&self, arg: &str) -> Result<(), CommandValidationError> {
        if let Some(pattern) = find_dangerous_pattern(arg) {
            return Err(CommandValidationError::DangerousPattern {
                argument: preview(arg),
                pattern: pattern.to_string(),
            });
        }

        if let Some(metachar) = find_metacharacter(arg) {
            return Err(CommandValidationError::ShellMetacharacter {
                argument: preview(arg),
                metachar: metachar.to_string(),
            });
        }

        if contains_env_expansion(arg) {
            return Err(CommandValidationError::EnvVarExpansion(preview(arg)));
        }

        Ok(())
    }

    /// Catch destructive patterns split across several arguments
    fn check_joined_arguments<S: AsRef<str>>(
        &self,
        args: &[S],
    ) -> Result<(), CommandValidationError> {
        let joined = args
            .iter()
            .map(|s| s.as_ref())
            .collect::<Vec<_>>()
            .join(" ");

        match find_dangerous_pattern(&joined) {
            Some(pattern) => Err(CommandValidationError::DangerousPattern {
                argument: preview(&joined),
                pattern: pattern.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Re-validate arguments that look like filesystem paths
    fn check_path_argument(&self, arg: &str) -> Result<(), CommandValidationError> {
        let Some(candidate) = path_candidate(arg) else {
            return Ok(());
        };

        if escapes_start(candidate) {
            return Err(CommandValidationError::DirectoryTraversal(preview(arg)));
        }

        if !self.path_safety.is_path_safe(candidate) {
            return Err(CommandValidationError::UnsafePath(preview(arg)));
        }

        Ok(())
    }

    /// Get the current whitelist
    pub fn whitelist(&self) -> &[String] {
        &self.allowed_commands
    }

    /// Add a command to the whitelist
    pub fn allow_command(&mut self, command: impl Into<String>) {
        let command = command.into();
        if !self.allowed_commands.contains(&command) {
            self.allowed_commands.push(command);
        }
    }

    /// Check if a command (bare or path-qualified) is in the whitelist
    pub fn is_allowed(&self, command: &str) -> bool {
        let name = command_basename(command);
        !name.is_empty() && self.allowed_commands.iter().any(|allowed| *allowed == name)
    }
}

/// Basename of a command, with `.exe` stripped on Windows
fn command_basename(command: &str) -> String {
    let name = command
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(command);

    if cfg!(windows) {
        let lower = name.to_ascii_lowercase();
        if let Some(stripped) = lower.strip_suffix(".exe") {
            return stripped.to_string();
        }
        return lower;
    }
    name.to_string()
}

fn find_metacharacter(input: &str) -> Option<&'static str> {
    SHELL_METACHARACTERS
        .iter()
        .copied()
        .find(|m| input.contains(m))
}

fn find_dangerous_pattern(input: &str) -> Option<&'static str> {
    let normalized = input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    DESTRUCTIVE_PATTERNS
        .iter()
        .chain(SHELL_INVOCATIONS.iter())
        .copied()
        .find(|pattern| normalized.contains(pattern))
}

/// Environment expansion syntax for the host platform
fn contains_env_expansion(input: &str) -> bool {
    if cfg!(windows) {
        contains_windows_env_expansion(input)
    } else {
        contains_unix_env_expansion(input)
    }
}

/// `$NAME`, `${NAME}` and positional `$1` forms
fn contains_unix_env_expansion(input: &str) -> bool {
    let bytes = input.as_bytes();
    bytes.windows(2).any(|pair| {
        pair[0] == b'$' && (pair[1] == b'{' || pair[1] == b'_' || pair[1].is_ascii_alphanumeric())
    })
}

/// `%NAME%` form
fn contains_windows_env_expansion(input: &str) -> bool {
    let mut rest = input;
    while let Some(start) = rest.find('%') {
        let after = &rest[start + 1..];
        match after.find('%') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                if name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '(' || c == ')')
                {
                    return true;
                }
                rest = &after[end..];
            }
            Some(_) => rest = &after[1..],
            None => return false,
        }
    }
    false
}

/// The part of an argument that should be treated as a path, if any
///
/// `--flag=value` and `-f=value` yield `value`. A short flag with an attached
/// value (`-o../x`) yields the text after the flag letter, a bare long flag
/// the text after the dashes.
fn path_candidate(arg: &str) -> Option<&str> {
    let value = match arg.split_once('=') {
        Some((_, value)) if arg.starts_with('-') => value,
        _ => {
            if let Some(long) = arg.strip_prefix("--") {
                long
            } else if let Some(short) = arg.strip_prefix('-') {
                short
                    .char_indices()
                    .nth(1)
                    .map_or("", |(i, _)| &short[i..])
            } else {
                arg
            }
        }
    };

    if value.contains("://") {
        return None;
    }

    let looks_like_path = value.contains('/')
        || value.contains('\\')
        || value == ".."
        || value.starts_with('~');

    looks_like_path.then_some(value)
}

/// Decode `%XX` escapes; malformed escapes are kept verbatim
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(byte) = decoded {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Shorten user-provided text for error messages
fn preview(input: &str) -> String {
    const MAX_PREVIEW: usize = 64;
    if input.chars().count() <= MAX_PREVIEW {
        return input.to_string();
    }
    let mut out: String = input.chars().take(MAX_PREVIEW).collect();
    out.push_str("...");
    out
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match path.metadata() {
        Ok(metadata) => metadata.is_file() && metadata.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn echo_validator() -> CommandValidator {
        CommandValidator::with_whitelist(vec!["echo".to_string(), "sleep".to_string()])
    }

    #[test]
    fn test_default_whitelist() {
        let validator = CommandValidator::default();

        assert!(validator.is_allowed("nmap"));
        assert!(validator.is_allowed("python3"));
        assert!(validator.is_allowed("echo"));
        assert!(validator.is_allowed("/usr/bin/nmap"));

        assert!(!validator.is_allowed("bash"));
        assert!(!validator.is_allowed("sh"));
        assert!(!validator.is_allowed("rm"));
        assert!(!validator.is_allowed("/bin/bash"));
        assert!(!validator.is_allowed(""));
    }

    #[test]
    fn test_validate_allowed_command() {
        let validator = echo_validator();

        let safe = validator.validate("echo", &["hello", "world"]).unwrap();
        assert_eq!(safe.command, "echo");
        assert!(safe.program.is_absolute());
        assert_eq!(safe.args, vec!["hello", "world"]);
    }

    #[test]
    fn test_validate_not_allowed_command() {
        let validator = echo_validator();

        let err = validator.validate("bash", &["-c", "echo test"]).unwrap_err();
        assert_eq!(err.risk_class(), RiskClass::UnauthorizedCommand);
        assert!(matches!(err, CommandValidationError::NotAllowed { .. }));
    }

    #[test]
    fn test_not_allowed_mentions_dangerous_pattern() {
        let validator = CommandValidator::default();

        let err = validator.validate("rm", &["-rf", "/"]).unwrap_err();
        assert_eq!(err.risk_class(), RiskClass::UnauthorizedCommand);
        let msg = err.to_string();
        assert!(msg.contains("dangerous pattern"), "{}", msg);
        assert!(msg.contains("rm -rf"), "{}", msg);
    }

    #[test]
    fn test_empty_command() {
        let validator = echo_validator();
        let err = validator.validate::<&str>("  ", &[]).unwrap_err();
        assert_eq!(err, CommandValidationError::EmptyCommand);
        assert_eq!(err.risk_class(), RiskClass::UnauthorizedCommand);
    }

    #[test]
    fn test_validate_shell_metacharacters_in_command() {
        let validator = echo_validator();

        let dangerous_commands = vec![
            "echo; rm -rf /",
            "echo|cat",
            "echo&whoami",
            "echo$HOME",
            "echo`whoami`",
            "echo\ncmd",
            "echo hello",
            "echo%3Bid",
            "echo%7Ccat",
        ];

        for command in dangerous_commands {
            let err = validator.validate::<&str>(command, &[]).unwrap_err();
            assert_eq!(
                err.risk_class(),
                RiskClass::CommandInjection,
                "command {:?} should be classified as injection",
                command
            );
        }
    }

    #[test]
    fn test_path_qualified_command() {
        let validator = echo_validator();
        let echo = which::which("echo").unwrap();

        let safe = validator
            .validate(echo.to_str().unwrap(), &["hi"])
            .unwrap();
        assert_eq!(safe.program, echo);
    }

    #[test]
    fn test_path_qualified_traversal_rejected() {
        let validator = echo_validator();
        let err = validator.validate::<&str>("../../bin/echo", &[]).unwrap_err();
        assert_eq!(err.risk_class(), RiskClass::PathTraversal);
    }

    #[test]
    fn test_allowed_but_missing_command() {
        let validator =
            CommandValidator::with_whitelist(vec!["this-command-does-not-exist-12345".to_string()]);
        let err = validator
            .validate::<&str>("this-command-does-not-exist-12345", &[])
            .unwrap_err();
        assert!(matches!(err, CommandValidationError::NotExecutable(_)));
        assert_eq!(err.risk_class(), RiskClass::UnauthorizedCommand);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("echo");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();

        let validator = echo_validator();
        let err = validator
            .validate::<&str>(script.to_str().unwrap(), &[])
            .unwrap_err();
        assert!(matches!(err, CommandValidationError::NotExecutable(_)));
    }

    #[test]
    fn test_custom_search_path() {
        let dir = tempfile::tempdir().unwrap();
        let validator = echo_validator().with_search_path(dir.path().as_os_str());

        let err = validator.validate::<&str>("echo", &[]).unwrap_err();
        assert!(matches!(err, CommandValidationError::NotExecutable(_)));
    }

    #[test]
    fn test_validate_shell_metacharacters_in_args() {
        let validator = echo_validator();

        let dangerous_args = vec![
            vec!["-n", "echo test;"],
            vec!["-n", "cat|evil"],
            vec!["-n", "test&evil"],
            vec!["-n", "a && b"],
            vec!["-n", "cmd`whoami`"],
            vec!["-n", "$(id)"],
            vec!["-n", "arg\ncmd"],
            vec!["-n", "arg<file"],
            vec!["-n", "arg>file"],
        ];

        for args in dangerous_args {
            let err = validator.validate("echo", &args).unwrap_err();
            assert!(
                matches!(
                    err.risk_class(),
                    RiskClass::CommandInjection | RiskClass::DangerousArgument
                ),
                "args {:?} classified as {}",
                args,
                err.risk_class()
            );
        }
    }

    #[test]
    fn test_dangerous_patterns_in_args() {
        let validator = echo_validator();

        let cases = vec![
            vec!["rm -rf /"],
            vec!["mkfs.ext4", "/dev/sda1"],
            vec!["sh -c id"],
            vec!["/bin/bash"],
            vec!["rm", "-rf", "/tmp/x"],
            vec!["dd if=/dev/zero"],
        ];

        for args in cases {
            let err = validator.validate("echo", &args).unwrap_err();
            assert_eq!(
                err.risk_class(),
                RiskClass::DangerousArgument,
                "args {:?}",
                args
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_env_var_expansion_in_args() {
        let validator = echo_validator();

        for arg in ["$HOME", "${PATH}", "prefix$USER", "$1"] {
            let err = validator.validate("echo", &[arg]).unwrap_err();
            assert_eq!(err.risk_class(), RiskClass::EnvVarExpansion, "arg {:?}", arg);
        }

        // A bare dollar sign is not expansion
        assert!(validator.validate("echo", &["cost: 5$"]).is_ok());
    }

    #[test]
    fn test_windows_env_expansion_detection() {
        assert!(contains_windows_env_expansion("%USERPROFILE%"));
        assert!(contains_windows_env_expansion("C:\\%APPDATA%\\x"));
        assert!(contains_windows_env_expansion("%ProgramFiles(x86)%"));
        assert!(!contains_windows_env_expansion("100%"));
        assert!(!contains_windows_env_expansion("50% off 20%"));
        assert!(!contains_windows_env_expansion("%%"));
    }

    #[test]
    fn test_path_traversal_in_args() {
        let validator = echo_validator();

        for arg in [
            "../etc/passwd",
            "reports/../../secrets",
            "--out=../../x",
            "..",
            "-o../../etc/passwd",
            "-I..\\..\\windows",
            "--output../../x",
            "-o..",
        ] {
            let err = validator.validate("echo", &[arg]).unwrap_err();
            assert_eq!(err.risk_class(), RiskClass::PathTraversal, "arg {:?}", arg);
        }

        // Traversal that stays inside the starting point normalizes away
        assert!(validator.validate("echo", &["reports/../summary.txt"]).is_ok());
        assert!(validator.validate("echo", &["-oreports/../summary.txt"]).is_ok());
        // Plain flags are not paths
        assert!(validator.validate("echo", &["-n", "-rf", "--verbose"]).is_ok());
    }

    #[test]
    fn test_attached_flag_values_are_path_checked() {
        let validator = echo_validator();
        let err = validator.validate("echo", &["-o/etc/shadow"]).unwrap_err();
        assert_eq!(err.risk_class(), RiskClass::UnsafePath);
    }

    #[test]
    fn test_unsafe_path_in_args() {
        let validator = echo_validator();

        for arg in ["/etc/shadow", "/tmp/*.log", "~/.ssh/id_rsa", "--key=/root/.ssh/id_rsa"] {
            let err = validator.validate("echo", &[arg]).unwrap_err();
            assert_eq!(err.risk_class(), RiskClass::UnsafePath, "arg {:?}", arg);
        }
    }

    #[test]
    fn test_urls_are_not_paths() {
        let validator = echo_validator();
        assert!(validator
            .validate("echo", &["https://example.com/index.html"])
            .is_ok());
    }

    #[test]
    fn test_validate_safe_arguments() {
        let validator = echo_validator();

        let special_args = vec![
            vec!["-v", "-f", "/tmp/file.txt"],
            vec!["--config", "config.json"],
            vec!["-p", "8080", "--host", "localhost"],
            vec!["file_name_with_underscore.txt"],
            vec!["file-name-with-dashes.txt"],
            vec!["CamelCaseArg"],
            vec!["arg.with.dots"],
            vec!["--output=reports/scan.xml"],
        ];

        for args in special_args {
            let result = validator.validate("echo", &args);
            assert!(result.is_ok(), "Should accept: {:?} ({:?})", args, result);
        }
    }

    #[test]
    fn test_empty_arguments() {
        let validator = echo_validator();
        let safe = validator.validate::<&str>("echo", &[]).unwrap();
        assert!(safe.args.is_empty());
    }

    #[test]
    fn test_custom_whitelist_and_allow_command() {
        let mut validator = CommandValidator::with_whitelist(vec!["custom-tool".to_string()]);
        assert!(validator.is_allowed("custom-tool"));
        assert!(!validator.is_allowed("echo"));

        validator.allow_command("echo");
        validator.allow_command("echo");
        assert!(validator.is_allowed("echo"));
        assert_eq!(validator.whitelist().len(), 2);
    }

    #[test]
    fn test_safe_command_carries_resolved_program() {
        let validator = echo_validator();
        let safe = validator.validate("echo", &["a", "b"]).unwrap();
        assert!(safe.program.is_absolute());
        assert!(safe.program.ends_with("echo"));
        assert_eq!(safe.args, vec!["a", "b"]);
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("a%3Bb"), "a;b");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
        assert_eq!(percent_decode("%2"), "%2");
    }

    #[test]
    fn test_risk_class_serialization() {
        let json = serde_json::to_string(&RiskClass::PathTraversal).unwrap();
        assert_eq!(json, "\"PATH_TRAVERSAL\"");
        assert_eq!(RiskClass::EnvVarExpansion.to_string(), "ENV_VAR_EXPANSION");
    }

    #[test]
    fn test_long_arguments_are_shortened_in_errors() {
        let validator = echo_validator();
        let long_arg = format!("{};", "a".repeat(500));
        let err = validator.validate("echo", &[long_arg.as_str()]).unwrap_err();
        assert!(err.to_string().len() < 200);
    }

    proptest! {
        #[test]
        fn prop_plain_arguments_validate(
            args in prop::collection::vec("[a-zA-Z0-9_][a-zA-Z0-9_.=-]{0,15}", 0..6)
        ) {
            let validator = echo_validator();
            prop_assert!(validator.validate("echo", &args).is_ok());
        }

        #[test]
        fn prop_injected_metacharacter_rejected(
            prefix in "[a-zA-Z0-9]{0,8}",
            suffix in "[a-zA-Z0-9]{0,8}",
            meta in prop::sample::select(vec![";", "&&", "`", "$(", "|", ">"]),
        ) {
            let validator = echo_validator();
            let arg = format!("{}{}{}", prefix, meta, suffix);
            let err = validator.validate("echo", &[arg.as_str()]).unwrap_err();
            prop_assert!(matches!(
                err.risk_class(),
                RiskClass::CommandInjection | RiskClass::DangerousArgument
            ));
        }

        #[test]
        fn prop_parent_escape_rejected(
            flag in prop::sample::select(vec!["", "-o", "-I", "--out=", "--output", "-f="]),
            depth in 1usize..4,
            tail in "[a-j]{1,8}(/[a-j]{1,8}){0,2}",
            backslash in any::<bool>(),
        ) {
            let validator = echo_validator();
            let sep = if backslash { "\\" } else { "/" };
            let arg = format!("{}{}{}", flag, format!("..{}", sep).repeat(depth), tail);
            let err = validator.validate("echo", &[arg.as_str()]).unwrap_err();
            prop_assert_eq!(err.risk_class(), RiskClass::PathTraversal, "arg {:?}", arg);
        }

        #[test]
        fn prop_unlisted_commands_rejected(cmd in "[a-z]{3,12}") {
            let validator = echo_validator();
            prop_assume!(cmd != "echo" && cmd != "sleep");
            let err = validator.validate::<&str>(&cmd, &[]).unwrap_err();
            prop_assert_eq!(err.risk_class(), RiskClass::UnauthorizedCommand);
        }
    }
}
