//! Restricted child environment
//!
//! When an execution runs with a restricted environment, the child starts from
//! an empty environment. Only a short list of harmless variables is copied from
//! the host, credential-looking names are never copied, and `PATH` is replaced
//! with a minimal set of system directories.

use std::collections::HashMap;
use std::ffi::OsString;

/// Host variables that may be copied into a restricted environment
pub const DEFAULT_PASSTHROUGH: [&str; 12] = [
    "LANG",
    "LANGUAGE",
    "LC_ALL",
    "LC_CTYPE",
    "LC_MESSAGES",
    "TZ",
    "TERM",
    "TMPDIR",
    "TEMP",
    "TMP",
    "USER",
    "LOGNAME",
];

/// Minimal `PATH` for restricted children
#[cfg(unix)]
pub const DEFAULT_RESTRICTED_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

#[cfg(windows)]
pub const DEFAULT_RESTRICTED_PATH: &str = r"C:\Windows\System32;C:\Windows";

/// Name fragments that mark a variable as credential-bearing
const CREDENTIAL_MARKERS: [&str; 11] = [
    "KEY",
    "TOKEN",
    "SECRET",
    "PASSWORD",
    "PASSWD",
    "CREDENTIAL",
    "AUTH",
    "SESSION",
    "COOKIE",
    "PRIVATE",
    "CERT",
];

/// Returns `true` if a variable name looks like it carries a credential
pub fn is_credential_like(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    CREDENTIAL_MARKERS.iter().any(|marker| upper.contains(marker))
}

/// Returns `true` for dynamic-loader variables that can inject code into a child
pub fn is_loader_injection(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    matches!(upper.as_str(), "LD_PRELOAD" | "LD_LIBRARY_PATH" | "LD_AUDIT")
        || upper.starts_with("DYLD_")
}

/// Variables a restricted environment fixes itself; callers may not override them
const RESTRICTED_RESERVED: [&str; 2] = ["PATH", "HOME"];

/// Check caller-supplied variables before they reach a child
///
/// With `restricted` set, the variables the restricted environment controls
/// are refused as well.
pub fn check_extra_env(extra: &HashMap<String, String>, restricted: bool) -> Result<(), String> {
    for (name, value) in extra {
        if name.is_empty() || name.contains('=') || name.contains('\0') {
            return Err(format!("invalid environment variable name '{}'", name));
        }
        if value.contains('\0') {
            return Err(format!("environment variable '{}' contains a NUL byte", name));
        }
        if is_loader_injection(name) {
            return Err(format!(
                "environment variable '{}' is not allowed (dynamic loader injection)",
                name
            ));
        }
        if restricted
            && RESTRICTED_RESERVED
                .iter()
                .any(|reserved| reserved.eq_ignore_ascii_case(name))
        {
            return Err(format!(
                "environment variable '{}' cannot be overridden in a restricted environment",
                name
            ));
        }
    }
    Ok(())
}

/// Builds the environment handed to restricted children
#[derive(Debug, Clone)]
pub struct EnvironmentPolicy {
    restricted_path: String,
    passthrough: Vec<String>,
}

impl Default for EnvironmentPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_RESTRICTED_PATH,
            DEFAULT_PASSTHROUGH.iter().map(|s| s.to_string()).collect(),
        )
    }
}

impl EnvironmentPolicy {
    pub fn new(restricted_path: impl Into<String>, passthrough: Vec<String>) -> Self {
        Self {
            restricted_path: restricted_path.into(),
            passthrough,
        }
    }

    pub fn restricted_path(&self) -> &str {
        &self.restricted_path
    }

    pub fn passthrough(&self) -> &[String] {
        &self.passthrough
    }

    /// Compute the restricted environment from a snapshot of the host's
    pub fn build<I>(&self, host: I) -> Vec<(OsString, OsString)>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let mut env: Vec<(OsString, OsString)> = host
            .into_iter()
            .filter(|(name, _)| match name.to_str() {
                Some(name) => self.is_passed_through(name),
                None => false,
            })
            .collect();

        #[cfg(windows)]
        for (name, value) in std::env::vars_os() {
            if name.eq_ignore_ascii_case("SystemRoot") {
                env.push((name, value));
            }
        }

        env.push((OsString::from("PATH"), OsString::from(&self.restricted_path)));
        env
    }

    fn is_passed_through(&self, name: &str) -> bool {
        !is_credential_like(name)
            && !is_loader_injection(name)
            && !name.eq_ignore_ascii_case("PATH")
            && self
                .passthrough
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(vars: &[(&str, &str)]) -> Vec<(OsString, OsString)> {
        vars.iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v)))
            .collect()
    }

    fn lookup<'a>(env: &'a [(OsString, OsString)], name: &str) -> Option<&'a OsString> {
        env.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    #[test]
    fn test_passthrough_only() {
        let policy = EnvironmentPolicy::default();
        let env = policy.build(host(&[
            ("LANG", "en_US.UTF-8"),
            ("HOME", "/home/agent"),
            ("AWS_SECRET_ACCESS_KEY", "hunter2"),
            ("PATH", "/opt/evil/bin:/usr/bin"),
            ("TZ", "UTC"),
        ]));

        assert_eq!(lookup(&env, "LANG").unwrap(), "en_US.UTF-8");
        assert_eq!(lookup(&env, "TZ").unwrap(), "UTC");
        assert!(lookup(&env, "HOME").is_none());
        assert!(lookup(&env, "AWS_SECRET_ACCESS_KEY").is_none());
        assert_eq!(lookup(&env, "PATH").unwrap(), DEFAULT_RESTRICTED_PATH);
    }

    #[test]
    fn test_credential_names_never_pass() {
        let policy = EnvironmentPolicy::new(
            "/usr/bin",
            vec!["GITHUB_TOKEN".to_string(), "EDITOR".to_string()],
        );
        let env = policy.build(host(&[("GITHUB_TOKEN", "ghp_x"), ("EDITOR", "vi")]));

        assert!(lookup(&env, "GITHUB_TOKEN").is_none());
        assert_eq!(lookup(&env, "EDITOR").unwrap(), "vi");
        assert_eq!(lookup(&env, "PATH").unwrap(), "/usr/bin");
    }

    #[test]
    fn test_credential_detection() {
        assert!(is_credential_like("OPENAI_API_KEY"));
        assert!(is_credential_like("db_password"));
        assert!(is_credential_like("SSH_AUTH_SOCK"));
        assert!(!is_credential_like("LANG"));
        assert!(!is_credential_like("TERM"));
    }

    #[test]
    fn test_loader_injection_detection() {
        assert!(is_loader_injection("LD_PRELOAD"));
        assert!(is_loader_injection("ld_library_path"));
        assert!(is_loader_injection("DYLD_INSERT_LIBRARIES"));
        assert!(!is_loader_injection("LDFLAGS"));
    }

    #[test]
    fn test_check_extra_env() {
        let mut extra = HashMap::new();
        extra.insert("SCAN_PROFILE".to_string(), "fast".to_string());
        assert!(check_extra_env(&extra, true).is_ok());

        extra.insert("LD_PRELOAD".to_string(), "/tmp/evil.so".to_string());
        assert!(check_extra_env(&extra, false).unwrap_err().contains("LD_PRELOAD"));

        let mut bad_name = HashMap::new();
        bad_name.insert("A=B".to_string(), "x".to_string());
        assert!(check_extra_env(&bad_name, false).is_err());
    }

    #[test]
    fn test_restricted_env_keeps_path_and_home() {
        for name in ["PATH", "Path", "HOME"] {
            let mut extra = HashMap::new();
            extra.insert(name.to_string(), "/tmp/attacker".to_string());

            let err = check_extra_env(&extra, true).unwrap_err();
            assert!(err.contains("restricted environment"), "{}", err);
            // Unrestricted children already inherit the host's values
            assert!(check_extra_env(&extra, false).is_ok());
        }
    }
}
