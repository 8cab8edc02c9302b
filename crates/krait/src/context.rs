//! The explicit configuration value threaded through the core.

use std::{path::PathBuf, time::Duration};

/// Configuration assembled once at process entry and passed by reference
/// everywhere it is needed. Nothing in the core reads the environment after
/// construction; the only process-global state is the interruption flag in
/// [`crate::interrupt`].
#[derive(Debug, Clone)]
pub struct Context {
    /// The root prefix below which named environments live.
    pub root_prefix: PathBuf,

    /// Additional directories searched for named environments.
    pub envs_dirs: Vec<PathBuf>,

    /// The per-request HTTP timeout.
    pub http_timeout: Duration,

    /// The global cap on parallel downloads.
    pub max_parallel_downloads: usize,

    /// Whether TLS certificates are verified.
    pub ssl_verify: bool,

    /// Suppress progress output.
    pub no_progress: bool,

    /// Skip confirmation prompts.
    pub always_yes: bool,

    /// The version string written into caches and the history journal.
    pub tool_version: String,
}

impl Default for Context {
    fn default() -> Self {
        let root_prefix = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".krait");
        Self {
            envs_dirs: vec![root_prefix.join("envs")],
            root_prefix,
            http_timeout: Duration::from_secs(60),
            max_parallel_downloads: 5,
            ssl_verify: true,
            no_progress: false,
            always_yes: false,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Context {
    /// Builds a context from the environment. Every variable is optional;
    /// unset or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let mut context = Context::default();
        if let Some(root_prefix) = std::env::var_os("KRAIT_ROOT_PREFIX") {
            context.root_prefix = PathBuf::from(root_prefix);
            context.envs_dirs = vec![context.root_prefix.join("envs")];
        }
        if let Ok(dirs) = std::env::var("KRAIT_ENVS_DIRS") {
            let dirs: Vec<PathBuf> = std::env::split_paths(&dirs).collect();
            if !dirs.is_empty() {
                context.envs_dirs = dirs;
            }
        }
        if let Some(timeout) = env_parse::<u64>("KRAIT_HTTP_TIMEOUT") {
            context.http_timeout = Duration::from_secs(timeout);
        }
        if let Some(max) = env_parse::<usize>("KRAIT_MAX_PARALLEL_DOWNLOADS") {
            context.max_parallel_downloads = max.max(1);
        }
        if let Some(ssl_verify) = env_bool("KRAIT_SSL_VERIFY") {
            context.ssl_verify = ssl_verify;
        }
        if let Some(no_progress) = env_bool("KRAIT_NO_PROGRESS") {
            context.no_progress = no_progress;
        }
        if let Some(always_yes) = env_bool("KRAIT_ALWAYS_YES") {
            context.always_yes = always_yes;
        }
        context
    }

    /// Resolves a named environment to its prefix directory.
    pub fn environment_prefix(&self, name: &str) -> PathBuf {
        self.envs_dirs
            .first()
            .cloned()
            .unwrap_or_else(|| self.root_prefix.join("envs"))
            .join(name)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let value = std::env::var(key).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("ignoring unparsable value '{value}' for {key}");
            None
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    let value = std::env::var(key).ok()?;
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            tracing::warn!("ignoring unparsable value '{other}' for {key}");
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_are_reasonable() {
        let context = Context::default();
        assert!(context.ssl_verify);
        assert!(!context.always_yes);
        assert_eq!(context.max_parallel_downloads, 5);
        assert_eq!(context.http_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_environment_prefix() {
        let context = Context::default();
        let prefix = context.environment_prefix("science");
        assert!(prefix.ends_with("envs/science"));
    }
}
