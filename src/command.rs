//! The immutable Command Model: everything needed to run one command
//! against one adapter, plus the fluent builder that produces it.
//!
//! Grounded on `client.rs::CommandBuilder`'s fluent `arg`/`flag`/`option`
//! shape, generalized from "docker subcommand" to "argv or shell string for
//! any adapter" and extended with the stdio/shell/retry/cache knobs a
//! general-purpose engine needs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ExecError, ExecResult};
use crate::quote::Template;

/// How the command's program/args should be interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ShellMode {
    /// Run argv directly, no shell involved.
    #[default]
    Disabled,
    /// Run through the target's default shell (`/bin/sh -c` / `cmd /c`).
    Default,
    /// Run through an explicit shell binary.
    Explicit(PathBuf),
}

/// Where a command's stdin comes from.
#[derive(Debug, Clone, Default)]
pub enum StdioSource {
    /// No stdin (default).
    #[default]
    None,
    /// A fixed byte buffer.
    Bytes(Vec<u8>),
    /// A UTF-8 string.
    Text(String),
    /// Piped from another handle's stdout (see [`crate::concurrency::pipe`]).
    Piped,
}

/// Where a command's stdout/stderr go.
#[derive(Clone, Default)]
pub enum StdioSink {
    /// Discarded.
    #[default]
    Null,
    /// Captured in memory and returned on [`crate::result::ExecutionResult`].
    Capture,
    /// Invoked once per line as output arrives.
    LineCallback(std::sync::Arc<dyn Fn(&str) + Send + Sync>),
}

impl std::fmt::Debug for StdioSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Capture => write!(f, "Capture"),
            Self::LineCallback(_) => write!(f, "LineCallback(..)"),
        }
    }
}

/// Retry policy attached to a command (see [`crate::concurrency::retry`] for
/// the standalone combinator; this is the per-command equivalent).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Base delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Single-flight result caching: identical commands (by cache key) started
/// within the TTL reuse the in-flight or completed result.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// Explicit cache key; defaults to a hash of the rendered command if unset.
    pub key: Option<String>,
    /// How long a completed result stays eligible for reuse.
    pub ttl: Duration,
}

/// The immutable description of one command to run. Produced only via
/// [`CommandBuilder::build`].
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub(crate) argv: Vec<String>,
    pub(crate) shell: ShellMode,
    pub(crate) cwd: Option<PathBuf>,
    pub(crate) env: HashMap<String, String>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) nothrow: bool,
    pub(crate) quiet: bool,
    pub(crate) interactive: bool,
    pub(crate) stdin: StdioSource,
    pub(crate) stdout: StdioSink,
    pub(crate) stderr: StdioSink,
    pub(crate) retry: Option<RetryPolicy>,
    pub(crate) cache: Option<CachePolicy>,
}

impl CommandSpec {
    /// The program/arguments as they will be executed (shell string or argv
    /// depending on [`ShellMode`]).
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// The configured shell mode.
    pub fn shell(&self) -> &ShellMode {
        &self.shell
    }

    /// The working directory override, if any.
    pub fn cwd(&self) -> Option<&PathBuf> {
        self.cwd.as_ref()
    }

    /// Environment variable overrides/additions.
    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// The configured timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether a non-zero exit should be reported as data instead of an
    /// error.
    pub fn is_nothrow(&self) -> bool {
        self.nothrow
    }

    /// Whether progress/log events should be suppressed for this command.
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Whether the command should attach a pseudo-tty / pass through the
    /// caller's stdio for interactive use.
    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// The command's retry policy, if one was attached.
    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    /// The command's cache policy, if one was attached.
    pub fn cache_policy(&self) -> Option<&CachePolicy> {
        self.cache.as_ref()
    }

    /// The cache key this command should be stored/looked-up under: the
    /// policy's explicit key if set, otherwise a deterministic hash of
    /// argv + cwd + env (spec: "key (explicit or content hash of
    /// command+env+cwd)").
    pub fn cache_key(&self) -> String {
        if let Some(policy) = &self.cache {
            if let Some(key) = &policy.key {
                return key.clone();
            }
        }
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.argv.hash(&mut hasher);
        self.cwd.hash(&mut hasher);
        let mut env: Vec<(&String, &String)> = self.env.iter().collect();
        env.sort();
        env.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    /// The command rendered as a single shell string, for adapters that
    /// need one (SSH, Docker exec, kubectl exec all invoke a remote shell).
    pub fn render_shell_string(&self) -> String {
        let mut template = Template::new();
        for (i, arg) in self.argv.iter().enumerate() {
            if i > 0 {
                template = template.literal(" ");
            }
            template = template.value(arg.clone());
        }
        template.to_shell_string()
    }
}

/// Fluent, immutable-on-build constructor for [`CommandSpec`].
///
/// Every method returns `Self` and can be chained; nothing is validated
/// until [`CommandBuilder::build`], which is the only way to obtain a
/// `CommandSpec`.
#[derive(Debug, Clone, Default)]
pub struct CommandBuilder {
    argv: Vec<String>,
    shell: ShellMode,
    cwd: Option<PathBuf>,
    env: HashMap<String, String>,
    timeout: Option<Duration>,
    nothrow: bool,
    quiet: bool,
    interactive: bool,
    stdin: StdioSource,
    stdout: StdioSink,
    stderr: StdioSink,
    retry: Option<RetryPolicy>,
    cache: Option<CachePolicy>,
}

impl CommandBuilder {
    /// Start a new builder for the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            argv: vec![program.into()],
            stdout: StdioSink::Capture,
            stderr: StdioSink::Capture,
            ..Default::default()
        }
    }

    /// Append a single positional argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    /// Append several positional arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append a boolean flag, auto-prefixing `--` if not already present.
    #[must_use]
    pub fn flag(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.argv.push(prefix_flag(&name));
        self
    }

    /// Append a `--key value` option pair, auto-prefixing `--` on the key.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.argv.push(prefix_flag(&key));
        self.argv.push(value.into());
        self
    }

    /// Set the shell mode.
    #[must_use]
    pub fn shell(mut self, shell: ShellMode) -> Self {
        self.shell = shell;
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set a single environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the execution timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Do not raise on non-zero exit; report it in the result instead.
    #[must_use]
    pub fn nothrow(mut self) -> Self {
        self.nothrow = true;
        self
    }

    /// Suppress start/chunk/complete events for this command.
    #[must_use]
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Mark the command as interactive (pty/stdio passthrough).
    #[must_use]
    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    /// Provide stdin as bytes.
    #[must_use]
    pub fn stdin_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.stdin = StdioSource::Bytes(bytes);
        self
    }

    /// Provide stdin as text.
    #[must_use]
    pub fn stdin_text(mut self, text: impl Into<String>) -> Self {
        self.stdin = StdioSource::Text(text.into());
        self
    }

    /// Mark stdin as coming from a piped predecessor.
    #[must_use]
    pub fn stdin_piped(mut self) -> Self {
        self.stdin = StdioSource::Piped;
        self
    }

    /// Route stdout through a per-line callback instead of capturing it.
    #[must_use]
    pub fn stdout_lines<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.stdout = StdioSink::LineCallback(std::sync::Arc::new(callback));
        self
    }

    /// Attach a retry policy.
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Attach a single-flight cache policy.
    #[must_use]
    pub fn cache(mut self, policy: CachePolicy) -> Self {
        self.cache = Some(policy);
        self
    }

    /// Validate invariants and produce the immutable [`CommandSpec`].
    pub fn build(self) -> ExecResult<CommandSpec> {
        if self.argv.is_empty() {
            return Err(ExecError::config("command has no program"));
        }
        if matches!(self.stdin, StdioSource::Piped) && self.retry.is_some() {
            return Err(ExecError::config(
                "piped stdin is incompatible with retry unless the upstream is restartable",
            ));
        }
        Ok(CommandSpec {
            argv: self.argv,
            shell: self.shell,
            cwd: self.cwd,
            env: self.env,
            timeout: self.timeout,
            nothrow: self.nothrow,
            quiet: self.quiet,
            interactive: self.interactive,
            stdin: self.stdin,
            stdout: self.stdout,
            stderr: self.stderr,
            retry: self.retry,
            cache: self.cache,
        })
    }
}

fn prefix_flag(name: &str) -> String {
    if name.starts_with('-') {
        name.to_string()
    } else if name.len() == 1 {
        format!("-{name}")
    } else {
        format!("--{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_argv() {
        let spec = CommandBuilder::new("docker")
            .arg("ps")
            .flag("all")
            .option("filter", "status=running")
            .build()
            .unwrap();
        assert_eq!(
            spec.argv(),
            &["docker", "ps", "--all", "--filter", "status=running"]
        );
    }

    #[test]
    fn empty_program_rejected() {
        let mut builder = CommandBuilder::default();
        builder.argv.clear();
        assert!(builder.build().is_err());
    }

    #[test]
    fn piped_stdin_with_retry_rejected() {
        let result = CommandBuilder::new("cat")
            .stdin_piped()
            .retry(RetryPolicy::default())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn short_flag_uses_single_dash() {
        let spec = CommandBuilder::new("ssh").flag("v").build().unwrap();
        assert_eq!(spec.argv(), &["ssh", "-v"]);
    }
}
