//! Lilypad CLI wrapper.
//!
//! Turns a prompt into a PNG by running `lilypad run <module>`, locating the
//! job's stdout artifact in the CLI output, reading it and handing the text
//! to the [`TextRenderer`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use strum::{Display, EnumString};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::render::{AspectRatio, RenderError, TextRenderer};

pub const DEFAULT_PROGRAM: &str = "lilypad";
pub const DEFAULT_MODULE: &str = "cowsay:v0.0.4";
pub const DEFAULT_INPUT_NAME: &str = "Message";
pub const DEFAULT_SECRET_VAR: &str = "WEB3_PRIVATE_KEY";
pub const DEFAULT_ARTIFACT_ROOT: &str = "/tmp/lilypad/data/downloaded-files";

#[derive(Debug, Error)]
pub enum CommandError {
    /// A required secret is absent; nothing was launched.
    #[error("{var} is not set in the environment")]
    Configuration { var: String },

    #[error("error spawning process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("process exited with {}", exit_label(.code))]
    ProcessExit { code: Option<i32> },

    #[error("process wrote to stderr: {0}")]
    ProcessStderr(String),

    #[error("error processing output: {0}")]
    OutputParse(#[from] OutputParseError),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None => "no code (killed by signal)".to_owned(),
    }
}

#[derive(Debug, Error)]
pub enum OutputParseError {
    #[error("stdout file path not found in CLI output")]
    PathNotFound,

    #[error("read artifact {}: {source}", .path.display())]
    ReadArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("render task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What to do when the CLI exits 0 but wrote to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StderrPolicy {
    /// Any stderr output fails the run.
    #[default]
    Strict,
    /// Stderr is logged and otherwise ignored.
    Lenient,
}

/// A fully resolved process launch: program, argv and extra environment.
#[derive(Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

// Environment values are secrets; only their names are printed.
impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for key in self.env.keys() {
            write!(f, "{key}=*** ")?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg:?}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Launches an [`Invocation`] and waits for it to exit.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, invocation: &Invocation) -> std::io::Result<ProcessOutput>;
}

/// Runs invocations as real child processes without going through a shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

#[async_trait]
impl Launcher for TokioLauncher {
    async fn launch(&self, invocation: &Invocation) -> std::io::Result<ProcessOutput> {
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (stdout, stderr) = tokio::try_join!(drain(stdout, "stdout"), drain(stderr, "stderr"))?;
        let status = child.wait().await?;

        Ok(ProcessOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

/// Accumulate a child stream into memory, logging each chunk as it arrives.
async fn drain<R>(stream: Option<R>, label: &'static str) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return Ok(String::new());
    };

    let mut buffer = Vec::new();
    let mut chunk = vec![0u8; 8192];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        debug!(stream = label, "{}", String::from_utf8_lossy(&chunk[..n]).trim_end());
        buffer.extend_from_slice(&chunk[..n]);
    }
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

type SecretLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Static settings for [`CommandWrapper`].
#[derive(Debug, Clone)]
pub struct CommandConfig {
    pub program: String,
    pub module: String,
    pub input_name: String,
    /// Environment variable holding the Lilypad private key.
    pub secret_var: String,
    /// Directory the CLI downloads job results into.
    pub artifact_root: String,
    pub stderr_policy: StderrPolicy,
    pub aspect_ratio: AspectRatio,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_owned(),
            module: DEFAULT_MODULE.to_owned(),
            input_name: DEFAULT_INPUT_NAME.to_owned(),
            secret_var: DEFAULT_SECRET_VAR.to_owned(),
            artifact_root: DEFAULT_ARTIFACT_ROOT.to_owned(),
            stderr_policy: StderrPolicy::default(),
            aspect_ratio: AspectRatio::default(),
        }
    }
}

/// Prompt in, PNG out.
#[derive(Clone)]
pub struct CommandWrapper {
    config: CommandConfig,
    launcher: Arc<dyn Launcher>,
    renderer: TextRenderer,
    secrets: SecretLookup,
    artifact_pattern: Regex,
}

impl fmt::Debug for CommandWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandWrapper")
            .field("config", &self.config)
            .field("renderer", &self.renderer)
            .finish_non_exhaustive()
    }
}

impl CommandWrapper {
    pub fn new(
        config: CommandConfig,
        launcher: Arc<dyn Launcher>,
        renderer: TextRenderer,
    ) -> Result<Self, regex::Error> {
        let root = config.artifact_root.trim_end_matches('/');
        let artifact_pattern = Regex::new(&format!(r"cat ({}/\w+/stdout)", regex::escape(root)))?;

        Ok(Self {
            config,
            launcher,
            renderer,
            secrets: Arc::new(|key: &str| std::env::var(key).ok()),
            artifact_pattern,
        })
    }

    /// Replace the process-environment secret lookup.
    pub fn with_secret_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.secrets = Arc::new(lookup);
        self
    }

    pub fn config(&self) -> &CommandConfig {
        &self.config
    }

    /// Build the launch for `prompt`. The prompt travels as a single argv
    /// element, so no quoting or shell parsing ever applies to it.
    pub fn invocation(&self, prompt: &str, secret: String) -> Invocation {
        Invocation {
            program: self.config.program.clone(),
            args: vec![
                "run".to_owned(),
                self.config.module.clone(),
                "-i".to_owned(),
                format!("{}={}", self.config.input_name, prompt),
            ],
            env: BTreeMap::from([(self.config.secret_var.clone(), secret)]),
        }
    }

    /// Extract the artifact path from captured CLI stdout.
    pub fn artifact_path(&self, stdout: &str) -> Result<PathBuf, OutputParseError> {
        self.artifact_pattern
            .captures(stdout)
            .and_then(|c| c.get(1))
            .map(|m| PathBuf::from(m.as_str()))
            .ok_or(OutputParseError::PathNotFound)
    }

    pub async fn run(&self, prompt: &str) -> Result<Vec<u8>, CommandError> {
        info!(module = %self.config.module, "lilypad run starting");

        let secret = (self.secrets)(&self.config.secret_var)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CommandError::Configuration {
                var: self.config.secret_var.clone(),
            })?;

        let invocation = self.invocation(prompt, secret);
        info!(command = %invocation, "executing command");

        let output = self
            .launcher
            .launch(&invocation)
            .await
            .map_err(CommandError::Spawn)?;

        if output.code != Some(0) {
            return Err(CommandError::ProcessExit { code: output.code });
        }
        if !output.stderr.is_empty() {
            match self.config.stderr_policy {
                StderrPolicy::Strict => return Err(CommandError::ProcessStderr(output.stderr)),
                StderrPolicy::Lenient => {
                    warn!(stderr = %output.stderr.trim_end(), "process wrote to stderr; continuing")
                }
            }
        }
        info!("process completed successfully");

        let path = self.artifact_path(&output.stdout)?;
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| OutputParseError::ReadArtifact {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), chars = text.len(), "read lilypad artifact");

        let renderer = self.renderer.clone();
        let ratio = self.config.aspect_ratio;
        let png = tokio::task::spawn_blocking(move || renderer.render(&text, ratio))
            .await
            .map_err(OutputParseError::from)?
            .map_err(OutputParseError::from)?;
        Ok(png)
    }
}
