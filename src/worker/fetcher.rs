//! External fetch tool invocation

use crate::config::FetcherConfig;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Longest stdout/stderr excerpt kept from a tool run
const OUTPUT_EXCERPT_CHARS: usize = 512;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("could not start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tool exited with {}: {stderr}", exit_label(.code))]
    Exited { code: Option<i32>, stderr: String },

    #[error("tool did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("I/O error while waiting for tool: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "signal".to_string(),
    }
}

/// What a successful run reported about the media
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutput {
    pub title: Option<String>,
}

/// Fetches `url` into files named after `output_template`
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, output_template: &Path) -> Result<FetchOutput, FetchError>;
}

/// Runs a configured program, e.g. yt-dlp
///
/// The last non-empty stdout line is taken as the media title; the default
/// yt-dlp arguments print it with `--print after_move:title`.
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandFetcher {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &FetcherConfig) -> Self {
        Self::new(&config.program, config.args.clone(), config.timeout.into())
    }

    fn render_args(&self, url: &str, output_template: &Path) -> Vec<String> {
        let output = output_template.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{url}", url).replace("{output}", &output))
            .collect()
    }
}

#[async_trait]
impl Fetcher for CommandFetcher {
    async fn fetch(&self, url: &str, output_template: &Path) -> Result<FetchOutput, FetchError> {
        let args = self.render_args(url, output_template);
        debug!(program = %self.program, ?args, "Starting fetch tool");

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FetchError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => return Err(FetchError::TimedOut(self.timeout)),
        };

        if output.status.success() {
            return Ok(FetchOutput {
                title: last_line(&output.stdout),
            });
        }

        Err(FetchError::Exited {
            code: output.status.code(),
            stderr: stderr_excerpt(&output.stderr),
        })
    }
}

/// Last non-empty line of captured output, clipped
fn last_line(output: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(output);
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.chars().take(OUTPUT_EXCERPT_CHARS).collect())
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    last_line(stderr).unwrap_or_else(|| "no diagnostic output".to_string())
}
