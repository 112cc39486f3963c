use async_trait::async_trait;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Trailing bytes of stderr kept for the error message
pub const STDERR_TAIL_BYTES: usize = 4 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("expected `<command> <arguments>`, got `{0}`")]
    MissingArguments(String),

    #[error("arguments must contain exactly one %s placeholder, found {0}")]
    PlaceholderCount(usize),

    #[error("unsupported format verb %{0}, only %s and %% are allowed")]
    UnsupportedVerb(char),

    #[error("arguments end with a dangling %")]
    DanglingPercent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Filename,
}

/// A post processing command of the form `<command> <pattern>`.
///
/// The pattern carries a single `%s` that is replaced by the uploaded file
/// name. The rendered pattern is handed to the command as one argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    source: String,
    program: String,
    pattern: Vec<Segment>,
}

impl CommandTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let source = template.trim();
        let (program, raw_pattern) = source
            .split_once(' ')
            .ok_or_else(|| TemplateError::MissingArguments(source.to_string()))?;

        let mut pattern = Vec::new();
        let mut literal = String::new();
        let mut placeholders = 0;
        let mut chars = raw_pattern.chars();

        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            match chars.next() {
                Some('s') => {
                    if !literal.is_empty() {
                        pattern.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    pattern.push(Segment::Filename);
                    placeholders += 1;
                }
                Some('%') => literal.push('%'),
                Some(other) => return Err(TemplateError::UnsupportedVerb(other)),
                None => return Err(TemplateError::DanglingPercent),
            }
        }
        if !literal.is_empty() {
            pattern.push(Segment::Literal(literal));
        }

        if placeholders != 1 {
            return Err(TemplateError::PlaceholderCount(placeholders));
        }

        Ok(Self {
            source: source.to_string(),
            program: program.to_string(),
            pattern,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// The single argument passed to the program for `filename`
    pub fn render(&self, filename: &str) -> String {
        self.pattern
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.as_str(),
                Segment::Filename => filename,
            })
            .collect()
    }

    /// Human readable command line, used in logs
    pub fn command_line(&self, filename: &str) -> String {
        format!("{} {}", self.program, self.render(filename))
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Error, Debug)]
pub enum PostProcessError {
    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}{}", stderr_suffix(.stderr))]
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("`{command}` did not finish within {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

impl PostProcessError {
    pub fn command(&self) -> &str {
        match self {
            PostProcessError::Spawn { command, .. }
            | PostProcessError::Failed { command, .. }
            | PostProcessError::TimedOut { command, .. } => command,
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr)
    }
}

/// Work run once for every file that was stored successfully
#[async_trait]
pub trait PostProcessor: Send + Sync {
    /// Returns the command line that was run
    async fn process(&self, filename: &str) -> Result<String, PostProcessError>;
}

/// Runs a [`CommandTemplate`] as a subprocess
pub struct CommandPostProcessor {
    template: CommandTemplate,
    timeout: Option<Duration>,
}

impl CommandPostProcessor {
    pub fn new(template: CommandTemplate, timeout: Option<Duration>) -> Self {
        Self { template, timeout }
    }
}

#[async_trait]
impl PostProcessor for CommandPostProcessor {
    async fn process(&self, filename: &str) -> Result<String, PostProcessError> {
        let command = self.template.command_line(filename);

        let mut cmd = Command::new(self.template.program());
        cmd.arg(self.template.render(filename))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => return Err(PostProcessError::Spawn { command, source }),
        };
        let stderr = child.stderr.take();

        let run = async {
            let read_stderr = async {
                match stderr {
                    Some(stderr) => read_tail(stderr, STDERR_TAIL_BYTES)
                        .await
                        .unwrap_or_default(),
                    None => Vec::new(),
                }
            };
            let (status, stderr) = tokio::join!(child.wait(), read_stderr);
            status.map(|status| (status, stderr))
        };

        // The child is killed when it is dropped on timeout
        let result = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, run).await {
                Ok(result) => result,
                Err(_) => return Err(PostProcessError::TimedOut { command, timeout }),
            },
            None => run.await,
        };

        let (status, stderr) = match result {
            Ok(output) => output,
            Err(source) => return Err(PostProcessError::Spawn { command, source }),
        };

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
            return Err(PostProcessError::Failed {
                command,
                status,
                stderr,
            });
        }

        Ok(command)
    }
}

/// Drains `reader`, keeping at most the last `limit` bytes
async fn read_tail<R>(mut reader: R, limit: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut tail = Vec::with_capacity(limit.min(8 * 1024));
    let mut buf = [0u8; 8 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(tail);
        }
        tail.extend_from_slice(&buf[..n]);
        if tail.len() > limit {
            let excess = tail.len() - limit;
            tail.drain(..excess);
        }
    }
}
