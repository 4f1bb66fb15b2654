use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sysup_session::{
    CollaboratorError, PackageManager, Reporter, ResolvedPackage, SetupOptions, SyncMode,
};
use tracing::{debug, info, warn};

/// Exit status a helper uses to say the repositories could not be reached.
pub(crate) const EXIT_REPO_UNAVAILABLE: i32 = 75;

/// One line of helper output.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum HelperEvent {
    Progress {
        label: String,
        current: u64,
        total: u64,
    },
    Message(String),
    Result(serde_json::Value),
    Error(String),
}

/// Lines that are not JSON events are passed through to the debug log.
pub(crate) fn parse_event_line(line: &str) -> Option<HelperEvent> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

#[derive(Debug, Default)]
pub(crate) struct HelperOutcome {
    pub(crate) code: Option<i32>,
    pub(crate) result: Option<serde_json::Value>,
    pub(crate) errors: Vec<String>,
}

impl HelperOutcome {
    fn describe_failure(&self) -> String {
        if self.errors.is_empty() {
            match self.code {
                Some(code) => format!("helper exited with status {code}"),
                None => "helper was killed by a signal".to_string(),
            }
        } else {
            self.errors.join("; ")
        }
    }
}

/// Maps a failed helper run to the error kind the coordinator reacts to.
pub(crate) fn classify_failure(subcommand: &str, outcome: &HelperOutcome) -> CollaboratorError {
    let detail = outcome.describe_failure();
    match subcommand {
        "refresh" if outcome.code == Some(EXIT_REPO_UNAVAILABLE) => {
            CollaboratorError::RepoUnavailable(detail)
        }
        "download" => CollaboratorError::Download(detail),
        "test-transaction" | "transaction" => CollaboratorError::Transaction(detail),
        _ => CollaboratorError::Helper(anyhow!("{subcommand}: {detail}")),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HelperSession {
    releasever: String,
    datadir: PathBuf,
    nogpgcheck: bool,
    cache_only: bool,
}

/// Package manager backed by an external helper program that speaks one JSON
/// object per stdout line.
#[derive(Debug, Clone)]
pub(crate) struct HelperPackageManager {
    program: PathBuf,
    args: Vec<String>,
    session: Option<HelperSession>,
    resolve_args: Vec<String>,
}

impl HelperPackageManager {
    pub(crate) fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            session: None,
            resolve_args: Vec::new(),
        }
    }

    pub(crate) fn program(&self) -> &Path {
        &self.program
    }

    fn session_args(&self) -> Result<Vec<String>, CollaboratorError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| CollaboratorError::Helper(anyhow!("helper used before setup")))?;
        let mut args = vec![
            "--releasever".to_string(),
            session.releasever.clone(),
            "--datadir".to_string(),
            session.datadir.display().to_string(),
        ];
        if session.nogpgcheck {
            args.push("--nogpgcheck".to_string());
        }
        if session.cache_only {
            args.push("--cacheonly".to_string());
        }
        Ok(args)
    }

    fn invoke(
        &self,
        subcommand: &str,
        extra: &[String],
        input: Option<Vec<u8>>,
        reporter: Option<&dyn Reporter>,
    ) -> Result<HelperOutcome, CollaboratorError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(subcommand)
            .args(self.session_args()?)
            .args(extra)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        debug!(program = %self.program.display(), subcommand, ?extra, "running package helper");

        let mut child = command
            .spawn()
            .with_context(|| {
                format!(
                    "failed to start package helper: {}",
                    self.program.display()
                )
            })
            .map_err(CollaboratorError::Helper)?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin
                .write_all(&input)
                .context("failed to send input to package helper")
                .map_err(CollaboratorError::Helper)?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CollaboratorError::Helper(anyhow!("helper stdout was not captured")))?;
        let mut outcome = HelperOutcome::default();
        for line in BufReader::new(stdout).lines() {
            let line = line
                .context("failed to read package helper output")
                .map_err(CollaboratorError::Helper)?;
            match parse_event_line(&line) {
                Some(HelperEvent::Progress {
                    label,
                    current,
                    total,
                }) => match reporter {
                    Some(reporter) => reporter.progress(&label, current, total),
                    None => debug!(label, current, total, "helper progress"),
                },
                Some(HelperEvent::Message(text)) => match reporter {
                    Some(reporter) => reporter.message(&text),
                    None => info!("{text}"),
                },
                Some(HelperEvent::Result(value)) => outcome.result = Some(value),
                Some(HelperEvent::Error(text)) => {
                    warn!(subcommand, "{text}");
                    outcome.errors.push(text);
                }
                None => debug!(subcommand, "{line}"),
            }
        }

        let status = child
            .wait()
            .context("failed to wait for package helper")
            .map_err(CollaboratorError::Helper)?;
        outcome.code = status.code();
        debug!(subcommand, code = ?outcome.code, "package helper finished");
        Ok(outcome)
    }

    fn run_step(
        &self,
        subcommand: &str,
        extra: &[String],
        input: Option<Vec<u8>>,
        reporter: Option<&dyn Reporter>,
    ) -> Result<Option<serde_json::Value>, CollaboratorError> {
        let outcome = self.invoke(subcommand, extra, input, reporter)?;
        if outcome.code == Some(0) && outcome.errors.is_empty() {
            Ok(outcome.result)
        } else {
            Err(classify_failure(subcommand, &outcome))
        }
    }

    fn run_for<T: DeserializeOwned>(
        &self,
        subcommand: &str,
        extra: &[String],
    ) -> Result<T, CollaboratorError> {
        let value = self
            .run_step(subcommand, extra, None, None)?
            .ok_or_else(|| CollaboratorError::Helper(anyhow!("{subcommand}: helper sent no result")))?;
        serde_json::from_value(value)
            .with_context(|| format!("{subcommand}: unexpected helper result"))
            .map_err(CollaboratorError::Helper)
    }
}

impl PackageManager for HelperPackageManager {
    fn setup(&mut self, options: &SetupOptions<'_>) -> Result<PathBuf, CollaboratorError> {
        self.session = Some(HelperSession {
            releasever: options.releasever.to_string(),
            datadir: options.datadir.to_path_buf(),
            nogpgcheck: options.nogpgcheck,
            cache_only: options.cache_only,
        });
        self.resolve_args.clear();
        self.run_for("setup", &[])
    }

    fn refresh_metadata(&mut self) -> Result<Vec<String>, CollaboratorError> {
        self.run_for("refresh", &[])
    }

    fn resolve(
        &mut self,
        mode: SyncMode,
        add_install: &[String],
    ) -> Result<Vec<ResolvedPackage>, CollaboratorError> {
        let mut extra = Vec::new();
        if mode == SyncMode::DistroSync {
            extra.push("--distro-sync".to_string());
        }
        for item in add_install {
            extra.push("--add-install".to_string());
            extra.push(item.clone());
        }
        let packages = self.run_for("resolve", &extra)?;
        self.resolve_args = extra;
        Ok(packages)
    }

    fn download(
        &mut self,
        packages: &[ResolvedPackage],
        reporter: &dyn Reporter,
    ) -> Result<(), CollaboratorError> {
        let input = serde_json::to_vec(packages)
            .context("failed to encode package list for helper")
            .map_err(CollaboratorError::Helper)?;
        self.run_step("download", &[], Some(input), Some(reporter))
            .map(|_| ())
    }

    fn test_transaction(&mut self, reporter: &dyn Reporter) -> Result<(), CollaboratorError> {
        self.run_step("test-transaction", &self.resolve_args, None, Some(reporter))
            .map(|_| ())
    }

    fn run_transaction(&mut self, reporter: &dyn Reporter) -> Result<(), CollaboratorError> {
        self.run_step("transaction", &self.resolve_args, None, Some(reporter))
            .map(|_| ())
    }
}
