//! Monitoring stack scaffolding for llm-ops
//!
//! Writes the compose and Prometheus files for the local monitoring stack
//! (Prometheus, Grafana, MLflow) and drives the compose tool that runs it.
//! Existing files are never overwritten, so local edits survive.

pub mod compose;

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub use compose::{detect_compose, ComposeCommand};

/// Errors related to the monitoring stack
#[derive(Error, Debug)]
pub enum StackError {
    #[error("No compose tool found. Install Docker (with the compose plugin), docker-compose or podman-compose.")]
    NoComposeTool,
    #[error("Stack directory does not exist: {0}")]
    MissingDirectory(PathBuf),
    #[error("`{command}` exited with status {code}")]
    CommandFailed { command: String, code: i32 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StackError {
    /// Process exit code to report; a failed compose command passes its own through
    pub fn exit_code(&self) -> i32 {
        match self {
            StackError::CommandFailed { code, .. } if *code != 0 => *code,
            _ => 1,
        }
    }
}

pub type StackResult<T> = Result<T, StackError>;

pub const COMPOSE_FILE: &str = "docker-compose.yml";
pub const PROMETHEUS_FILE: &str = "prometheus.yml";

/// Compose definition for Prometheus (9090), Grafana (3000) and MLflow (5000)
pub const COMPOSE_TEMPLATE: &str = "\
version: '3.8'
services:
  prometheus:
    image: prom/prometheus:latest
    ports:
      - \"9090:9090\"
    volumes:
      - ./prometheus.yml:/etc/prometheus/prometheus.yml
  grafana:
    image: grafana/grafana:latest
    ports:
      - \"3000:3000\"
    environment:
      - GF_SECURITY_ADMIN_PASSWORD=admin
  mlflow:
    image: python:3.11-slim
    ports:
      - \"5000:5000\"
    command: bash -c \"pip install mlflow && mlflow server --host 0.0.0.0 --port 5000\"
";

/// Prometheus configuration scraping itself every 15 seconds
pub const PROMETHEUS_TEMPLATE: &str = "\
global:
  scrape_interval: 15s
scrape_configs:
  - job_name: 'prometheus'
    static_configs:
      - targets: ['localhost:9090']
";

/// What happened to a scaffold file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Created,
    Kept,
}

/// Result of [`MonitoringStack::ensure_files`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldReport {
    pub compose: FileOutcome,
    pub prometheus: FileOutcome,
}

impl ScaffoldReport {
    pub fn created_any(&self) -> bool {
        self.compose == FileOutcome::Created || self.prometheus == FileOutcome::Created
    }
}

/// A monitoring stack rooted at a directory
#[derive(Debug, Clone)]
pub struct MonitoringStack {
    dir: PathBuf,
}

impl MonitoringStack {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn compose_path(&self) -> PathBuf {
        self.dir.join(COMPOSE_FILE)
    }

    pub fn prometheus_path(&self) -> PathBuf {
        self.dir.join(PROMETHEUS_FILE)
    }

    /// Write any missing scaffold file; present files are left untouched
    pub fn ensure_files(&self) -> StackResult<ScaffoldReport> {
        if !self.dir.is_dir() {
            return Err(StackError::MissingDirectory(self.dir.clone()));
        }

        Ok(ScaffoldReport {
            compose: write_if_absent(&self.compose_path(), COMPOSE_TEMPLATE)?,
            prometheus: write_if_absent(&self.prometheus_path(), PROMETHEUS_TEMPLATE)?,
        })
    }

    /// Scaffold and start the stack in the background
    pub fn up(&self, compose: &ComposeCommand) -> StackResult<ScaffoldReport> {
        let report = self.ensure_files()?;
        compose.run(&self.dir, &["up", "-d"])?;
        info!(dir = %self.dir.display(), "monitoring stack started");
        Ok(report)
    }

    pub fn down(&self, compose: &ComposeCommand) -> StackResult<()> {
        compose.run(&self.dir, &["down"])?;
        info!(dir = %self.dir.display(), "monitoring stack stopped");
        Ok(())
    }

    /// Output of `compose ps`
    pub fn status(&self, compose: &ComposeCommand) -> StackResult<String> {
        compose.output(&self.dir, &["ps"])
    }
}

fn write_if_absent(path: &Path, contents: &str) -> StackResult<FileOutcome> {
    if path.exists() {
        return Ok(FileOutcome::Kept);
    }
    fs::write(path, contents)?;
    info!(path = %path.display(), "created monitoring stack file");
    Ok(FileOutcome::Created)
}
