//! Checker environment - the per-run sandbox directory
//!
//! Every pipeline run gets a fresh temporary directory holding exactly the
//! submitted files, plus whatever earlier steps staged into it. The
//! directory is removed when the environment is dropped and is never shared
//! between runs, so no state leaks from one evaluation into the next.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Identity of the submitting user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub student_number: String,
}

/// One submission under evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub solution_id: i64,
    pub task_id: i64,
    pub user: User,
}

/// A named file belonging to the submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub content: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Sandbox directory plus submission metadata for one pipeline run
pub struct CheckerEnvironment {
    submission: Submission,
    sources: Vec<SourceFile>,
    tmpdir: TempDir,
}

impl CheckerEnvironment {
    /// Create a fresh sandbox and materialize the submission into it
    pub fn new(submission: Submission, sources: Vec<SourceFile>) -> Result<Self> {
        let tmpdir = tempfile::tempdir().context("Failed to create sandbox directory")?;
        debug!(
            "Created sandbox {:?} for solution {}",
            tmpdir.path(),
            submission.solution_id
        );

        let mut env = Self {
            submission,
            sources: Vec::new(),
            tmpdir,
        };
        for source in sources {
            env.write_into_sandbox(&source.name, &source.content)?;
            env.sources.push(source);
        }
        Ok(env)
    }

    /// Submitted files, in submission order, plus staged sources
    pub fn sources(&self) -> &[SourceFile] {
        &self.sources
    }

    /// The sandbox directory all commands run in
    pub fn tmpdir(&self) -> &Path {
        self.tmpdir.path()
    }

    pub fn user(&self) -> &User {
        &self.submission.user
    }

    pub fn solution_id(&self) -> i64 {
        self.submission.solution_id
    }

    pub fn task_id(&self) -> i64 {
        self.submission.task_id
    }

    /// Write an additional file into the sandbox.
    ///
    /// With `as_source` the file also joins `sources()`, so later build
    /// steps pick it up during file matching; a same-named entry is
    /// replaced. Plain staging only makes the file visible on disk.
    pub fn stage_file(&mut self, name: &str, content: &str, as_source: bool) -> Result<()> {
        self.write_into_sandbox(name, content)?;
        if as_source {
            match self.sources.iter_mut().find(|s| s.name == name) {
                Some(existing) => existing.content = content.to_string(),
                None => self.sources.push(SourceFile::new(name, content)),
            }
        }
        Ok(())
    }

    fn write_into_sandbox(&self, name: &str, content: &str) -> Result<()> {
        let path = self.contained_path(name)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for {:?}", name))?;
        }
        std::fs::write(&path, content).with_context(|| format!("Failed to write {:?}", name))?;
        Ok(())
    }

    /// Resolve a file name inside the sandbox, refusing anything that
    /// would escape it
    fn contained_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() {
            bail!("empty file name");
        }
        for component in Path::new(name).components() {
            match component {
                Component::Normal(_) => {}
                _ => bail!("unsafe file name {:?}", name),
            }
        }
        Ok(self.tmpdir.path().join(name))
    }
}
