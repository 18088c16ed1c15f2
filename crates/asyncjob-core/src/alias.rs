use crate::error::JobError;
use crate::job::JobId;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const ALIAS_PREFIX: &str = "alias:";

/// Human-chosen names for jobs, kept as symlinks `<root>/alias:<name>` that
/// point at `<root>/<jid>`.
#[derive(Debug, Clone)]
pub struct AliasIndex {
    root: PathBuf,
}

/// An alias entry as found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasEntry {
    pub name: String,
    pub path: PathBuf,
    pub target: PathBuf,
    pub jid: Option<JobId>,
    pub dangling: bool,
}

impl AliasIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, alias: &str) -> PathBuf {
        self.root.join(format!("{}{}", ALIAS_PREFIX, alias))
    }

    pub fn validate(alias: &str) -> Result<(), JobError> {
        let invalid = |reason| JobError::InvalidAlias {
            alias: alias.to_string(),
            reason,
        };
        if alias.is_empty() {
            return Err(invalid("alias is empty"));
        }
        if alias.contains('/') || alias.contains('\0') {
            return Err(invalid("alias may not contain '/' or NUL"));
        }
        if alias == "." || alias == ".." {
            return Err(invalid("alias may not be a relative path component"));
        }
        Ok(())
    }

    /// Register `alias` for `jid`. Symlink creation is the exclusive step, so
    /// two invocations racing on one name cannot both win.
    pub fn link(&self, alias: &str, jid: &JobId) -> Result<PathBuf, JobError> {
        Self::validate(alias)?;
        fs::create_dir_all(&self.root).map_err(|e| JobError::io(&self.root, e))?;
        let path = self.path(alias);
        let target = self.root.join(jid.as_str());

        match std::os::unix::fs::symlink(&target, &path) {
            Ok(()) => {
                info!("Registered alias '{}' -> {}", alias, jid);
                Ok(path)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => match self.resolve(alias)? {
                Some(existing) => Err(JobError::AliasExists {
                    alias: alias.to_string(),
                    path,
                    jid: existing.to_string(),
                }),
                // Removed between our symlink attempt and the resolve.
                None => self.link(alias, jid),
            },
            Err(e) => Err(JobError::io(&path, e)),
        }
    }

    /// `Ok(None)` when no entry exists; `DanglingAlias` when the entry exists
    /// but its record does not.
    pub fn resolve(&self, alias: &str) -> Result<Option<JobId>, JobError> {
        Self::validate(alias)?;
        let entry = match self.entry(alias)? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        if entry.dangling {
            return Err(JobError::DanglingAlias {
                alias: alias.to_string(),
                path: entry.path,
                target: entry.target,
            });
        }
        entry.jid.map(Some).ok_or_else(|| JobError::InvalidJobId {
            jid: entry.target.to_string_lossy().into_owned(),
            reason: "alias target is not a job record",
        })
    }

    /// Raw view of an alias entry without judging it.
    pub fn entry(&self, alias: &str) -> Result<Option<AliasEntry>, JobError> {
        let path = self.path(alias);
        let target = match fs::read_link(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(JobError::io(&path, e)),
        };
        let target = if target.is_absolute() {
            target
        } else {
            self.root.join(target)
        };
        // A target outside the job directory names no record we own.
        let in_root = self.contains(&target);
        let jid = target
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| JobId::parse(n).ok())
            .filter(|_| in_root);
        let dangling = !in_root || !target.exists();
        Ok(Some(AliasEntry {
            name: alias.to_string(),
            path,
            target,
            jid,
            dangling,
        }))
    }

    /// Remove the alias entry only. Idempotent.
    pub fn unlink(&self, alias: &str) -> Result<bool, JobError> {
        Self::validate(alias)?;
        let path = self.path(alias);
        match fs::symlink_metadata(&path) {
            Ok(meta) if !meta.file_type().is_symlink() => {
                return Err(JobError::InvalidAlias {
                    alias: alias.to_string(),
                    reason: "alias entry is not a symlink",
                })
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(JobError::io(&path, e)),
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed alias {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(JobError::io(&path, e)),
        }
    }

    pub fn list(&self) -> Result<Vec<AliasEntry>, JobError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(JobError::io(&self.root, e)),
        };
        let mut aliases = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| JobError::io(&self.root, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(alias) = name.strip_prefix(ALIAS_PREFIX) {
                if let Some(found) = self.entry(alias)? {
                    aliases.push(found);
                }
            }
        }
        aliases.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(aliases)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn contains(&self, target: &Path) -> bool {
        let parent = match target.parent() {
            Some(parent) => parent,
            None => return false,
        };
        if parent == self.root {
            return true;
        }
        match (fs::canonicalize(parent), fs::canonicalize(&self.root)) {
            (Ok(parent), Ok(root)) => parent == root,
            _ => false,
        }
    }
}
