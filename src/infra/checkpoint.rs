// ============================================================
// Layer 6 — Checkpoint Store
// ============================================================
// Durable, versioned snapshots of model parameters plus the
// metadata needed to rebuild the model without a corpus.
//
// Files for a store at (dir, name):
//
//   dir/
//     name.json        ← manifest: format tag, version, metadata
//     name-7.mpk       ← parameters of version 7
//
// save():
//   1. write and fsync the parameters of version v+1 to name-{v+1}.mpk
//   2. write and fsync the manifest to name.json.tmp, rename it over
//      name.json, fsync the directory. The rename is the commit point.
//   3. remove every other name-N.mpk
//
// A crash before the rename leaves the previous snapshot intact.
// A crash after it leaves the new snapshot on disk and at most some
// orphaned parameter files, which the next save removes.
//
// load() tells "no checkpoint" (no manifest → NotFound) apart
// from "checkpoint present but unusable" (anything else wrong →
// Format). No locking: one writer per (dir, name).

use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use crate::domain::{
    alphabet::Alphabet,
    error::{CaptchaError, Result},
    traits::Snapshot,
};

const FORMAT_TAG: &str = "captcha-cnn/1";

/// Shapes a checkpoint was trained for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub image_height: usize,
    pub image_width:  usize,
    pub max_captcha:  usize,
    pub alphabet:     Alphabet,
}

impl CheckpointMeta {
    /// Every difference between `self` (on disk) and `expected`.
    fn mismatches(&self, expected: &CheckpointMeta) -> Vec<String> {
        let mut out = Vec::new();
        if (self.image_height, self.image_width) != (expected.image_height, expected.image_width) {
            out.push(format!(
                "image size {}x{} != {}x{}",
                self.image_height, self.image_width, expected.image_height, expected.image_width
            ));
        }
        if self.max_captcha != expected.max_captcha {
            out.push(format!("label length {} != {}", self.max_captcha, expected.max_captcha));
        }
        if self.alphabet.len() != expected.alphabet.len() {
            out.push(format!(
                "alphabet size {} != {}",
                self.alphabet.len(),
                expected.alphabet.len()
            ));
        } else if self.alphabet != expected.alphabet {
            out.push(format!(
                "alphabet '{}' != '{}'",
                self.alphabet.as_string(),
                expected.alphabet.as_string()
            ));
        }
        out
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format:  String,
    version: u64,
    meta:    CheckpointMeta,
}

/// Versioned snapshots under one `(dir, name)` pair.
pub struct CheckpointStore {
    dir:  PathBuf,
    /// File stem shared by the manifest and parameter files.
    name: String,
}

impl CheckpointStore {
    /// The directory is not created here; see `ensure_dir`.
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self { dir: dir.into(), name: name.into() }
    }

    /// Directory holding the manifest and parameter files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the checkpoint directory (and parents) if missing.
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| CaptchaError::persistence(&self.dir, e.to_string()))
    }

    /// `dir/name.json`, the commit point of every save.
    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.name))
    }

    /// `dir/name-{version}.mpk`.
    fn params_path(&self, version: u64) -> PathBuf {
        self.dir.join(format!("{}-{version}.mpk", self.name))
    }

    /// Whether a manifest is present. Says nothing about whether it loads.
    pub fn exists(&self) -> bool {
        self.manifest_path().is_file()
    }

    fn read_manifest(&self) -> Result<Manifest> {
        let path = self.manifest_path();
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CaptchaError::NotFound { path });
            }
            Err(e) => return Err(CaptchaError::format(&path, e.to_string())),
        };

        let manifest: Manifest = serde_json::from_str(&json)
            .map_err(|e| CaptchaError::format(&path, format!("unreadable manifest: {e}")))?;
        if manifest.format != FORMAT_TAG {
            return Err(CaptchaError::format(
                &path,
                format!("format '{}' is not '{FORMAT_TAG}'", manifest.format),
            ));
        }
        Ok(manifest)
    }

    /// Metadata of the current snapshot.
    pub fn read_meta(&self) -> Result<CheckpointMeta> {
        Ok(self.read_manifest()?.meta)
    }

    /// Version of the current snapshot, `None` when there is none
    /// or it is unreadable.
    pub fn latest_version(&self) -> Option<u64> {
        self.read_manifest().ok().map(|m| m.version)
    }

    /// Atomically and durably replace the snapshot. Returns the new version.
    ///
    /// The new version is one past both the manifest's version and any
    /// parameter file already in the directory, so an unreadable manifest
    /// never causes an old file to be reused. On failure the files written
    /// so far are removed and the previous snapshot stays loadable.
    ///
    /// Every failure is a `Persistence` error.
    pub fn save<M: Snapshot>(&self, model: &M, meta: &CheckpointMeta) -> Result<u64> {
        let version = self
            .latest_version()
            .into_iter()
            .chain(self.param_versions())
            .max()
            .map_or(1, |v| v + 1);

        let bytes = model
            .params_to_bytes()
            .map_err(|e| CaptchaError::persistence(&self.dir, e.to_string()))?;

        let params = self.params_path(version);
        let target = self.manifest_path();
        let tmp    = target.with_extension("json.tmp");

        if let Err(e) = self.commit(version, &bytes, meta, &params, &tmp, &target) {
            discard(&params);
            discard(&tmp);
            return Err(e);
        }
        // Committed: from here on the new files must stay, even on error.
        sync_dir(&self.dir)?;

        for stale in self.param_versions().into_iter().filter(|&v| v != version) {
            discard(&self.params_path(stale));
        }

        tracing::debug!("Saved checkpoint version {} to '{}'", version, target.display());
        Ok(version)
    }

    /// Steps up to and including the manifest rename. Each file is on
    /// disk before the rename makes it visible.
    fn commit(
        &self,
        version: u64,
        bytes:   &[u8],
        meta:    &CheckpointMeta,
        params:  &Path,
        tmp:     &Path,
        target:  &Path,
    ) -> Result<()> {
        write_synced(params, bytes)?;

        let manifest = Manifest { format: FORMAT_TAG.to_string(), version, meta: meta.clone() };
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| CaptchaError::persistence(&self.dir, e.to_string()))?;
        write_synced(tmp, json.as_bytes())?;

        fs::rename(tmp, target).map_err(|e| CaptchaError::persistence(target, e.to_string()))
    }

    /// Versions of every `name-N.mpk` file in the directory.
    fn param_versions(&self) -> Vec<u64> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let prefix = format!("{}-", self.name);
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let file = entry.file_name();
                let file = file.to_str()?;
                file.strip_prefix(&prefix)?.strip_suffix(".mpk")?.parse().ok()
            })
            .collect()
    }

    /// Load the snapshot into `model` after checking its metadata
    /// against `expected`. Returns the loaded version.
    pub fn load<M: Snapshot>(&self, model: &mut M, expected: &CheckpointMeta) -> Result<u64> {
        let manifest = self.read_manifest()?;
        let path     = self.manifest_path();

        let mismatches = manifest.meta.mismatches(expected);
        if !mismatches.is_empty() {
            return Err(CaptchaError::format(&path, mismatches.join(", ")));
        }

        let params = self.params_path(manifest.version);
        let bytes  = fs::read(&params).map_err(|e| {
            CaptchaError::format(&params, format!("parameter file unreadable: {e}"))
        })?;
        model
            .params_from_bytes(bytes)
            .map_err(|e| CaptchaError::format(&params, e.to_string()))?;

        tracing::info!("Loaded checkpoint version {} from '{}'", manifest.version, path.display());
        Ok(manifest.version)
    }
}

/// Write `bytes` to `path` and flush them to disk.
fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let persist = |e: std::io::Error| CaptchaError::persistence(path, e.to_string());
    let mut file = File::create(path).map_err(persist)?;
    file.write_all(bytes).map_err(persist)?;
    file.sync_all().map_err(persist)
}

/// Make a rename inside `dir` durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| CaptchaError::persistence(dir, e.to_string()))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Best-effort removal of a file that is no longer referenced.
fn discard(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::debug!("Could not remove '{}': {}", path.display(), e),
    }
}
