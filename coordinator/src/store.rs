use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::warn;
use serde::{Deserialize, Serialize};
use tempfile::{NamedTempFile, TempDir};

pub const METADATA_FILE: &str = "metadata.json";

/// The record written next to every published serving artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundMetadata {
    pub current_round: u64,
    pub session_id: String,
}

/// A serving directory being prepared, removed on drop unless published.
#[derive(Debug)]
pub struct Staging {
    dir: TempDir,
}

impl Staging {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// On-disk layout of every session's models and serving artifacts.
///
/// ```text
/// <root>/<session_id>/model<round>.safetensors
/// <root>/<session_id>/<round>/{model.json, group1-shard1of1.bin, metadata.json}
/// ```
///
/// Readers never observe partial files: models are written to a temporary
/// file and renamed, serving directories are staged and renamed.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    pub fn model_path(&self, session_id: &str, round: u64) -> PathBuf {
        self.session_dir(session_id)
            .join(format!("model{round}.safetensors"))
    }

    pub fn serving_dir(&self, session_id: &str, round: u64) -> PathBuf {
        self.session_dir(session_id).join(round.to_string())
    }

    pub fn create_session(&self, session_id: &str) -> io::Result<PathBuf> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn remove_session(&self, session_id: &str) -> io::Result<()> {
        ignore_missing(fs::remove_dir_all(self.session_dir(session_id)))
    }

    /// Atomically persists a round's model binary.
    ///
    /// # Args
    /// * `session_id` - The owning session.
    /// * `round` - The round the model belongs to.
    /// * `bytes` - The model binary.
    ///
    /// # Returns
    /// The path the model was published at.
    pub fn write_model(&self, session_id: &str, round: u64, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.model_path(session_id, round);
        let mut file = NamedTempFile::new_in(self.session_dir(session_id))?;

        file.write_all(bytes)?;
        file.as_file().sync_all()?;
        file.persist(&path)?;

        Ok(path)
    }

    pub fn remove_model(&self, session_id: &str, round: u64) -> io::Result<()> {
        ignore_missing(fs::remove_file(self.model_path(session_id, round)))
    }

    /// Creates an empty staging directory inside the session's directory.
    pub fn stage(&self, session_id: &str) -> io::Result<Staging> {
        let dir = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(self.session_dir(session_id))?;

        Ok(Staging { dir })
    }

    /// Writes the round's metadata into a staged artifact and moves it into
    /// place as the round's serving directory.
    ///
    /// # Args
    /// * `staging` - The converted, staged artifact.
    /// * `metadata` - The session and round the artifact belongs to.
    ///
    /// # Returns
    /// The published serving directory.
    pub fn publish(&self, staging: Staging, metadata: &RoundMetadata) -> io::Result<PathBuf> {
        let mut file = BufWriter::new(File::create(staging.path().join(METADATA_FILE))?);
        serde_json::to_writer_pretty(&mut file, metadata)?;
        file.flush()?;
        drop(file);

        let target = self.serving_dir(&metadata.session_id, metadata.current_round);
        if target.exists() {
            warn!("replacing stale serving directory {}", target.display());
            fs::remove_dir_all(&target)?;
        }

        fs::rename(staging.path(), &target)?;
        // The guard's cleanup finds nothing left once the directory moved.
        drop(staging);

        Ok(target)
    }

    pub fn read_metadata(&self, session_id: &str, round: u64) -> io::Result<RoundMetadata> {
        let file = File::open(self.serving_dir(session_id, round).join(METADATA_FILE))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Lists the rounds with a published serving directory, ascending.
    pub fn published_rounds(&self, session_id: &str) -> io::Result<Vec<u64>> {
        let mut rounds = Vec::new();

        for entry in fs::read_dir(self.session_dir(session_id))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            if let Some(round) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
                rounds.push(round);
            }
        }

        rounds.sort_unstable();
        Ok(rounds)
    }
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
