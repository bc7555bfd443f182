//! Sessions: one goal, one working directory.
//!
//! A session directory is created on the first run and reused whenever the
//! same identifier is supplied again. Its `session.json` manifest records the
//! goal so a session can be resumed by id alone.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::storage::{keys, ArtifactStore};

/// Prefix of every derived session identifier.
pub const SESSION_PREFIX: &str = "knowledge_session_";

const MAX_SLUG_CHARS: usize = 50;

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\W+").expect("valid regex"));

/// Derives a stable session identifier from the goal and creation time.
///
/// `knowledge_session_<slug>_<unix seconds>`, where the slug is the
/// lowercased goal with runs of non-word characters replaced by `_`,
/// truncated to 50 characters.
pub fn derive_session_id(goal: &str, created_at: DateTime<Utc>) -> String {
    let lowered = goal.trim().to_lowercase();
    let slug: String = NON_WORD
        .replace_all(&lowered, "_")
        .chars()
        .take(MAX_SLUG_CHARS)
        .collect();
    format!("{SESSION_PREFIX}{slug}_{}", created_at.timestamp())
}

/// Persisted session metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionManifest {
    pub id: String,
    pub goal: String,
    pub created_at: DateTime<Utc>,
}

/// An opened session with its artifact store.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub goal: String,
    pub created_at: DateTime<Utc>,
    store: ArtifactStore,
}

impl Session {
    /// Creates a new session directory under `sessions_root`.
    ///
    /// # Errors
    ///
    /// `Configuration` if the goal is empty, the directory is unwritable, or
    /// a session with the same id already exists.
    pub async fn create(sessions_root: &Path, goal: &str) -> Result<Self, PipelineError> {
        Self::create_at(sessions_root, goal, Utc::now()).await
    }

    /// [`Session::create`] with an explicit creation time.
    pub async fn create_at(
        sessions_root: &Path,
        goal: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Self, PipelineError> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(PipelineError::Configuration(
                "a learning goal is required to start a new session".to_string(),
            ));
        }

        let id = derive_session_id(goal, created_at);
        let dir = sessions_root.join(&id);
        claim_dir(sessions_root, &dir, &id).await?;
        let store = open_store(dir).await?;

        let manifest = SessionManifest {
            id: id.clone(),
            goal: goal.to_string(),
            created_at,
        };
        store.put_json(keys::SESSION_MANIFEST, &manifest).await?;
        info!(session_id = %id, dir = %store.root().display(), "Created session");

        Ok(Self {
            id,
            goal: manifest.goal,
            created_at,
            store,
        })
    }

    /// Opens an existing session directory.
    ///
    /// The stored goal wins over `goal`; a mismatch is logged. A directory
    /// without a manifest is adopted when `goal` is supplied.
    ///
    /// # Errors
    ///
    /// `Configuration` if the directory is missing or has neither manifest
    /// nor goal; `CorruptState` if the manifest does not parse.
    pub async fn resume(dir: &Path, goal: Option<&str>) -> Result<Self, PipelineError> {
        if !dir.is_dir() {
            return Err(PipelineError::Configuration(format!(
                "session directory '{}' does not exist",
                dir.display()
            )));
        }
        let store = open_store(dir.to_path_buf()).await?;

        let manifest = match store.get_json::<SessionManifest>(keys::SESSION_MANIFEST).await? {
            Some(manifest) => {
                if let Some(requested) = goal.map(str::trim).filter(|g| !g.is_empty()) {
                    if requested != manifest.goal {
                        warn!(
                            session_id = %manifest.id,
                            stored_goal = %manifest.goal,
                            requested_goal = %requested,
                            "Ignoring goal argument; resumed session keeps its stored goal"
                        );
                    }
                }
                manifest
            }
            None => {
                let goal = goal.map(str::trim).filter(|g| !g.is_empty()).ok_or_else(|| {
                    PipelineError::Configuration(format!(
                        "session '{}' has no {} and no goal was given",
                        dir.display(),
                        keys::SESSION_MANIFEST
                    ))
                })?;
                let id = dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| derive_session_id(goal, Utc::now()));
                let manifest = SessionManifest {
                    id,
                    goal: goal.to_string(),
                    created_at: Utc::now(),
                };
                store.put_json(keys::SESSION_MANIFEST, &manifest).await?;
                manifest
            }
        };

        info!(session_id = %manifest.id, dir = %dir.display(), "Resuming session");
        Ok(Self {
            id: manifest.id,
            goal: manifest.goal,
            created_at: manifest.created_at,
            store,
        })
    }

    /// Resolves a `--session` argument: a path, or an id under `sessions_root`.
    pub fn locate(sessions_root: &Path, session: &str) -> PathBuf {
        let as_path = PathBuf::from(session);
        if as_path.is_dir() {
            as_path
        } else {
            sessions_root.join(session)
        }
    }

    pub fn dir(&self) -> &Path {
        self.store.root()
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }
}

/// Creates `dir` exclusively; an existing directory belongs to another session.
async fn claim_dir(sessions_root: &Path, dir: &Path, id: &str) -> Result<(), PipelineError> {
    let unwritable = |e: std::io::Error| {
        PipelineError::Configuration(format!(
            "session directory '{}' is not writable: {}",
            dir.display(),
            e
        ))
    };
    tokio::fs::create_dir_all(sessions_root)
        .await
        .map_err(unwritable)?;
    match tokio::fs::create_dir(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(PipelineError::Configuration(format!(
                "session '{id}' already exists; pass --session {id} to resume it"
            )))
        }
        Err(e) => Err(unwritable(e)),
    }
}

async fn open_store(dir: PathBuf) -> Result<ArtifactStore, PipelineError> {
    ArtifactStore::open(&dir).await.map_err(|e| {
        PipelineError::Configuration(format!(
            "session directory '{}' is not writable: {}",
            dir.display(),
            e
        ))
    })
}
