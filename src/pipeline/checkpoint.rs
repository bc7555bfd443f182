//! Stage identifiers and the durable checkpoint record.
//!
//! The checkpoint maps stage names to a small record of completion flags and
//! lives at `checkpoint.json` in the session directory. Only the controller
//! mutates it, and every mutation is written with the store's atomic
//! temp-then-rename discipline.
//!
//! ```json
//! {
//!   "version": 1,
//!   "stages": {
//!     "plan":    { "complete": true, "completed_at": "2024-05-01T10:00:00Z" },
//!     "acquire": { "complete": true, "completed_at": "2024-05-01T10:02:11Z" },
//!     "curate":  { "complete": false, "paused": "awaiting human review" }
//!   }
//! }
//! ```
//!
//! Unknown keys at any level are ignored on load so newer flags stay
//! readable by older binaries.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::storage::{keys, ArtifactStore};

/// The seven stages, in their fixed execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageId {
    Plan = 1,
    Acquire = 2,
    Curate = 3,
    Distill = 4,
    Generate = 5,
    Persona = 6,
    Finalize = 7,
}

impl StageId {
    pub const ALL: [StageId; 7] = [
        StageId::Plan,
        StageId::Acquire,
        StageId::Curate,
        StageId::Distill,
        StageId::Generate,
        StageId::Persona,
        StageId::Finalize,
    ];

    /// 1-based position in the sequence.
    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            StageId::Plan => "plan",
            StageId::Acquire => "acquire",
            StageId::Curate => "curate",
            StageId::Distill => "distill",
            StageId::Generate => "generate",
            StageId::Persona => "persona",
            StageId::Finalize => "finalize",
        }
    }

    pub fn from_number(number: u8) -> Option<StageId> {
        StageId::ALL.into_iter().find(|s| s.number() == number)
    }

    fn from_name(name: &str) -> Option<StageId> {
        StageId::ALL.into_iter().find(|s| s.name() == name)
    }

    /// The artifact whose presence proves the stage completed.
    pub fn completion_artifact(self) -> &'static str {
        match self {
            StageId::Plan => keys::RESEARCH_PLAN,
            StageId::Acquire => keys::ACQUISITION_MANIFEST,
            StageId::Curate => keys::CURATION_MANIFEST,
            StageId::Distill => keys::DISTILLED_KNOWLEDGE,
            StageId::Generate => keys::BASE_DATASET,
            StageId::Persona => keys::PERSONA_DATASET,
            StageId::Finalize => keys::FINAL_DATASET,
        }
    }

    /// Everything this stage writes: fixed keys and key prefixes.
    ///
    /// Used by `reset --purge` to remove a stage's outputs.
    pub fn owned_artifacts(self) -> &'static [&'static str] {
        match self {
            StageId::Plan => &[keys::RESEARCH_PLAN],
            StageId::Acquire => &[keys::RAW_PREFIX, keys::ACQUISITION_MANIFEST],
            StageId::Curate => &[
                keys::CURATED_PREFIX,
                keys::SCORES_PREFIX,
                keys::CURATION_MANIFEST,
            ],
            StageId::Distill => &[keys::SUMMARIES_PREFIX, keys::DISTILLED_KNOWLEDGE],
            StageId::Generate => &[keys::BASE_DATASET],
            StageId::Persona => &[keys::PERSONA_DATASET],
            StageId::Finalize => &[keys::FINAL_DATASET],
        }
    }

    /// This stage and every later one.
    pub fn and_later(self) -> impl Iterator<Item = StageId> {
        StageId::ALL.into_iter().filter(move |s| *s >= self)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StageId {
    type Err = String;

    /// Accepts a stage number (`"3"`) or name (`"curate"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(number) = s.parse::<u8>() {
            return StageId::from_number(number)
                .ok_or_else(|| format!("stage number must be 1-7, got {number}"));
        }
        StageId::from_name(&s.to_lowercase()).ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

/// Which stages a run asks for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StageSelection {
    #[default]
    All,
    Only(BTreeSet<StageId>),
}

impl StageSelection {
    pub fn includes(&self, stage: StageId) -> bool {
        match self {
            StageSelection::All => true,
            StageSelection::Only(set) => set.contains(&stage),
        }
    }
}

impl FromStr for StageSelection {
    type Err = String;

    /// Parses `"all"` or a comma-separated list such as `"1,2,curate"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(StageSelection::All);
        }
        let stages = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(str::parse)
            .collect::<Result<BTreeSet<StageId>, _>>()?;
        if stages.is_empty() {
            return Err("no stages selected".to_string());
        }
        Ok(StageSelection::Only(stages))
    }
}

/// Completion record for one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    #[serde(default)]
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Completed without producing its artifact (persona with no reference text).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    /// Set while the stage is paused awaiting operator action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<String>,
}

const CHECKPOINT_VERSION: u32 = 1;

fn default_version() -> u32 {
    CHECKPOINT_VERSION
}

/// Durable record of stage progress for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub stages: BTreeMap<String, StageRecord>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            stages: BTreeMap::new(),
        }
    }
}

/// Ordered stages to run, plus the requested stages skipped as already complete.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StagePlan {
    pub run: Vec<StageId>,
    pub skipped: Vec<StageId>,
}

impl Checkpoint {
    /// Loads the session checkpoint; a missing file yields an empty checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::CorruptState` if the file exists but does not parse.
    pub async fn load(store: &ArtifactStore) -> Result<Self, PipelineError> {
        Ok(store
            .get_json::<Checkpoint>(keys::CHECKPOINT)
            .await?
            .unwrap_or_default())
    }

    /// Atomically writes the checkpoint.
    pub async fn persist(&self, store: &ArtifactStore) -> Result<(), PipelineError> {
        store.put_json(keys::CHECKPOINT, self).await?;
        Ok(())
    }

    pub fn record(&self, stage: StageId) -> Option<&StageRecord> {
        self.stages.get(stage.name())
    }

    pub fn is_complete(&self, stage: StageId) -> bool {
        self.record(stage).is_some_and(|r| r.complete)
    }

    pub fn was_skipped(&self, stage: StageId) -> bool {
        self.record(stage).is_some_and(|r| r.complete && r.skipped)
    }

    /// Marks a stage complete and clears any pause flag it carried.
    pub fn mark_complete(&mut self, stage: StageId, skipped: bool) {
        self.stages.insert(
            stage.name().to_string(),
            StageRecord {
                complete: true,
                completed_at: Some(Utc::now()),
                skipped,
                paused: None,
            },
        );
    }

    /// Records that a stage paused; the stage stays incomplete.
    pub fn mark_paused(&mut self, stage: StageId, reason: impl Into<String>) {
        let record = self.stages.entry(stage.name().to_string()).or_default();
        record.complete = false;
        record.completed_at = None;
        record.paused = Some(reason.into());
    }

    pub fn pause_reason(&self, stage: StageId) -> Option<&str> {
        self.record(stage).and_then(|r| r.paused.as_deref())
    }

    /// Removes the records of `stage` and every later stage.
    ///
    /// Artifacts on disk are left alone.
    pub fn reset_from(&mut self, stage: StageId) {
        for later in stage.and_later() {
            self.stages.remove(later.name());
        }
    }

    /// Highest stage such that it and all earlier stages are complete.
    pub fn complete_through(&self) -> Option<StageId> {
        StageId::ALL
            .into_iter()
            .take_while(|s| self.is_complete(*s))
            .last()
    }

    /// Computes the ordered stages a run should execute.
    ///
    /// Requested stages that are already complete are reported in `skipped`
    /// unless `force` is set.
    pub fn resolve_stages_to_run(&self, selection: &StageSelection, force: bool) -> StagePlan {
        let mut plan = StagePlan::default();
        for stage in StageId::ALL {
            if !selection.includes(stage) {
                continue;
            }
            if self.is_complete(stage) && !force {
                plan.skipped.push(stage);
            } else {
                plan.run.push(stage);
            }
        }
        plan
    }

    /// Checks that every stage marked complete still has a well-formed artifact.
    ///
    /// A persona stage that completed as a skip has no artifact by design.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::CorruptState` naming the first offending artifact.
    pub async fn verify_artifacts(&self, store: &ArtifactStore) -> Result<(), PipelineError> {
        for stage in StageId::ALL {
            if !self.is_complete(stage) || self.was_skipped(stage) {
                continue;
            }
            let key = stage.completion_artifact();
            let Some(bytes) = store.get(key).await? else {
                return Err(PipelineError::CorruptState {
                    path: key.to_string(),
                    reason: format!("stage '{stage}' is marked complete but its artifact is missing"),
                });
            };
            if let Err(reason) = check_well_formed(key, &bytes) {
                return Err(PipelineError::CorruptState {
                    path: key.to_string(),
                    reason: format!("stage '{stage}' artifact is malformed: {reason}"),
                });
            }
        }
        Ok(())
    }
}

fn check_well_formed(key: &str, bytes: &[u8]) -> Result<(), String> {
    if key.ends_with(".jsonl") {
        let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            serde_json::from_str::<serde_json::Value>(line)
                .map_err(|e| format!("line {}: {}", index + 1, e))?;
        }
        Ok(())
    } else {
        serde_json::from_slice::<serde_json::Value>(bytes)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
