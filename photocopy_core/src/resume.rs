//! The resume orchestrator: given the current configuration and a freshly
//! built plan, decide whether to start a new session or carry on from a
//! stored checkpoint.

use crate::checkpoint::format::{CheckpointStatus, FORMAT_VERSION};
use crate::checkpoint::store::CheckpointStore;
use crate::checkpoint::validate::{self, ResumeValidation};
use crate::checkpoint::{CheckpointState, CheckpointStats, CompletionBitmap};
use crate::planner::CopyPlan;
use chrono::{DateTime, Utc};
use photocopy_common::{OrganizeConfig, Result, SessionId};
use std::collections::HashMap;
use tracing::info;

/// What the user asked for on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumePreference {
    /// No flag: resume when possible, but let the front-end confirm.
    #[default]
    Auto,
    /// `--fresh`: ignore any stored checkpoint.
    Fresh,
    /// `--resume`: resume without prompting when a valid checkpoint exists.
    Resume,
}

/// The orchestrator's verdict.
#[derive(Debug)]
pub enum ResumeDecision {
    StartFresh {
        reason: String,
    },
    Resume {
        state: CheckpointState,
        validation: ResumeValidation,
    },
    PromptUser {
        state: CheckpointState,
        validation: ResumeValidation,
    },
}

/// Decide how to start. `plan_hash` is the hash of the plan just built for
/// this run; a stored checkpoint whose plan hash differs describes a
/// different file set and cannot be resumed safely.
pub fn decide(
    store: &CheckpointStore,
    config: &OrganizeConfig,
    source_dir: &str,
    plan_hash: [u8; 16],
    preference: ResumePreference,
    now: DateTime<Utc>,
) -> Result<ResumeDecision> {
    if preference == ResumePreference::Fresh {
        return Ok(ResumeDecision::StartFresh {
            reason: "--fresh".to_string(),
        });
    }

    let state = match store.find_latest(source_dir, &config.destination_pattern)? {
        Some(state) => state,
        None => {
            return Ok(ResumeDecision::StartFresh {
                reason: "no previous checkpoint".to_string(),
            });
        }
    };

    let validation = validate::validate(&state, config, source_dir, now);
    if let ResumeValidation::Invalid { reason } = &validation {
        info!("Checkpoint {:?} not resumable: {}", state.file_path, reason);
        return Ok(ResumeDecision::StartFresh {
            reason: reason.clone(),
        });
    }

    if state.plan_hash != plan_hash {
        return Ok(ResumeDecision::StartFresh {
            reason: "Source files have changed since the checkpoint was written".to_string(),
        });
    }

    if preference == ResumePreference::Resume {
        Ok(ResumeDecision::Resume { state, validation })
    } else {
        Ok(ResumeDecision::PromptUser { state, validation })
    }
}

/// Build the initial in-memory state for a fresh session: totals from the
/// plan, freshly computed hashes, a new collision-resistant session id.
pub fn create_checkpoint_state(
    plan: &CopyPlan,
    config: &OrganizeConfig,
    source_dir: &str,
    now: DateTime<Utc>,
) -> CheckpointState {
    let files = plan.files();
    CheckpointState {
        session_id: SessionId::new().to_string(),
        version: FORMAT_VERSION,
        status: CheckpointStatus::InProgress,
        started_at: now,
        source_dir: source_dir.to_string(),
        destination_pattern: config.destination_pattern.clone(),
        config_hash: validate::config_hash(config).prefix(),
        plan_hash: validate::plan_hash(&files).prefix(),
        total_files: plan.len() as u32,
        total_bytes: plan.total_bytes,
        bitmap: CompletionBitmap::new(plan.len() as u32),
        failures: HashMap::new(),
        stats: CheckpointStats::empty(now),
        file_path: None,
    }
}
