//! Compose stage: merge the validated candidate with every branch output.
//!
//! Composition is pure data assembly. It checks that all branch outputs are
//! present before producing anything, and its output depends only on the
//! persisted job, so re-running it yields the same artifact.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::error::StageError;
use crate::pipeline::candidate::{
    ActivityEntry, BranchKey, BranchOutput, Candidate, FinalArtifact, FollowTheScript,
    LearningActivity, FOLLOW_THE_SCRIPT_ID,
};
use crate::pipeline::job::{ErrorClassification, Job, PipelineStage};

const STAGE: PipelineStage = PipelineStage::Compose;

fn incomplete(detail: impl Into<String>) -> StageError {
    StageError::new(STAGE, ErrorClassification::IncompleteComposition, detail)
}

/// Builds the final artifact of a job.
#[derive(Debug, Clone, Copy)]
pub struct Composer {
    branch_count: usize,
}

impl Composer {
    pub fn new(branch_count: usize) -> Self {
        Self { branch_count }
    }

    /// Composes the final artifact for a job sitting in `Composing`.
    pub fn compose(&self, job: &Job) -> Result<FinalArtifact, StageError> {
        let staging = &job.staging_artifacts;
        let validated = staging
            .validated
            .as_ref()
            .ok_or_else(|| incomplete("no validated candidate to compose"))?;

        if staging.post_process.len() != self.branch_count {
            return Err(incomplete(format!(
                "expected {} branch outputs, found {}",
                self.branch_count,
                staging.post_process.len()
            )));
        }

        let expected = job
            .pipeline_kind
            .branch_keys()
            .get(..self.branch_count)
            .ok_or_else(|| {
                incomplete(format!(
                    "{} jobs have fewer than {} branches",
                    job.pipeline_kind, self.branch_count
                ))
            })?;
        for key in expected {
            if !staging.post_process.contains_key(key) {
                return Err(incomplete(format!("missing output of branch {}", key)));
            }
        }

        let assets = staging.post_process.clone();
        match validated {
            Candidate::Activities(entries) => {
                let activities = compose_activities(entries, &assets)?;
                Ok(FinalArtifact::ActivityPackage { activities, assets })
            }
            Candidate::Scenes(scenes) => {
                if let Some(BranchOutput::AssetSet { keys }) = assets.get(&BranchKey::SceneRender)
                {
                    if keys.len() != scenes.len() {
                        return Err(incomplete(format!(
                            "{} scenes but {} rendered clips",
                            scenes.len(),
                            keys.len()
                        )));
                    }
                }
                Ok(FinalArtifact::VideoPackage {
                    scenes: scenes.clone(),
                    assets,
                })
            }
        }
    }
}

/// Hex SHA-256 of the artifact's JSON encoding.
///
/// Two compositions of the same job produce the same digest.
pub fn artifact_digest(artifact: &FinalArtifact) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(artifact)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

fn compose_activities(
    entries: &[ActivityEntry],
    assets: &BTreeMap<BranchKey, BranchOutput>,
) -> Result<Vec<ActivityEntry>, StageError> {
    let response_audio = match assets.get(&BranchKey::ResponseNarration) {
        Some(BranchOutput::AssetSet { keys }) => Some(keys),
        Some(BranchOutput::Asset { .. }) => {
            return Err(incomplete("response narration produced a single asset"))
        }
        None => None,
    };
    let script_audio = match assets.get(&BranchKey::ScriptNarration) {
        Some(BranchOutput::Asset { key }) => Some(key),
        Some(BranchOutput::AssetSet { .. }) => {
            return Err(incomplete("script narration produced several assets"))
        }
        None => None,
    };

    let mut activities = Vec::with_capacity(entries.len() + 1);
    for entry in entries {
        let entry = match (entry, response_audio) {
            (ActivityEntry::Known(LearningActivity::RecommendedResponses(responses)), Some(keys)) => {
                if keys.len() != responses.recommended_responses.len() {
                    return Err(incomplete(format!(
                        "{} responses but {} narrations",
                        responses.recommended_responses.len(),
                        keys.len()
                    )));
                }
                let mut narrated = responses.clone();
                for (response, key) in narrated.recommended_responses.iter_mut().zip(keys) {
                    response.audio_key = Some(key.clone());
                }
                ActivityEntry::Known(LearningActivity::RecommendedResponses(narrated))
            }
            _ => entry.clone(),
        };
        activities.push(entry);
    }

    if let Some(key) = script_audio {
        activities.push(ActivityEntry::Known(LearningActivity::FollowTheScript(
            FollowTheScript {
                activity_id: FOLLOW_THE_SCRIPT_ID,
                audio_key: key.clone(),
            },
        )));
    }

    Ok(activities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::candidate::{RecommendedResponse, RecommendedResponses};
    use crate::pipeline::job::{JobStatus, PrimaryInput};

    fn composing_job() -> Job {
        let mut job = Job::new(PrimaryInput::Script {
            lang_script: "はい".to_string(),
            ko_script: "네".to_string(),
            language: "jp".to_string(),
        });
        job.status = JobStatus::Composing;
        job.staging_artifacts.validated = Some(Candidate::Activities(vec![ActivityEntry::Known(
            LearningActivity::RecommendedResponses(RecommendedResponses {
                activity_id: 4,
                recommended_responses: vec![RecommendedResponse {
                    recommended_answer: "はい".to_string(),
                    pronunciation: "하이".to_string(),
                    korean_translation: "네".to_string(),
                    audio_key: None,
                }],
            }),
        )]));
        job.staging_artifacts.post_process.insert(
            BranchKey::ScriptNarration,
            BranchOutput::Asset {
                key: "script.mp3".to_string(),
            },
        );
        job.staging_artifacts.post_process.insert(
            BranchKey::ResponseNarration,
            BranchOutput::AssetSet {
                keys: vec!["r1.mp3".to_string()],
            },
        );
        job
    }

    #[test]
    fn test_compose_merges_branch_outputs() {
        let artifact = Composer::new(2).compose(&composing_job()).unwrap();
        let FinalArtifact::ActivityPackage { activities, assets } = artifact else {
            panic!("expected activity package");
        };
        assert_eq!(assets.len(), 2);
        assert_eq!(activities.len(), 2);

        let ActivityEntry::Known(LearningActivity::RecommendedResponses(responses)) =
            &activities[0]
        else {
            panic!("expected responses first");
        };
        assert_eq!(
            responses.recommended_responses[0].audio_key.as_deref(),
            Some("r1.mp3")
        );
        assert_eq!(activities[1].activity_type(), Some("FOLLOW_THE_SCRIPT"));
    }

    #[test]
    fn test_compose_is_byte_identical_on_rerun() {
        let job = composing_job();
        let composer = Composer::new(2);
        let first = serde_json::to_vec(&composer.compose(&job).unwrap()).unwrap();
        let second = serde_json::to_vec(&composer.compose(&job).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_artifact_digest_is_stable() {
        let job = composing_job();
        let composer = Composer::new(2);
        let first = artifact_digest(&composer.compose(&job).unwrap()).unwrap();
        let second = artifact_digest(&composer.compose(&job).unwrap()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_missing_branch_output_is_incomplete() {
        let mut job = composing_job();
        job.staging_artifacts
            .post_process
            .remove(&BranchKey::ResponseNarration);
        let err = Composer::new(2).compose(&job).unwrap_err();
        assert_eq!(
            err.classification,
            ErrorClassification::IncompleteComposition
        );
        assert_eq!(err.stage.to_string(), "compose");
    }

    #[test]
    fn test_narration_count_mismatch_is_incomplete() {
        let mut job = composing_job();
        job.staging_artifacts.post_process.insert(
            BranchKey::ResponseNarration,
            BranchOutput::AssetSet { keys: Vec::new() },
        );
        let err = Composer::new(2).compose(&job).unwrap_err();
        assert_eq!(
            err.classification,
            ErrorClassification::IncompleteComposition
        );
    }
}
