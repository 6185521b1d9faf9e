//! Post-processing branch executor.
//!
//! One executor serves every branch kind; the [`BranchKey`] argument selects
//! what is synthesized and where it is stored. Storage keys are derived from
//! the job id so a re-run overwrites the same assets.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::StageError;
use crate::pipeline::candidate::{BranchKey, BranchOutput, Candidate, LearningActivity};
use crate::pipeline::job::{JobId, PipelineStage, PrimaryInput};
use crate::services::{SynthesisRequest, SynthesisService};

const STAGE: PipelineStage = PipelineStage::PostProcess { branch: 0 };

/// Storage key for the narrated script sentence.
pub fn script_audio_key(language: &str, job_id: &JobId) -> String {
    format!(
        "contents/{}/audio/script_audio/{}_script_audio.mp3",
        language, job_id
    )
}

/// Storage key for the narration of the `index`-th (0-based) response.
pub fn response_audio_key(language: &str, job_id: &JobId, index: usize) -> String {
    format!(
        "contents/{}/audio/recommended_answer/{}_recommend_{:02}.mp3",
        language,
        job_id,
        index + 1
    )
}

/// Storage key for the reference still of a scene batch.
pub fn reference_image_key(job_id: &JobId) -> String {
    format!("videos/{}/reference.png", job_id)
}

/// Storage key for the `index`-th (0-based) rendered scene.
pub fn scene_video_key(job_id: &JobId, index: usize) -> String {
    format!("videos/{}/scene_{:02}.mp4", job_id, index + 1)
}

/// Runs a single post-processing branch.
pub struct BranchExecutor {
    service: Arc<dyn SynthesisService>,
    timeout: Duration,
}

impl BranchExecutor {
    pub fn new(service: Arc<dyn SynthesisService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    /// Builds the synthesis requests a branch issues, in item order.
    pub fn requests(
        job_id: &JobId,
        input: &PrimaryInput,
        candidate: &Candidate,
        key: BranchKey,
    ) -> Result<Vec<SynthesisRequest>, StageError> {
        let language = input.language().to_string();
        let request = |text: &str, target_key: String| SynthesisRequest {
            branch_key: key,
            text: text.to_string(),
            target_key,
            language: language.clone(),
        };

        match (key, input, candidate) {
            (BranchKey::ScriptNarration, PrimaryInput::Script { lang_script, .. }, _) => {
                Ok(vec![request(lang_script.as_str(), script_audio_key(&language, job_id))])
            }
            (BranchKey::ResponseNarration, _, Candidate::Activities(_)) => {
                let responses = candidate
                    .find_activity(|a| match a {
                        LearningActivity::RecommendedResponses(r) => Some(r),
                        _ => None,
                    })
                    .ok_or_else(|| {
                        StageError::structural(STAGE, "candidate has no recommended responses")
                    })?;
                Ok(responses
                    .recommended_responses
                    .iter()
                    .enumerate()
                    .map(|(i, r)| {
                        request(
                            r.recommended_answer.as_str(),
                            response_audio_key(&language, job_id, i),
                        )
                    })
                    .collect())
            }
            (BranchKey::ReferenceImage, _, Candidate::Scenes(scenes)) => {
                let first = scenes
                    .first()
                    .ok_or_else(|| StageError::structural(STAGE, "candidate has no scenes"))?;
                Ok(vec![request(first.scene_prompt.as_str(), reference_image_key(job_id))])
            }
            (BranchKey::SceneRender, _, Candidate::Scenes(scenes)) => Ok(scenes
                .iter()
                .enumerate()
                .map(|(i, s)| request(s.scene_prompt.as_str(), scene_video_key(job_id, i)))
                .collect()),
            _ => Err(StageError::structural(
                STAGE,
                format!("branch {} does not apply to a {} job", key, input.kind()),
            )),
        }
    }

    /// Executes the branch `key` and returns its output.
    pub async fn execute(
        &self,
        job_id: &JobId,
        input: &PrimaryInput,
        candidate: &Candidate,
        key: BranchKey,
    ) -> Result<BranchOutput, StageError> {
        let requests = Self::requests(job_id, input, candidate, key)?;
        let mut keys = Vec::with_capacity(requests.len());

        for request in &requests {
            let asset = tokio::time::timeout(self.timeout, self.service.synthesize(request))
                .await
                .map_err(|_| StageError::timeout(STAGE, self.timeout))?
                .map_err(|e| StageError::from_service(STAGE, e))?;
            debug!(job_id = %job_id, branch = %key, asset = %asset.key, "Asset synthesized");
            keys.push(asset.key);
        }

        match key {
            BranchKey::ScriptNarration | BranchKey::ReferenceImage => keys
                .into_iter()
                .next()
                .map(|asset| BranchOutput::Asset { key: asset })
                .ok_or_else(|| StageError::external(STAGE, "synthesis returned no asset")),
            BranchKey::ResponseNarration | BranchKey::SceneRender => {
                Ok(BranchOutput::AssetSet { keys })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::candidate::{ActivityEntry, RecommendedResponse, RecommendedResponses};

    #[test]
    fn test_storage_keys() {
        let job_id: JobId = "6f1c1b3e-3a2e-4d7a-9a53-0e9d8c6c1f00".parse().unwrap();
        assert_eq!(
            script_audio_key("jp", &job_id),
            "contents/jp/audio/script_audio/6f1c1b3e-3a2e-4d7a-9a53-0e9d8c6c1f00_script_audio.mp3"
        );
        assert!(response_audio_key("jp", &job_id, 0).ends_with("_recommend_01.mp3"));
        assert!(scene_video_key(&job_id, 9).ends_with("scene_10.mp4"));
    }

    #[test]
    fn test_response_requests_follow_item_order() {
        let job_id = JobId::new();
        let input = PrimaryInput::Script {
            lang_script: "はい".to_string(),
            ko_script: "네".to_string(),
            language: "jp".to_string(),
        };
        let response = |answer: &str| RecommendedResponse {
            recommended_answer: answer.to_string(),
            pronunciation: "하이".to_string(),
            korean_translation: "네".to_string(),
            audio_key: None,
        };
        let candidate = Candidate::Activities(vec![ActivityEntry::Known(
            LearningActivity::RecommendedResponses(RecommendedResponses {
                activity_id: 4,
                recommended_responses: vec![response("first"), response("second")],
            }),
        )]);

        let requests =
            BranchExecutor::requests(&job_id, &input, &candidate, BranchKey::ResponseNarration)
                .unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].text, "first");
        assert_eq!(requests[1].target_key, response_audio_key("jp", &job_id, 1));
    }

    #[test]
    fn test_branch_kind_mismatch_is_rejected() {
        let input = PrimaryInput::Script {
            lang_script: "はい".to_string(),
            ko_script: "네".to_string(),
            language: "jp".to_string(),
        };
        let err = BranchExecutor::requests(
            &JobId::new(),
            &input,
            &Candidate::Activities(Vec::new()),
            BranchKey::SceneRender,
        )
        .unwrap_err();
        assert!(err.detail.contains("scene_render"));
    }
}
