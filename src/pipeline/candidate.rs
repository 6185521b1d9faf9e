//! Typed payloads that flow between the workflow stages.
//!
//! A [`Candidate`] is what Generate produces and the validators check.
//! Branch executors turn a validated candidate into [`BranchOutput`]s, and
//! Compose merges both into a [`FinalArtifact`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Learning activities
// ============================================================================

/// Multiple-choice comprehension question about the script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComprehensionQuiz {
    pub activity_id: u32,
    pub question: String,
    pub correct_option: String,
    pub incorrect_options: Vec<String>,
    pub tip: String,
    /// All options in presentation order, filled in by normalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    /// Index of `correct_option` inside `options`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_index: Option<usize>,
}

/// Reorder-the-chunks exercise; the chunks concatenate to the source sentence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceReconstruction {
    pub activity_id: u32,
    pub chunks: Vec<String>,
    pub target_sentence: String,
    #[serde(default)]
    pub tip: String,
}

/// A suggested reply to the script line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendedResponse {
    pub recommended_answer: String,
    /// Hangul transliteration of `recommended_answer`.
    pub pronunciation: String,
    pub korean_translation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendedResponses {
    pub activity_id: u32,
    pub recommended_responses: Vec<RecommendedResponse>,
}

/// Listen-and-repeat activity, added at composition time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowTheScript {
    pub activity_id: u32,
    pub audio_key: String,
}

/// Activity id assigned to the listen-and-repeat activity.
pub const FOLLOW_THE_SCRIPT_ID: u32 = 3;

/// A learning activity of a known type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "activity_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LearningActivity {
    ComprehensionQuiz(ComprehensionQuiz),
    SentenceReconstruction(SentenceReconstruction),
    RecommendedResponses(RecommendedResponses),
    FollowTheScript(FollowTheScript),
}

impl LearningActivity {
    /// Wire name of the activity type.
    pub fn type_name(&self) -> &'static str {
        match self {
            LearningActivity::ComprehensionQuiz(_) => "COMPREHENSION_QUIZ",
            LearningActivity::SentenceReconstruction(_) => "SENTENCE_RECONSTRUCTION",
            LearningActivity::RecommendedResponses(_) => "RECOMMENDED_RESPONSES",
            LearningActivity::FollowTheScript(_) => "FOLLOW_THE_SCRIPT",
        }
    }
}

/// Wire names of every activity type the pipeline understands.
pub const KNOWN_ACTIVITY_TYPES: [&str; 4] = [
    "COMPREHENSION_QUIZ",
    "SENTENCE_RECONSTRUCTION",
    "RECOMMENDED_RESPONSES",
    "FOLLOW_THE_SCRIPT",
];

/// One entry of an activity list.
///
/// Entries that do not parse as a [`LearningActivity`] are kept verbatim so
/// unknown activity types survive the pipeline untouched. A passthrough entry
/// that claims a known type is malformed and rejected by structural validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActivityEntry {
    Known(LearningActivity),
    Passthrough(serde_json::Value),
}

impl ActivityEntry {
    /// Declared activity type, if any.
    pub fn activity_type(&self) -> Option<&str> {
        match self {
            ActivityEntry::Known(activity) => Some(activity.type_name()),
            ActivityEntry::Passthrough(value) => value.get("activity_type")?.as_str(),
        }
    }
}

// ============================================================================
// Scenes
// ============================================================================

/// One short character scene for the video pipeline.
///
/// Missing fields deserialize as empty strings and are rejected by structural
/// validation rather than by the parser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scene {
    pub source_title: String,
    pub source_title_kr: String,
    pub character_name: String,
    pub dialogue_text: String,
    pub dialogue_en: String,
    pub emotion_tag: String,
    pub scene_prompt: String,
}

// ============================================================================
// Candidate
// ============================================================================

/// Output of the Generate stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "items", rename_all = "snake_case")]
pub enum Candidate {
    Activities(Vec<ActivityEntry>),
    Scenes(Vec<Scene>),
}

impl Candidate {
    /// Returns true if the candidate holds no items.
    pub fn is_empty(&self) -> bool {
        match self {
            Candidate::Activities(items) => items.is_empty(),
            Candidate::Scenes(items) => items.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Candidate::Activities(items) => items.len(),
            Candidate::Scenes(items) => items.len(),
        }
    }

    /// Pipeline kind this candidate belongs to.
    pub fn kind(&self) -> super::job::PipelineKind {
        match self {
            Candidate::Activities(_) => super::job::PipelineKind::ContentActivity,
            Candidate::Scenes(_) => super::job::PipelineKind::VideoFactory,
        }
    }

    /// First known activity matching `pick`.
    pub fn find_activity<T>(&self, pick: impl Fn(&LearningActivity) -> Option<&T>) -> Option<&T> {
        match self {
            Candidate::Activities(items) => items.iter().find_map(|entry| match entry {
                ActivityEntry::Known(activity) => pick(activity),
                ActivityEntry::Passthrough(_) => None,
            }),
            Candidate::Scenes(_) => None,
        }
    }
}

// ============================================================================
// Validation results
// ============================================================================

/// Reason attached to a validation outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    Ok,
    StructuralError,
    /// The quiz tip gives the answer away.
    TipLeak,
    /// A translation does not match its source.
    TranslationMismatch,
    /// A pronunciation guide contains non-Hangul text.
    PronunciationContamination,
    Other,
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReasonCode::Ok => "OK",
            ReasonCode::StructuralError => "STRUCTURAL_ERROR",
            ReasonCode::TipLeak => "TIP_LEAK",
            ReasonCode::TranslationMismatch => "TRANSLATION_MISMATCH",
            ReasonCode::PronunciationContamination => "PRONUNCIATION_CONTAMINATION",
            ReasonCode::Other => "OTHER",
        };
        f.write_str(name)
    }
}

/// Outcome of a structural or semantic check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub reason_code: ReasonCode,
    pub detail: String,
}

impl ValidationResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason_code: ReasonCode::Ok,
            detail: String::new(),
        }
    }

    pub fn fail(reason_code: ReasonCode, detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason_code,
            detail: detail.into(),
        }
    }
}

// ============================================================================
// Branches
// ============================================================================

/// Kind of post-processing branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchKey {
    /// Narrated audio of the script sentence.
    ScriptNarration,
    /// Narrated audio of each recommended response.
    ResponseNarration,
    /// Reference still for the scene batch.
    ReferenceImage,
    /// One rendered clip per scene.
    SceneRender,
}

impl fmt::Display for BranchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BranchKey::ScriptNarration => "script_narration",
            BranchKey::ResponseNarration => "response_narration",
            BranchKey::ReferenceImage => "reference_image",
            BranchKey::SceneRender => "scene_render",
        };
        f.write_str(name)
    }
}

/// Output of one post-processing branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BranchOutput {
    /// A single stored asset.
    Asset { key: String },
    /// Several stored assets, in item order.
    AssetSet { keys: Vec<String> },
}

/// Result reported by a branch at fan-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchResult {
    pub branch_key: BranchKey,
    pub output: BranchOutput,
}

// ============================================================================
// Final artifact
// ============================================================================

/// The composed, persisted result of a `Ready` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FinalArtifact {
    ActivityPackage {
        activities: Vec<ActivityEntry>,
        assets: BTreeMap<BranchKey, BranchOutput>,
    },
    VideoPackage {
        scenes: Vec<Scene>,
        assets: BTreeMap<BranchKey, BranchOutput>,
    },
}

impl FinalArtifact {
    /// Branch outputs merged into the artifact.
    pub fn assets(&self) -> &BTreeMap<BranchKey, BranchOutput> {
        match self {
            FinalArtifact::ActivityPackage { assets, .. }
            | FinalArtifact::VideoPackage { assets, .. } => assets,
        }
    }
}
