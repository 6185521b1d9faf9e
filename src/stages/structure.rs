//! Deterministic structural validation and normalization of candidates.
//!
//! No collaborator is called here and no iteration is consumed: a candidate
//! either satisfies every rule and comes back normalized, or the job fails
//! with a `StructuralError`.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::pipeline::candidate::{
    ActivityEntry, Candidate, ComprehensionQuiz, LearningActivity, ReasonCode,
    RecommendedResponses, Scene, SentenceReconstruction, ValidationResult, KNOWN_ACTIVITY_TYPES,
};
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::job::{JobId, PrimaryInput};
use crate::utils::text::word_count;

/// Anything other than Hangul syllables, whitespace and basic punctuation.
static NON_HANGUL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\s\.,!\?가-힣]").expect("static pattern is valid"));

/// Activity types every activity set must contain.
const REQUIRED_ACTIVITY_TYPES: [&str; 3] = [
    "COMPREHENSION_QUIZ",
    "SENTENCE_RECONSTRUCTION",
    "RECOMMENDED_RESPONSES",
];

/// Returns true if `text` is a clean Hangul pronunciation guide.
pub fn is_hangul_pronunciation(text: &str) -> bool {
    !text.trim().is_empty() && !NON_HANGUL.is_match(text)
}

/// Limits applied by structural validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureRules {
    pub quiz_incorrect_options: usize,
    pub recommended_responses: usize,
    pub max_dialogue_words: usize,
}

impl Default for StructureRules {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl StructureRules {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            quiz_incorrect_options: config.quiz_incorrect_options,
            recommended_responses: config.recommended_responses,
            max_dialogue_words: config.max_dialogue_words,
        }
    }
}

/// Collected rule violations.
#[derive(Debug, Default)]
struct Report {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Report {
    fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Structural validator for both pipeline kinds.
#[derive(Debug, Clone, Default)]
pub struct StructureValidator {
    rules: StructureRules,
}

impl StructureValidator {
    pub fn new(rules: StructureRules) -> Self {
        Self { rules }
    }

    /// Checks `candidate` against `input` and returns its normalized form.
    ///
    /// Normalization is a pure function of the candidate and the job id, so
    /// re-running this stage always yields the same result.
    pub fn validate(
        &self,
        job_id: &JobId,
        input: &PrimaryInput,
        candidate: &Candidate,
    ) -> Result<Candidate, ValidationResult> {
        let mut report = Report::default();

        let normalized = match (input, candidate) {
            (
                PrimaryInput::Script {
                    lang_script,
                    ko_script,
                    ..
                },
                Candidate::Activities(entries),
            ) => Candidate::Activities(self.check_activities(
                job_id,
                lang_script,
                ko_script,
                entries,
                &mut report,
            )),
            (PrimaryInput::VideoRequest { count, .. }, Candidate::Scenes(scenes)) => {
                Candidate::Scenes(self.check_scenes(*count, scenes, &mut report))
            }
            _ => {
                return Err(ValidationResult::fail(
                    ReasonCode::StructuralError,
                    format!(
                        "candidate kind {} does not match input kind {}",
                        candidate.kind(),
                        input.kind()
                    ),
                ))
            }
        };

        for warning in &report.warnings {
            warn!(job_id = %job_id, warning = %warning, "Structural validation warning");
        }

        if report.errors.is_empty() {
            Ok(normalized)
        } else {
            Err(ValidationResult::fail(
                ReasonCode::StructuralError,
                report.errors.join("; "),
            ))
        }
    }

    // ========================================================================
    // Activities
    // ========================================================================

    fn check_activities(
        &self,
        job_id: &JobId,
        lang_script: &str,
        ko_script: &str,
        entries: &[ActivityEntry],
        report: &mut Report,
    ) -> Vec<ActivityEntry> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut normalized = Vec::with_capacity(entries.len());

        for (idx, entry) in entries.iter().enumerate() {
            match entry {
                ActivityEntry::Known(activity) => {
                    if !seen.insert(activity.type_name()) {
                        report.add_error(format!("duplicate {} activity", activity.type_name()));
                    }
                    let activity = match activity {
                        LearningActivity::ComprehensionQuiz(quiz) => {
                            self.check_quiz(quiz, ko_script, report);
                            LearningActivity::ComprehensionQuiz(shuffle_options(job_id, quiz))
                        }
                        LearningActivity::SentenceReconstruction(reconstruction) => {
                            check_reconstruction(reconstruction, lang_script, report);
                            activity.clone()
                        }
                        LearningActivity::RecommendedResponses(responses) => {
                            self.check_responses(responses, report);
                            activity.clone()
                        }
                        LearningActivity::FollowTheScript(_) => {
                            report.add_error(
                                "FOLLOW_THE_SCRIPT must not be generated; it is added at composition",
                            );
                            activity.clone()
                        }
                    };
                    normalized.push(ActivityEntry::Known(activity));
                }
                ActivityEntry::Passthrough(value) => {
                    match value.get("activity_type").and_then(|v| v.as_str()) {
                        None => report.add_error(format!("activity {} has no activity_type", idx)),
                        Some(kind) if KNOWN_ACTIVITY_TYPES.contains(&kind) => {
                            report.add_error(format!("malformed {} activity at index {}", kind, idx))
                        }
                        Some(_) => {}
                    }
                    if value.get("activity_id").is_none() {
                        report.add_error(format!("activity {} has no activity_id", idx));
                    }
                    normalized.push(entry.clone());
                }
            }
        }

        for required in REQUIRED_ACTIVITY_TYPES {
            if !seen.contains(required) {
                report.add_error(format!("missing required activity {}", required));
            }
        }

        normalized
    }

    fn check_quiz(&self, quiz: &ComprehensionQuiz, ko_script: &str, report: &mut Report) {
        let correct = quiz.correct_option.trim();

        if correct.is_empty() {
            report.add_error("quiz correct_option is empty");
        }
        if quiz.question.trim().is_empty() {
            report.add_error("quiz question is empty");
        }
        if quiz.incorrect_options.len() != self.rules.quiz_incorrect_options {
            report.add_error(format!(
                "quiz needs exactly {} incorrect options, got {}",
                self.rules.quiz_incorrect_options,
                quiz.incorrect_options.len()
            ));
        }

        let mut distinct = HashSet::new();
        for option in &quiz.incorrect_options {
            let option = option.trim();
            if option.is_empty() {
                report.add_error("quiz has an empty incorrect option");
            } else if option == correct {
                report.add_error(format!(
                    "quiz correct option '{}' also appears among incorrect options",
                    correct
                ));
            } else if !distinct.insert(option) {
                report.add_error(format!("quiz incorrect option '{}' is duplicated", option));
            }
        }

        if !correct.is_empty() && quiz.tip.contains(correct) {
            report.add_error("quiz tip contains the correct answer");
        }
        let ko_script = ko_script.trim();
        if !ko_script.is_empty() && quiz.tip.contains(ko_script) {
            report.add_error("quiz tip contains the full translation");
        }
    }

    fn check_responses(&self, responses: &RecommendedResponses, report: &mut Report) {
        let items = &responses.recommended_responses;
        if items.is_empty() {
            report.add_error("recommended_responses is empty");
            return;
        }
        if items.len() != self.rules.recommended_responses {
            report.add_warning(format!(
                "expected {} recommended responses, got {}",
                self.rules.recommended_responses,
                items.len()
            ));
        }

        for (idx, item) in items.iter().enumerate() {
            if item.recommended_answer.trim().is_empty() {
                report.add_error(format!("response {} has an empty answer", idx + 1));
            }
            if item.korean_translation.trim().is_empty() {
                report.add_error(format!("response {} has an empty translation", idx + 1));
            }
            if !is_hangul_pronunciation(&item.pronunciation) {
                report.add_error(format!(
                    "response {} pronunciation must be Hangul only: '{}'",
                    idx + 1,
                    item.pronunciation
                ));
            }
        }
    }

    // ========================================================================
    // Scenes
    // ========================================================================

    fn check_scenes(&self, expected: u32, scenes: &[Scene], report: &mut Report) -> Vec<Scene> {
        if scenes.len() != expected as usize {
            report.add_error(format!(
                "expected {} scenes, got {}",
                expected,
                scenes.len()
            ));
        }

        scenes
            .iter()
            .enumerate()
            .map(|(idx, scene)| {
                let fields = [
                    ("source_title", &scene.source_title),
                    ("source_title_kr", &scene.source_title_kr),
                    ("character_name", &scene.character_name),
                    ("dialogue_text", &scene.dialogue_text),
                    ("dialogue_en", &scene.dialogue_en),
                    ("emotion_tag", &scene.emotion_tag),
                    ("scene_prompt", &scene.scene_prompt),
                ];
                for (name, value) in fields {
                    if value.trim().is_empty() {
                        report.add_error(format!("scene {} has an empty {}", idx + 1, name));
                    }
                }

                let words = word_count(&scene.dialogue_text);
                if words > self.rules.max_dialogue_words {
                    report.add_error(format!(
                        "scene {} dialogue has {} words, limit is {}",
                        idx + 1,
                        words,
                        self.rules.max_dialogue_words
                    ));
                }

                let tag = scene.emotion_tag.trim();
                if !tag.is_empty() && !tag.chars().all(|c| c.is_ascii_alphabetic()) {
                    report.add_error(format!(
                        "scene {} emotion_tag must be a single word, got '{}'",
                        idx + 1,
                        tag
                    ));
                }

                Scene {
                    emotion_tag: tag.to_ascii_uppercase(),
                    ..scene.clone()
                }
            })
            .collect()
    }
}

fn check_reconstruction(
    reconstruction: &SentenceReconstruction,
    lang_script: &str,
    report: &mut Report,
) {
    if reconstruction.chunks.is_empty() {
        report.add_error("sentence reconstruction has no chunks");
        return;
    }
    if reconstruction.chunks.iter().any(|c| c.is_empty()) {
        report.add_error("sentence reconstruction has an empty chunk");
    }
    let joined: String = reconstruction.chunks.concat();
    if joined != lang_script {
        report.add_error(format!(
            "reconstruction chunks join to '{}', expected '{}'",
            joined, lang_script
        ));
    }
}

/// Merges quiz options and orders them by a permutation seeded from the job id.
fn shuffle_options(job_id: &JobId, quiz: &ComprehensionQuiz) -> ComprehensionQuiz {
    let mut options = Vec::with_capacity(quiz.incorrect_options.len() + 1);
    options.push(quiz.correct_option.clone());
    options.extend(quiz.incorrect_options.iter().cloned());

    let order = seeded_permutation(job_id.as_uuid().as_bytes(), options.len());
    let answer_index = order.iter().position(|&i| i == 0).unwrap_or(0);
    let options = order.into_iter().map(|i| options[i].clone()).collect();

    ComprehensionQuiz {
        options: Some(options),
        answer_index: Some(answer_index),
        ..quiz.clone()
    }
}

/// Fisher-Yates permutation of `0..n` driven by a SHA-256 stream over `seed`.
pub fn seeded_permutation(seed: &[u8], n: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    let mut block: u32 = 0;
    let mut pool: Vec<u8> = Vec::new();

    for i in (1..n).rev() {
        if pool.len() < 8 {
            let mut hasher = Sha256::new();
            hasher.update(seed);
            hasher.update(block.to_be_bytes());
            pool.extend_from_slice(&hasher.finalize());
            block += 1;
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&pool[..8]);
        pool.drain(..8);
        let j = (u64::from_be_bytes(bytes) % (i as u64 + 1)) as usize;
        order.swap(i, j);
    }
    order
}
