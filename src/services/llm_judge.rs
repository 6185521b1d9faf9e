//! Semantic review backed by an LLM provider.
//!
//! The judge answers with a single line: `PASS`, or
//! `FAILED:<TIP|RESPONSES|TRANSLATION|PRONUNCIATION>:<reason>`. Anything else
//! is treated as a malformed collaborator response, never as a pass.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::JudgeService;
use crate::error::ServiceError;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::pipeline::candidate::{Candidate, LearningActivity, ReasonCode, ValidationResult};
use crate::pipeline::job::PrimaryInput;

static VERDICT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^FAILED\s*:\s*(TIP|RESPONSES|TRANSLATION|PRONUNCIATION)\s*:\s*(.+)$")
        .expect("valid regex")
});

const JUDGE_SYSTEM_PROMPT: &str = r#"You are an expert quality assurance specialist for language learning content.
Check the provided content against the rules and follow the output format strictly."#;

/// Parses a judge reply.
///
/// # Errors
///
/// Returns `ServiceError::MalformedResponse` for anything that is neither
/// `PASS` nor a well-formed `FAILED` line.
pub fn parse_verdict(reply: &str) -> Result<ValidationResult, ServiceError> {
    let reply = reply.trim();
    if reply == "PASS" {
        return Ok(ValidationResult::pass());
    }

    let caps = VERDICT.captures(reply).ok_or_else(|| {
        ServiceError::MalformedResponse(format!(
            "expected PASS or FAILED:<TYPE>:<REASON>, got '{}'",
            reply.chars().take(80).collect::<String>()
        ))
    })?;

    let code = match &caps[1] {
        "TIP" => ReasonCode::TipLeak,
        "TRANSLATION" => ReasonCode::TranslationMismatch,
        _ => ReasonCode::PronunciationContamination,
    };
    Ok(ValidationResult::fail(code, caps[2].trim()))
}

/// Reviews candidates by asking an LLM judge.
pub struct LlmJudgeService {
    llm: Arc<dyn LlmProvider>,
    model: String,
}

impl LlmJudgeService {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            model: String::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Builds the review prompt for a candidate.
    pub fn build_prompt(input: &PrimaryInput, candidate: &Candidate) -> String {
        let mut prompt = String::from("Perform a quality check of the following content.\n");

        match candidate {
            Candidate::Activities(_) => {
                if let Some(script) = input.source_text() {
                    prompt.push_str(&format!("The script being taught is: \"{}\"\n\n", script));
                }
                if let Some(quiz) = candidate.find_activity(|a| match a {
                    LearningActivity::ComprehensionQuiz(q) => Some(q),
                    _ => None,
                }) {
                    prompt.push_str(&format!(
                        "# Comprehension quiz tip\n- Correct answer: \"{}\"\n- Tip: \"{}\"\n\n",
                        quiz.correct_option, quiz.tip
                    ));
                }
                if let Some(responses) = candidate.find_activity(|a| match a {
                    LearningActivity::RecommendedResponses(r) => Some(r),
                    _ => None,
                }) {
                    prompt.push_str("# Recommended responses\n");
                    for r in &responses.recommended_responses {
                        prompt.push_str(&format!(
                            "- answer: \"{}\" | pronunciation: \"{}\" | translation: \"{}\"\n",
                            r.recommended_answer, r.pronunciation, r.korean_translation
                        ));
                    }
                    prompt.push('\n');
                }
                prompt.push_str(
                    "Rules:\n\
                     A. The tip passes unless it literally contains the full correct answer. (TIP)\n\
                     B. Pronunciation is only the Korean phonetic reading of the answer and contains \
                     no Korean meaning words. (PRONUNCIATION or RESPONSES)\n\
                     C. korean_translation is an accurate, natural meaning of the answer. (TRANSLATION)\n\n",
                );
            }
            Candidate::Scenes(scenes) => {
                prompt.push_str("# Scenes\n");
                for (i, s) in scenes.iter().enumerate() {
                    prompt.push_str(&format!(
                        "{}. [{}] {}: \"{}\" / \"{}\"\n",
                        i + 1,
                        s.source_title,
                        s.character_name,
                        s.dialogue_text,
                        s.dialogue_en
                    ));
                }
                prompt.push_str(
                    "\nRules:\n\
                     A. dialogue_en is an accurate English translation of dialogue_text. (TRANSLATION)\n\n",
                );
            }
        }

        prompt.push_str(
            "If ALL rules are satisfied, output: PASS\n\
             If ANY rule is violated, output: FAILED:<TYPE>:<REASON>\n\
             where TYPE is TIP, RESPONSES, TRANSLATION or PRONUNCIATION.\n\
             The response MUST ONLY contain that single line.",
        );
        prompt
    }
}

#[async_trait]
impl JudgeService for LlmJudgeService {
    async fn judge(
        &self,
        input: &PrimaryInput,
        candidate: &Candidate,
    ) -> Result<ValidationResult, ServiceError> {
        let request = GenerationRequest::new(
            self.model.as_str(),
            vec![
                Message::system(JUDGE_SYSTEM_PROMPT),
                Message::user(Self::build_prompt(input, candidate)),
            ],
        )
        .with_temperature(0.0)
        .with_max_tokens(512);

        let response = self.llm.generate(request).await?;
        let content = response
            .first_content()
            .ok_or_else(|| ServiceError::EmptyResponse("judge reply".to_string()))?;
        debug!(reply = %content.trim(), "Judge replied");

        parse_verdict(content)
    }
}
