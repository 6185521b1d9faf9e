//! Candidate generation backed by an LLM provider.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::GenerationService;
use crate::error::ServiceError;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::pipeline::candidate::{ActivityEntry, Candidate, Scene, ValidationResult};
use crate::pipeline::job::PrimaryInput;
use crate::utils::json_extraction::{try_extract_json_from_response, JsonExtractionResult};

/// System prompt for learning activity generation.
const ACTIVITY_SYSTEM_PROMPT: &str = r#"You are an expert AI tutor generating language learning content for BEGINNER LEVEL students.
Your output MUST be a valid JSON object strictly following the required schema.
Tips MUST be structural, simple, and beginner-friendly, written in Korean.
Tips must NEVER reveal, hint, or reference the sentence's meaning or its Korean translation.
Pronunciation MUST always be the Korean reading of the target-language text, never the Korean translation."#;

/// System prompt for scene script generation.
const SCENE_SYSTEM_PROMPT: &str = r#"You are an expert scriptwriter for short educational videos in a Korean language learning app.
The output MUST be a single JSON object with a key 'scripts' containing an array.
All dialogue must be in the requested output language. Respond ONLY with the JSON."#;

/// Generates candidates by prompting an LLM and parsing its JSON reply.
pub struct LlmGenerationService {
    llm: Arc<dyn LlmProvider>,
    model: String,
    temperature: f64,
    max_tokens: u32,
    incorrect_options: usize,
    recommended_responses: usize,
    max_dialogue_words: usize,
}

impl LlmGenerationService {
    /// Creates a service using the provider's default model.
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            model: String::new(),
            temperature: 0.7,
            max_tokens: 4096,
            incorrect_options: 3,
            recommended_responses: 2,
            max_dialogue_words: 15,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the item counts requested in the activity prompt.
    pub fn with_activity_counts(mut self, incorrect_options: usize, responses: usize) -> Self {
        self.incorrect_options = incorrect_options;
        self.recommended_responses = responses;
        self
    }

    pub fn with_max_dialogue_words(mut self, words: usize) -> Self {
        self.max_dialogue_words = words;
        self
    }

    /// Builds the user prompt for `input`, appending `feedback` on retries.
    pub fn build_prompt(&self, input: &PrimaryInput, feedback: Option<&ValidationResult>) -> String {
        let mut prompt = match input {
            PrimaryInput::Script {
                lang_script,
                ko_script,
                language,
            } => self.activity_prompt(lang_script, ko_script, language),
            PrimaryInput::VideoRequest {
                media_type,
                language,
                count,
                ..
            } => self.scene_prompt(
                media_type,
                language,
                *count,
                &input.topic().unwrap_or_default(),
            ),
        };

        if let Some(feedback) = feedback {
            prompt.push_str(&format!(
                "\n\nYour previous answer was rejected by quality review ({}): {}\n\
                 Fix exactly this problem and keep everything else within the rules.",
                feedback.reason_code, feedback.detail
            ));
        }

        prompt
    }

    fn activity_prompt(&self, lang_script: &str, ko_script: &str, language: &str) -> String {
        format!(
            "Generate a JSON object containing the 'learning_activities' list.\n\
             - Original script ({language}): \"{lang_script}\"\n\
             - Correct Korean translation: \"{ko_script}\"\n\n\
             ## Activity rules\n\n\
             ### 1) COMPREHENSION_QUIZ (activity_id: 1)\n\
             - correct_option MUST exactly match the Korean translation.\n\
             - Provide exactly {incorrect} incorrect_options.\n\
             - DO NOT generate 'options' or 'answer_index'.\n\
             - The tip describes sentence structure only (particles, endings, word order) \
             and must not contain the translation.\n\n\
             ### 2) SENTENCE_RECONSTRUCTION (activity_id: 2)\n\
             - Split \"{lang_script}\" into meaningful chunks. Joined in order, the chunks \
             MUST reproduce the sentence exactly.\n\
             - target_sentence is \"{lang_script}\".\n\n\
             ### 3) RECOMMENDED_RESPONSES (activity_id: 4)\n\
             - Provide exactly {responses} responses, each with recommended_answer, \
             pronunciation (Korean reading with spacing) and korean_translation.\n\
             - pronunciation MUST only use Hangul and . , ! ? punctuation.\n\n\
             ## Output JSON\n\
             {{\"learning_activities\": [\n\
               {{\"activity_id\": 1, \"activity_type\": \"COMPREHENSION_QUIZ\", \"question\": \"...\", \
             \"correct_option\": \"...\", \"incorrect_options\": [\"...\"], \"tip\": \"...\"}},\n\
               {{\"activity_id\": 2, \"activity_type\": \"SENTENCE_RECONSTRUCTION\", \"chunks\": [\"...\"], \
             \"target_sentence\": \"...\", \"tip\": \"...\"}},\n\
               {{\"activity_id\": 4, \"activity_type\": \"RECOMMENDED_RESPONSES\", \"recommended_responses\": [\
             {{\"recommended_answer\": \"...\", \"pronunciation\": \"...\", \"korean_translation\": \"...\"}}]}}\n\
             ]}}\n\n\
             The response MUST ONLY contain the JSON object, no explanations.",
            incorrect = self.incorrect_options,
            responses = self.recommended_responses,
        )
    }

    fn scene_prompt(&self, media_type: &str, language: &str, count: u32, topic: &str) -> String {
        format!(
            "Generate {count} unique quotes and detailed scene descriptions from globally famous, \
             Korean-recognized {media_type}.\n\
             Theme/Topic: {topic} / Output language: {language}.\n\n\
             Constraints:\n\
             1. Select titles with high viewership and cross-generational appeal in Korea.\n\
             2. Every 'scene_prompt' MUST be vivid, specific and suitable for cinematic video \
             generation, focused on a character close-up or medium shot.\n\
             3. Dialogue must be short and impactful (max {words} words).\n\n\
             Required fields for every item:\n\
             'source_title', 'source_title_kr', 'character_name', 'dialogue_text' (in {language}), \
             'dialogue_en', 'emotion_tag' (single word: ANGER, JOY, SADNESS, CONFUSION, ...), \
             'scene_prompt'.\n\
             Output format: a single JSON object {{\"scripts\": [...]}} with exactly {count} items.",
            words = self.max_dialogue_words,
        )
    }

    /// Parses a model reply into a candidate of the kind `input` asks for.
    pub fn parse_candidate(input: &PrimaryInput, content: &str) -> Result<Candidate, ServiceError> {
        let json = match try_extract_json_from_response(content) {
            JsonExtractionResult::Success(json) => json,
            JsonExtractionResult::Truncated { unclosed, .. } => {
                warn!(unclosed = unclosed, "Generation reply was truncated");
                return Err(ServiceError::MalformedResponse(format!(
                    "JSON truncated with {} unclosed delimiters",
                    unclosed
                )));
            }
            JsonExtractionResult::NotFound => {
                return Err(ServiceError::MalformedResponse(
                    "no JSON found in generation reply".to_string(),
                ))
            }
        };

        let value: Value = serde_json::from_str(&json)
            .map_err(|e| ServiceError::MalformedResponse(format!("invalid JSON: {}", e)))?;

        match input {
            PrimaryInput::Script { .. } => {
                let items = list_under(value, "learning_activities")?;
                let entries = items
                    .into_iter()
                    .map(serde_json::from_value::<ActivityEntry>)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| ServiceError::MalformedResponse(e.to_string()))?;
                Ok(Candidate::Activities(entries))
            }
            PrimaryInput::VideoRequest { .. } => {
                let items = list_under(value, "scripts")?;
                let scenes = items
                    .into_iter()
                    .map(serde_json::from_value::<Scene>)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| ServiceError::MalformedResponse(e.to_string()))?;
                Ok(Candidate::Scenes(scenes))
            }
        }
    }
}

/// Accepts either `{"<key>": [...]}` or a bare array.
fn list_under(value: Value, key: &str) -> Result<Vec<Value>, ServiceError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(ServiceError::MalformedResponse(format!(
                "expected an array under '{}'",
                key
            ))),
        },
        _ => Err(ServiceError::MalformedResponse(format!(
            "expected an object with '{}'",
            key
        ))),
    }
}

#[async_trait]
impl GenerationService for LlmGenerationService {
    async fn generate(
        &self,
        input: &PrimaryInput,
        feedback: Option<&ValidationResult>,
    ) -> Result<Candidate, ServiceError> {
        let system = match input {
            PrimaryInput::Script { .. } => ACTIVITY_SYSTEM_PROMPT,
            PrimaryInput::VideoRequest { .. } => SCENE_SYSTEM_PROMPT,
        };
        let request = GenerationRequest::new(
            self.model.as_str(),
            vec![
                Message::system(system),
                Message::user(self.build_prompt(input, feedback)),
            ],
        )
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens);

        let response = self.llm.generate(request).await?;
        let content = response
            .first_content()
            .ok_or_else(|| ServiceError::EmptyResponse("generation reply".to_string()))?;
        debug!(chars = content.len(), "Generation reply received");

        Self::parse_candidate(input, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{Choice, GenerationResponse, Usage};
    use crate::pipeline::candidate::{LearningActivity, ReasonCode};
    use std::sync::Mutex;

    struct MockLlmProvider {
        response: String,
        prompts: Mutex<Vec<String>>,
    }

    impl MockLlmProvider {
        fn new(response: impl Into<String>) -> Self {
            Self {
                response: response.into(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            if let Some(last) = request.messages.last() {
                self.prompts.lock().unwrap().push(last.content.clone());
            }
            Ok(GenerationResponse {
                id: "mock-id".to_string(),
                model: "mock-model".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(self.response.clone()),
                    finish_reason: Some("stop".to_string()),
                }],
                usage: Usage::default(),
            })
        }
    }

    fn script() -> PrimaryInput {
        PrimaryInput::Script {
            lang_script: "はい".to_string(),
            ko_script: "네".to_string(),
            language: "jp".to_string(),
        }
    }

    #[tokio::test]
    async fn test_activities_parsed_from_fenced_reply() {
        let reply = r#"Here you go:
```json
{"learning_activities": [
  {"activity_id": 1, "activity_type": "COMPREHENSION_QUIZ", "question": "q",
   "correct_option": "네", "incorrect_options": ["a", "b", "c"], "tip": "t"},
  {"activity_id": 9, "activity_type": "BONUS_ROUND", "anything": true}
]}
```"#;
        let service = LlmGenerationService::new(Arc::new(MockLlmProvider::new(reply)));
        let candidate = service.generate(&script(), None).await.unwrap();

        let Candidate::Activities(entries) = candidate else {
            panic!("expected activities");
        };
        assert_eq!(entries.len(), 2);
        assert!(matches!(
            entries[0],
            ActivityEntry::Known(LearningActivity::ComprehensionQuiz(_))
        ));
        assert_eq!(entries[1].activity_type(), Some("BONUS_ROUND"));
    }

    #[test]
    fn test_scenes_accept_bare_array_and_missing_fields() {
        let input = PrimaryInput::VideoRequest {
            media_type: "anime".to_string(),
            language: "jp".to_string(),
            count: 1,
            topic: None,
            user_id: None,
        };
        let candidate = LlmGenerationService::parse_candidate(
            &input,
            r#"[{"source_title": "A", "dialogue_text": "行くぞ"}]"#,
        )
        .unwrap();
        let Candidate::Scenes(scenes) = candidate else {
            panic!("expected scenes");
        };
        assert_eq!(scenes[0].dialogue_text, "行くぞ");
        assert!(scenes[0].scene_prompt.is_empty());
    }

    #[test]
    fn test_reply_without_json_is_malformed() {
        let err = LlmGenerationService::parse_candidate(&script(), "I cannot help with that.")
            .unwrap_err();
        assert!(matches!(err, ServiceError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_feedback_is_appended_on_retry() {
        let llm = Arc::new(MockLlmProvider::new(r#"{"learning_activities": []}"#));
        let service = LlmGenerationService::new(llm.clone());
        let feedback = ValidationResult::fail(ReasonCode::TipLeak, "tip repeats the answer");

        service.generate(&script(), Some(&feedback)).await.unwrap();
        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].contains("tip repeats the answer"));
        assert!(prompts[0].contains("(TIP_LEAK)"));
    }
}
