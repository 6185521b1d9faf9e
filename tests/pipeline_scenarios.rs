//! End-to-end workflow tests against in-memory collaborators.
//!
//! Every collaborator is a hand-written mock that counts its calls, so the
//! tests can assert how often Generate, the judge and each branch ran.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use content_forge::error::{ServiceError, StoreError};
use content_forge::pipeline::candidate::{
    ComprehensionQuiz, RecommendedResponse, RecommendedResponses, SentenceReconstruction,
};
use content_forge::pipeline::{
    ActivityEntry, BranchKey, Candidate, ErrorClassification, FinalArtifact, Job, JobId,
    JobStatus, LearningActivity, Orchestrator, PipelineConfig, PrimaryInput, ReasonCode, Scene,
    ValidationResult,
};
use content_forge::scheduler::{job_channel, Dispatcher, WorkerPool, WorkerPoolConfig};
use content_forge::services::{
    GenerationService, JudgeService, SynthesisRequest, SynthesisService, SynthesizedAsset,
};
use content_forge::storage::{JobStore, MemoryJobStore};

const LANG: &str = "今日は暑いですね";
const KO: &str = "오늘은 덥네요";

// ============================================================================
// Mock collaborators
// ============================================================================

/// Returns the same candidate on every call.
struct ScriptedGeneration {
    candidate: Candidate,
    calls: AtomicUsize,
    feedback_seen: Mutex<Vec<Option<ReasonCode>>>,
}

impl ScriptedGeneration {
    fn new(candidate: Candidate) -> Self {
        Self {
            candidate,
            calls: AtomicUsize::new(0),
            feedback_seen: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationService for ScriptedGeneration {
    async fn generate(
        &self,
        _input: &PrimaryInput,
        feedback: Option<&ValidationResult>,
    ) -> Result<Candidate, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.feedback_seen
            .lock()
            .unwrap()
            .push(feedback.map(|f| f.reason_code));
        Ok(self.candidate.clone())
    }
}

/// Answers with the scripted verdicts in order, then passes.
struct ScriptedJudge {
    verdicts: Mutex<Vec<ValidationResult>>,
    calls: AtomicUsize,
}

impl ScriptedJudge {
    fn passing() -> Self {
        Self::with_verdicts(Vec::new())
    }

    fn with_verdicts(verdicts: Vec<ValidationResult>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JudgeService for ScriptedJudge {
    async fn judge(
        &self,
        _input: &PrimaryInput,
        _candidate: &Candidate,
    ) -> Result<ValidationResult, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut verdicts = self.verdicts.lock().unwrap();
        if verdicts.is_empty() {
            Ok(ValidationResult::pass())
        } else {
            Ok(verdicts.remove(0))
        }
    }
}

/// Stores every asset under its target key, except for one failing branch.
struct MockSynthesis {
    failing_branch: Option<BranchKey>,
    calls: AtomicUsize,
}

impl MockSynthesis {
    fn new() -> Self {
        Self {
            failing_branch: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing(branch: BranchKey) -> Self {
        Self {
            failing_branch: Some(branch),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SynthesisService for MockSynthesis {
    async fn synthesize(
        &self,
        request: &SynthesisRequest,
    ) -> Result<SynthesizedAsset, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_branch == Some(request.branch_key) {
            return Err(ServiceError::RequestFailed(
                "synthesis backend returned 503".to_string(),
            ));
        }
        Ok(SynthesizedAsset {
            key: request.target_key.clone(),
        })
    }
}

/// Wraps the memory store and fails chosen reads and conditional writes.
struct FlakyStore {
    inner: MemoryJobStore,
    healthy_writes: usize,
    broken_write: Option<usize>,
    broken_reads: usize,
    writes: AtomicUsize,
    reads: AtomicUsize,
}

impl FlakyStore {
    /// Every conditional write fails after `healthy_writes`.
    fn new(healthy_writes: usize) -> Self {
        Self {
            inner: MemoryJobStore::new(),
            healthy_writes,
            broken_write: None,
            broken_reads: 0,
            writes: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        }
    }

    /// Only the conditional write at `index` fails.
    fn failing_write_at(index: usize) -> Self {
        Self {
            healthy_writes: usize::MAX,
            broken_write: Some(index),
            ..Self::new(0)
        }
    }

    /// The first `count` reads fail.
    fn failing_first_reads(count: usize) -> Self {
        Self {
            healthy_writes: usize::MAX,
            broken_reads: count,
            ..Self::new(0)
        }
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn put_job(&self, job: &Job) -> Result<(), StoreError> {
        self.inner.put_job(job).await
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>, StoreError> {
        if self.reads.fetch_add(1, Ordering::SeqCst) < self.broken_reads {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.get_job(job_id).await
    }

    async fn put_job_if_revision(
        &self,
        job: &Job,
        expected_revision: u64,
    ) -> Result<Job, StoreError> {
        let index = self.writes.fetch_add(1, Ordering::SeqCst);
        if index >= self.healthy_writes || self.broken_write == Some(index) {
            return Err(StoreError::Unavailable("disk full".to_string()));
        }
        self.inner.put_job_if_revision(job, expected_revision).await
    }

    async fn list_active(&self) -> Result<Vec<Job>, StoreError> {
        self.inner.list_active().await
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn script_input() -> PrimaryInput {
    PrimaryInput::Script {
        lang_script: LANG.to_string(),
        ko_script: KO.to_string(),
        language: "jp".to_string(),
    }
}

fn video_input(count: u32) -> PrimaryInput {
    PrimaryInput::VideoRequest {
        media_type: "anime".to_string(),
        language: "jp".to_string(),
        count,
        topic: None,
        user_id: None,
    }
}

fn quiz(incorrect: [&str; 3]) -> ComprehensionQuiz {
    ComprehensionQuiz {
        activity_id: 1,
        question: "What is the weather like?".to_string(),
        correct_option: "It is hot".to_string(),
        incorrect_options: incorrect.iter().map(|s| s.to_string()).collect(),
        tip: "Listen for the adjective".to_string(),
        options: None,
        answer_index: None,
    }
}

fn activities(quiz: ComprehensionQuiz) -> Candidate {
    Candidate::Activities(vec![
        ActivityEntry::Known(LearningActivity::ComprehensionQuiz(quiz)),
        ActivityEntry::Known(LearningActivity::SentenceReconstruction(
            SentenceReconstruction {
                activity_id: 2,
                chunks: vec!["今日は".to_string(), "暑い".to_string(), "ですね".to_string()],
                target_sentence: LANG.to_string(),
                tip: String::new(),
            },
        )),
        ActivityEntry::Known(LearningActivity::RecommendedResponses(
            RecommendedResponses {
                activity_id: 4,
                recommended_responses: vec![
                    RecommendedResponse {
                        recommended_answer: "本当に暑いですね".to_string(),
                        pronunciation: "혼토니 아츠이데스네".to_string(),
                        korean_translation: "정말 덥네요".to_string(),
                        audio_key: None,
                    },
                    RecommendedResponse {
                        recommended_answer: "そうですね".to_string(),
                        pronunciation: "소우데스네".to_string(),
                        korean_translation: "그러네요".to_string(),
                        audio_key: None,
                    },
                ],
            },
        )),
    ])
}

fn valid_activities() -> Candidate {
    activities(quiz(["It is cold", "It is raining", "It is snowing"]))
}

fn scenes(count: usize) -> Candidate {
    Candidate::Scenes(
        (0..count)
            .map(|i| Scene {
                source_title: "Spirited Away".to_string(),
                source_title_kr: "센과 치히로의 행방불명".to_string(),
                character_name: format!("Character {}", i + 1),
                dialogue_text: "Don't look back".to_string(),
                dialogue_en: "Don't look back".to_string(),
                emotion_tag: "calm".to_string(),
                scene_prompt: "A girl on a bridge at dusk".to_string(),
            })
            .collect(),
    )
}

struct Harness {
    store: Arc<MemoryJobStore>,
    generation: Arc<ScriptedGeneration>,
    judge: Arc<ScriptedJudge>,
    synthesis: Arc<MockSynthesis>,
    orchestrator: Orchestrator,
}

fn harness(
    config: PipelineConfig,
    candidate: Candidate,
    judge: ScriptedJudge,
    synthesis: MockSynthesis,
) -> Harness {
    let store = Arc::new(MemoryJobStore::new());
    let generation = Arc::new(ScriptedGeneration::new(candidate));
    let judge = Arc::new(judge);
    let synthesis = Arc::new(synthesis);
    let orchestrator = Orchestrator::new(
        config,
        store.clone(),
        generation.clone(),
        judge.clone(),
        synthesis.clone(),
    )
    .expect("valid config");

    Harness {
        store,
        generation,
        judge,
        synthesis,
        orchestrator,
    }
}

fn tip_leak() -> ValidationResult {
    ValidationResult::fail(ReasonCode::TipLeak, "tip reveals the answer")
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_structural_error_fails_without_retry() {
    let h = harness(
        PipelineConfig::default(),
        activities(quiz(["It is hot", "It is hot", "It is hot"])),
        ScriptedJudge::passing(),
        MockSynthesis::new(),
    );

    let job = h.orchestrator.submit(script_input()).await.unwrap();
    let done = h.orchestrator.run_to_completion(job).await.unwrap();

    assert_eq!(done.status, JobStatus::Failed);
    let record = done.error_record.as_ref().unwrap();
    assert_eq!(record.classification, ErrorClassification::StructuralError);
    assert_eq!(record.failed_stage, "validateStructure");
    assert_eq!(done.iteration_count, 0);
    assert_eq!(h.generation.calls(), 1);
    assert_eq!(h.judge.calls(), 0);
    assert_eq!(h.synthesis.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_semantic_failures_exhaust_iteration_bound() {
    let h = harness(
        PipelineConfig::default().with_max_iterations(2),
        valid_activities(),
        ScriptedJudge::with_verdicts(vec![tip_leak(), tip_leak(), tip_leak()]),
        MockSynthesis::new(),
    );

    let job = h.orchestrator.submit(script_input()).await.unwrap();
    let done = h.orchestrator.run_to_completion(job).await.unwrap();

    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.iteration_count, 2);
    let record = done.error_record.as_ref().unwrap();
    assert_eq!(record.classification, ErrorClassification::ExhaustedRetries);
    assert_eq!(record.failed_stage, "validateSemantics");
    assert!(record.detail.contains("TIP_LEAK"));

    // Two Generate calls, never a third.
    assert_eq!(h.generation.calls(), 2);
    assert_eq!(h.judge.calls(), 2);
    assert_eq!(
        *h.generation.feedback_seen.lock().unwrap(),
        vec![None, Some(ReasonCode::TipLeak)]
    );
    assert_eq!(h.orchestrator.stats().retries, 1);
}

#[tokio::test]
async fn test_failing_branch_blocks_compose() {
    let h = harness(
        PipelineConfig::default().with_branch_count(2),
        valid_activities(),
        ScriptedJudge::passing(),
        MockSynthesis::failing(BranchKey::ResponseNarration),
    );

    let job = h.orchestrator.submit(script_input()).await.unwrap();
    let done = h.orchestrator.run_to_completion(job).await.unwrap();

    assert_eq!(done.status, JobStatus::Failed);
    let record = done.error_record.as_ref().unwrap();
    assert_eq!(
        record.classification,
        ErrorClassification::ExternalServiceError
    );
    assert_eq!(record.failed_stage, "postProcess:branch2");
    assert!(done.final_artifact().is_none());
}

#[tokio::test]
async fn test_first_pass_job_becomes_ready() {
    let h = harness(
        PipelineConfig::default(),
        valid_activities(),
        ScriptedJudge::passing(),
        MockSynthesis::new(),
    );

    let job = h.orchestrator.submit(script_input()).await.unwrap();
    let done = h.orchestrator.run_to_completion(job).await.unwrap();

    assert_eq!(done.status, JobStatus::Ready);
    assert_eq!(done.iteration_count, 0);
    assert!(done.error_record.is_none());
    assert_eq!(h.generation.calls(), 1);

    let validated = done.staging_artifacts.validated.as_ref().unwrap();
    let Candidate::Activities(validated) = validated else {
        panic!("expected activities");
    };
    let Some(FinalArtifact::ActivityPackage { activities, assets }) = done.final_artifact()
    else {
        panic!("expected activity package");
    };
    assert_eq!(assets.len(), 2);
    assert!(assets.contains_key(&BranchKey::ScriptNarration));
    assert!(assets.contains_key(&BranchKey::ResponseNarration));
    // The validated activities plus the appended follow-the-script entry.
    assert_eq!(activities.len(), validated.len() + 1);
    assert_eq!(
        activities.last().and_then(|a| a.activity_type()),
        Some("FOLLOW_THE_SCRIPT")
    );

    assert_eq!(h.orchestrator.stats().ready, 1);
    assert_eq!(
        h.store.get_job(&done.job_id).await.unwrap().as_ref(),
        Some(&done)
    );
}

#[tokio::test]
async fn test_video_job_becomes_ready() {
    let h = harness(
        PipelineConfig::default(),
        scenes(3),
        ScriptedJudge::passing(),
        MockSynthesis::new(),
    );

    let job = h.orchestrator.submit(video_input(3)).await.unwrap();
    let done = h.orchestrator.run_to_completion(job).await.unwrap();

    assert_eq!(done.status, JobStatus::Ready);
    let Some(FinalArtifact::VideoPackage { scenes, assets }) = done.final_artifact() else {
        panic!("expected video package");
    };
    assert_eq!(scenes.len(), 3);
    assert!(scenes.iter().all(|s| s.emotion_tag == "CALM"));
    assert_eq!(assets.len(), 2);
    // One reference image plus one clip per scene.
    assert_eq!(h.synthesis.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_retry_then_pass_becomes_ready() {
    let h = harness(
        PipelineConfig::default().with_max_iterations(3),
        valid_activities(),
        ScriptedJudge::with_verdicts(vec![tip_leak()]),
        MockSynthesis::new(),
    );

    let job = h.orchestrator.submit(script_input()).await.unwrap();
    let done = h.orchestrator.run_to_completion(job).await.unwrap();

    assert_eq!(done.status, JobStatus::Ready);
    assert_eq!(done.iteration_count, 1);
    assert_eq!(h.generation.calls(), 2);
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn test_iteration_count_never_exceeds_bound() {
    for max in 1..=4u32 {
        let h = harness(
            PipelineConfig::default().with_max_iterations(max),
            valid_activities(),
            ScriptedJudge::with_verdicts(vec![tip_leak(); 10]),
            MockSynthesis::new(),
        );

        let mut job = h.orchestrator.submit(script_input()).await.unwrap();
        while !job.is_terminal() {
            job = h.orchestrator.advance(&job).await.unwrap();
            assert!(job.iteration_count <= max);
        }
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(h.generation.calls(), max as usize);
    }
}

#[tokio::test]
async fn test_terminal_jobs_are_left_alone() {
    let h = harness(
        PipelineConfig::default(),
        valid_activities(),
        ScriptedJudge::passing(),
        MockSynthesis::new(),
    );

    let job = h.orchestrator.submit(script_input()).await.unwrap();
    let ready = h.orchestrator.run_to_completion(job).await.unwrap();
    let before = serde_json::to_vec(&ready).unwrap();
    let synth_calls = h.synthesis.calls.load(Ordering::SeqCst);

    let again = h.orchestrator.advance(&ready).await.unwrap();
    assert_eq!(serde_json::to_vec(&again).unwrap(), before);
    assert_eq!(h.synthesis.calls.load(Ordering::SeqCst), synth_calls);

    let stored = h.store.get_job(&ready.job_id).await.unwrap().unwrap();
    assert_eq!(serde_json::to_vec(&stored).unwrap(), before);
}

#[tokio::test]
async fn test_each_committed_transition_bumps_revision() {
    let h = harness(
        PipelineConfig::default(),
        valid_activities(),
        ScriptedJudge::passing(),
        MockSynthesis::new(),
    );

    let mut job = h.orchestrator.submit(script_input()).await.unwrap();
    let mut seen = vec![job.status];
    while !job.is_terminal() {
        let next = h.orchestrator.advance(&job).await.unwrap();
        assert_eq!(next.revision, job.revision + 1);
        assert!(job.status.can_transition_to(next.status));
        seen.push(next.status);
        job = next;
    }
    assert_eq!(
        seen,
        vec![
            JobStatus::Pending,
            JobStatus::Generating,
            JobStatus::Validating,
            JobStatus::SemanticReview,
            JobStatus::PostProcessing,
            JobStatus::Composing,
            JobStatus::Ready,
        ]
    );
}

#[tokio::test]
async fn test_concurrent_advances_commit_once() {
    let h = harness(
        PipelineConfig::default(),
        valid_activities(),
        ScriptedJudge::passing(),
        MockSynthesis::new(),
    );

    let job = h.orchestrator.submit(script_input()).await.unwrap();
    let (a, b) = tokio::join!(
        h.orchestrator.advance_outcome(&job),
        h.orchestrator.advance_outcome(&job)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.is_moved() ^ b.is_moved());
    assert_eq!(a.job(), b.job());
    let stored = h.store.get_job(&job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Generating);
    assert_eq!(stored.revision, job.revision + 1);
    assert_eq!(h.orchestrator.stats().superseded, 1);
}

#[tokio::test]
async fn test_unrecordable_failure_escapes_advance() {
    let store = Arc::new(FlakyStore::new(0));
    let orchestrator = Orchestrator::new(
        PipelineConfig::default(),
        store.clone(),
        Arc::new(ScriptedGeneration::new(valid_activities())),
        Arc::new(ScriptedJudge::passing()),
        Arc::new(MockSynthesis::new()),
    )
    .unwrap();

    let job = orchestrator.submit(script_input()).await.unwrap();
    let err = orchestrator.advance(&job).await.unwrap_err();
    assert_eq!(err.job_id, job.job_id);
    assert!(matches!(err.source, StoreError::Unavailable(_)));

    // The stored job is untouched and can be resumed later.
    let stored = store.get_job(&job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
}

#[tokio::test]
async fn test_failed_commit_is_recorded_as_persistence_error() {
    // Write 0 starts generation, write 1 (the Generate commit) fails, and the
    // failure itself is recorded by write 2.
    let store = Arc::new(FlakyStore::failing_write_at(1));
    let orchestrator = Orchestrator::new(
        PipelineConfig::default(),
        store.clone(),
        Arc::new(ScriptedGeneration::new(valid_activities())),
        Arc::new(ScriptedJudge::passing()),
        Arc::new(MockSynthesis::new()),
    )
    .unwrap();

    let job = orchestrator.submit(script_input()).await.unwrap();
    let generating = orchestrator.advance(&job).await.unwrap();
    assert_eq!(generating.status, JobStatus::Generating);

    let failed = orchestrator.advance(&generating).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    let record = failed.error_record.clone().unwrap();
    assert_eq!(record.classification, ErrorClassification::PersistenceError);
    assert_eq!(record.failed_stage, "generate");

    let stored = store.get_job(&job.job_id).await.unwrap().unwrap();
    assert_eq!(stored, failed);
    assert_eq!(store.writes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_resume_after_restart_reruns_one_stage() {
    let h = harness(
        PipelineConfig::default(),
        valid_activities(),
        ScriptedJudge::passing(),
        MockSynthesis::new(),
    );

    let job = h.orchestrator.submit(script_input()).await.unwrap();
    let generating = h.orchestrator.advance(&job).await.unwrap();
    let validating = h.orchestrator.advance(&generating).await.unwrap();
    assert_eq!(validating.status, JobStatus::Validating);

    // A fresh orchestrator over the same store picks the job up where it stopped.
    let resumed = Orchestrator::new(
        PipelineConfig::default(),
        h.store.clone(),
        h.generation.clone(),
        h.judge.clone(),
        h.synthesis.clone(),
    )
    .unwrap();
    let stored = h.store.get_job(&job.job_id).await.unwrap().unwrap();
    let done = resumed.run_to_completion(stored).await.unwrap();

    assert_eq!(done.status, JobStatus::Ready);
    assert_eq!(h.generation.calls(), 1);
}

// ============================================================================
// Worker pool
// ============================================================================

#[tokio::test]
async fn test_worker_pool_drains_jobs_to_terminal() {
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = Arc::new(
        Orchestrator::new(
            PipelineConfig::default(),
            store.clone(),
            Arc::new(ScriptedGeneration::new(valid_activities())),
            Arc::new(ScriptedJudge::passing()),
            Arc::new(MockSynthesis::new()),
        )
        .unwrap(),
    );

    let (tx, rx) = job_channel();
    let dispatcher = Dispatcher::new(store.clone(), tx.clone());
    let mut pool = WorkerPool::new(
        WorkerPoolConfig::new(3).with_shutdown_timeout(Duration::from_secs(5)),
        orchestrator.clone(),
        rx,
        tx,
    );
    pool.start().unwrap();

    let mut ids = HashSet::new();
    for _ in 0..5 {
        let job = orchestrator.submit(script_input()).await.unwrap();
        assert!(dispatcher.trigger(&job).unwrap());
        ids.insert(job.job_id);
    }

    let drained = tokio::time::timeout(Duration::from_secs(10), async {
        while pool.stats().total_finished() < 5 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "jobs did not finish: {:?}", pool.stats());

    pool.shutdown().await.unwrap();
    assert!(!pool.is_running());

    let stats = pool.stats();
    assert_eq!(stats.jobs_ready, 5);
    assert_eq!(stats.jobs_failed, 0);
    assert!(store.list_active().await.unwrap().is_empty());
    for id in ids {
        let job = store.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Ready);
    }
}

#[tokio::test]
async fn test_worker_pool_retries_unreadable_job() {
    let store = Arc::new(FlakyStore::failing_first_reads(1));
    let orchestrator = Arc::new(
        Orchestrator::new(
            PipelineConfig::default(),
            store.clone(),
            Arc::new(ScriptedGeneration::new(valid_activities())),
            Arc::new(ScriptedJudge::passing()),
            Arc::new(MockSynthesis::new()),
        )
        .unwrap(),
    );

    let (tx, rx) = job_channel();
    let dispatcher = Dispatcher::new(store.clone(), tx.clone());
    let mut pool = WorkerPool::new(WorkerPoolConfig::new(2), orchestrator.clone(), rx, tx);
    pool.start().unwrap();

    let job = orchestrator.submit(script_input()).await.unwrap();
    assert!(dispatcher.trigger(&job).unwrap());

    let drained = tokio::time::timeout(Duration::from_secs(10), async {
        while pool.stats().total_finished() < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "job was dropped: {:?}", pool.stats());
    pool.shutdown().await.unwrap();

    let stats = pool.stats();
    assert_eq!(stats.load_retries, 1);
    assert_eq!(stats.jobs_ready, 1);
    let stored = store.get_job(&job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Ready);
}

#[tokio::test]
async fn test_recover_resumes_interrupted_jobs() {
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = Arc::new(
        Orchestrator::new(
            PipelineConfig::default(),
            store.clone(),
            Arc::new(ScriptedGeneration::new(valid_activities())),
            Arc::new(ScriptedJudge::passing()),
            Arc::new(MockSynthesis::new()),
        )
        .unwrap(),
    );

    // Two jobs left mid-flight by a previous process.
    let first = orchestrator.submit(script_input()).await.unwrap();
    orchestrator.advance(&first).await.unwrap();
    let second = orchestrator.submit(script_input()).await.unwrap();

    let (tx, rx) = job_channel();
    let dispatcher = Dispatcher::new(store.clone(), tx.clone());
    let mut pool = WorkerPool::new(WorkerPoolConfig::new(2), orchestrator, rx, tx);
    pool.start().unwrap();
    assert_eq!(dispatcher.recover().await.unwrap(), 2);

    let drained = tokio::time::timeout(Duration::from_secs(10), async {
        while pool.stats().total_finished() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(drained.is_ok());
    pool.shutdown().await.unwrap();

    for id in [first.job_id, second.job_id] {
        let job = store.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Ready);
    }
}
