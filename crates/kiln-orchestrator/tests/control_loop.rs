//! Control loop scenarios against scripted in-process ports

use async_trait::async_trait;
use kiln_agent::CodeSynthesizer;
use kiln_core::ports::{Environment, EnvironmentFactory, LanguageModel};
use kiln_core::{ChatMessage, CodeUnit, KilnError, Observation, ResetOptions, Result, Skill};
use kiln_critic::Critic;
use kiln_curriculum::Curriculum;
use kiln_orchestrator::{
    AgentLoop, AgentSupervisor, LoopComponents, LoopConfig, LoopExit, ProgressEvent, TaskOutcome,
};
use kiln_skills::{ExistingIndex, SkillDescriber, SkillRepository, TermIndex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::Receiver;
use tokio_util::sync::CancellationToken;

const MINE_LOG: &str = "Explain: none\nPlan: dig\nCode:\n```javascript\nasync function mineLog(bot) {\n  await mineBlock(bot, \"oak_log\", 1);\n}\n```";
const NO_CODE: &str = "I am not sure how to do that.";
const PASS: &str = r#"{"reasoning": "Has a log", "success": true, "critique": ""}"#;
const FAIL: &str = r#"{"reasoning": "No log", "success": false, "critique": "Find a tree first"}"#;

/// Replies from a script, repeating the fallback once it runs out
struct Scripted {
    replies: Mutex<VecDeque<String>>,
    fallback: String,
    calls: AtomicUsize,
    conversations: Mutex<Vec<Vec<ChatMessage>>>,
}

impl Scripted {
    fn new(replies: &[&str], fallback: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            fallback: fallback.to_string(),
            calls: AtomicUsize::new(0),
            conversations: Mutex::new(Vec::new()),
        })
    }

    fn always(reply: &str) -> Arc<Self> {
        Self::new(&[], reply)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Text of every message sent in call `n`
    fn prompt(&self, n: usize) -> String {
        self.conversations.lock().unwrap()[n]
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl LanguageModel for Scripted {
    async fn generate(&self, conversation: &[ChatMessage]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.conversations.lock().unwrap().push(conversation.to_vec());
        let next = self.replies.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

#[derive(Default)]
struct EnvStats {
    resets: AtomicUsize,
    steps: AtomicUsize,
    closes: AtomicUsize,
}

#[derive(Clone, Copy)]
enum StepBehavior {
    Observe,
    Hang,
    Fail,
}

/// Environment that returns empty observations, hangs or fails on step
struct FakeEnv {
    stats: Arc<EnvStats>,
    on_step: StepBehavior,
}

#[async_trait]
impl Environment for FakeEnv {
    async fn reset(&mut self, _options: &ResetOptions) -> Result<Observation> {
        self.stats.resets.fetch_add(1, Ordering::SeqCst);
        Ok(Observation {
            biome: "forest".to_string(),
            ..Default::default()
        })
    }

    async fn step(&mut self, _unit: &CodeUnit, _helpers: &[Skill]) -> Result<Observation> {
        self.stats.steps.fetch_add(1, Ordering::SeqCst);
        match self.on_step {
            StepBehavior::Observe => {}
            StepBehavior::Hang => std::future::pending::<()>().await,
            StepBehavior::Fail => {
                return Err(KilnError::Environment("bridge returned 500".to_string()));
            }
        }
        Ok(Observation {
            biome: "forest".to_string(),
            ..Default::default()
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeFactory {
    stats: Arc<EnvStats>,
    created: AtomicUsize,
    on_step: StepBehavior,
}

impl EnvironmentFactory for FakeFactory {
    fn create(&self) -> Result<Box<dyn Environment>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeEnv {
            stats: self.stats.clone(),
            on_step: self.on_step,
        }))
    }
}

struct Harness {
    agent_loop: AgentLoop,
    skills: Arc<SkillRepository>,
    coder: Arc<Scripted>,
    critic: Arc<Scripted>,
}

fn harness(coder: Arc<Scripted>, critic: Arc<Scripted>, config: LoopConfig) -> Harness {
    let tasks = Scripted::always("Reasoning: Trees nearby\nTask: Mine 1 wood log.");
    harness_with_tasks(tasks, coder, critic, config)
}

fn harness_with_tasks(
    tasks: Arc<Scripted>,
    coder: Arc<Scripted>,
    critic: Arc<Scripted>,
    config: LoopConfig,
) -> Harness {
    let index = Arc::new(TermIndex::in_memory());
    let skills = Arc::new(SkillRepository::new(Box::new(ExistingIndex(index)), 5, 0.0).with_strict(true));

    let components = LoopComponents {
        curriculum: Curriculum::new(tasks),
        synthesizer: CodeSynthesizer::new(coder.clone()),
        critic: Critic::new(critic.clone()),
        describer: SkillDescriber::new(Scripted::always("Mines one oak log.")),
        skills: skills.clone(),
    };

    Harness {
        agent_loop: AgentLoop::new(components, config),
        skills,
        coder,
        critic,
    }
}

fn config(max_tries: usize, max_tasks: usize) -> LoopConfig {
    LoopConfig {
        max_tries,
        max_tasks: Some(max_tasks),
        ..LoopConfig::default()
    }
}

fn env() -> (FakeEnv, Arc<EnvStats>) {
    let stats = Arc::new(EnvStats::default());
    (
        FakeEnv {
            stats: stats.clone(),
            on_step: StepBehavior::Observe,
        },
        stats,
    )
}

fn drain(rx: &mut Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn attempt_count(events: &[ProgressEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Attempt(_)))
        .count()
}

#[tokio::test]
async fn test_three_failures_then_success_completes_task() {
    let mut h = harness(
        Scripted::always(MINE_LOG),
        Scripted::new(&[FAIL, FAIL, FAIL, PASS], FAIL),
        config(4, 1),
    );
    let mut rx = h.agent_loop.progress().subscribe();
    let (mut env, stats) = env();

    let exit = h.agent_loop.run(&mut env, &CancellationToken::new()).await.unwrap();

    assert_eq!(exit, LoopExit::MaxTasks { tasks: 1 });
    assert!(h.agent_loop.history().is_completed("Mine 1 wood log"));
    assert!(!h.agent_loop.history().is_failed("Mine 1 wood log"));
    assert_eq!(h.skills.count().await.unwrap(), 1);
    assert_eq!(h.skills.list().await.unwrap()[0].name, "mineLog");
    assert_eq!(stats.steps.load(Ordering::SeqCst), 4);
    assert_eq!(h.critic.calls(), 4);

    let events = drain(&mut rx);
    assert_eq!(attempt_count(&events), 4);
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::TaskFinished {
            outcome: TaskOutcome::Completed,
            attempts: 4,
            ..
        }
    )));
}

#[tokio::test]
async fn test_exhausted_tries_fail_task_without_storing() {
    let mut h = harness(Scripted::always(MINE_LOG), Scripted::always(FAIL), config(2, 1));
    let (mut env, stats) = env();

    let exit = h.agent_loop.run(&mut env, &CancellationToken::new()).await.unwrap();

    assert_eq!(exit, LoopExit::MaxTasks { tasks: 1 });
    assert!(h.agent_loop.history().is_failed("Mine 1 wood log"));
    assert!(!h.agent_loop.history().is_completed("Mine 1 wood log"));
    assert_eq!(h.skills.count().await.unwrap(), 0);
    assert_eq!(stats.steps.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_attempts_never_exceed_max_tries() {
    let mut h = harness(Scripted::always(MINE_LOG), Scripted::always(FAIL), config(3, 2));
    let mut rx = h.agent_loop.progress().subscribe();
    let (mut env, stats) = env();

    h.agent_loop.run(&mut env, &CancellationToken::new()).await.unwrap();

    assert_eq!(stats.steps.load(Ordering::SeqCst), 6);
    let events = drain(&mut rx);
    for event in &events {
        if let ProgressEvent::Attempt(report) = event {
            assert!(report.attempt <= 3);
            assert_eq!(report.max_tries, 3);
        }
    }
    assert_eq!(attempt_count(&events), 6);
}

#[tokio::test]
async fn test_no_code_counts_as_failed_try() {
    let mut h = harness(
        Scripted::new(&[NO_CODE], MINE_LOG),
        Scripted::always(PASS),
        config(2, 1),
    );
    let mut rx = h.agent_loop.progress().subscribe();
    let (mut env, stats) = env();

    h.agent_loop.run(&mut env, &CancellationToken::new()).await.unwrap();

    // Only the second attempt reached the environment and the critic
    assert_eq!(stats.steps.load(Ordering::SeqCst), 1);
    assert_eq!(h.critic.calls(), 1);
    assert_eq!(h.coder.calls(), 2);
    assert!(h.agent_loop.history().is_completed("Mine 1 wood log"));

    let events = drain(&mut rx);
    let first = events
        .iter()
        .find_map(|e| match e {
            ProgressEvent::Attempt(report) => Some(report.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(first.attempt, 1);
    assert!(first.entry.is_none());
    assert!(!first.success);
    assert!(first.observation.has_errors());
}

#[tokio::test]
async fn test_no_code_on_every_try_fails_task() {
    let mut h = harness(Scripted::always(NO_CODE), Scripted::always(PASS), config(3, 1));
    let (mut env, stats) = env();

    h.agent_loop.run(&mut env, &CancellationToken::new()).await.unwrap();

    assert_eq!(stats.steps.load(Ordering::SeqCst), 0);
    assert_eq!(h.coder.calls(), 3);
    assert!(h.agent_loop.history().is_failed("Mine 1 wood log"));
}

#[tokio::test]
async fn test_unsafe_code_is_retried_with_feedback() {
    let unsafe_reply = "```javascript\nasync function spin(bot) {\n  while (true) { await bot.look(0, 0); }\n}\n```";
    let mut h = harness(
        Scripted::new(&[unsafe_reply], MINE_LOG),
        Scripted::always(PASS),
        config(2, 1),
    );
    let mut rx = h.agent_loop.progress().subscribe();
    let (mut env, stats) = env();

    h.agent_loop.run(&mut env, &CancellationToken::new()).await.unwrap();

    assert_eq!(stats.steps.load(Ordering::SeqCst), 1);
    let events = drain(&mut rx);
    let rejected = events
        .iter()
        .find_map(|e| match e {
            ProgressEvent::Attempt(report) if report.attempt == 1 => Some(report.clone()),
            _ => None,
        })
        .unwrap();
    assert!(rejected.code.is_none());
    assert!(!rejected.critique.is_empty());
}

#[tokio::test]
async fn test_task_history_is_exclusive() {
    let mut h = harness(
        Scripted::always(MINE_LOG),
        Scripted::new(&[FAIL, FAIL, PASS], FAIL),
        config(2, 2),
    );
    let (mut env, _stats) = env();

    h.agent_loop.run(&mut env, &CancellationToken::new()).await.unwrap();

    let history = h.agent_loop.history();
    assert!(history.is_completed("Mine 1 wood log"));
    assert!(!history.is_failed("Mine 1 wood log"));
    assert_eq!(history.completed().len(), 1);
    assert!(history.failed().is_empty());
}

#[tokio::test]
async fn test_critique_parse_failure_is_fatal() {
    let mut h = harness(
        Scripted::always(MINE_LOG),
        Scripted::always("The bot looks fine to me."),
        config(5, 1),
    );
    let mut rx = h.agent_loop.progress().subscribe();
    let (mut env, stats) = env();

    let result = h.agent_loop.run(&mut env, &CancellationToken::new()).await;

    assert!(matches!(result, Err(KilnError::CritiqueParse(_))));
    assert_eq!(stats.steps.load(Ordering::SeqCst), 1);
    assert!(h.agent_loop.history().completed().is_empty());
    assert!(h.agent_loop.history().failed().is_empty());

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressEvent::Halted { stage, .. } if stage == "critic")));
}

#[tokio::test]
async fn test_task_proposal_parse_failure_is_fatal() {
    let mut h = harness_with_tasks(
        Scripted::always("I would rather not say."),
        Scripted::always(MINE_LOG),
        Scripted::always(PASS),
        config(5, 1),
    );
    let (mut env, stats) = env();

    let result = h.agent_loop.run(&mut env, &CancellationToken::new()).await;

    assert!(matches!(result, Err(KilnError::TaskProposal(_))));
    assert_eq!(stats.steps.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let mut h = harness(Scripted::always(MINE_LOG), Scripted::always(PASS), LoopConfig::default());
    let (mut env, stats) = env();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let exit = h.agent_loop.run(&mut env, &cancel).await.unwrap();

    assert_eq!(exit, LoopExit::Cancelled { tasks: 0 });
    assert_eq!(stats.steps.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_activity_log_written() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(Scripted::always(MINE_LOG), Scripted::always(PASS), config(2, 1));
    let mut agent_loop = h
        .agent_loop
        .with_activity_logging(dir.path().to_path_buf())
        .with_history_path(dir.path().join("history.json"));
    let (mut env, _stats) = env();

    agent_loop.run(&mut env, &CancellationToken::new()).await.unwrap();

    let log = std::fs::read_to_string(dir.path().join("activity.md")).unwrap();
    assert!(log.contains("## Task: Mine 1 wood log"));
    assert!(log.contains("**Completed** `Mine 1 wood log`"));

    let history = kiln_orchestrator::load_history(&dir.path().join("history.json"))
        .await
        .unwrap();
    assert!(history.is_completed("Mine 1 wood log"));
}

fn supervised(on_step: StepBehavior) -> (AgentSupervisor, Arc<FakeFactory>) {
    let h = harness(Scripted::always(MINE_LOG), Scripted::always(FAIL), LoopConfig::default());
    let factory = Arc::new(FakeFactory {
        stats: Arc::new(EnvStats::default()),
        created: AtomicUsize::new(0),
        on_step,
    });
    (AgentSupervisor::new(h.agent_loop, factory.clone()), factory)
}

async fn wait_for_step(stats: &EnvStats) {
    for _ in 0..200 {
        if stats.steps.load(Ordering::SeqCst) > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("environment was never stepped");
}

#[tokio::test]
async fn test_stop_cancels_and_closes_environment() {
    let (mut supervisor, factory) = supervised(StepBehavior::Hang);

    supervisor.start().await.unwrap();
    assert!(supervisor.is_running());
    wait_for_step(&factory.stats).await;

    let exit = supervisor.stop().await.unwrap();

    assert!(matches!(exit, Some(LoopExit::Cancelled { .. })));
    assert!(!supervisor.is_running());
    assert_eq!(factory.stats.closes.load(Ordering::SeqCst), 1);
    assert!(supervisor.agent_loop().is_some());
}

#[tokio::test]
async fn test_restart_uses_fresh_environment() {
    let (mut supervisor, factory) = supervised(StepBehavior::Hang);

    supervisor.start().await.unwrap();
    wait_for_step(&factory.stats).await;
    supervisor.restart().await.unwrap();

    assert!(supervisor.is_running());
    assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    assert_eq!(factory.stats.closes.load(Ordering::SeqCst), 1);

    supervisor.stop().await.unwrap();
    assert_eq!(factory.stats.closes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_start_while_running_is_noop() {
    let (mut supervisor, factory) = supervised(StepBehavior::Hang);

    supervisor.start().await.unwrap();
    supervisor.start().await.unwrap();
    assert_eq!(factory.created.load(Ordering::SeqCst), 1);

    supervisor.stop().await.unwrap();
    assert_eq!(supervisor.stop().await.unwrap(), None);
}

#[tokio::test]
async fn test_fatal_error_still_closes_environment() {
    let h = harness_with_tasks(
        Scripted::always("no task here"),
        Scripted::always(MINE_LOG),
        Scripted::always(PASS),
        LoopConfig::default(),
    );
    let factory = Arc::new(FakeFactory {
        stats: Arc::new(EnvStats::default()),
        created: AtomicUsize::new(0),
        on_step: StepBehavior::Observe,
    });
    let mut supervisor = AgentSupervisor::new(h.agent_loop, factory.clone());
    let mut events = supervisor.progress().subscribe();

    supervisor.start().await.unwrap();
    let result = supervisor.wait().await;

    assert!(matches!(result, Err(KilnError::TaskProposal(_))));
    assert_eq!(factory.stats.closes.load(Ordering::SeqCst), 1);
    let halted = events.recv().await.unwrap();
    assert!(matches!(halted, ProgressEvent::Halted { stage, .. } if stage == "curriculum"));
}

#[tokio::test]
async fn test_previous_unit_and_critique_reach_next_attempt() {
    let mut h = harness(
        Scripted::always(MINE_LOG),
        Scripted::new(&[FAIL, PASS], FAIL),
        config(2, 1),
    );
    let (mut env, _stats) = env();

    h.agent_loop.run(&mut env, &CancellationToken::new()).await.unwrap();

    assert_eq!(h.coder.calls(), 2);
    let first = h.coder.prompt(0);
    assert!(!first.contains("Find a tree first"));

    let second = h.coder.prompt(1);
    assert!(second.contains("async function mineLog(bot)"));
    assert!(second.contains("await mineLog(bot);"));
    assert!(second.contains("Find a tree first"));
}

#[tokio::test]
async fn test_no_code_feedback_reaches_next_attempt() {
    let mut h = harness(
        Scripted::new(&[NO_CODE], MINE_LOG),
        Scripted::always(PASS),
        config(2, 1),
    );
    let (mut env, _stats) = env();

    h.agent_loop.run(&mut env, &CancellationToken::new()).await.unwrap();

    let feedback = kiln_agent::SynthesisFailure::NoCodeBlock.to_string();
    assert!(h.coder.prompt(1).contains(&feedback));
}

#[tokio::test]
async fn test_environment_step_error_is_fatal() {
    let mut h = harness(Scripted::always(MINE_LOG), Scripted::always(PASS), config(5, 1));
    let mut rx = h.agent_loop.progress().subscribe();
    let stats = Arc::new(EnvStats::default());
    let mut env = FakeEnv {
        stats: stats.clone(),
        on_step: StepBehavior::Fail,
    };

    let result = h.agent_loop.run(&mut env, &CancellationToken::new()).await;

    assert!(matches!(result, Err(KilnError::Environment(_))));
    assert_eq!(stats.steps.load(Ordering::SeqCst), 1);
    assert_eq!(h.critic.calls(), 0);
    assert!(h.agent_loop.history().completed().is_empty());
    assert!(h.agent_loop.history().failed().is_empty());

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressEvent::Halted { stage, .. } if stage == "environment")));
}

#[tokio::test]
async fn test_supervisor_closes_environment_after_step_error() {
    let (mut supervisor, factory) = supervised(StepBehavior::Fail);
    let mut events = supervisor.progress().subscribe();

    supervisor.start().await.unwrap();
    let result = supervisor.wait().await;

    assert!(matches!(result, Err(KilnError::Environment(_))));
    assert!(!supervisor.is_running());
    assert_eq!(factory.stats.closes.load(Ordering::SeqCst), 1);

    let mut halted = None;
    while let Ok(event) = events.try_recv() {
        if let ProgressEvent::Halted { stage, .. } = event {
            halted = Some(stage);
        }
    }
    assert_eq!(halted.as_deref(), Some("environment"));
}

#[tokio::test]
async fn test_no_code_errors_stay_with_their_attempt() {
    let tasks = Scripted::always("Reasoning: Trees nearby\nTask: Mine 1 wood log.");
    let mut h = harness_with_tasks(
        tasks.clone(),
        Scripted::new(&[NO_CODE, NO_CODE, NO_CODE], MINE_LOG),
        Scripted::always(PASS),
        config(2, 2),
    );
    let (mut env, _stats) = env();

    h.agent_loop.run(&mut env, &CancellationToken::new()).await.unwrap();

    let feedback = kiln_agent::SynthesisFailure::NoCodeBlock.to_string();
    let execution_error = |prompt: &str| {
        prompt
            .lines()
            .find(|line| line.starts_with("Execution error:"))
            .map(str::to_string)
    };

    // Second attempt of the first task sees one error, not two
    assert_eq!(
        execution_error(&h.coder.prompt(1)),
        Some(format!("Execution error: {}", feedback))
    );
    // Next task starts clean
    assert_eq!(tasks.calls(), 2);
    assert!(!tasks.prompt(1).contains(&feedback));
    assert_eq!(
        execution_error(&h.coder.prompt(2)),
        Some("Execution error: None".to_string())
    );
}
