//! Agent control loop
//!
//! Proposes tasks, runs bounded attempts for each one and retires the task
//! into the completed or failed history. Every external call is raced
//! against the cancellation token, so a stop request unwinds promptly from
//! any suspension point.

use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use kiln_agent::{CodeSynthesizer, SynthesisRequest};
use kiln_core::fail_open::fail_open;
use kiln_core::ports::Environment;
use kiln_core::{CodeUnit, Critique, KilnConfig, KilnError, Observation, ResetOptions, Result, Skill, Task};
use kiln_critic::Critic;
use kiln_curriculum::{Curriculum, TaskHistory};
use kiln_skills::{SkillDescriber, SkillRepository};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::activity_logger::ActivityLogger;
use crate::memory::WorldMemory;
use crate::progress::{attempt_report, ProgressChannel, ProgressEvent, TaskOutcome};
use crate::state_machine::{transition, AttemptAction, AttemptEvent, AttemptState};

/// Limits and reset options for one run
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Attempts allowed per task
    pub max_tries: usize,
    /// Stop after this many tasks (unlimited when unset)
    pub max_tasks: Option<usize>,
    /// Whether the run continues an earlier one
    pub resumed: bool,
    pub reset: ResetOptions,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_tries: 5,
            max_tasks: None,
            resumed: false,
            reset: ResetOptions::default(),
        }
    }
}

impl LoopConfig {
    pub fn from_config(config: &KilnConfig) -> Self {
        Self {
            max_tries: config.loop_settings.max_tries,
            max_tasks: config.loop_settings.max_tasks,
            resumed: config.loop_settings.resume,
            reset: config.reset_options(),
        }
    }
}

/// Why a run ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The configured task limit was reached
    MaxTasks { tasks: usize },
    /// A stop was requested
    Cancelled { tasks: usize },
}

/// Components the loop sequences
pub struct LoopComponents {
    pub curriculum: Curriculum,
    pub synthesizer: CodeSynthesizer,
    pub critic: Critic,
    pub describer: SkillDescriber,
    pub skills: Arc<SkillRepository>,
}

/// Per-task working state, dropped when the task retires
struct AttemptContext {
    task: Task,
    state: AttemptState,
    max_tries: usize,
    observation: Observation,
    last_unit: Option<CodeUnit>,
    last_critique: Option<Critique>,
    /// Why the previous attempt produced no code, shown to the next one only
    no_code: Option<String>,
}

/// The closed task/attempt loop
pub struct AgentLoop {
    curriculum: Curriculum,
    synthesizer: CodeSynthesizer,
    critic: Critic,
    describer: SkillDescriber,
    skills: Arc<SkillRepository>,
    memory: WorldMemory,
    progress: ProgressChannel,
    activity: Option<ActivityLogger>,
    history_path: Option<PathBuf>,
    config: LoopConfig,
    tasks_run: usize,
}

impl AgentLoop {
    pub fn new(components: LoopComponents, config: LoopConfig) -> Self {
        Self {
            curriculum: components.curriculum,
            synthesizer: components.synthesizer,
            critic: components.critic,
            describer: components.describer,
            skills: components.skills,
            memory: WorldMemory::new(),
            progress: ProgressChannel::default(),
            activity: None,
            history_path: None,
            config,
            tasks_run: 0,
        }
    }

    /// Publish progress on an existing channel
    pub fn with_progress(mut self, progress: ProgressChannel) -> Self {
        self.progress = progress;
        self
    }

    /// Enable activity logging to `.kiln/activity.md`
    pub fn with_activity_logging(mut self, kiln_dir: PathBuf) -> Self {
        self.activity = Some(ActivityLogger::new(kiln_dir));
        self
    }

    /// Save the task history to `path` after every task
    pub fn with_history_path(mut self, path: PathBuf) -> Self {
        self.history_path = Some(path);
        self
    }

    pub fn progress(&self) -> &ProgressChannel {
        &self.progress
    }

    pub fn history(&self) -> &TaskHistory {
        self.curriculum.history()
    }

    pub fn skills(&self) -> &Arc<SkillRepository> {
        &self.skills
    }

    /// Tasks retired in the current or most recent run
    pub fn tasks_run(&self) -> usize {
        self.tasks_run
    }

    /// Run until the task limit, a stop request or a fatal error
    ///
    /// The caller owns the environment and must close it afterwards.
    pub async fn run(
        &mut self,
        env: &mut dyn Environment,
        cancel: &CancellationToken,
    ) -> Result<LoopExit> {
        match self.drive(env, cancel).await {
            Ok(exit) => {
                info!("Agent loop stopped: {:?}", exit);
                Ok(exit)
            }
            Err(e) => {
                self.progress.emit(ProgressEvent::Halted {
                    stage: e.stage().to_string(),
                    message: e.to_string(),
                });
                if let Some(activity) = &self.activity {
                    activity.log_halted(e.stage(), &e.to_string()).await;
                }
                Err(e)
            }
        }
    }

    async fn drive(&mut self, env: &mut dyn Environment, cancel: &CancellationToken) -> Result<LoopExit> {
        let run_id = Uuid::new_v4();
        info!(%run_id, "Starting agent loop (max_tries = {})", self.config.max_tries);
        self.tasks_run = 0;
        if let Some(activity) = &self.activity {
            activity.log_run_start(self.config.max_tries, self.config.resumed).await;
        }

        let Some(first) = until_cancelled(cancel, env.reset(&self.config.reset)).await? else {
            return Ok(self.cancelled());
        };
        let mut observation = self.memory.merge(&first);

        loop {
            if let Some(max_tasks) = self.config.max_tasks {
                if self.tasks_run >= max_tasks {
                    return Ok(LoopExit::MaxTasks {
                        tasks: self.tasks_run,
                    });
                }
            }
            if cancel.is_cancelled() {
                return Ok(self.cancelled());
            }

            let Some(task) = until_cancelled(cancel, self.curriculum.next_task(&observation)).await?
            else {
                return Ok(self.cancelled());
            };

            match self.run_task(env, cancel, task, observation).await? {
                Some(next) => observation = next,
                None => return Ok(self.cancelled()),
            }
            self.tasks_run += 1;
        }
    }

    /// Drive one task to completion or failure
    ///
    /// Returns the last observation, or `None` when cancelled mid-task.
    async fn run_task(
        &mut self,
        env: &mut dyn Environment,
        cancel: &CancellationToken,
        task: Task,
        observation: Observation,
    ) -> Result<Option<Observation>> {
        self.progress.emit(ProgressEvent::TaskProposed {
            task: task.command.clone(),
            reasoning: task.reasoning.clone(),
        });
        if let Some(activity) = &self.activity {
            activity.log_task_start(&task.command, &task.reasoning).await;
        }

        let (state, actions) = transition(
            AttemptState::AwaitingTask,
            AttemptEvent::TaskProposed {
                task: task.command.clone(),
                max_tries: self.config.max_tries,
            },
        );
        let mut ctx = AttemptContext {
            task,
            state,
            max_tries: self.config.max_tries,
            observation,
            last_unit: None,
            last_critique: None,
            no_code: None,
        };
        let mut pending: VecDeque<AttemptAction> = actions.into();

        while let Some(action) = pending.pop_front() {
            match action {
                AttemptAction::LogActivity { message } => {
                    info!(task = %ctx.task.command, "{}", message);
                }
                AttemptAction::Attempt { number } => {
                    let Some(event) = self.attempt(env, cancel, &mut ctx, number).await? else {
                        return Ok(None);
                    };
                    let (next, actions) = transition(ctx.state.clone(), event);
                    ctx.state = next;
                    pending.extend(actions);
                }
                AttemptAction::StoreSkill => {
                    let unit = ctx.last_unit.as_ref().ok_or_else(|| {
                        KilnError::Other("no code unit to store after a successful attempt".to_string())
                    })?;
                    let Some(description) = until_cancelled(cancel, self.describer.describe(unit)).await?
                    else {
                        return Ok(None);
                    };
                    self.skills.add(&Skill::from_unit(unit, description)).await?;
                }
                AttemptAction::RecordCompleted => {
                    self.curriculum.add_completed(ctx.task.clone());
                    self.finish_task(&ctx, TaskOutcome::Completed).await;
                }
                AttemptAction::RecordFailed => {
                    self.curriculum.add_failed(ctx.task.clone());
                    self.finish_task(&ctx, TaskOutcome::Failed).await;
                }
            }
        }

        if let AttemptState::Halted { error } = &ctx.state {
            return Err(KilnError::Other(error.clone()));
        }
        let (state, _) = transition(ctx.state, AttemptEvent::Retired);
        debug!("Attempt machine back to {:?}", state);

        Ok(Some(ctx.observation))
    }

    /// One generate, execute, evaluate cycle
    ///
    /// Returns `None` when cancelled.
    async fn attempt(
        &mut self,
        env: &mut dyn Environment,
        cancel: &CancellationToken,
        ctx: &mut AttemptContext,
        number: usize,
    ) -> Result<Option<AttemptEvent>> {
        debug!(task = %ctx.task.command, "Attempt {}/{}", number, ctx.max_tries);

        let Some(skills) = until_cancelled(cancel, self.skills.query(&ctx.task)).await? else {
            return Ok(None);
        };

        // Synthetic errors never reach the critic or the next task
        let mut observation = ctx.observation.clone();
        if let Some(reason) = ctx.no_code.take() {
            observation.record_error(reason);
        }
        let request = SynthesisRequest {
            task: &ctx.task,
            skills: &skills,
            previous: ctx.last_unit.as_ref(),
            observation: &observation,
            critique: ctx.last_critique.as_ref(),
        };
        let Some(generated) = until_cancelled(cancel, self.synthesizer.generate(&request)).await? else {
            return Ok(None);
        };

        match generated {
            Err(failure) => {
                let reason = failure.to_string();
                ctx.no_code = Some(reason.clone());
                let critique = Critique::failure(reason.clone());

                info!(
                    task = %ctx.task.command,
                    attempt = number,
                    "Attempt {}/{} produced no code: {}",
                    number,
                    ctx.max_tries,
                    reason
                );
                let mut shown = ctx.observation.clone();
                shown.record_error(reason.clone());
                self.report_attempt(ctx, number, None, &shown, &critique).await;
                ctx.last_critique = Some(critique);

                Ok(Some(AttemptEvent::NoCode { reason }))
            }
            Ok(unit) => {
                let Some(fresh) = until_cancelled(cancel, env.step(&unit, &skills)).await? else {
                    return Ok(None);
                };
                ctx.observation = self.memory.merge(&fresh);

                let Some(critique) =
                    until_cancelled(cancel, self.critic.evaluate(&ctx.task, &ctx.observation)).await?
                else {
                    return Ok(None);
                };

                info!(
                    task = %ctx.task.command,
                    attempt = number,
                    success = critique.success,
                    "Attempt {}/{} with {}: {}",
                    number,
                    ctx.max_tries,
                    unit.entry,
                    if critique.success { "success" } else { "failure" }
                );
                self.report_attempt(ctx, number, Some(&unit), &ctx.observation, &critique)
                    .await;

                let success = critique.success;
                ctx.last_unit = Some(unit);
                ctx.last_critique = Some(critique);

                Ok(Some(AttemptEvent::Critiqued { success }))
            }
        }
    }

    async fn report_attempt(
        &self,
        ctx: &AttemptContext,
        number: usize,
        unit: Option<&CodeUnit>,
        observation: &Observation,
        critique: &Critique,
    ) {
        let report = attempt_report(
            &ctx.task.command,
            number,
            ctx.max_tries,
            unit.map(|u| (u.entry.as_str(), u.program())),
            observation,
            critique,
        );
        if let Some(activity) = &self.activity {
            activity.log_attempt(&report).await;
        }
        self.progress.emit(ProgressEvent::Attempt(report));
    }

    async fn finish_task(&self, ctx: &AttemptContext, outcome: TaskOutcome) {
        let attempts = match ctx.state {
            AttemptState::Succeeded { tries } | AttemptState::Failed { tries } => tries,
            _ => 0,
        };

        match outcome {
            TaskOutcome::Completed => info!("Completed task: {}", ctx.task.command),
            TaskOutcome::Failed => warn!("Failed task: {}", ctx.task.command),
        }
        info!(
            "Completed tasks: {}, failed tasks: {}",
            self.curriculum.history().completed().len(),
            self.curriculum.history().failed().len()
        );

        self.progress.emit(ProgressEvent::TaskFinished {
            task: ctx.task.command.clone(),
            outcome,
            attempts,
        });
        if let Some(activity) = &self.activity {
            activity.log_task_finished(&ctx.task.command, outcome, attempts).await;
        }
        self.save_history().await;
    }

    async fn save_history(&self) {
        let Some(path) = &self.history_path else {
            return;
        };
        let history = self.curriculum.history();
        fail_open("agent_loop::save_history", || async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let content = serde_json::to_string_pretty(history)?;
            tokio::fs::write(path, content).await?;
            Ok(())
        })
        .await;
    }

    fn cancelled(&self) -> LoopExit {
        info!("Agent loop cancelled");
        LoopExit::Cancelled {
            tasks: self.tasks_run,
        }
    }
}

/// Load a saved task history, or an empty one if none exists
pub async fn load_history(path: &std::path::Path) -> Result<TaskHistory> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(TaskHistory::new());
    }
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Race a port call against cancellation
///
/// `Ok(None)` means the token fired first; the call is dropped.
async fn until_cancelled<T, F>(cancel: &CancellationToken, fut: F) -> Result<Option<T>>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(None),
        result = fut => result.map(Some),
    }
}
