//! Task-tree execution: serial/parallel/repeat semantics, leaf dispatch,
//! and the `run_scenario` entry point.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::{
    Action, ApiCallOutcome, ChainApi, CompositeTask, Config, HttpMs, HttpPfs, JsonRpcChain, MsApi,
    NodeController, NodePool, PfsApi, PollConfig, Reporter, RunIdentity, RunReport, RunSummary,
    ScenarioDefinition, ScenarioPath, SkeinResult, StoredChannelInfo, TaskNode, TaskOutcome,
    TaskRecord, TaskResult, assertions, chain, exit_status_for, wall_time_iso_utc,
};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub poll_interval: Option<Duration>,
    pub max_wait: Option<Duration>,
    pub reporter: Reporter,
    pub report_to: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            poll_interval: None,
            max_wait: None,
            reporter: Reporter::Pretty,
            report_to: None,
        }
    }
}

/// Shared by every branch of the tree. Node controllers serialize their
/// own mutating calls; the channel-info store and trace are the only
/// mutable shared state and both sit behind locks.
pub struct ExecutionContext {
    pool: NodePool,
    chain: Box<dyn ChainApi>,
    pfs: Box<dyn PfsApi>,
    ms: Box<dyn MsApi>,
    poll: PollConfig,
    block_budget: Duration,
    channel_info: Mutex<BTreeMap<String, StoredChannelInfo>>,
    trace: Mutex<Vec<TaskRecord>>,
}

impl ExecutionContext {
    pub fn new(
        pool: NodePool,
        chain: Box<dyn ChainApi>,
        pfs: Box<dyn PfsApi>,
        ms: Box<dyn MsApi>,
        poll: PollConfig,
        block_budget: Duration,
    ) -> Self {
        Self {
            pool,
            chain,
            pfs,
            ms,
            poll,
            block_budget,
            channel_info: Mutex::new(BTreeMap::new()),
            trace: Mutex::new(Vec::new()),
        }
    }

    pub fn pool(&self) -> &NodePool {
        &self.pool
    }

    pub fn take_trace(&self) -> Vec<TaskRecord> {
        std::mem::take(&mut lock(&self.trace))
    }

    pub fn execute(&self, task: &TaskNode) -> TaskResult {
        match task {
            TaskNode::Serial(composite) => self.execute_serial(composite),
            TaskNode::Parallel(composite) => self.execute_parallel(composite),
            TaskNode::Leaf(action) => self.execute_leaf(action),
        }
    }

    fn execute_serial(&self, composite: &CompositeTask) -> TaskResult {
        let label = composite_label("serial", composite);
        let started = Instant::now();
        let started_at = wall_time_iso_utc();
        tracing::debug!(task = %label, repeat = composite.repeat, "serial start");

        let children = if composite.repeat == 1 {
            self.run_sequence(&composite.children)
        } else {
            // Repeats are an implicit serial sequence: iteration N+1 only
            // starts if iteration N did not fail.
            let mut iterations = Vec::with_capacity(composite.repeat as usize);
            for iteration in 1..=composite.repeat {
                let iter_started = Instant::now();
                let iter_started_at = wall_time_iso_utc();
                let results = self.run_sequence(&composite.children);
                let outcome = sequence_outcome(&results);
                let failed = outcome.is_failure();
                iterations.push(TaskResult {
                    label: format!("iteration {iteration}/{}", composite.repeat),
                    outcome,
                    started_at: iter_started_at,
                    finished_at: wall_time_iso_utc(),
                    duration_ms: iter_started.elapsed().as_millis() as u64,
                    children: results,
                });
                if failed {
                    break;
                }
            }
            iterations
        };

        let outcome = sequence_outcome(&children);
        tracing::debug!(task = %label, outcome = outcome.short(), "serial done");
        TaskResult {
            label,
            outcome,
            started_at,
            finished_at: wall_time_iso_utc(),
            duration_ms: started.elapsed().as_millis() as u64,
            children,
        }
    }

    /// Children in declared order; the first failure aborts the rest, which
    /// are recorded as skipped.
    fn run_sequence(&self, tasks: &[TaskNode]) -> Vec<TaskResult> {
        let mut results = Vec::with_capacity(tasks.len());
        let mut aborted = false;
        for task in tasks {
            if aborted {
                results.push(TaskResult::skipped(task_label(task)));
                continue;
            }
            let result = self.execute(task);
            aborted = result.outcome.is_failure();
            results.push(result);
        }
        results
    }

    fn execute_parallel(&self, composite: &CompositeTask) -> TaskResult {
        let label = composite_label("parallel", composite);
        let started = Instant::now();
        let started_at = wall_time_iso_utc();
        tracing::debug!(task = %label, repeat = composite.repeat, "parallel start");

        let children = if composite.repeat == 1 {
            self.join_children(&composite.children)
        } else {
            // Iterations fan out concurrently, each one a full child set.
            std::thread::scope(|scope| {
                let handles: Vec<_> = (1..=composite.repeat)
                    .map(|iteration| {
                        scope.spawn(move || {
                            let iter_started = Instant::now();
                            let iter_started_at = wall_time_iso_utc();
                            let results = self.join_children(&composite.children);
                            TaskResult {
                                label: format!("iteration {iteration}/{}", composite.repeat),
                                outcome: parallel_outcome(&results),
                                started_at: iter_started_at,
                                finished_at: wall_time_iso_utc(),
                                duration_ms: iter_started.elapsed().as_millis() as u64,
                                children: results,
                            }
                        })
                    })
                    .collect();
                handles.into_iter().map(join_result).collect()
            })
        };

        let outcome = parallel_outcome(&children);
        tracing::debug!(task = %label, outcome = outcome.short(), "parallel done");
        TaskResult {
            label,
            outcome,
            started_at,
            finished_at: wall_time_iso_utc(),
            duration_ms: started.elapsed().as_millis() as u64,
            children,
        }
    }

    /// All children start concurrently and all run to completion; a
    /// sibling failure cancels nothing. The scenarios assert post-state on
    /// every branch of a fan-out, so partial results must stay observable.
    fn join_children(&self, tasks: &[TaskNode]) -> Vec<TaskResult> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = tasks
                .iter()
                .map(|task| scope.spawn(move || self.execute(task)))
                .collect();
            handles.into_iter().map(join_result).collect()
        })
    }

    fn execute_leaf(&self, action: &Action) -> TaskResult {
        let label = action.describe();
        let started = Instant::now();
        let started_at = wall_time_iso_utc();
        tracing::info!(action = action.kind(), task = %label, "task start");

        let outcome = self.dispatch(action);

        let finished_at = wall_time_iso_utc();
        match &outcome {
            TaskOutcome::Success => tracing::info!(task = %label, "task ok"),
            other => tracing::warn!(task = %label, outcome = other.short(), "task failed"),
        }
        lock(&self.trace).push(TaskRecord {
            action: action.kind().to_string(),
            detail: label.clone(),
            outcome: outcome.clone(),
            started_at: started_at.clone(),
            finished_at: finished_at.clone(),
        });
        TaskResult {
            label,
            outcome,
            started_at,
            finished_at,
            duration_ms: started.elapsed().as_millis() as u64,
            children: Vec::new(),
        }
    }

    fn dispatch(&self, action: &Action) -> TaskOutcome {
        match action {
            Action::OpenChannel(p) => {
                self.channel_call("open_channel", p.from, p.to, p.expected_http_status, |ctl, partner| {
                    ctl.open_channel(partner, p.total_deposit.value(), p.settle_timeout)
                })
            }
            Action::Deposit(p) => {
                self.channel_call("deposit", p.from, p.to, p.expected_http_status, |ctl, partner| {
                    ctl.set_total_deposit(partner, p.total_deposit.value())
                })
            }
            Action::Withdraw(p) => {
                self.channel_call("withdraw", p.from, p.to, p.expected_http_status, |ctl, partner| {
                    ctl.set_total_withdraw(partner, p.total_withdraw.value())
                })
            }
            Action::CloseChannel(p) => {
                self.channel_call("close_channel", p.from, p.to, p.expected_http_status, |ctl, partner| {
                    ctl.close_channel(partner)
                })
            }
            Action::Transfer(p) => {
                self.channel_call("transfer", p.from, p.to, p.expected_http_status, |ctl, target| {
                    ctl.transfer(target, p.amount.value(), p.lock_timeout)
                })
            }
            Action::Assert(p) => assertions::assert_channel(&self.pool, p, &self.poll),
            Action::AssertSum(p) => assertions::assert_sum(&self.pool, p, &self.poll),
            Action::AssertEvents(p) => {
                assertions::assert_events(self.chain.as_ref(), p, &self.poll)
            }
            Action::AssertPfsHistory(p) => {
                assertions::assert_pfs_history(&self.pool, self.pfs.as_ref(), p, &self.poll)
            }
            Action::AssertPfsIou(p) => {
                assertions::assert_pfs_iou(&self.pool, self.pfs.as_ref(), p, &self.poll)
            }
            Action::AssertPfsRoutes(p) => {
                assertions::assert_pfs_routes(&self.pool, self.pfs.as_ref(), p, &self.poll)
            }
            Action::AssertMsClaim(p) => {
                let stored = lock(&self.channel_info).get(&p.channel_info_key).cloned();
                match stored {
                    Some(channel) => assertions::assert_ms_claim(
                        self.ms.as_ref(),
                        &p.channel_info_key,
                        &channel,
                        p.must_claim,
                        &self.poll,
                    ),
                    None => TaskOutcome::Failure(format!(
                        "assert_ms_claim: no stored channel info for key {:?}",
                        p.channel_info_key
                    )),
                }
            }
            Action::Wait(duration) => {
                std::thread::sleep(*duration);
                TaskOutcome::Success
            }
            Action::WaitBlocks(blocks) => chain::wait_blocks(
                self.chain.as_ref(),
                self.poll.interval,
                self.block_budget,
                *blocks,
            ),
            Action::StopNode(index) => self.lifecycle_call("stop_node", *index, NodeController::stop),
            Action::StartNode(index) => {
                self.lifecycle_call("start_node", *index, NodeController::start)
            }
            Action::StoreChannelInfo(p) => self.store_channel_info(p),
        }
    }

    fn channel_call(
        &self,
        kind: &str,
        from: usize,
        to: usize,
        expected: Option<u16>,
        call: impl FnOnce(&NodeController, &str) -> SkeinResult<ApiCallOutcome>,
    ) -> TaskOutcome {
        let controller = match self.pool.get(from) {
            Ok(ctl) => ctl,
            Err(err) => return TaskOutcome::Failure(format!("{kind}: {err}")),
        };
        let partner = match self.pool.address_of(to) {
            Ok(addr) => addr,
            Err(err) => return TaskOutcome::Failure(format!("{kind}: {err}")),
        };
        match call(controller, &partner) {
            Ok(outcome) => status_outcome(kind, outcome.status, expected),
            Err(err) => TaskOutcome::Failure(format!("{kind}: {err}")),
        }
    }

    fn lifecycle_call(
        &self,
        kind: &str,
        index: usize,
        call: impl FnOnce(&NodeController) -> SkeinResult<()>,
    ) -> TaskOutcome {
        match self.pool.get(index).and_then(call) {
            Ok(()) => TaskOutcome::Success,
            Err(err) => TaskOutcome::Failure(format!("{kind}: {err}")),
        }
    }

    fn store_channel_info(&self, params: &crate::StoreChannelInfoParams) -> TaskOutcome {
        let result = self.pool.address_of(params.to).and_then(|partner| {
            self.pool
                .get(params.from)
                .and_then(|ctl| ctl.query_channel(&partner))
        });
        match result {
            Ok(Some(channel)) => {
                lock(&self.channel_info).insert(
                    params.key.clone(),
                    StoredChannelInfo {
                        token_network_address: channel.token_network_address,
                        channel_identifier: channel.channel_identifier,
                    },
                );
                TaskOutcome::Success
            }
            Ok(None) => TaskOutcome::Failure(format!(
                "store_channel_info {}: no channel between {} and {}",
                params.key, params.from, params.to
            )),
            Err(err) => TaskOutcome::Failure(format!("store_channel_info {}: {err}", params.key)),
        }
    }
}

/// The declared expected status is the success criterion; a declared 409
/// makes a rejected call the passing outcome. Without a declaration any
/// 2xx passes.
fn status_outcome(kind: &str, status: u16, expected: Option<u16>) -> TaskOutcome {
    match expected {
        Some(want) if status == want => TaskOutcome::Success,
        Some(want) => {
            TaskOutcome::Failure(format!("{kind}: expected HTTP {want}, got {status}"))
        }
        None if (200..300).contains(&status) => TaskOutcome::Success,
        None => TaskOutcome::Failure(format!("{kind}: HTTP {status}")),
    }
}

fn join_result(handle: std::thread::ScopedJoinHandle<'_, TaskResult>) -> TaskResult {
    handle.join().unwrap_or_else(|_| {
        let now = wall_time_iso_utc();
        TaskResult {
            label: "parallel child".to_string(),
            outcome: TaskOutcome::Failure("task panicked".to_string()),
            started_at: now.clone(),
            finished_at: now,
            duration_ms: 0,
            children: Vec::new(),
        }
    })
}

fn composite_label(kind: &str, composite: &CompositeTask) -> String {
    composite
        .name
        .clone()
        .unwrap_or_else(|| kind.to_string())
}

fn task_label(task: &TaskNode) -> String {
    match task {
        TaskNode::Serial(c) => composite_label("serial", c),
        TaskNode::Parallel(c) => composite_label("parallel", c),
        TaskNode::Leaf(action) => action.describe(),
    }
}

/// A serial group fails with its first failing child's outcome kind.
fn sequence_outcome(children: &[TaskResult]) -> TaskOutcome {
    for child in children {
        match &child.outcome {
            TaskOutcome::Timeout(_) => {
                return TaskOutcome::Timeout(format!("{} timed out", child.label));
            }
            TaskOutcome::Failure(_) => {
                return TaskOutcome::Failure(format!("{} failed", child.label));
            }
            TaskOutcome::Success | TaskOutcome::Skipped => {}
        }
    }
    TaskOutcome::Success
}

/// A parallel group fails iff at least one child failed; hard failures
/// outrank timeouts in the rolled-up outcome.
fn parallel_outcome(children: &[TaskResult]) -> TaskOutcome {
    let mut timed_out = None;
    for child in children {
        match &child.outcome {
            TaskOutcome::Failure(_) => {
                return TaskOutcome::Failure(format!("{} failed", child.label));
            }
            TaskOutcome::Timeout(_) => {
                timed_out.get_or_insert_with(|| format!("{} timed out", child.label));
            }
            TaskOutcome::Success | TaskOutcome::Skipped => {}
        }
    }
    match timed_out {
        Some(label) => TaskOutcome::Timeout(label),
        None => TaskOutcome::Success,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Loads, executes, and reports one scenario. Managed nodes are started
/// before the root task and stopped afterwards regardless of outcome.
pub fn run_scenario(
    config: &Config,
    path: ScenarioPath,
    options: &RunOptions,
) -> SkeinResult<RunReport> {
    let definition = ScenarioDefinition::load(&path)?;
    let poll = PollConfig::new(
        options.poll_interval.unwrap_or_else(|| config.poll_interval()),
        options.max_wait.unwrap_or_else(|| config.max_wait()),
    );

    let pool = NodePool::from_definition(&definition, config)?;
    let token_network = definition.token.address.clone().unwrap_or_default();
    let chain_client = JsonRpcChain::from_settings(&definition.settings.services, config);
    let pfs = HttpPfs::from_settings(&definition.settings.services, token_network, config);
    let ms = HttpMs::from_settings(&definition.settings.services, config);

    let ctx = ExecutionContext::new(
        pool,
        Box::new(chain_client),
        Box::new(pfs),
        Box::new(ms),
        poll,
        config.block_budget(),
    );

    tracing::info!(scenario = %definition.name, nodes = definition.nodes.count, "run start");
    let started = Instant::now();
    let started_at = wall_time_iso_utc();
    ctx.pool().start_all()?;
    let root = ctx.execute(&definition.root);
    ctx.pool().stop_all();
    let finished_at = wall_time_iso_utc();

    let run_id = uuid::Uuid::new_v4().to_string();
    let report_path = options
        .report_to
        .clone()
        .unwrap_or_else(|| config.runs_dir().join(format!("{run_id}.json")));

    let summary = RunSummary {
        status: exit_status_for(&root.outcome),
        scenario: definition.name.clone(),
        identity: RunIdentity {
            run_id,
            report_path: Some(report_path.display().to_string()),
        },
        started_at,
        finished_at,
        duration_ms: started.elapsed().as_millis() as u64,
        tasks: root.counts(),
    };
    tracing::info!(scenario = %definition.name, status = ?summary.status, "run done");

    let report = RunReport {
        summary,
        root,
        trace: ctx.take_trace(),
    };

    if let Some(parent) = report_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        &report_path,
        serde_json::to_vec_pretty(&report).map_err(|err| {
            crate::SkeinError::InvalidArgument(format!("failed to serialize report: {err}"))
        })?,
    )?;

    Ok(report)
}
