//! Periodic update manager.
//!
//! The manager owns the registered actions and their call records and decides
//! when each action runs:
//! 1. `start()` loads persisted records and spawns the controller task
//! 2. Triggers (condition flips, network changes, wake-ups, registrations) are
//!    queued to the controller, which runs one pass per trigger
//! 3. A pass executes every due, idle action with its default input
//! 4. After each pass or explicit run the nearest due time is handed to the
//!    wake-up scheduler, or the wake-up is cancelled
//!
//! Shared state sits behind a std `Mutex` that is never held across an
//! `.await`. The set of running action ids is a `watch` channel so explicit
//! runs can wait for a running instance to finish.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::select_all;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::action::{ActionId, CallOutcome, PeriodicAction, UpdateAction};
use crate::clock::{Clock, SystemClock};
use crate::condition::Condition;
use crate::error::Result;
use crate::jitter::{JitterPolicy, JitterSource, RandomJitter};
use crate::spec::UpdateSpec;
use crate::store::{CallRecord, RecordStore};
use crate::usage::UsageMonitor;
use crate::wakeup::{TimerWakeup, WakeupScheduler};

use super::config::SchedulerConfig;
use super::due;
use super::registry::ActionRegistry;
use super::runaway::RunawayDetector;
use super::triggers::{self, Trigger, TriggerSender};

/// Called with the id of an action that was just throttled as runaway.
pub type RunawayHook = Arc<dyn Fn(&str) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builder for [`PeriodicUpdateManager`].
///
/// The trigger channel exists before the manager does, so collaborators that
/// need to queue triggers (a wake-up scheduler, an OS callback) can grab a
/// [`TriggerSender`] first.
pub struct ManagerBuilder {
    config: SchedulerConfig,
    store: Arc<dyn RecordStore>,
    wakeup: Option<Arc<dyn WakeupScheduler>>,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSource>,
    network: Option<watch::Receiver<bool>>,
    usage: Option<Arc<dyn UsageMonitor>>,
    on_runaway: Option<RunawayHook>,
    triggers: TriggerSender,
    trigger_rx: mpsc::UnboundedReceiver<Trigger>,
}

impl ManagerBuilder {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let (triggers, trigger_rx) = triggers::channel();
        Self {
            config: SchedulerConfig::default(),
            store,
            wakeup: None,
            clock: Arc::new(SystemClock),
            jitter: Arc::new(RandomJitter),
            network: None,
            usage: None,
            on_runaway: None,
            triggers,
            trigger_rx,
        }
    }

    /// Sender connected to the manager that will be built.
    pub fn trigger_sender(&self) -> TriggerSender {
        self.triggers.clone()
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to an in-process [`TimerWakeup`].
    pub fn wakeup(mut self, wakeup: Arc<dyn WakeupScheduler>) -> Self {
        self.wakeup = Some(wakeup);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Network availability. Without one the network counts as available.
    pub fn network(mut self, network: watch::Receiver<bool>) -> Self {
        self.network = Some(network);
        self
    }

    /// App usage. Without one the app counts as always in use.
    pub fn usage(mut self, usage: Arc<dyn UsageMonitor>) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn on_runaway(mut self, hook: RunawayHook) -> Self {
        self.on_runaway = Some(hook);
        self
    }

    pub fn build(self) -> Result<PeriodicUpdateManager> {
        let ManagerBuilder {
            config,
            store,
            wakeup,
            clock,
            jitter,
            network,
            usage,
            on_runaway,
            triggers,
            trigger_rx,
        } = self;

        config.validate()?;

        let wakeup = match wakeup {
            Some(wakeup) => wakeup,
            None => Arc::new(TimerWakeup::new(clock.clone(), triggers.clone())),
        };
        let (in_flight, _) = watch::channel(HashSet::new());
        let (started, _) = watch::channel(false);
        let state = State {
            registry: ActionRegistry::new(),
            records: HashMap::new(),
            runaway: RunawayDetector::new(config.runaway_window_ms, config.runaway_threshold),
            runtime: None,
            tasks: Vec::new(),
            condition_watcher: None,
            watched_conditions: HashSet::new(),
        };

        Ok(PeriodicUpdateManager {
            inner: Arc::new(Inner {
                jitter_policy: config.jitter_policy(),
                config,
                store,
                wakeup,
                clock,
                jitter,
                network,
                usage,
                on_runaway,
                triggers,
                trigger_rx: Mutex::new(Some(trigger_rx)),
                state: Mutex::new(state),
                in_flight,
                started,
            }),
        })
    }
}

struct State {
    registry: ActionRegistry,
    records: HashMap<ActionId, CallRecord>,
    runaway: RunawayDetector,
    /// Set by `start()`; background tasks are spawned here.
    runtime: Option<Handle>,
    tasks: Vec<JoinHandle<()>>,
    condition_watcher: Option<JoinHandle<()>>,
    watched_conditions: HashSet<Condition>,
}

struct Inner {
    config: SchedulerConfig,
    jitter_policy: JitterPolicy,
    store: Arc<dyn RecordStore>,
    wakeup: Arc<dyn WakeupScheduler>,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSource>,
    network: Option<watch::Receiver<bool>>,
    usage: Option<Arc<dyn UsageMonitor>>,
    on_runaway: Option<RunawayHook>,
    triggers: TriggerSender,
    /// Taken by the controller on start.
    trigger_rx: Mutex<Option<mpsc::UnboundedReceiver<Trigger>>>,
    state: Mutex<State>,
    in_flight: watch::Sender<HashSet<ActionId>>,
    started: watch::Sender<bool>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    fn draw_jitter(&self) -> f64 {
        self.jitter_policy.draw(self.jitter.as_ref())
    }
}

/// Marks an action id as running until dropped, panics included.
struct InFlightGuard {
    inner: Arc<Inner>,
    id: ActionId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.send_modify(|running| {
            running.remove(&self.id);
        });
    }
}

/// Schedules registered actions according to their specs and call history.
///
/// Cheap to clone; all clones drive the same manager. Background tasks keep
/// the manager alive until [`shutdown`](Self::shutdown) is called.
#[derive(Clone)]
pub struct PeriodicUpdateManager {
    inner: Arc<Inner>,
}

impl PeriodicUpdateManager {
    pub fn builder(store: Arc<dyn RecordStore>) -> ManagerBuilder {
        ManagerBuilder::new(store)
    }

    /// Load persisted records and start reacting to triggers.
    ///
    /// Runs one pass before returning. Fails if the records can't be loaded,
    /// in which case the manager stays un-started and `start` may be retried.
    pub async fn start(&self) -> Result<()> {
        let Some(trigger_rx) = lock(&self.inner.trigger_rx).take() else {
            tracing::warn!("Periodic update manager already started");
            return Ok(());
        };

        let loaded = match self.inner.store.load_all().await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load call records");
                *lock(&self.inner.trigger_rx) = Some(trigger_rx);
                return Err(e);
            }
        };

        let count = loaded.len();
        {
            let mut state = self.inner.state();
            for record in loaded {
                // Records written by explicit runs before start are newer.
                state.records.entry(record.id.clone()).or_insert(record);
            }
            state.runtime = Some(Handle::current());
        }
        self.inner.started.send_replace(true);
        self.spawn_background(trigger_rx);
        tracing::info!(records = count, "Periodic update manager started");

        self.process_periodic().await;
        Ok(())
    }

    /// Stop background tasks. Registered actions and records stay in place.
    pub fn shutdown(&self) {
        let mut state = self.inner.state();
        for task in state.tasks.drain(..) {
            task.abort();
        }
        if let Some(watcher) = state.condition_watcher.take() {
            watcher.abort();
        }
        // Later registrations must not spawn watchers nobody will abort.
        state.runtime = None;
        tracing::info!("Periodic update manager stopped");
    }

    /// Register an action, replacing any previous registration with its id.
    ///
    /// The first spec whose conditions are all active governs the action.
    /// The action's call record is kept across re-registration.
    pub fn register<T, R>(&self, action: &UpdateAction<T, R>, specs: impl IntoIterator<Item = UpdateSpec>)
    where
        T: Send + 'static,
        R: Send + 'static,
    {
        let specs: Vec<UpdateSpec> = specs.into_iter().collect();
        tracing::info!(action_id = %action.id(), specs = specs.len(), "Registering action");

        {
            let mut state = self.inner.state();
            if state.registry.register(Arc::new(action.clone()), specs) {
                tracing::debug!(action_id = %action.id(), "Replaced existing registration");
            }
            self.refresh_condition_watcher(&mut state);
        }
        self.notify_actions_changed();
    }

    /// Remove an action. Its call record is kept.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = {
            let mut state = self.inner.state();
            let removed = state.registry.unregister(id);
            if removed {
                self.refresh_condition_watcher(&mut state);
            }
            removed
        };

        if removed {
            tracing::info!(action_id = %id, "Unregistered action");
            self.notify_actions_changed();
        }
        removed
    }

    /// Run an action now with its default input.
    pub async fn execute_now<T, R>(&self, action: &UpdateAction<T, R>) -> R
    where
        T: Send + 'static,
        R: Send + 'static,
    {
        let input = action.default_input().await;
        self.execute_now_with(action, input).await
    }

    /// Run an action now with an explicit input.
    ///
    /// Waits for a running instance of the same action to finish first. The
    /// result is recorded like a periodic run, so the next periodic run is
    /// pushed back accordingly.
    pub async fn execute_now_with<T, R>(&self, action: &UpdateAction<T, R>, input: T) -> R
    where
        T: Send + 'static,
        R: Send + 'static,
    {
        let guard = self.claim(action.id()).await;
        tracing::debug!(action_id = %action.id(), "Executing action explicitly");

        let result = action.execute(input).await;
        self.update_last_call(action.id(), result.outcome()).await;

        drop(guard);
        self.reschedule_next();
        result.value
    }

    /// Execute every due action, then reschedule.
    ///
    /// Waits for `start()` to have loaded the records. Nothing executes while
    /// the network is unavailable.
    pub async fn process_periodic(&self) {
        self.wait_started().await;

        if self.is_network_available() {
            self.execute_pending().await;
        } else {
            tracing::debug!("Network unavailable, skipping periodic pass");
        }

        self.reschedule_next();
    }

    /// Sender for queueing triggers from outside, e.g. an OS wake-up callback.
    pub fn trigger_sender(&self) -> TriggerSender {
        self.inner.triggers.clone()
    }

    pub fn is_started(&self) -> bool {
        *self.inner.started.borrow()
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        self.inner.in_flight.borrow().contains(id)
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.inner.state().registry.contains(id)
    }

    pub fn registered_ids(&self) -> Vec<ActionId> {
        self.inner.state().registry.ids()
    }

    pub fn record(&self, id: &str) -> Option<CallRecord> {
        self.inner.state().records.get(id).cloned()
    }

    /// All known call records, sorted by id.
    pub fn records(&self) -> Vec<CallRecord> {
        let mut records: Vec<CallRecord> = self.inner.state().records.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Earliest due time over registered actions with a matching spec.
    pub fn next_due_at(&self) -> Option<u64> {
        let now = self.inner.now();
        let state = self.inner.state();
        let active = state.registry.active_conditions();
        due::nearest(&state.registry, &state.records, &active, now, &self.inner.jitter_policy)
    }

    async fn wait_started(&self) {
        let mut started = self.inner.started.subscribe();
        let _ = started.wait_for(|started| *started).await;
    }

    fn is_network_available(&self) -> bool {
        self.inner.network.as_ref().is_none_or(|network| *network.borrow())
    }

    fn notify_actions_changed(&self) {
        if self.is_started() {
            self.inner.triggers.send(Trigger::ActionsChanged);
        }
    }

    async fn execute_pending(&self) {
        let ids = self.inner.state().registry.ids();
        for id in ids {
            // Claim before the due check so an explicit run finishing in
            // between can't make us run on a stale record.
            let Some(guard) = self.try_claim(&id) else {
                tracing::debug!(action_id = %id, "Action already running, skipping");
                continue;
            };
            let Some(action) = self.due_action(&id) else {
                continue;
            };

            tracing::debug!(action_id = %id, "Executing periodic action");
            let outcome = action.run_default().await;
            self.update_last_call(&id, outcome).await;
            drop(guard);

            self.throttle_runaway(&id).await;
        }
    }

    fn due_action(&self, id: &str) -> Option<Arc<dyn PeriodicAction>> {
        let now = self.inner.now();
        let state = self.inner.state();
        let registration = state.registry.get(id)?;
        let active = state.registry.active_conditions();
        let spec = registration.matching_spec(&active)?;
        let due_at = due::next_timestamp(spec, state.records.get(id), now, &self.inner.jitter_policy);
        (due_at <= now).then(|| registration.action.clone())
    }

    fn try_claim(&self, id: &str) -> Option<InFlightGuard> {
        let claimed = self
            .inner
            .in_flight
            .send_if_modified(|running| running.insert(id.to_string()));
        claimed.then(|| InFlightGuard {
            inner: Arc::clone(&self.inner),
            id: id.to_string(),
        })
    }

    async fn claim(&self, id: &str) -> InFlightGuard {
        let mut running = self.inner.in_flight.subscribe();
        loop {
            if let Some(guard) = self.try_claim(id) {
                return guard;
            }
            tracing::debug!(action_id = %id, "Waiting for running execution to finish");
            let _ = running.wait_for(|running| !running.contains(id)).await;
        }
    }

    async fn update_last_call(&self, id: &str, outcome: CallOutcome) {
        let now = self.inner.now();
        let ratio = self.inner.draw_jitter();
        let next_override = outcome.next_call_delay_override.map(|delay| {
            let capped = delay.min(self.inner.config.max_delay_override_ms);
            now.saturating_add(self.inner.jitter_policy.apply(capped, ratio))
        });

        let record = {
            let state = self.inner.state();
            match state.records.get(id) {
                Some(previous) => previous.after_call(now, &outcome, ratio, next_override),
                None => CallRecord::new(id, now, outcome.is_success, ratio).with_next_timestamp_override(next_override),
            }
        };

        tracing::debug!(
            action_id = %id,
            success = outcome.is_success,
            next_override = ?next_override,
            "Action finished"
        );
        self.save_record(record).await;
    }

    async fn throttle_runaway(&self, id: &str) {
        let now = self.inner.now();
        let Some(runaway_id) = self.inner.state().runaway.on_action_executed(id, now) else {
            return;
        };

        let delay = self
            .inner
            .jitter_policy
            .apply(self.inner.config.runaway_delay_ms, self.inner.draw_jitter());
        let throttled_until = now.saturating_add(delay);
        tracing::warn!(action_id = %runaway_id, throttled_until, "Runaway action detected, throttling");
        if let Some(hook) = &self.inner.on_runaway {
            hook(&runaway_id);
        }

        let record = {
            let state = self.inner.state();
            match state.records.get(&runaway_id) {
                Some(existing) => existing.clone(),
                None => CallRecord::new(runaway_id.clone(), now, true, self.inner.draw_jitter()),
            }
        }
        .with_throttled_timestamp(Some(throttled_until));

        self.save_record(record).await;
        self.inner.state().runaway.on_action_throttled(&runaway_id);
    }

    /// Update the in-memory record, then persist it. Persistence failures are
    /// logged; scheduling continues from memory.
    async fn save_record(&self, record: CallRecord) {
        self.inner.state().records.insert(record.id.clone(), record.clone());
        if let Err(e) = self.inner.store.upsert(&record).await {
            tracing::warn!(action_id = %record.id, error = %e, "Failed to persist call record");
        }
    }

    /// Hand the nearest due time to the wake-up scheduler, or cancel.
    ///
    /// Skipped while anything is running; whoever finishes last reschedules.
    fn reschedule_next(&self) {
        if !self.inner.in_flight.borrow().is_empty() {
            return;
        }

        let now = self.inner.now();
        let next = self.next_due_at();
        let recently_used = self
            .inner
            .usage
            .as_ref()
            .is_none_or(|usage| usage.was_in_use_within(self.inner.config.app_idle_cutoff_ms));

        match next {
            // An overdue wake-up would fire straight into another skipped pass.
            // Reconnecting queues a pass instead.
            Some(timestamp) if timestamp <= now && !self.is_network_available() => {
                tracing::debug!(timestamp, "Network unavailable with overdue actions, waiting for reconnect");
                self.inner.wakeup.cancel();
            }
            Some(timestamp) if recently_used => {
                tracing::debug!(timestamp, "Scheduling next wake-up");
                self.inner.wakeup.schedule_at(timestamp);
            }
            Some(_) => {
                tracing::debug!("App idle, cancelling wake-up");
                self.inner.wakeup.cancel();
            }
            None => {
                tracing::debug!("Nothing to schedule, cancelling wake-up");
                self.inner.wakeup.cancel();
            }
        }
    }

    fn spawn_background(&self, trigger_rx: mpsc::UnboundedReceiver<Trigger>) {
        let mut state = self.inner.state();

        state.tasks.push(tokio::spawn(run_controller(self.clone(), trigger_rx)));
        // Observers start from the values seen here so nothing that changes
        // before they first run is missed.
        if let Some(mut network) = self.inner.network.clone() {
            let available = *network.borrow_and_update();
            state
                .tasks
                .push(tokio::spawn(observe_network(network, available, self.inner.triggers.clone())));
        }
        if let Some(usage) = &self.inner.usage {
            let in_use = usage.subscribe();
            let current = *in_use.borrow();
            state
                .tasks
                .push(tokio::spawn(observe_usage(in_use, current, self.inner.triggers.clone())));
        }

        self.refresh_condition_watcher(&mut state);
    }

    /// Restart the condition watcher when the set of referenced conditions
    /// changed. Does nothing before `start()`.
    fn refresh_condition_watcher(&self, state: &mut State) {
        let conditions = state.registry.all_conditions();
        let running = state
            .condition_watcher
            .as_ref()
            .is_some_and(|watcher| !watcher.is_finished());
        if running && conditions == state.watched_conditions {
            return;
        }

        if let Some(watcher) = state.condition_watcher.take() {
            watcher.abort();
        }
        state.watched_conditions = conditions.clone();

        let Some(runtime) = state.runtime.clone() else {
            return;
        };
        if conditions.is_empty() {
            return;
        }
        tracing::debug!(conditions = conditions.len(), "Watching conditions");
        let conditions: Vec<Condition> = conditions.into_iter().collect();
        let active = active_set(&conditions);
        state.condition_watcher = Some(runtime.spawn(watch_conditions(conditions, active, self.inner.triggers.clone())));
    }
}

/// Handle triggers one at a time.
///
/// A panicking action aborts its pass; the controller logs it and keeps
/// serving triggers.
async fn run_controller(manager: PeriodicUpdateManager, mut triggers: mpsc::UnboundedReceiver<Trigger>) {
    while let Some(trigger) = triggers.recv().await {
        tracing::debug!(?trigger, "Handling trigger");
        if !trigger.runs_pass() {
            manager.reschedule_next();
            continue;
        }

        if let Err(panic) = AssertUnwindSafe(manager.process_periodic()).catch_unwind().await {
            tracing::error!(?trigger, panic = %panic_message(panic.as_ref()), "Periodic pass panicked");
            manager.reschedule_next();
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Send `ConditionsChanged` whenever the set of active conditions differs
/// from the last one seen, starting from `active`.
async fn watch_conditions(conditions: Vec<Condition>, mut active: HashSet<Condition>, triggers: TriggerSender) {
    let mut receivers: Vec<watch::Receiver<bool>> = conditions
        .iter()
        .map(|condition| {
            let mut rx = condition.subscribe();
            rx.mark_unchanged();
            rx
        })
        .collect();

    // Catch flips between the snapshot and the subscriptions above.
    let current = active_set(&conditions);
    if current != active {
        active = current;
        if !triggers.send(Trigger::ConditionsChanged) {
            return;
        }
    }

    while !receivers.is_empty() {
        let (changed, index) = {
            let (changed, index, _) = select_all(receivers.iter_mut().map(|rx| Box::pin(rx.changed()))).await;
            (changed, index)
        };
        if changed.is_err() {
            // Signal dropped; the condition keeps its last value.
            receivers.swap_remove(index);
            continue;
        }

        let now_active = active_set(&conditions);
        if now_active != active {
            tracing::debug!(active = now_active.len(), "Active conditions changed");
            active = now_active;
            if !triggers.send(Trigger::ConditionsChanged) {
                return;
            }
        }
    }
}

fn active_set(conditions: &[Condition]) -> HashSet<Condition> {
    conditions.iter().filter(|c| c.is_active()).cloned().collect()
}

async fn observe_network(mut network: watch::Receiver<bool>, mut available: bool, triggers: TriggerSender) {
    while network.changed().await.is_ok() {
        let now_available = *network.borrow_and_update();
        if now_available == available {
            continue;
        }
        available = now_available;
        tracing::info!(available, "Network availability changed");
        if !triggers.send(Trigger::NetworkChanged { available }) {
            return;
        }
    }
}

async fn observe_usage(mut in_use: watch::Receiver<bool>, mut current: bool, triggers: TriggerSender) {
    while in_use.changed().await.is_ok() {
        let now_in_use = *in_use.borrow_and_update();
        if now_in_use == current {
            continue;
        }
        current = now_in_use;
        tracing::debug!(in_use = current, "App usage changed");
        if !triggers.send(Trigger::ForegroundChanged { in_use: current }) {
            return;
        }
    }
}
