//! Periodic scheduling integration tests
//!
//! Drives the manager through its public API with a manual clock, fixed
//! jitter and recording wake-up schedulers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use cadence::clock::ManualClock;
use cadence::jitter::FixedJitter;
use cadence::store::{CallRecord, MemoryRecordStore, RecordStore, SqliteRecordStore};
use cadence::wakeup::{ForegroundWakeup, RecordingWakeup, TimerWakeup, WakeupCall, WakeupScheduler};
use cadence::{ActionResult, ManagerBuilder, PeriodicUpdateManager, Signal, UpdateAction, UpdateSpec};
use tempfile::TempDir;
use tokio::sync::watch;

const MINUTE: u64 = 60_000;

fn counting(id: &str, calls: &Arc<AtomicU32>) -> UpdateAction<(), ()> {
    let calls = calls.clone();
    UpdateAction::new(id, move || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { ActionResult::success(()) }
    })
}

fn manager(store: Arc<dyn RecordStore>, clock: &ManualClock, wakeup: Arc<RecordingWakeup>) -> PeriodicUpdateManager {
    ManagerBuilder::new(store)
        .clock(Arc::new(clock.clone()))
        .jitter(Arc::new(FixedJitter(0.0)))
        .wakeup(wakeup)
        .build()
        .unwrap()
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Integration test: success and failure intervals alternate with the outcome
#[tokio::test]
async fn test_success_and_failure_intervals() {
    let clock = ManualClock::new(0);
    let wakeup = Arc::new(RecordingWakeup::new());
    let manager = manager(Arc::new(MemoryRecordStore::new()), &clock, wakeup.clone());

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    // Succeeds on odd calls, fails on even ones
    let action = UpdateAction::new("flaky", move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move { ActionResult::new((), n % 2 == 1) }
    });
    manager.register(&action, [UpdateSpec::with_failure_interval(60_000, 30_000, [])]);

    manager.start().await.unwrap();
    assert_eq!(wakeup.last(), Some(WakeupCall::ScheduleAt(60_000)));

    clock.set(60_000);
    manager.process_periodic().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(wakeup.last(), Some(WakeupCall::ScheduleAt(90_000)));

    clock.set(89_999);
    manager.process_periodic().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    clock.set(90_000);
    manager.process_periodic().await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(wakeup.last(), Some(WakeupCall::ScheduleAt(150_000)));
    manager.shutdown();
}

/// Integration test: call records survive a restart
#[tokio::test]
async fn test_records_persist_across_restart() {
    let temp_dir = TempDir::new().unwrap();
    let clock = ManualClock::new(0);
    let calls = Arc::new(AtomicU32::new(0));

    {
        let store = Arc::new(SqliteRecordStore::open_at(temp_dir.path()).unwrap());
        let manager = manager(store, &clock, Arc::new(RecordingWakeup::new()));
        manager.register(&counting("servers", &calls), [UpdateSpec::new(15 * MINUTE, [])]);
        manager.start().await.unwrap();
        manager.shutdown();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    clock.set(10 * MINUTE);
    let store = Arc::new(SqliteRecordStore::open_at(temp_dir.path()).unwrap());
    assert_eq!(store.get("servers").unwrap(), Some(CallRecord::new("servers", 0, true, 0.0)));

    let wakeup = Arc::new(RecordingWakeup::new());
    let manager = manager(store, &clock, wakeup.clone());
    manager.register(&counting("servers", &calls), [UpdateSpec::new(15 * MINUTE, [])]);
    manager.start().await.unwrap();

    // Not due yet: the last run was before the restart
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(wakeup.last(), Some(WakeupCall::ScheduleAt(15 * MINUTE)));

    clock.set(15 * MINUTE);
    manager.process_periodic().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    manager.shutdown();
}

/// Integration test: foreground decides both the spec and the wake-up mechanism
#[tokio::test]
async fn test_foreground_switches_spec_and_wakeup() {
    let clock = ManualClock::new(0);
    let foreground = Signal::new("foreground", true);
    let in_process = Arc::new(RecordingWakeup::new());
    let deferred = Arc::new(RecordingWakeup::new());
    let wakeup = Arc::new(ForegroundWakeup::new(
        foreground.subscribe(),
        in_process.clone(),
        deferred.clone(),
    ));

    let manager = ManagerBuilder::new(Arc::new(MemoryRecordStore::new()))
        .clock(Arc::new(clock.clone()))
        .jitter(Arc::new(FixedJitter(0.0)))
        .wakeup(wakeup)
        .build()
        .unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    manager.register(
        &counting("location", &calls),
        [
            UpdateSpec::new(MINUTE, [foreground.condition()]),
            UpdateSpec::new(60 * MINUTE, []),
        ],
    );
    manager.start().await.unwrap();
    assert_eq!(in_process.last(), Some(WakeupCall::ScheduleAt(MINUTE)));

    // Going to background re-evaluates with the catch-all spec
    foreground.set(false);
    eventually(|| deferred.last() == Some(WakeupCall::ScheduleAt(60 * MINUTE))).await;
    assert_eq!(in_process.last(), Some(WakeupCall::Cancel));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    manager.shutdown();
}

/// Integration test: explicit input bypasses the default supplier
#[tokio::test]
async fn test_explicit_input() {
    let clock = ManualClock::new(0);
    let manager = manager(Arc::new(MemoryRecordStore::new()), &clock, Arc::new(RecordingWakeup::new()));

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let log = seen.clone();
    let action = UpdateAction::with_input(
        "geo",
        move |ip: String| {
            log.lock().unwrap().push(ip.clone());
            async move { ActionResult::success(ip.len()) }
        },
        || async { "0.0.0.0".to_string() },
    );
    manager.register(&action, [UpdateSpec::new(MINUTE, [])]);
    manager.start().await.unwrap();

    assert_eq!(manager.execute_now_with(&action, "10.1.2.3".to_string()).await, 8);
    assert_eq!(*seen.lock().unwrap(), vec!["0.0.0.0".to_string(), "10.1.2.3".to_string()]);
    manager.shutdown();
}

/// Integration test: network loss suppresses execution, recovery runs a pass
#[tokio::test]
async fn test_network_recovery_runs_due_actions() {
    let clock = ManualClock::new(0);
    let (network_tx, network_rx) = watch::channel(true);
    let manager = ManagerBuilder::new(Arc::new(MemoryRecordStore::new()))
        .clock(Arc::new(clock.clone()))
        .jitter(Arc::new(FixedJitter(0.0)))
        .wakeup(Arc::new(RecordingWakeup::new()))
        .network(network_rx)
        .build()
        .unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    manager.register(&counting("servers", &calls), [UpdateSpec::new(MINUTE, [])]);
    manager.start().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    network_tx.send_replace(false);
    clock.set(MINUTE);
    manager.process_periodic().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    network_tx.send_replace(true);
    eventually(|| calls.load(Ordering::SeqCst) == 2).await;
    manager.shutdown();
}

/// Integration test: the default in-process timer wakes the manager up
#[tokio::test(start_paused = true)]
async fn test_timer_wakeup_drives_execution() {
    let clock = ManualClock::new(0);
    let manager = ManagerBuilder::new(Arc::new(MemoryRecordStore::new()))
        .clock(Arc::new(clock.clone()))
        .jitter(Arc::new(FixedJitter(0.0)))
        .build()
        .unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    manager.register(&counting("servers", &calls), [UpdateSpec::new(1000, [])]);
    manager.start().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    clock.set(1000);
    tokio::time::sleep(Duration::from_millis(1000)).await;
    eventually(|| calls.load(Ordering::SeqCst) == 2).await;
    assert_eq!(manager.record("servers").unwrap().timestamp, 1000);
    manager.shutdown();
}

/// Counts how often the manager hands a timestamp to the timer.
struct CountingTimer {
    timer: TimerWakeup,
    scheduled: AtomicU32,
}

impl WakeupScheduler for CountingTimer {
    fn schedule_at(&self, timestamp_ms: u64) {
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        self.timer.schedule_at(timestamp_ms);
    }

    fn cancel(&self) {
        self.timer.cancel();
    }
}

/// Integration test: an overdue action stays quiet while offline
#[tokio::test]
async fn test_timer_stays_idle_while_offline() {
    let clock = ManualClock::new(10 * MINUTE);
    let (network_tx, network_rx) = watch::channel(false);
    let store = MemoryRecordStore::with_records([CallRecord::new("servers", 0, true, 0.0)]);
    let builder = ManagerBuilder::new(Arc::new(store))
        .clock(Arc::new(clock.clone()))
        .jitter(Arc::new(FixedJitter(0.0)))
        .network(network_rx);
    let wakeup = Arc::new(CountingTimer {
        timer: TimerWakeup::new(Arc::new(clock.clone()), builder.trigger_sender()),
        scheduled: AtomicU32::new(0),
    });
    let manager = builder.wakeup(wakeup.clone()).build().unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    manager.register(&counting("servers", &calls), [UpdateSpec::new(MINUTE, [])]);
    manager.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(wakeup.scheduled.load(Ordering::SeqCst), 0);
    assert_eq!(wakeup.timer.pending_at(), None);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    network_tx.send_replace(true);
    eventually(|| wakeup.timer.pending_at() == Some(11 * MINUTE)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    manager.shutdown();
}
