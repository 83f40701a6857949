use hushmic_agent::{
    ActivityWorker, ControlError, ControllerRegistry, EnabledApps, MuteController, MuteOrchestrator,
    SignalScope, Transition,
};
use hushmic_protocol::{ApplicationKind, MuteTriState, OrchestratorStatus};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type CallLog = Arc<Mutex<Vec<(ApplicationKind, &'static str)>>>;

struct MockController {
    kind: ApplicationKind,
    running: bool,
    state: Mutex<MuteTriState>,
    mute_ok: bool,
    unmute_ok: bool,
    calls: CallLog,
}

impl MockController {
    fn new(kind: ApplicationKind, state: MuteTriState, calls: &CallLog) -> Self {
        Self {
            kind,
            running: true,
            state: Mutex::new(state),
            mute_ok: true,
            unmute_ok: true,
            calls: Arc::clone(calls),
        }
    }

    fn stopped(mut self) -> Self {
        self.running = false;
        self
    }

    fn failing_mute(mut self) -> Self {
        self.mute_ok = false;
        self
    }

    fn failing_unmute(mut self) -> Self {
        self.unmute_ok = false;
        self
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push((self.kind, call));
    }
}

impl MuteController for MockController {
    fn kind(&self) -> ApplicationKind {
        self.kind
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn is_muted(&self) -> MuteTriState {
        *self.state.lock().unwrap()
    }

    fn mute(&self) -> bool {
        self.record("mute");
        if self.mute_ok {
            *self.state.lock().unwrap() = MuteTriState::Muted;
        }
        self.mute_ok
    }

    fn unmute(&self) -> bool {
        self.record("unmute");
        if self.unmute_ok {
            *self.state.lock().unwrap() = MuteTriState::Unmuted;
        }
        self.unmute_ok
    }
}

#[derive(Clone, Default)]
struct SharedEnabled(Arc<Mutex<BTreeSet<ApplicationKind>>>);

impl EnabledApps for SharedEnabled {
    fn enabled_apps(&self) -> BTreeSet<ApplicationKind> {
        self.0.lock().unwrap().clone()
    }
}

fn all_enabled() -> Box<dyn EnabledApps> {
    Box::new(ApplicationKind::ALL.into_iter().collect::<BTreeSet<_>>())
}

fn orchestrator(controllers: Vec<MockController>, enabled: Box<dyn EnabledApps>) -> MuteOrchestrator {
    let registry = ControllerRegistry::with_controllers(
        controllers
            .into_iter()
            .map(|c| Box::new(c) as Box<dyn MuteController>),
    );
    MuteOrchestrator::new(registry, enabled)
}

fn muted_sets(updates: &[OrchestratorStatus]) -> Vec<Vec<ApplicationKind>> {
    updates
        .iter()
        .map(|s| s.muted_applications.iter().copied().collect())
        .collect()
}

fn calls(log: &CallLog) -> Vec<(ApplicationKind, &'static str)> {
    log.lock().unwrap().clone()
}

#[test]
fn clean_cycle_mutes_then_restores() {
    let log = CallLog::default();
    let orch = orchestrator(
        vec![MockController::new(ApplicationKind::Zoom, MuteTriState::Unmuted, &log)],
        all_enabled(),
    );
    let rx = orch.subscribe();

    assert_eq!(orch.on_activity_changed(true), Transition::Activated);
    let session = orch.session(SignalScope::Dictation).unwrap();
    assert_eq!(session.muted_by_us, [ApplicationKind::Zoom].into_iter().collect());
    assert_eq!(session.prior_state.get(&ApplicationKind::Zoom), Some(&MuteTriState::Unmuted));

    assert_eq!(orch.on_activity_changed(false), Transition::Restored);
    assert!(orch.session(SignalScope::Dictation).is_none());

    let updates: Vec<_> = rx.try_iter().collect();
    assert_eq!(
        muted_sets(&updates),
        vec![vec![], vec![ApplicationKind::Zoom], vec![]]
    );
    assert!(updates[1].activity_active);
    assert!(!updates[2].activity_active);
    assert_eq!(
        calls(&log),
        vec![(ApplicationKind::Zoom, "mute"), (ApplicationKind::Zoom, "unmute")]
    );
}

#[test]
fn already_muted_app_is_never_touched() {
    let log = CallLog::default();
    let orch = orchestrator(
        vec![MockController::new(ApplicationKind::Teams, MuteTriState::Muted, &log)],
        all_enabled(),
    );
    let rx = orch.subscribe();

    orch.on_activity_changed(true);
    let session = orch.session(SignalScope::Dictation).unwrap();
    assert!(session.muted_by_us.is_empty());
    assert_eq!(session.prior_state.get(&ApplicationKind::Teams), Some(&MuteTriState::Muted));
    orch.on_activity_changed(false);

    assert!(calls(&log).is_empty());
    let updates: Vec<_> = rx.try_iter().collect();
    assert!(muted_sets(&updates).iter().all(|s| s.is_empty()));
}

#[test]
fn unknown_state_is_muted_and_restored() {
    let log = CallLog::default();
    let orch = orchestrator(
        vec![MockController::new(ApplicationKind::Slack, MuteTriState::Unknown, &log)],
        all_enabled(),
    );

    orch.on_activity_changed(true);
    assert!(orch.status().muted_applications.contains(&ApplicationKind::Slack));
    orch.on_activity_changed(false);

    assert_eq!(
        calls(&log),
        vec![(ApplicationKind::Slack, "mute"), (ApplicationKind::Slack, "unmute")]
    );
}

#[test]
fn stopped_or_disabled_apps_are_left_out() {
    let log = CallLog::default();
    let enabled = SharedEnabled::default();
    enabled.0.lock().unwrap().extend([ApplicationKind::Zoom, ApplicationKind::Slack]);

    let orch = orchestrator(
        vec![
            MockController::new(ApplicationKind::Zoom, MuteTriState::Unmuted, &log),
            MockController::new(ApplicationKind::Slack, MuteTriState::Unmuted, &log).stopped(),
            MockController::new(ApplicationKind::Teams, MuteTriState::Unmuted, &log),
        ],
        Box::new(enabled.clone()),
    );

    orch.on_activity_changed(true);
    let status = orch.status();
    assert_eq!(status.muted_applications, [ApplicationKind::Zoom].into_iter().collect());
    assert_eq!(
        status.running_applications,
        vec![ApplicationKind::Zoom, ApplicationKind::Teams]
    );
    let session = orch.session(SignalScope::Dictation).unwrap();
    assert_eq!(session.prior_state.len(), 1);
    orch.on_activity_changed(false);

    assert_eq!(
        calls(&log),
        vec![(ApplicationKind::Zoom, "mute"), (ApplicationKind::Zoom, "unmute")]
    );

    // Enabled set is consulted afresh on the next activation.
    enabled.0.lock().unwrap().insert(ApplicationKind::Teams);
    orch.on_activity_changed(true);
    assert!(orch.status().muted_applications.contains(&ApplicationKind::Teams));
}

#[test]
fn nested_activation_is_ignored() {
    let log = CallLog::default();
    let orch = orchestrator(
        vec![MockController::new(ApplicationKind::Zoom, MuteTriState::Unmuted, &log)],
        all_enabled(),
    );

    assert_eq!(orch.on_activity_changed(true), Transition::Activated);
    assert_eq!(orch.on_activity_changed(true), Transition::Ignored);
    assert_eq!(calls(&log), vec![(ApplicationKind::Zoom, "mute")]);

    assert_eq!(orch.on_activity_changed(false), Transition::Restored);
    assert_eq!(orch.on_activity_changed(false), Transition::Ignored);
    assert_eq!(calls(&log).len(), 2);
}

#[test]
fn failed_unmute_still_closes_the_session() {
    let log = CallLog::default();
    let orch = orchestrator(
        vec![
            MockController::new(ApplicationKind::Zoom, MuteTriState::Unmuted, &log).failing_unmute(),
            MockController::new(ApplicationKind::Discord, MuteTriState::Unmuted, &log),
        ],
        all_enabled(),
    );

    orch.on_activity_changed(true);
    assert_eq!(orch.status().muted_applications.len(), 2);
    assert_eq!(orch.on_activity_changed(false), Transition::Restored);

    assert!(orch.session(SignalScope::Dictation).is_none());
    assert!(orch.status().muted_applications.is_empty());
    let unmuted: Vec<_> = calls(&log)
        .into_iter()
        .filter(|(_, c)| *c == "unmute")
        .map(|(k, _)| k)
        .collect();
    assert_eq!(unmuted, vec![ApplicationKind::Zoom, ApplicationKind::Discord]);
}

#[test]
fn failed_mute_is_not_restored() {
    let log = CallLog::default();
    let orch = orchestrator(
        vec![MockController::new(ApplicationKind::Webex, MuteTriState::Unmuted, &log).failing_mute()],
        all_enabled(),
    );

    orch.on_activity_changed(true);
    let session = orch.session(SignalScope::Dictation).unwrap();
    assert!(session.muted_by_us.is_empty());
    assert_eq!(session.prior_state.get(&ApplicationKind::Webex), Some(&MuteTriState::Unmuted));

    orch.on_activity_changed(false);
    assert_eq!(calls(&log), vec![(ApplicationKind::Webex, "mute")]);
}

#[test]
fn disabling_mid_session_restores() {
    let log = CallLog::default();
    let orch = orchestrator(
        vec![MockController::new(ApplicationKind::Skype, MuteTriState::Unmuted, &log)],
        all_enabled(),
    );

    orch.on_activity_changed(true);
    assert_eq!(orch.set_enabled(false), Transition::Restored);
    let status = orch.status();
    assert!(!status.enabled);
    assert!(status.activity_active);
    assert!(status.muted_applications.is_empty());

    assert_eq!(orch.on_activity_changed(false), Transition::Ignored);
    assert_eq!(orch.on_activity_changed(true), Transition::Ignored);
    assert!(orch.session(SignalScope::Dictation).is_none());
    assert_eq!(
        calls(&log),
        vec![(ApplicationKind::Skype, "mute"), (ApplicationKind::Skype, "unmute")]
    );
}

#[test]
fn manual_controls_bypass_the_session() {
    let log = CallLog::default();
    let orch = orchestrator(
        vec![
            MockController::new(ApplicationKind::Zoom, MuteTriState::Unmuted, &log),
            MockController::new(ApplicationKind::Slack, MuteTriState::Unmuted, &log).stopped(),
        ],
        all_enabled(),
    );

    orch.mute_app(ApplicationKind::Zoom).unwrap();
    assert_eq!(orch.app_mute_state(ApplicationKind::Zoom).unwrap(), MuteTriState::Muted);
    assert!(orch.session(SignalScope::Dictation).is_none());
    assert!(orch.status().muted_applications.is_empty());
    orch.unmute_app(ApplicationKind::Zoom).unwrap();

    assert!(matches!(
        orch.mute_app(ApplicationKind::Slack),
        Err(ControlError::NotRunning(ApplicationKind::Slack))
    ));
    assert!(matches!(
        orch.app_mute_state(ApplicationKind::Teams),
        Err(ControlError::ActionFailed(_))
    ));
}

#[test]
fn worker_applies_transitions_in_order_and_restores_on_shutdown() {
    let log = CallLog::default();
    let orch = Arc::new(orchestrator(
        vec![MockController::new(ApplicationKind::Zoom, MuteTriState::Unmuted, &log)],
        all_enabled(),
    ));
    let rx = orch.subscribe();

    let worker = ActivityWorker::spawn(Arc::clone(&orch), Duration::from_secs(3600)).unwrap();
    assert!(worker.notify(true));
    assert!(worker.notify(false));
    assert!(worker.notify(true));
    worker.shutdown();

    assert_eq!(
        calls(&log),
        vec![
            (ApplicationKind::Zoom, "mute"),
            (ApplicationKind::Zoom, "unmute"),
            (ApplicationKind::Zoom, "mute"),
            (ApplicationKind::Zoom, "unmute"),
        ]
    );
    assert!(orch.session(SignalScope::Dictation).is_none());

    let last = rx.try_iter().last().unwrap();
    assert!(last.muted_applications.is_empty());
    assert!(!last.activity_active);
}
