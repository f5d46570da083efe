use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::config::PanelConfig;
use crate::console::{log_grew, LogReconciler};
use crate::ports::bot_api::{config_from_json, BotApi, ConfigMap};
use crate::sync::{
    ActionConfirmer, AdaptivePoller, Clock, ConfirmOptions, Confirmation, PollerHandle,
    RetryPolicy, RetryingTransport, TransportError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl RunState {
    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running)
    }

    /// A start or stop is in flight; both buttons stay disabled.
    pub fn is_pending(&self) -> bool {
        matches!(self, RunState::Starting | RunState::Stopping)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    ConfigLoadFailed,
    StatusLoadFailed,
    ConfigSaved,
    ConfigSaveFailed,
    StartFailed,
    StartUnconfirmed,
    StopFailed,
    StopUnconfirmed,
    InputFailed,
    BotNotRunning,
}

/// User-facing message, at most one per user action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelSnapshot {
    pub config: ConfigMap,
    pub run_state: RunState,
    pub bot_loading: bool,
    pub saving: bool,
    pub output: Vec<String>,
    pub scroll_to_end: bool,
    pub input: String,
}

#[derive(Debug, Default)]
struct PanelState {
    config: ConfigMap,
    run_state: RunState,
    saving: bool,
    output: Vec<String>,
    scroll_to_end: bool,
    input: String,
    notices: Vec<Notice>,
}

impl PanelState {
    fn notify(&mut self, kind: NoticeKind, severity: Severity, message: String) {
        match severity {
            Severity::Success => log::info!("[PANEL] {}", message),
            Severity::Warning | Severity::Error => log::warn!("[PANEL] {}", message),
        }
        self.notices.push(Notice {
            kind,
            severity,
            message,
        });
    }
}

fn lock(state: &Mutex<PanelState>) -> MutexGuard<'_, PanelState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Replaces runs of line breaks with a single space; commands are one line.
fn single_line(text: &str) -> String {
    let mut line = String::with_capacity(text.len());
    let mut in_break = false;
    for ch in text.chars() {
        if ch == '\r' || ch == '\n' {
            if !in_break {
                line.push(' ');
            }
            in_break = true;
        } else {
            line.push(ch);
            in_break = false;
        }
    }
    line
}

async fn fetch_output(
    transport: &RetryingTransport,
    api: &dyn BotApi,
) -> Result<Vec<String>, TransportError> {
    transport
        .execute("output", RetryPolicy::single(), move || api.get_output())
        .await
        .map(|response| response.output)
}

/// Full-batch replace: the server's batch is authoritative.
fn apply_output(state: &Mutex<PanelState>, reconciler: &LogReconciler, batch: Vec<String>) {
    let reconciled = reconciler.reconcile(&batch);
    let mut st = lock(state);
    st.scroll_to_end = log_grew(&st.output, &reconciled);
    st.output = reconciled;
}

/// Keeps the panel's view of the bot (config, run state, output) in sync with the server.
pub struct SyncController {
    api: Arc<dyn BotApi>,
    transport: RetryingTransport,
    confirmer: ActionConfirmer,
    poller: AdaptivePoller,
    reconciler: Arc<LogReconciler>,
    retry: RetryPolicy,
    confirm: ConfirmOptions,
    state: Arc<Mutex<PanelState>>,
    session: CancellationToken,
    output_poller: Mutex<Option<PollerHandle>>,
}

impl SyncController {
    pub fn new(cfg: &PanelConfig, api: Arc<dyn BotApi>, clock: Arc<dyn Clock>) -> Self {
        let transport = RetryingTransport::new(clock.clone());
        let confirmer =
            ActionConfirmer::new(api.clone(), transport.clone(), clock.clone(), cfg.retry);
        Self {
            api,
            transport,
            confirmer,
            poller: AdaptivePoller::new(clock, cfg.poller),
            reconciler: Arc::new(cfg.reconciler()),
            retry: cfg.retry,
            confirm: cfg.confirm,
            state: Arc::new(Mutex::new(PanelState::default())),
            session: CancellationToken::new(),
            output_poller: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> PanelSnapshot {
        let st = lock(&self.state);
        PanelSnapshot {
            config: st.config.clone(),
            run_state: st.run_state,
            bot_loading: st.run_state.is_pending(),
            saving: st.saving,
            output: st.output.clone(),
            scroll_to_end: st.scroll_to_end,
            input: st.input.clone(),
        }
    }

    pub fn run_state(&self) -> RunState {
        lock(&self.state).run_state
    }

    pub fn config(&self) -> ConfigMap {
        lock(&self.state).config.clone()
    }

    pub fn drain_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut lock(&self.state).notices)
    }

    pub fn set_field(&self, key: &str, value: &str) {
        lock(&self.state)
            .config
            .insert(key.to_string(), value.to_string());
    }

    pub fn set_input(&self, text: &str) {
        lock(&self.state).input = single_line(text);
    }

    /// Fetches config and status once, concurrently. Either may fail on its own.
    pub async fn load_initial(&self) {
        let abort = self.session.child_token();
        let api = self.api.as_ref();
        let (config, status) = tokio::join!(
            self.transport
                .execute_with_abort("config", self.retry, &abort, move || api.get_config()),
            self.transport
                .execute_with_abort("status", self.retry, &abort, move || api.get_status()),
        );
        if self.session.is_cancelled() {
            return;
        }

        let mut st = lock(&self.state);
        match config {
            Ok(document) => match config_from_json(document) {
                Some(map) => st.config = map,
                None => log::warn!("[PANEL] ignoring config response that is not an object"),
            },
            Err(err) if err.is_cancelled() => {}
            Err(err) => st.notify(
                NoticeKind::ConfigLoadFailed,
                Severity::Error,
                format!("Failed to load config: {}", err),
            ),
        }
        match status {
            Ok(status) if !st.run_state.is_pending() => {
                st.run_state = if status.running {
                    RunState::Running
                } else {
                    RunState::Stopped
                };
            }
            Ok(_) => {}
            Err(err) if err.is_cancelled() => {}
            Err(err) => st.notify(
                NoticeKind::StatusLoadFailed,
                Severity::Error,
                format!("Failed to load bot status: {}", err),
            ),
        }
    }

    /// Posts the full config. Local values stay as edited whether or not the save lands.
    pub async fn save_config(&self, new_config: ConfigMap) -> bool {
        {
            let mut st = lock(&self.state);
            st.config = new_config.clone();
            st.saving = true;
        }

        let api = self.api.as_ref();
        let config = &new_config;
        let result = self
            .transport
            .execute("save config", self.retry, move || api.save_config(config))
            .await;

        let mut st = lock(&self.state);
        st.saving = false;
        if self.session.is_cancelled() {
            return false;
        }
        match result {
            Ok(()) => {
                st.notify(
                    NoticeKind::ConfigSaved,
                    Severity::Success,
                    "Config saved!".to_string(),
                );
                true
            }
            Err(err) => {
                st.notify(
                    NoticeKind::ConfigSaveFailed,
                    Severity::Error,
                    format!("Failed to save config: {}", err),
                );
                false
            }
        }
    }

    pub async fn save_current(&self) -> bool {
        let config = self.config();
        self.save_config(config).await
    }

    pub async fn start(&self) -> bool {
        self.switch_bot(true).await
    }

    /// On confirmation the output view and pending input are reset.
    pub async fn stop(&self) -> bool {
        self.switch_bot(false).await
    }

    async fn switch_bot(&self, expected_running: bool) -> bool {
        let (settled, pending, verb) = if expected_running {
            (RunState::Stopped, RunState::Starting, "start")
        } else {
            (RunState::Running, RunState::Stopping, "stop")
        };

        {
            let mut st = lock(&self.state);
            if st.run_state != settled {
                log::warn!("[PANEL] {} ignored while {:?}", verb, st.run_state);
                return false;
            }
            st.run_state = pending;
        }

        let api = self.api.as_ref();
        let outcome = self
            .confirmer
            .confirm_detailed(
                expected_running,
                move || {
                    if expected_running {
                        api.start()
                    } else {
                        api.stop()
                    }
                },
                &self.confirm,
                &self.session,
            )
            .await;
        if self.session.is_cancelled() {
            return false;
        }

        let mut st = lock(&self.state);
        let waited = self.confirm.confirm_timeout.as_secs_f64();
        match outcome {
            Confirmation::Confirmed => {
                if expected_running {
                    st.run_state = RunState::Running;
                } else {
                    st.run_state = RunState::Stopped;
                    st.output.clear();
                    st.input.clear();
                    st.scroll_to_end = false;
                }
                true
            }
            Confirmation::ActionFailed(err) => {
                st.run_state = settled;
                let kind = if expected_running {
                    NoticeKind::StartFailed
                } else {
                    NoticeKind::StopFailed
                };
                st.notify(
                    kind,
                    Severity::Error,
                    format!("Failed to {} bot: {}", verb, err),
                );
                false
            }
            Confirmation::Unconfirmed => {
                st.run_state = settled;
                let (kind, message) = if expected_running {
                    (
                        NoticeKind::StartUnconfirmed,
                        format!(
                            "Start requested, but the bot did not report running within {:.1}s.",
                            waited
                        ),
                    )
                } else {
                    (
                        NoticeKind::StopUnconfirmed,
                        format!(
                            "Stop requested, but the bot still reported running after {:.1}s.",
                            waited
                        ),
                    )
                };
                st.notify(kind, Severity::Error, message);
                false
            }
            Confirmation::Cancelled => false,
        }
    }

    /// Sends one command line. Blank text is ignored; the input buffer is cleared
    /// after any attempt.
    pub async fn send_input(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        let line = single_line(text);
        let api = self.api.as_ref();
        let command = line.as_str();
        let result = self
            .transport
            .execute("input", self.retry, move || api.send_input(command))
            .await;

        let mut st = lock(&self.state);
        st.input.clear();
        if self.session.is_cancelled() {
            return false;
        }
        match result {
            Ok(ack) if ack.is_not_running() => {
                st.notify(
                    NoticeKind::BotNotRunning,
                    Severity::Warning,
                    format!("Bot is not running; '{}' was not delivered.", line),
                );
                false
            }
            Ok(_) => true,
            Err(err) => {
                st.notify(
                    NoticeKind::InputFailed,
                    Severity::Error,
                    format!("Failed to send input: {}", err),
                );
                false
            }
        }
    }

    pub async fn submit_input(&self) -> bool {
        let text = lock(&self.state).input.clone();
        self.send_input(&text).await
    }

    /// One output cycle: fetch the batch, reconcile, replace the stored log.
    pub async fn poll_output(&self) -> Result<(), TransportError> {
        let batch = fetch_output(&self.transport, self.api.as_ref()).await?;
        if !self.session.is_cancelled() {
            apply_output(&self.state, &self.reconciler, batch);
        }
        Ok(())
    }

    /// Starts the session's output poller; a no-op while one is active.
    pub fn start_output_polling(&self) {
        let mut slot = self
            .output_poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|handle| !handle.is_cancelled()) {
            return;
        }

        let api = self.api.clone();
        let transport = self.transport.clone();
        let state = self.state.clone();
        let reconciler = self.reconciler.clone();
        let handle = self.poller.start(
            &self.session,
            move || {
                let api = api.clone();
                let transport = transport.clone();
                async move { fetch_output(&transport, api.as_ref()).await }
            },
            move |batch| apply_output(&state, &reconciler, batch),
        );
        log::info!(
            "[PANEL] output polling started (every {}ms when healthy)",
            self.poller.options().initial_delay.as_millis()
        );
        *slot = Some(handle);
    }

    /// Ends the session: stops the poller and discards any result still in flight.
    pub async fn teardown(&self) {
        self.session.cancel();
        let handle = self
            .output_poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        log::info!("[PANEL] session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::bot_api::{InputAck, StatusResponse};
    use crate::ports::scripted_api::{http_error, ScriptedApi};
    use crate::sync::clock::ManualClock;
    use serde_json::json;

    fn controller(api: &Arc<ScriptedApi>) -> (Arc<ManualClock>, SyncController) {
        let clock = Arc::new(ManualClock::new());
        let controller = SyncController::new(&PanelConfig::default(), api.clone(), clock.clone());
        (clock, controller)
    }

    fn running(running: bool) -> Result<StatusResponse, TransportError> {
        Ok(StatusResponse { running })
    }

    fn kinds(notices: &[Notice]) -> Vec<NoticeKind> {
        notices.iter().map(|n| n.kind).collect()
    }

    async fn running_controller(api: &Arc<ScriptedApi>) -> SyncController {
        api.push_status(running(true));
        let (_clock, controller) = controller(api);
        controller.load_initial().await;
        assert_eq!(controller.run_state(), RunState::Running);
        controller
    }

    #[tokio::test]
    async fn load_initial_fills_config_and_status() {
        let api = Arc::new(ScriptedApi::new());
        api.push_config(Ok(json!({"IBKR_PORT": 7496, "UNDERLYING_SYMBOL": "SPX"})));
        api.push_status(running(true));
        let (_clock, controller) = controller(&api);

        controller.load_initial().await;

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.config["IBKR_PORT"], "7496");
        assert_eq!(snapshot.config["UNDERLYING_SYMBOL"], "SPX");
        assert_eq!(snapshot.run_state, RunState::Running);
        assert!(controller.drain_notices().is_empty());
    }

    #[tokio::test]
    async fn config_failure_does_not_block_status() {
        let api = Arc::new(ScriptedApi::new());
        api.set_config_fallback(Err(http_error(500)));
        api.push_status(running(true));
        let (_clock, controller) = controller(&api);

        controller.load_initial().await;

        assert_eq!(api.calls("config"), 3);
        assert_eq!(controller.run_state(), RunState::Running);
        assert_eq!(
            kinds(&controller.drain_notices()),
            vec![NoticeKind::ConfigLoadFailed]
        );
    }

    #[tokio::test]
    async fn both_initial_loads_report_separately() {
        let api = Arc::new(ScriptedApi::new());
        api.set_config_fallback(Err(TransportError::Network("refused".into())));
        api.set_status_fallback(Err(TransportError::Network("refused".into())));
        let (_clock, controller) = controller(&api);

        controller.load_initial().await;

        assert_eq!(
            kinds(&controller.drain_notices()),
            vec![NoticeKind::ConfigLoadFailed, NoticeKind::StatusLoadFailed]
        );
        assert_eq!(controller.run_state(), RunState::Stopped);
    }

    #[tokio::test]
    async fn unexpected_config_shape_is_ignored_quietly() {
        let api = Arc::new(ScriptedApi::new());
        api.push_config(Ok(json!(["not", "a", "map"])));
        let (_clock, controller) = controller(&api);
        controller.set_field("IBKR_HOST", "10.0.0.2");

        controller.load_initial().await;

        assert_eq!(controller.config()["IBKR_HOST"], "10.0.0.2");
        assert!(controller.drain_notices().is_empty());
    }

    #[tokio::test]
    async fn torn_down_session_skips_initial_load() {
        let api = Arc::new(ScriptedApi::new());
        api.push_config(Ok(json!({"IBKR_PORT": "7496"})));
        let (_clock, controller) = controller(&api);

        controller.teardown().await;
        controller.load_initial().await;

        assert_eq!(api.calls("config"), 0);
        assert!(controller.config().is_empty());
        assert!(controller.drain_notices().is_empty());
    }

    #[tokio::test]
    async fn start_walks_through_starting_to_running() {
        let api = Arc::new(ScriptedApi::new());
        api.push_status(running(false));
        api.push_status(running(true));
        let (_clock, controller) = controller(&api);

        let mut seen = vec![controller.run_state()];
        let observer = async {
            for _ in 0..20 {
                seen.push(controller.run_state());
                tokio::task::yield_now().await;
            }
        };
        let (confirmed, ()) = tokio::join!(controller.start(), observer);
        seen.push(controller.run_state());
        seen.dedup();

        assert!(confirmed);
        assert_eq!(
            seen,
            vec![RunState::Stopped, RunState::Starting, RunState::Running]
        );
        assert_eq!(api.calls("status"), 2);
        assert!(controller.drain_notices().is_empty());
    }

    #[tokio::test]
    async fn unconfirmed_start_reverts_with_distinct_notice() {
        let api = Arc::new(ScriptedApi::new());
        let (clock, controller) = controller(&api);

        assert!(!controller.start().await);

        assert_eq!(controller.run_state(), RunState::Stopped);
        assert_eq!(api.calls("status"), 15);
        assert_eq!(clock.elapsed(), std::time::Duration::from_millis(6000));
        let notices = controller.drain_notices();
        assert_eq!(kinds(&notices), vec![NoticeKind::StartUnconfirmed]);
        assert!(notices[0].message.contains("6.0s"));
    }

    #[tokio::test]
    async fn failed_start_request_reverts_without_polling() {
        let api = Arc::new(ScriptedApi::new());
        api.set_start_fallback(Err(TransportError::Network("refused".into())));
        let (_clock, controller) = controller(&api);

        assert!(!controller.start().await);

        assert_eq!(controller.run_state(), RunState::Stopped);
        assert_eq!(api.calls("start"), 3);
        assert_eq!(api.calls("status"), 0);
        assert_eq!(
            kinds(&controller.drain_notices()),
            vec![NoticeKind::StartFailed]
        );
    }

    #[tokio::test]
    async fn start_is_refused_unless_stopped() {
        let api = Arc::new(ScriptedApi::new());
        let controller = running_controller(&api).await;

        assert!(!controller.start().await);

        assert_eq!(api.calls("start"), 0);
        assert_eq!(controller.run_state(), RunState::Running);
        assert!(controller.drain_notices().is_empty());
    }

    #[tokio::test]
    async fn confirmed_stop_clears_output_and_input() {
        let api = Arc::new(ScriptedApi::new());
        api.push_output(Ok(vec!["[TS:1] Connected", "[TS:2] Staged 1 order(s)."]));
        let controller = running_controller(&api).await;
        controller.poll_output().await.unwrap();
        controller.set_input("status");
        assert_eq!(controller.snapshot().output.len(), 2);

        assert!(controller.stop().await);

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.run_state, RunState::Stopped);
        assert!(snapshot.output.is_empty());
        assert!(snapshot.input.is_empty());
        assert!(!snapshot.bot_loading);
    }

    #[tokio::test]
    async fn unconfirmed_stop_keeps_running_and_output() {
        let api = Arc::new(ScriptedApi::new());
        api.push_output(Ok(vec!["Connected"]));
        let controller = running_controller(&api).await;
        controller.poll_output().await.unwrap();
        api.set_status_fallback(running(true));

        assert!(!controller.stop().await);

        assert_eq!(controller.run_state(), RunState::Running);
        assert_eq!(controller.snapshot().output, vec!["Connected".to_string()]);
        assert_eq!(
            kinds(&controller.drain_notices()),
            vec![NoticeKind::StopUnconfirmed]
        );
    }

    #[tokio::test]
    async fn failed_stop_reports_stop_failure() {
        let api = Arc::new(ScriptedApi::new());
        let controller = running_controller(&api).await;
        api.set_stop_fallback(Err(http_error(500)));

        assert!(!controller.stop().await);

        assert_eq!(controller.run_state(), RunState::Running);
        assert_eq!(
            kinds(&controller.drain_notices()),
            vec![NoticeKind::StopFailed]
        );
    }

    #[tokio::test]
    async fn failed_save_keeps_edited_values() {
        let api = Arc::new(ScriptedApi::new());
        api.push_config(Ok(json!({"IBKR_PORT": "7496", "IBKR_HOST": "127.0.0.1"})));
        api.set_save_fallback(Err(http_error(500)));
        let (_clock, controller) = controller(&api);
        controller.load_initial().await;

        let mut edited = controller.config();
        edited.insert("IBKR_PORT".into(), "7497".into());
        assert!(!controller.save_config(edited.clone()).await);

        assert_eq!(api.calls("save"), 3);
        assert_eq!(controller.config(), edited);
        assert!(!controller.snapshot().saving);
        let notices = controller.drain_notices();
        assert_eq!(kinds(&notices), vec![NoticeKind::ConfigSaveFailed]);
        assert_eq!(notices[0].severity, Severity::Error);
    }

    #[tokio::test]
    async fn save_posts_full_map_and_notifies() {
        let api = Arc::new(ScriptedApi::new());
        let (_clock, controller) = controller(&api);
        controller.set_field("IBKR_ACCOUNT", "U123");
        controller.set_field("SNAPMID_OFFSET", "0.1");

        assert!(controller.save_current().await);

        let saved = api.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0]["IBKR_ACCOUNT"], "U123");
        assert_eq!(saved[0]["SNAPMID_OFFSET"], "0.1");
        assert_eq!(
            kinds(&controller.drain_notices()),
            vec![NoticeKind::ConfigSaved]
        );
    }

    #[tokio::test]
    async fn blank_input_is_a_no_op() {
        let api = Arc::new(ScriptedApi::new());
        let (_clock, controller) = controller(&api);

        assert!(!controller.send_input("").await);
        assert!(!controller.send_input("  \t ").await);
        assert_eq!(api.calls("input"), 0);
    }

    #[tokio::test]
    async fn input_is_sent_as_single_line_and_buffer_cleared() {
        let api = Arc::new(ScriptedApi::new());
        let (_clock, controller) = controller(&api);
        controller.set_input("cancel\r\n\r\nall");
        assert_eq!(controller.snapshot().input, "cancel all");

        assert!(controller.submit_input().await);

        assert_eq!(api.inputs(), vec!["cancel all".to_string()]);
        assert!(controller.snapshot().input.is_empty());
    }

    #[tokio::test]
    async fn failed_input_still_clears_buffer() {
        let api = Arc::new(ScriptedApi::new());
        api.set_input_fallback(Err(http_error(502)));
        let (clock, controller) = controller(&api);
        controller.set_input("y");

        assert!(!controller.submit_input().await);

        assert_eq!(api.calls("input"), 3);
        assert_eq!(clock.sleeps().len(), 2);
        assert!(controller.snapshot().input.is_empty());
        assert_eq!(
            kinds(&controller.drain_notices()),
            vec![NoticeKind::InputFailed]
        );
    }

    #[tokio::test]
    async fn not_running_ack_is_a_warning() {
        let api = Arc::new(ScriptedApi::new());
        api.set_input_fallback(Ok(InputAck {
            status: Some("not_running".into()),
        }));
        let (_clock, controller) = controller(&api);

        assert!(!controller.send_input("y").await);

        let notices = controller.drain_notices();
        assert_eq!(kinds(&notices), vec![NoticeKind::BotNotRunning]);
        assert_eq!(notices[0].severity, Severity::Warning);
    }

    #[tokio::test]
    async fn poll_output_replaces_with_reconciled_batch() {
        let api = Arc::new(ScriptedApi::new());
        api.push_output(Ok(vec![
            "[TS:1] hello",
            "[TS:2] Waiting for market open: 10s",
            "[TS:3] Waiting for market open: 5s",
        ]));
        api.push_output(Ok(vec![
            "[TS:1] hello",
            "[TS:4] Waiting for market open: 4s",
        ]));
        api.push_output(Ok(vec!["[TS:1] hello", "[TS:5] Market is open!", "[TS:6] GO"]));
        api.push_output(Ok(vec!["[TS:9] restarted"]));
        let (_clock, controller) = controller(&api);

        controller.poll_output().await.unwrap();
        let first = controller.snapshot();
        assert_eq!(
            first.output,
            vec![
                "[TS:1] hello".to_string(),
                "[TS:3] Waiting for market open: 5s".to_string()
            ]
        );
        assert!(first.scroll_to_end);

        controller.poll_output().await.unwrap();
        let second = controller.snapshot();
        assert_eq!(second.output.len(), 2);
        assert_eq!(second.output[1], "[TS:4] Waiting for market open: 4s");
        assert!(!second.scroll_to_end);

        controller.poll_output().await.unwrap();
        assert!(controller.snapshot().scroll_to_end);

        controller.poll_output().await.unwrap();
        let shorter = controller.snapshot();
        assert_eq!(shorter.output, vec!["[TS:9] restarted".to_string()]);
        assert!(!shorter.scroll_to_end);
    }

    #[tokio::test]
    async fn poll_output_failure_leaves_log_and_stays_quiet() {
        let api = Arc::new(ScriptedApi::new());
        api.push_output(Ok(vec!["kept"]));
        api.push_output(Err(http_error(503)));
        let (_clock, controller) = controller(&api);

        controller.poll_output().await.unwrap();
        assert!(controller.poll_output().await.is_err());

        assert_eq!(api.calls("output"), 2);
        assert_eq!(controller.snapshot().output, vec!["kept".to_string()]);
        assert!(controller.drain_notices().is_empty());
    }

    #[tokio::test]
    async fn output_poller_runs_until_teardown() {
        let api = Arc::new(ScriptedApi::new());
        api.set_output_fallback(Ok(vec![
            "[TS:1] Connected",
            "[TS:2] Live SPX Price: 6001",
            "[TS:3] Live SPX Price: 6002",
        ]));
        let (_clock, controller) = controller(&api);

        controller.start_output_polling();
        controller.start_output_polling();
        while api.calls("output") < 2 {
            tokio::task::yield_now().await;
        }
        controller.teardown().await;
        let calls_at_teardown = api.calls("output");
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        assert_eq!(api.calls("output"), calls_at_teardown);
        assert_eq!(
            controller.snapshot().output,
            vec![
                "[TS:1] Connected".to_string(),
                "[TS:3] Live SPX Price: 6002".to_string()
            ]
        );
    }
}
