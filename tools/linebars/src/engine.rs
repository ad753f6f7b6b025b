use crate::channel::{CompletionSignal, MessageSource, Poll};
use crate::dispatcher::route;
use crate::errors::LinebarsError;
use crate::interrupt::CancelFlag;
use crate::logging::{append_run_log, structured_fallback_line};
use crate::registry::Registry;
use crate::terminal::Terminal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    pub poll_timeout_ms: u64,
    pub grace_period_ms: u64,
    pub reset_payload: String,
    pub reset_preserves_identity: bool,
    pub show_index: bool,
    pub log_messages: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 100,
            grace_period_ms: 250,
            reset_payload: "reset".to_string(),
            reset_preserves_identity: true,
            show_index: false,
            log_messages: true,
        }
    }
}

impl EngineConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Draining,
    DrainingAllComplete,
    Closed,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Draining => "draining",
            Self::DrainingAllComplete => "draining_all_complete",
            Self::Closed => "closed",
        }
    }
}

/// What a single inbound message did to the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// No delimiter or unknown identity.
    Dropped,
    /// Routed, but no pattern matched.
    Unmatched,
    /// State changed but the rendered line is byte-identical; no terminal write.
    Unchanged,
    Repainted,
    Reset,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub received: u64,
    pub routed: u64,
    pub dropped: u64,
    pub resets: u64,
    pub repaints: u64,
    pub skipped: u64,
}

/// One multi-line display, from cursor-hide to cursor-restore.
///
/// The cursor is restored on `close` or, failing that, when the session is dropped
/// (including while unwinding).
pub struct Session<'t> {
    registry: Registry,
    terminal: &'t dyn Terminal,
    config: EngineConfig,
    state: EngineState,
    rendering: bool,
    cursor_hidden: bool,
    printed_complete: Vec<bool>,
    grace_deadline: Option<Instant>,
    cancel: Option<CancelFlag>,
    stats: EngineStats,
}

impl<'t> Session<'t> {
    pub fn open(
        registry: Registry,
        terminal: &'t dyn Terminal,
        config: EngineConfig,
    ) -> Result<Self, LinebarsError> {
        if config.poll_timeout_ms == 0 {
            return Err(LinebarsError::Configuration(
                "engine.poll_timeout_ms must be greater than zero".to_string(),
            ));
        }
        let lines = registry.len();
        let mut session = Self {
            printed_complete: vec![false; lines],
            registry,
            terminal,
            config,
            state: EngineState::Idle,
            rendering: true,
            cursor_hidden: false,
            grace_deadline: None,
            cancel: None,
            stats: EngineStats::default(),
        };
        session.start();
        Ok(session)
    }

    fn start(&mut self) {
        if self.terminal.is_tty() {
            match self.terminal.hide_cursor() {
                Ok(()) => self.cursor_hidden = true,
                Err(err) => self.disable_rendering(&err),
            }
        }
        for index in 0..self.registry.len() {
            let rendered = self.render(index);
            self.registry.store_render(index, rendered.clone());
            if self.terminal.is_tty() && self.rendering {
                let line = self.display_line(index, &rendered);
                if let Err(err) = self.terminal.write_line(&line) {
                    self.disable_rendering(&err);
                }
            }
        }
        self.state = EngineState::Draining;
        append_run_log(
            "info",
            "session.open",
            json!({
                "lines": self.registry.len(),
                "tty": self.terminal.is_tty(),
            }),
        );
        self.refresh_state();
    }

    /// Stop draining as soon as `cancel` is set; the owner then closes the session.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// False once a terminal write has failed; trackers keep updating regardless.
    pub fn rendering_enabled(&self) -> bool {
        self.rendering
    }

    /// Route one raw message to its line and repaint that line if its rendering changed.
    pub fn write(&mut self, raw: &str) -> WriteOutcome {
        self.stats.received += 1;
        if self.config.log_messages {
            append_run_log("debug", "session.message", json!({ "raw": raw }));
        }
        if self.state == EngineState::Closed {
            self.stats.dropped += 1;
            return WriteOutcome::Dropped;
        }

        let Some(routed) = route(&self.registry, raw) else {
            self.stats.dropped += 1;
            append_run_log("debug", "session.message.dropped", json!({ "raw": raw }));
            return WriteOutcome::Dropped;
        };
        self.stats.routed += 1;
        let index = routed.index;

        if routed.payload == self.config.reset_payload {
            return self.reset_line(index);
        }

        let (matched, complete) = match self.registry.tracker_mut(index) {
            Some(tracker) => (tracker.match_message(routed.payload), tracker.is_complete()),
            None => return WriteOutcome::Dropped,
        };
        if !matched {
            return WriteOutcome::Unmatched;
        }

        let rendered = self.render(index);
        let changed = self.registry.store_render(index, rendered.clone());
        let newly_complete = complete && !self.printed_complete[index];
        if newly_complete {
            self.printed_complete[index] = true;
            append_run_log(
                "info",
                "tracker.complete",
                json!({
                    "line": index,
                    "key": self.registry.key(index),
                }),
            );
        }
        self.refresh_state();

        if changed || newly_complete {
            self.paint(index, &rendered);
            WriteOutcome::Repainted
        } else {
            self.stats.skipped += 1;
            WriteOutcome::Unchanged
        }
    }

    fn reset_line(&mut self, index: usize) -> WriteOutcome {
        let preserve = self.config.reset_preserves_identity;
        if let Some(tracker) = self.registry.tracker_mut(index) {
            tracker.reset(preserve);
        }
        self.printed_complete[index] = false;
        self.stats.resets += 1;
        let rendered = self.render(index);
        self.registry.store_render(index, rendered.clone());
        append_run_log(
            "info",
            "tracker.reset",
            json!({
                "line": index,
                "key": self.registry.key(index),
                "preserve_identity": preserve,
            }),
        );
        self.refresh_state();
        self.paint(index, &rendered);
        WriteOutcome::Reset
    }

    /// Mark every line complete, e.g. once the orchestrator reports all jobs returned.
    pub fn complete_all(&mut self) {
        self.registry.complete_all();
        for index in 0..self.registry.len() {
            let rendered = self.render(index);
            let changed = self.registry.store_render(index, rendered.clone());
            let newly_complete = !self.printed_complete[index];
            self.printed_complete[index] = true;
            if changed || newly_complete {
                self.paint(index, &rendered);
            }
        }
        self.refresh_state();
    }

    /// Pull messages from `source` until producers are done or every line has
    /// completed and the grace period for trailing messages has passed.
    pub fn drain(&mut self, source: &mut dyn MessageSource, done: &dyn CompletionSignal) {
        let poll_timeout = self.config.poll_timeout();
        loop {
            if self.is_cancelled() {
                append_run_log(
                    "warn",
                    "session.cancelled",
                    json!({ "state": self.state.as_str() }),
                );
                return;
            }
            match self.state {
                EngineState::Idle | EngineState::Closed => return,
                EngineState::Draining => match source.poll(poll_timeout) {
                    Poll::Message(line) => {
                        self.write(&line);
                    }
                    Poll::Empty => {
                        if done.is_finished() {
                            self.drain_buffered(source);
                            return;
                        }
                    }
                    Poll::Disconnected => return,
                },
                EngineState::DrainingAllComplete => {
                    let remaining = self
                        .grace_deadline
                        .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                        .unwrap_or_default();
                    if remaining.is_zero() {
                        return;
                    }
                    match source.poll(remaining.min(poll_timeout)) {
                        Poll::Message(line) => {
                            self.write(&line);
                        }
                        Poll::Empty | Poll::Disconnected => return,
                    }
                }
            }
        }
    }

    fn drain_buffered(&mut self, source: &mut dyn MessageSource) {
        while let Poll::Message(line) = source.poll(Duration::ZERO) {
            self.write(&line);
        }
    }

    /// Drain `source` and close the session.
    pub fn run(
        mut self,
        source: &mut dyn MessageSource,
        done: &dyn CompletionSignal,
    ) -> Result<EngineStats, LinebarsError> {
        self.drain(source, done);
        self.close()
    }

    /// Final full render of every line, then restore the cursor.
    pub fn close(mut self) -> Result<EngineStats, LinebarsError> {
        self.finish()?;
        Ok(self.stats)
    }

    fn finish(&mut self) -> Result<(), LinebarsError> {
        if self.state == EngineState::Closed {
            return Ok(());
        }
        for index in 0..self.registry.len() {
            let rendered = self.render(index);
            self.registry.store_render(index, rendered.clone());
            self.paint(index, &rendered);
        }
        self.state = EngineState::Closed;
        append_run_log(
            "info",
            "session.close",
            serde_json::to_value(self.stats).unwrap_or_default(),
        );
        if self.cursor_hidden {
            self.cursor_hidden = false;
            self.terminal.show_cursor()?;
        }
        Ok(())
    }

    fn refresh_state(&mut self) {
        let all_complete = self.registry.all_complete();
        match self.state {
            EngineState::Draining if all_complete => {
                self.state = EngineState::DrainingAllComplete;
                self.grace_deadline = Some(Instant::now() + self.config.grace_period());
            }
            EngineState::DrainingAllComplete if !all_complete => {
                self.state = EngineState::Draining;
                self.grace_deadline = None;
            }
            _ => {}
        }
    }

    fn render(&self, index: usize) -> String {
        self.registry
            .tracker(index)
            .map(|tracker| tracker.render())
            .unwrap_or_default()
    }

    fn display_line(&self, index: usize, rendered: &str) -> String {
        if self.config.show_index {
            format!("{index}: {rendered}")
        } else {
            rendered.to_string()
        }
    }

    fn paint(&mut self, index: usize, rendered: &str) {
        if !self.rendering {
            return;
        }
        let result = if self.terminal.is_tty() {
            let rows_up = u16::try_from(self.registry.len() - index).unwrap_or(u16::MAX);
            let line = self.display_line(index, rendered);
            self.terminal.repaint_row(rows_up, &line)
        } else {
            let key = self.registry.key(index).unwrap_or_default();
            self.terminal
                .write_line(&structured_fallback_line(index, key, rendered))
        };
        match result {
            Ok(()) => self.stats.repaints += 1,
            Err(err) => self.disable_rendering(&err),
        }
    }

    fn disable_rendering(&mut self, err: &LinebarsError) {
        self.rendering = false;
        append_run_log(
            "warn",
            "session.rendering_disabled",
            json!({ "error": err.to_string(), "state": self.state.as_str() }),
        );
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if self.state == EngineState::Closed {
            return;
        }
        // Skip the final render while unwinding; only the cursor matters then.
        if std::thread::panicking() {
            if self.cursor_hidden {
                let _ = self.terminal.show_cursor();
            }
            return;
        }
        let _ = self.finish();
    }
}
