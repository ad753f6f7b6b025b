use crate::patterns::{Capture, PatternTable};
use crossterm::style::{Color, Stylize};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BarStyle {
    pub width: usize,
    pub fill_complete: char,
    pub fill_remaining: char,
    pub prefix: String,
    pub use_color: bool,
    pub show_prefix: bool,
    pub show_percentage: bool,
    pub show_fraction: bool,
    pub show_duration: bool,
    /// Show the bare count while the total is still unknown. Off by default, so
    /// count messages before a total leave the line byte-identical.
    pub show_count_without_total: bool,
}

impl Default for BarStyle {
    fn default() -> Self {
        Self {
            width: 50,
            fill_complete: '█',
            fill_remaining: ' ',
            prefix: "Processing".to_string(),
            use_color: false,
            show_prefix: true,
            show_percentage: true,
            show_fraction: true,
            show_duration: false,
            show_count_without_total: false,
        }
    }
}

/// Progress state for one display line, driven by free-text payloads.
#[derive(Debug, Clone)]
pub struct Tracker {
    patterns: Arc<PatternTable>,
    style: Arc<BarStyle>,
    identity: Option<String>,
    total: Option<u64>,
    count: u64,
    complete: bool,
    started_at: Option<Instant>,
    finished_after: Option<Duration>,
}

impl Tracker {
    pub fn new(patterns: Arc<PatternTable>, style: Arc<BarStyle>) -> Self {
        Self {
            patterns,
            style,
            identity: None,
            total: None,
            count: 0,
            complete: false,
            started_at: None,
            finished_after: None,
        }
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Apply every pattern category to `payload`. Returns true if any category matched.
    ///
    /// The identity is set once per lifecycle; later alias matches are accepted
    /// (they still count as a match) but do not replace it.
    pub fn match_message(&mut self, payload: &str) -> bool {
        let captures = self.patterns.captures(payload);
        for capture in &captures {
            match capture {
                Capture::Alias(value) => {
                    if self.identity.is_none() {
                        self.identity = Some(value.clone());
                    }
                }
                Capture::Total(value) => self.learn_total(*value),
                Capture::Count => self.increment(),
            }
        }
        !captures.is_empty()
    }

    fn learn_total(&mut self, total: u64) {
        self.total = Some(total);
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
        if self.count >= total {
            self.count = total;
            self.finish();
        }
    }

    fn increment(&mut self) {
        match self.total {
            Some(total) if self.count >= total => {}
            _ => self.count = self.count.saturating_add(1),
        }
        if let Some(total) = self.total {
            if self.count >= total {
                self.finish();
            }
        }
    }

    fn finish(&mut self) {
        if self.complete {
            return;
        }
        self.complete = true;
        self.finished_after = self.started_at.map(|started| started.elapsed());
    }

    /// Mark the line finished regardless of counters, e.g. once its job has returned.
    pub fn force_complete(&mut self) {
        if let Some(total) = self.total {
            self.count = total;
        }
        self.finish();
    }

    pub fn reset(&mut self, preserve_identity: bool) {
        self.total = None;
        self.count = 0;
        self.complete = false;
        self.started_at = None;
        self.finished_after = None;
        if !preserve_identity {
            self.identity = None;
        }
    }

    pub fn render(&self) -> String {
        self.render_at(Instant::now())
    }

    pub fn render_at(&self, now: Instant) -> String {
        let style = &self.style;
        let mut parts = Vec::new();
        if style.show_prefix && !style.prefix.is_empty() {
            parts.push(style.prefix.clone());
        }
        parts.push(format!("|{}|", self.render_bar()));

        match self.total {
            Some(total) => {
                if style.show_percentage {
                    parts.push(format!("{:>3}%", percentage(self.count, total)));
                }
                if style.show_fraction {
                    parts.push(format!("{}/{}", self.count, total));
                }
            }
            None => {
                if style.show_count_without_total && self.count > 0 {
                    parts.push(self.count.to_string());
                }
            }
        }
        if let Some(identity) = &self.identity {
            parts.push(identity.clone());
        }
        if style.show_duration {
            if let Some(elapsed) = self.elapsed_at(now) {
                parts.push(format_duration(elapsed));
            }
        }
        parts.join(" ")
    }

    fn render_bar(&self) -> String {
        let width = self.style.width;
        let filled = match self.total {
            Some(total) => filled_cells(self.count, total, width),
            None => 0,
        };
        let bar = std::iter::repeat(self.style.fill_complete)
            .take(filled)
            .chain(std::iter::repeat(self.style.fill_remaining).take(width - filled))
            .collect::<String>();
        if !self.style.use_color {
            return bar;
        }
        let color = if self.complete {
            Color::Green
        } else {
            Color::Yellow
        };
        bar.with(color).to_string()
    }

    fn elapsed_at(&self, now: Instant) -> Option<Duration> {
        if let Some(finished) = self.finished_after {
            return Some(finished);
        }
        self.started_at
            .map(|started| now.saturating_duration_since(started))
    }
}

fn percentage(count: u64, total: u64) -> u64 {
    if total == 0 {
        return 100;
    }
    count.min(total).saturating_mul(100) / total
}

fn filled_cells(count: u64, total: u64, width: usize) -> usize {
    if total == 0 {
        return width;
    }
    let ratio = count.min(total) as f64 / total as f64;
    ((ratio * width as f64).floor() as usize).min(width)
}

pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::{format_duration, BarStyle, Tracker};
    use crate::patterns::PatternTable;
    use std::sync::Arc;
    use std::time::Duration;

    fn tracker_with(style: BarStyle) -> Tracker {
        Tracker::new(Arc::new(PatternTable::default()), Arc::new(style))
    }

    fn tracker() -> Tracker {
        tracker_with(BarStyle {
            width: 10,
            fill_complete: '#',
            fill_remaining: '.',
            ..BarStyle::default()
        })
    }

    #[test]
    fn count_matches_complete_the_tracker_at_total() {
        let mut t = tracker();
        assert!(t.match_message("worker is Alice"));
        assert!(t.match_message("processing total of 3 items"));
        assert!(t.match_message("processed 0"));
        assert!(t.match_message("processed 1"));
        assert!(!t.is_complete());
        assert!(t.match_message("processed 2"));
        assert_eq!(t.identity(), Some("Alice"));
        assert_eq!(t.total(), Some(3));
        assert_eq!(t.count(), 3);
        assert!(t.is_complete());
    }

    #[test]
    fn count_never_exceeds_known_total() {
        let mut t = tracker();
        t.match_message("processing total of 2 items");
        for n in 0..5 {
            t.match_message(&format!("processed {n}"));
        }
        assert_eq!(t.count(), 2);
        assert!(t.is_complete());
    }

    #[test]
    fn late_total_clamps_count_and_completes() {
        let mut t = tracker();
        for n in 0..4 {
            t.match_message(&format!("processed {n}"));
        }
        assert_eq!(t.count(), 4);
        assert!(!t.is_complete());
        t.match_message("processing total of 3 items");
        assert_eq!(t.count(), 3);
        assert!(t.is_complete());
    }

    #[test]
    fn identity_is_set_once() {
        let mut t = tracker();
        assert!(t.match_message("worker is Alice"));
        assert!(t.match_message("worker is Bob"));
        assert_eq!(t.identity(), Some("Alice"));
    }

    #[test]
    fn unmatched_payload_is_a_noop() {
        let mut t = tracker();
        let before = t.render();
        assert!(!t.match_message("w1 processing complete"));
        assert_eq!(t.count(), 0);
        assert_eq!(t.render(), before);
    }

    #[test]
    fn reset_clears_counters_and_optionally_identity() {
        let mut t = tracker();
        t.match_message("worker is Alice");
        t.match_message("processing total of 1 items");
        t.match_message("processed 0");
        assert!(t.is_complete());

        t.reset(true);
        assert_eq!(t.count(), 0);
        assert_eq!(t.total(), None);
        assert!(!t.is_complete());
        assert_eq!(t.identity(), Some("Alice"));

        t.reset(false);
        assert_eq!(t.identity(), None);
        assert!(t.match_message("worker is Bob"));
        assert_eq!(t.identity(), Some("Bob"));
    }

    #[test]
    fn render_shows_proportional_fill_and_fraction() {
        let mut t = tracker();
        t.match_message("worker is Alice");
        t.match_message("processing total of 4 items");
        t.match_message("processed 0");
        assert_eq!(t.render(), "Processing |##........|  25% 1/4 Alice");
        t.match_message("processed 1");
        t.match_message("processed 2");
        t.match_message("processed 3");
        assert_eq!(t.render(), "Processing |##########| 100% 4/4 Alice");
    }

    #[test]
    fn render_without_total_ignores_count() {
        let mut t = tracker();
        let first = t.render();
        t.match_message("processed 0");
        t.match_message("processed 1");
        assert_eq!(t.render(), first);
        assert_eq!(first, "Processing |..........|");
    }

    #[test]
    fn count_only_form_while_total_is_unknown() {
        let mut t = tracker_with(BarStyle {
            width: 4,
            fill_complete: '#',
            fill_remaining: '.',
            show_count_without_total: true,
            ..BarStyle::default()
        });
        assert_eq!(t.render(), "Processing |....|");
        t.match_message("processed 0");
        t.match_message("processed 1");
        assert_eq!(t.render(), "Processing |....| 2");
        t.match_message("processing total of 4 items");
        assert_eq!(t.render(), "Processing |##..|  50% 2/4");
    }

    #[test]
    fn render_respects_display_toggles() {
        let mut t = tracker_with(BarStyle {
            width: 4,
            fill_complete: '=',
            fill_remaining: '-',
            show_prefix: false,
            show_percentage: false,
            show_fraction: false,
            ..BarStyle::default()
        });
        t.match_message("processing total of 2 items");
        t.match_message("processed 0");
        assert_eq!(t.render(), "|==--|");
    }

    #[test]
    fn zero_total_is_immediately_complete() {
        let mut t = tracker();
        t.match_message("processing total of 0 items");
        assert!(t.is_complete());
        assert!(t.render().contains("100% 0/0"));
    }

    #[test]
    fn duration_is_rendered_once_total_is_known() {
        let mut t = tracker_with(BarStyle {
            width: 2,
            show_duration: true,
            ..BarStyle::default()
        });
        assert!(!t.render().contains("00:00:"));
        t.match_message("processing total of 1 items");
        assert!(t.render().contains("00:00:0"));
        t.match_message("processed 0");
        assert!(t.render().ends_with("00:00:00"));
    }

    #[test]
    fn force_complete_fills_the_bar() {
        let mut t = tracker();
        t.match_message("processing total of 5 items");
        t.force_complete();
        assert!(t.is_complete());
        assert_eq!(t.count(), 5);
    }

    #[test]
    fn durations_format_as_clock_time() {
        assert_eq!(format_duration(Duration::from_secs(3723)), "01:02:03");
        assert_eq!(format_duration(Duration::from_millis(999)), "00:00:00");
    }
}
