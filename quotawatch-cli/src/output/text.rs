//! Text output formatting with progress bars and colors.

use chrono::{DateTime, Local, Utc};
use quotawatch_core::{SessionRecord, Snapshot, UsageVector};

// ============================================================================
// ANSI Colors
// ============================================================================

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";

// Progress bar characters
const BAR_FULL: char = '█';
const BAR_EMPTY: char = '░';

/// Text formatter with optional colors.
pub struct TextFormatter {
    use_colors: bool,
    bar_width: usize,
}

impl TextFormatter {
    /// Creates a new text formatter.
    pub fn new(use_colors: bool) -> Self {
        Self {
            use_colors,
            bar_width: 10,
        }
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.use_colors {
            format!("{color}{text}{RESET}")
        } else {
            text.to_string()
        }
    }

    fn color_for_percent(&self, percent_used: f64, text: &str) -> String {
        let color = if percent_used >= 90.0 {
            RED
        } else if percent_used >= 70.0 {
            YELLOW
        } else {
            GREEN
        };
        self.paint(color, text)
    }

    /// Renders a usage bar; filled cells are consumed quota.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn progress_bar(&self, percent_used: f64) -> String {
        let clamped = percent_used.clamp(0.0, 100.0);
        let filled = ((clamped / 100.0) * self.bar_width as f64).round() as usize;
        let empty = self.bar_width.saturating_sub(filled);

        let bar = format!(
            "{}{}",
            BAR_FULL.to_string().repeat(filled),
            BAR_EMPTY.to_string().repeat(empty)
        );
        self.color_for_percent(percent_used, &bar)
    }

    /// Formats one successful fetch.
    pub fn format_snapshot(&self, snapshot: &Snapshot, session_values: &UsageVector) -> String {
        let mut lines = vec![self.paint(BOLD, &snapshot.provider)];

        for quota in &snapshot.quotas {
            let amount = match quota.limit {
                Some(limit) => format!("{} / {}", trim_number(quota.used), trim_number(limit)),
                None => trim_number(quota.used),
            };
            let mut line = match quota.utilization() {
                Some(pct) => format!(
                    "  {:<16} {} {:>5.1}%  {amount}",
                    quota.key,
                    self.progress_bar(pct),
                    pct
                ),
                None => format!("  {:<16} {amount}", quota.key),
            };
            if let Some(resets_at) = quota.resets_at {
                line.push_str(&self.paint(DIM, &format!("  resets {}", format_reset(resets_at, Utc::now()))));
            }
            lines.push(line);
        }

        lines.push(self.paint(
            DIM,
            &format!("  session values: {}", format_values(session_values)),
        ));
        lines.join("\n")
    }

    /// Formats a failed fetch.
    pub fn format_error(&self, provider: &str, error: &str) -> String {
        format!("{}\n  {}", self.paint(BOLD, provider), self.paint(RED, error))
    }

    /// Formats session history as a table.
    pub fn format_sessions(&self, sessions: &[SessionRecord], now: DateTime<Utc>) -> String {
        if sessions.is_empty() {
            return "No sessions recorded".to_string();
        }

        let mut lines = vec![format!(
            "{:<10} {:<12} {:<17} {:>9} {:>6}  {}",
            "ID", "PROVIDER", "STARTED", "DURATION", "POLLS", "START -> MAX"
        )];
        for session in sessions {
            let started = session
                .started_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string();
            let duration = format_duration(session.duration(now));
            let duration = if session.is_open() {
                self.paint(GREEN, &format!("{duration:>9}"))
            } else {
                format!("{duration:>9}")
            };
            lines.push(format!(
                "{:<10} {:<12} {:<17} {} {:>6}  {} -> {}",
                session.id.chars().take(8).collect::<String>(),
                session.provider,
                started,
                duration,
                session.snapshot_count,
                format_values(&session.start_values),
                format_values(&session.max_values),
            ));
        }
        lines.join("\n")
    }
}

fn trim_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

fn format_values(values: &UsageVector) -> String {
    let parts: Vec<_> = values.as_slice().iter().map(|v| trim_number(*v)).collect();
    format!("[{}]", parts.join(", "))
}

/// Compact duration such as `1h 05m` or `42s`.
pub fn format_duration(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds().max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

fn format_reset(resets_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if resets_at <= now {
        return "now".to_string();
    }
    format!("in {}", format_duration(resets_at - now))
}
