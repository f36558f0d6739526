use std::fmt::Write as _;

use crate::channel::ChannelMessage;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Passed,
    Failed,
    /// Not attempted because a prerequisite failed. Counts in the total but
    /// never in the passed count.
    Skipped,
}

impl StepOutcome {
    fn label(self) -> &'static str {
        match self {
            StepOutcome::Passed => "passed",
            StepOutcome::Failed => "failed",
            StepOutcome::Skipped => "skipped",
        }
    }
}

#[derive(Clone, Debug)]
pub struct StepResult {
    pub name: &'static str,
    pub outcome: StepOutcome,
    pub detail: String,
}

impl StepResult {
    pub fn passed(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            outcome: StepOutcome::Passed,
            detail: detail.into(),
        }
    }

    pub fn failed(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            outcome: StepOutcome::Failed,
            detail: detail.into(),
        }
    }

    pub fn skipped(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            outcome: StepOutcome::Skipped,
            detail: detail.into(),
        }
    }

    pub fn is_passed(&self) -> bool {
        self.outcome == StepOutcome::Passed
    }
}

/// Result of the channel-only check: the overall verdict plus the captured
/// message log for diagnostics, whatever the verdict.
#[derive(Debug)]
pub struct ChannelCheck {
    pub passed: bool,
    pub messages: Vec<ChannelMessage>,
}

/// Aggregated outcome of the three check-runs. The rendered summary is the
/// program's terminal output.
#[derive(Debug)]
pub struct Report {
    pub channel: ChannelCheck,
    pub suite: Vec<StepResult>,
    pub combined: Vec<StepResult>,
}

impl Report {
    pub fn passed(&self) -> usize {
        let steps = self
            .suite
            .iter()
            .chain(&self.combined)
            .filter(|step| step.is_passed())
            .count();
        steps + usize::from(self.channel.passed)
    }

    pub fn total(&self) -> usize {
        1 + self.suite.len() + self.combined.len()
    }

    pub fn pass_rate(&self) -> f64 {
        (self.passed() as f64 / self.total() as f64) * 100.0
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "push channel check: {}", verdict(self.channel.passed));
        let _ = writeln!(out, "  messages received: {}", self.channel.messages.len());
        for (index, message) in self.channel.messages.iter().enumerate() {
            let _ = writeln!(out, "    {}. {message}", index + 1);
        }

        render_section(&mut out, "resource api check", &self.suite);
        render_section(&mut out, "combined check", &self.combined);

        let passed = self.passed();
        let total = self.total();
        let _ = writeln!(out, "total steps: {total}");
        let _ = writeln!(out, "passed: {passed}");
        let _ = writeln!(out, "failed: {}", total - passed);
        let _ = writeln!(out, "pass rate: {:.1}%", self.pass_rate());
        if self.pass_rate() >= 80.0 {
            let _ = writeln!(out, "verdict: most checks passed");
        } else {
            let _ = writeln!(out, "verdict: significant failures, server needs attention");
        }
        out
    }
}

fn render_section(out: &mut String, title: &str, steps: &[StepResult]) {
    let passed = steps.iter().filter(|step| step.is_passed()).count();
    let _ = writeln!(out, "{title}: {passed}/{} passed", steps.len());
    for step in steps {
        let _ = writeln!(out, "  {}: {} - {}", step.name, step.outcome.label(), step.detail);
    }
}

fn verdict(passed: bool) -> &'static str {
    if passed { "passed" } else { "failed" }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(channel_passed: bool, suite: Vec<StepResult>, combined: Vec<StepResult>) -> Report {
        Report {
            channel: ChannelCheck {
                passed: channel_passed,
                messages: vec![ChannelMessage::AuthSuccess],
            },
            suite,
            combined,
        }
    }

    #[test]
    fn pass_rate_counts_channel_as_one_step() {
        let report = report(
            true,
            vec![
                StepResult::passed("create_container", "status 201"),
                StepResult::failed("create_resource", "status 500"),
            ],
            vec![StepResult::passed("dav_write", "status 201")],
        );
        assert_eq!(report.total(), 4);
        assert_eq!(report.passed(), 3);
        assert!((report.pass_rate() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn skipped_steps_count_in_total_but_not_passed() {
        let report = report(
            false,
            vec![],
            vec![
                StepResult::failed("dav_write", "status 500"),
                StepResult::skipped("dav_modify", "skipped: initial write failed"),
            ],
        );
        assert_eq!(report.total(), 3);
        assert_eq!(report.passed(), 0);
        assert!((report.pass_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn render_lists_channel_messages_and_steps() {
        let report = report(
            true,
            vec![StepResult::passed("create_container", "status 201")],
            vec![],
        );
        let rendered = report.render();
        assert!(rendered.contains("push channel check: passed"));
        assert!(rendered.contains("1. auth_success"));
        assert!(rendered.contains("create_container: passed - status 201"));
        assert!(rendered.contains("pass rate: 100.0%"));
        assert!(rendered.contains("most checks passed"));
    }

    #[test]
    fn render_flags_a_failing_run() {
        let report = report(
            false,
            vec![StepResult::failed("create_container", "status 403")],
            vec![],
        );
        let rendered = report.render();
        assert!(rendered.contains("pass rate: 0.0%"));
        assert!(rendered.contains("needs attention"));
    }
}
