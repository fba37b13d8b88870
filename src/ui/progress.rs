use crate::channels::ChannelSource;
use crate::draft::FlowPhase;
use crate::session::{ChannelHealth, FlowUpdate};
use crate::ui::icons::{CHECK, CLOCK, CROSS, IMAGE, POLL, PUSH, SPARKLE, TEXT, WARN};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// Terminal UI for one generation flow, rendered via `indicatif`.
///
/// Two bars are stacked vertically:
/// - Draft bar: the flow's progress checkpoint (0 to 100) and its phase
/// - Channel line: push subscription state and per-channel event counts
pub struct FlowUI {
    multi: MultiProgress,
    draft_bar: ProgressBar,
    channel_bar: ProgressBar,
    verbose: bool,
}

impl FlowUI {
    /// Create the UI. With `hidden` nothing is drawn, which `--json` output uses.
    pub fn new(verbose: bool, hidden: bool) -> Self {
        let multi = if hidden {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };

        let draft_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} {spinner} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let draft_bar = multi.add(ProgressBar::new(100));
        draft_bar.set_style(draft_style);
        draft_bar.set_prefix("   Draft");

        let channel_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} {msg}")
            .expect("progress bar template is a valid static string");

        let channel_bar = multi.add(ProgressBar::new(0));
        channel_bar.set_style(channel_style);
        channel_bar.set_prefix("Channels");

        Self {
            multi,
            draft_bar,
            channel_bar,
            verbose,
        }
    }

    /// Print a line above the bars, falling back to stderr if drawing fails.
    pub fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Show the request being submitted and start the spinner.
    pub fn submitting(&self, topic: &str, audience: &str) {
        self.draft_bar.set_message(format!(
            "Submitting {} for {}",
            style(topic).yellow(),
            style(audience).cyan()
        ));
        self.draft_bar.enable_steady_tick(Duration::from_millis(100));
    }

    /// Show the flow id once the job starter accepted the request.
    pub fn started(&self, flow_id: &str) {
        self.print_line(format!(
            "  {} Flow {} started",
            SPARKLE,
            style(flow_id).bold()
        ));
        self.draft_bar.enable_steady_tick(Duration::from_millis(100));
    }

    /// Move the bar to `progress` and describe the phase.
    pub fn set_progress(&self, progress: u8, phase: FlowPhase) {
        self.draft_bar.set_position(u64::from(progress));
        self.draft_bar.set_message(phase_message(phase));
    }

    /// Render one processed session update.
    pub fn show_update(&self, update: &FlowUpdate, phase: FlowPhase, health: &ChannelHealth) {
        match update {
            FlowUpdate::Merged {
                source,
                text_adopted,
                image_adopted,
                progress,
            } => {
                self.set_progress(*progress, phase);
                if *text_adopted {
                    self.print_line(format!(
                        "  {} Post text received {}",
                        TEXT,
                        style(format!("via {}", source)).dim()
                    ));
                }
                if *image_adopted {
                    self.print_line(format!(
                        "  {} Image received {}",
                        IMAGE,
                        style(format!("via {}", source)).dim()
                    ));
                }
            }
            FlowUpdate::Ignored { source } => {
                if self.verbose {
                    self.print_line(format!(
                        "    {} {}",
                        style("→").dim(),
                        style(format!("{} update had nothing new", source)).dim()
                    ));
                }
            }
            FlowUpdate::TimedOut => {
                self.print_line(format!(
                    "  {} {}",
                    CLOCK,
                    style("Gave up waiting for the image").yellow()
                ));
            }
            FlowUpdate::Health => {}
        }
        self.show_health(health);
    }

    /// Overwrite the channel line with the current health snapshot.
    pub fn show_health(&self, health: &ChannelHealth) {
        self.channel_bar.set_message(health_line(health));
    }

    /// Finish both bars with a success message.
    pub fn finish_ready(&self) {
        self.draft_bar.set_position(100);
        self.draft_bar.finish_with_message(format!("{} Draft ready", CHECK));
        self.channel_bar.finish_and_clear();
    }

    pub fn finish_timed_out(&self, has_text: bool) {
        let msg = if has_text {
            "Timed out waiting for the image; text is available"
        } else {
            "Timed out before the post text arrived"
        };
        self.draft_bar.abandon_with_message(format!("{} {}", WARN, style(msg).yellow()));
        self.channel_bar.finish_and_clear();
    }

    pub fn finish_error(&self, msg: &str) {
        self.draft_bar.abandon_with_message(format!("{} {}", CROSS, style(msg).red()));
        self.channel_bar.finish_and_clear();
    }

    pub fn clear(&self) {
        self.draft_bar.finish_and_clear();
        self.channel_bar.finish_and_clear();
    }
}

/// Connection state and event counts only. Channel errors go to the log.
fn health_line(health: &ChannelHealth) -> String {
    let push = if health.push_connected {
        style("live").green()
    } else if health.last_push_error.is_some() {
        style("reconnecting").yellow()
    } else {
        style("connecting").dim()
    };
    format!(
        "{}{} {} {} | {}{} {}",
        PUSH,
        push,
        style(health.push_events).cyan(),
        style(channel_label(ChannelSource::Push)).dim(),
        POLL,
        style(health.poll_events).cyan(),
        style(channel_label(ChannelSource::Poll)).dim(),
    )
}

fn phase_message(phase: FlowPhase) -> String {
    match phase {
        FlowPhase::Ready => style(phase.to_string()).green().to_string(),
        FlowPhase::TimedOut => style(phase.to_string()).yellow().to_string(),
        _ => style(phase.to_string()).dim().to_string(),
    }
}

fn channel_label(source: ChannelSource) -> &'static str {
    match source {
        ChannelSource::Push => "events",
        ChannelSource::Poll => "polls",
    }
}
