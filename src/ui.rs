//! Terminal feedback on stderr: stage spinners and stream progress.
//!
//! Pretty output is used only on a TTY; `NO_COLOR` or `--ui plain` fall back
//! to one line per event so logs stay readable when piped.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, no_color: bool) -> Self {
        let pretty = is_tty
            && match mode {
                UiMode::Pretty => true,
                UiMode::Auto => !no_color,
                UiMode::Plain => false,
            };
        Self { pretty }
    }

    /// Detect the terminal on stderr and honour `NO_COLOR`.
    pub fn detect(mode: UiMode) -> Self {
        let no_color = std::env::var_os("NO_COLOR").is_some();
        Self::new(mode, std::io::stderr().is_terminal(), no_color)
    }

    pub fn is_pretty(&self) -> bool {
        self.pretty
    }

    /// Spinner (or a plain line) that reports elapsed time when dropped.
    pub fn stage(&self, name: &str) -> StageGuard {
        let spinner = self.pretty.then(|| {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            spinner.set_style(
                ProgressStyle::with_template("{spinner} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            spinner.set_message(format!("{name}…"));
            spinner
        });
        if spinner.is_none() {
            eprintln!("==> {}", name);
        }
        StageGuard {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
        }
    }

    /// Running frame/detection counter for a stream.
    pub fn frame_progress(&self, source: &str) -> FrameProgress {
        let bar = self.pretty.then(|| {
            let bar = ProgressBar::new_spinner();
            bar.set_draw_target(ProgressDrawTarget::stderr());
            bar.set_style(
                ProgressStyle::with_template("{spinner} {prefix} {pos} frames {msg} [{elapsed}]")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.set_prefix(source.to_string());
            bar
        });
        FrameProgress {
            source: source.to_string(),
            bar,
            frames: 0,
            detections: 0,
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let message = format!("✔ {} ({})", self.name, format_duration(self.start.elapsed()));
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

/// Plain mode prints every `PLAIN_EVERY` frames.
const PLAIN_EVERY: u64 = 25;

pub struct FrameProgress {
    source: String,
    bar: Option<ProgressBar>,
    frames: u64,
    detections: u64,
}

impl FrameProgress {
    pub fn tick(&mut self, detections_in_frame: usize) {
        self.frames += 1;
        self.detections += detections_in_frame as u64;
        match &self.bar {
            Some(bar) => {
                bar.inc(1);
                bar.set_message(format!("{} detections", self.detections));
            }
            None if self.frames % PLAIN_EVERY == 0 => {
                eprintln!(
                    "{}: {} frames, {} detections",
                    self.source, self.frames, self.detections
                );
            }
            None => {}
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn finish(self) {
        let message = format!(
            "✔ {}: {} frames, {} detections",
            self.source, self.frames, self.detections
        );
        match &self.bar {
            Some(bar) => bar.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_only_on_tty() {
        assert!(!Ui::new(UiMode::Pretty, false, false).is_pretty());
        assert!(Ui::new(UiMode::Pretty, true, true).is_pretty());
        assert!(!Ui::new(UiMode::Auto, true, true).is_pretty());
        assert!(!Ui::new(UiMode::Plain, true, false).is_pretty());
    }

    #[test]
    fn frame_progress_counts_frames() {
        let mut progress = Ui::new(UiMode::Plain, false, false).frame_progress("video_1");
        progress.tick(2);
        progress.tick(0);
        assert_eq!(progress.frames(), 2);
        progress.finish();
    }

    #[test]
    fn durations_switch_units_at_one_second() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
