use std::cell::RefCell;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{HumanCount, ProgressBar, ProgressStyle};
use sysup_session::Reporter;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn resolve_output_style(stdout_is_tty: bool) -> OutputStyle {
    if stdout_is_tty {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn current_output_style() -> OutputStyle {
    resolve_output_style(std::io::stdout().is_terminal())
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let badge = match status {
                "ok" => "[OK]",
                "warn" => "[WARN]",
                "err" => "[ERR]",
                _ => "[..]",
            };
            format!("{badge} {message}")
        }
    }
}

/// Prints coordinator messages and drives one progress bar per label.
pub(crate) struct TerminalReporter {
    style: OutputStyle,
    active: RefCell<Option<TerminalProgress>>,
}

struct TerminalProgress {
    label: String,
    total: u64,
    current: u64,
    progress_bar: ProgressBar,
    started_at: Instant,
}

impl TerminalReporter {
    pub(crate) fn new(style: OutputStyle) -> Self {
        Self {
            style,
            active: RefCell::new(None),
        }
    }

    pub(crate) fn print_status(&self, status: &str, message: &str) {
        self.abandon_progress();
        println!("{}", render_status_line(self.style, status, message));
    }

    pub(crate) fn print_error(&self, message: &str) {
        self.abandon_progress();
        let line = render_status_line(self.style, "err", message);
        if self.style == OutputStyle::Rich && std::io::stderr().is_terminal() {
            eprintln!("{}", colorize(error_style(), &line));
        } else {
            eprintln!("{line}");
        }
    }

    fn start_progress(&self, label: &str, total: u64) -> TerminalProgress {
        let progress_bar = ProgressBar::new(total.max(1));
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.cyan.bold} {msg:<12} [{bar:20.cyan/blue}] {pos:>3}/{len:3} {elapsed_precise}",
        ) {
            progress_bar.set_style(style.tick_chars("|/-\\ ").progress_chars("=>-"));
        }
        progress_bar.set_message(label.to_string());
        progress_bar.enable_steady_tick(Duration::from_millis(80));

        TerminalProgress {
            label: label.to_string(),
            total,
            current: 0,
            progress_bar,
            started_at: Instant::now(),
        }
    }

    fn abandon_progress(&self) {
        if let Some(progress) = self.active.borrow_mut().take() {
            progress.progress_bar.finish_and_clear();
        }
    }
}

impl Reporter for TerminalReporter {
    fn message(&self, text: &str) {
        self.print_status("step", text);
    }

    fn progress(&self, label: &str, current: u64, total: u64) {
        if self.style == OutputStyle::Plain {
            return;
        }

        let mut active = self.active.borrow_mut();
        if active.as_ref().is_some_and(|progress| progress.label != label) {
            if let Some(previous) = active.take() {
                previous.progress_bar.finish_and_clear();
            }
        }
        let progress = active.get_or_insert_with(|| self.start_progress(label, total));

        progress.total = total;
        progress.current = current.min(total);
        let safe_total = total.max(1);
        progress.progress_bar.set_length(safe_total);
        progress.progress_bar.set_position(progress.current.min(safe_total));

        if current >= total {
            if let Some(done) = active.take() {
                done.progress_bar.finish_and_clear();
                println!(
                    "{}",
                    render_progress_line(
                        &done.label,
                        done.current,
                        done.total,
                        Some(done.started_at.elapsed()),
                    )
                );
            }
        }
    }
}

impl Drop for TerminalReporter {
    fn drop(&mut self) {
        self.abandon_progress();
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn progress_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn progress_bar_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::BrightBlue.into()))
}

fn error_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightRed.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub(crate) fn render_progress_line(
    label: &str,
    current: u64,
    total: u64,
    elapsed: Option<Duration>,
) -> String {
    let width = 18_usize;
    let safe_total = total.max(1);
    let bounded_current = current.min(safe_total);
    let filled = ((bounded_current as usize) * width) / (safe_total as usize);
    let bar = format!(
        "{}{}",
        "=".repeat(filled),
        "-".repeat(width.saturating_sub(filled))
    );
    let percent = (bounded_current * 100) / safe_total;
    let counts = format!("{}/{}", HumanCount(current), HumanCount(total));
    let suffix = elapsed
        .map(|value| format!(" complete in {}", format_elapsed(value)))
        .unwrap_or_default();

    format!(
        "{} [{}] {:>3}% {}{}",
        colorize(progress_label_style(), label),
        colorize(progress_bar_style(), &bar),
        percent,
        counts,
        suffix
    )
}
