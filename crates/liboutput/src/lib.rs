#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
//! Terminal output abstractions and implementations for user-facing messages and prompts.
//!
//! This crate provides an [`Output`] trait that abstracts over how user messages
//! and interactive prompts are rendered. Implementations include:
//!
//! - [`Terminal`]: A color-capable terminal renderer for production use
//! - [`Quiet`]: A silent implementation that suppresses output (useful for tests)

use std::{
    char,
    collections::HashSet,
    io::{self, Write},
    result::Result as StdResult,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal,
};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use thiserror::Error;

/// Indentation level (in spaces) used for nested output sections.
const INDENT: usize = 4;

/// Spinner redraw interval.
const SPINNER_TICK: Duration = Duration::from_millis(100);

/// ASCII control representation of `Ctrl+C`.
const CTRL_C: char = '\u{3}';
/// ASCII control representation of `Ctrl+D`.
const CTRL_D: char = '\u{4}';

/// Lowercase form of `ch`, or `ch` itself when it has no single-char lowercase.
fn lower(ch: char) -> char {
    ch.to_lowercase().next().unwrap_or(ch)
}

/// Determine whether the combination of `code` and `modifiers` represents an
/// interactive cancellation such as `Ctrl+C`, `Ctrl+D`, or `Esc`.
fn is_cancel_key(code: KeyCode, modifiers: KeyModifiers) -> bool {
    match code {
        KeyCode::Char(ch) => {
            if modifiers.contains(KeyModifiers::CONTROL) && matches!(lower(ch), 'c' | 'd') {
                return true;
            }

            matches!(ch, CTRL_C | CTRL_D)
        }
        KeyCode::Esc => true,
        _ => false,
    }
}

/// Errors produced by [`Output`] implementations when interacting with the user
/// or the terminal.
#[derive(Debug, Error)]
pub enum OutputError {
    /// The requested operation is not supported by this output backend.
    #[error("{0}")]
    Unsupported(&'static str),

    /// The caller supplied invalid input (e.g. empty options for a selector).
    #[error("{0}")]
    InvalidInput(&'static str),

    /// A terminal/TTY related failure occurred.
    #[error("Terminal error: {0}")]
    Terminal(String),

    /// Underlying I/O error while writing/reading to the terminal.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The user cancelled an interactive prompt.
    #[error("Selection cancelled")]
    Cancelled,

    /// No answer arrived before the prompt deadline.
    #[error("No answer within the time limit")]
    TimedOut,
}

/// Convenience alias for output-related fallible operations.
pub type Result<T> = StdResult<T, OutputError>;

/// Progress indicator for a long-running step.
pub trait Spinner {
    /// Stop the spinner and show a success message.
    fn finish_success(&self, msg: &str);
    /// Stop the spinner and show a failure message.
    fn finish_fail(&self, msg: &str);
}

/// Abstraction over how user-facing messages and prompts are produced.
///
/// Implementations can render to a terminal, suppress output, or emit to other
/// formats (e.g. files or JSON) in the future.
pub trait Output: Send + Sync {
    /// Print an informational message.
    fn message(&self, msg: &str) -> Result<()>;
    /// Print a success message.
    fn success(&self, msg: &str) -> Result<()>;
    /// Print a warning message.
    fn warn(&self, msg: &str) -> Result<()>;
    /// Print an error/failure message.
    fn fail(&self, msg: &str) -> Result<()>;
    /// Print a `label: value` line.
    fn item(&self, label: &str, value: &str) -> Result<()>;
    /// Ask the user to confirm an action; returns `true` if confirmed.
    fn confirm(&self, prompt: &str) -> Result<bool>;
    /// Like [`Output::confirm`], failing with [`OutputError::TimedOut`] when no
    /// answer arrives within `timeout`.
    fn confirm_within(&self, prompt: &str, timeout: Duration) -> Result<bool>;
    /// Present a list of `options` and return the chosen index.
    fn select(&self, prompt: &str, options: Vec<String>) -> Result<usize>;
    /// Flush any buffered output.
    fn finish(&self) -> Result<()>;
    /// Create a nested output section that indents subsequent messages.
    fn section(&self, header: &str) -> Result<Box<dyn Output>>;
    /// Start a spinner showing `msg`.
    fn spinner(&self, msg: &str) -> Box<dyn Spinner>;
}

/// Output implementation that suppresses all messages and rejects interactive
/// prompts. Useful for non-interactive or test environments.
pub struct Quiet;

/// Spinner that draws nothing.
struct QuietSpinner;

impl Spinner for QuietSpinner {
    fn finish_success(&self, _msg: &str) {}

    fn finish_fail(&self, _msg: &str) {}
}

impl Output for Quiet {
    fn message(&self, _msg: &str) -> Result<()> {
        Ok(())
    }

    fn success(&self, _msg: &str) -> Result<()> {
        Ok(())
    }

    fn warn(&self, _msg: &str) -> Result<()> {
        Ok(())
    }

    fn fail(&self, _msg: &str) -> Result<()> {
        Ok(())
    }

    fn item(&self, _label: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    fn confirm(&self, _prompt: &str) -> Result<bool> {
        Err(OutputError::Unsupported(
            "Cannot prompt for confirmation in quiet mode",
        ))
    }

    fn confirm_within(&self, prompt: &str, _timeout: Duration) -> Result<bool> {
        self.confirm(prompt)
    }

    fn select(&self, _prompt: &str, _options: Vec<String>) -> Result<usize> {
        Err(OutputError::Unsupported(
            "Cannot prompt for selection in quiet mode",
        ))
    }

    fn finish(&self) -> Result<()> {
        Ok(())
    }

    fn section(&self, _header: &str) -> Result<Box<dyn Output>> {
        Ok(Box::new(Self))
    }

    fn spinner(&self, _msg: &str) -> Box<dyn Spinner> {
        Box::new(QuietSpinner)
    }
}

/// Stream a [`Terminal`] writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    /// Standard output.
    Stdout,
    /// Standard error, leaving stdout free for machine-readable results.
    Stderr,
}

/// Color-capable terminal renderer for user messages and prompts.
pub struct Terminal {
    /// Whether to emit ANSI color sequences.
    color_choice: ColorChoice,
    /// Stream messages and prompts are written to.
    target: Target,
    /// Current indentation depth in spaces.
    indent: usize,
    /// Spinner currently drawing, shared with nested sections.
    active: ActiveSpinner,
}

/// Slot for the spinner that prompts must pause.
type ActiveSpinner = Arc<Mutex<Option<ProgressBar>>>;

impl Terminal {
    /// Create a new terminal output on stdout.
    ///
    /// - `color`: when `true`, always render colored output; when `false`,
    ///   disable ANSI colors.
    pub fn new(color: bool) -> Self {
        Self::with_target(color, Target::Stdout)
    }

    /// Create a new terminal output on stderr.
    pub fn stderr(color: bool) -> Self {
        Self::with_target(color, Target::Stderr)
    }

    /// Terminal writing to `target`.
    fn with_target(color: bool, target: Target) -> Self {
        let color_choice = if color {
            ColorChoice::Always
        } else {
            ColorChoice::Never
        };
        Self {
            color_choice,
            target,
            indent: 0,
            active: ActiveSpinner::default(),
        }
    }

    /// Open the target stream.
    fn stream(&self) -> StandardStream {
        match self.target {
            Target::Stdout => StandardStream::stdout(self.color_choice),
            Target::Stderr => StandardStream::stderr(self.color_choice),
        }
    }

    /// Indentation prefix for the current depth.
    fn pad(&self) -> String {
        " ".repeat(self.indent)
    }

    /// Write `msg` using `color` while honoring the current indentation level.
    fn write_colored(&self, msg: &str, color: Color) -> Result<()> {
        let mut stream = self.stream();
        stream.set_color(ColorSpec::new().set_fg(Some(color)))?;
        writeln!(stream, "{}{msg}", self.pad())?;
        stream.reset()?;
        stream.flush()?;
        Ok(())
    }

    /// Generate mnemonic shortcuts for the provided `options` list.
    fn generate_shortcuts(&self, options: &[String]) -> Vec<char> {
        let mut shortcuts = Vec::new();
        let mut used_chars = HashSet::new();

        for option in options {
            // Prefer the first unused letter of the option, then a digit, then any letter.
            let shortcut = option
                .chars()
                .filter(|ch| ch.is_alphabetic())
                .map(lower)
                .find(|ch| !used_chars.contains(ch))
                .or_else(|| {
                    (1..=9)
                        .filter_map(|i| char::from_digit(i, 10))
                        .find(|ch| !used_chars.contains(ch))
                })
                .or_else(|| ('a'..='z').find(|ch| !used_chars.contains(ch)));

            if let Some(ch) = shortcut {
                used_chars.insert(ch);
            }
            shortcuts.push(shortcut.unwrap_or('?'));
        }

        shortcuts
    }

    /// Render `option` while highlighting `shortcut` within the label when possible.
    fn print_option_with_shortcut(&self, option: &str, shortcut: char) -> Result<()> {
        let mut stream = self.stream();
        write!(stream, "{}  ", self.pad())?;

        // Compare case-insensitively, mirroring how shortcuts are generated.
        let matched = option
            .char_indices()
            .find(|(_, ch)| lower(*ch) == shortcut);

        if let Some((idx, ch)) = matched {
            write!(stream, "{}", &option[..idx])?;
            stream.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)))?;
            write!(stream, "{ch}")?;
            stream.reset()?;
            write!(stream, "{}", &option[idx + ch.len_utf8()..])?;
        } else {
            // Shortcut not in option text, print shortcut in brackets
            write!(stream, "[{shortcut}] {option}")?;
        }

        writeln!(stream)?;
        stream.flush()?;
        Ok(())
    }

    /// Show `options` and wait for a shortcut key, until `deadline` if given.
    fn select_until(
        &self,
        prompt: &str,
        options: &[String],
        deadline: Option<Instant>,
    ) -> Result<usize> {
        if options.is_empty() {
            return Err(OutputError::InvalidInput(
                "No options provided for selection",
            ));
        }

        let spinner = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match spinner {
            Some(bar) => bar.suspend(|| self.draw_select(prompt, options, deadline)),
            None => self.draw_select(prompt, options, deadline),
        }
    }

    /// Draw the selection prompt and read the answer.
    fn draw_select(
        &self,
        prompt: &str,
        options: &[String],
        deadline: Option<Instant>,
    ) -> Result<usize> {
        let shortcuts = self.generate_shortcuts(options);

        let mut stream = self.stream();
        writeln!(stream, "{}{prompt}", self.pad())?;
        drop(stream);
        for (option, shortcut) in options.iter().zip(shortcuts.iter()) {
            self.print_option_with_shortcut(option, *shortcut)?;
        }
        let mut stream = self.stream();
        write!(stream, "{} > ", self.pad())?;
        stream.flush()?;

        // Enable raw mode to read single key press
        terminal::enable_raw_mode().map_err(|e| OutputError::Terminal(e.to_string()))?;
        let result = read_shortcut(&shortcuts, deadline);
        // Always restore terminal mode
        terminal::disable_raw_mode().map_err(|e| OutputError::Terminal(e.to_string()))?;

        match result {
            Ok(index) => {
                writeln!(stream, "{}", shortcuts[index])?;
                Ok(index)
            }
            Err(err) => {
                writeln!(stream)?;
                Err(err)
            }
        }
    }
}

/// Read key presses until one matches a shortcut.
fn read_shortcut(shortcuts: &[char], deadline: Option<Instant>) -> Result<usize> {
    let terminal_error = |e: io::Error| OutputError::Terminal(e.to_string());
    loop {
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !event::poll(remaining).map_err(terminal_error)? {
                return Err(OutputError::TimedOut);
            }
        }

        let Event::Key(KeyEvent {
            code,
            modifiers,
            kind,
            ..
        }) = event::read().map_err(terminal_error)?
        else {
            continue;
        };
        if kind != KeyEventKind::Press {
            continue;
        }
        if is_cancel_key(code, modifiers) {
            return Err(OutputError::Cancelled);
        }
        if let KeyCode::Char(ch) = code
            && let Some(index) = shortcuts.iter().position(|&s| s == lower(ch))
        {
            return Ok(index);
        }
    }
}

/// Spinner drawn on stderr by `indicatif`.
struct TerminalSpinner {
    /// Underlying progress bar.
    bar: ProgressBar,
    /// Indentation prefix for final messages.
    pad: String,
    /// Slot the spinner is registered in while it draws.
    active: ActiveSpinner,
}

impl TerminalSpinner {
    /// Stop pausing prompts for this spinner.
    fn unregister(&self) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Spinner for TerminalSpinner {
    fn finish_success(&self, msg: &str) {
        self.unregister();
        self.bar.finish_with_message(format!("{}✔ {msg}", self.pad));
    }

    fn finish_fail(&self, msg: &str) {
        self.unregister();
        self.bar.finish_with_message(format!("{}✘ {msg}", self.pad));
    }
}

impl Drop for TerminalSpinner {
    fn drop(&mut self) {
        self.unregister();
    }
}

impl Output for Terminal {
    fn message(&self, msg: &str) -> Result<()> {
        self.write_colored(msg, Color::Cyan)
    }

    fn success(&self, msg: &str) -> Result<()> {
        self.write_colored(msg, Color::Green)
    }

    fn warn(&self, msg: &str) -> Result<()> {
        self.write_colored(msg, Color::Rgb(255, 165, 0)) // Orange
    }

    fn fail(&self, msg: &str) -> Result<()> {
        self.write_colored(msg, Color::Red)
    }

    fn item(&self, label: &str, value: &str) -> Result<()> {
        let mut stream = self.stream();
        stream.set_color(ColorSpec::new().set_bold(true))?;
        write!(stream, "{}{label}: ", self.pad())?;
        stream.reset()?;
        writeln!(stream, "{value}")?;
        stream.flush()?;
        Ok(())
    }

    fn confirm(&self, prompt: &str) -> Result<bool> {
        let options = vec!["Yes".to_string(), "No".to_string()];
        let selection = self.select_until(prompt, &options, None)?;
        Ok(selection == 0)
    }

    fn confirm_within(&self, prompt: &str, timeout: Duration) -> Result<bool> {
        let options = vec!["Yes".to_string(), "No".to_string()];
        let selection = self.select_until(prompt, &options, Some(Instant::now() + timeout))?;
        Ok(selection == 0)
    }

    fn select(&self, prompt: &str, options: Vec<String>) -> Result<usize> {
        self.select_until(prompt, &options, None)
    }

    fn finish(&self) -> Result<()> {
        self.stream().flush()?;
        Ok(())
    }

    fn section(&self, header: &str) -> Result<Box<dyn Output>> {
        self.message(header)?;
        Ok(Box::new(Self {
            color_choice: self.color_choice,
            target: self.target,
            indent: self.indent + INDENT,
            active: Arc::clone(&self.active),
        }))
    }

    fn spinner(&self, msg: &str) -> Box<dyn Spinner> {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
        let template = format!("{}{{spinner}} {{msg}}", self.pad());
        if let Ok(style) = ProgressStyle::with_template(&template) {
            bar.set_style(style);
        }
        bar.set_message(msg.to_string());
        bar.enable_steady_tick(SPINNER_TICK);
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(bar.clone());
        Box::new(TerminalSpinner {
            bar,
            pad: self.pad(),
            active: Arc::clone(&self.active),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_rejects_prompts() {
        let confirm = Quiet.confirm("Remove stale lock?");
        assert!(matches!(confirm, Err(OutputError::Unsupported(_))));
        let timed = Quiet.confirm_within("Remove stale lock?", Duration::from_secs(1));
        assert!(matches!(timed, Err(OutputError::Unsupported(_))));

        let err = Quiet
            .select("What next?", vec!["Retry".to_string(), "Abort".to_string()])
            .unwrap_err();
        assert_eq!(err.to_string(), "Cannot prompt for selection in quiet mode");
    }

    #[test]
    fn test_quiet_spinner_is_silent() {
        let spinner = Quiet.spinner("Working...");
        spinner.finish_success("Done");
    }

    #[test]
    fn test_terminal_generate_shortcuts() {
        let terminal = Terminal::new(false);
        let shortcuts = |labels: &[&str]| {
            let options: Vec<String> = labels.iter().map(|l| (*l).to_string()).collect();
            terminal.generate_shortcuts(&options)
        };

        assert_eq!(
            shortcuts(&["Retry", "Choose another workspace", "Abort"]),
            ['r', 'c', 'a']
        );
        assert_eq!(shortcuts(&["YES", "no"]), ['y', 'n']);
        // Clashing initials move on to later letters.
        assert_eq!(shortcuts(&["Reuse", "Retry", "Reset"]), ['r', 'e', 's']);
        // Labels without letters fall back to digits.
        assert_eq!(shortcuts(&["1", "--"]), ['1', '2']);
    }

    #[test]
    fn test_select_empty_options_error() {
        let terminal = Terminal::stderr(false);
        let err = terminal.select("What next?", vec![]).unwrap_err();
        assert!(matches!(err, OutputError::InvalidInput(_)));
    }

    #[test]
    fn test_is_cancel_key_variants() {
        assert!(is_cancel_key(KeyCode::Esc, KeyModifiers::NONE));
        assert!(is_cancel_key(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(is_cancel_key(KeyCode::Char('d'), KeyModifiers::CONTROL));
        assert!(is_cancel_key(KeyCode::Char(CTRL_C), KeyModifiers::NONE));
        assert!(is_cancel_key(KeyCode::Char(CTRL_D), KeyModifiers::NONE));

        assert!(!is_cancel_key(KeyCode::Char('c'), KeyModifiers::NONE));
        assert!(!is_cancel_key(KeyCode::Char('x'), KeyModifiers::CONTROL));
    }

    #[test]
    fn test_section_creates_indented_output() {
        let terminal = Terminal::stderr(false);
        assert_eq!(terminal.indent, 0);

        let repository = terminal.section("github.com/acme/widget").unwrap();
        let workspace = repository.section("ws-1").unwrap();
        workspace.item("path", "/tmp/ws-1").unwrap();
        workspace.warn("directory is missing").unwrap();
    }

    #[test]
    fn test_prompts_pause_the_running_spinner() {
        let terminal = Terminal::stderr(false);
        let is_active = || terminal.active.lock().unwrap().is_some();

        let spinner = terminal.spinner("Selecting workspace...");
        assert!(is_active());
        spinner.finish_success("Reusing ws-1");
        assert!(!is_active());

        // Spinners started in a section pause prompts of the whole terminal.
        let section = terminal.section("ws-1").unwrap();
        let spinner = section.spinner("Running update commands...");
        assert!(is_active());
        drop(spinner);
        assert!(!is_active());
    }
}
