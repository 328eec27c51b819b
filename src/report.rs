//! Diagnostic reports for unexpected failures.
//!
//! A [`Traceback`] records how an error came about: the native backtrace
//! when capture is enabled (`RUST_BACKTRACE=1`), then the `source()` chain
//! from the innermost cause outwards, ending with the error itself. The last
//! frame is therefore always the line a user would most want to see.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;

use crate::context::CommandContext;

/// Reports at or above this many characters are uploaded instead of sent
/// inline, leaving room for the code fence in a 2000-character message.
pub const INLINE_REPORT_LIMIT: usize = 1980;

/// Characters of the final frame shown back to the invoker.
pub const EXCERPT_LEN: usize = 150;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Traceback {
    frames: Vec<String>,
}

impl Traceback {
    /// Capture the backtrace (if enabled) and the error's cause chain.
    pub fn capture(error: &(dyn Error + 'static)) -> Self {
        let mut frames = Vec::new();

        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            frames.push(format!("Backtrace (most recent call first):\n{}\n", backtrace));
        }

        let mut chain = Vec::new();
        let mut cause = error.source();
        while let Some(err) = cause {
            chain.push(format!("Caused by: {}\n", err));
            cause = err.source();
        }
        frames.extend(chain.into_iter().rev());
        frames.push(format!("Error: {}\n", error));

        Self { frames }
    }

    /// Build a traceback from pre-rendered frames, kept verbatim.
    pub fn from_frames(frames: Vec<String>) -> Self {
        Self { frames }
    }

    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    /// The final frame, or an empty string for an empty traceback.
    pub fn last_frame(&self) -> &str {
        self.frames.last().map(String::as_str).unwrap_or("")
    }

    /// The first `max_chars` characters of the final frame.
    pub fn excerpt(&self, max_chars: usize) -> String {
        self.last_frame().chars().take(max_chars).collect()
    }

    pub fn render(&self) -> String {
        self.frames.concat()
    }
}

/// Break up backtick runs so `text` cannot close the code block it is
/// placed in. A zero-width joiner follows every backtick.
pub fn escape_code_block(text: &str) -> String {
    text.replace('`', "`\u{200d}")
}

// ---------------------------------------------------------------------------
// Diagnostic report
// ---------------------------------------------------------------------------

/// Full text sent to the bot owner for an unexpected failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticReport {
    pub header: Vec<String>,
    pub traceback: Traceback,
}

impl DiagnosticReport {
    pub fn new(header: Vec<String>, traceback: Traceback) -> Self {
        Self { header, traceback }
    }

    /// Report for a failure raised while running a command.
    pub fn for_command(ctx: &CommandContext, traceback: Traceback, note: Option<&str>) -> Self {
        let mut header = vec![
            format!("Command: {}{}", ctx.prefix, ctx.command),
            format!("Author: {} ({})", ctx.author.tag(), ctx.author.id),
            format!("Location: {}", ctx.location()),
            format!(
                "Guild: {} | Channel: {}",
                ctx.guild_id.as_deref().unwrap_or("-"),
                ctx.channel_id
            ),
            format!("Message: {}", ctx.content),
            format!("Jump: {}", ctx.jump_url()),
        ];
        if let Some(note) = note {
            header.push(format!("Note: {}", note));
        }
        Self::new(header, traceback)
    }

    /// Report for a failure raised while handling a gateway event.
    pub fn for_event(
        name: &str,
        args: &[String],
        kwargs: &[(String, String)],
        traceback: Traceback,
        note: Option<&str>,
    ) -> Self {
        let kwargs = kwargs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>();
        let mut header = vec![
            format!("An error occurred in event `{}`", name),
            format!("Args: [{}]", args.join(", ")),
            format!("Kwargs: {{{}}}", kwargs.join(", ")),
        ];
        if let Some(note) = note {
            header.push(format!("Note: {}", note));
        }
        Self::new(header, traceback)
    }

    /// Header lines, each newline-terminated, followed by the traceback.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.header {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(&self.traceback.render());
        out
    }
}

/// How a rendered report reaches the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportDelivery {
    /// One direct message containing the report in a code block.
    Inline,
    /// Uploaded to the paste service; only the link is sent.
    Paste,
}

/// Length is counted in `char`s, matching how Discord counts message length.
pub fn delivery_for(text: &str) -> ReportDelivery {
    if text.chars().count() >= INLINE_REPORT_LIMIT {
        ReportDelivery::Paste
    } else {
        ReportDelivery::Inline
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
