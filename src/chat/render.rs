//! Output rendering for the chat application.
//!
//! A [`Renderer`] prints streamed answers, citations and status lines.  The
//! plain-text implementation is also a [`StreamHandler`], so it can be
//! handed straight to a conversation as the observer of a send.

use std::io::{self, Stdout, Write};

use crate::error::Error;
use crate::stream::StreamHandler;
use crate::types::Source;

/// ANSI escape code for dim text (used for citations).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for source file names).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for yellow text (used for reconnect notices).
const ANSI_YELLOW: &str = "\x1b[33m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// Longest citation preview printed, in characters.
const PREVIEW_CHARS: usize = 120;

/// Trait for rendering chat output.
pub trait Renderer: Send {
    /// Print a chunk of the answer as it streams in.
    fn print_text(&mut self, text: &str);

    /// Print the citations backing an answer.
    fn print_sources(&mut self, sources: &[Source]);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Tell the user the answer is restarting on a new connection.
    fn print_reconnecting(&mut self);

    /// Called when a response is complete.
    fn finish_response(&mut self);

    /// Called when the stream is abandoned by the user.
    fn print_interrupted(&mut self);
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer<W: Write = Stdout> {
    out: W,
    use_color: bool,
    mid_line: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer on stdout with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer on stdout with the given color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self::with_writer(io::stdout(), use_color)
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> PlainTextRenderer<W> {
    /// Render into `out`.
    pub fn with_writer(out: W, use_color: bool) -> Self {
        Self {
            out,
            use_color,
            mid_line: false,
        }
    }

    /// Give back the writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Flushes output to ensure immediate display of streamed content.
    fn flush(&mut self) {
        let _ = self.out.flush();
    }

    fn end_line(&mut self) {
        if self.mid_line {
            let _ = writeln!(self.out);
            self.mid_line = false;
        }
    }

    fn styled(&self, color: &'static str, text: &str) -> String {
        if self.use_color {
            format!("{color}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }
}

impl<W: Write + Send> Renderer for PlainTextRenderer<W> {
    fn print_text(&mut self, text: &str) {
        let _ = write!(self.out, "{text}");
        self.mid_line = !text.ends_with('\n');
        self.flush();
    }

    fn print_sources(&mut self, sources: &[Source]) {
        if sources.is_empty() {
            return;
        }
        self.end_line();
        let heading = self.styled(ANSI_DIM, "Sources:");
        let _ = writeln!(self.out, "{heading}");
        for (index, source) in sources.iter().enumerate() {
            let name = self.styled(ANSI_CYAN, &source.filename);
            let _ = writeln!(self.out, "  [{}] {name}", index + 1);
            let preview = preview(&source.content_preview);
            if !preview.is_empty() {
                let preview = self.styled(ANSI_DIM, &preview);
                let _ = writeln!(self.out, "      {preview}");
            }
        }
        self.flush();
    }

    fn print_error(&mut self, error: &str) {
        self.end_line();
        let line = self.styled(ANSI_RED, &format!("Error: {error}"));
        let _ = writeln!(self.out, "{line}");
        self.flush();
    }

    fn print_info(&mut self, info: &str) {
        self.end_line();
        let _ = writeln!(self.out, "{info}");
        self.flush();
    }

    fn print_reconnecting(&mut self) {
        self.end_line();
        let line = self.styled(ANSI_YELLOW, "[connection lost; reconnecting]");
        let _ = writeln!(self.out, "{line}");
        self.flush();
    }

    fn finish_response(&mut self) {
        self.end_line();
        self.flush();
    }

    fn print_interrupted(&mut self) {
        self.end_line();
        let _ = writeln!(self.out, "[interrupted]");
        self.flush();
    }
}

impl<W: Write + Send> StreamHandler for PlainTextRenderer<W> {
    fn on_chunk(&mut self, chunk: &str) {
        self.print_text(chunk);
    }

    fn on_sources(&mut self, sources: Vec<Source>) {
        self.print_sources(&sources);
    }

    fn on_error(&mut self, error: &Error) {
        self.print_error(&error.to_string());
    }

    fn on_retry(&mut self) {
        self.print_reconnecting();
    }
}

/// One line of preview text, cut at a character boundary.
fn preview(text: &str) -> String {
    let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.chars().count() <= PREVIEW_CHARS {
        return line;
    }
    let mut cut: String = line.chars().take(PREVIEW_CHARS).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(renderer: PlainTextRenderer<Vec<u8>>) -> String {
        String::from_utf8(renderer.into_inner()).unwrap()
    }

    #[test]
    fn renderer_default_has_color() {
        let renderer = PlainTextRenderer::new();
        assert!(renderer.use_color);
    }

    #[test]
    fn renderer_without_color() {
        let renderer = PlainTextRenderer::with_color(false);
        assert!(!renderer.use_color);
    }

    #[test]
    fn streamed_answer_then_sources() {
        let mut renderer = PlainTextRenderer::with_writer(Vec::new(), false);
        renderer.on_chunk("Hel");
        renderer.on_chunk("lo");
        renderer.on_sources(vec![Source {
            filename: "a.pdf".to_string(),
            content_preview: "The  results\nshow".to_string(),
            download_url: String::new(),
        }]);
        renderer.finish_response();
        assert_eq!(
            rendered(renderer),
            "Hello\nSources:\n  [1] a.pdf\n      The results show\n"
        );
    }

    #[test]
    fn errors_start_on_a_new_line() {
        let mut renderer = PlainTextRenderer::with_writer(Vec::new(), false);
        renderer.on_chunk("partial");
        renderer.on_error(&Error::application("model unavailable"));
        assert_eq!(rendered(renderer), "partial\nError: model unavailable\n");
    }

    #[test]
    fn colors_wrap_styled_lines() {
        let mut renderer = PlainTextRenderer::with_writer(Vec::new(), true);
        renderer.print_reconnecting();
        let out = rendered(renderer);
        assert!(out.starts_with(ANSI_YELLOW));
        assert!(out.trim_end().ends_with(ANSI_RESET));
    }

    #[test]
    fn long_previews_are_cut() {
        let long = "word ".repeat(100);
        let cut = preview(&long);
        assert_eq!(cut.chars().count(), PREVIEW_CHARS + 3);
        assert!(cut.ends_with("..."));
    }
}
