//! Relay loop: hook-module frames in, local streams out.
//!
//! Frames are consumed strictly in arrival order. Status-line text is held
//! until its attribute frame (or any other frame) arrives so that the
//! colour written with a line is the one the child applied to it.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use confwd_wire::{DEFAULT_STATUS_ATTRIBUTE, FrameReader, IconImage, MessageKind, RelayMessage};

/// Destination for decoded frames.
pub trait RelaySink {
    fn stdout(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn stderr(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn status_line(&mut self, text: &str, attribute: u16) -> io::Result<()>;
    fn title(&mut self, title: &str) -> io::Result<()>;
    fn icon(&mut self, icon: &IconImage) -> io::Result<()>;
}

/// Counters reported when the relay ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub frames: u64,
    pub bytes: u64,
    pub skipped: u64,
}

// ---------------------------------------------------------------------------
// Status line
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct StatusLine {
    pending: Option<String>,
    attribute: u16,
    last: Option<(String, u16)>,
}

impl StatusLine {
    fn new() -> Self {
        Self {
            pending: None,
            attribute: DEFAULT_STATUS_ATTRIBUTE,
            last: None,
        }
    }

    fn text<S: RelaySink + ?Sized>(&mut self, payload: &[u8], sink: &mut S) -> io::Result<()> {
        let text = String::from_utf8_lossy(payload)
            .trim_end_matches([' ', '\0'])
            .to_string();
        if self.pending.as_ref().is_some_and(|pending| *pending != text) {
            self.flush(sink)?;
        }
        self.pending = Some(text);
        Ok(())
    }

    fn attribute<S: RelaySink + ?Sized>(&mut self, attribute: u16, sink: &mut S) -> io::Result<()> {
        self.attribute = attribute;
        self.flush(sink)
    }

    fn flush<S: RelaySink + ?Sized>(&mut self, sink: &mut S) -> io::Result<()> {
        let Some(text) = self.pending.take() else {
            return Ok(());
        };
        if text.is_empty() {
            return Ok(());
        }
        let current = (text, self.attribute);
        if self.last.as_ref() == Some(&current) {
            return Ok(());
        }
        sink.status_line(&current.0, current.1)?;
        self.last = Some(current);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

fn dispatch<S: RelaySink + ?Sized>(
    message: &RelayMessage,
    status: &mut StatusLine,
    sink: &mut S,
) -> io::Result<()> {
    match message.kind {
        MessageKind::StatusLine => return status.text(&message.payload, sink),
        MessageKind::StatusLineAttribute => {
            return match message.attribute_word() {
                Some(word) => status.attribute(word, sink),
                None => {
                    tracing::debug!(len = message.len(), "short attribute frame ignored");
                    Ok(())
                }
            };
        }
        _ => status.flush(sink)?,
    }
    match message.kind {
        MessageKind::Stdout => sink.stdout(&message.payload),
        MessageKind::Stderr => sink.stderr(&message.payload),
        MessageKind::Title => sink.title(&String::from_utf8_lossy(&message.payload)),
        MessageKind::Icon => match IconImage::from_bytes(&message.payload) {
            Ok(icon) => sink.icon(&icon),
            Err(error) => {
                tracing::debug!(%error, "icon frame ignored");
                Ok(())
            }
        },
        MessageKind::StatusLine | MessageKind::StatusLineAttribute => Ok(()),
    }
}

/// Forward frames from `reader` to `sink` until the stream ends, a read
/// fails, the sink fails, or `running` is cleared.
pub fn relay_frames<R, S>(reader: R, sink: &mut S, running: &AtomicBool) -> RelayStats
where
    R: Read,
    S: RelaySink + ?Sized,
{
    let mut frames = FrameReader::new(reader);
    let mut status = StatusLine::new();
    let mut stats = RelayStats::default();

    while running.load(Ordering::Acquire) {
        let raw = match frames.read_frame() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!("relay stream closed");
                break;
            }
            Err(error) => {
                tracing::debug!(%error, "relay stream ended");
                break;
            }
        };
        stats.frames += 1;
        let message = match raw.into_message() {
            Ok(message) => message,
            Err(error) => {
                stats.skipped += 1;
                tracing::warn!(%error, "skipping relay frame");
                continue;
            }
        };
        stats.bytes += u64::from(message.len());
        if let Err(error) = dispatch(&message, &mut status, sink) {
            tracing::warn!(%error, kind = ?message.kind, "local output failed; stopping relay");
            return stats;
        }
    }

    if let Err(error) = status.flush(sink) {
        tracing::debug!(%error, "final status line lost");
    }
    stats
}

// ---------------------------------------------------------------------------
// Stream sink
// ---------------------------------------------------------------------------

/// Map a console attribute word to an SGR escape sequence.
#[must_use]
pub fn attribute_sgr(attribute: u16) -> String {
    // Console colour bits are BGR; ANSI indices are RGB.
    fn ansi(bits: u16) -> u16 {
        ((bits & 1) << 2) | (bits & 2) | ((bits & 4) >> 2)
    }
    let fg = attribute & 0x0F;
    let bg = (attribute >> 4) & 0x0F;
    let fg_base = if fg & 8 != 0 { 90 } else { 30 };
    let bg_base = if bg & 8 != 0 { 100 } else { 40 };
    let (fg_code, bg_code) = (fg_base + ansi(fg), bg_base + ansi(bg));
    format!("\x1b[{fg_code};{bg_code}m")
}

pub const SGR_RESET: &str = "\x1b[0m";

/// Writes output frames to a pair of byte streams.
///
/// Status lines go to the error stream, coloured when `colour` is set.
/// Titles and icons have no stream representation and are only logged.
#[derive(Debug)]
pub struct StreamSink<O, E> {
    out: O,
    err: E,
    colour: bool,
}

impl<O: Write, E: Write> StreamSink<O, E> {
    pub fn new(out: O, err: E, colour: bool) -> Self {
        Self { out, err, colour }
    }

    pub fn into_inner(self) -> (O, E) {
        (self.out, self.err)
    }
}

impl<O: Write, E: Write> RelaySink for StreamSink<O, E> {
    fn stdout(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes)?;
        self.out.flush()
    }

    fn stderr(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.err.write_all(bytes)?;
        self.err.flush()
    }

    fn status_line(&mut self, text: &str, attribute: u16) -> io::Result<()> {
        if self.colour {
            writeln!(self.err, "{}{text}{SGR_RESET}", attribute_sgr(attribute))?;
        } else {
            writeln!(self.err, "{text}")?;
        }
        self.err.flush()
    }

    fn title(&mut self, title: &str) -> io::Result<()> {
        tracing::debug!(title, "title change not forwarded");
        Ok(())
    }

    fn icon(&mut self, icon: &IconImage) -> io::Result<()> {
        tracing::debug!(
            width = icon.width,
            height = icon.height,
            "icon change not forwarded"
        );
        Ok(())
    }
}
