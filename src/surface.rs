//! # Control Surface
//!
//! What the core needs from a user interface: switch controls on and off, print
//! a status line, print a transcript line. How those are drawn is up to the
//! implementation; the client ships a plain console one.

use chrono::Local;
use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use tracing::warn;

/// Controls the user can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    StartCapture,
    StopCapture,
    PlayBackendClips,
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Control::StartCapture => "start",
            Control::StopCapture => "stop",
            Control::PlayBackendClips => "replay",
        };
        f.write_str(name)
    }
}

pub trait ControlSurface {
    fn set_enabled(&mut self, control: Control, enabled: bool);

    fn is_enabled(&self, control: Control) -> bool;

    /// Print a status line (connection changes, flush notices, refusals).
    fn status(&mut self, line: &str);

    /// Print one transcript line from the service, prefixed with the local time.
    fn transcript(&mut self, text: &str);
}

/// Line-oriented surface writing to any `Write` (stdout in the binary, a
/// `Vec<u8>` in tests).
#[derive(Debug)]
pub struct ConsoleSurface<W: Write> {
    out: W,
    enabled: HashSet<Control>,
}

impl<W: Write> ConsoleSurface<W> {
    /// Only starting capture is possible before anything happened.
    pub fn new(out: W) -> Self {
        Self {
            out,
            enabled: HashSet::from([Control::StartCapture]),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, line: &str) {
        let result = writeln!(self.out, "{}", line).and_then(|_| self.out.flush());
        if let Err(e) = result {
            warn!(error = %e, "Failed to write to console");
        }
    }
}

impl<W: Write> ControlSurface for ConsoleSurface<W> {
    fn set_enabled(&mut self, control: Control, enabled: bool) {
        if enabled {
            self.enabled.insert(control);
        } else {
            self.enabled.remove(&control);
        }
    }

    fn is_enabled(&self, control: Control) -> bool {
        self.enabled.contains(&control)
    }

    fn status(&mut self, line: &str) {
        self.write_line(&format!("[{}]", line));
    }

    fn transcript(&mut self, text: &str) {
        let stamp = Local::now().format("%H:%M:%S");
        self.write_line(&format!("{}: {}", stamp, text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_controls() {
        let surface = ConsoleSurface::new(Vec::new());
        assert!(surface.is_enabled(Control::StartCapture));
        assert!(!surface.is_enabled(Control::StopCapture));
        assert!(!surface.is_enabled(Control::PlayBackendClips));
    }

    #[test]
    fn test_transcript_lines_are_timestamped() {
        let mut surface = ConsoleSurface::new(Vec::new());
        surface.transcript("hello there");

        let text = String::from_utf8(surface.into_inner()).unwrap();
        let line = text.trim_end();
        // HH:MM:SS: hello there
        assert_eq!(line.len(), 8 + 2 + "hello there".len());
        assert_eq!(&line[2..3], ":");
        assert_eq!(&line[5..6], ":");
        assert!(line.ends_with(": hello there"));
    }

    #[test]
    fn test_controls_toggle() {
        let mut surface = ConsoleSurface::new(Vec::new());
        surface.set_enabled(Control::PlayBackendClips, true);
        surface.set_enabled(Control::StartCapture, false);
        assert!(surface.is_enabled(Control::PlayBackendClips));
        assert!(!surface.is_enabled(Control::StartCapture));

        surface.status("Playback cleared.");
        assert_eq!(surface.get_ref().as_slice(), b"[Playback cleared.]\n");
    }
}
