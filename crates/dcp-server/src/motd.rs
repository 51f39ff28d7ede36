//! MOTD ("message of the day") text loader.
//!
//! Reads a UTF-8 text file at startup and produces the line list the
//! `motd` handler paginates with [`dcp_proto::fit::paginate`]. Loading
//! happens once; the result is held in memory for the life of the server.

use std::path::Path;

/// Maximum length of one MOTD line before truncation.
const MAX_LINE_LEN: usize = 200;

/// A loaded MOTD: one entry per source line, ready to paginate.
///
/// An empty `lines` vector means no MOTD is configured; the `motd` handler
/// sends a single empty frame in that case rather than zero frames.
#[derive(Debug, Clone, Default)]
pub struct Motd {
    lines: Vec<String>,
}

impl Motd {
    /// No MOTD configured.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Load a MOTD from `path`.
    ///
    /// Trims trailing whitespace from each line, substitutes a single space
    /// for lines left empty after trimming, and truncates lines longer than
    /// [`MAX_LINE_LEN`] characters.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if `path` cannot be read.
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let lines = text.lines().map(normalize_line).collect();
        Ok(Self { lines })
    }

    /// The normalized lines, in file order.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

fn normalize_line(line: &str) -> String {
    let trimmed = line.trim_end();
    if trimmed.is_empty() {
        return " ".to_string();
    }
    if trimmed.chars().count() > MAX_LINE_LEN {
        trimmed.chars().take(MAX_LINE_LEN).collect()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_lines_become_a_single_space() {
        assert_eq!(normalize_line(""), " ");
        assert_eq!(normalize_line("   "), " ");
    }

    #[test]
    fn trailing_whitespace_is_trimmed_but_not_leading() {
        assert_eq!(normalize_line("  hello  "), "  hello");
    }

    #[test]
    fn long_lines_are_truncated() {
        let long = "x".repeat(250);
        let normalized = normalize_line(&long);
        assert_eq!(normalized.chars().count(), MAX_LINE_LEN);
    }

    #[test]
    fn none_motd_has_no_lines() {
        assert!(Motd::none().lines().is_empty());
    }

    #[test]
    fn load_reads_and_normalizes_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("motd.txt");
        std::fs::write(&path, "Welcome!\n\ntrailing   \n").unwrap();

        let motd = Motd::load(&path).unwrap();
        assert_eq!(motd.lines(), &["Welcome!".to_string(), " ".to_string(), "trailing".to_string()]);
    }

    #[test]
    fn load_surfaces_io_errors_for_missing_files() {
        assert!(Motd::load("/nonexistent/path/motd.txt").is_err());
    }
}
