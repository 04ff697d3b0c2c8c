//! CSV line framing for device streams
//!
//! Devices typically emit one sample per line as comma separated numbers
//! (`"1.0,2.5\n"`). Notifications and serial reads split those lines at
//! arbitrary byte boundaries, so [`LineParser`] buffers the trailing partial
//! line until its newline arrives.

use crate::error::{DevtkError, Result};

/// Longest partial line kept before it is discarded as garbage
pub const MAX_LINE_LENGTH: usize = 4096;

/// Parse one line of comma separated numbers
///
/// Surrounding whitespace and a trailing `\r` are ignored. Empty fields are
/// an error.
pub fn parse_line(line: &str) -> Result<Vec<f64>> {
    line.trim()
        .split(',')
        .map(|field| {
            let field = field.trim();
            field.parse::<f64>().map_err(|e| {
                DevtkError::Serialization(format!("Invalid number '{}' in line '{}': {}", field, line.trim(), e))
            })
        })
        .collect()
}

/// Incremental line splitter and parser
#[derive(Debug, Default)]
pub struct LineParser {
    pending: Vec<u8>,
    lines_parsed: u64,
    lines_rejected: u64,
}

impl LineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the samples of every line it completed
    ///
    /// Malformed lines are skipped and counted.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Vec<f64>> {
        let mut samples = Vec::new();
        for &byte in chunk {
            if byte != b'\n' {
                self.pending.push(byte);
                if self.pending.len() > MAX_LINE_LENGTH {
                    tracing::warn!("Discarding {} bytes without a line break", self.pending.len());
                    self.pending.clear();
                    self.lines_rejected += 1;
                }
                continue;
            }

            let line = std::mem::take(&mut self.pending);
            let text = String::from_utf8_lossy(&line);
            if text.trim().is_empty() {
                continue;
            }
            match parse_line(&text) {
                Ok(values) => {
                    self.lines_parsed += 1;
                    samples.push(values);
                }
                Err(e) => {
                    tracing::debug!("{}", e);
                    self.lines_rejected += 1;
                }
            }
        }
        samples
    }

    /// Bytes of the current partial line
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn lines_parsed(&self) -> u64 {
        self.lines_parsed
    }

    pub fn lines_rejected(&self) -> u64 {
        self.lines_rejected
    }

    /// Forget the partial line, e.g. after a reconnect
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("1.0,2.5\r").unwrap(), vec![1.0, 2.5]);
        assert_eq!(parse_line(" -3 , 4e2 ").unwrap(), vec![-3.0, 400.0]);
        assert!(parse_line("1.0,,2.0").is_err());
        assert!(parse_line("abc").is_err());
    }

    #[test]
    fn test_feed_buffers_partial_lines() {
        let mut parser = LineParser::new();
        assert!(parser.feed(b"1.0,2").is_empty());
        assert_eq!(parser.pending(), 5);

        let samples = parser.feed(b".0\n3.0,4.0\n5.0");
        assert_eq!(samples, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(parser.pending(), 3);

        assert_eq!(parser.feed(b"\n"), vec![vec![5.0]]);
        assert_eq!(parser.lines_parsed(), 3);
    }

    #[test]
    fn test_feed_skips_garbage() {
        let mut parser = LineParser::new();
        let samples = parser.feed(b"oops\n\n1,2\r\n");
        assert_eq!(samples, vec![vec![1.0, 2.0]]);
        assert_eq!(parser.lines_rejected(), 1);
    }

    #[test]
    fn test_overlong_line_is_dropped() {
        let mut parser = LineParser::new();
        parser.feed(&vec![b'1'; MAX_LINE_LENGTH + 1]);
        assert_eq!(parser.pending(), 0);
        assert_eq!(parser.lines_rejected(), 1);
    }
}
