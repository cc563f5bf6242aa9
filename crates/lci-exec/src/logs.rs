use std::collections::VecDeque;

use lci_model::{BuildLogEntry, JobId, LogStream};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Capture and tracing of sandbox output.
#[derive(Debug, Clone, Copy)]
pub struct LogConfig {
    /// Lines kept per job; older lines are dropped first.
    pub max_lines: usize,
    /// Longer lines are cut at a char boundary.
    pub max_line_length: usize,
    /// Trace stdout at INFO (false = DEBUG).
    pub stdout_info: bool,
    /// Trace stderr at WARN (false = DEBUG).
    pub stderr_warn: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_lines: 10_000,
            max_line_length: 4096,
            stdout_info: true,
            stderr_warn: true,
        }
    }
}

/// Ring of the newest log lines of one job.
#[derive(Debug)]
pub struct LogBuffer {
    job: JobId,
    config: LogConfig,
    lines: VecDeque<BuildLogEntry>,
    dropped: u64,
}

impl LogBuffer {
    pub fn new(job: JobId, config: LogConfig) -> Self {
        Self {
            job,
            config,
            lines: VecDeque::new(),
            dropped: 0,
        }
    }

    pub fn push(&mut self, stream: LogStream, line: &str) {
        let line = truncate(line.trim_end_matches(['\r', '\n']), self.config.max_line_length);
        match stream {
            LogStream::Stdout if self.config.stdout_info => info!(job = %self.job, "{line}"),
            LogStream::Stderr if self.config.stderr_warn => warn!(job = %self.job, "{line}"),
            _ => debug!(job = %self.job, ?stream, "{line}"),
        }

        if self.config.max_lines == 0 {
            self.dropped += 1;
            return;
        }
        if self.lines.len() == self.config.max_lines {
            self.lines.pop_front();
            self.dropped += 1;
        }
        self.lines.push_back(BuildLogEntry {
            time: OffsetDateTime::now_utc(),
            stream,
            line: line.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Kept lines and how many were dropped.
    pub fn into_parts(self) -> (Vec<BuildLogEntry>, u64) {
        (self.lines.into(), self.dropped)
    }
}

fn truncate(line: &str, max: usize) -> &str {
    if line.len() <= max {
        return line;
    }
    let mut end = max;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(max_lines: usize, max_line_length: usize) -> LogBuffer {
        LogBuffer::new(
            JobId::from("j"),
            LogConfig {
                max_lines,
                max_line_length,
                ..LogConfig::default()
            },
        )
    }

    #[test]
    fn keeps_newest_lines_and_counts_dropped() {
        let mut buf = buffer(2, 100);
        for n in 0..5 {
            buf.push(LogStream::Stdout, &format!("line {n}\n"));
        }
        let (lines, dropped) = buf.into_parts();
        assert_eq!(dropped, 3);
        assert_eq!(
            lines.iter().map(|l| l.line.as_str()).collect::<Vec<_>>(),
            vec!["line 3", "line 4"]
        );
    }

    #[test]
    fn long_lines_are_cut_on_char_boundary() {
        let mut buf = buffer(10, 4);
        buf.push(LogStream::Stderr, "abcdef");
        buf.push(LogStream::Stderr, "abcé");
        let (lines, _) = buf.into_parts();
        assert_eq!(lines[0].line, "abcd");
        assert_eq!(lines[1].line, "abc");
        assert_eq!(lines[1].stream, LogStream::Stderr);
    }
}
