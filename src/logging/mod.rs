//! Logging and output control
//!
//! This module provides the [`Logger`] for controlling output verbosity,
//! formatting logs, and tracking operation timing. It supports quiet,
//! verbose, and structured output.

use std::time::{Duration, Instant};

/// Logger responsible for all user-visible output
#[derive(Debug, Clone)]
pub struct Logger {
    pub verbose: bool,
    pub quiet: bool,
    start_time: Instant,
}

impl Logger {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            quiet: false,
            start_time: Instant::now(),
        }
    }

    pub fn new_quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
            start_time: Instant::now(),
        }
    }

    /// Main section heading
    pub fn section(&self, title: &str) {
        if !self.quiet {
            println!("\n=== {} ===", title);
        }
    }

    pub fn debug(&self, message: &str) {
        if self.verbose && !self.quiet {
            self.print_with_timestamp("DEBUG", message);
        }
    }

    /// Verbose-only informational output
    pub fn detail(&self, message: &str) {
        if self.verbose && !self.quiet {
            self.print_with_timestamp("INFO", message);
        }
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            self.print_with_timestamp("INFO", message);
        }
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            self.print_with_timestamp("OK", message);
        }
    }

    pub fn warning(&self, message: &str) {
        eprintln!("⚠️  {}", message);
    }

    pub fn error(&self, message: &str) {
        eprintln!("❌ {}", message);
    }

    /// Progress lines go to stdout unconditionally unless quiet
    pub fn progress(&self, message: &str) {
        if !self.quiet {
            println!("{}", message);
        }
    }

    fn print_with_timestamp(&self, level: &str, message: &str) {
        if self.verbose {
            println!(
                "[{:8.3}s] {} {}",
                self.start_time.elapsed().as_secs_f64(),
                level,
                message
            );
        } else {
            println!("{}", message);
        }
    }

    pub fn format_size(&self, size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.1} {}", size, UNITS[unit_index])
        }
    }

    pub fn format_duration(&self, duration: Duration) -> String {
        let secs = duration.as_secs();
        if secs < 60 {
            format!("{:.1}s", duration.as_secs_f64())
        } else if secs < 3600 {
            format!("{}m{:02}s", secs / 60, secs % 60)
        } else {
            format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        let log = Logger::new_quiet();
        assert_eq!(log.format_size(512), "512 B");
        assert_eq!(log.format_size(2048), "2.0 KB");
        assert_eq!(log.format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_duration() {
        let log = Logger::new_quiet();
        assert_eq!(log.format_duration(Duration::from_secs(5)), "5.0s");
        assert_eq!(log.format_duration(Duration::from_secs(65)), "1m05s");
        assert_eq!(log.format_duration(Duration::from_secs(3725)), "1h02m05s");
    }
}
