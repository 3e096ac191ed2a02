//! Console output for sharpen
//!
//! Plain `- key: value` lines with light styling. `console` drops the
//! styling automatically when stdout is not a terminal.

use console::style;

/// Output handler for consistent CLI formatting
pub struct Output {
    quiet: bool,
}

impl Output {
    /// Create a new output handler
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if !self.quiet {
            println!("{} {}", style("✔").green(), message);
        }
    }

    /// Print a header/title
    pub fn header(&self, title: &str) {
        if !self.quiet {
            println!("{}", style(title).bold());
        }
    }

    /// Print a `- key: value` line
    pub fn key_value(&self, key: &str, value: &str) {
        if !self.quiet {
            println!("- {}: {}", key, style(value).bold());
        }
    }

    /// Print an indented `  - key: value` line
    pub fn detail(&self, key: &str, value: &str) {
        if !self.quiet {
            println!("  - {}: {}", style(key).dim(), value);
        }
    }

    /// Print unstyled text, even in quiet mode
    pub fn raw(&self, text: &str) {
        println!("{text}");
    }

    /// Print blank line
    pub fn blank_line(&self) {
        if !self.quiet {
            println!();
        }
    }
}
