use std::{
    io::{self, Write},
    result::Result as StdResult,
};

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use thiserror::Error;

/// Indentation added by each nested section.
const INDENT: usize = 4;

/// Errors produced by [`Output`] implementations.
#[derive(Debug, Error)]
pub enum OutputError {
    /// Underlying I/O error while writing to the terminal.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result alias for output operations.
pub type Result<T> = StdResult<T, OutputError>;

/// Abstraction over how user-facing messages are produced.
pub trait Output: Send + Sync {
    /// Print an informational message.
    fn message(&self, msg: &str) -> Result<()>;
    /// Print a success message.
    fn success(&self, msg: &str) -> Result<()>;
    /// Print a warning message.
    fn warn(&self, msg: &str) -> Result<()>;
    /// Print an error/failure message.
    fn fail(&self, msg: &str) -> Result<()>;
    /// Print a labelled value.
    fn item(&self, label: &str, value: &str) -> Result<()>;
    /// Print a line-count summary such as `+3 -1`.
    fn diff_stat(&self, label: &str, insertions: usize, deletions: usize) -> Result<()>;
    /// Print a unified diff, coloring added and removed lines.
    fn diff(&self, text: &str) -> Result<()>;
    /// Flush any buffered output.
    fn finish(&self) -> Result<()>;
    /// Create a nested output section that indents subsequent messages.
    fn section(&self, header: &str) -> Box<dyn Output>;
}

/// Output implementation that suppresses all messages.
pub struct Quiet;

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

    fn diff_stat(&self, _label: &str, _insertions: usize, _deletions: usize) -> Result<()> {
        Ok(())
    }

    fn diff(&self, _text: &str) -> Result<()> {
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        Ok(())
    }

    fn section(&self, _header: &str) -> Box<dyn Output> {
        Box::new(Quiet)
    }
}

/// Color-capable terminal renderer.
pub struct Terminal {
    /// Whether ANSI colors are emitted.
    color_choice: ColorChoice,
    /// Current indentation in spaces.
    indent: usize,
}

impl Terminal {
    /// Create a new terminal output.
    ///
    /// - `color`: when `true`, always render colored output; when `false`,
    ///   disable ANSI colors.
    pub fn new(color: bool) -> Self {
        let color_choice = if color {
            ColorChoice::Always
        } else {
            ColorChoice::Never
        };
        Self {
            color_choice,
            indent: 0,
        }
    }

    /// Write one line in `color`, or uncolored when `color` is `None`.
    fn write_line(&self, msg: &str, color: Option<Color>) -> Result<()> {
        let mut stdout = StandardStream::stdout(self.color_choice);
        stdout.set_color(ColorSpec::new().set_fg(color))?;
        writeln!(stdout, "{}{msg}", " ".repeat(self.indent))?;
        stdout.reset()?;
        stdout.flush()?;
        Ok(())
    }
}

/// Pick a color for one line of a unified diff.
fn diff_line_color(line: &str) -> Option<Color> {
    if line.starts_with("+++") || line.starts_with("---") {
        None
    } else if line.starts_with('+') {
        Some(Color::Green)
    } else if line.starts_with('-') {
        Some(Color::Red)
    } else if line.starts_with("@@") {
        Some(Color::Cyan)
    } else {
        None
    }
}

impl Output for Terminal {
    fn message(&self, msg: &str) -> Result<()> {
        self.write_line(msg, Some(Color::Cyan))
    }

    fn success(&self, msg: &str) -> Result<()> {
        self.write_line(msg, Some(Color::Green))
    }

    fn warn(&self, msg: &str) -> Result<()> {
        self.write_line(msg, Some(Color::Rgb(255, 165, 0))) // Orange
    }

    fn fail(&self, msg: &str) -> Result<()> {
        self.write_line(msg, Some(Color::Red))
    }

    fn item(&self, label: &str, value: &str) -> Result<()> {
        let mut stdout = StandardStream::stdout(self.color_choice);
        write!(stdout, "{}", " ".repeat(self.indent))?;
        stdout.set_color(ColorSpec::new().set_bold(true))?;
        write!(stdout, "{label}:")?;
        stdout.reset()?;
        writeln!(stdout, " {value}")?;
        stdout.flush()?;
        Ok(())
    }

    fn diff_stat(&self, label: &str, insertions: usize, deletions: usize) -> Result<()> {
        let mut stdout = StandardStream::stdout(self.color_choice);
        write!(stdout, "{}{label} ", " ".repeat(self.indent))?;
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
        write!(stdout, "+{insertions}")?;
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Red)))?;
        write!(stdout, " -{deletions}")?;
        stdout.reset()?;
        writeln!(stdout)?;
        stdout.flush()?;
        Ok(())
    }

    fn diff(&self, text: &str) -> Result<()> {
        for line in text.lines() {
            self.write_line(line, diff_line_color(line))?;
        }
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        io::stdout().flush()?;
        Ok(())
    }

    fn section(&self, header: &str) -> Box<dyn Output> {
        #[allow(clippy::let_underscore_must_use)]
        let _ = self.message(header);

        Box::new(Self {
            color_choice: self.color_choice,
            indent: self.indent + INDENT,
        })
    }
}
