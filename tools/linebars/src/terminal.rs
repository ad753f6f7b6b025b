use crate::errors::LinebarsError;
use crossterm::cursor::{Hide, MoveToColumn, MoveUp, RestorePosition, SavePosition, Show};
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use crossterm::{execute, queue};
use std::io::{IsTerminal, Stdout, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub trait Terminal: Send + Sync {
    fn is_tty(&self) -> bool;
    fn write_line(&self, line: &str) -> Result<(), LinebarsError>;
    fn hide_cursor(&self) -> Result<(), LinebarsError>;
    fn show_cursor(&self) -> Result<(), LinebarsError>;
    /// Overwrite the row `rows_up` lines above the cursor and put the cursor back.
    fn repaint_row(&self, rows_up: u16, line: &str) -> Result<(), LinebarsError>;
}

/// ANSI terminal over any writer; `AnsiTerminal::stdout()` is the production one.
pub struct AnsiTerminal<W: Write + Send> {
    out: Mutex<W>,
    is_tty: bool,
}

impl AnsiTerminal<Stdout> {
    pub fn stdout() -> Self {
        let out = std::io::stdout();
        let is_tty = out.is_terminal();
        Self::new(out, is_tty)
    }
}

impl<W: Write + Send> AnsiTerminal<W> {
    pub fn new(out: W, is_tty: bool) -> Self {
        Self {
            out: Mutex::new(out),
            is_tty,
        }
    }

    pub fn into_inner(self) -> Result<W, LinebarsError> {
        self.out.into_inner().map_err(|_| poisoned())
    }

    fn with_out<T>(
        &self,
        f: impl FnOnce(&mut W) -> std::io::Result<T>,
    ) -> Result<T, LinebarsError> {
        let mut out = self.out.lock().map_err(|_| poisoned())?;
        f(&mut *out).map_err(|e| LinebarsError::Terminal(e.to_string()))
    }
}

fn poisoned() -> LinebarsError {
    LinebarsError::Terminal("terminal lock poisoned".to_string())
}

impl<W: Write + Send> Terminal for AnsiTerminal<W> {
    fn is_tty(&self) -> bool {
        self.is_tty
    }

    fn write_line(&self, line: &str) -> Result<(), LinebarsError> {
        self.with_out(|out| {
            writeln!(out, "{line}")?;
            out.flush()
        })
    }

    fn hide_cursor(&self) -> Result<(), LinebarsError> {
        self.with_out(|out| execute!(out, Hide))
    }

    fn show_cursor(&self) -> Result<(), LinebarsError> {
        self.with_out(|out| execute!(out, Show))
    }

    fn repaint_row(&self, rows_up: u16, line: &str) -> Result<(), LinebarsError> {
        self.with_out(|out| {
            queue!(out, SavePosition)?;
            // CSI 0 A moves one row on most terminals.
            if rows_up > 0 {
                queue!(out, MoveUp(rows_up))?;
            }
            queue!(
                out,
                MoveToColumn(0),
                Clear(ClearType::CurrentLine),
                Print(line),
                RestorePosition
            )?;
            out.flush()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOp {
    WriteLine(String),
    HideCursor,
    ShowCursor,
    Repaint { rows_up: u16, line: String },
}

/// Records terminal operations instead of emitting them.
#[derive(Default, Clone)]
pub struct FakeTerminal {
    pub is_tty: bool,
    ops: Arc<Mutex<Vec<TerminalOp>>>,
    fail_writes: Arc<AtomicBool>,
}

impl FakeTerminal {
    pub fn new(is_tty: bool) -> Self {
        Self {
            is_tty,
            ..Self::default()
        }
    }

    /// Make every later line write or repaint fail, as a closed stream would.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn ops(&self) -> Vec<TerminalOp> {
        self.ops.lock().expect("ops lock").clone()
    }

    pub fn written_lines(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                TerminalOp::WriteLine(line) => Some(line),
                _ => None,
            })
            .collect()
    }

    pub fn repaints(&self) -> Vec<(u16, String)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                TerminalOp::Repaint { rows_up, line } => Some((rows_up, line)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.ops.lock().expect("ops lock").clear();
    }

    fn push(&self, op: TerminalOp) {
        self.ops.lock().expect("ops lock").push(op);
    }

    fn check_writable(&self) -> Result<(), LinebarsError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LinebarsError::Terminal("broken pipe".to_string()));
        }
        Ok(())
    }
}

impl Terminal for FakeTerminal {
    fn is_tty(&self) -> bool {
        self.is_tty
    }

    fn write_line(&self, line: &str) -> Result<(), LinebarsError> {
        self.check_writable()?;
        self.push(TerminalOp::WriteLine(line.to_string()));
        Ok(())
    }

    fn hide_cursor(&self) -> Result<(), LinebarsError> {
        self.push(TerminalOp::HideCursor);
        Ok(())
    }

    fn show_cursor(&self) -> Result<(), LinebarsError> {
        self.push(TerminalOp::ShowCursor);
        Ok(())
    }

    fn repaint_row(&self, rows_up: u16, line: &str) -> Result<(), LinebarsError> {
        self.check_writable()?;
        self.push(TerminalOp::Repaint {
            rows_up,
            line: line.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{AnsiTerminal, FakeTerminal, Terminal, TerminalOp};

    fn emitted(terminal: AnsiTerminal<Vec<u8>>) -> String {
        String::from_utf8(terminal.into_inner().expect("inner")).expect("utf8")
    }

    #[test]
    fn repaint_moves_up_clears_and_restores() {
        let terminal = AnsiTerminal::new(Vec::new(), true);
        terminal.repaint_row(3, "line two").expect("repaint");
        let out = emitted(terminal);
        assert_eq!(out, "\u{1b}7\u{1b}[3A\u{1b}[1G\u{1b}[2Kline two\u{1b}8");
    }

    #[test]
    fn repaint_of_current_row_does_not_move() {
        let terminal = AnsiTerminal::new(Vec::new(), true);
        terminal.repaint_row(0, "x").expect("repaint");
        assert!(!emitted(terminal).contains("A"));
    }

    #[test]
    fn cursor_visibility_uses_standard_sequences() {
        let terminal = AnsiTerminal::new(Vec::new(), true);
        terminal.hide_cursor().expect("hide");
        terminal.write_line("baseline").expect("write");
        terminal.show_cursor().expect("show");
        assert_eq!(emitted(terminal), "\u{1b}[?25lbaseline\n\u{1b}[?25h");
    }

    #[test]
    fn fake_terminal_records_and_fails_on_demand() {
        let terminal = FakeTerminal::new(true);
        terminal.write_line("a").expect("write");
        terminal.fail_writes(true);
        assert!(terminal.repaint_row(1, "b").is_err());
        assert!(terminal.show_cursor().is_ok());
        assert_eq!(
            terminal.ops(),
            vec![TerminalOp::WriteLine("a".to_string()), TerminalOp::ShowCursor]
        );
    }
}
