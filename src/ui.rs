use std::io::{self, Write};

use stopwatch::{format_hms_millis, Snapshot, TimerState};

pub const HELP_TEXT: &str = "STOPWATCH HELP\n\n\
     Enter  Start/Pause\n\
     s      Start/Pause\n\
     r      Reset\n\
     h      Help\n\
     q      Quit";

fn state_label(state: TimerState) -> &'static str {
    match state {
        TimerState::Reset => "READY",
        TimerState::Running => "RUNNING",
        TimerState::Paused => "PAUSED",
    }
}

/// One status line: time, run state, time left and which controls apply.
pub fn status_line(snapshot: &Snapshot, limit_ms: u64) -> String {
    let toggle = if snapshot.state == TimerState::Running { "pause" } else { "start" };
    let reset = if snapshot.reset_enabled() { "r=reset" } else { "       " };
    let remaining_ms = limit_ms.saturating_sub(snapshot.elapsed_ms);
    format!(
        "  {}  {:<7}  left {}  ENTER={:<5} {}",
        snapshot.display(),
        state_label(snapshot.state),
        format_hms_millis(remaining_ms),
        toggle,
        reset
    )
}

pub fn draw_stopwatch(out: &mut impl Write, snapshot: &Snapshot, limit_ms: u64) -> io::Result<()> {
    // Redraw in place
    write!(out, "\r{}", status_line(snapshot, limit_ms))?;
    out.flush()
}

pub fn draw_help(out: &mut impl Write) -> io::Result<()> {
    writeln!(out)?;
    for line in HELP_TEXT.lines() {
        writeln!(out, "{}", line)?;
    }
    out.flush()
}
