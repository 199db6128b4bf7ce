//! Pure stopwatch logic with no platform dependencies.
//! Time is supplied by the caller as millisecond readings, so everything here
//! is testable on the host without a clock.

/// Elapsed time after which a running stopwatch auto-resets, one minute.
pub const DEFAULT_LIMIT_MS: u64 = 60_000;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum TimerState {
    #[default]
    Reset,
    Running,
    Paused,
}

/// Result of taking one sample.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SampleOutcome {
    /// Not running, nothing was added.
    Idle,
    /// `delta_ms` was added. Zero when the clock stood still or went backwards.
    Accumulated { delta_ms: u64 },
    /// The limit was reached at `elapsed_ms`; the core has already reset itself.
    LimitReached { elapsed_ms: u64 },
}

pub struct StopwatchCore {
    state: TimerState,
    elapsed_ms: u64,
    last_sample_ms: u64,
    limit_ms: u64,
}

impl Default for StopwatchCore {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT_MS)
    }
}

impl StopwatchCore {
    pub fn new(limit_ms: u64) -> Self {
        Self {
            state: TimerState::Reset,
            elapsed_ms: 0,
            last_sample_ms: 0,
            limit_ms,
        }
    }

    /// Starts or resumes. Does nothing if already running.
    pub fn start(&mut self, now_ms: u64) {
        if self.state == TimerState::Running {
            return;
        }
        self.last_sample_ms = now_ms;
        self.state = TimerState::Running;
    }

    /// Takes a final sample so the tail of the segment counts, then pauses.
    /// That sample can reach the limit, in which case the core ends up Reset.
    pub fn pause(&mut self, now_ms: u64) -> SampleOutcome {
        let outcome = self.sample(now_ms);
        if self.state == TimerState::Running {
            self.state = TimerState::Paused;
        }
        outcome
    }

    pub fn reset(&mut self) {
        self.state = TimerState::Reset;
        self.elapsed_ms = 0;
        self.last_sample_ms = 0;
    }

    /// Adds the wall time since the previous sample and checks the limit.
    ///
    /// A reading earlier than the previous one counts as zero, and becomes the
    /// new reference point so the next forward step is measured from it.
    pub fn sample(&mut self, now_ms: u64) -> SampleOutcome {
        if self.state != TimerState::Running {
            return SampleOutcome::Idle;
        }
        let delta_ms = now_ms.saturating_sub(self.last_sample_ms);
        self.last_sample_ms = now_ms;
        self.elapsed_ms = self.elapsed_ms.saturating_add(delta_ms);

        if self.elapsed_ms >= self.limit_ms {
            let elapsed_ms = self.elapsed_ms;
            self.reset();
            return SampleOutcome::LimitReached { elapsed_ms };
        }
        SampleOutcome::Accumulated { delta_ms }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn limit_ms(&self) -> u64 {
        self.limit_ms
    }
}

/// Format milliseconds as "HH:MM:SS:mmm". Hours wrap at 24 like a time of day.
pub fn format_hms_millis(ms: u64) -> String {
    let total_secs = ms / 1000;
    let millis = ms % 1000;
    let h = (total_secs / 3600) % 24;
    let m = (total_secs % 3600) / 60;
    let s = total_secs % 60;
    format!("{:02}:{:02}:{:02}:{:03}", h, m, s, millis)
}
