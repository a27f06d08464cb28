//! Experiment session context.
//!
//! Owned by the top-level state and handed to whoever needs it.  The
//! rotation, wheel, and vehicle code never reads it.

use tracing::info;

/// Feedback condition the subject is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedbackGroup {
    Visual,
    Audio,
    #[default]
    None,
}

impl FeedbackGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Visual => "visual",
            Self::Audio => "audio",
            Self::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "visual" => Some(Self::Visual),
            "audio" => Some(Self::Audio),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

/// Experiment phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    PreTest,
    Training,
    PostTest,
    RetentionTest,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreTest => "pre-test",
            Self::Training => "training",
            Self::PostTest => "post-test",
            Self::RetentionTest => "retention-test",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pre-test" => Some(Self::PreTest),
            "training" => Some(Self::Training),
            "post-test" => Some(Self::PostTest),
            "retention-test" => Some(Self::RetentionTest),
            _ => None,
        }
    }
}

/// Course driven in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Task {
    #[default]
    ZigzagRun,
    FigureEightRun,
    BasketballFigureEightRun,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZigzagRun => "zigzag-run",
            Self::FigureEightRun => "figure-eight-run",
            Self::BasketballFigureEightRun => "basketball-figure-eight-run",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "zigzag-run" => Some(Self::ZigzagRun),
            "figure-eight-run" => Some(Self::FigureEightRun),
            "basketball-figure-eight-run" => Some(Self::BasketballFigureEightRun),
            _ => None,
        }
    }
}

/// Subject, condition, and run state of the current session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionContext {
    pub subject_id: Option<u32>,
    pub feedback_group: FeedbackGroup,
    pub phase: Phase,
    pub task: Task,
    running: bool,
    started_at: Option<f64>,
    last_duration: Option<f64>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_subject(&mut self, id: u32, group: FeedbackGroup) {
        self.subject_id = Some(id);
        self.feedback_group = group;
        info!(subject = id, group = group.as_str(), "subject assigned");
    }

    /// Start a run at `now`.  Returns false if one is already running.
    pub fn start(&mut self, now: f64) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        self.started_at = Some(now);
        info!(
            subject = ?self.subject_id,
            phase = self.phase.as_str(),
            task = self.task.as_str(),
            "session started"
        );
        true
    }

    /// End the running session, returning its duration in seconds.
    pub fn end(&mut self, now: f64) -> Option<f64> {
        if !self.running {
            return None;
        }
        self.running = false;
        let duration = self.started_at.map(|t| (now - t).max(0.0));
        self.last_duration = duration;
        info!(subject = ?self.subject_id, duration = ?duration, "session ended");
        duration
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Seconds since the running session started.
    pub fn elapsed(&self, now: f64) -> Option<f64> {
        if !self.running {
            return None;
        }
        self.started_at.map(|t| (now - t).max(0.0))
    }

    /// Generate s-expression for IPC status.
    pub fn status_sexp(&self, now: f64) -> String {
        let subject = match self.subject_id {
            Some(id) => id.to_string(),
            None => "nil".to_string(),
        };
        let elapsed = match self.elapsed(now).or(self.last_duration) {
            Some(s) => format!("{:.2}", s),
            None => "nil".to_string(),
        };
        format!(
            "(:subject {} :feedback-group :{} :phase :{} :task :{} :running {} :elapsed {})",
            subject,
            self.feedback_group.as_str(),
            self.phase.as_str(),
            self.task.as_str(),
            if self.running { "t" } else { "nil" },
            elapsed,
        )
    }
}
