/// A finished step as remembered by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSummary {
    pub step: u64,
    pub summary: String,
}

/// The goal plus the ordered history of what earlier steps did.
///
/// Storage and formatting are separate: history is kept whole, and
/// [`TaskContext::render`] decides how much of it reaches the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    goal: String,
    history: Vec<StepSummary>,
    window: Option<usize>,
}

impl TaskContext {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            history: Vec::new(),
            window: None,
        }
    }

    /// Only render the most recent `window` summaries.
    pub fn with_window(mut self, window: Option<usize>) -> Self {
        self.window = window;
        self
    }

    pub fn history(&self) -> &[StepSummary] {
        &self.history
    }

    pub fn record(&mut self, step: u64, summary: impl Into<String>) {
        self.history.push(StepSummary {
            step,
            summary: summary.into(),
        });
    }

    pub fn render(&self) -> String {
        let skip = match self.window {
            Some(window) => self.history.len().saturating_sub(window),
            None => 0,
        };
        let mut out = self.goal.clone();
        let recent = &self.history[skip..];
        if !recent.is_empty() {
            out.push_str("\n\nSteps already taken:");
            for entry in recent {
                out.push_str(&format!("\n- step {}: {}", entry.step, entry.summary));
            }
        }
        out
    }
}
