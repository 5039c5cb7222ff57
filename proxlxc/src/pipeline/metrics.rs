use super::StepAction;

#[derive(Debug, Clone)]
pub struct StepMetrics {
    pub name: String,
    pub duration_ms: u128,
    /// `None` when the step was interrupted or panicked.
    pub action: Option<StepAction>,
}

#[derive(Debug, Clone, Default)]
pub struct RunMetrics {
    pub total_duration_ms: u128,
    pub steps: Vec<StepMetrics>,
    pub cleanup_duration_ms: u128,
}

impl RunMetrics {
    pub fn step_duration_ms(&self, name: &str) -> Option<u128> {
        self.steps
            .iter()
            .find(|step| step.name == name)
            .map(|step| step.duration_ms)
    }

    /// Names of the steps that were started, in order.
    pub fn started(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name.as_str()).collect()
    }

    pub fn log_summary(&self) {
        for step in &self.steps {
            tracing::info!(
                step = %step.name,
                duration_ms = step.duration_ms as u64,
                action = ?step.action,
                "Step finished"
            );
        }
        tracing::info!(
            total_ms = self.total_duration_ms as u64,
            cleanup_ms = self.cleanup_duration_ms as u64,
            "Pipeline finished"
        );
    }
}
