// src/pipeline/plan.rs
use crate::config::PipelineConfig;
use crate::ingest::types::{EventSource, Subject};
use crate::store::job_key;

/// One unit of scheduled work: a provider's events scored for one subject.
#[derive(Debug, Clone, PartialEq)]
pub struct JobPlan {
    pub provider: EventSource,
    pub subject: Subject,
    pub interval_minutes: u64,
    pub event_limit: usize,
}

impl JobPlan {
    pub fn key(&self) -> String {
        job_key(self.provider, self.subject.id)
    }
}

/// Enabled providers × configured subjects, provider-major in config order.
pub fn plan_jobs(cfg: &PipelineConfig) -> Vec<JobPlan> {
    cfg.providers
        .iter()
        .filter(|p| p.enabled)
        .flat_map(|p| {
            cfg.subjects.iter().map(move |s| JobPlan {
                provider: p.source,
                subject: s.clone(),
                interval_minutes: p.interval_minutes,
                event_limit: p.event_limit,
            })
        })
        .collect()
}
