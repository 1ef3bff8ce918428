//! Subscription record for scheduled research tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

/// A user-defined research task executed on schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchTask {
    pub id: Uuid,
    pub email: String,
    pub research_topic: String,
    pub frequency: Frequency,
    /// Preferred local run time, "HH:MM". Interpreted by the external
    /// scheduler, not by the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_time: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
}

impl ResearchTask {
    pub fn new(
        email: impl Into<String>,
        research_topic: impl Into<String>,
        frequency: Frequency,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            research_topic: research_topic.into(),
            frequency,
            schedule_time: None,
            is_active: true,
            created_at: Utc::now(),
            last_run_at: None,
        }
    }

    pub fn apply(&mut self, update: ResearchTaskUpdate) {
        if let Some(email) = update.email {
            self.email = email;
        }
        if let Some(topic) = update.research_topic {
            self.research_topic = topic;
        }
        if let Some(frequency) = update.frequency {
            self.frequency = frequency;
        }
        if let Some(time) = update.schedule_time {
            self.schedule_time = Some(time);
        }
        if let Some(active) = update.is_active {
            self.is_active = active;
        }
    }
}

/// Partial update applied by `PATCH /tasks/{id}`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResearchTaskUpdate {
    pub email: Option<String>,
    pub research_topic: Option<String>,
    pub frequency: Option<Frequency>,
    pub schedule_time: Option<String>,
    pub is_active: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_is_active_without_run_history() {
        let task = ResearchTask::new("t@e.com", "AI regulation", Frequency::Daily);
        assert!(task.is_active);
        assert!(task.last_run_at.is_none());
    }

    #[test]
    fn partial_update_preserves_unset_fields() {
        let mut task = ResearchTask::new("t@e.com", "AI regulation", Frequency::Daily);
        task.apply(ResearchTaskUpdate {
            frequency: Some(Frequency::Weekly),
            ..Default::default()
        });
        assert_eq!(task.frequency, Frequency::Weekly);
        assert_eq!(task.email, "t@e.com");
        assert_eq!(task.research_topic, "AI regulation");
    }

    #[test]
    fn frequency_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Frequency::Monthly).unwrap(),
            "\"monthly\""
        );
    }
}
