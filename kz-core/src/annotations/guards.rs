use clockabilly::{
    Clockable,
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};

use super::AnnotationError;
use crate::constants::*;

const FREEZE_LEGACY_LITERAL: &str = "true";

// An operator-applied hold on a parent: while present, every child mutation
// is blocked, approvals included.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Freeze {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,
}

impl Freeze {
    // Older controllers wrote the literal string "true"; accepted on read,
    // normalized to the JSON form on the next write.
    pub(crate) fn parse(value: &str) -> anyhow::Result<Freeze> {
        if value.trim() == FREEZE_LEGACY_LITERAL {
            return Ok(Freeze::default());
        }
        serde_json::from_str(value)
            .map_err(|e| AnnotationError::invalid_annotation(&format!("{FREEZE_ANNOTATION_KEY}: {e}")))
    }

    pub fn reason(&self) -> String {
        let mut reason = String::from("frozen");
        if let Some(message) = &self.message {
            reason += &format!(": {message}");
        }
        if let Some(at) = &self.at {
            reason += &format!(" (since {})", at.to_rfc3339());
        }
        reason
    }
}

// A time-bounded mute: while active, drift is neither enforced nor reported.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snooze {
    pub expiry: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Snooze {
    pub(crate) fn parse(value: &str) -> anyhow::Result<Snooze> {
        // legacy form: a bare RFC3339 expiry timestamp
        if let Ok(expiry) = DateTime::parse_from_rfc3339(value.trim()) {
            return Ok(Snooze {
                expiry: expiry.with_timezone(&Utc),
                user: None,
                message: None,
            });
        }
        serde_json::from_str(value)
            .map_err(|e| AnnotationError::invalid_annotation(&format!("{SNOOZE_ANNOTATION_KEY}: {e}")))
    }

    pub fn active(&self, clock: &dyn Clockable) -> bool {
        clock.now() < self.expiry
    }
}
