mod approvals;
mod guards;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub use approvals::{
    Approval,
    ApprovalMode,
    ChildRef,
    Rejection,
};
pub use guards::{
    Freeze,
    Snooze,
};
use serde::de::DeserializeOwned;

use crate::errors::*;
use crate::identity::UserHashSet;
use crate::prelude::*;
use crate::trace::Trace;

err_impl! {AnnotationError,
    #[error("invalid annotation: {0}")]
    InvalidAnnotation(String),
}

pub type Annotations = BTreeMap<String, String>;

// Lifecycle phase recorded on a parent; a parent becomes `initialized` the
// first time its status converges (observedGeneration == generation).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Initializing,
    Initialized,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Phase::Initializing => write!(f, "initializing"),
            Phase::Initialized => write!(f, "initialized"),
        }
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(Phase::Initializing),
            "initialized" => Ok(Phase::Initialized),
            _ => Err(format!("unrecognized phase: {s}")),
        }
    }
}

fn get_json<T: DeserializeOwned>(annotations: &Annotations, key: &str) -> anyhow::Result<Option<T>> {
    match annotations.get(key) {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => Ok(None),
        Some(v) => serde_json::from_str(v)
            .map(Some)
            .map_err(|e| AnnotationError::invalid_annotation(&format!("{key}: {e}"))),
    }
}

pub fn get_trace(annotations: &Annotations) -> anyhow::Result<Trace> {
    Trace::parse(annotations.get(TRACE_ANNOTATION_KEY).map(String::as_str))
}

pub fn get_approvals(annotations: &Annotations) -> anyhow::Result<Vec<Approval>> {
    Ok(get_json(annotations, APPROVALS_ANNOTATION_KEY)?.unwrap_or_default())
}

pub fn get_rejections(annotations: &Annotations) -> anyhow::Result<Vec<Rejection>> {
    Ok(get_json(annotations, REJECTIONS_ANNOTATION_KEY)?.unwrap_or_default())
}

pub fn get_freeze(annotations: &Annotations) -> anyhow::Result<Option<Freeze>> {
    match annotations.get(FREEZE_ANNOTATION_KEY) {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => Ok(None),
        Some(v) => Freeze::parse(v).map(Some),
    }
}

pub fn get_snooze(annotations: &Annotations) -> anyhow::Result<Option<Snooze>> {
    match annotations.get(SNOOZE_ANNOTATION_KEY) {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => Ok(None),
        Some(v) => Snooze::parse(v).map(Some),
    }
}

pub fn get_phase(annotations: &Annotations) -> anyhow::Result<Option<Phase>> {
    match annotations.get(PHASE_ANNOTATION_KEY) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|e: String| AnnotationError::invalid_annotation(&format!("{PHASE_ANNOTATION_KEY}: {e}"))),
    }
}

// Mode annotations are only honored when they read exactly "log" or
// "enforce"; anything else falls through to the next resolution layer.
pub fn get_mode(annotations: &Annotations) -> Option<Mode> {
    annotations.get(MODE_ANNOTATION_KEY).and_then(|v| v.parse().ok())
}

pub fn get_controllers(annotations: &Annotations) -> UserHashSet {
    UserHashSet::parse(annotations.get(CONTROLLERS_ANNOTATION_KEY).map(String::as_str))
}

pub fn get_updaters(annotations: &Annotations) -> UserHashSet {
    UserHashSet::parse(annotations.get(UPDATERS_ANNOTATION_KEY).map(String::as_str))
}

pub fn serialize_approvals(approvals: &[Approval]) -> anyhow::Result<String> {
    Ok(serde_json::to_string(approvals)?)
}
