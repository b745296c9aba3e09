use std::collections::BTreeMap;

use clockabilly::{
    Clockable,
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::annotations::AnnotationError;
use crate::constants::*;

// One terminal record of a mutation.  `generation` is the mutating object's
// own generation at the moment of the mutation, never the parent's.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hop {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub generation: i64,
    pub user: String,
    pub request_uid: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Hop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api_version: &str,
        kind: &str,
        name: &str,
        generation: i64,
        user: &str,
        request_uid: &str,
        labels: BTreeMap<String, String>,
        clock: &dyn Clockable,
    ) -> Hop {
        Hop {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            generation,
            user: user.into(),
            request_uid: request_uid.into(),
            timestamp: clock.now(),
            labels,
        }
    }
}

// An append-only chain of hops; the first hop is the causal origin.  Stored
// as a JSON array on the trace annotation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Trace(Vec<Hop>);

impl Trace {
    pub fn new(hops: Vec<Hop>) -> Trace {
        Trace(hops)
    }

    // Absent and empty annotation values are empty traces; the legacy
    // single-hop object form is accepted on read but never written.
    pub fn parse(maybe_value: Option<&str>) -> anyhow::Result<Trace> {
        let Some(value) = maybe_value else {
            return Ok(Trace::default());
        };
        if value.trim().is_empty() {
            return Ok(Trace::default());
        }

        match serde_json::from_str::<Vec<Hop>>(value) {
            Ok(hops) => Ok(Trace(hops)),
            Err(array_err) => match serde_json::from_str::<Hop>(value) {
                Ok(hop) => Ok(Trace(vec![hop])),
                Err(_) => Err(AnnotationError::invalid_annotation(&format!(
                    "{TRACE_ANNOTATION_KEY}: {array_err}"
                ))),
            },
        }
    }

    pub fn serialize(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub fn append(&self, hop: Hop) -> Trace {
        let mut hops = self.0.clone();
        hops.push(hop);
        Trace(hops)
    }

    pub fn origin(&self) -> Option<&Hop> {
        self.0.first()
    }

    pub fn hops(&self) -> &[Hop] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

// The `kausality.io/trace-<suffix>` annotations on an object become the hop
// labels for that object's own hops; they are never inherited.
pub fn extract_metadata_labels(annotations: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    annotations
        .iter()
        .filter_map(|(k, v)| match k.strip_prefix(TRACE_LABEL_ANNOTATION_PREFIX) {
            Some("") | None => None,
            Some(suffix) => Some((suffix.into(), v.clone())),
        })
        .collect()
}
