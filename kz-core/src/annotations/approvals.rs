use std::fmt;

use serde::{
    de,
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};

use crate::constants::*;

// Identity triple a parent's approvals and rejections are matched against.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChildRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

impl ChildRef {
    pub fn new(api_version: &str, kind: &str, name: &str) -> ChildRef {
        ChildRef {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ChildRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}/{}", self.api_version, self.kind, self.name)
    }
}

fn field_matches(pattern: &str, value: &str) -> bool {
    pattern == MATCH_ANY || pattern == value
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum ApprovalMode {
    #[default]
    Once,
    Generation,
    Always,
    // Preserved verbatim so a newer controller's approvals survive a prune
    // by an older one
    Unknown(String),
}

impl ApprovalMode {
    pub fn as_str(&self) -> &str {
        match self {
            ApprovalMode::Once => "once",
            ApprovalMode::Generation => "generation",
            ApprovalMode::Always => "always",
            ApprovalMode::Unknown(s) => s,
        }
    }
}

impl fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for ApprovalMode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

struct ApprovalModeVisitor;

impl<'de> de::Visitor<'de> for ApprovalModeVisitor {
    type Value = ApprovalMode;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an approval mode string")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(match value {
            "" | "once" => ApprovalMode::Once,
            "generation" => ApprovalMode::Generation,
            "always" => ApprovalMode::Always,
            other => ApprovalMode::Unknown(other.into()),
        })
    }
}

impl<'de> Deserialize<'de> for ApprovalMode {
    fn deserialize<D>(deserializer: D) -> Result<ApprovalMode, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(ApprovalModeVisitor)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub generation: i64,
    #[serde(default)]
    pub mode: ApprovalMode,
}

impl Approval {
    pub fn matches(&self, child: &ChildRef) -> bool {
        field_matches(&self.api_version, &child.api_version)
            && field_matches(&self.kind, &child.kind)
            && field_matches(&self.name, &child.name)
    }

    // `once` and `generation` approvals are pinned to the parent generation
    // they were granted at; `always` survives generation bumps.  Unknown
    // modes are never treated as valid grants.
    pub fn valid_for(&self, parent_generation: i64) -> bool {
        match self.mode {
            ApprovalMode::Once | ApprovalMode::Generation => self.generation == parent_generation,
            ApprovalMode::Always => true,
            ApprovalMode::Unknown(_) => false,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub generation: i64,
    #[serde(default)]
    pub reason: String,
}

impl Rejection {
    pub fn matches(&self, child: &ChildRef) -> bool {
        field_matches(&self.api_version, &child.api_version)
            && field_matches(&self.kind, &child.kind)
            && field_matches(&self.name, &child.name)
    }

    pub fn active_for(&self, parent_generation: i64) -> bool {
        self.generation == 0 || self.generation == parent_generation
    }

    // A generation-0 rejection with a wildcard child matches every request
    // forever; worth a warning to the operator who wrote it.
    pub fn is_overly_broad(&self) -> bool {
        self.generation == 0
            && (self.api_version == MATCH_ANY || self.kind == MATCH_ANY || self.name == MATCH_ANY)
    }
}
