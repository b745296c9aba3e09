mod apiset;
mod gvk;
mod parent;
mod util;

pub use apiset::DynamicApiSet;
pub use gvk::GVK;
pub use parent::{
    Parent,
    ParentResolver,
};
pub use util::*;

use crate::errors::*;
use crate::prelude::*;

err_impl! {KubernetesError,
    #[error("malformed label selector: {0:?}")]
    MalformedLabelSelector(metav1::LabelSelectorRequirement),
}

pub trait KubeResourceExt {
    fn namespaced_name(&self) -> String;
    fn matches(&self, sel: &metav1::LabelSelector) -> anyhow::Result<bool>;
}

#[cfg(test)]
pub mod tests;
