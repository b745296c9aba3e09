use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;

use kube::api::{
    DynamicObject,
    GroupVersionKind,
    TypeMeta,
};

use crate::errors::*;
use crate::prelude::*;

// Newtype around metav1::GroupVersionKind adding the conversions we need for
// owner-reference chasing; Deref lets it act like the wrapped type.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct GVK(GroupVersionKind);

impl GVK {
    pub fn new(group: &str, version: &str, kind: &str) -> GVK {
        GVK(GroupVersionKind::gvk(group, version, kind))
    }

    pub fn from_dynamic_obj(obj: &DynamicObject) -> anyhow::Result<GVK> {
        match &obj.types {
            Some(t) => Ok(GVK(t.try_into()?)),
            None => bail!("no type data present"),
        }
    }

    // An ownerReference carries apiVersion ("group/version" or bare
    // "version" for the core group) plus a kind.
    pub fn from_owner_ref(rf: &metav1::OwnerReference) -> anyhow::Result<GVK> {
        let parts: Vec<_> = rf.api_version.split('/').collect();

        match parts.len() {
            1 => Ok(GVK(GroupVersionKind::gvk("", parts[0], &rf.kind))),
            2 => Ok(GVK(GroupVersionKind::gvk(parts[0], parts[1], &rf.kind))),
            _ => bail!("invalid format for api_version: {}", rf.api_version),
        }
    }

    pub fn into_type_meta(&self) -> TypeMeta {
        TypeMeta {
            api_version: self.0.api_version(),
            kind: self.0.kind.clone(),
        }
    }
}

impl Deref for GVK {
    type Target = GroupVersionKind;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for GVK {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut group = Cow::from(&self.0.group);
        if !group.is_empty() {
            group.to_mut().push('/');
        }

        write!(f, "{group}{}.{}", self.0.version, self.0.kind)
    }
}
