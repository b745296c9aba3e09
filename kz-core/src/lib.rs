pub mod annotations;
pub mod constants;
pub mod errors;
pub mod identity;
pub mod jsonutils;
pub mod k8s;
pub mod logging;
pub mod metrics;
pub mod trace;

pub mod prelude {
    pub use k8s_openapi::api::core::v1 as corev1;
    pub use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
    pub use kube::ResourceExt;
    pub use kz_api::v1alpha1::{
        DriftReport,
        Kausality,
        Mode,
    };

    pub use crate::constants::*;
    pub use crate::errors::EmptyResult;
    pub use crate::k8s::KubeResourceExt;
}
