mod policies;
mod reports;

pub use policies::{
    Kausality,
    KausalitySpec,
    Mode,
    ModeOverride,
    NamespaceSelector,
    ResourceRule,
};
pub use reports::{
    DriftPhase,
    DriftReport,
    DriftReportSpec,
    ObjectIdentity,
    RequestSummary,
};
