mod fingerprint;
mod sender;

pub use fingerprint::report_fingerprint;
pub use sender::{
    CleanupHandle,
    HttpSender,
    MockReportSender,
    MultiSender,
    ReportSender,
};
