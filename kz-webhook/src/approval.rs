use kz_core::annotations::{
    self,
    Annotations,
    Approval,
    ApprovalMode,
    ChildRef,
    Rejection,
};
use tracing::*;

pub const STALE_APPROVAL_REASON: &str = "approval found but invalid (stale generation)";

#[derive(Clone, Debug, Default)]
pub struct CheckResult {
    pub approved: bool,
    pub rejected: bool,
    pub reason: Option<String>,
    pub matched_approval: Option<Approval>,
    pub matched_rejection: Option<Rejection>,
}

impl CheckResult {
    fn neutral() -> CheckResult {
        CheckResult::default()
    }

    fn frozen(reason: String) -> CheckResult {
        CheckResult { rejected: true, reason: Some(reason), ..Default::default() }
    }
}

// Evaluates the parent's recorded intent for one child mutation.  Precedence
// is freeze > rejection > approval > neutral; a matching-but-stale approval
// is neutral, not approved.
pub fn check(parent_annotations: &Annotations, child: &ChildRef, parent_generation: i64) -> CheckResult {
    match annotations::get_freeze(parent_annotations) {
        Ok(Some(freeze)) => return CheckResult::frozen(freeze.reason()),
        Ok(None) => (),
        Err(err) => warn!("treating malformed freeze as absent: {err}"),
    }

    let rejections = annotations::get_rejections(parent_annotations).unwrap_or_else(|err| {
        warn!("treating malformed rejections as empty: {err}");
        vec![]
    });
    for rejection in rejections {
        if rejection.matches(child) && rejection.active_for(parent_generation) {
            return CheckResult {
                rejected: true,
                reason: Some(rejection.reason.clone()),
                matched_rejection: Some(rejection),
                ..Default::default()
            };
        }
    }

    let approvals = annotations::get_approvals(parent_annotations).unwrap_or_else(|err| {
        warn!("treating malformed approvals as empty: {err}");
        vec![]
    });
    if let Some(approval) = approvals.into_iter().find(|a| a.matches(child)) {
        if approval.valid_for(parent_generation) {
            return CheckResult {
                approved: true,
                matched_approval: Some(approval),
                ..Default::default()
            };
        }
        return CheckResult {
            reason: Some(STALE_APPROVAL_REASON.into()),
            matched_approval: Some(approval),
            ..Default::default()
        };
    }

    CheckResult::neutral()
}

// A `once` approval is spent by its first successful use; removes the first
// entry equal to the consumed one.
pub fn consume_once(approvals: Vec<Approval>, consumed: &Approval) -> (Vec<Approval>, bool) {
    if consumed.mode != ApprovalMode::Once {
        return (approvals, false);
    }

    let mut approvals = approvals;
    match approvals.iter().position(|a| a == consumed) {
        Some(idx) => {
            approvals.remove(idx);
            (approvals, true)
        },
        None => (approvals, false),
    }
}

// Drops generation-pinned approvals the parent has moved past.  Approvals in
// modes this build doesn't know about are kept.
pub fn prune_stale(approvals: Vec<Approval>, parent_generation: i64) -> Vec<Approval> {
    approvals
        .into_iter()
        .filter(|a| match a.mode {
            ApprovalMode::Always | ApprovalMode::Unknown(_) => true,
            ApprovalMode::Once | ApprovalMode::Generation => a.generation >= parent_generation,
        })
        .collect()
}

// Consume-then-prune; returns the new list, whether anything changed, and
// how many entries went away.
pub fn prune(
    approvals: Vec<Approval>,
    consumed: Option<&Approval>,
    parent_generation: i64,
) -> (Vec<Approval>, bool, usize) {
    let before = approvals.len();

    let approvals = match consumed {
        Some(consumed) => consume_once(approvals, consumed).0,
        None => approvals,
    };
    let approvals = prune_stale(approvals, parent_generation);

    let removed = before - approvals.len();
    (approvals, removed > 0, removed)
}
