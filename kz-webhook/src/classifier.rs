use derive_more::Display;
use kube::api::DynamicObject;
use kube::core::admission::Operation;
use kz_core::annotations::{
    self,
    Phase,
};
use kz_core::identity::UserHashSet;
use kz_core::k8s;
use kz_core::prelude::*;
use tracing::*;

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Category {
    #[display("initialization")]
    Initialization,
    #[display("deletion")]
    Deletion,
    #[display("user-initiated")]
    UserInitiated,
    #[display("propagation")]
    Propagation,
    #[display("drift")]
    Drift,
}

// Everything the classifier needs to know about a parent, extracted up front
// so classification itself stays pure.
#[derive(Clone, Debug, Default)]
pub struct ParentState {
    pub converged: bool,
    pub status_lags: bool,
    pub phase: Option<Phase>,
    pub controllers: UserHashSet,
}

impl ParentState {
    pub fn from_object(obj: &DynamicObject) -> ParentState {
        let generation = k8s::generation(obj);
        let observed = k8s::observed_generation(obj);

        let phase = annotations::get_phase(obj.annotations()).unwrap_or_else(|err| {
            warn!("treating malformed phase on {} as absent: {err}", obj.name_any());
            None
        });

        ParentState {
            converged: generation == observed,
            status_lags: observed < generation,
            phase,
            controllers: annotations::get_controllers(obj.annotations()),
        }
    }

    fn known_controller(&self, user: &str, field_manager: Option<&str>) -> bool {
        self.controllers.contains_user(user)
            || field_manager.is_some_and(|fm| self.controllers.contains_user(fm))
    }
}

// Ties break in declaration order: initialization beats deletion beats
// user-initiated beats propagation beats drift.
pub fn classify(
    operation: &Operation,
    parent: Option<&ParentState>,
    deleting: bool,
    user: &str,
    field_manager: Option<&str>,
) -> Category {
    if let Some(p) = parent {
        // a parent whose controller has never caught up is still rolling out
        // its children for the first time
        if p.phase == Some(Phase::Initializing) || (p.phase.is_none() && p.status_lags) {
            return Category::Initialization;
        }
    }

    if deleting || *operation == Operation::Delete {
        return Category::Deletion;
    }

    let Some(p) = parent else {
        return Category::UserInitiated;
    };

    if !p.known_controller(user, field_manager) && p.converged {
        return Category::UserInitiated;
    }

    if !p.converged {
        return Category::Propagation;
    }

    Category::Drift
}
