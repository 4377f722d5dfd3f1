//! Condition ladders and the manager that keeps `Ready` in sync with them.
//!
//! Every kind owns a fixed, ordered list of sub-conditions (its ladder). `Ready` is synthetic:
//! it is True exactly when every rung is True, False as soon as any rung is marked False and
//! Unknown otherwise.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

use crate::api::v1alpha1::ComponentKind;

pub const TRUE: &str = "True";
pub const FALSE: &str = "False";
pub const UNKNOWN: &str = "Unknown";

pub const READY: &str = "Ready";

pub const DEPENDENCIES_INSTALLED: &str = "DependenciesInstalled";
pub const DEPLOYMENTS_AVAILABLE: &str = "DeploymentsAvailable";
pub const INSTALL_SUCCEEDED: &str = "InstallSucceeded";
pub const COMPONENTS_READY: &str = "ComponentsReady";
pub const PRE_UPGRADE: &str = "PreUpgrade";
pub const POST_UPGRADE: &str = "PostUpgrade";
pub const PRE_RECONCILER: &str = "PreReconciler";
pub const INSTALLER_SET_AVAILABLE: &str = "InstallerSetAvailable";
pub const INSTALLER_SET_READY: &str = "InstallerSetReady";
pub const POST_RECONCILER: &str = "PostReconciler";
pub const ADDITIONAL_CONTROLLER_INSTALLED: &str = "AdditionalControllerInstalled";

pub const DB_DEPENDENCIES_INSTALLED: &str = "DbDependenciesInstalled";
pub const DB_INSTALLER_SET_AVAILABLE: &str = "DbInstallerSetAvailable";
pub const DATABASE_MIGRATION_DONE: &str = "DatabaseMigrationDone";
pub const API_DEPENDENCIES_INSTALLED: &str = "ApiDependenciesInstalled";
pub const API_INSTALLER_SET_AVAILABLE: &str = "ApiInstallerSetAvailable";
pub const UI_INSTALLER_SET_AVAILABLE: &str = "UiInstallerSetAvailable";

pub const CRDS_INSTALLED: &str = "CrdsInstalled";
pub const CLUSTER_SCOPED_INSTALLED: &str = "ClusterScopedInstalled";
pub const NAMESPACE_SCOPED_INSTALLED: &str = "NamespaceScopedInstalled";
pub const WEBHOOKS_READY: &str = "WebhooksReady";
pub const CONTROLLERS_READY: &str = "ControllersReady";
pub const ALL_DEPLOYMENTS_READY: &str = "AllDeploymentsReady";

// Reason tokens shared by the reconcilers.
pub const REASON_INITIALIZING: &str = "Initializing";
pub const REASON_UPGRADE_PENDING: &str = "UpgradePending";
pub const REASON_ERROR: &str = "Error";
pub const REASON_WAITING: &str = "Waiting";
pub const REASON_INVALID: &str = "Invalid";

/// A kind's ordered sub-conditions plus the rungs the generic reconciler walks through.
#[derive(Debug, PartialEq, Eq)]
pub struct Ladder {
    pub conditions: &'static [&'static str],
    pub dependencies: &'static str,
    pub pre_reconcile: Option<&'static str>,
    pub installer_set_available: Option<&'static str>,
    pub installer_set_ready: &'static str,
    pub post_reconcile: &'static str,
}

const INSTALL_LADDER: Ladder = Ladder {
    conditions: &[DEPENDENCIES_INSTALLED, DEPLOYMENTS_AVAILABLE, INSTALL_SUCCEEDED],
    dependencies: DEPENDENCIES_INSTALLED,
    pre_reconcile: None,
    installer_set_available: None,
    installer_set_ready: DEPLOYMENTS_AVAILABLE,
    post_reconcile: INSTALL_SUCCEEDED,
};

const CONFIG_LADDER: Ladder = Ladder {
    conditions: &[
        PRE_UPGRADE,
        DEPENDENCIES_INSTALLED,
        COMPONENTS_READY,
        DEPLOYMENTS_AVAILABLE,
        POST_UPGRADE,
        INSTALL_SUCCEEDED,
    ],
    dependencies: DEPENDENCIES_INSTALLED,
    pre_reconcile: None,
    installer_set_available: None,
    installer_set_ready: COMPONENTS_READY,
    post_reconcile: INSTALL_SUCCEEDED,
};

const INSTALLER_SET_STAGE_LADDER: Ladder = Ladder {
    conditions: &[
        DEPENDENCIES_INSTALLED,
        PRE_RECONCILER,
        INSTALLER_SET_AVAILABLE,
        INSTALLER_SET_READY,
        POST_RECONCILER,
    ],
    dependencies: DEPENDENCIES_INSTALLED,
    pre_reconcile: Some(PRE_RECONCILER),
    installer_set_available: Some(INSTALLER_SET_AVAILABLE),
    installer_set_ready: INSTALLER_SET_READY,
    post_reconcile: POST_RECONCILER,
};

const PIPELINES_AS_CODE_LADDER: Ladder = Ladder {
    conditions: &[
        DEPENDENCIES_INSTALLED,
        PRE_RECONCILER,
        INSTALLER_SET_AVAILABLE,
        INSTALLER_SET_READY,
        ADDITIONAL_CONTROLLER_INSTALLED,
        POST_RECONCILER,
    ],
    ..INSTALLER_SET_STAGE_LADDER
};

const HUB_LADDER: Ladder = Ladder {
    conditions: &[
        DB_DEPENDENCIES_INSTALLED,
        DB_INSTALLER_SET_AVAILABLE,
        DATABASE_MIGRATION_DONE,
        PRE_RECONCILER,
        API_DEPENDENCIES_INSTALLED,
        API_INSTALLER_SET_AVAILABLE,
        UI_INSTALLER_SET_AVAILABLE,
        POST_RECONCILER,
    ],
    dependencies: DB_DEPENDENCIES_INSTALLED,
    pre_reconcile: Some(PRE_RECONCILER),
    installer_set_available: Some(API_INSTALLER_SET_AVAILABLE),
    installer_set_ready: UI_INSTALLER_SET_AVAILABLE,
    post_reconcile: POST_RECONCILER,
};

const INSTALLER_SET_LADDER: Ladder = Ladder {
    conditions: &[
        CRDS_INSTALLED,
        CLUSTER_SCOPED_INSTALLED,
        NAMESPACE_SCOPED_INSTALLED,
        DEPLOYMENTS_AVAILABLE,
        WEBHOOKS_READY,
        CONTROLLERS_READY,
        ALL_DEPLOYMENTS_READY,
    ],
    dependencies: CRDS_INSTALLED,
    pre_reconcile: None,
    installer_set_available: None,
    installer_set_ready: ALL_DEPLOYMENTS_READY,
    post_reconcile: ALL_DEPLOYMENTS_READY,
};

/// The ladder registry.
pub fn ladder(kind: ComponentKind) -> &'static Ladder {
    match kind {
        ComponentKind::Pipeline | ComponentKind::Trigger => &INSTALL_LADDER,
        ComponentKind::Config => &CONFIG_LADDER,
        ComponentKind::PipelinesAsCode => &PIPELINES_AS_CODE_LADDER,
        ComponentKind::Hub => &HUB_LADDER,
        ComponentKind::InstallerSet => &INSTALLER_SET_LADDER,
        ComponentKind::Chain
        | ComponentKind::Dashboard
        | ComponentKind::Result
        | ComponentKind::ManualApprovalGate
        | ComponentKind::Addon
        | ComponentKind::Pruner
        | ComponentKind::Scheduler
        | ComponentKind::MulticlusterProxyAae
        | ComponentKind::SyncerService => &INSTALLER_SET_STAGE_LADDER,
    }
}

/// Upserts `new` into `conditions` and reports whether anything changed.
///
/// `last_transition_time` moves only when the status value changes (or the condition is new).
pub fn set_condition(conditions: &mut Vec<Condition>, mut new: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
        Some(existing) => {
            let mut changed = false;
            if existing.status != new.status {
                existing.status = new.status;
                existing.last_transition_time = Time(Utc::now());
                changed = true;
            }
            if existing.reason != new.reason {
                existing.reason = new.reason;
                changed = true;
            }
            if existing.message != new.message {
                existing.message = new.message;
                changed = true;
            }
            if existing.observed_generation != new.observed_generation {
                existing.observed_generation = new.observed_generation;
                changed = true;
            }
            changed
        }
        None => {
            new.last_transition_time = Time(Utc::now());
            conditions.push(new);
            true
        }
    }
}

pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(|c| c.status == TRUE)
}

pub fn is_ready(conditions: &[Condition]) -> bool {
    is_condition_true(conditions, READY)
}

/// Mutates one object's conditions according to its ladder.
pub struct ConditionManager<'a> {
    ladder: &'static Ladder,
    conditions: &'a mut Vec<Condition>,
    generation: Option<i64>,
    changed: bool,
}

impl<'a> ConditionManager<'a> {
    pub fn new(kind: ComponentKind, conditions: &'a mut Vec<Condition>, generation: Option<i64>) -> Self {
        ConditionManager {
            ladder: ladder(kind),
            conditions,
            generation,
            changed: false,
        }
    }

    pub fn ladder(&self) -> &'static Ladder {
        self.ladder
    }

    /// Whether any mark since construction altered the conditions.
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// Adds every missing rung (and `Ready`) as Unknown. Existing values are untouched.
    pub fn initialize(&mut self) {
        for type_ in self.ladder.conditions.iter().chain(std::iter::once(&READY)) {
            if find_condition(self.conditions, type_).is_none() {
                let c = self.condition(type_, UNKNOWN, REASON_INITIALIZING, "");
                self.changed |= set_condition(self.conditions, c);
            }
        }
    }

    /// Drops everything and starts again from Unknown.
    pub fn reset(&mut self) {
        if !self.conditions.is_empty() {
            self.conditions.clear();
            self.changed = true;
        }
        self.initialize();
    }

    pub fn mark_true(&mut self, type_: &str) {
        let c = self.condition(type_, TRUE, type_, "");
        self.changed |= set_condition(self.conditions, c);

        // Finishing the install proves the dependencies were in place.
        if type_ == INSTALL_SUCCEEDED
            && self.ladder.conditions.contains(&DEPENDENCIES_INSTALLED)
            && self.status_of(DEPENDENCIES_INSTALLED) == Some(UNKNOWN)
        {
            let c = self.condition(DEPENDENCIES_INSTALLED, TRUE, DEPENDENCIES_INSTALLED, "");
            self.changed |= set_condition(self.conditions, c);
        }
        self.recompute_ready();
    }

    pub fn mark_false(&mut self, type_: &str, reason: &str, message: impl AsRef<str>) {
        let message = message.as_ref();
        let c = self.condition(type_, FALSE, reason, message);
        self.changed |= set_condition(self.conditions, c);
        let ready = self.condition(READY, FALSE, reason, &format!("{type_}: {message}"));
        self.changed |= set_condition(self.conditions, ready);
    }

    pub fn mark_unknown(&mut self, type_: &str, reason: &str, message: impl AsRef<str>) {
        let message = message.as_ref();
        let c = self.condition(type_, UNKNOWN, reason, message);
        self.changed |= set_condition(self.conditions, c);
        if !self.any_false() {
            let ready = self.condition(READY, UNKNOWN, reason, &format!("{type_}: {message}"));
            self.changed |= set_condition(self.conditions, ready);
        }
    }

    pub fn is_true(&self, type_: &str) -> bool {
        is_condition_true(self.conditions, type_)
    }

    pub fn is_ready(&self) -> bool {
        is_ready(self.conditions)
    }

    fn status_of(&self, type_: &str) -> Option<&str> {
        find_condition(self.conditions, type_).map(|c| c.status.as_str())
    }

    fn any_false(&self) -> bool {
        self.ladder
            .conditions
            .iter()
            .any(|t| self.status_of(t) == Some(FALSE))
    }

    fn recompute_ready(&mut self) {
        if self.ladder.conditions.iter().all(|t| self.status_of(t) == Some(TRUE)) {
            let c = self.condition(READY, TRUE, READY, "");
            self.changed |= set_condition(self.conditions, c);
        } else if !self.any_false() && self.status_of(READY) != Some(UNKNOWN) {
            let c = self.condition(READY, UNKNOWN, REASON_INITIALIZING, "");
            self.changed |= set_condition(self.conditions, c);
        }
    }

    fn condition(&self, type_: &str, status: &str, reason: &str, message: &str) -> Condition {
        Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: self.generation,
            last_transition_time: Time(Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn status<'a>(conditions: &'a [Condition], type_: &str) -> &'a str {
        find_condition(conditions, type_).map(|c| c.status.as_str()).unwrap_or("<missing>")
    }

    #[test]
    fn initialize_fills_every_rung_with_unknown() {
        let mut conditions = Vec::new();
        let mut m = ConditionManager::new(ComponentKind::Chain, &mut conditions, Some(1));
        m.initialize();
        assert!(m.changed());

        assert_eq!(conditions.len(), 6);
        assert!(conditions.iter().all(|c| c.status == UNKNOWN));
        assert!(conditions.iter().all(|c| c.observed_generation == Some(1)));
    }

    #[test]
    fn ready_is_the_conjunction_of_the_ladder() {
        let mut conditions = Vec::new();
        let mut m = ConditionManager::new(ComponentKind::Dashboard, &mut conditions, None);
        m.initialize();
        let rungs = m.ladder().conditions;
        for (i, rung) in rungs.iter().enumerate() {
            m.mark_true(rung);
            assert_eq!(m.is_ready(), i == rungs.len() - 1, "after {rung}");
        }
        assert_eq!(status(&conditions, READY), TRUE);
    }

    #[test]
    fn mark_false_propagates_reason_and_message_to_ready() {
        let mut conditions = Vec::new();
        let mut m = ConditionManager::new(ComponentKind::Pipeline, &mut conditions, None);
        m.initialize();
        m.mark_false(DEPENDENCIES_INSTALLED, REASON_UPGRADE_PENDING, "waiting for upgrade");

        let ready = find_condition(&conditions, READY).unwrap();
        assert_eq!(ready.status, FALSE);
        assert_eq!(ready.reason, REASON_UPGRADE_PENDING);
        assert_eq!(ready.message, "DependenciesInstalled: waiting for upgrade");
    }

    #[test]
    fn unknown_does_not_mask_a_false_rung() {
        let mut conditions = Vec::new();
        let mut m = ConditionManager::new(ComponentKind::Result, &mut conditions, None);
        m.initialize();
        m.mark_false(PRE_RECONCILER, REASON_ERROR, "boom");
        m.mark_unknown(INSTALLER_SET_READY, REASON_WAITING, "installing");
        assert_eq!(status(&conditions, READY), FALSE);

        let mut m = ConditionManager::new(ComponentKind::Result, &mut conditions, None);
        m.mark_true(PRE_RECONCILER);
        m.mark_unknown(INSTALLER_SET_READY, REASON_WAITING, "installing");
        assert_eq!(status(&conditions, READY), UNKNOWN);
    }

    #[test]
    fn install_succeeded_implies_dependencies() {
        let mut conditions = Vec::new();
        let mut m = ConditionManager::new(ComponentKind::Trigger, &mut conditions, None);
        m.initialize();
        m.mark_true(DEPLOYMENTS_AVAILABLE);
        m.mark_true(INSTALL_SUCCEEDED);
        assert!(m.is_ready());
        assert_eq!(status(&conditions, DEPENDENCIES_INSTALLED), TRUE);
    }

    #[test]
    fn transition_time_only_moves_with_status() {
        let mut conditions = Vec::new();
        let mut m = ConditionManager::new(ComponentKind::Chain, &mut conditions, None);
        m.initialize();
        m.mark_false(PRE_RECONCILER, REASON_ERROR, "first");
        let before = find_condition(&conditions, PRE_RECONCILER).unwrap().last_transition_time.clone();

        let mut m = ConditionManager::new(ComponentKind::Chain, &mut conditions, None);
        m.mark_false(PRE_RECONCILER, REASON_ERROR, "second");
        assert!(m.changed());
        let after = find_condition(&conditions, PRE_RECONCILER).unwrap();
        assert_eq!(after.last_transition_time, before);
        assert_eq!(after.message, "second");

        let mut m = ConditionManager::new(ComponentKind::Chain, &mut conditions, None);
        m.mark_false(PRE_RECONCILER, REASON_ERROR, "second");
        assert!(!m.changed());
    }

    #[test]
    fn every_kind_has_a_ladder_without_duplicates() {
        for kind in ComponentKind::ALL {
            let l = ladder(kind);
            let mut seen = l.conditions.to_vec();
            seen.sort_unstable();
            seen.dedup();
            assert_eq!(seen.len(), l.conditions.len(), "{kind}");
            assert!(l.conditions.contains(&l.dependencies), "{kind}");
            assert!(l.conditions.contains(&l.installer_set_ready), "{kind}");
            assert!(l.conditions.contains(&l.post_reconcile), "{kind}");
            assert!(!l.conditions.contains(&READY));
        }
    }
}
