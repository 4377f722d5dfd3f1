use std::sync::Arc;

use chrono::Utc;
use kube::{runtime::controller::Action, Resource, ResourceExt};
use tokio::time::Duration;
use tracing::*;

use super::{add_finalizer, has_finalizer, remove_finalizer, write_status, Context};
use crate::api::v1alpha1::{ComponentKind, TektonInstallerSet};
use crate::conditions::{ConditionManager, REASON_WAITING};
use crate::installerset::{apply_phase, classify, cleanup, workload_readiness, Phase};
use crate::util::errors::{Error, Result, StdError};

fn manager(set: &mut TektonInstallerSet) -> ConditionManager<'_> {
    let generation = set.metadata.generation;
    let status = set.status.get_or_insert_with(Default::default);
    ConditionManager::new(ComponentKind::InstallerSet, &mut status.conditions, generation)
}

pub async fn reconcile(set: Arc<TektonInstallerSet>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure(ComponentKind::InstallerSet.short_name());
    ctx.diagnostics.write().await.last_event = Utc::now();
    let name = set.name_any();

    let mut set = (*set).clone();
    if set.meta().deletion_timestamp.is_some() {
        if has_finalizer(&set) {
            info!("removing resources of installer-set {name}");
            let uid = set
                .uid()
                .ok_or_else(|| Error::StdError(StdError::MetadataMissing(format!("{name} has no uid"))))?;
            cleanup(ctx.client(), ctx.applier.as_ref(), &set.spec.manifests, &uid).await?;
            remove_finalizer(ctx.client(), &set).await?;
        }
        return Ok(Action::await_change());
    }
    if !has_finalizer(&set) {
        set = add_finalizer(ctx.client(), &set).await?;
    }

    let before = set.clone();
    let result = apply(&mut set, &ctx).await;
    write_status(ctx.client(), &before, &set).await?;
    result
}

/// Applies the manifests phase by phase, then reports the workloads' readiness.
async fn apply(set: &mut TektonInstallerSet, ctx: &Context) -> Result<Action> {
    let name = set.name_any();
    manager(set).initialize();

    let owner = set
        .controller_owner_ref(&())
        .ok_or_else(|| Error::StdError(StdError::MetadataMissing(format!("{name} has no uid"))))?;
    let phases = classify(&set.spec.manifests);
    for phase in Phase::ALL {
        let objects = &phases[&phase];
        if let Err(e) = apply_phase(ctx.applier.as_ref(), objects, Some(&owner)).await {
            if !e.is_sentinel() {
                warn!("installer-set {name}: applying {phase:?} failed: {e}");
                manager(set).mark_false(phase.condition(), REASON_WAITING, e.to_string());
            }
            return Err(e);
        }
        // Workloads and jobs share a rung; it is marked once readiness is known.
        if !matches!(phase, Phase::Workloads | Phase::Jobs) {
            manager(set).mark_true(phase.condition());
        }
    }

    let readiness = workload_readiness(ctx.client(), &set.spec.manifests).await?;
    let mut m = manager(set);
    m.mark_true(Phase::Workloads.condition());
    let pending = readiness.pending.join(", ");
    for (condition, ready) in readiness.conditions() {
        if ready {
            m.mark_true(condition);
        } else {
            m.mark_false(condition, REASON_WAITING, format!("waiting for {pending}"));
        }
    }

    let generation = set.metadata.generation;
    if let Some(status) = set.status.as_mut() {
        status.observed_generation = generation;
    }

    if readiness.all_ready {
        debug!("installer-set {name} is ready");
        Ok(Action::requeue(Duration::from_secs(5 * 60)))
    } else {
        debug!("installer-set {name} waiting for {pending}");
        Ok(Action::await_change())
    }
}
