//! The hub installs in four ordered stages: database, migration, api and ui.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use serde_json::{json, Value};
use tracing::*;

use super::component::{ensure_stage, reflect, remove_stage, render, Bundle, Component, Progress};
use super::{conditions, Context};
use crate::api::v1alpha1::hub::{HUB_API_STAGE, HUB_DB_MIGRATION_STAGE, HUB_DB_STAGE, HUB_UI_STAGE};
use crate::api::v1alpha1::*;
use crate::api::DB_SECRET_HASH_KEY;
use crate::client::get_typed;
use crate::conditions::{
    API_DEPENDENCIES_INSTALLED, API_INSTALLER_SET_AVAILABLE, DATABASE_MIGRATION_DONE, DB_DEPENDENCIES_INSTALLED,
    DB_INSTALLER_SET_AVAILABLE, REASON_WAITING, UI_INSTALLER_SET_AVAILABLE,
};
use crate::manifests::{Manifest, Transformer};
use crate::transform::{config_map_data, kind_of, string_map};
use crate::util::errors::{Error, Result};
use crate::util::hash::content_hash;

pub const DEFAULT_DB_SECRET: &str = "tekton-hub-db";
pub const API_CONFIG_MAP: &str = "tekton-hub-api";
const API_SERVICE: &str = "tekton-hub-api";
const UI_SERVICE: &str = "tekton-hub-ui";

impl TektonHub {
    fn db_secret_name(&self) -> &str {
        self.spec.db.secret.as_deref().unwrap_or(DEFAULT_DB_SECRET)
    }

    /// The bundled database is skipped when the user points at their own secret.
    fn bundled_db(&self) -> bool {
        self.spec.db.secret.is_none()
    }

    fn api_config(&self) -> Transformer {
        let api = &self.spec.api;
        config_map_data(
            API_CONFIG_MAP,
            string_map(&[
                ("CONFIG_FILE_URL", api.hub_config_url.clone()),
                ("CATALOG_REFRESH_INTERVAL", api.catalog_refresh_interval.clone()),
            ]),
        )
    }
}

/// Annotates every pod template with the database secret's hash so credential changes roll pods.
fn db_secret_hash(hash: String) -> Transformer {
    Box::new(move |obj: &mut Value| {
        if !matches!(kind_of(obj), "Deployment" | "StatefulSet" | "Job") {
            return Ok(());
        }
        let Some(template) = obj.pointer_mut("/spec/template") else {
            return Ok(());
        };
        if !template["metadata"]["annotations"].is_object() {
            template["metadata"]["annotations"] = json!({});
        }
        template["metadata"]["annotations"][DB_SECRET_HASH_KEY] = Value::String(hash.clone());
        Ok(())
    })
}

/// Objects of one stage directory; a bundle without the directory ships nothing for it.
fn stage_manifest(bundle: &Bundle, stage: &str) -> Result<Manifest> {
    let dir = bundle.dir.join(stage);
    if dir.is_dir() {
        Manifest::from_dir(&dir)
    } else {
        Ok(Manifest::default())
    }
}

async fn install_stage(
    hub: &mut TektonHub,
    ctx: &Context,
    stage: &str,
    manifest: Manifest,
    extra: Vec<Transformer>,
) -> Result<Progress> {
    if manifest.is_empty() {
        remove_stage(hub, ctx, stage).await?;
        return Ok(Progress::Ready);
    }
    let rendered = render(hub, ctx, manifest, extra)?;
    ensure_stage(hub, ctx, stage, &rendered).await
}

#[async_trait]
impl Component for TektonHub {
    async fn install(&mut self, ctx: &Context, bundle: Bundle) -> Result<Progress> {
        let namespace = self.target_namespace().to_string();
        let secret_name = self.db_secret_name().to_string();
        let Some(secret) = get_typed::<Secret>(ctx.client(), Some(&namespace), &secret_name).await? else {
            conditions(self).mark_false(
                DB_DEPENDENCIES_INSTALLED,
                REASON_WAITING,
                format!("secret {secret_name} not found in {namespace}"),
            );
            return Err(Error::ReconcileAgain);
        };
        conditions(self).mark_true(DB_DEPENDENCIES_INSTALLED);
        let secret_hash = content_hash(&secret.data.unwrap_or_default())?;

        let db = if self.bundled_db() {
            stage_manifest(&bundle, HUB_DB_STAGE)?
        } else {
            debug!("hub uses an external database, skipping the bundled one");
            Manifest::default()
        };
        let progress = install_stage(self, ctx, HUB_DB_STAGE, db, vec![db_secret_hash(secret_hash.clone())]).await?;
        reflect(self, DB_INSTALLER_SET_AVAILABLE, &progress);
        if !progress.is_ready() {
            return Ok(progress);
        }

        let migration = stage_manifest(&bundle, HUB_DB_MIGRATION_STAGE)?;
        let progress = install_stage(
            self,
            ctx,
            HUB_DB_MIGRATION_STAGE,
            migration,
            vec![db_secret_hash(secret_hash.clone())],
        )
        .await?;
        reflect(self, DATABASE_MIGRATION_DONE, &progress);
        if !progress.is_ready() {
            return Ok(progress);
        }
        conditions(self).mark_true(API_DEPENDENCIES_INSTALLED);

        let api = stage_manifest(&bundle, HUB_API_STAGE)?;
        let extra = vec![self.api_config(), db_secret_hash(secret_hash)];
        let progress = install_stage(self, ctx, HUB_API_STAGE, api, extra).await?;
        reflect(self, API_INSTALLER_SET_AVAILABLE, &progress);
        if !progress.is_ready() {
            return Ok(progress);
        }

        let ui = stage_manifest(&bundle, HUB_UI_STAGE)?;
        let progress = install_stage(self, ctx, HUB_UI_STAGE, ui, Vec::new()).await?;
        reflect(self, UI_INSTALLER_SET_AVAILABLE, &progress);
        Ok(progress)
    }

    async fn post_install(&mut self, _ctx: &Context) -> Result<Progress> {
        let namespace = self.target_namespace().to_string();
        let api_url = match &self.spec.api.route_host_url {
            Some(host) => format!("https://{host}"),
            None => format!("http://{API_SERVICE}.{namespace}.svc:8000"),
        };
        let status = self.status.get_or_insert_with(Default::default);
        status.api_url = Some(api_url);
        status.ui_url = Some(format!("http://{UI_SERVICE}.{namespace}.svc:8080"));
        Ok(Progress::Ready)
    }
}
