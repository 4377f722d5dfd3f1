#[cfg(test)]
mod tests {
    use crate::api::v1alpha1::{CommonSpec, TektonConfig, TektonConfigSpec, TektonPipeline, PROFILE_LITE};
    use crate::controllers::{config::reconcile, State};
    use crate::settings::Settings;
    use kube::api::{Api, Patch, PatchParams};
    use kube::Client;
    use std::sync::Arc;

    #[tokio::test]
    #[ignore = "uses k8s current-context"]
    async fn integration_reconcile_creates_the_pipeline_component() {
        let client = Client::try_default().await.unwrap();
        let settings = Settings::from_env().unwrap();
        let ctx = State::default().to_context(client.clone(), settings).unwrap();

        let config = TektonConfig::new("config", TektonConfigSpec {
            profile: PROFILE_LITE.to_string(),
            common: CommonSpec::new("tekton-pipelines"),
            ..Default::default()
        });
        let configs: Api<TektonConfig> = Api::all(client.clone());
        let ssapply = PatchParams::apply("ctrltest").force();
        configs.patch("config", &ssapply, &Patch::Apply(&config)).await.unwrap();

        // Finalizer, pre-upgrade, defaults and the release label each take a pass.
        for _ in 0..5 {
            let stored = configs.get("config").await.unwrap();
            let _ = reconcile(Arc::new(stored), ctx.clone()).await;
        }

        let output = configs.get("config").await.unwrap();
        assert!(output.status.is_some());
        let pipelines: Api<TektonPipeline> = Api::all(client.clone());
        let pipeline = pipelines.get("pipeline").await.unwrap();
        assert_eq!(pipeline.spec.common.target_namespace, "tekton-pipelines");
    }
}
