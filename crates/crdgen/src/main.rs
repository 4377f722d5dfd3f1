use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt as _;
use tekton_operator::api::v1alpha1::*;

fn main() -> Result<(), serde_yaml::Error> {
    let crds: Vec<CustomResourceDefinition> = vec![
        TektonConfig::crd(),
        TektonPipeline::crd(),
        TektonTrigger::crd(),
        TektonDashboard::crd(),
        TektonChain::crd(),
        TektonHub::crd(),
        TektonResult::crd(),
        ManualApprovalGate::crd(),
        TektonAddon::crd(),
        TektonPruner::crd(),
        TektonScheduler::crd(),
        TektonMulticlusterProxyAAE::crd(),
        SyncerService::crd(),
        OpenShiftPipelinesAsCode::crd(),
        TektonInstallerSet::crd(),
    ];
    for (i, crd) in crds.iter().enumerate() {
        if i > 0 {
            println!("---");
        }
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
