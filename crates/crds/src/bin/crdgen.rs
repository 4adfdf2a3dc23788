//! Print every CRD as a multi-document YAML stream
//!
//! `cargo run -p crds --bin crdgen > config/crd/bases.yaml`

use anyhow::Result;
use kube::CustomResourceExt;

use crds::{
    AzureCluster, AzureClusterIdentity, AzureMachinePool, AzureMachinePoolMachine, AzureManagedControlPlane,
    AzureManagedMachinePool,
};

fn main() -> Result<()> {
    let crds = [
        AzureCluster::crd(),
        AzureClusterIdentity::crd(),
        AzureManagedControlPlane::crd(),
        AzureManagedMachinePool::crd(),
        AzureMachinePool::crd(),
        AzureMachinePoolMachine::crd(),
    ];
    for crd in crds {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
