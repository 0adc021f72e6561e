//! Prints the EtcdCluster CRD as YAML so it can be applied with kubectl.

use anyhow::Context;
use crds::EtcdCluster;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let yaml = serde_yaml::to_string(&EtcdCluster::crd()).context("serializing EtcdCluster CRD")?;
    print!("{}", yaml);
    Ok(())
}
