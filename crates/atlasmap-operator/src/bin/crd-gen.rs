//! Print the AtlasMap CustomResourceDefinition as YAML

use anyhow::{Context, Result};
use kube::CustomResourceExt;

use atlasmap_operator::AtlasMap;

fn main() -> Result<()> {
    let yaml = serde_yaml::to_string(&AtlasMap::crd()).context("Failed to serialize CRD")?;
    print!("{yaml}");
    Ok(())
}
