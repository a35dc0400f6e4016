//! CPU and memory requests/limits for the AtlasMap container

use std::collections::BTreeMap;

use atlasmap_common::{parse_quantity, CanonicalQuantity, QuantityError};
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::crd::AtlasMapSpec;

const CPU: &str = "cpu";
const MEMORY: &str = "memory";

/// Parse a spec quantity; an empty field means zero
fn desired_quantity(value: &str) -> Result<CanonicalQuantity, QuantityError> {
    if value.is_empty() {
        Ok(CanonicalQuantity::zero())
    } else {
        parse_quantity(value)
    }
}

fn quantities_changed(
    live: Option<&BTreeMap<String, Quantity>>,
    cpu: &str,
    memory: &str,
) -> Result<bool, QuantityError> {
    for (resource, desired) in [(CPU, cpu), (MEMORY, memory)] {
        let live = live
            .and_then(|list| list.get(resource))
            .map(|q| parse_quantity(&q.0))
            .transpose()?
            .unwrap_or_else(CanonicalQuantity::zero);

        if live.to_string() != desired_quantity(desired)?.to_string() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Whether the container's live resources drift from the AtlasMap's.
///
/// Quantities are compared in canonical form, so `"0.5"` and `"500m"` match.
/// A malformed quantity on either side is an error, never "unchanged".
pub fn resources_changed(
    live: Option<&ResourceRequirements>,
    spec: &AtlasMapSpec,
) -> Result<bool, QuantityError> {
    let limits_changed = quantities_changed(
        live.and_then(|r| r.limits.as_ref()),
        &spec.limit_cpu,
        &spec.limit_memory,
    )?;
    let requests_changed = quantities_changed(
        live.and_then(|r| r.requests.as_ref()),
        &spec.request_cpu,
        &spec.request_memory,
    )?;
    Ok(limits_changed || requests_changed)
}

fn quantity_list(cpu: &str, memory: &str) -> Result<Option<BTreeMap<String, Quantity>>, QuantityError> {
    let mut list = BTreeMap::new();
    for (resource, value) in [(CPU, cpu), (MEMORY, memory)] {
        if !value.is_empty() {
            let canonical = parse_quantity(value)?;
            list.insert(resource.to_string(), Quantity(canonical.to_string()));
        }
    }
    Ok((!list.is_empty()).then_some(list))
}

/// Requests and limits built from the AtlasMap; empty fields are omitted
pub fn desired_requirements(spec: &AtlasMapSpec) -> Result<ResourceRequirements, QuantityError> {
    Ok(ResourceRequirements {
        limits: quantity_list(&spec.limit_cpu, &spec.limit_memory)?,
        requests: quantity_list(&spec.request_cpu, &spec.request_memory)?,
        ..Default::default()
    })
}
