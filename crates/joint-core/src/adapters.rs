//! Result shape adapters: simulator and solver outputs to blackboard items.
//!
//! All functions are pure and preserve the order of their input. Missing
//! optional keys become JSON `null` rather than errors, since the remote
//! components are free to omit annotations they do not compute.

use joint_types::{Item, ResourceParameter, SolverItem};
use serde_json::{Map, Value};

/// Field of a simulator resource object that carries the resource name.
pub const RESOURCE_NAME_FIELD: &str = "resource_name";

/// Extract resource parameters from a `run_tick` result.
///
/// Reads the `resources` array; entries that are not JSON objects are
/// skipped. The [`RESOURCE_NAME_FIELD`] becomes the name (an empty string
/// if absent) and every other field goes into `parameters`.
pub fn resource_parameters(simulation_output: &Value) -> Vec<ResourceParameter> {
    simulation_output
        .get("resources")
        .and_then(Value::as_array)
        .map(|resources| {
            resources
                .iter()
                .filter_map(Value::as_object)
                .map(resource_parameter)
                .collect()
        })
        .unwrap_or_default()
}

fn resource_parameter(resource: &Map<String, Value>) -> ResourceParameter {
    let name = resource
        .get(RESOURCE_NAME_FIELD)
        .map(value_as_name)
        .unwrap_or_default();
    let parameters = resource
        .iter()
        .filter(|(key, _)| key.as_str() != RESOURCE_NAME_FIELD)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    ResourceParameter { name, parameters }
}

fn value_as_name(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Flatten resource parameters into `<name>.<param>` items.
pub fn items_from_resource_parameters(resources: &[ResourceParameter]) -> Vec<Item> {
    resources
        .iter()
        .flat_map(|resource| {
            resource.parameters.iter().map(move |(param, value)| Item {
                reference: format!("{}.{param}", resource.name),
                value: value.clone(),
            })
        })
        .collect()
}

/// Turn solver working memory into annotated items.
///
/// Each `wm` entry contributes its `content` as the value and
/// `non_factor.{belief,probability,accuracy}` as annotations.
pub fn items_from_solver_result(solver_result: &Value) -> Vec<SolverItem> {
    let Some(wm) = solver_result.get("wm").and_then(Value::as_object) else {
        return Vec::new();
    };
    wm.iter()
        .map(|(key, entry)| {
            let non_factor = entry.get("non_factor");
            let annotation = |name: &str| {
                non_factor
                    .and_then(|nf| nf.get(name))
                    .cloned()
                    .unwrap_or(Value::Null)
            };
            SolverItem {
                reference: key.clone(),
                value: entry.get("content").cloned().unwrap_or(Value::Null),
                belief: annotation("belief"),
                probability: annotation("probability"),
                accuracy: annotation("accuracy"),
            }
        })
        .collect()
}

/// Turn the temporal solver's `signified` map into plain items.
pub fn items_from_temporal_result(temporal_result: &Value) -> Vec<Item> {
    temporal_result
        .get("signified")
        .and_then(Value::as_object)
        .map(|signified| {
            signified
                .iter()
                .map(|(key, value)| Item {
                    reference: key.clone(),
                    value: value.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}
