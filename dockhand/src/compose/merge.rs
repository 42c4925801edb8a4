//! Architecture override merge
//!
//! Pure transform: no I/O. Services are merged as JSON values so that whatever shape
//! a field was written in passes through untouched.

use serde_json::Value;

use crate::compose::dynamic::{ComposeDocument, DynamicCompose, ServiceDescriptor};
use crate::errors::DockhandError;

/// Canonical architecture name used to match overrides
pub fn normalize_architecture(arch: &str) -> &str {
    match arch {
        "x86_64" | "x64" => "amd64",
        "aarch64" => "arm64",
        "armv7l" | "armhf" => "arm",
        other => other,
    }
}

/// Deep-merge `patch` onto `base`.
///
/// Objects merge key by key. Arrays and scalars in the patch replace the base value
/// wholesale; arrays are never concatenated.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match base_map.get_mut(key) {
                    Some(base_value) if base_value.is_object() && patch_value.is_object() => {
                        deep_merge(base_value, patch_value);
                    }
                    _ => {
                        base_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

/// Resolve the service list for one architecture
pub fn merge_for_architecture(
    compose: &DynamicCompose,
    architecture: &str,
) -> Result<Vec<ServiceDescriptor>, DockhandError> {
    let arch = normalize_architecture(architecture);
    let Some(entry) = compose
        .overrides
        .iter()
        .find(|o| normalize_architecture(&o.architecture) == arch)
    else {
        return Ok(compose.services.clone());
    };

    compose
        .services
        .iter()
        .map(|service| {
            let patch = entry
                .services
                .iter()
                .find(|p| p.get("name").and_then(Value::as_str) == Some(service.name.as_str()));
            match patch {
                None => Ok(service.clone()),
                Some(patch) => {
                    let mut merged = serde_json::to_value(service)?;
                    deep_merge(&mut merged, patch);
                    serde_json::from_value(merged).map_err(|e| {
                        DockhandError::ValidationError(format!(
                            "Override for service '{}' on {} is invalid: {}",
                            service.name, arch, e
                        ))
                    })
                }
            }
        })
        .collect()
}

/// Merge for `architecture` and build the compose document
pub fn resolve_document(
    compose: &DynamicCompose,
    architecture: &str,
) -> Result<ComposeDocument, DockhandError> {
    let services = merge_for_architecture(compose, architecture)?;
    Ok(ComposeDocument::from_services(&services))
}
