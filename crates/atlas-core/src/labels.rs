//! Fixed labels shared by the builders and the serving layer.
//!
//! Transition graph nodes are drawn from a small vocabulary: the synthetic
//! start and end labels, the emergency department label, and raw care unit
//! names. [`UNKNOWN_LOCATION`] is never a node.

/// Synthetic node every admission pathway starts from.
pub const START: &str = "Admissions";

/// Synthetic node for discharge events.
pub const END: &str = "Discharge";

/// Node used for every emergency department contact.
pub const EMERGENCY_DEPARTMENT: &str = "Emergency Department";

/// Care unit sentinel used by the source data for unrecorded locations.
pub const UNKNOWN_LOCATION: &str = "UNKNOWN";

/// Placeholder for missing categorical values (route, drug, ...).
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Node name inserted for a skipped hierarchy level under the placeholder policy.
pub const UNSPECIFIED_LEVEL: &str = "Unspecified";

/// Root label of the diagnosis hierarchy.
pub const DIAGNOSIS_ROOT: &str = "Diagnoses";

/// Returns the categorical value, or [`UNKNOWN_CATEGORY`] when it is missing.
pub fn or_unknown(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => UNKNOWN_CATEGORY.to_string(),
    }
}

/// Whether a candidate location may appear as a graph node.
pub fn is_node_label(label: &str) -> bool {
    !label.is_empty() && label != UNKNOWN_LOCATION
}
