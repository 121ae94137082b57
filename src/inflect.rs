//! Kind <-> resource-type inflection.
//!
//! A Kind like `Pod` maps to the lower-case plural resource type `pods`.
//! Irregular forms are table-driven; everything else follows three ordered
//! rules. The reverse direction must reconstruct the exact Kind because the
//! cross-reference index is keyed by Kind, so the reverse table also covers
//! the camel-case kinds watched by default (first-letter capitalization
//! cannot recover `StatefulSet` from `statefulsets`).

/// Irregular kind (lower-case) -> resource type.
const IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("ingress", "ingresses"),
    ("networkpolicy", "networkpolicies"),
    ("poddisruptionbudget", "poddisruptionbudgets"),
    ("priorityclass", "priorityclasses"),
    ("storageclass", "storageclasses"),
];

/// Irregular resource type -> Kind, including the compound kinds from the
/// default watch set.
const IRREGULAR_SINGULARS: &[(&str, &str)] = &[
    ("endpoints", "Endpoints"),
    ("ingresses", "Ingress"),
    ("networkpolicies", "NetworkPolicy"),
    ("poddisruptionbudgets", "PodDisruptionBudget"),
    ("priorityclasses", "PriorityClass"),
    ("storageclasses", "StorageClass"),
    ("customresourcedefinitions", "CustomResourceDefinition"),
    ("configmaps", "ConfigMap"),
    ("replicasets", "ReplicaSet"),
    ("statefulsets", "StatefulSet"),
    ("daemonsets", "DaemonSet"),
    ("cronjobs", "CronJob"),
    ("persistentvolumes", "PersistentVolume"),
    ("persistentvolumeclaims", "PersistentVolumeClaim"),
];

/// Plurals from the `s -> +es` rule whose stem ends in a single `s`. The
/// `ses` suffix is shared with `se` kinds pluralized by the plain `+s`
/// rule (`Lease -> leases`, `Database -> databases`), so the two cannot be
/// told apart from the string alone; the known single-`s` stems live here
/// and everything else ending in `ses` is read as a `se` kind.
const S_STEM_PLURALS: &[(&str, &str)] = &[
    ("statuses", "Status"),
    ("redises", "Redis"),
];

/// Convert a Kind (e.g. `Pod`) to its resource type (e.g. `pods`).
pub fn kind_to_resource_type(kind: &str) -> String {
    let lower = kind.to_ascii_lowercase();

    if let Some((_, plural)) = IRREGULAR_PLURALS.iter().find(|(k, _)| *k == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') {
        return format!("{lower}es");
    }
    if let Some(stem) = lower.strip_suffix('y') {
        return format!("{stem}ies");
    }
    format!("{lower}s")
}

/// Convert a resource type (e.g. `pods`) back to its Kind (e.g. `Pod`).
///
/// Inverse of [`kind_to_resource_type`]: `ies` came from a trailing `y`;
/// `sses` from the `+es` rule on a double-`s` stem; a bare `ses` is a `se`
/// kind with `s` appended unless the table above says otherwise; any other
/// trailing `s` was appended.
pub fn resource_type_to_kind(resource_type: &str) -> String {
    if let Some((_, kind)) = IRREGULAR_SINGULARS
        .iter()
        .find(|(rt, _)| *rt == resource_type)
    {
        return (*kind).to_string();
    }
    if let Some((_, kind)) = S_STEM_PLURALS.iter().find(|(rt, _)| *rt == resource_type) {
        return (*kind).to_string();
    }

    let singular = if let Some(stem) = resource_type.strip_suffix("ies") {
        format!("{stem}y")
    } else if let Some(stem) = resource_type
        .strip_suffix("es")
        .filter(|stem| stem.ends_with("ss"))
    {
        stem.to_string()
    } else if let Some(stem) = resource_type.strip_suffix('s') {
        stem.to_string()
    } else {
        resource_type.to_string()
    };

    capitalize(&singular)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
