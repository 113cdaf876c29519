//! Configuration records produced by the metadata ingestor and stored
//! verbatim in the registry tables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a registered action is invoked.
///
/// `action_signature` lists argument names in call order; the optional
/// alternative signature is tried when the primary is not covered by the
/// message. Type descriptors are lowercased primitive names (`string`,
/// `number`, `boolean`, `array`, `object`), optionally suffixed `?` for
/// optional arguments; a compound `a.<B>` reduces to `a`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfiguration {
    pub action_name: String,
    pub action_signature: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_alternative_signature: Option<Vec<String>>,
    #[serde(default)]
    pub argument_configuration_by_argument_name: HashMap<String, String>,
    pub context_name: String,
    pub file_path: String,
    pub method_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_name_to_extend: Option<String>,
}

/// A parameterized action whose effective name and argument defaults are
/// produced by evaluating templates against the concrete caller's payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendableActionConfiguration {
    #[serde(flatten)]
    pub base: ActionConfiguration,
    /// Template producing the effective action name.
    pub extendable_action_name: String,
    /// Argument name to default-value template.
    #[serde(default)]
    pub extendable_action_argument_default: HashMap<String, String>,
    /// Templates that evaluate to an additional candidate signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extendable_alternative_action_signature: Option<Vec<String>>,
}

/// Shape of a tracked resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStructure {
    pub resource_type: String,
    #[serde(default)]
    pub properties_by_argument_name: HashMap<String, String>,
    pub context_name: String,
    pub file_path: String,
}
