//! Schema Module - data types, formatters and schema-level validations
//!
//! The authored schema is a map of named nodes; `ROOT` describes the top of the
//! data model and each property points at a [`DataType`]. Types that name
//! another node are expanded breadth-first into a flat path table:
//!
//! ```text
//! ROOT.people: { type: PersonType, isArray: true }
//! PersonType.name: { type: StringType }
//!
//! → "people"          → PersonType
//!   "people.[].name"  → StringType
//! ```
//!
//! Lookups normalize numeric segments of a binding to `[]`.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::binding::{Binding, PathSegment};
use crate::error::{PlayerError, Result};
use crate::hooks::SyncWaterfallHook;
use crate::validation::{Severity, Trigger, ValidationObject, ValidationProvider};

/// A node of the authored schema: property name → data type
pub type SchemaNode = BTreeMap<String, DataType>;

/// The authored schema: node name (`ROOT` or a type name) → node
pub type Schema = BTreeMap<String, SchemaNode>;

const ROOT: &str = "ROOT";
const ARRAY_SEGMENT: &str = "[]";

/// Metadata attached to a data-model path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataType {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_array: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<Vec<ValidationObject>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FormatReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DataType {
    pub fn named(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Default::default()
        }
    }
}

/// `{ "type": "currency", "symbol": "$" }` style reference to a formatter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatReference {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(flatten)]
    pub options: Map<String, Value>,
}

pub type FormatFn = Arc<dyn Fn(&Value, &Map<String, Value>) -> Value + Send + Sync>;

/// A registered formatter; either direction may be missing (identity)
#[derive(Clone)]
pub struct FormatType {
    pub name: String,
    pub format: Option<FormatFn>,
    pub deformat: Option<FormatFn>,
}

impl FormatType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: None,
            deformat: None,
        }
    }

    pub fn with_format(
        mut self,
        f: impl Fn(&Value, &Map<String, Value>) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.format = Some(Arc::new(f));
        self
    }

    pub fn with_deformat(
        mut self,
        f: impl Fn(&Value, &Map<String, Value>) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.deformat = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for FormatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatType")
            .field("name", &self.name)
            .field("format", &self.format.is_some())
            .field("deformat", &self.deformat.is_some())
            .finish()
    }
}

/// A formatter bound to the options of one reference
#[derive(Debug, Clone)]
pub struct FormatDefinition {
    formatter: FormatType,
    options: Map<String, Value>,
}

impl FormatDefinition {
    pub fn format(&self, value: &Value) -> Value {
        match &self.formatter.format {
            Some(f) => f(value, &self.options),
            None => value.clone(),
        }
    }

    pub fn deformat(&self, value: &Value) -> Value {
        match &self.formatter.deformat {
            Some(f) => f(value, &self.options),
            None => value.clone(),
        }
    }
}

/// Expand the authored schema into `path → DataType`
pub fn parse(schema: &Schema) -> Result<HashMap<String, DataType>> {
    let mut expanded: HashMap<String, DataType> = HashMap::new();

    let Some(root) = schema.get(ROOT) else {
        return Ok(expanded);
    };

    let mut queue: VecDeque<(&SchemaNode, Vec<String>, HashSet<String>)> = VecDeque::new();
    queue.push_back((root, Vec::new(), HashSet::new()));

    while let Some((node, path, visited)) = queue.pop_front() {
        for (prop, data_type) in node {
            let mut nested = path.clone();
            nested.push(prop.clone());
            let nested_str = nested.join(".");

            if expanded.contains_key(&nested_str) {
                return Err(PlayerError::SchemaLoop { path: nested_str });
            }

            if visited.contains(&data_type.type_name) {
                return Err(PlayerError::SchemaTypeLoop {
                    type_name: data_type.type_name.clone(),
                    path: nested_str,
                });
            }

            expanded.insert(nested_str, data_type.clone());

            if data_type.is_array {
                nested.push(ARRAY_SEGMENT.to_string());
            }

            if let Some(child) = schema.get(&data_type.type_name) {
                let mut child_visited = visited.clone();
                child_visited.insert(data_type.type_name.clone());
                queue.push_back((child, nested, child_visited));
            }
        }
    }

    debug!(paths = expanded.len(), "Expanded schema");
    Ok(expanded)
}

// ═══════════════════════════════════════════════════════════════
// Controller
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct SchemaControllerHooks {
    /// Adjust (or supply) the type found for a binding
    pub resolve_type_for_binding: SyncWaterfallHook<Option<DataType>, Binding>,
}

/// Central lookup for everything the schema says about a binding
#[derive(Default)]
pub struct SchemaController {
    pub hooks: SchemaControllerHooks,
    schema: RwLock<HashMap<String, DataType>>,
    types: RwLock<HashMap<String, DataType>>,
    formatters: RwLock<HashMap<String, FormatType>>,
    normalized: DashMap<Binding, String>,
}

impl SchemaController {
    pub fn new(schema: Option<&Schema>) -> Result<Self> {
        let controller = Self::default();
        if let Some(schema) = schema {
            *controller.schema.write() = parse(schema)?;
        }
        Ok(controller)
    }

    pub fn add_formatters(&self, formatters: impl IntoIterator<Item = FormatType>) {
        let mut registry = self.formatters.write();
        for formatter in formatters {
            registry.insert(formatter.name.clone(), formatter);
        }
    }

    pub fn add_data_types(&self, types: impl IntoIterator<Item = DataType>) {
        let mut registry = self.types.write();
        for data_type in types {
            registry.insert(data_type.type_name.clone(), data_type);
        }
    }

    pub fn get_type_definition(&self, type_name: &str) -> Option<DataType> {
        self.types.read().get(type_name).cloned()
    }

    fn normalize_binding(&self, binding: &Binding) -> String {
        if let Some(cached) = self.normalized.get(binding) {
            return cached.clone();
        }

        let normalized = binding
            .as_array()
            .iter()
            .map(|segment| match segment {
                PathSegment::Index(_) => ARRAY_SEGMENT.to_string(),
                PathSegment::Key(key) => key.clone(),
            })
            .collect::<Vec<_>>()
            .join(".");

        self.normalized.insert(binding.clone(), normalized.clone());
        normalized
    }

    /// The schema entry for a binding, after `resolve_type_for_binding`
    pub fn get_type(&self, binding: &Binding) -> Option<DataType> {
        let found = self.schema.read().get(&self.normalize_binding(binding)).cloned();
        self.hooks.resolve_type_for_binding.call(found, binding, &())
    }

    /// The schema entry merged over its registered base type
    ///
    /// Schema validations run before the base type's.
    pub fn get_apparent_type(&self, binding: &Binding) -> Option<DataType> {
        let schema_type = self.get_type(binding)?;

        let Some(base) = self.get_type_definition(&schema_type.type_name) else {
            return Some(schema_type);
        };

        let mut validation = schema_type.validation.clone().unwrap_or_default();
        validation.extend(base.validation.clone().unwrap_or_default());

        let mut extra = base.extra.clone();
        extra.extend(schema_type.extra.clone());

        Some(DataType {
            type_name: schema_type.type_name,
            is_array: schema_type.is_array || base.is_array,
            validation: Some(validation),
            format: schema_type.format.or(base.format),
            default: schema_type.default.or(base.default),
            extra,
        })
    }

    pub fn get_formatter_for_type(&self, reference: &FormatReference) -> Option<FormatDefinition> {
        let formatter = self.formatters.read().get(&reference.type_name).cloned()?;
        Some(FormatDefinition {
            formatter,
            options: reference.options.clone(),
        })
    }

    /// Formatter for the binding's apparent type, if it names one
    pub fn get_formatter(&self, binding: &Binding) -> Option<FormatDefinition> {
        let format = self.get_apparent_type(binding)?.format?;
        self.get_formatter_for_type(&format)
    }

    /// Default value declared on the binding's apparent type
    pub fn get_default_value(&self, binding: &Binding) -> Option<Value> {
        self.get_apparent_type(binding)?.default
    }
}

impl ValidationProvider for SchemaController {
    fn get_validations_for_binding(&self, binding: &Binding) -> Option<Vec<ValidationObject>> {
        let validations = self.get_apparent_type(binding)?.validation?;
        if validations.is_empty() {
            return None;
        }

        Some(
            validations
                .into_iter()
                .map(|mut validation| {
                    validation.severity.get_or_insert(Severity::Error);
                    validation.trigger.get_or_insert(Trigger::Change);
                    validation
                })
                .collect(),
        )
    }
}
