//! Output model: an insertion-ordered graph of resource declarations
//! plus exported outputs.
//!
//! Property bags are raw `serde_json::Value`s; the field names inside them
//! are the target platform's own schema. References between resources use
//! the `Ref` / `Fn::GetAtt` intrinsics built by [`reference`] and
//! [`get_att`], which lets [`ResourceGraph::verify_references`] check that
//! every edge lands on a key present in the same graph.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{CompileError, CompileResult};

/// Pseudo parameters (`AWS::Region`, `AWS::NoValue`, ...) are provided by the
/// platform and never declared in the graph.
const PSEUDO_PARAMETER_PREFIX: &str = "AWS::";

/// `{"Ref": id}`
pub fn reference(id: &str) -> Value {
    json!({ "Ref": id })
}

/// `{"Fn::GetAtt": [id, attribute]}`
pub fn get_att(id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [id, attribute] })
}

/// `{"Fn::Join": [delimiter, parts]}`
pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [delimiter, parts] })
}

/// Convert a tag map into the platform's `[{Key, Value}]` list.
///
/// Returns `None` for an empty map so callers can omit the field.
pub fn tag_list(tags: &IndexMap<String, String>) -> Option<Value> {
    if tags.is_empty() {
        return None;
    }
    Some(Value::Array(
        tags.iter()
            .map(|(k, v)| json!({ "Key": k, "Value": v }))
            .collect(),
    ))
}

/// One resource declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub properties: Value,
}

impl Resource {
    pub fn new(kind: &str, properties: Value) -> Self {
        Self {
            kind: kind.to_string(),
            deletion_policy: None,
            depends_on: Vec::new(),
            properties,
        }
    }

    /// A declaration with no property bag (e.g. an internet gateway).
    pub fn bare(kind: &str) -> Self {
        Self::new(kind, Value::Null)
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Delete the physical resource when the declaration is removed.
    pub fn delete_on_removal(mut self) -> Self {
        self.deletion_policy = Some("Delete".to_string());
        self
    }

    /// Identifiers this declaration points at, excluding pseudo parameters.
    pub fn references(&self) -> Vec<String> {
        let mut refs = self.depends_on.clone();
        collect_references(&self.properties, &mut refs);
        refs
    }
}

/// An exported output value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub description: String,
    pub value: Value,
    pub export: Export,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Export {
    pub name: Value,
}

/// Logical id → declaration, plus output id → exported value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceGraph {
    #[serde(default)]
    pub resources: IndexMap<String, Resource>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, Output>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a declaration. Identifiers are written exactly once.
    pub fn insert(&mut self, id: impl Into<String>, resource: Resource) -> CompileResult<()> {
        let id = id.into();
        if self.resources.contains_key(&id) {
            return Err(CompileError::DuplicateLogicalId(id));
        }
        self.resources.insert(id, resource);
        Ok(())
    }

    pub fn insert_output(&mut self, id: impl Into<String>, output: Output) -> CompileResult<()> {
        let id = id.into();
        if self.outputs.contains_key(&id) {
            return Err(CompileError::DuplicateLogicalId(id));
        }
        self.outputs.insert(id, output);
        Ok(())
    }

    /// Union `other` into this graph, refusing any shared identifier.
    pub fn extend(&mut self, other: ResourceGraph) -> CompileResult<()> {
        for (id, resource) in other.resources {
            self.insert(id, resource)?;
        }
        for (id, output) in other.outputs {
            self.insert_output(id, output)?;
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resource identifiers in insertion order.
    pub fn logical_ids(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Output identifiers in insertion order.
    pub fn output_ids(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }

    /// All declarations of the given platform type, in insertion order.
    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = (&'a str, &'a Resource)> {
        self.resources
            .iter()
            .filter(move |(_, r)| r.kind == kind)
            .map(|(id, r)| (id.as_str(), r))
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.of_kind(kind).count()
    }

    /// The graph as a template document: `{"Resources": ..., "Outputs": ...}`.
    pub fn to_template(&self) -> Value {
        let mut template = serde_json::Map::new();
        template.insert("Resources".to_string(), json!(self.resources));
        if !self.outputs.is_empty() {
            template.insert("Outputs".to_string(), json!(self.outputs));
        }
        Value::Object(template)
    }

    /// Insert every resource and output into a host template, creating the
    /// `Resources` / `Outputs` sections when missing.
    ///
    /// Refuses any key the host already declares. On error the host
    /// template is left untouched.
    pub fn merge_into_template(&self, template: &mut Value) -> CompileResult<()> {
        let root = template
            .as_object_mut()
            .ok_or_else(|| CompileError::MalformedTemplate("template is not an object".to_string()))?;

        for (section, keys) in [
            ("Resources", self.resources.keys().collect::<Vec<_>>()),
            ("Outputs", self.outputs.keys().collect::<Vec<_>>()),
        ] {
            match root.get(section) {
                None => {}
                Some(Value::Object(existing)) => {
                    if let Some(key) = keys.into_iter().find(|k| existing.contains_key(k.as_str())) {
                        return Err(CompileError::DuplicateLogicalId(key.clone()));
                    }
                }
                Some(_) => {
                    return Err(CompileError::MalformedTemplate(format!(
                        "{section} is not an object"
                    )));
                }
            }
        }

        if let Value::Object(resources) = root.entry("Resources").or_insert_with(|| json!({})) {
            for (id, resource) in &self.resources {
                resources.insert(id.clone(), json!(resource));
            }
        }
        if !self.outputs.is_empty() {
            if let Value::Object(outputs) = root.entry("Outputs").or_insert_with(|| json!({})) {
                for (id, output) in &self.outputs {
                    outputs.insert(id.clone(), json!(output));
                }
            }
        }
        Ok(())
    }

    /// Check referential closure: every `Ref`, `Fn::GetAtt` target and
    /// `DependsOn` entry of every resource and output resolves to a key of
    /// this graph.
    pub fn verify_references(&self) -> CompileResult<()> {
        for (id, resource) in &self.resources {
            for target in resource.references() {
                if !self.contains(&target) {
                    return Err(CompileError::DanglingReference {
                        from: id.clone(),
                        target,
                    });
                }
            }
        }
        for (id, output) in &self.outputs {
            let mut refs = Vec::new();
            collect_references(&output.value, &mut refs);
            collect_references(&output.export.name, &mut refs);
            if let Some(target) = refs.into_iter().find(|t| !self.contains(t)) {
                return Err(CompileError::DanglingReference {
                    from: id.clone(),
                    target,
                });
            }
        }
        Ok(())
    }
}

fn collect_references(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(target)) = map.get("Ref") {
                if !target.starts_with(PSEUDO_PARAMETER_PREFIX) {
                    out.push(target.clone());
                }
            }
            if let Some(Value::Array(args)) = map.get("Fn::GetAtt") {
                if let Some(Value::String(target)) = args.first() {
                    out.push(target.clone());
                }
            }
            for nested in map.values() {
                collect_references(nested, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, out);
            }
        }
        _ => {}
    }
}
