//! Binding evaluated arguments into native rule parameters.
//!
//! Each native rule declares a schema (`ParamSchema`); binding walks the
//! schema in order and matches arguments by name. A plain string handed to a
//! file parameter becomes a file relative to the call site's module
//! directory.

use super::error::BindingError;
use super::types::{FileResource, Resource, ResourceKind};
use crate::lang::ast::Cardinality;
use indexmap::IndexMap;
use std::path::Path;

/// One declared parameter of a native rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSchema {
    pub name: String,
    pub cardinality: Cardinality,
    pub optional: bool,
    pub kind: ResourceKind,
}

impl ParamSchema {
    pub fn single(name: &str, kind: ResourceKind) -> Self {
        Self {
            name: name.to_string(),
            cardinality: Cardinality::Single,
            optional: false,
            kind,
        }
    }

    pub fn optional(name: &str, kind: ResourceKind) -> Self {
        Self {
            optional: true,
            ..Self::single(name, kind)
        }
    }

    /// List parameters are always optional.
    pub fn list(name: &str, kind: ResourceKind) -> Self {
        Self {
            name: name.to_string(),
            cardinality: Cardinality::List,
            optional: true,
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Single(Resource),
    List(Vec<Resource>),
    Absent,
}

/// Bound parameter object handed to a native executor, in schema order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleParameters {
    values: IndexMap<String, ParamValue>,
}

impl RuleParameters {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn single(&self, name: &str) -> Option<&Resource> {
        match self.values.get(name) {
            Some(ParamValue::Single(r)) => Some(r),
            _ => None,
        }
    }

    pub fn list(&self, name: &str) -> &[Resource] {
        match self.values.get(name) {
            Some(ParamValue::List(items)) => items,
            _ => &[],
        }
    }

    pub fn file(&self, name: &str) -> Option<&FileResource> {
        match self.single(name) {
            Some(Resource::File(f)) => Some(f),
            _ => None,
        }
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        match self.single(name) {
            Some(Resource::String(s)) => Some(&s.value),
            _ => None,
        }
    }

    pub fn files(&self, name: &str) -> Vec<&FileResource> {
        self.list(name)
            .iter()
            .filter_map(|r| match r {
                Resource::File(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    /// Every resource in parameter order, flattened.
    pub fn resources(&self) -> Vec<&Resource> {
        self.values
            .values()
            .flat_map(|v| match v {
                ParamValue::Single(r) => std::slice::from_ref(r),
                ParamValue::List(items) => items.as_slice(),
                ParamValue::Absent => &[],
            })
            .collect()
    }
}

/// Bind `values` (argument name to evaluated resources) against `schema`.
pub fn bind(
    rule: &str,
    schema: &[ParamSchema],
    values: &IndexMap<String, Vec<Resource>>,
    module_dir: &Path,
) -> Result<RuleParameters, BindingError> {
    let mut bound = IndexMap::new();
    for param in schema {
        let resources = values.get(&param.name).filter(|r| !r.is_empty());
        let value = match (param.cardinality, resources) {
            (Cardinality::List, None) => ParamValue::List(Vec::new()),
            (Cardinality::List, Some(items)) => ParamValue::List(
                items
                    .iter()
                    .map(|r| convert(rule, param, r, module_dir))
                    .collect::<Result<_, _>>()?,
            ),
            (Cardinality::Single, None) if param.optional => ParamValue::Absent,
            (Cardinality::Single, None) => {
                return Err(BindingError::MissingParameter {
                    rule: rule.to_string(),
                    param: param.name.clone(),
                })
            }
            (Cardinality::Single, Some(items)) if items.len() == 1 => {
                ParamValue::Single(convert(rule, param, &items[0], module_dir)?)
            }
            (Cardinality::Single, Some(items)) => {
                return Err(BindingError::Cardinality {
                    rule: rule.to_string(),
                    param: param.name.clone(),
                    count: items.len(),
                })
            }
        };
        bound.insert(param.name.clone(), value);
    }
    Ok(RuleParameters { values: bound })
}

fn convert(
    rule: &str,
    param: &ParamSchema,
    resource: &Resource,
    module_dir: &Path,
) -> Result<Resource, BindingError> {
    match (param.kind, resource) {
        (ResourceKind::Any, r) => Ok(r.clone()),
        (ResourceKind::File, Resource::String(s)) => Ok(Resource::File(FileResource {
            path: module_dir.join(&s.value),
            root: module_dir.to_path_buf(),
            placeholder: None,
            provenance: s.provenance.clone(),
        })),
        (expected, r) if expected == r.kind() => Ok(r.clone()),
        (expected, r) => Err(BindingError::Unconvertible {
            rule: rule.to_string(),
            param: param.name.clone(),
            expected,
            found: r.kind(),
        }),
    }
}
