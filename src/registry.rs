use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use log::{error, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transformation::{
    BoundTransformation, InvalidConfigurationError, TargetKind, Transformation,
};
use crate::version_registry::VersionRegistry;

/// Wire description of one versioned object type: its name and the field
/// type of each of its fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSchema {
    pub name: String,
    pub fields: BTreeMap<String, String>,
}

impl ObjectSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(
        mut self,
        field: impl Into<String>,
        field_type: impl Into<String>,
    ) -> Self {
        self.fields.insert(field.into(), field_type.into());
        self
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn field_type(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// The registration table the binding pass resolves `bases` references
/// against: every versioned object type and bare field type, registered
/// explicitly at startup.
#[derive(Debug, Default)]
pub struct TargetIndex {
    objects: HashMap<String, Arc<ObjectSchema>>,
    field_types: HashSet<String>,
}

/// A `bases` entry resolved to a concrete binding target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub owner: String,
    pub kind: TargetKind,
    pub field: Option<String>,
}

impl TargetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_object(&mut self, schema: ObjectSchema) -> Arc<ObjectSchema> {
        let schema = Arc::new(schema);
        self.objects.insert(schema.name.clone(), Arc::clone(&schema));
        schema
    }

    pub fn register_field_type(&mut self, name: impl Into<String>) {
        self.field_types.insert(name.into());
    }

    pub fn object(&self, name: &str) -> Option<&Arc<ObjectSchema>> {
        self.objects.get(name)
    }

    pub fn is_field_type(&self, name: &str) -> bool {
        self.field_types.contains(name)
    }

    /// Resolve a dotted `bases` reference: a registered object type, a
    /// registered field type, or `ObjectType.field`. The whole string is
    /// tried first; only then is a final field segment split off.
    pub fn resolve(&self, base: &str) -> Result<ResolvedTarget, TargetResolutionError> {
        let format = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap();
        if !format.is_match(base) {
            return Err(TargetResolutionError::InvalidFormat(base.to_string()));
        }

        if self.objects.contains_key(base) {
            return Ok(ResolvedTarget {
                owner: base.to_string(),
                kind: TargetKind::ObjectType,
                field: None,
            });
        }
        if self.field_types.contains(base) {
            return Ok(ResolvedTarget {
                owner: base.to_string(),
                kind: TargetKind::FieldType,
                field: None,
            });
        }

        let (owner, field) = match base.rsplit_once('.') {
            Some(parts) => parts,
            None => return Err(TargetResolutionError::UnknownTarget(base.to_string())),
        };

        if self.field_types.contains(owner) {
            return Err(TargetResolutionError::FieldOnFieldType {
                field_type: owner.to_string(),
                field: field.to_string(),
            });
        }
        let schema = self
            .objects
            .get(owner)
            .ok_or_else(|| TargetResolutionError::UnknownTarget(base.to_string()))?;
        if !schema.has_field(field) {
            return Err(TargetResolutionError::UnknownField {
                object: owner.to_string(),
                field: field.to_string(),
            });
        }

        Ok(ResolvedTarget {
            owner: owner.to_string(),
            kind: TargetKind::ObjectField,
            field: Some(field.to_string()),
        })
    }
}

#[derive(Debug, Error)]
pub enum TargetResolutionError {
    #[error("malformed base reference: {0:?}")]
    InvalidFormat(String),

    #[error("base reference {0} matches no registered object or field type")]
    UnknownTarget(String),

    #[error("object type {object} has no field {field}")]
    UnknownField { object: String, field: String },

    #[error("field type {field_type} cannot carry a field reference ({field})")]
    FieldOnFieldType { field_type: String, field: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TargetKey {
    owner: String,
    field: Option<String>,
}

/// Process-wide store of bound transformations, keyed by owner type and, for
/// specific-field targets, field name.
///
/// Populated exactly once by `bind_all` before the first request is served;
/// read-only afterwards.
#[derive(Debug, Default)]
pub struct TransformationRegistry {
    bindings: HashMap<TargetKey, Vec<BoundTransformation>>,
    ready: bool,
}

/// What the binding pass did: how many bindings were registered and which
/// declarations (or single bases) were skipped, with the reason.
#[derive(Debug, Clone, Default)]
pub struct BindingReport {
    pub bound: usize,
    pub skipped: Vec<String>,
}

impl BindingReport {
    pub fn has_failures(&self) -> bool {
        !self.skipped.is_empty()
    }
}

impl TransformationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one more bound transformation on its owner type.
    pub fn add_transformation(&mut self, bound: BoundTransformation) {
        let key = TargetKey {
            owner: bound.owner().to_string(),
            field: bound.field_name().map(String::from),
        };
        self.bindings.entry(key).or_default().push(bound);
    }

    /// All transformations bound to `(owner, field)`; `field` is `None` for
    /// object-level and field-type owners.
    pub fn transformations_for(&self, owner: &str, field: Option<&str>) -> &[BoundTransformation] {
        let key = TargetKey {
            owner: owner.to_string(),
            field: field.map(String::from),
        };
        self.bindings.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// One-time binding pass over the declaration table.
    ///
    /// For every declaration, each `bases` entry is resolved against the
    /// target index and one `BoundTransformation` is registered per resolved
    /// target. A declaration without a registry-resolvable version or with
    /// no bases, and any single unresolvable base, is logged as an error and
    /// skipped; the remaining registrations proceed. Running the pass again
    /// is a no-op.
    pub fn bind_all(
        &mut self,
        declarations: &[Arc<dyn Transformation>],
        index: &TargetIndex,
        versions: &VersionRegistry,
    ) -> BindingReport {
        let mut report = BindingReport::default();

        if self.ready {
            warn!("transformation binding pass already ran; ignoring repeat call");
            return report;
        }

        for declaration in declarations {
            let id = declaration.id();

            if declaration.version().is_empty() {
                let err = InvalidConfigurationError::MissingVersion { id: id.to_string() };
                error!("skipping transformation: {err}");
                report.skipped.push(format!("{id}: {err}"));
                continue;
            }
            if let Err(source) = versions.rank(declaration.version()) {
                let err = InvalidConfigurationError::UnresolvableVersion {
                    id: id.to_string(),
                    source,
                };
                error!("skipping transformation: {err}");
                report.skipped.push(format!("{id}: {err}"));
                continue;
            }
            let bases = declaration.bases();
            if bases.is_empty() {
                let err = InvalidConfigurationError::MissingBases { id: id.to_string() };
                error!("skipping transformation: {err}");
                report.skipped.push(format!("{id}: {err}"));
                continue;
            }

            for base in bases {
                let target = match index.resolve(base) {
                    Ok(target) => target,
                    Err(err) => {
                        error!("transformation {id} has an invalid base {base:?}: {err}");
                        report.skipped.push(format!("{id}: {err}"));
                        continue;
                    }
                };

                match BoundTransformation::bind(
                    Arc::clone(declaration),
                    &target.owner,
                    target.kind,
                    target.field,
                    versions,
                ) {
                    Ok(bound) => {
                        self.add_transformation(bound);
                        report.bound += 1;
                    }
                    Err(err) => {
                        error!("transformation {id} could not be bound to {base}: {err}");
                        report.skipped.push(format!("{id}: {err}"));
                    }
                }
            }
        }

        self.ready = true;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Declared {
        id: &'static str,
        version: &'static str,
        bases: &'static [&'static str],
    }

    impl Transformation for Declared {
        fn id(&self) -> &str {
            self.id
        }

        fn version(&self) -> &str {
            self.version
        }

        fn bases(&self) -> &[&str] {
            self.bases
        }
    }

    fn declared(
        id: &'static str,
        version: &'static str,
        bases: &'static [&'static str],
    ) -> Arc<dyn Transformation> {
        Arc::new(Declared { id, version, bases })
    }

    fn index() -> TargetIndex {
        let mut index = TargetIndex::new();
        index.register_field_type("MoneyField");
        index.register_object(
            ObjectSchema::new("Store")
                .with_field("name", "CharField")
                .with_field("total", "MoneyField"),
        );
        index
    }

    fn versions() -> VersionRegistry {
        VersionRegistry::new(["2.0.0", "2.2.0", "2.2.2"]).unwrap()
    }

    #[test]
    fn test_resolve_object() {
        let target = index().resolve("Store").unwrap();
        assert_eq!(
            target,
            ResolvedTarget {
                owner: "Store".to_string(),
                kind: TargetKind::ObjectType,
                field: None,
            }
        );
    }

    #[test]
    fn test_resolve_field_type() {
        let target = index().resolve("MoneyField").unwrap();
        assert_eq!(target.kind, TargetKind::FieldType);
        assert_eq!(target.owner, "MoneyField");
    }

    #[test]
    fn test_resolve_specific_field() {
        let target = index().resolve("Store.name").unwrap();
        assert_eq!(
            target,
            ResolvedTarget {
                owner: "Store".to_string(),
                kind: TargetKind::ObjectField,
                field: Some("name".to_string()),
            }
        );
    }

    #[test]
    fn test_resolve_unknown_target() {
        assert!(matches!(
            index().resolve("Missing"),
            Err(TargetResolutionError::UnknownTarget(_))
        ));
        assert!(matches!(
            index().resolve("Missing.field"),
            Err(TargetResolutionError::UnknownTarget(_))
        ));
    }

    #[test]
    fn test_resolve_unknown_field() {
        assert!(matches!(
            index().resolve("Store.missing"),
            Err(TargetResolutionError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_resolve_field_on_field_type() {
        assert!(matches!(
            index().resolve("MoneyField.amount"),
            Err(TargetResolutionError::FieldOnFieldType { .. })
        ));
    }

    #[test]
    fn test_resolve_malformed() {
        assert!(matches!(
            index().resolve("Store..name"),
            Err(TargetResolutionError::InvalidFormat(_))
        ));
        assert!(matches!(
            index().resolve(""),
            Err(TargetResolutionError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_bind_all_registers_per_target() {
        let mut registry = TransformationRegistry::new();
        let declarations = vec![
            declared("money_units", "2.2.0", &["MoneyField"]),
            declared("store_rename", "2.2.0", &["Store"]),
            declared("store_name", "2.2.2", &["Store.name"]),
        ];

        let report = registry.bind_all(&declarations, &index(), &versions());

        assert_eq!(report.bound, 3);
        assert!(!report.has_failures());
        assert_eq!(registry.transformations_for("MoneyField", None).len(), 1);
        assert_eq!(registry.transformations_for("Store", None).len(), 1);
        assert_eq!(registry.transformations_for("Store", Some("name")).len(), 1);
        assert!(registry.is_ready());
    }

    #[test]
    fn test_bind_all_one_instance_per_base() {
        let mut registry = TransformationRegistry::new();
        let declarations = vec![declared("shared", "2.2.0", &["Store", "Store.name"])];

        let report = registry.bind_all(&declarations, &index(), &versions());

        assert_eq!(report.bound, 2);
        assert_eq!(registry.transformations_for("Store", None).len(), 1);
        assert_eq!(registry.transformations_for("Store", Some("name")).len(), 1);
    }

    #[test]
    fn test_bind_all_is_idempotent() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut registry = TransformationRegistry::new();
        let declarations = vec![declared("money_units", "2.2.0", &["MoneyField"])];

        let first = registry.bind_all(&declarations, &index(), &versions());
        let second = registry.bind_all(&declarations, &index(), &versions());

        assert_eq!(first.bound, 1);
        assert_eq!(second.bound, 0);
        assert_eq!(registry.transformations_for("MoneyField", None).len(), 1);
    }

    #[test]
    fn test_bind_all_partial_failure() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut registry = TransformationRegistry::new();
        let declarations = vec![
            declared("good_money", "2.2.0", &["MoneyField"]),
            declared("broken", "2.2.0", &["Nowhere.field"]),
            declared("good_store", "2.2.2", &["Store"]),
        ];

        let report = registry.bind_all(&declarations, &index(), &versions());

        assert_eq!(report.bound, 2);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].starts_with("broken"));
        assert_eq!(registry.transformations_for("MoneyField", None).len(), 1);
        assert_eq!(registry.transformations_for("Store", None).len(), 1);
    }

    #[test]
    fn test_bind_all_skips_unresolvable_version() {
        let mut registry = TransformationRegistry::new();
        let declarations = vec![
            declared("from_the_future", "9.9.9", &["Store"]),
            declared("good_store", "2.0.0", &["Store"]),
        ];

        let report = registry.bind_all(&declarations, &index(), &versions());

        assert_eq!(report.bound, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(registry.transformations_for("Store", None).len(), 1);
    }

    #[test]
    fn test_bind_all_skips_missing_declarations() {
        let mut registry = TransformationRegistry::new();
        let declarations = vec![
            declared("versionless", "", &["Store"]),
            declared("baseless", "2.0.0", &[]),
        ];

        let report = registry.bind_all(&declarations, &index(), &versions());

        assert_eq!(report.bound, 0);
        assert_eq!(report.skipped.len(), 2);
    }

    #[test]
    fn test_unbound_target_is_empty() {
        let registry = TransformationRegistry::new();
        assert!(registry.transformations_for("Store", None).is_empty());
    }
}
