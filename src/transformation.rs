use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::version_registry::{UnknownVersionError, VersionRegistry};

/// What a transformation is bound to.
///
/// The three kinds are mutually exclusive. The kind also fixes the
/// granularity tier used to break ordering ties between transformations at
/// the same version rank: generic field-type edits are the most local and
/// apply first, whole-object edits apply last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
    /// A generic wire field type (every field of that type).
    FieldType,
    /// A whole object type.
    ObjectType,
    /// One specific field of one object type.
    ObjectField,
}

impl TargetKind {
    pub(crate) fn tier(self) -> u8 {
        match self {
            TargetKind::FieldType => 0,
            TargetKind::ObjectField => 1,
            TargetKind::ObjectType => 2,
        }
    }
}

/// Direction of a transformation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client payload to current internal shape.
    Forwards,
    /// Current internal shape to the shape an older client expects.
    Backwards,
}

/// Per-request context the engine needs: the version the client declared and
/// the request's query parameters.
///
/// The version string is opaque here; whatever negotiates versions with
/// clients (a header, typically) extracts it before the engine runs.
#[derive(Debug, Clone)]
pub struct RequestContext {
    version: String,
    query: HashMap<String, String>,
}

impl RequestContext {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            query: HashMap::new(),
        }
    }

    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}

/// Outcome of a single transformation hook.
pub type HookResult = Result<Value, HookError>;

#[derive(Debug, Error)]
pub enum HookError {
    /// The hook is not implemented for this direction and granularity. This
    /// is the normal case for most hooks of a transformation and is skipped
    /// silently, never surfaced.
    #[error("hook not implemented")]
    NotImplemented,

    /// The hook ran and failed. Fatal for the request.
    #[error("{0}")]
    Failed(String),
}

/// One atomic, versioned, reversible edit to a wire shape.
///
/// A transformation declares the version it belongs to and the targets it
/// applies to (`bases`), and implements the hooks matching its granularity.
/// `bases` entries are dotted references resolved at binding time:
/// an object type (`StoreDetail`), a bare field type (`MoneyField`), or one
/// field of an object type (`OrderSpread.unit`).
///
/// Field-granularity hooks receive the value of the field they are staged
/// against and return the transformed value. Object hooks receive and return
/// the whole payload mapping. Backwards hooks additionally get the internal
/// object when one is available.
pub trait Transformation: Send + Sync {
    /// Stable identifier used in logs and error messages.
    fn id(&self) -> &str;

    /// The version this edit was introduced at. Must be in the registry.
    fn version(&self) -> &str;

    /// Dotted references to the targets this transformation binds to.
    fn bases(&self) -> &[&str];

    fn forwards_field_type(&self, _value: Value, _request: &RequestContext) -> HookResult {
        Err(HookError::NotImplemented)
    }

    fn forwards_object(&self, _data: Value, _request: &RequestContext) -> HookResult {
        Err(HookError::NotImplemented)
    }

    fn forwards_specific_field(&self, _value: Value, _request: &RequestContext) -> HookResult {
        Err(HookError::NotImplemented)
    }

    fn backwards_field_type(
        &self,
        _value: Value,
        _obj: Option<&Value>,
        _request: &RequestContext,
    ) -> HookResult {
        Err(HookError::NotImplemented)
    }

    fn backwards_object(
        &self,
        _data: Value,
        _obj: Option<&Value>,
        _request: &RequestContext,
    ) -> HookResult {
        Err(HookError::NotImplemented)
    }

    fn backwards_specific_field(
        &self,
        _value: Value,
        _obj: Option<&Value>,
        _request: &RequestContext,
    ) -> HookResult {
        Err(HookError::NotImplemented)
    }
}

/// A transformation declaration that cannot be bound.
///
/// Raised per declaration during the binding pass; one broken declaration is
/// logged and skipped without aborting the others.
#[derive(Debug, Error)]
pub enum InvalidConfigurationError {
    #[error("transformation {id} declares no version")]
    MissingVersion { id: String },

    #[error("transformation {id} declares no bases")]
    MissingBases { id: String },

    #[error("transformation {id} declares a version outside the registry")]
    UnresolvableVersion {
        id: String,
        #[source]
        source: UnknownVersionError,
    },

    #[error("transformation {id} binds field {field} on field type {owner}")]
    FieldOnFieldType {
        id: String,
        owner: String,
        field: String,
    },

    #[error("transformation {id} targets a specific field but was bound without one")]
    MissingFieldName { id: String, kind: TargetKind },
}

/// A transformation bound to one concrete target.
///
/// Created once per (owner type, field) pair during the binding pass and
/// shared for process lifetime. The declared version is resolved to its rank
/// exactly once, here.
#[derive(Clone)]
pub struct BoundTransformation {
    hooks: Arc<dyn Transformation>,
    owner: String,
    kind: TargetKind,
    field_name: Option<String>,
    version: String,
    rank: usize,
}

impl BoundTransformation {
    pub fn bind(
        hooks: Arc<dyn Transformation>,
        owner: impl Into<String>,
        kind: TargetKind,
        field_name: Option<String>,
        registry: &VersionRegistry,
    ) -> Result<Self, InvalidConfigurationError> {
        let owner = owner.into();
        let id = hooks.id().to_string();

        let version = hooks.version().to_string();
        if version.is_empty() {
            return Err(InvalidConfigurationError::MissingVersion { id });
        }
        let rank = registry
            .rank(&version)
            .map_err(|source| InvalidConfigurationError::UnresolvableVersion {
                id: id.clone(),
                source,
            })?;

        match (kind, &field_name) {
            (TargetKind::FieldType, Some(field)) => {
                return Err(InvalidConfigurationError::FieldOnFieldType {
                    id,
                    owner,
                    field: field.clone(),
                });
            }
            (TargetKind::ObjectField, None) => {
                return Err(InvalidConfigurationError::MissingFieldName { id, kind });
            }
            _ => {}
        }

        Ok(Self {
            hooks,
            owner,
            kind,
            field_name,
            version,
            rank,
        })
    }

    pub fn id(&self) -> &str {
        self.hooks.id()
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn field_name(&self) -> Option<&str> {
        self.field_name.as_deref()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn targets_field_type(&self) -> bool {
        self.kind == TargetKind::FieldType
    }

    pub fn targets_object_type(&self) -> bool {
        self.kind == TargetKind::ObjectType
    }

    pub fn targets_object_field(&self) -> bool {
        self.kind == TargetKind::ObjectField
    }

    /// Whether this edit was introduced after the requested version.
    ///
    /// Only such edits participate in a request, in either direction: the
    /// forwards hooks bring an older payload up to the current shape, the
    /// backwards hooks reverse the newer-format edit for an older client. An
    /// edit exactly at the requested rank is native to it and participates in
    /// neither direction.
    pub fn is_newer_than(&self, requested_rank: usize) -> bool {
        self.rank > requested_rank
    }

    /// Sort key for deterministic application order: version rank ascending,
    /// then granularity tier (field-type, then specific-field, then object).
    pub fn sort_key(&self) -> (usize, u8) {
        (self.rank, self.kind.tier())
    }

    /// Run the hook matching this binding's granularity and the direction,
    /// updating `data` in place on success.
    ///
    /// `staged_field` names the concrete payload field a field-type binding
    /// was staged against; specific-field bindings fall back to their own
    /// bound field name. A staged field absent from the payload is a no-op.
    /// On `HookError::NotImplemented` the payload is left untouched.
    pub fn apply(
        &self,
        obj: Option<&Value>,
        data: &mut Value,
        request: &RequestContext,
        direction: Direction,
        staged_field: Option<&str>,
    ) -> Result<(), HookError> {
        if self.kind == TargetKind::ObjectType {
            let transformed = match direction {
                Direction::Forwards => self.hooks.forwards_object(data.clone(), request),
                Direction::Backwards => self.hooks.backwards_object(data.clone(), obj, request),
            }?;
            *data = transformed;
            return Ok(());
        }

        let field = match staged_field.or(self.field_name.as_deref()) {
            Some(field) => field,
            None => {
                return Err(HookError::Failed(format!(
                    "transformation {} staged without a concrete field",
                    self.id()
                )))
            }
        };

        let value = match data.get(field) {
            Some(value) => value.clone(),
            // The field can be absent legitimately: partial payloads, or an
            // object-level edit earlier in the chain renamed it.
            None => return Ok(()),
        };

        let transformed = match direction {
            Direction::Forwards => match self.kind {
                TargetKind::FieldType => self.hooks.forwards_field_type(value, request),
                _ => self.hooks.forwards_specific_field(value, request),
            },
            Direction::Backwards => {
                let field_obj = obj.and_then(|o| o.get(field));
                match self.kind {
                    TargetKind::FieldType => {
                        self.hooks.backwards_field_type(value, field_obj, request)
                    }
                    _ => self
                        .hooks
                        .backwards_specific_field(value, field_obj, request),
                }
            }
        }?;

        if let Some(map) = data.as_object_mut() {
            map.insert(field.to_string(), transformed);
        }
        Ok(())
    }
}

/// Same rank, same field, same owner. Used for comparisons; duplicates are
/// tolerated and each applied in encountered order.
impl PartialEq for BoundTransformation {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.field_name == other.field_name && self.owner == other.owner
    }
}

impl fmt::Display for BoundTransformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field_name {
            Some(field) => write!(f, "{}.{} {}", self.owner, field, self.version),
            None => write!(f, "{} {}", self.owner, self.version),
        }
    }
}

impl fmt::Debug for BoundTransformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundTransformation")
            .field("id", &self.id())
            .field("owner", &self.owner)
            .field("kind", &self.kind)
            .field("field_name", &self.field_name)
            .field("version", &self.version)
            .field("rank", &self.rank)
            .finish()
    }
}
