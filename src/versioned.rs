use std::cell::OnceCell;
use std::sync::Arc;

use serde_json::Value;

use crate::registry::{ObjectSchema, TransformationRegistry};
use crate::transformation::RequestContext;
use crate::transformer::{StagedTransformation, TransformError, Transformer};
use crate::version_registry::VersionRegistry;

/// Versioning wrapper around one object type's serialize/deserialize pair.
///
/// Holds the object's wire schema, the process-wide transformation registry,
/// the version registry, and the request context. Created per request, like
/// the serializer it wraps: the requesting client's version rank is resolved
/// once and cached for the wrapper's lifetime.
///
/// The underlying serializer stays in charge of actual encoding/decoding;
/// this wrapper only reshapes payloads before deserialization
/// (`to_internal_value`) and after serialization (`to_representation`).
pub struct Versioned {
    schema: Arc<ObjectSchema>,
    transformations: Arc<TransformationRegistry>,
    versions: Arc<VersionRegistry>,
    context: Option<RequestContext>,
    rank: OnceCell<usize>,
}

impl Versioned {
    pub fn new(
        schema: Arc<ObjectSchema>,
        transformations: Arc<TransformationRegistry>,
        versions: Arc<VersionRegistry>,
    ) -> Self {
        Self {
            schema,
            transformations,
            versions,
            context: None,
            rank: OnceCell::new(),
        }
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn schema(&self) -> &ObjectSchema {
        &self.schema
    }

    fn context(&self) -> Result<&RequestContext, TransformError> {
        self.context
            .as_ref()
            .ok_or_else(|| TransformError::MissingRequestContext {
                type_name: self.schema.name.clone(),
            })
    }

    /// Rank of the version the client declared, resolved once per request.
    fn request_rank(&self) -> Result<usize, TransformError> {
        if let Some(rank) = self.rank.get() {
            return Ok(*rank);
        }
        let rank = self.versions.rank(self.context()?.version())?;
        let _ = self.rank.set(rank);
        Ok(rank)
    }

    /// Transform an inbound payload into the current internal shape, ready
    /// for normal object construction.
    pub fn to_internal_value(&self, data: Value) -> Result<Value, TransformError> {
        let mut transformer = self.transformer(&data)?;
        transformer.forwards(data, self.context()?)
    }

    /// Transform an outbound representation into the shape the requesting
    /// client expects, ready for normal response encoding.
    pub fn to_representation(&self, obj: &Value, data: Value) -> Result<Value, TransformError> {
        let mut transformer = self.transformer(&data)?;
        transformer.backwards(obj, data, self.context()?)
    }

    /// Gather the transformations applicable to this request: the object
    /// type's own, and for every payload field the schema knows, that
    /// field's specific transformations and its field type's. Only edits
    /// newer than the requested version participate, in either direction.
    fn transformer(&self, data: &Value) -> Result<Transformer, TransformError> {
        let rank = self.request_rank()?;
        let mut transformer = Transformer::new();

        if let Some(map) = data.as_object() {
            for field in map.keys() {
                let field_type = match self.schema.field_type(field) {
                    Some(field_type) => field_type,
                    // Fields the schema does not know are left alone.
                    None => continue,
                };

                transformer.extend(
                    self.transformations
                        .transformations_for(&self.schema.name, Some(field))
                        .iter()
                        .filter(|bound| bound.is_newer_than(rank))
                        .cloned()
                        .map(StagedTransformation::new),
                );
                transformer.extend(
                    self.transformations
                        .transformations_for(field_type, None)
                        .iter()
                        .filter(|bound| bound.is_newer_than(rank))
                        .cloned()
                        .map(|bound| StagedTransformation::new(bound).with_field(field)),
                );
            }
        }

        transformer.extend(
            self.transformations
                .transformations_for(&self.schema.name, None)
                .iter()
                .filter(|bound| bound.is_newer_than(rank))
                .cloned()
                .map(StagedTransformation::new),
        );

        Ok(transformer)
    }
}
