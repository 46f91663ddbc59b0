use log::debug;
use serde_json::Value;
use thiserror::Error;

use crate::transformation::{BoundTransformation, Direction, HookError, RequestContext};
use crate::version_registry::UnknownVersionError;

/// A transformation staged for one request, together with the concrete
/// payload field it operates on.
///
/// Specific-field bindings already know their field; field-type bindings are
/// staged once per payload field of that type; object bindings carry none.
#[derive(Debug, Clone)]
pub struct StagedTransformation {
    pub transformation: BoundTransformation,
    pub field: Option<String>,
}

impl StagedTransformation {
    pub fn new(transformation: BoundTransformation) -> Self {
        Self {
            transformation,
            field: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// Applies a bag of staged transformations in deterministic order.
///
/// Per-request and never shared: created fresh, extended, sorted, consumed,
/// discarded. Duplicates are not deduplicated; each is applied in
/// encountered order.
#[derive(Debug, Default)]
pub struct Transformer {
    staged: Vec<StagedTransformation>,
}

impl Transformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, staged: StagedTransformation) {
        self.staged.push(staged);
    }

    pub fn extend<I>(&mut self, staged: I)
    where
        I: IntoIterator<Item = StagedTransformation>,
    {
        self.staged.extend(staged);
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Inbound pass: client payload to current internal shape, oldest edit
    /// first.
    pub fn forwards(
        &mut self,
        data: Value,
        request: &RequestContext,
    ) -> Result<Value, TransformError> {
        self.transform(None, data, request, Direction::Forwards)
    }

    /// Outbound pass: current internal shape to the shape the requesting
    /// client expects, newest edit first.
    pub fn backwards(
        &mut self,
        obj: &Value,
        data: Value,
        request: &RequestContext,
    ) -> Result<Value, TransformError> {
        self.transform(Some(obj), data, request, Direction::Backwards)
    }

    fn transform(
        &mut self,
        obj: Option<&Value>,
        mut data: Value,
        request: &RequestContext,
        direction: Direction,
    ) -> Result<Value, TransformError> {
        // Stable sort: duplicates keep their encountered order.
        self.staged
            .sort_by_key(|staged| staged.transformation.sort_key());

        let ordered: Box<dyn Iterator<Item = &StagedTransformation>> = match direction {
            Direction::Forwards => Box::new(self.staged.iter()),
            Direction::Backwards => Box::new(self.staged.iter().rev()),
        };

        for staged in ordered {
            let transformation = &staged.transformation;
            match transformation.apply(obj, &mut data, request, direction, staged.field.as_deref())
            {
                Ok(()) => {
                    debug!("applied {transformation} ({direction:?})");
                }
                // Most transformations implement only the hooks of one
                // direction; the rest are ordinary no-ops.
                Err(HookError::NotImplemented) => {
                    debug!("skipped {transformation} ({direction:?}): not implemented");
                }
                Err(HookError::Failed(message)) => {
                    return Err(TransformError::Hook {
                        transformation: transformation.id().to_string(),
                        message,
                    });
                }
            }
        }

        Ok(data)
    }
}

/// Request-time failure of the versioning engine. Propagates to the caller
/// for framework-level error translation.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error(transparent)]
    UnknownVersion(#[from] UnknownVersionError),

    #[error("no request context attached to {type_name}")]
    MissingRequestContext { type_name: String },

    #[error("transformation {transformation} failed: {message}")]
    Hook {
        transformation: String,
        message: String,
    },
}
