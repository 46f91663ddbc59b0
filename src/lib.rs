// Versioned Wire-Format Transformation Engine
pub mod config;
pub mod registry;
pub mod transformation;
pub mod transformer;
pub mod version_registry;
pub mod versioned;

// Re-export core types for convenience
pub use config::{ConfigError, RegistryCache, VersioningConfig};
pub use registry::{
    BindingReport, ObjectSchema, ResolvedTarget, TargetIndex, TargetResolutionError,
    TransformationRegistry,
};
pub use transformation::{
    BoundTransformation, Direction, HookError, HookResult, InvalidConfigurationError,
    RequestContext, TargetKind, Transformation,
};
pub use transformer::{StagedTransformation, TransformError, Transformer};
pub use version_registry::{UnknownVersionError, VersionRegistry, VersionRegistryError};
pub use versioned::Versioned;
