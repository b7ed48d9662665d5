use thiserror::Error;

/// Failures raised while compiling a Meta tree into a guard.
///
/// A value that does not conform is *not* an error: `Guard::is` simply
/// returns `false`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    /// An `Apply` node carries no annotation with a registered provider.
    #[error("missing guard annotation on `{symbol}` (annotations present: {tags:?})")]
    MissingAnnotation { symbol: String, tags: Vec<String> },

    /// A registered provider rejected its parameters or children.
    #[error("invalid `{tag}` annotation: {reason}")]
    InvalidAnnotation { tag: String, reason: String },

    /// A lazy node reaches itself through unions, optionals or applications
    /// only; its guard would never terminate.
    #[error("lazy `{symbol}` refers to itself without passing through a tuple or struct")]
    UnguardedRecursion { symbol: String },

    /// A struct-only combinator was applied to another kind of node.
    #[error("`{operation}` expects a Struct meta, found {tag}")]
    UnsupportedMeta { operation: &'static str, tag: &'static str },
}

impl GuardError {
    pub(crate) fn invalid(tag: &str, reason: impl Into<String>) -> Self {
        Self::InvalidAnnotation { tag: tag.to_string(), reason: reason.into() }
    }
}
