//! Error types for template parsing and validation

use thiserror::Error;

/// Result type for parser operations
pub type Result<T> = std::result::Result<T, ToscaError>;

/// Template parsing and validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToscaError {
    #[error("{what} is missing required field \"{required}\".")]
    MissingRequiredField { what: String, required: String },

    #[error("{what} contains unknown field \"{field}\". Refer to the definition to verify valid values.")]
    UnknownField { what: String, field: String },

    #[error("{what} must be of type \"{expected}\".")]
    TypeMismatch { what: String, expected: String },

    #[error("Type \"{what}\" is not a valid type.")]
    InvalidType { what: String },

    #[error("Node type \"{what}\" is not a valid type.")]
    InvalidNodeType { what: String },

    #[error("{0}")]
    InvalidSchema(String),

    #[error("{0}")]
    Validation(String),

    #[error("Unknown input \"{what}\".")]
    UnknownInput { what: String },

    #[error("Unknown output \"{what}\".")]
    UnknownOutput { what: String },

    #[error("Value of property \"{what}\" is invalid.")]
    InvalidPropertyValue { what: String },

    #[error("The template version \"{what}\" is invalid. Valid versions are \"{valid_versions}\".")]
    InvalidTemplateVersion { what: String, valid_versions: String },

    #[error("\"{what}\" is not a valid target: {reason}")]
    InvalidGroupTarget { what: String, reason: String },

    #[error("Type \"{name}\" is derived from itself: {chain}.")]
    CyclicType { name: String, chain: String },

    #[error("{0}")]
    NotFound(String),

    #[error("Absolute file name \"{path}\" cannot be used in a URL-based input template \"{url}\".")]
    AbsolutePathInUrlImport { path: String, url: String },

    #[error("{what}")]
    Url { what: String },

    #[error("{0}")]
    Import(String),

    #[error("{0}")]
    NotImplemented(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("YAML error: {0}")]
    Yaml(String),
}

impl ToscaError {
    /// Stable diagnostic code for this error kind
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingRequiredField { .. } => "E101",
            Self::UnknownField { .. } => "E102",
            Self::TypeMismatch { .. } => "E103",
            Self::InvalidType { .. } => "E104",
            Self::InvalidNodeType { .. } => "E105",
            Self::InvalidSchema(_) => "E106",
            Self::Validation(_) => "E107",
            Self::UnknownInput { .. } => "E108",
            Self::UnknownOutput { .. } => "E109",
            Self::InvalidPropertyValue { .. } => "E110",
            Self::InvalidTemplateVersion { .. } => "E111",
            Self::InvalidGroupTarget { .. } => "E112",
            Self::CyclicType { .. } => "E113",
            Self::NotFound(_) => "E114",
            Self::AbsolutePathInUrlImport { .. } => "E115",
            Self::Url { .. } => "E116",
            Self::Import(_) => "E117",
            Self::NotImplemented(_) => "E118",
            Self::Io(_) => "E119",
            Self::Yaml(_) => "E120",
        }
    }

    /// Short kind name, as shown in reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingRequiredField { .. } => "MissingRequiredField",
            Self::UnknownField { .. } => "UnknownField",
            Self::TypeMismatch { .. } => "TypeMismatch",
            Self::InvalidType { .. } => "InvalidType",
            Self::InvalidNodeType { .. } => "InvalidNodeType",
            Self::InvalidSchema(_) => "InvalidSchemaError",
            Self::Validation(_) => "ValidationError",
            Self::UnknownInput { .. } => "UnknownInput",
            Self::UnknownOutput { .. } => "UnknownOutput",
            Self::InvalidPropertyValue { .. } => "InvalidPropertyValueError",
            Self::InvalidTemplateVersion { .. } => "InvalidTemplateVersion",
            Self::InvalidGroupTarget { .. } => "InvalidGroupTarget",
            Self::CyclicType { .. } => "CyclicType",
            Self::NotFound(_) => "NotFound",
            Self::AbsolutePathInUrlImport { .. } => "AbsolutePathInURLImport",
            Self::Url { .. } => "URLException",
            Self::Import(_) => "ImportError",
            Self::NotImplemented(_) => "NotImplemented",
            Self::Io(_) => "IOError",
            Self::Yaml(_) => "YAMLError",
        }
    }

    pub(crate) fn missing(what: impl Into<String>, required: impl Into<String>) -> Self {
        Self::MissingRequiredField { what: what.into(), required: required.into() }
    }

    pub(crate) fn unknown(what: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField { what: what.into(), field: field.into() }
    }

    pub(crate) fn mismatch(what: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::TypeMismatch { what: what.into(), expected: expected.into() }
    }

    pub(crate) fn invalid_type(what: impl Into<String>) -> Self {
        Self::InvalidType { what: what.into() }
    }
}

impl From<std::io::Error> for ToscaError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_yaml::Error> for ToscaError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_message() {
        let err = ToscaError::missing("Template \"server\"", "type");
        assert_eq!(
            err.to_string(),
            "Template \"server\" is missing required field \"type\"."
        );
        assert_eq!(err.kind(), "MissingRequiredField");
    }

    #[test]
    fn test_codes_are_distinct() {
        let a = ToscaError::Validation("x".into());
        let b = ToscaError::InvalidSchema("x".into());
        assert_ne!(a.code(), b.code());
    }
}
