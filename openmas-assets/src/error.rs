use crate::config::SourceType;

/// Boxed underlying error kept as the `source()` of an [`AssetError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("Asset '{0}' is not declared in the project configuration")]
    NotDeclared(String),
    #[error("Invalid asset configuration: {0}")]
    Configuration(String),
    #[error("{message}")]
    Download {
        message: String,
        source_type: Option<SourceType>,
        source_info: Option<String>,
        #[source]
        cause: Option<BoxError>,
    },
    #[error("{message}")]
    Verification {
        message: String,
        source_type: Option<SourceType>,
        source_info: Option<String>,
        #[source]
        cause: Option<BoxError>,
    },
    #[error("{message}")]
    Unpack {
        message: String,
        source_type: Option<SourceType>,
        source_info: Option<String>,
        #[source]
        cause: Option<BoxError>,
    },
    #[error("Invalid checksum '{checksum}': {reason}")]
    InvalidChecksum { checksum: String, reason: String },
    #[error("Hugging Face Hub support is not available (build with the `hf` feature)")]
    HubClientUnavailable,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Lock error: {0}")]
    Lock(#[from] openmas_filelock::LockError),
}

impl AssetError {
    pub fn download(message: impl Into<String>) -> Self {
        Self::Download {
            message: message.into(),
            source_type: None,
            source_info: None,
            cause: None,
        }
    }

    pub fn verification(message: impl Into<String>) -> Self {
        Self::Verification {
            message: message.into(),
            source_type: None,
            source_info: None,
            cause: None,
        }
    }

    pub fn unpack(message: impl Into<String>) -> Self {
        Self::Unpack {
            message: message.into(),
            source_type: None,
            source_info: None,
            cause: None,
        }
    }

    /// Attach the asset source for diagnostics. No-op on variants without one.
    #[must_use]
    pub fn with_source(mut self, ty: SourceType, info: impl Into<String>) -> Self {
        if let Self::Download {
            source_type,
            source_info,
            ..
        }
        | Self::Verification {
            source_type,
            source_info,
            ..
        }
        | Self::Unpack {
            source_type,
            source_info,
            ..
        } = &mut self
        {
            *source_type = Some(ty);
            *source_info = Some(info.into());
        }
        self
    }

    /// Chain the underlying error. No-op on variants without a cause slot.
    #[must_use]
    pub fn with_cause(mut self, err: impl Into<BoxError>) -> Self {
        if let Self::Download { cause, .. }
        | Self::Verification { cause, .. }
        | Self::Unpack { cause, .. } = &mut self
        {
            *cause = Some(err.into());
        }
        self
    }

    /// Source type recorded on download, verification and unpack errors.
    pub fn source_type(&self) -> Option<SourceType> {
        match self {
            Self::Download { source_type, .. }
            | Self::Verification { source_type, .. }
            | Self::Unpack { source_type, .. } => *source_type,
            _ => None,
        }
    }

    /// Source description (URL, repo id or path) recorded on the error.
    pub fn source_info(&self) -> Option<&str> {
        match self {
            Self::Download { source_info, .. }
            | Self::Verification { source_info, .. }
            | Self::Unpack { source_info, .. } => source_info.as_deref(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_download_error_carries_source_and_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = AssetError::download("Failed to download asset")
            .with_source(SourceType::Http, "https://example.com/model.bin")
            .with_cause(io);

        assert_eq!(err.to_string(), "Failed to download asset");
        assert_eq!(err.source_type(), Some(SourceType::Http));
        assert_eq!(err.source_info(), Some("https://example.com/model.bin"));
        assert_eq!(err.source().unwrap().to_string(), "reset");
    }

    #[test]
    fn test_with_source_ignored_on_configuration() {
        let err = AssetError::Configuration("missing url".to_string())
            .with_source(SourceType::Http, "x");
        assert_eq!(err.source_type(), None);
        assert_eq!(err.source_info(), None);
    }

    #[test]
    fn test_is_not_found() {
        let err: AssetError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert!(err.is_not_found());
        assert!(!AssetError::download("x").is_not_found());
    }
}
