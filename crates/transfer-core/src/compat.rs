//! Backend feature probe keyed on the server version string.
//!
//! Importers compare source and destination: a major-version skew is a
//! warning, a missing required feature on the destination is a hard
//! `Unsupported` error, and minor metadata fields absent on the older
//! side are silently dropped by the entity serde defaults.

use crate::error::{Result, TransferError};
use semver::Version;

/// Features that appeared at a specific MLflow version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Traces,
    Prompts,
    LoggedModels,
    Assessments,
    EvaluationDatasets,
}

impl Feature {
    pub fn name(&self) -> &'static str {
        match self {
            Feature::Traces => "traces",
            Feature::Prompts => "prompts",
            Feature::LoggedModels => "logged models",
            Feature::Assessments => "assessments",
            Feature::EvaluationDatasets => "evaluation datasets",
        }
    }

    /// Minimum backend version carrying the feature.
    pub fn required_version(&self) -> Version {
        match self {
            Feature::Traces => Version::new(2, 14, 0),
            Feature::Prompts => Version::new(2, 21, 0),
            Feature::LoggedModels => Version::new(3, 0, 0),
            Feature::Assessments => Version::new(3, 2, 0),
            Feature::EvaluationDatasets => Version::new(3, 4, 0),
        }
    }
}

/// Parsed backend version with feature checks.
#[derive(Debug, Clone)]
pub struct BackendVersion {
    raw: String,
    version: Version,
}

impl BackendVersion {
    /// Lenient parse: trims suffixes like `2.14.0rc0` or `3.0`, falls back
    /// to zero-padding missing components.
    pub fn parse(raw: &str) -> Result<Self> {
        let cleaned: String = raw
            .trim()
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let mut parts = cleaned.split('.').filter(|p| !p.is_empty());
        let major = parts.next().and_then(|p| p.parse().ok());
        let Some(major) = major else {
            return Err(TransferError::Incompatible {
                message: format!("unparseable backend version: {raw:?}"),
            });
        };
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        Ok(Self {
            raw: raw.trim().to_string(),
            version: Version::new(major, minor, patch),
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn major(&self) -> u64 {
        self.version.major
    }

    /// Pure feature-flag lookup.
    pub fn supports(&self, feature: Feature) -> bool {
        self.version >= feature.required_version()
    }

    /// Hard check used by importers before any destination mutation.
    pub fn require(&self, feature: Feature) -> Result<()> {
        if self.supports(feature) {
            Ok(())
        } else {
            Err(TransferError::Unsupported {
                feature: feature.name().to_string(),
                required: feature.required_version().to_string(),
                actual: self.raw.clone(),
            })
        }
    }
}

/// Compare source and destination versions ahead of an import. Emits a
/// WARN on major skew; never fails by itself.
pub fn warn_on_version_skew(source: &BackendVersion, destination: &BackendVersion) {
    if source.major() != destination.major() {
        tracing::warn!(
            "major version skew: source MLflow {} vs destination MLflow {}",
            source.raw(),
            destination.raw()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_thresholds() {
        let v = BackendVersion::parse("2.14.0").unwrap();
        assert!(v.supports(Feature::Traces));
        assert!(!v.supports(Feature::Prompts));

        let v = BackendVersion::parse("2.21.1").unwrap();
        assert!(v.supports(Feature::Prompts));
        assert!(!v.supports(Feature::LoggedModels));

        let v = BackendVersion::parse("3.4.0").unwrap();
        assert!(v.supports(Feature::LoggedModels));
        assert!(v.supports(Feature::Assessments));
        assert!(v.supports(Feature::EvaluationDatasets));
    }

    #[test]
    fn test_lenient_parse() {
        assert_eq!(BackendVersion::parse("3.0").unwrap().major(), 3);
        assert!(BackendVersion::parse("2.14.0rc0")
            .unwrap()
            .supports(Feature::Traces));
        assert!(BackendVersion::parse("garbage").is_err());
    }

    #[test]
    fn test_require_error_shape() {
        let v = BackendVersion::parse("2.9.2").unwrap();
        let err = v.require(Feature::Traces).unwrap_err();
        match err {
            TransferError::Unsupported { feature, .. } => assert_eq!(feature, "traces"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
