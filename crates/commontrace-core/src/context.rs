//! Context fingerprinting.
//!
//! A fingerprint is a small structured summary of the environment a trace
//! (or a searcher) lives in: language, framework, os, package manager,
//! runtime, deployment environment. Fingerprints drive context-aware
//! search boosting and convergence classification.

use serde::{Deserialize, Serialize};

// Tag vocabularies for fingerprint extraction
const LANGUAGE_TAGS: &[&str] = &[
    "python",
    "javascript",
    "typescript",
    "rust",
    "go",
    "java",
    "ruby",
    "php",
    "c",
    "cpp",
    "csharp",
    "swift",
    "kotlin",
];

const FRAMEWORK_TAGS: &[&str] = &[
    "fastapi",
    "django",
    "flask",
    "react",
    "vue",
    "next",
    "express",
    "rails",
    "spring",
    "sqlalchemy",
    "laravel",
    "svelte",
    "angular",
    "nestjs",
    "axum",
    "actix",
];

const OS_TAGS: &[&str] = &[
    "linux", "macos", "windows", "ubuntu", "debian", "centos", "alpine",
];

const PACKAGE_MANAGER_TAGS: &[&str] = &[
    "pip", "npm", "yarn", "pnpm", "cargo", "go", "bun", "poetry", "conda",
];

const RUNTIME_TAGS: &[&str] = &["node", "deno", "bun", "cpython", "pypy", "jvm", "dotnet"];

const ENVIRONMENT_TAGS: &[&str] = &[
    "docker",
    "kubernetes",
    "serverless",
    "lambda",
    "vercel",
    "railway",
    "heroku",
];

/// Alignment weights per field. Language and framework dominate; the rest
/// refine.
const FIELD_WEIGHTS: &[(FingerprintField, f64)] = &[
    (FingerprintField::Language, 0.30),
    (FingerprintField::Framework, 0.25),
    (FingerprintField::Os, 0.15),
    (FingerprintField::PackageManager, 0.10),
    (FingerprintField::Runtime, 0.10),
    (FingerprintField::Environment, 0.10),
];

/// The closed set of recognized fingerprint keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintField {
    Language,
    Framework,
    Os,
    PackageManager,
    Runtime,
    Environment,
}

impl FingerprintField {
    pub fn key(&self) -> &'static str {
        match self {
            FingerprintField::Language => "language",
            FingerprintField::Framework => "framework",
            FingerprintField::Os => "os",
            FingerprintField::PackageManager => "package_manager",
            FingerprintField::Runtime => "runtime",
            FingerprintField::Environment => "environment",
        }
    }
}

/// Structured environment fingerprint with a closed key set
///
/// Missing fields are omitted, not null-filled, so two fingerprints only
/// compete on fields at least one of them actually sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextFingerprint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

impl ContextFingerprint {
    /// Extract a fingerprint from trace metadata and tags.
    ///
    /// Metadata wins over tags for every field. Returns `None` when nothing
    /// can be extracted.
    pub fn from_sources(metadata: Option<&serde_json::Value>, tags: &[String]) -> Option<Self> {
        let meta_get = |key: &str| -> Option<String> {
            metadata
                .and_then(|m| m.get(key))
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_lowercase())
        };
        let tag_match = |vocab: &[&str]| -> Option<String> {
            tags.iter()
                .map(|t| t.to_lowercase())
                .find(|t| vocab.contains(&t.as_str()))
        };

        let fp = Self {
            language: meta_get("language").or_else(|| tag_match(LANGUAGE_TAGS)),
            framework: meta_get("framework").or_else(|| tag_match(FRAMEWORK_TAGS)),
            os: meta_get("os").or_else(|| tag_match(OS_TAGS)),
            package_manager: meta_get("package_manager")
                .or_else(|| tag_match(PACKAGE_MANAGER_TAGS)),
            runtime: meta_get("runtime").or_else(|| tag_match(RUNTIME_TAGS)),
            environment: meta_get("environment").or_else(|| tag_match(ENVIRONMENT_TAGS)),
        };

        if fp.is_empty() { None } else { Some(fp) }
    }

    /// Whether no recognized key is set
    pub fn is_empty(&self) -> bool {
        self.field(FingerprintField::Language).is_none()
            && self.field(FingerprintField::Framework).is_none()
            && self.field(FingerprintField::Os).is_none()
            && self.field(FingerprintField::PackageManager).is_none()
            && self.field(FingerprintField::Runtime).is_none()
            && self.field(FingerprintField::Environment).is_none()
    }

    fn field(&self, field: FingerprintField) -> Option<&str> {
        match field {
            FingerprintField::Language => self.language.as_deref(),
            FingerprintField::Framework => self.framework.as_deref(),
            FingerprintField::Os => self.os.as_deref(),
            FingerprintField::PackageManager => self.package_manager.as_deref(),
            FingerprintField::Runtime => self.runtime.as_deref(),
            FingerprintField::Environment => self.environment.as_deref(),
        }
    }

    /// Render the fingerprint as embeddable text, e.g.
    /// `language:python framework:fastapi os:linux`
    pub fn to_context_string(&self) -> String {
        FIELD_WEIGHTS
            .iter()
            .filter_map(|(field, _)| {
                self.field(*field)
                    .map(|value| format!("{}:{}", field.key(), value))
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Parse a fingerprint back from its `to_context_string` form
    pub fn parse_context_string(s: &str) -> Self {
        let mut fp = Self::default();
        for part in s.split_whitespace() {
            let Some((key, value)) = part.split_once(':') else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            let value = Some(value.to_string());
            match key {
                "language" => fp.language = value,
                "framework" => fp.framework = value,
                "os" => fp.os = value,
                "package_manager" => fp.package_manager = value,
                "runtime" => fp.runtime = value,
                "environment" => fp.environment = value,
                _ => {}
            }
        }
        fp
    }
}

/// Weighted-Jaccard alignment between two fingerprints, in [0, 1].
///
/// Fields absent from both sides do not count toward the denominator, so a
/// match on the only shared field scores 1.0.
pub fn alignment(a: &ContextFingerprint, b: &ContextFingerprint) -> f64 {
    let mut matched = 0.0;
    let mut total = 0.0;

    for (field, weight) in FIELD_WEIGHTS {
        let va = a.field(*field);
        let vb = b.field(*field);
        if va.is_none() && vb.is_none() {
            continue;
        }
        total += weight;
        if let (Some(va), Some(vb)) = (va, vb) {
            if va == vb {
                matched += weight;
            }
        }
    }

    if total == 0.0 { 0.0 } else { matched / total }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(language: &str, framework: &str) -> ContextFingerprint {
        ContextFingerprint {
            language: Some(language.to_string()),
            framework: Some(framework.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_from_tags() {
        let tags = vec!["python".to_string(), "fastapi".to_string(), "docker".to_string()];
        let fp = ContextFingerprint::from_sources(None, &tags).unwrap();
        assert_eq!(fp.language.as_deref(), Some("python"));
        assert_eq!(fp.framework.as_deref(), Some("fastapi"));
        assert_eq!(fp.environment.as_deref(), Some("docker"));
        assert!(fp.os.is_none());
    }

    #[test]
    fn test_metadata_wins_over_tags() {
        let meta = serde_json::json!({"language": "Rust"});
        let tags = vec!["python".to_string()];
        let fp = ContextFingerprint::from_sources(Some(&meta), &tags).unwrap();
        assert_eq!(fp.language.as_deref(), Some("rust"));
    }

    #[test]
    fn test_no_context_yields_none() {
        assert!(ContextFingerprint::from_sources(None, &["misc".to_string()]).is_none());
    }

    #[test]
    fn test_alignment_identity() {
        let a = fp("python", "fastapi");
        assert_eq!(alignment(&a, &a), 1.0);
    }

    #[test]
    fn test_alignment_range_and_partial_match() {
        let a = fp("python", "fastapi");
        let b = fp("python", "django");
        let score = alignment(&a, &b);
        assert!(score > 0.0 && score < 1.0);
        // language (0.30) matched out of language + framework (0.55)
        assert!((score - 0.30 / 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_alignment_ignores_mutually_absent_fields() {
        let a = ContextFingerprint {
            language: Some("go".to_string()),
            ..Default::default()
        };
        let b = ContextFingerprint {
            language: Some("go".to_string()),
            ..Default::default()
        };
        assert_eq!(alignment(&a, &b), 1.0);
    }

    #[test]
    fn test_alignment_empty_is_zero() {
        let empty = ContextFingerprint::default();
        assert_eq!(alignment(&empty, &empty), 0.0);
    }

    #[test]
    fn test_context_string_roundtrip() {
        let original = ContextFingerprint {
            language: Some("python".to_string()),
            framework: Some("fastapi".to_string()),
            os: Some("linux".to_string()),
            package_manager: Some("pip".to_string()),
            runtime: Some("cpython".to_string()),
            environment: Some("docker".to_string()),
        };
        let s = original.to_context_string();
        let parsed = ContextFingerprint::parse_context_string(&s);
        assert_eq!(parsed, original);
    }
}
