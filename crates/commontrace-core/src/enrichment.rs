//! Auto-enrichment of submitted traces.
//!
//! Detects language and framework from solution text, scores encoding
//! depth (richer traces rank higher), and derives somatic intensity from
//! detection metadata (harder-won knowledge retrieves with priority).

use std::sync::OnceLock;

use regex::Regex;

// ============================================================================
// PATTERN TABLES
// ============================================================================

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(\w+)").expect("valid regex"))
}

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[=@:^~]\d+\.\d+(?:\.\d+)?").expect("valid regex"))
}

fn language_patterns() -> &'static Vec<(&'static str, Vec<Regex>)> {
    static TABLE: OnceLock<Vec<(&'static str, Vec<Regex>)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let compile = |patterns: &[&str]| -> Vec<Regex> {
            patterns
                .iter()
                .map(|p| Regex::new(p).expect("valid regex"))
                .collect()
        };
        vec![
            (
                "python",
                compile(&[r"\bimport\s+\w+", r"\bfrom\s+\w+\s+import\b", r"\bdef\s+\w+\s*\("]),
            ),
            (
                "javascript",
                compile(&[
                    r#"\bconst\s+\w+\s*=\s*require\("#,
                    r#"\bimport\s+.*\s+from\s+['"]"#,
                ]),
            ),
            (
                "typescript",
                compile(&[r"\binterface\s+\w+\s*\{", r":\s*(string|number|boolean|any)\b"]),
            ),
            ("rust", compile(&[r"\buse\s+\w+::", r"\bfn\s+\w+\s*\("])),
            ("go", compile(&[r"\bimport\s+\(", r"\bfunc\s+\w+\s*\("])),
        ]
    })
}

fn framework_patterns() -> &'static Vec<(&'static str, Vec<Regex>)> {
    static TABLE: OnceLock<Vec<(&'static str, Vec<Regex>)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let one = |pattern: &str| vec![Regex::new(pattern).expect("valid regex")];
        vec![
            ("fastapi", one(r"\bfrom\s+fastapi\b|\bimport\s+fastapi\b")),
            ("django", one(r"\bfrom\s+django\b|\bimport\s+django\b")),
            ("flask", one(r"\bfrom\s+flask\b|\bimport\s+flask\b")),
            ("react", one(r#"\bimport\s+.*\bfrom\s+['"]react['"]"#)),
            ("vue", one(r#"\bimport\s+.*\bfrom\s+['"]vue['"]"#)),
            ("next", one(r#"\bfrom\s+['"]next/"#)),
            ("express", one(r#"\brequire\(['"]express['"]\)"#)),
            ("axum", one(r"\buse\s+axum\b")),
            ("sqlalchemy", one(r"\bfrom\s+sqlalchemy\b|\bimport\s+sqlalchemy\b")),
            ("docker", one(r"\bFROM\s+\S+|\bDockerfile\b")),
            (
                "kubernetes",
                one(r"\bapiVersion:\s+\S+|\bkind:\s+(Deployment|Service|Pod)\b"),
            ),
            ("terraform", one(r#"\bresource\s+""#)),
            ("postgres", one(r"(?i)\bCREATE\s+TABLE\b|\bSELECT\s+.*\bFROM\b")),
        ]
    })
}

// ============================================================================
// DETECTION
// ============================================================================

/// Detect the primary programming language from solution text.
///
/// Code fences are checked first (most reliable), then import/syntax
/// patterns.
pub fn detect_language(solution_text: &str) -> Option<String> {
    if let Some(cap) = fence_re().captures(solution_text) {
        let lang = cap[1].to_lowercase();
        let normalized = match lang.as_str() {
            "js" => "javascript",
            "ts" => "typescript",
            "py" => "python",
            "rb" => "ruby",
            "rs" => "rust",
            other => other,
        };
        return Some(normalized.to_string());
    }

    for (lang, patterns) in language_patterns() {
        if patterns.iter().any(|p| p.is_match(solution_text)) {
            return Some((*lang).to_string());
        }
    }
    None
}

/// Detect the primary framework from solution text via import patterns
pub fn detect_framework(solution_text: &str) -> Option<String> {
    for (framework, patterns) in framework_patterns() {
        if patterns.iter().any(|p| p.is_match(solution_text)) {
            return Some((*framework).to_string());
        }
    }
    None
}

/// Compute encoding depth score (0-4).
///
/// +1 error context, +1 language plus framework/versions, +1 substantial
/// solution (>200 chars), +1 pinned library versions.
pub fn compute_depth_score(metadata: Option<&serde_json::Value>, solution_text: &str) -> i64 {
    let mut score = 0;
    let get = |key: &str| metadata.and_then(|m| m.get(key));

    if get("error_message").and_then(|v| v.as_str()).is_some_and(|s| !s.is_empty()) {
        score += 1;
    }

    let has_lang = get("language").and_then(|v| v.as_str()).is_some_and(|s| !s.is_empty());
    let has_framework = get("framework").and_then(|v| v.as_str()).is_some_and(|s| !s.is_empty());
    let has_versions = get("versions").is_some_and(|v| !v.is_null());
    if has_lang && (has_framework || has_versions) {
        score += 1;
    }

    if solution_text.len() > 200 {
        score += 1;
    }

    if version_re().is_match(solution_text) {
        score += 1;
    }

    score
}

/// Base somatic intensity per detection pattern. Error resolution and
/// security hardening are the hardest-won knowledge.
fn pattern_base_intensity(pattern: &str) -> f64 {
    match pattern {
        "error_resolution" => 0.6,
        "security_hardening" => 0.8,
        "approach_reversal" => 0.5,
        "prediction_error" => 0.7,
        "dependency_resolution" => 0.4,
        "test_fix_cycle" => 0.4,
        "migration_pattern" => 0.5,
        "user_correction" => 0.5,
        "infra_discovery" => 0.4,
        "research_then_implement" => 0.3,
        "config_discovery" => 0.3,
        "cross_file_breadth" => 0.2,
        _ => 0.2,
    }
}

/// Compute initial somatic intensity from detection metadata (0.0-1.0).
///
/// Base intensity from the triggering pattern, amplified by effort signals
/// (error count, time to resolution, edit iterations).
pub fn compute_somatic_intensity(metadata: Option<&serde_json::Value>) -> f64 {
    let get_num = |key: &str| -> f64 {
        metadata
            .and_then(|m| m.get(key))
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
    };

    let pattern = metadata
        .and_then(|m| m.get("detection_pattern"))
        .and_then(|v| v.as_str())
        .unwrap_or("");

    let mut intensity = pattern_base_intensity(pattern);
    intensity += (get_num("error_count") * 0.03).min(0.2);
    intensity += (get_num("time_to_resolution_minutes") * 0.005).min(0.15);
    intensity += (get_num("iteration_count") * 0.01).min(0.1);

    intensity.min(1.0)
}

/// Fill in language/framework metadata detected from the solution text.
///
/// Respects explicit metadata from the contributor - only absent fields
/// are filled.
pub fn auto_enrich_metadata(
    metadata: Option<serde_json::Value>,
    solution_text: &str,
) -> Option<serde_json::Value> {
    let mut map = match metadata {
        Some(serde_json::Value::Object(map)) => map,
        Some(other) => return Some(other),
        None => serde_json::Map::new(),
    };

    let missing = |map: &serde_json::Map<String, serde_json::Value>, key: &str| {
        !map.get(key).and_then(|v| v.as_str()).is_some_and(|s| !s.is_empty())
    };

    if missing(&map, "language") {
        if let Some(lang) = detect_language(solution_text) {
            map.insert("language".to_string(), serde_json::Value::String(lang));
        }
    }
    if missing(&map, "framework") {
        if let Some(framework) = detect_framework(solution_text) {
            map.insert("framework".to_string(), serde_json::Value::String(framework));
        }
    }

    if map.is_empty() {
        None
    } else {
        Some(serde_json::Value::Object(map))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_language_from_fence() {
        assert_eq!(
            detect_language("```py\nprint('hi')\n```").as_deref(),
            Some("python")
        );
        assert_eq!(
            detect_language("```rs\nfn main() {}\n```").as_deref(),
            Some("rust")
        );
    }

    #[test]
    fn test_detect_language_from_syntax() {
        assert_eq!(
            detect_language("from fastapi import FastAPI").as_deref(),
            Some("python")
        );
        assert_eq!(
            detect_language("use tokio::time;\nfn run() {}").as_deref(),
            Some("rust")
        );
        assert!(detect_language("nothing to see here").is_none());
    }

    #[test]
    fn test_detect_framework() {
        assert_eq!(
            detect_framework("from fastapi import Depends").as_deref(),
            Some("fastapi")
        );
        assert_eq!(
            detect_framework("use axum::Router;").as_deref(),
            Some("axum")
        );
        assert!(detect_framework("plain prose").is_none());
    }

    #[test]
    fn test_depth_score_components() {
        // Nothing rich
        assert_eq!(compute_depth_score(None, "short"), 0);

        // Error context + language/framework + long solution + versions
        let meta = serde_json::json!({
            "error_message": "TypeError: oops",
            "language": "python",
            "framework": "fastapi",
        });
        let solution = format!("{} pinned at fastapi==0.110.0", "x".repeat(220));
        assert_eq!(compute_depth_score(Some(&meta), &solution), 4);
    }

    #[test]
    fn test_somatic_intensity_bounds() {
        assert!((compute_somatic_intensity(None) - 0.2).abs() < 1e-9);

        let meta = serde_json::json!({
            "detection_pattern": "security_hardening",
            "error_count": 100,
            "time_to_resolution_minutes": 500,
            "iteration_count": 50,
        });
        // Amplifiers are capped; result saturates at 1.0
        assert!((compute_somatic_intensity(Some(&meta)) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_auto_enrich_respects_explicit_metadata() {
        let meta = serde_json::json!({"language": "go"});
        let enriched = auto_enrich_metadata(Some(meta), "from fastapi import FastAPI").unwrap();
        assert_eq!(enriched["language"], "go");
        assert_eq!(enriched["framework"], "fastapi");
    }

    #[test]
    fn test_auto_enrich_from_scratch() {
        let enriched = auto_enrich_metadata(None, "```python\nimport os\n```").unwrap();
        assert_eq!(enriched["language"], "python");
    }
}
