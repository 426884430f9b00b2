//! Canonical identity resolution across resource variants
//!
//! A resource can show up several times in a workspace: the original file, a
//! generated PDF preview, a derived version, an ad-hoc re-upload. All of them
//! must collapse onto one canonical key so the graph shows a single logical
//! node with the best variant on top.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

/// Classification of a source's relationship to its origin content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    Origin,
    Derived,
    Upload,
    PreviewPdf,
}

impl VariantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Origin => "origin",
            Self::Derived => "derived",
            Self::Upload => "upload",
            Self::PreviewPdf => "preview_pdf",
        }
    }

    /// Parse a stored value, falling back to the supplied default on unknown input
    pub fn parse_or(value: &str, fallback: VariantKind) -> VariantKind {
        match value.trim().to_lowercase().as_str() {
            "origin" => Self::Origin,
            "derived" => Self::Derived,
            "upload" => Self::Upload,
            "preview_pdf" => Self::PreviewPdf,
            _ => fallback,
        }
    }

    /// Display ordering weight; higher wins as the primary variant
    pub fn priority(&self) -> i64 {
        match self {
            Self::Origin => 100,
            Self::Derived => 90,
            Self::Upload => 80,
            Self::PreviewPdf => 10,
        }
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Priority for a raw stored kind; unknown strings sit between upload and preview
pub fn variant_priority(kind: &str) -> i64 {
    match kind.trim().to_lowercase().as_str() {
        "origin" => 100,
        "derived" => 90,
        "upload" => 80,
        "preview_pdf" => 10,
        _ => 60,
    }
}

const PREVIEW_NAMESPACE: &str = "legacy-previews/";
const DERIVED_NAMESPACE: &str = "versions/";

/// Classify an object reference by path/format convention
pub fn guess_variant_kind(object_key: Option<&str>, file_format: Option<&str>) -> VariantKind {
    let normalized = object_key.unwrap_or("").trim().to_lowercase();
    if normalized.starts_with(PREVIEW_NAMESPACE) {
        return VariantKind::PreviewPdf;
    }
    if normalized.starts_with(DERIVED_NAMESPACE) {
        return VariantKind::Derived;
    }
    if file_format.unwrap_or("").eq_ignore_ascii_case("pdf") && normalized.contains("/preview") {
        return VariantKind::PreviewPdf;
    }
    VariantKind::Origin
}

/// Stable 24-hex-char hash of a normalized object path
pub fn object_hash_key(object_key: Option<&str>) -> String {
    let normalized = object_key
        .unwrap_or("")
        .trim()
        .trim_start_matches('/')
        .to_lowercase();
    if normalized.is_empty() {
        return "unknown".to_string();
    }
    let digest = Sha1::digest(normalized.as_bytes());
    hex::encode(digest)[..24].to_string()
}

/// Recover the origin object path from a generated preview path
///
/// `legacy-previews/docs/mechanics.pptx.pdf` -> `docs/mechanics.pptx`
pub fn preview_pdf_origin_key(object_key: Option<&str>) -> Option<String> {
    let normalized = object_key.unwrap_or("").trim().trim_start_matches('/');
    if !normalized.to_lowercase().starts_with(PREVIEW_NAMESPACE) {
        return None;
    }
    let mut raw = &normalized[PREVIEW_NAMESPACE.len()..];
    if raw.to_lowercase().ends_with(".pdf") {
        raw = &raw[..raw.len() - 4];
    }
    let origin = raw.trim().trim_start_matches('/');
    if origin.is_empty() {
        None
    } else {
        Some(origin.to_string())
    }
}

/// Compute the canonical identity for a source
///
/// Resource-backed sources share `resource:<id>` regardless of which variant
/// is inspected. Otherwise the key is derived from the normalized object
/// path, unwrapping preview paths first so a preview and its origin agree.
pub fn canonical_key(
    resource_id: Option<i64>,
    object_key: Option<&str>,
    variant_kind: Option<VariantKind>,
) -> String {
    if let Some(id) = resource_id {
        if id > 0 {
            return format!("resource:{}", id);
        }
    }
    let normalized = object_key.unwrap_or("").trim().trim_start_matches('/');
    let kind = variant_kind.unwrap_or(VariantKind::Origin);
    let hashed = if kind == VariantKind::PreviewPdf {
        match preview_pdf_origin_key(Some(normalized)) {
            Some(origin) => object_hash_key(Some(&origin)),
            None => object_hash_key(Some(normalized)),
        }
    } else {
        object_hash_key(Some(normalized))
    };
    format!("object:{}", hashed)
}

/// Graph node id for a canonical group
pub fn canonical_node_id(key: &str) -> String {
    format!("canonical:{}", key.replace(':', "_"))
}

/// Office formats whose generated preview opens better than the original file
const PREVIEW_FIRST_FORMATS: [&str; 3] = ["ppt", "word", "excel"];

/// Pick which variant a client should open by default
pub fn auto_open_variant(kinds: &[VariantKind], primary_file_format: Option<&str>) -> VariantKind {
    let format_key = primary_file_format.unwrap_or("").trim().to_lowercase();
    let has = |kind: VariantKind| kinds.contains(&kind);

    if PREVIEW_FIRST_FORMATS.contains(&format_key.as_str()) && has(VariantKind::PreviewPdf) {
        return VariantKind::PreviewPdf;
    }
    if has(VariantKind::Origin) {
        return VariantKind::Origin;
    }
    if has(VariantKind::Derived) {
        return VariantKind::Derived;
    }
    if has(VariantKind::Upload) {
        return VariantKind::Upload;
    }
    if has(VariantKind::PreviewPdf) {
        return VariantKind::PreviewPdf;
    }
    VariantKind::Upload
}

/// Best-effort display title: trimmed title, else the object file name
pub fn clean_variant_title(title: Option<&str>, object_key: Option<&str>) -> String {
    let text = title.unwrap_or("").trim();
    if !text.is_empty() {
        return text.to_string();
    }
    let name = object_key
        .unwrap_or("")
        .rsplit('/')
        .next()
        .unwrap_or("")
        .trim();
    if name.is_empty() {
        "资源".to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_variant_kind_by_namespace() {
        assert_eq!(
            guess_variant_kind(Some("legacy-previews/docs/a.pptx.pdf"), None),
            VariantKind::PreviewPdf
        );
        assert_eq!(
            guess_variant_kind(Some("versions/docs/a-v2.pptx"), None),
            VariantKind::Derived
        );
        assert_eq!(
            guess_variant_kind(Some("docs/a/preview/out.pdf"), Some("pdf")),
            VariantKind::PreviewPdf
        );
        assert_eq!(guess_variant_kind(Some("docs/a.pptx"), Some("ppt")), VariantKind::Origin);
        assert_eq!(guess_variant_kind(None, None), VariantKind::Origin);
    }

    #[test]
    fn test_resource_backed_key_ignores_variant() {
        let origin = canonical_key(Some(42), Some("docs/a.pptx"), Some(VariantKind::Origin));
        let preview = canonical_key(
            Some(42),
            Some("legacy-previews/docs/a.pptx.pdf"),
            Some(VariantKind::PreviewPdf),
        );
        assert_eq!(origin, "resource:42");
        assert_eq!(origin, preview);
    }

    #[test]
    fn test_preview_key_collapses_onto_origin_key() {
        let origin = canonical_key(None, Some("docs/mechanics.pptx"), Some(VariantKind::Origin));
        let preview = canonical_key(
            None,
            Some("legacy-previews/docs/mechanics.pptx.pdf"),
            Some(VariantKind::PreviewPdf),
        );
        assert_eq!(origin, preview);
        assert!(origin.starts_with("object:"));
        assert_eq!(origin.len(), "object:".len() + 24);
    }

    #[test]
    fn test_object_hash_normalization() {
        assert_eq!(
            object_hash_key(Some("/Docs/A.pptx ")),
            object_hash_key(Some("docs/a.pptx"))
        );
        assert_eq!(object_hash_key(Some("  ")), "unknown");
        assert_eq!(object_hash_key(None), "unknown");
    }

    #[test]
    fn test_preview_pdf_origin_key() {
        assert_eq!(
            preview_pdf_origin_key(Some("legacy-previews/docs/a.pptx.pdf")),
            Some("docs/a.pptx".to_string())
        );
        // Preview without the .pdf suffix still unwraps the namespace
        assert_eq!(
            preview_pdf_origin_key(Some("legacy-previews/docs/a.pptx")),
            Some("docs/a.pptx".to_string())
        );
        assert_eq!(preview_pdf_origin_key(Some("docs/a.pptx")), None);
        assert_eq!(preview_pdf_origin_key(Some("legacy-previews/.pdf")), None);
    }

    #[test]
    fn test_variant_priority_total_order() {
        assert!(VariantKind::Origin.priority() > VariantKind::Derived.priority());
        assert!(VariantKind::Derived.priority() > VariantKind::Upload.priority());
        assert!(VariantKind::Upload.priority() > VariantKind::PreviewPdf.priority());
        assert_eq!(variant_priority("origin"), 100);
        assert_eq!(variant_priority("preview_pdf"), 10);
        assert_eq!(variant_priority("mystery"), 60);
    }

    #[test]
    fn test_auto_open_prefers_preview_for_office_formats() {
        let kinds = vec![VariantKind::Origin, VariantKind::PreviewPdf];
        assert_eq!(auto_open_variant(&kinds, Some("ppt")), VariantKind::PreviewPdf);
        assert_eq!(auto_open_variant(&kinds, Some("word")), VariantKind::PreviewPdf);
        assert_eq!(auto_open_variant(&kinds, Some("pdf")), VariantKind::Origin);
    }

    #[test]
    fn test_auto_open_fallback_chain() {
        assert_eq!(
            auto_open_variant(&[VariantKind::Derived, VariantKind::Upload], None),
            VariantKind::Derived
        );
        assert_eq!(auto_open_variant(&[VariantKind::PreviewPdf], None), VariantKind::PreviewPdf);
        assert_eq!(auto_open_variant(&[], Some("ppt")), VariantKind::Upload);
    }

    #[test]
    fn test_canonical_node_id_escapes_colons() {
        assert_eq!(canonical_node_id("resource:42"), "canonical:resource_42");
        assert_eq!(canonical_node_id("object:abc"), "canonical:object_abc");
    }

    #[test]
    fn test_clean_variant_title() {
        assert_eq!(clean_variant_title(Some(" 力学 "), None), "力学");
        assert_eq!(clean_variant_title(None, Some("docs/牛顿.pdf")), "牛顿.pdf");
        assert_eq!(clean_variant_title(Some(""), Some("")), "资源");
    }

    #[test]
    fn test_variant_kind_serializes_as_stored_strings() {
        for kind in [
            VariantKind::Origin,
            VariantKind::Derived,
            VariantKind::Upload,
            VariantKind::PreviewPdf,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, serde_json::Value::String(kind.as_str().to_string()));
            let back: VariantKind = serde_json::from_value(json).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn test_parse_or_falls_back() {
        assert_eq!(VariantKind::parse_or("Preview_PDF", VariantKind::Upload), VariantKind::PreviewPdf);
        assert_eq!(VariantKind::parse_or("??", VariantKind::Upload), VariantKind::Upload);
    }
}
