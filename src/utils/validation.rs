use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::path::Path;
use thiserror::Error;
use url::Url;
use utoipa::ToSchema;
use validator::Validate;

/// Container extensions accepted from storage events
pub const SUPPORTED_VIDEO_EXTENSIONS: &[&str] = &[
    ".mp4", ".avi", ".mov", ".mkv", ".wmv", ".flv", ".webm", ".m4v",
];

/// Name used when the source URL has no usable last segment
pub const FALLBACK_FILENAME: &str = "video.mp4";

const MISSING_SOURCE_URL: &str = "Missing required 'sourceUrl' in request body";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Body of `POST /upscale`
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpscaleRequest {
    /// http(s) URL of the source video
    #[serde(rename = "sourceUrl")]
    #[validate(
        length(min = 1, message = "Missing required 'sourceUrl' in request body"),
        custom(function = "validate_http_url")
    )]
    pub source_url: String,
}

fn validate_http_url(value: &str) -> Result<(), validator::ValidationError> {
    // Emptiness is reported by the length rule.
    if value.is_empty() {
        return Ok(());
    }

    let lower = value.to_lowercase();
    let has_scheme = lower.starts_with("http://") || lower.starts_with("https://");
    let parsed = Url::parse(value).ok().filter(|u| u.host_str().is_some());

    if has_scheme && parsed.is_some() {
        Ok(())
    } else {
        Err(validator::ValidationError::new("url_scheme")
            .with_message(Cow::Borrowed("Invalid URL format")))
    }
}

fn first_message(errors: &validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| errors.to_string())
}

fn is_json_content_type(content_type: &str) -> bool {
    match content_type.parse::<mime::Mime>() {
        Ok(m) => {
            m.essence_str() == mime::APPLICATION_JSON.essence_str()
                || m.suffix().map(|s| s == mime::JSON).unwrap_or(false)
        }
        Err(_) => false,
    }
}

/// Validates an HTTP ingress payload and returns the normalized source URL.
///
/// Checks run in order: JSON body, `sourceUrl` present, http(s) scheme.
pub fn validate_upscale_request(
    content_type: Option<&str>,
    body: &[u8],
) -> Result<UpscaleRequest, ValidationError> {
    if !content_type.map(is_json_content_type).unwrap_or(false) {
        return Err(ValidationError::new("NOT_JSON", "Request must be JSON"));
    }

    let payload: Value = serde_json::from_slice(body)
        .map_err(|_| ValidationError::new("NOT_JSON", "Request must be JSON"))?;

    let source_url = match payload.get("sourceUrl") {
        None | Some(Value::Null) => {
            return Err(ValidationError::new("MISSING_FIELD", MISSING_SOURCE_URL));
        }
        Some(Value::String(s)) => s.trim().to_string(),
        Some(_) => {
            return Err(ValidationError::new(
                "INVALID_FIELD",
                "'sourceUrl' must be a string",
            ));
        }
    };

    validate_source_url(&source_url)
}

/// URL-only validation, shared by the HTTP ingress and the CLI.
pub fn validate_source_url(source_url: &str) -> Result<UpscaleRequest, ValidationError> {
    let request = UpscaleRequest {
        source_url: source_url.trim().to_string(),
    };
    request.validate().map_err(|errors| {
        let message = first_message(&errors);
        let code = if message == MISSING_SOURCE_URL {
            "MISSING_FIELD"
        } else {
            "INVALID_URL"
        };
        ValidationError::new(code, message)
    })?;
    Ok(request)
}

/// Object named by a storage-change notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StorageObjectRef {
    pub bucket: String,
    pub name: String,
    /// Size reported by the notification, when present
    pub size: Option<u64>,
    #[serde(rename = "contentType")]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDecision {
    Process(StorageObjectRef),
    Skip { reason: String },
}

fn required_string(data: &Value, field: &str) -> Result<String, ValidationError> {
    match data.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) | None | Some(Value::Null) => Err(ValidationError::new(
            "MISSING_FIELD",
            format!("Missing required '{}' in event payload", field),
        )),
        Some(_) => Err(ValidationError::new(
            "INVALID_FIELD",
            format!("'{}' must be a string", field),
        )),
    }
}

// Notifications encode sizes as strings ("12345") or numbers.
fn declared_size(data: &Value) -> Option<u64> {
    match data.get("size") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Lowercased extension including the dot, empty when absent.
pub fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

pub fn is_supported_video_extension(ext: &str) -> bool {
    SUPPORTED_VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

/// Validates a storage-change notification, bare or wrapped in a CloudEvent `data` member.
///
/// Unsupported extensions are a skip decision, not an error.
pub fn validate_storage_event(payload: &Value) -> Result<EventDecision, ValidationError> {
    if !payload.is_object() {
        return Err(ValidationError::new(
            "MALFORMED_EVENT",
            "Event payload must be a JSON object",
        ));
    }

    let data = match payload.get("data") {
        Some(inner) if inner.is_object() && payload.get("bucket").is_none() => inner,
        _ => payload,
    };

    let bucket = required_string(data, "bucket")?;
    let name = required_string(data, "name")?;

    let ext = extension_of(&name);
    if !is_supported_video_extension(&ext) {
        let shown = if ext.is_empty() { "(none)" } else { ext.as_str() };
        return Ok(EventDecision::Skip {
            reason: format!("Unsupported file type {}", shown),
        });
    }

    Ok(EventDecision::Process(StorageObjectRef {
        bucket,
        name,
        size: declared_size(data),
        content_type: data
            .get("contentType")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
    }))
}

/// Rejects objects whose declared size is over the cap
pub fn validate_declared_size(size: u64, max_size: u64) -> Result<(), ValidationError> {
    if size > max_size {
        return Err(ValidationError::new(
            "FILE_TOO_LARGE",
            format!(
                "File too large ({:.2}MB). Maximum allowed: {}MB",
                size as f64 / (1024.0 * 1024.0),
                max_size / 1024 / 1024
            ),
        ));
    }
    Ok(())
}

/// Checks the MIME type guessed from the name. No guess is accepted.
pub fn validate_guessed_mime(name: &str) -> Result<Option<mime::Mime>, ValidationError> {
    match mime_guess::from_path(name).first() {
        Some(guess) if guess.type_() != mime::VIDEO => Err(ValidationError::new(
            "INVALID_MIME_TYPE",
            format!("Invalid file type. Expected video file, got {}", guess),
        )),
        other => Ok(other),
    }
}

/// Replaces characters that are unsafe in object names and scratch suffixes
pub fn sanitize_filename(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|c| {
            if c.is_control()
                || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ';')
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    let sanitized = sanitized.trim_start_matches('.').trim();
    if sanitized.len() <= MAX_FILENAME_BYTES {
        return sanitized.to_string();
    }

    // Shorten the stem so the extension survives
    let (stem, ext) = split_extension(sanitized);
    if ext.len() * 2 >= MAX_FILENAME_BYTES {
        return truncate_at_char_boundary(sanitized, MAX_FILENAME_BYTES).to_string();
    }
    format!(
        "{}{}",
        truncate_at_char_boundary(stem, MAX_FILENAME_BYTES - ext.len()),
        ext
    )
}

const MAX_FILENAME_BYTES: usize = 255;
const UPSCALED_SUFFIX: &str = "_upscaled";

/// Splits `a.b.mp4` into `("a.b", ".mp4")`; a leading dot is not an extension
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// `<stem>_upscaled<ext>`, keeping any `dir/` prefix of an object name
pub fn upscaled_name(name: &str) -> String {
    let (prefix, file) = match name.rfind('/') {
        Some(idx) => name.split_at(idx + 1),
        None => ("", name),
    };
    let (stem, ext) = split_extension(file);
    let budget = MAX_FILENAME_BYTES.saturating_sub(UPSCALED_SUFFIX.len() + ext.len());
    format!(
        "{}{}{}{}",
        prefix,
        truncate_at_char_boundary(stem, budget),
        UPSCALED_SUFFIX,
        ext
    )
}

/// Object names derived from a source URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNames {
    pub original: String,
    pub upscaled: String,
    /// Extension with dot, used as scratch file suffix
    pub extension: String,
}

impl OutputNames {
    pub fn from_source_url(source_url: &str) -> Self {
        let segment = Url::parse(source_url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|segments| segments.last().map(|s| s.to_string()))
            })
            .map(|s| {
                percent_encoding::percent_decode_str(&s)
                    .decode_utf8_lossy()
                    .into_owned()
            })
            .unwrap_or_default();

        let original = match sanitize_filename(&segment) {
            s if s.is_empty() => FALLBACK_FILENAME.to_string(),
            s => s,
        };

        Self::from_object_name(&original)
    }

    pub fn from_object_name(name: &str) -> Self {
        let file = name.rsplit('/').next().unwrap_or(name);
        let extension = Path::new(file)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", sanitize_filename(e)))
            .unwrap_or_default();

        Self {
            original: name.to_string(),
            upscaled: upscaled_name(name),
            extension,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_accepts_https_source() {
        let req = validate_upscale_request(
            Some("application/json"),
            &body(json!({"sourceUrl": "https://example.com/clip.mp4"})),
        )
        .unwrap();
        assert_eq!(req.source_url, "https://example.com/clip.mp4");
    }

    #[test]
    fn test_rejects_non_json() {
        let err = validate_upscale_request(Some("text/plain"), b"sourceUrl=x").unwrap_err();
        assert_eq!(err.message, "Request must be JSON");

        let err = validate_upscale_request(None, b"{}").unwrap_err();
        assert_eq!(err.code, "NOT_JSON");

        let err = validate_upscale_request(Some("application/json"), b"{not json").unwrap_err();
        assert_eq!(err.code, "NOT_JSON");
    }

    #[test]
    fn test_accepts_json_with_charset() {
        assert!(
            validate_upscale_request(
                Some("application/json; charset=utf-8"),
                &body(json!({"sourceUrl": "http://example.com/a.mov"})),
            )
            .is_ok()
        );
    }

    #[test]
    fn test_missing_source_url() {
        for payload in [json!({}), json!({"sourceUrl": null}), json!({"sourceUrl": ""}), json!([])] {
            let err =
                validate_upscale_request(Some("application/json"), &body(payload)).unwrap_err();
            assert_eq!(err.code, "MISSING_FIELD");
            assert!(err.message.contains("sourceUrl"));
        }
    }

    #[test]
    fn test_rejects_non_http_schemes() {
        for url in [
            "ftp://example.com/clip.mp4",
            "file:///etc/passwd",
            "example.com/clip.mp4",
            "javascript:alert(1)",
            "https://",
        ] {
            let err = validate_source_url(url).unwrap_err();
            assert_eq!(err.message, "Invalid URL format", "url: {}", url);
        }
    }

    #[test]
    fn test_non_string_source_url() {
        let err = validate_upscale_request(
            Some("application/json"),
            &body(json!({"sourceUrl": 42})),
        )
        .unwrap_err();
        assert_eq!(err.code, "INVALID_FIELD");
    }

    #[test]
    fn test_event_bare_and_wrapped() {
        let bare = json!({"bucket": "raw", "name": "clips/a.MP4", "size": "1024"});
        let wrapped = json!({"specversion": "1.0", "data": {"bucket": "raw", "name": "clips/a.MP4", "size": 1024}});

        for payload in [bare, wrapped] {
            match validate_storage_event(&payload).unwrap() {
                EventDecision::Process(obj) => {
                    assert_eq!(obj.bucket, "raw");
                    assert_eq!(obj.name, "clips/a.MP4");
                    assert_eq!(obj.size, Some(1024));
                    assert_eq!(obj.content_type, None);
                }
                other => panic!("unexpected decision: {:?}", other),
            }
        }
    }

    #[test]
    fn test_event_content_type_is_carried() {
        let payload = json!({"bucket": "raw", "name": "a.mkv", "contentType": "video/x-matroska"});
        let EventDecision::Process(obj) = validate_storage_event(&payload).unwrap() else {
            panic!("expected process");
        };
        assert_eq!(obj.content_type.as_deref(), Some("video/x-matroska"));
    }

    #[test]
    fn test_event_unsupported_extension_is_skip() {
        let decision = validate_storage_event(&json!({"bucket": "raw", "name": "photo.jpg"})).unwrap();
        assert_eq!(
            decision,
            EventDecision::Skip {
                reason: "Unsupported file type .jpg".to_string()
            }
        );
    }

    #[test]
    fn test_event_missing_fields() {
        let err = validate_storage_event(&json!({"name": "a.mp4"})).unwrap_err();
        assert!(err.message.contains("'bucket'"));

        let err = validate_storage_event(&json!({"bucket": "raw"})).unwrap_err();
        assert!(err.message.contains("'name'"));

        let err = validate_storage_event(&json!("raw/a.mp4")).unwrap_err();
        assert_eq!(err.code, "MALFORMED_EVENT");
    }

    #[test]
    fn test_declared_size_cap() {
        let max = 2000 * 1024 * 1024;
        assert!(validate_declared_size(max, max).is_ok());
        let err = validate_declared_size(max + 1, max).unwrap_err();
        assert_eq!(err.code, "FILE_TOO_LARGE");
        assert!(err.message.contains("Maximum allowed: 2000MB"));
    }

    #[test]
    fn test_guessed_mime() {
        assert_eq!(
            validate_guessed_mime("a.webm").unwrap().map(|m| m.type_() == mime::VIDEO),
            Some(true)
        );
        assert!(validate_guessed_mime("a.unknownext").unwrap().is_none());
        assert!(validate_guessed_mime("a.png").is_err());
    }

    #[test]
    fn test_output_names_from_url() {
        let names = OutputNames::from_source_url("https://example.com/media/clip.mp4?token=abc");
        assert_eq!(names.original, "clip.mp4");
        assert_eq!(names.upscaled, "clip_upscaled.mp4");
        assert_eq!(names.extension, ".mp4");

        let names = OutputNames::from_source_url("https://example.com/");
        assert_eq!(names.original, "video.mp4");
        assert_eq!(names.upscaled, "video_upscaled.mp4");

        let names = OutputNames::from_source_url("https://example.com/my%20clip.mov");
        assert_eq!(names.original, "my clip.mov");
    }

    #[test]
    fn test_upscaled_name_keeps_prefix() {
        assert_eq!(upscaled_name("uploads/2024/a.mkv"), "uploads/2024/a_upscaled.mkv");
        assert_eq!(upscaled_name("noext"), "noext_upscaled");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("..\\evil:name?.mp4"), "_evil_name_.mp4");
        assert_eq!(sanitize_filename(".hidden.mp4"), "hidden.mp4");
        assert_eq!(sanitize_filename(&"a".repeat(300)).len(), 255);
    }

    #[test]
    fn test_long_names_keep_extension() {
        let long = format!("{}.mp4", "é".repeat(150));
        let sanitized = sanitize_filename(&long);
        assert!(sanitized.len() <= 255);
        assert!(sanitized.ends_with(".mp4"));

        let upscaled = upscaled_name(&sanitized);
        assert!(upscaled.len() <= 255);
        assert!(upscaled.ends_with("_upscaled.mp4"));

        let prefixed = upscaled_name(&format!("in/{}", sanitized));
        assert!(prefixed.starts_with("in/"));
        assert!(prefixed.ends_with("_upscaled.mp4"));
        assert!(prefixed.len() <= 255 + "in/".len());
    }
}
