use mime_guess::mime;
use std::path::Path;

/// Storage Adapter (C1), read side. The API server lands bytes under a
/// `storage_key`; this crate only ever needs to turn that key plus a
/// content type into validated, in-memory bytes.
pub struct DocumentLoader;

impl DocumentLoader {
    pub fn extension_from_key(storage_key: &str) -> Option<String> {
        Path::new(storage_key)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
    }

    pub fn is_supported(extension: Option<&str>) -> bool {
        match extension {
            Some("txt") | Some("md") | Some("pdf") | Some("docx") | Some("doc") => true,
            Some("pptx") | Some("ppt") | Some("xlsx") | Some("xls") | Some("rtf") => true,
            Some("html") | Some("htm") | Some("xml") => true,
            Some("json") | Some("yaml") | Some("yml") | Some("toml") | Some("csv") => true,
            Some("log") | Some("css") => true,
            None => false,
            Some(ext) => {
                let mime = mime_guess::from_ext(ext).first();
                matches!(mime, Some(m) if m.type_() == mime::TEXT)
            }
        }
    }

    pub fn validate_bytes(bytes: &[u8], extension: Option<&str>, max_size_mb: u64) -> anyhow::Result<()> {
        if !Self::is_supported(extension) {
            anyhow::bail!("unsupported file type: {:?}", extension);
        }

        let size_mb = bytes.len() as u64 / 1024 / 1024;
        if size_mb > max_size_mb {
            anyhow::bail!("file too large: {size_mb} MB (max: {max_size_mb} MB)");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_from_key_lowercases_and_ignores_directories() {
        assert_eq!(
            DocumentLoader::extension_from_key("ws/abc-Report.PDF"),
            Some("pdf".to_string())
        );
        assert_eq!(DocumentLoader::extension_from_key("ws/no-extension"), None);
    }

    #[test]
    fn known_document_extensions_are_supported() {
        for ext in ["txt", "md", "pdf", "docx", "xlsx", "html", "json", "csv"] {
            assert!(DocumentLoader::is_supported(Some(ext)), "{ext} should be supported");
        }
    }

    #[test]
    fn unknown_binary_extension_is_unsupported() {
        assert!(!DocumentLoader::is_supported(Some("exe")));
        assert!(!DocumentLoader::is_supported(None));
    }

    #[test]
    fn validate_bytes_rejects_unsupported_type() {
        let err = DocumentLoader::validate_bytes(b"hello", Some("exe"), 10).unwrap_err();
        assert!(err.to_string().contains("unsupported"));
    }

    #[test]
    fn validate_bytes_rejects_oversized_file() {
        let bytes = vec![0u8; 2 * 1024 * 1024];
        let err = DocumentLoader::validate_bytes(&bytes, Some("txt"), 1).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn validate_bytes_accepts_supported_small_file() {
        assert!(DocumentLoader::validate_bytes(b"hello world", Some("txt"), 10).is_ok());
    }
}
