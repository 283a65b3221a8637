//! PDF text extraction backend.

use std::sync::Arc;

use crate::error::ExtractionError;

/// Extracts text from a PDF, one string per page in page order.
pub trait PdfTextExtractor: Send + Sync {
    fn extract_pages(&self, payload: &[u8]) -> Result<Vec<String>, ExtractionError>;
}

/// The backend compiled into this build, if any.
pub fn default_extractor() -> Option<Arc<dyn PdfTextExtractor>> {
    #[cfg(feature = "pdf")]
    {
        Some(Arc::new(PdfExtract))
    }
    #[cfg(not(feature = "pdf"))]
    {
        None
    }
}

/// Trim each page, drop blank pages, join the rest with newlines.
pub fn join_pages(pages: Vec<String>) -> String {
    pages
        .iter()
        .map(|page| page.trim())
        .filter(|page| !page.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// `pdf-extract` backed extractor.
#[cfg(feature = "pdf")]
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtract;

#[cfg(feature = "pdf")]
impl PdfTextExtractor for PdfExtract {
    fn extract_pages(&self, payload: &[u8]) -> Result<Vec<String>, ExtractionError> {
        // The decoder panics on some malformed documents.
        match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(payload)) {
            Ok(Ok(pages)) => Ok(pages),
            Ok(Err(e)) => Err(ExtractionError::Pdf(e.to_string())),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "decoder panicked".to_string());
                Err(ExtractionError::Pdf(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_pages_trims_and_skips_blank() {
        let pages = vec![
            "\n  Page one  \n".to_string(),
            String::new(),
            "   ".to_string(),
            "Page three".to_string(),
        ];
        assert_eq!(join_pages(pages), "Page one\nPage three");
    }

    #[test]
    fn join_pages_empty() {
        assert_eq!(join_pages(Vec::new()), "");
    }

    #[cfg(feature = "pdf")]
    #[test]
    fn garbage_payload_is_error_not_panic() {
        let result = PdfExtract.extract_pages(b"this is not a pdf");
        assert!(matches!(result, Err(ExtractionError::Pdf(_))));
    }

    #[test]
    fn default_extractor_matches_feature() {
        assert_eq!(default_extractor().is_some(), cfg!(feature = "pdf"));
    }
}
