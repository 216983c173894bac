//! Checks on files handed in by the page
//!
//! The source picker and the drop zone both land here before anything reaches
//! the controller, so a broken file is reported as a render failure instead of
//! surfacing later during save.

use lopdf::Document;
use serde::Serialize;
use stampdf_core::page::{page_infos, PageInfo};

/// What the page shows about a loaded source.
#[derive(Debug, Clone, Serialize, Default)]
pub struct PdfInfo {
    /// Number of pages in the document
    pub page_count: u32,
    /// PDF header version (e.g., "1.7")
    pub version: String,
    /// Whether the document is encrypted; encrypted sources are refused
    pub encrypted: bool,
    /// File size in bytes
    pub size_bytes: usize,
    /// Document title from the Info dictionary (if available)
    pub title: Option<String>,
    /// Size and rotation of every page, in page order
    pub pages: Vec<PageInfo>,
}

pub fn is_pdf_mime(mime: &str) -> bool {
    mime.trim().eq_ignore_ascii_case("application/pdf")
}

pub fn is_image_mime(mime: &str) -> bool {
    mime.trim().to_ascii_lowercase().starts_with("image/")
}

/// Cheap header/trailer sniff, no parsing.
pub fn quick_validate(bytes: &[u8]) -> Result<(), String> {
    if bytes.len() < 8 {
        return Err("File too small to be a valid PDF".to_string());
    }
    if !bytes.starts_with(b"%PDF-") {
        return Err("Not a valid PDF file (missing %PDF- header)".to_string());
    }

    let tail = &bytes[bytes.len().saturating_sub(1024)..];
    if !tail.windows(5).any(|w| w == b"%%EOF") {
        return Err("PDF appears truncated (missing %%EOF marker)".to_string());
    }
    Ok(())
}

/// Full parse: page count, sizes and metadata.
pub fn validate_pdf(bytes: &[u8]) -> Result<PdfInfo, String> {
    quick_validate(bytes)?;

    let document = Document::load_mem(bytes).map_err(|e| format!("Failed to parse PDF: {}", e))?;
    let pages = page_infos(&document);
    if pages.is_empty() {
        return Err("PDF has no pages".to_string());
    }

    Ok(PdfInfo {
        page_count: pages.len() as u32,
        version: header_version(bytes),
        encrypted: document.is_encrypted(),
        size_bytes: bytes.len(),
        title: info_string(&document, b"Title"),
        pages,
    })
}

fn header_version(bytes: &[u8]) -> String {
    bytes
        .get(5..8)
        .and_then(|v| std::str::from_utf8(v).ok())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "1.4".to_string())
}

/// A text entry of the trailer's Info dictionary.
fn info_string(document: &Document, key: &[u8]) -> Option<String> {
    let info_id = document.trailer.get(b"Info").ok()?.as_reference().ok()?;
    let value = document.get_dictionary(info_id).ok()?.get(key).ok()?.as_str().ok()?;
    let decoded = String::from_utf8_lossy(value).into_owned();
    (!decoded.is_empty()).then_some(decoded)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};

    /// A Letter-size PDF with one line of text per page and a Title entry.
    pub(crate) fn create_test_pdf(num_pages: u32) -> Vec<u8> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();

        let mut kids = Vec::new();
        for i in 0..num_pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Td", vec![Object::Integer(100), Object::Integer(700)]),
                    Operation::new(
                        "Tj",
                        vec![Object::string_literal(format!("Sheet {}", i + 1))],
                    ),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Count" => num_pages as i64,
                "Kids" => kids,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal("Quarterly invoice"),
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    #[test]
    fn test_quick_validate_rejects_non_pdf() {
        assert!(quick_validate(b"not a pdf file").is_err());
        assert!(quick_validate(b"tiny").is_err());
    }

    #[test]
    fn test_quick_validate_rejects_truncated_file() {
        let pdf = create_test_pdf(1);
        let truncated = &pdf[..pdf.len() - 10];
        assert!(quick_validate(truncated).unwrap_err().contains("truncated"));
    }

    #[test]
    fn test_validate_pdf_reports_pages_and_metadata() {
        let info = validate_pdf(&create_test_pdf(3)).unwrap();
        assert_eq!(info.page_count, 3);
        assert_eq!(info.version, "1.7");
        assert!(!info.encrypted);
        assert_eq!(info.title.as_deref(), Some("Quarterly invoice"));
        assert_eq!(info.pages[2].page_num, 3);
        assert_eq!(info.pages[0].width, 612.0);
    }

    #[test]
    fn test_mime_checks() {
        assert!(is_pdf_mime("application/pdf"));
        assert!(is_pdf_mime(" Application/PDF "));
        assert!(!is_pdf_mime("application/x-pdf"));
        assert!(is_image_mime("image/png"));
        assert!(is_image_mime("IMAGE/webp"));
        assert!(!is_image_mime("text/plain"));
    }
}
