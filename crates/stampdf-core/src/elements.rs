//! Overlay document model
//!
//! The collection of user-placed overlay elements (text labels and stamp
//! images), keyed by id and partitioned by page. This is the single source of
//! truth for what is drawn over the page on screen and what gets flattened
//! into the output PDF.

use std::io::Cursor;

use base64::Engine;
use image::ImageFormat;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::SizeLimits;
use crate::error::StampError;
use crate::geometry::{DocPoint, DocRect, DocSize};

/// Stable element identity. Never reused within an [`OverlayDocument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub u64);

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    /// 1-indexed, fixed at creation.
    pub page: u32,
    pub position: DocPoint,
    #[serde(flatten)]
    pub body: ElementBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ElementBody {
    Text(TextBody),
    Image(ImageBody),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBody {
    pub text: String,
    /// Point size; also used as the box height when resizing.
    pub font_size: f64,
    /// Box width; the flattened text wraps to it.
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBody {
    pub payload: ImagePayload,
    pub width: f64,
    pub height: f64,
}

impl Element {
    pub fn is_text(&self) -> bool {
        matches!(self.body, ElementBody::Text(_))
    }

    pub fn as_text(&self) -> Option<&TextBody> {
        match &self.body {
            ElementBody::Text(text) => Some(text),
            ElementBody::Image(_) => None,
        }
    }

    pub fn as_image(&self) -> Option<&ImageBody> {
        match &self.body {
            ElementBody::Image(image) => Some(image),
            ElementBody::Text(_) => None,
        }
    }

    /// Bounding box in document space. Text boxes use the font size as height.
    pub fn bounds(&self) -> DocRect {
        let size = match &self.body {
            ElementBody::Text(text) => DocSize::new(text.width, text.font_size),
            ElementBody::Image(image) => DocSize::new(image.width, image.height),
        };
        DocRect::new(self.position, size)
    }

    /// Short human-readable identification, used in error messages.
    pub fn label(&self) -> String {
        match &self.body {
            ElementBody::Text(text) => format!("text \"{}\"", text.text),
            ElementBody::Image(image) => {
                format!("{} image {}", image.payload.kind().as_str(), self.id)
            }
        }
    }
}

/// Declared encoding of an image payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
    Other,
}

impl ImageKind {
    pub fn from_mime(mime: &str) -> Self {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/png" => ImageKind::Png,
            "image/jpeg" | "image/jpg" | "image/pjpeg" => ImageKind::Jpeg,
            _ => ImageKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Png => "PNG",
            ImageKind::Jpeg => "JPEG",
            ImageKind::Other => "image",
        }
    }
}

/// Owned image bytes plus the MIME type they were declared with.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePayload {
    mime: String,
    bytes: Vec<u8>,
}

impl ImagePayload {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    /// Wrap `bytes` under the MIME type their content shows, whatever the
    /// file claimed to be. Only PNG and JPEG can be drawn into the output.
    pub fn sniffed(bytes: Vec<u8>) -> Result<Self, StampError> {
        let format =
            image::guess_format(&bytes).map_err(|e| StampError::ImageDecode(e.to_string()))?;
        match format {
            ImageFormat::Png | ImageFormat::Jpeg => Ok(Self::new(format.to_mime_type(), bytes)),
            other => Err(StampError::UnsupportedImage(format!("{other:?}"))),
        }
    }

    /// Parse a `data:<mime>;base64,<data>` URL.
    pub fn from_data_url(url: &str) -> Result<Self, StampError> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| StampError::ImageDecode("not a data URL".to_string()))?;
        let (header, data) = rest
            .split_once(',')
            .ok_or_else(|| StampError::ImageDecode("data URL has no payload".to_string()))?;
        let mime = header.strip_suffix(";base64").ok_or_else(|| {
            StampError::ImageDecode("only base64 data URLs are supported".to_string())
        })?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|e| StampError::ImageDecode(e.to_string()))?;
        Ok(Self::new(mime, bytes))
    }

    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn kind(&self) -> ImageKind {
        ImageKind::from_mime(&self.mime)
    }

    /// Decode just enough of the image to learn its pixel dimensions.
    pub fn natural_size(&self) -> Result<DocSize, StampError> {
        let (width, height) = image::ImageReader::new(Cursor::new(&self.bytes))
            .with_guessed_format()
            .map_err(|e| StampError::ImageDecode(e.to_string()))?
            .into_dimensions()
            .map_err(|e| StampError::ImageDecode(e.to_string()))?;
        Ok(DocSize::new(f64::from(width), f64::from(height)))
    }
}

impl Serialize for ImagePayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_data_url())
    }
}

impl<'de> Deserialize<'de> for ImagePayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let url = String::deserialize(deserializer)?;
        ImagePayload::from_data_url(&url).map_err(serde::de::Error::custom)
    }
}

/// A new element before it has an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewElement {
    pub page: u32,
    pub position: DocPoint,
    pub body: ElementBody,
}

impl NewElement {
    pub fn text(page: u32, position: DocPoint, text: impl Into<String>, font_size: f64, width: f64) -> Self {
        Self {
            page,
            position,
            body: ElementBody::Text(TextBody {
                text: text.into(),
                font_size,
                width,
            }),
        }
    }

    pub fn image(page: u32, position: DocPoint, payload: ImagePayload, size: DocSize) -> Self {
        Self {
            page,
            position,
            body: ElementBody::Image(ImageBody {
                payload,
                width: size.width,
                height: size.height,
            }),
        }
    }
}

/// Change to apply to one element.
///
/// `Move` and `Frame` apply to either variant; the other patches only to the
/// variant they name and are no-ops otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementPatch {
    Move(DocPoint),
    /// Position and size together, as produced by a resize.
    Frame(DocRect),
    Text(TextPatch),
    Image(ImagePatch),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextPatch {
    pub text: Option<String>,
    pub font_size: Option<f64>,
    pub width: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImagePatch {
    pub width: Option<f64>,
    pub height: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayDocument {
    next_id: u64,
    elements: Vec<Element>,
    limits: SizeLimits,
}

impl OverlayDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: SizeLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn limits(&self) -> &SizeLimits {
        &self.limits
    }

    /// Append a new element and return its freshly allocated id.
    pub fn create(&mut self, new: NewElement) -> ElementId {
        let id = ElementId(self.next_id);
        self.next_id += 1;

        let mut element = Element {
            id,
            page: new.page,
            position: new.position.clamped(),
            body: new.body,
        };
        enforce_floors(&mut element, &self.limits);

        self.elements.push(element);
        id
    }

    /// Apply `patch` to the element `id`.
    ///
    /// Returns false when the element does not exist or the patch targets the
    /// other variant. Positions are clamped to the page origin and sizes to
    /// their floors.
    pub fn update(&mut self, id: ElementId, patch: ElementPatch) -> bool {
        let limits = self.limits;
        let Some(element) = self.elements.iter_mut().find(|el| el.id == id) else {
            return false;
        };

        match (patch, &mut element.body) {
            (ElementPatch::Move(position), _) => {
                element.position = position.clamped();
            }
            (ElementPatch::Frame(rect), body) => {
                element.position = rect.origin().clamped();
                match body {
                    ElementBody::Text(text) => {
                        text.width = rect.width;
                        text.font_size = rect.height;
                    }
                    ElementBody::Image(image) => {
                        image.width = rect.width;
                        image.height = rect.height;
                    }
                }
            }
            (ElementPatch::Text(patch), ElementBody::Text(text)) => {
                if let Some(content) = patch.text {
                    text.text = content;
                }
                if let Some(size) = patch.font_size {
                    text.font_size = size;
                }
                if let Some(width) = patch.width {
                    text.width = width;
                }
            }
            (ElementPatch::Image(patch), ElementBody::Image(image)) => {
                if let Some(width) = patch.width {
                    image.width = width;
                }
                if let Some(height) = patch.height {
                    image.height = height;
                }
            }
            (ElementPatch::Text(_), ElementBody::Image(_))
            | (ElementPatch::Image(_), ElementBody::Text(_)) => return false,
        }

        enforce_floors(element, &limits);
        true
    }

    /// Remove an element. Returns false if it was not present.
    pub fn delete(&mut self, id: ElementId) -> bool {
        if let Some(pos) = self.elements.iter().position(|el| el.id == id) {
            self.elements.remove(pos);
            true
        } else {
            false
        }
    }

    /// Replace the whole collection.
    ///
    /// Ids of the incoming elements are kept; the id counter moves past the
    /// highest one so no id is ever handed out twice.
    pub fn replace_all(&mut self, elements: Vec<Element>) {
        if let Some(max) = elements.iter().map(|el| el.id.0).max() {
            self.next_id = self.next_id.max(max + 1);
        }
        self.elements = elements;
        let limits = self.limits;
        for element in &mut self.elements {
            element.position = element.position.clamped();
            enforce_floors(element, &limits);
        }
    }

    pub fn get(&self, id: ElementId) -> Option<&Element> {
        self.elements.iter().find(|el| el.id == id)
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.get(id).is_some()
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Elements on `page`, in insertion (stacking) order.
    pub fn elements_for_page(&self, page: u32) -> Vec<&Element> {
        self.elements.iter().filter(|el| el.page == page).collect()
    }

    /// Distinct page numbers that carry at least one element, ascending.
    pub fn pages(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = self.elements.iter().map(|el| el.page).collect();
        pages.sort_unstable();
        pages.dedup();
        pages
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn has_non_latin_text(&self) -> bool {
        self.elements
            .iter()
            .filter_map(Element::as_text)
            .any(|text| crate::fonts::needs_fallback(&text.text))
    }
}

fn enforce_floors(element: &mut Element, limits: &SizeLimits) {
    match &mut element.body {
        ElementBody::Text(text) => {
            text.font_size = text.font_size.max(limits.min_font_size);
            text.width = text.width.max(limits.min_text_width);
        }
        ElementBody::Image(image) => {
            image.width = image.width.max(limits.min_image_side);
            image.height = image.height.max(limits.min_image_side);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text(page: u32, x: f64, y: f64) -> NewElement {
        NewElement::text(page, DocPoint::new(x, y), "Hello", 12.0, 200.0)
    }

    fn image(page: u32) -> NewElement {
        NewElement::image(
            page,
            DocPoint::new(100.0, 100.0),
            ImagePayload::new("image/png", vec![1, 2, 3]),
            DocSize::new(200.0, 150.0),
        )
    }

    #[test]
    fn test_new_document_is_empty() {
        let doc = OverlayDocument::new();
        assert!(doc.is_empty());
        assert_eq!(doc.elements().len(), 0);
    }

    #[test]
    fn test_create_returns_unique_ids() {
        let mut doc = OverlayDocument::new();
        let a = doc.create(text(1, 0.0, 0.0));
        let b = doc.create(image(1));
        assert_ne!(a, b);
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn test_ids_not_reused_after_delete_or_replace() {
        let mut doc = OverlayDocument::new();
        let a = doc.create(text(1, 0.0, 0.0));
        assert!(doc.delete(a));
        let b = doc.create(text(1, 0.0, 0.0));
        assert_ne!(a, b);
        doc.replace_all(Vec::new());
        let c = doc.create(text(1, 0.0, 0.0));
        assert!(c.0 > b.0);
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let mut doc = OverlayDocument::new();
        doc.create(text(1, 0.0, 0.0));
        assert!(!doc.delete(ElementId(99)));
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_font_size_patch_ignored_on_image() {
        let mut doc = OverlayDocument::with_limits(SizeLimits::default());
        let id = doc.create(image(1));
        let before = doc.get(id).cloned();
        let applied = doc.update(
            id,
            ElementPatch::Text(TextPatch {
                font_size: Some(30.0),
                ..TextPatch::default()
            }),
        );
        assert!(!applied);
        assert_eq!(doc.get(id).cloned(), before);
    }

    #[test]
    fn test_text_patch_updates_fields() {
        let mut doc = OverlayDocument::with_limits(SizeLimits::default());
        let id = doc.create(text(1, 10.0, 10.0));
        assert!(doc.update(
            id,
            ElementPatch::Text(TextPatch {
                text: Some("合計".to_string()),
                font_size: Some(18.0),
                width: None,
            })
        ));
        let body = doc.get(id).unwrap().as_text().unwrap();
        assert_eq!(body.text, "合計");
        assert_eq!(body.font_size, 18.0);
        assert_eq!(body.width, 200.0);
    }

    #[test]
    fn test_update_clamps_position_and_sizes() {
        let mut doc = OverlayDocument::with_limits(SizeLimits::default());
        let t = doc.create(text(1, 10.0, 10.0));
        let i = doc.create(image(1));
        doc.update(t, ElementPatch::Move(DocPoint::new(-5.0, -1.0)));
        doc.update(
            t,
            ElementPatch::Text(TextPatch {
                font_size: Some(2.0),
                width: Some(1.0),
                ..TextPatch::default()
            }),
        );
        doc.update(
            i,
            ElementPatch::Image(ImagePatch {
                width: Some(0.0),
                height: Some(-3.0),
            }),
        );
        let t = doc.get(t).unwrap();
        assert_eq!(t.position, DocPoint::new(0.0, 0.0));
        assert_eq!(t.as_text().unwrap().font_size, 8.0);
        assert_eq!(t.as_text().unwrap().width, 20.0);
        let i = doc.get(i).unwrap().as_image().unwrap();
        assert_eq!((i.width, i.height), (20.0, 20.0));
    }

    #[test]
    fn test_frame_patch_sets_text_height_as_font_size() {
        let mut doc = OverlayDocument::with_limits(SizeLimits::default());
        let id = doc.create(text(1, 10.0, 10.0));
        doc.update(
            id,
            ElementPatch::Frame(DocRect {
                x: 5.0,
                y: 6.0,
                width: 150.0,
                height: 24.0,
            }),
        );
        let el = doc.get(id).unwrap();
        assert_eq!(el.position, DocPoint::new(5.0, 6.0));
        assert_eq!(el.as_text().unwrap().font_size, 24.0);
        assert_eq!(el.bounds().width, 150.0);
    }

    #[test]
    fn test_elements_for_page_preserves_order() {
        let mut doc = OverlayDocument::new();
        let a = doc.create(text(1, 0.0, 0.0));
        doc.create(text(2, 0.0, 0.0));
        let c = doc.create(image(1));

        let page1: Vec<ElementId> = doc.elements_for_page(1).iter().map(|el| el.id).collect();
        assert_eq!(page1, vec![a, c]);
        assert_eq!(doc.elements_for_page(2).len(), 1);
        assert!(doc.elements_for_page(3).is_empty());
        assert_eq!(doc.pages(), vec![1, 2]);
    }

    #[test]
    fn test_data_url_roundtrip() {
        let payload = ImagePayload::new("image/jpeg", vec![0xFF, 0xD8, 0xFF, 0xE0]);
        let url = payload.to_data_url();
        assert!(url.starts_with("data:image/jpeg;base64,"));
        assert_eq!(ImagePayload::from_data_url(&url).unwrap(), payload);
        assert_eq!(payload.kind(), ImageKind::Jpeg);
    }

    #[test]
    fn test_data_url_rejects_garbage() {
        assert!(ImagePayload::from_data_url("http://example.com/a.png").is_err());
        assert!(ImagePayload::from_data_url("data:image/png,abc").is_err());
    }

    #[test]
    fn test_unknown_mime_kind_is_other() {
        assert_eq!(ImageKind::from_mime("image/webp"), ImageKind::Other);
        assert_eq!(ImageKind::from_mime("IMAGE/PNG"), ImageKind::Png);
    }

    #[test]
    fn test_serialized_elements_restore_without_id_reuse() {
        let mut doc = OverlayDocument::new();
        doc.create(text(1, 1.0, 2.0));
        let last = doc.create(image(2));

        let json = serde_json::to_string(doc.elements()).unwrap();
        let elements: Vec<Element> = serde_json::from_str(&json).unwrap();

        let mut restored = OverlayDocument::new();
        restored.replace_all(elements);
        assert_eq!(restored.elements(), doc.elements());
        assert!(restored.create(text(1, 0.0, 0.0)) > last);
    }

    #[test]
    fn test_label_names_text_content() {
        let mut doc = OverlayDocument::new();
        let id = doc.create(text(1, 0.0, 0.0));
        assert_eq!(doc.get(id).unwrap().label(), "text \"Hello\"");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    proptest! {
        /// Property: page partition is exact and covers the collection without duplicates
        #[test]
        fn page_partition_is_exact(pages in prop::collection::vec(1u32..6, 0..40)) {
            let mut doc = OverlayDocument::new();
            for (i, page) in pages.iter().enumerate() {
                doc.create(NewElement::text(*page, DocPoint::new(i as f64, 0.0), "x", 12.0, 50.0));
            }

            let mut seen = HashSet::new();
            for page in doc.pages() {
                for el in doc.elements_for_page(page) {
                    prop_assert_eq!(el.page, page);
                    prop_assert!(seen.insert(el.id));
                }
            }
            prop_assert_eq!(seen.len(), doc.len());
        }
    }
}
