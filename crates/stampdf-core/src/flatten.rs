//! Flatten overlay elements into the source PDF
//!
//! Each page that carries elements gets one extra content stream with the
//! elements drawn in stacking order. The original page content is wrapped in
//! `q`/`Q` first so any graphics state it leaves behind does not leak into
//! the overlay.

use std::collections::BTreeMap;
use std::sync::Arc;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

use crate::config::FontConfig;
use crate::elements::{Element, ElementBody, ImageBody, TextBody};
use crate::error::StampError;
use crate::fonts::{acquire_fallback_font, needs_fallback, FallbackEmbedding, FallbackFont, FontFetcher};
use crate::images::embed_image;
use crate::page::{load_document, page_box, page_resources, PageBox};
use crate::text_layout::{wrap_lines, Helvetica, LINE_HEIGHT_FACTOR};

const HELVETICA_RESOURCE: &str = "StHelv";
const FALLBACK_RESOURCE: &str = "StFallback";
const IMAGE_RESOURCE: &str = "StImg";

/// Draw `elements` into the PDF in `source` and return the new file.
///
/// Elements referring to pages the document does not have are skipped. Any
/// element that fails to draw aborts the whole operation with
/// [`StampError::DrawError`]. `fallback` must be provided when any text
/// element needs it.
pub fn flatten(
    source: &[u8],
    elements: &[Element],
    fallback: Option<&FallbackFont>,
) -> Result<Vec<u8>, StampError> {
    if elements.is_empty() {
        return Ok(source.to_vec());
    }

    let doc = load_document(source)?;
    let pages = doc.get_pages();

    let mut by_page: BTreeMap<u32, Vec<&Element>> = BTreeMap::new();
    for element in elements {
        by_page.entry(element.page).or_default().push(element);
    }

    let mut flattener = Flattener::new(doc, fallback);
    for (page_num, page_elements) in &by_page {
        let Some(page_id) = pages.get(page_num) else {
            tracing::warn!(
                page = page_num,
                count = page_elements.len(),
                "skipping elements on a page the document does not have"
            );
            continue;
        };
        flattener.stamp_page(*page_id, page_elements)?;
    }

    let bytes = flattener.finish()?;
    tracing::info!(
        elements = elements.len(),
        pages = by_page.len(),
        size = bytes.len(),
        "flattened overlay into PDF"
    );
    Ok(bytes)
}

struct Flattener<'f> {
    doc: Document,
    helvetica: Option<ObjectId>,
    fallback_font: Option<&'f FallbackFont>,
    fallback: Option<FallbackEmbedding<'f>>,
}

/// Font and XObject dictionaries of the page being stamped.
struct PageResources {
    fonts: Dictionary,
    xobjects: Dictionary,
}

impl<'f> Flattener<'f> {
    fn new(doc: Document, fallback_font: Option<&'f FallbackFont>) -> Self {
        Self {
            doc,
            helvetica: None,
            fallback_font,
            fallback: None,
        }
    }

    fn stamp_page(&mut self, page_id: ObjectId, elements: &[&Element]) -> Result<(), StampError> {
        let media = page_box(&self.doc, page_id);
        let mut resources = page_resources(&self.doc, page_id);
        let mut page_res = PageResources {
            fonts: self.sub_dictionary(&resources, b"Font"),
            xobjects: self.sub_dictionary(&resources, b"XObject"),
        };

        let mut operations = Vec::new();
        for element in elements {
            self.draw(element, &media, &mut page_res, &mut operations)
                .map_err(|e| StampError::DrawError {
                    label: element.label(),
                    source: Box::new(e),
                })?;
        }

        resources.set("Font", page_res.fonts);
        resources.set("XObject", page_res.xobjects);
        let page = self
            .doc
            .get_dictionary_mut(page_id)
            .map_err(|e| StampError::OperationError(e.to_string()))?;
        page.set("Resources", resources);

        append_content(&mut self.doc, page_id, operations)
    }

    /// Copy out a resource sub-dictionary, following a reference if needed.
    fn sub_dictionary(&self, resources: &Dictionary, key: &[u8]) -> Dictionary {
        match resources.get(key) {
            Ok(Object::Dictionary(dict)) => dict.clone(),
            Ok(Object::Reference(id)) => self
                .doc
                .get_dictionary(*id)
                .cloned()
                .unwrap_or_default(),
            _ => Dictionary::new(),
        }
    }

    fn draw(
        &mut self,
        element: &Element,
        media: &PageBox,
        resources: &mut PageResources,
        ops: &mut Vec<Operation>,
    ) -> Result<(), StampError> {
        let (x, y) = (element.position.x, element.position.y);
        match &element.body {
            ElementBody::Text(text) => self.draw_text(text, x, y, media, resources, ops),
            ElementBody::Image(image) => self.draw_image(image, x, y, media, resources, ops),
        }
    }

    fn draw_text(
        &mut self,
        text: &TextBody,
        x: f64,
        y: f64,
        media: &PageBox,
        resources: &mut PageResources,
        ops: &mut Vec<Operation>,
    ) -> Result<(), StampError> {
        let size = text.font_size;

        let (font_name, encoded) = if needs_fallback(&text.text) {
            let font_id = self.fallback_font_id()?;
            let name = resource_name(&mut resources.fonts, FALLBACK_RESOURCE, font_id);
            let embedding = self
                .fallback
                .as_mut()
                .ok_or_else(|| StampError::FontError("fallback font not embedded".to_string()))?;
            let lines = wrap_lines(&text.text, text.width, size, &*embedding);
            let encoded: Vec<Object> = lines.iter().map(|line| embedding.encode(line)).collect();
            (name, encoded)
        } else {
            let font_id = self.helvetica_id();
            let name = resource_name(&mut resources.fonts, HELVETICA_RESOURCE, font_id);
            let encoded: Vec<Object> = wrap_lines(&text.text, text.width, size, &Helvetica)
                .into_iter()
                .map(|line| Object::String(line.into_bytes(), StringFormat::Literal))
                .collect();
            (name, encoded)
        };

        let (pdf_x, pdf_y) = media.to_pdf(x, y, size);
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new("g", vec![0.into()]));
        ops.push(Operation::new("BT", vec![]));
        ops.push(Operation::new("Tf", vec![Object::Name(font_name), real(size)]));
        ops.push(Operation::new("TL", vec![real(size * LINE_HEIGHT_FACTOR)]));
        ops.push(Operation::new("Td", vec![real(pdf_x), real(pdf_y)]));
        for (i, line) in encoded.into_iter().enumerate() {
            if i > 0 {
                ops.push(Operation::new("T*", vec![]));
            }
            ops.push(Operation::new("Tj", vec![line]));
        }
        ops.push(Operation::new("ET", vec![]));
        ops.push(Operation::new("Q", vec![]));
        Ok(())
    }

    fn draw_image(
        &mut self,
        image: &ImageBody,
        x: f64,
        y: f64,
        media: &PageBox,
        resources: &mut PageResources,
        ops: &mut Vec<Operation>,
    ) -> Result<(), StampError> {
        let image_id = embed_image(&mut self.doc, &image.payload)?;
        let name = resource_name(&mut resources.xobjects, IMAGE_RESOURCE, image_id);

        let (pdf_x, pdf_y) = media.to_pdf(x, y, image.height);
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new(
            "cm",
            vec![
                real(image.width),
                0.into(),
                0.into(),
                real(image.height),
                real(pdf_x),
                real(pdf_y),
            ],
        ));
        ops.push(Operation::new("Do", vec![Object::Name(name)]));
        ops.push(Operation::new("Q", vec![]));
        Ok(())
    }

    fn helvetica_id(&mut self) -> ObjectId {
        if let Some(id) = self.helvetica {
            return id;
        }
        let id = self.doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        self.helvetica = Some(id);
        id
    }

    fn fallback_font_id(&mut self) -> Result<ObjectId, StampError> {
        if let Some(embedding) = &self.fallback {
            return Ok(embedding.font_id());
        }
        let font = self.fallback_font.ok_or_else(|| {
            StampError::FontError("no fallback font available for non-Latin text".to_string())
        })?;
        let embedding = FallbackEmbedding::new(&mut self.doc, font)?;
        let id = embedding.font_id();
        self.fallback = Some(embedding);
        Ok(id)
    }

    fn finish(mut self) -> Result<Vec<u8>, StampError> {
        if let Some(embedding) = self.fallback.take() {
            embedding.finish(&mut self.doc)?;
        }
        let mut output = Vec::new();
        self.doc
            .save_to(&mut output)
            .map_err(|e| StampError::OperationError(e.to_string()))?;
        Ok(output)
    }
}

fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

/// Name under which `id` is registered in `dict`, adding it if needed.
///
/// Reuses an existing entry that already points at `id`; otherwise picks the
/// first of `base`, `base1`, `base2`, ... not already taken.
fn resource_name(dict: &mut Dictionary, base: &str, id: ObjectId) -> Vec<u8> {
    for (name, value) in dict.iter() {
        if matches!(value, Object::Reference(existing) if *existing == id) {
            return name.clone();
        }
    }

    let mut candidate = base.as_bytes().to_vec();
    let mut n = 0u32;
    while dict.has(&candidate) {
        n += 1;
        candidate = format!("{base}{n}").into_bytes();
    }
    dict.set(candidate.clone(), Object::Reference(id));
    candidate
}

/// Add the overlay operations as a new content stream at the end of the page.
fn append_content(doc: &mut Document, page_id: ObjectId, operations: Vec<Operation>) -> Result<(), StampError> {
    let encoded = Content { operations }
        .encode()
        .map_err(|e| StampError::OperationError(e.to_string()))?;

    let existing = doc
        .get_dictionary(page_id)
        .map_err(|e| StampError::OperationError(e.to_string()))?
        .get(b"Contents")
        .ok()
        .cloned();
    let existing: Vec<Object> = match existing {
        Some(Object::Reference(id)) => match doc.get_object(id) {
            Ok(Object::Array(parts)) => parts.clone(),
            _ => vec![Object::Reference(id)],
        },
        Some(Object::Array(parts)) => parts,
        _ => Vec::new(),
    };

    let contents = if existing.is_empty() {
        let overlay_id = doc.add_object(Stream::new(Dictionary::new(), encoded));
        vec![Object::Reference(overlay_id)]
    } else {
        let save_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
        // Leading newline keeps Q apart from a final token with no trailing whitespace.
        let mut restored = b"\nQ\n".to_vec();
        restored.extend_from_slice(&encoded);
        let overlay_id = doc.add_object(Stream::new(Dictionary::new(), restored));

        let mut contents = Vec::with_capacity(existing.len() + 2);
        contents.push(Object::Reference(save_id));
        contents.extend(existing);
        contents.push(Object::Reference(overlay_id));
        contents
    };

    let page = doc
        .get_dictionary_mut(page_id)
        .map_err(|e| StampError::OperationError(e.to_string()))?;
    page.set("Contents", contents);
    Ok(())
}

/// Output file name for an edited copy of `source_name`.
pub fn output_file_name(source_name: &str) -> String {
    format!("edited-{source_name}")
}

/// Everything needed to produce the output file, captured at save time.
///
/// Holding a snapshot means edits made while fonts are downloading do not
/// leak into the file being written, and a failed save leaves nothing behind.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    file_name: String,
    source: Arc<[u8]>,
    elements: Vec<Element>,
    fonts: FontConfig,
}

/// A finished output file.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedPdf {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl SaveRequest {
    pub fn new(source_name: &str, source: Arc<[u8]>, elements: Vec<Element>, fonts: FontConfig) -> Self {
        Self {
            file_name: output_file_name(source_name),
            source,
            elements,
            fonts,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Whether executing this request will have to fetch a fallback font.
    pub fn needs_fallback_font(&self) -> bool {
        self.elements
            .iter()
            .filter_map(Element::as_text)
            .any(|text| needs_fallback(&text.text))
    }

    /// Acquire fonts if needed, then flatten.
    pub async fn execute<F: FontFetcher>(&self, fetcher: &F) -> Result<SavedPdf, StampError> {
        let result = self.run(fetcher).await;
        match &result {
            Ok(saved) => {
                tracing::info!(file = %saved.file_name, size = saved.bytes.len(), "save complete")
            }
            Err(e) => tracing::error!(file = %self.file_name, error = %e, "save failed"),
        }
        result
    }

    async fn run<F: FontFetcher>(&self, fetcher: &F) -> Result<SavedPdf, StampError> {
        let fallback = if self.needs_fallback_font() {
            Some(acquire_fallback_font(&self.fonts, fetcher).await?)
        } else {
            None
        };
        let bytes = flatten(&self.source, &self.elements, fallback.as_ref())?;
        Ok(SavedPdf {
            file_name: self.file_name.clone(),
            bytes,
        })
    }
}
