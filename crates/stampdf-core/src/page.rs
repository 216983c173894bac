//! Page geometry lookups
//!
//! Overlay coordinates are measured from the top-left of the page's visible
//! area, so flattening needs each page's MediaBox, which may be inherited from
//! an ancestor in the page tree.

use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::Serialize;

use crate::error::StampError;

/// Page tree depth beyond which inheritance lookups give up.
const MAX_INHERIT_DEPTH: usize = 32;

/// A page's MediaBox, normalised so that `x0 <= x1` and `y0 <= y1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PageBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl PageBox {
    /// US Letter, used when no MediaBox can be found.
    pub const LETTER: PageBox = PageBox {
        x0: 0.0,
        y0: 0.0,
        x1: 612.0,
        y1: 792.0,
    };

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    /// Convert an overlay point (top-left origin, y down) to PDF user space.
    ///
    /// `extent` is the height of the thing being placed; PDF positions its
    /// bottom-left corner.
    pub fn to_pdf(&self, x: f64, y: f64, extent: f64) -> (f64, f64) {
        (self.x0 + x, self.y1 - y - extent)
    }
}

/// Summary of one page, as reported to the host after loading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageInfo {
    /// 1-indexed
    pub page_num: u32,
    /// Width of the effective page box, in points
    pub width: f64,
    /// Height of the effective page box, in points
    pub height: f64,
    /// 0, 90, 180 or 270
    pub rotation: i32,
}

/// Walk up the page tree from `page_id` and return the first value of `key`.
pub fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut dict = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_INHERIT_DEPTH {
        if let Ok(value) = dict.get(key) {
            return Some(resolve(doc, value));
        }
        let parent = dict.get(b"Parent").and_then(Object::as_reference).ok()?;
        dict = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(object),
        other => other,
    }
}

/// MediaBox of a page, inherited if needed, falling back to US Letter.
pub fn page_box(doc: &Document, page_id: ObjectId) -> PageBox {
    inherited(doc, page_id, b"MediaBox")
        .and_then(|obj| obj.as_array().ok())
        .and_then(|array| parse_box_array(doc, array).ok())
        .unwrap_or(PageBox::LETTER)
}

fn parse_box_array(doc: &Document, array: &[Object]) -> Result<PageBox, StampError> {
    if array.len() != 4 {
        return Err(StampError::ParseError(
            "MediaBox must have 4 elements".to_string(),
        ));
    }

    let mut values = [0.0f64; 4];
    for (i, obj) in array.iter().enumerate() {
        values[i] = match resolve(doc, obj) {
            Object::Integer(n) => *n as f64,
            Object::Real(n) => f64::from(*n),
            _ => {
                return Err(StampError::ParseError(format!(
                    "MediaBox element {i} is not a number"
                )))
            }
        };
    }

    Ok(PageBox {
        x0: values[0].min(values[2]),
        y0: values[1].min(values[3]),
        x1: values[0].max(values[2]),
        y1: values[1].max(values[3]),
    })
}

/// Page rotation, inherited if needed.
pub fn page_rotation(doc: &Document, page_id: ObjectId) -> i32 {
    inherited(doc, page_id, b"Rotate")
        .and_then(|obj| obj.as_i64().ok())
        .map(|angle| normalize_rotation(angle as i32))
        .unwrap_or(0)
}

fn normalize_rotation(angle: i32) -> i32 {
    angle.rem_euclid(360)
}

/// The page's effective resource dictionary, copied out.
///
/// Follows references for the dictionary itself; sub-dictionaries are left
/// as they are.
pub fn page_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    inherited(doc, page_id, b"Resources")
        .and_then(|obj| obj.as_dict().ok())
        .cloned()
        .unwrap_or_default()
}

pub fn page_infos(doc: &Document) -> Vec<PageInfo> {
    doc.get_pages()
        .into_iter()
        .map(|(page_num, page_id)| {
            let media = page_box(doc, page_id);
            PageInfo {
                page_num,
                width: media.width(),
                height: media.height(),
                rotation: page_rotation(doc, page_id),
            }
        })
        .collect()
}

pub fn load_document(bytes: &[u8]) -> Result<Document, StampError> {
    let doc = Document::load_mem(bytes).map_err(|e| StampError::ParseError(e.to_string()))?;
    if doc.is_encrypted() {
        return Err(StampError::ParseError(
            "encrypted documents are not supported".to_string(),
        ));
    }
    Ok(doc)
}

/// Number of pages in a PDF.
pub fn page_count(bytes: &[u8]) -> Result<u32, StampError> {
    let doc = load_document(bytes)?;
    Ok(doc.get_pages().len() as u32)
}
