//! WASM bindings for the stamp editor
//!
//! All editor state lives in Rust; the page renders pages with PDF.js,
//! forwards pointer/keyboard events and draws the overlay boxes it gets back.
//!
//! ## Usage (JavaScript)
//!
//! ```javascript
//! import init, { EditorSession } from './pkg/stampdf_wasm.js';
//!
//! await init();
//!
//! const editor = new EditorSession();
//! editor.setCaptureCallback((on) => on ? addWindowListeners() : removeWindowListeners());
//! const info = editor.loadPdf(file.name, file.type, bytes);
//! editor.renderSucceeded(pdfjsDoc.numPages);
//!
//! editor.toggleTextTool();
//! editor.pointerDownPage(event.offsetX, event.offsetY);
//! drawOverlay(editor.overlay());
//!
//! const { fileName, bytes: out } = await editor.save();
//! downloadBlob(out, fileName);
//! ```

pub mod editor;
pub mod font_fetch;
pub mod validation;

use wasm_bindgen::prelude::*;

pub use editor::{EditorSession, JsCapture};
pub use font_fetch::BrowserFontFetcher;
pub use validation::PdfInfo;

#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

#[wasm_bindgen]
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Header/trailer check without a full parse.
#[wasm_bindgen]
pub fn quick_validate(bytes: &[u8]) -> Result<(), JsValue> {
    validation::quick_validate(bytes).map_err(|e| JsValue::from_str(&e))
}

/// Page count, page sizes and metadata, for showing a file before it is
/// opened in the editor.
#[wasm_bindgen]
pub fn get_pdf_info(bytes: &[u8]) -> Result<JsValue, JsValue> {
    let info = validation::validate_pdf(bytes).map_err(|e| JsValue::from_str(&e))?;

    serde_wasm_bindgen::to_value(&info)
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

/// Whether saving `text` needs the downloaded fallback font.
#[wasm_bindgen]
pub fn needs_fallback_font(text: &str) -> bool {
    stampdf_core::fonts::needs_fallback(text)
}

/// Name the saved copy gets, e.g. `edited-lease.pdf`.
#[wasm_bindgen]
pub fn output_file_name(source_name: &str) -> String {
    stampdf_core::flatten::output_file_name(source_name)
}
