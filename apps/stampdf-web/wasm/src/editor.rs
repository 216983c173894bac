//! Browser-facing editor session
//!
//! Wraps the core [`EditorController`] so the page only forwards DOM events and
//! draws what [`EditorSession::overlay`] returns. Window-level pointer
//! listeners are installed and removed by the page when the capture callback
//! fires.

use std::str::FromStr;

use js_sys::{Function, Object, Reflect, Uint8Array};
use serde::Serialize;
use stampdf_core::{
    EditorConfig, EditorController, EditorKey, Effect, ElementId, Handle, KeyFocus,
    PointerCapture, PointerTarget, ScreenPoint,
};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

use crate::font_fetch::BrowserFontFetcher;
use crate::validation::{self, PdfInfo};

/// Pointer capture driven by a page callback: `callback(true)` asks the page to
/// start listening on `window`, `callback(false)` to stop.
#[derive(Debug, Default)]
pub struct JsCapture {
    callback: Option<Function>,
    held: bool,
}

impl JsCapture {
    pub fn is_held(&self) -> bool {
        self.held
    }

    fn notify(&self, on: bool) {
        if let Some(ref callback) = self.callback {
            let _ = callback.call1(&JsValue::null(), &JsValue::from_bool(on));
        }
    }
}

impl PointerCapture for JsCapture {
    fn acquire(&mut self) {
        self.held = true;
        self.notify(true);
    }

    fn release(&mut self) {
        self.held = false;
        self.notify(false);
    }
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value)
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

#[wasm_bindgen]
pub struct EditorSession {
    controller: EditorController<JsCapture>,
    info: Option<PdfInfo>,
}

impl EditorSession {
    fn from_config(config: EditorConfig) -> Self {
        Self {
            controller: EditorController::with_capture(config, JsCapture::default()),
            info: None,
        }
    }

    pub fn controller(&self) -> &EditorController<JsCapture> {
        &self.controller
    }

    /// Accept and validate a source file. `Ok(None)` means the file was not a
    /// PDF and nothing changed; a file that fails validation is kept with a
    /// failed render status so the page can show the message.
    fn load_pdf_internal(
        &mut self,
        name: &str,
        mime: &str,
        bytes: &[u8],
    ) -> Result<Option<PdfInfo>, String> {
        if !validation::is_pdf_mime(mime) {
            return Ok(None);
        }
        self.controller.load_source(name, mime, bytes.to_vec());
        self.info = None;

        match validation::validate_pdf(bytes) {
            Ok(info) if info.encrypted => {
                let message = "Encrypted PDFs are not supported".to_string();
                self.controller.render_failed(&message);
                Err(message)
            }
            Ok(info) => {
                self.info = Some(info.clone());
                Ok(Some(info))
            }
            Err(message) => {
                self.controller.render_failed(&message);
                Err(message)
            }
        }
    }

    fn pointer_down_handle_internal(
        &mut self,
        id: u64,
        handle: &str,
        x: f64,
        y: f64,
    ) -> Result<Effect, String> {
        let handle = Handle::from_str(handle)?;
        Ok(self.controller.pointer_down(
            PointerTarget::Handle(ElementId(id), handle),
            ScreenPoint::new(x, y),
        ))
    }

    fn key_down_internal(&mut self, key: &str, in_edit_control: bool) -> Effect {
        let focus = if in_edit_control {
            KeyFocus::EditControl
        } else {
            KeyFocus::Surface
        };
        self.controller.key_down(EditorKey::from_dom_key(key), focus)
    }

    fn add_image_internal(&mut self, mime: &str, bytes: &[u8]) -> Result<Option<u64>, String> {
        self.controller
            .add_image(mime, bytes.to_vec())
            .map(|id| id.map(|id| id.0))
            .map_err(|e| e.to_string())
    }
}

#[wasm_bindgen]
impl EditorSession {
    /// Create a session. `config_json` overrides any subset of the defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>) -> Result<EditorSession, JsValue> {
        let config = match config_json {
            Some(json) => EditorConfig::from_json(&json).map_err(|e| JsValue::from_str(&e.to_string()))?,
            None => EditorConfig::default(),
        };
        Ok(Self::from_config(config))
    }

    /// Called with `true`/`false` when window-level pointer tracking should
    /// start/stop.
    #[wasm_bindgen(js_name = setCaptureCallback)]
    pub fn set_capture_callback(&mut self, callback: Function) {
        // A capture already held is reported to the new callback.
        let held = self.controller.capture().is_held();
        if held {
            let _ = callback.call1(&JsValue::null(), &JsValue::TRUE);
        }
        self.controller.capture_mut().callback = Some(callback);
    }

    #[wasm_bindgen(js_name = loadPdf)]
    pub fn load_pdf(&mut self, name: &str, mime: &str, bytes: &[u8]) -> Result<JsValue, JsValue> {
        match self
            .load_pdf_internal(name, mime, bytes)
            .map_err(|e| JsValue::from_str(&e))?
        {
            Some(info) => to_js(&info),
            None => Ok(JsValue::NULL),
        }
    }

    #[wasm_bindgen(js_name = renderSucceeded)]
    pub fn render_succeeded(&mut self, page_count: u32) {
        self.controller.render_succeeded(page_count);
    }

    #[wasm_bindgen(js_name = renderFailed)]
    pub fn render_failed(&mut self, message: &str) {
        self.controller.render_failed(message);
    }

    #[wasm_bindgen(js_name = retryRender)]
    pub fn retry_render(&mut self) -> bool {
        self.controller.retry_render()
    }

    #[wasm_bindgen(js_name = renderStatus)]
    pub fn render_status(&self) -> Result<JsValue, JsValue> {
        to_js(self.controller.render_status())
    }

    /// Source bytes for PDF.js.
    #[wasm_bindgen(js_name = documentBytes)]
    pub fn document_bytes(&self) -> Option<Uint8Array> {
        let source = self.controller.source()?;
        let array = Uint8Array::new_with_length(source.bytes.len() as u32);
        array.copy_from(&source.bytes);
        Some(array)
    }

    #[wasm_bindgen(js_name = pdfInfo)]
    pub fn pdf_info(&self) -> Result<JsValue, JsValue> {
        to_js(&self.info)
    }

    #[wasm_bindgen(getter, js_name = currentPage)]
    pub fn current_page(&self) -> u32 {
        self.controller.current_page()
    }

    #[wasm_bindgen(getter, js_name = pageCount)]
    pub fn page_count(&self) -> u32 {
        self.controller.page_count().unwrap_or(0)
    }

    #[wasm_bindgen(getter)]
    pub fn scale(&self) -> f64 {
        self.controller.scale()
    }

    #[wasm_bindgen(js_name = setPage)]
    pub fn set_page(&mut self, page: u32) -> u32 {
        self.controller.set_page(page)
    }

    #[wasm_bindgen(js_name = nextPage)]
    pub fn next_page(&mut self) -> u32 {
        self.controller.next_page()
    }

    #[wasm_bindgen(js_name = previousPage)]
    pub fn previous_page(&mut self) -> u32 {
        self.controller.previous_page()
    }

    #[wasm_bindgen(js_name = setScale)]
    pub fn set_scale(&mut self, scale: f64) -> f64 {
        self.controller.set_scale(scale)
    }

    #[wasm_bindgen(js_name = zoomIn)]
    pub fn zoom_in(&mut self) -> f64 {
        self.controller.zoom_in()
    }

    #[wasm_bindgen(js_name = zoomOut)]
    pub fn zoom_out(&mut self) -> f64 {
        self.controller.zoom_out()
    }

    #[wasm_bindgen(js_name = toggleTextTool)]
    pub fn toggle_text_tool(&mut self) -> bool {
        self.controller.toggle_text_tool()
    }

    #[wasm_bindgen(getter, js_name = textToolArmed)]
    pub fn text_tool_armed(&self) -> bool {
        self.controller.is_text_tool_armed()
    }

    pub fn mode(&self) -> Result<JsValue, JsValue> {
        to_js(&self.controller.mode())
    }

    #[wasm_bindgen(js_name = pointerDownPage)]
    pub fn pointer_down_page(&mut self, x: f64, y: f64) -> Result<JsValue, JsValue> {
        to_js(&self.controller.pointer_down(PointerTarget::Page, ScreenPoint::new(x, y)))
    }

    #[wasm_bindgen(js_name = pointerDownElement)]
    pub fn pointer_down_element(&mut self, id: u64, x: f64, y: f64) -> Result<JsValue, JsValue> {
        to_js(&self.controller.pointer_down(
            PointerTarget::Element(ElementId(id)),
            ScreenPoint::new(x, y),
        ))
    }

    /// `handle` is one of `top-left`, `top`, ... `bottom-right`.
    #[wasm_bindgen(js_name = pointerDownHandle)]
    pub fn pointer_down_handle(
        &mut self,
        id: u64,
        handle: &str,
        x: f64,
        y: f64,
    ) -> Result<JsValue, JsValue> {
        let effect = self
            .pointer_down_handle_internal(id, handle, x, y)
            .map_err(|e| JsValue::from_str(&e))?;
        to_js(&effect)
    }

    #[wasm_bindgen(js_name = pointerDownEditControl)]
    pub fn pointer_down_edit_control(&mut self, id: u64, x: f64, y: f64) -> Result<JsValue, JsValue> {
        to_js(&self.controller.pointer_down(
            PointerTarget::EditControl(ElementId(id)),
            ScreenPoint::new(x, y),
        ))
    }

    #[wasm_bindgen(js_name = pointerMove)]
    pub fn pointer_move(&mut self, x: f64, y: f64) -> Result<JsValue, JsValue> {
        to_js(&self.controller.pointer_move(ScreenPoint::new(x, y)))
    }

    #[wasm_bindgen(js_name = pointerUp)]
    pub fn pointer_up(&mut self, x: f64, y: f64) -> Result<JsValue, JsValue> {
        to_js(&self.controller.pointer_up(ScreenPoint::new(x, y)))
    }

    #[wasm_bindgen(js_name = cancelInteraction)]
    pub fn cancel_interaction(&mut self) {
        self.controller.cancel_interaction();
    }

    /// `key` is `KeyboardEvent.key`.
    #[wasm_bindgen(js_name = keyDown)]
    pub fn key_down(&mut self, key: &str, in_edit_control: bool) -> Result<JsValue, JsValue> {
        to_js(&self.key_down_internal(key, in_edit_control))
    }

    #[wasm_bindgen(js_name = setText)]
    pub fn set_text(&mut self, id: u64, text: &str) -> bool {
        self.controller.set_text(ElementId(id), text)
    }

    #[wasm_bindgen(js_name = setFontSize)]
    pub fn set_font_size(&mut self, id: u64, size: f64) -> bool {
        self.controller.set_font_size(ElementId(id), size)
    }

    #[wasm_bindgen(js_name = setTextWidth)]
    pub fn set_text_width(&mut self, id: u64, width: f64) -> bool {
        self.controller.set_text_width(ElementId(id), width)
    }

    #[wasm_bindgen(js_name = setImageSize)]
    pub fn set_image_size(&mut self, id: u64, width: f64, height: f64) -> bool {
        self.controller.set_image_size(ElementId(id), width, height)
    }

    #[wasm_bindgen(js_name = deleteElement)]
    pub fn delete_element(&mut self, id: u64) -> Result<JsValue, JsValue> {
        to_js(&self.controller.delete_element(ElementId(id)))
    }

    /// Returns the new element id, or `undefined` for a non-image file.
    #[wasm_bindgen(js_name = addImage)]
    pub fn add_image(&mut self, mime: &str, bytes: &[u8]) -> Result<Option<u64>, JsValue> {
        self.add_image_internal(mime, bytes)
            .map_err(|e| JsValue::from_str(&e))
    }

    /// Elements of the current page in screen space, with handles for the
    /// selected one.
    pub fn overlay(&self) -> Result<JsValue, JsValue> {
        to_js(&self.controller.overlay_layout())
    }

    #[wasm_bindgen(js_name = selectedElement)]
    pub fn selected_element(&self) -> Result<JsValue, JsValue> {
        let element = self
            .controller
            .selected()
            .and_then(|id| self.controller.document().get(id));
        to_js(&element)
    }

    #[wasm_bindgen(js_name = elementCount)]
    pub fn element_count(&self) -> usize {
        self.controller.document().len()
    }

    /// Flatten the overlays and resolve to `{ fileName, bytes }`.
    ///
    /// The snapshot is taken before the promise runs, so edits made while a
    /// save is pending do not leak into it.
    pub fn save(&self) -> js_sys::Promise {
        let request = match self.controller.save_request() {
            Ok(request) => request,
            Err(e) => {
                let message = JsValue::from_str(&e.to_string());
                return js_sys::Promise::reject(&message);
            }
        };

        future_to_promise(async move {
            let saved = request.execute(&BrowserFontFetcher).await.map_err(|e| {
                let message = e.to_string();
                web_sys::console::error_1(&JsValue::from_str(&message));
                JsValue::from_str(&message)
            })?;

            let bytes = Uint8Array::new_with_length(saved.bytes.len() as u32);
            bytes.copy_from(&saved.bytes);
            let result = Object::new();
            Reflect::set(&result, &"fileName".into(), &JsValue::from_str(&saved.file_name))?;
            Reflect::set(&result, &"bytes".into(), &bytes)?;
            Ok(result.into())
        })
    }
}
