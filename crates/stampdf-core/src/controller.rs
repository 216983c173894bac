//! Editor controller
//!
//! Turns pointer and keyboard input into changes of the overlay model. The
//! controller owns the selection, the text tool flag, the current page and
//! zoom, and the single pointer session; all geometry changes go through
//! [`OverlayDocument::update`].
//!
//! Every input handler returns exactly one [`Effect`], so the host can keep
//! event handling exclusive: whichever target received the press is the only
//! one that acts on it.

use std::sync::Arc;

use serde::Serialize;

use crate::config::EditorConfig;
use crate::elements::{
    ElementId, ElementPatch, ImagePatch, ImagePayload, NewElement, OverlayDocument, TextPatch,
};
use crate::error::StampError;
use crate::flatten::{SaveRequest, SavedPdf};
use crate::fonts::FontFetcher;
use crate::geometry::{
    document_to_screen, fit_natural_size, resize_free, resize_locked, screen_to_document, DocPoint,
    DragTracker, Handle, ScreenPoint, ScreenRect,
};
use crate::session::{ActiveSession, InteractionSession, NoCapture, PointerCapture, SessionKind};

pub const PDF_MIME: &str = "application/pdf";

/// Interaction state, derived from the tool flag and the active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "target", rename_all = "snake_case")]
pub enum EditorMode {
    Idle,
    TextPlacementArmed,
    /// Pressed on an element; not yet a drag.
    Pressed(ElementId),
    Dragging(ElementId),
    Resizing(ElementId, Handle),
}

/// What a pointer press landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerTarget {
    /// The page surface, outside any element.
    Page,
    /// The body of an element.
    Element(ElementId),
    /// A resize handle of an element.
    Handle(ElementId, Handle),
    /// A region that owns its own pointer and keyboard input (the text field
    /// of a text element). Selects the element but never starts a drag.
    EditControl(ElementId),
}

/// Where keyboard focus is when a key is pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyFocus {
    #[default]
    Surface,
    EditControl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorKey {
    Escape,
    Delete,
    Backspace,
    Other,
}

impl EditorKey {
    /// Map a DOM `KeyboardEvent.key` value.
    pub fn from_dom_key(key: &str) -> Self {
        match key {
            "Escape" | "Esc" => EditorKey::Escape,
            "Delete" | "Del" => EditorKey::Delete,
            "Backspace" => EditorKey::Backspace,
            _ => EditorKey::Other,
        }
    }
}

/// Result of one input event, for the host to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    None,
    SelectionChanged { selected: Option<ElementId> },
    Created { element: ElementId },
    Moved { element: ElementId },
    Resized { element: ElementId },
    Deleted { element: ElementId },
    /// Focus is in an edit control; the host should blur it.
    BlurEditControl,
}

/// Page renderer state as reported by the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RenderStatus {
    Empty,
    Loading,
    Ready { page_count: u32 },
    Failed { message: String },
}

#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub name: String,
    pub bytes: Arc<[u8]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HandleView {
    pub handle: Handle,
    pub center: ScreenPoint,
}

/// One element as the host should draw it on the current page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayView {
    pub id: ElementId,
    pub kind: &'static str,
    pub rect: ScreenRect,
    pub selected: bool,
    /// Font size in screen pixels; text only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_px: Option<f64>,
    /// Empty unless the element is selected.
    pub handles: Vec<HandleView>,
}

#[derive(Debug)]
pub struct EditorController<C: PointerCapture = NoCapture> {
    config: EditorConfig,
    document: OverlayDocument,
    source: Option<SourceDocument>,
    render: RenderStatus,
    current_page: u32,
    scale: f64,
    selected: Option<ElementId>,
    text_tool: bool,
    session: InteractionSession<C>,
}

impl EditorController<NoCapture> {
    pub fn new(config: EditorConfig) -> Self {
        Self::with_capture(config, NoCapture)
    }
}

impl Default for EditorController<NoCapture> {
    fn default() -> Self {
        Self::new(EditorConfig::default())
    }
}

impl<C: PointerCapture> EditorController<C> {
    pub fn with_capture(config: EditorConfig, capture: C) -> Self {
        Self {
            document: OverlayDocument::with_limits(config.limits),
            scale: config.zoom.clamp(config.zoom.initial),
            config,
            source: None,
            render: RenderStatus::Empty,
            current_page: 1,
            selected: None,
            text_tool: false,
            session: InteractionSession::new(capture),
        }
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn document(&self) -> &OverlayDocument {
        &self.document
    }

    pub fn source(&self) -> Option<&SourceDocument> {
        self.source.as_ref()
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source.as_ref().map(|s| s.name.as_str())
    }

    pub fn render_status(&self) -> &RenderStatus {
        &self.render
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.render, RenderStatus::Ready { .. })
    }

    pub fn page_count(&self) -> Option<u32> {
        match self.render {
            RenderStatus::Ready { page_count } => Some(page_count),
            _ => None,
        }
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn selected(&self) -> Option<ElementId> {
        self.selected
    }

    pub fn is_text_tool_armed(&self) -> bool {
        self.text_tool
    }

    pub fn capture(&self) -> &C {
        self.session.capture()
    }

    /// For swapping host callbacks; never acquire or release through this.
    pub fn capture_mut(&mut self) -> &mut C {
        self.session.capture_mut()
    }

    pub fn mode(&self) -> EditorMode {
        match self.session.active() {
            Some(ActiveSession {
                element,
                kind: SessionKind::Drag(tracker),
            }) => {
                if tracker.is_engaged() {
                    EditorMode::Dragging(*element)
                } else {
                    EditorMode::Pressed(*element)
                }
            }
            Some(ActiveSession {
                element,
                kind: SessionKind::Resize { handle, .. },
            }) => EditorMode::Resizing(*element, *handle),
            None if self.text_tool => EditorMode::TextPlacementArmed,
            None => EditorMode::Idle,
        }
    }

    /// Accept a new source file.
    ///
    /// Anything but `application/pdf` is ignored and leaves all state as it
    /// was. Accepting a file clears every element, the selection and any
    /// pointer session, and goes back to page 1.
    pub fn load_source(&mut self, name: &str, mime: &str, bytes: Vec<u8>) -> bool {
        if !mime.trim().eq_ignore_ascii_case(PDF_MIME) {
            tracing::debug!(name, mime, "ignoring non-PDF source");
            return false;
        }

        self.session.end();
        self.document.replace_all(Vec::new());
        self.selected = None;
        self.text_tool = false;
        self.current_page = 1;
        self.render = RenderStatus::Loading;
        tracing::info!(name, size = bytes.len(), "source document loaded");
        self.source = Some(SourceDocument {
            name: name.to_string(),
            bytes: bytes.into(),
        });
        true
    }

    pub fn render_succeeded(&mut self, page_count: u32) {
        if self.source.is_none() {
            return;
        }
        if page_count == 0 {
            self.render_failed("document has no pages");
            return;
        }
        self.render = RenderStatus::Ready { page_count };
        self.current_page = self.current_page.clamp(1, page_count);
    }

    /// Record that the source could not be displayed. Elements are kept.
    pub fn render_failed(&mut self, message: &str) {
        tracing::warn!(message, "source document failed to render");
        self.session.end();
        self.render = RenderStatus::Failed {
            message: message.to_string(),
        };
    }

    /// Ask for another render attempt after a failure.
    pub fn retry_render(&mut self) -> bool {
        if self.source.is_none() || !matches!(self.render, RenderStatus::Failed { .. }) {
            return false;
        }
        self.render = RenderStatus::Loading;
        true
    }

    /// Go to `page`, clamped to the document. The selection is kept; a
    /// running drag or resize ends.
    pub fn set_page(&mut self, page: u32) -> u32 {
        let Some(count) = self.page_count() else {
            return self.current_page;
        };
        let page = page.clamp(1, count);
        if page != self.current_page {
            self.session.end();
            self.current_page = page;
        }
        self.current_page
    }

    pub fn next_page(&mut self) -> u32 {
        self.set_page(self.current_page.saturating_add(1))
    }

    pub fn previous_page(&mut self) -> u32 {
        self.set_page(self.current_page.saturating_sub(1))
    }

    /// Running sessions keep the scale they started with.
    pub fn set_scale(&mut self, scale: f64) -> f64 {
        self.scale = self.config.zoom.clamp(scale);
        self.scale
    }

    pub fn zoom_in(&mut self) -> f64 {
        self.set_scale(self.scale + self.config.zoom.step)
    }

    pub fn zoom_out(&mut self) -> f64 {
        self.set_scale(self.scale - self.config.zoom.step)
    }

    /// Flip the text tool. Ignored while a pointer session runs.
    pub fn toggle_text_tool(&mut self) -> bool {
        if !self.session.is_active() {
            self.text_tool = !self.text_tool;
        }
        self.text_tool
    }

    /// Current page elements in stacking order, in screen pixels.
    pub fn overlay_layout(&self) -> Vec<OverlayView> {
        self.document
            .elements_for_page(self.current_page)
            .into_iter()
            .map(|element| {
                let bounds = element.bounds();
                let selected = self.selected == Some(element.id);
                let handles = if !selected {
                    Vec::new()
                } else {
                    let available: &[Handle] = if element.is_text() {
                        &Handle::ALL
                    } else {
                        &Handle::CORNERS
                    };
                    available
                        .iter()
                        .map(|handle| HandleView {
                            handle: *handle,
                            center: document_to_screen(handle.anchor_on(&bounds), self.scale),
                        })
                        .collect()
                };
                OverlayView {
                    id: element.id,
                    kind: if element.is_text() { "text" } else { "image" },
                    rect: bounds.to_screen(self.scale),
                    selected,
                    font_px: element.as_text().map(|text| text.font_size * self.scale),
                    handles,
                }
            })
            .collect()
    }

    pub fn pointer_down(&mut self, target: PointerTarget, point: ScreenPoint) -> Effect {
        if self.session.is_active() {
            return Effect::None;
        }
        match target {
            PointerTarget::Page => self.press_page(point),
            PointerTarget::Element(id) => self.press_element(id, point),
            PointerTarget::Handle(id, handle) => self.press_handle(id, handle, point),
            PointerTarget::EditControl(id) => {
                if self.document.contains(id) {
                    self.select(Some(id))
                } else {
                    Effect::None
                }
            }
        }
    }

    pub fn pointer_move(&mut self, point: ScreenPoint) -> Effect {
        let Some(active) = self.session.active_mut() else {
            return Effect::None;
        };
        let element = active.element;

        let Some(current) = self.document.get(element) else {
            self.session.end();
            return Effect::None;
        };
        let is_text = current.is_text();
        let limits = self.config.limits;

        let (patch, effect) = match &mut active.kind {
            SessionKind::Drag(tracker) => (
                tracker.update(point).map(ElementPatch::Move),
                Effect::Moved { element },
            ),
            SessionKind::Resize { handle, start } => {
                let rect = if is_text {
                    Some(resize_free(
                        start,
                        *handle,
                        point,
                        limits.min_text_width,
                        limits.min_font_size,
                    ))
                } else {
                    resize_locked(start, *handle, point, limits.min_image_side)
                };
                (rect.map(ElementPatch::Frame), Effect::Resized { element })
            }
        };

        match patch {
            Some(patch) => {
                if self.document.update(element, patch) {
                    effect
                } else {
                    Effect::None
                }
            }
            None => Effect::None,
        }
    }

    /// Apply the final pointer position and end the session. The element
    /// stays selected.
    pub fn pointer_up(&mut self, point: ScreenPoint) -> Effect {
        let effect = self.pointer_move(point);
        self.session.end();
        effect
    }

    /// End the session without a final update (pointer cancelled, window
    /// lost focus).
    pub fn cancel_interaction(&mut self) {
        self.session.end();
    }

    fn press_page(&mut self, point: ScreenPoint) -> Effect {
        if !self.text_tool {
            return self.select(None);
        }
        if !self.is_ready() {
            return Effect::None;
        }

        let defaults = &self.config.defaults;
        let id = self.document.create(NewElement::text(
            self.current_page,
            screen_to_document(point, self.scale),
            defaults.text.clone(),
            defaults.font_size,
            defaults.text_width,
        ));
        self.selected = Some(id);
        self.text_tool = false;
        tracing::debug!(element = %id, page = self.current_page, "text element placed");
        Effect::Created { element: id }
    }

    fn press_element(&mut self, id: ElementId, point: ScreenPoint) -> Effect {
        let Some(element) = self.document.get(id) else {
            return Effect::None;
        };
        let tracker = DragTracker::new(
            element.position,
            point,
            self.scale,
            self.config.drag_threshold_px,
        );
        let effect = self.select(Some(id));
        self.session.begin_drag(id, tracker);
        effect
    }

    /// Only the selected element shows handles; a press on another element's
    /// handle area is a press on that element.
    fn press_handle(&mut self, id: ElementId, handle: Handle, point: ScreenPoint) -> Effect {
        let Some(element) = self.document.get(id) else {
            return Effect::None;
        };
        if self.selected != Some(id) {
            return self.press_element(id, point);
        }
        if !element.is_text() && !handle.is_corner() {
            return Effect::None;
        }
        let rect = element.bounds();
        self.session.begin_resize(id, handle, rect, point, self.scale);
        Effect::None
    }

    fn select(&mut self, selection: Option<ElementId>) -> Effect {
        if self.selected == selection {
            return Effect::None;
        }
        self.selected = selection;
        Effect::SelectionChanged { selected: selection }
    }

    pub fn key_down(&mut self, key: EditorKey, focus: KeyFocus) -> Effect {
        match (key, focus) {
            (EditorKey::Escape, KeyFocus::EditControl) => Effect::BlurEditControl,
            (EditorKey::Escape, KeyFocus::Surface) => {
                self.session.end();
                self.select(None)
            }
            (EditorKey::Delete | EditorKey::Backspace, KeyFocus::Surface) => match self.selected {
                Some(id) => self.delete_element(id),
                None => Effect::None,
            },
            _ => Effect::None,
        }
    }

    pub fn delete_element(&mut self, id: ElementId) -> Effect {
        if self.session.active().is_some_and(|s| s.element == id) {
            self.session.end();
        }
        if !self.document.delete(id) {
            return Effect::None;
        }
        if self.selected == Some(id) {
            self.selected = None;
        }
        tracing::debug!(element = %id, "element deleted");
        Effect::Deleted { element: id }
    }

    pub fn set_text(&mut self, id: ElementId, text: &str) -> bool {
        self.document.update(
            id,
            ElementPatch::Text(TextPatch {
                text: Some(text.to_string()),
                ..TextPatch::default()
            }),
        )
    }

    /// Set the font size, clamped to the configured range.
    pub fn set_font_size(&mut self, id: ElementId, size: f64) -> bool {
        if !size.is_finite() {
            return false;
        }
        let limits = self.config.limits;
        let size = size.clamp(limits.min_font_size, limits.max_font_size);
        self.document.update(
            id,
            ElementPatch::Text(TextPatch {
                font_size: Some(size),
                ..TextPatch::default()
            }),
        )
    }

    pub fn set_text_width(&mut self, id: ElementId, width: f64) -> bool {
        if !width.is_finite() {
            return false;
        }
        self.document.update(
            id,
            ElementPatch::Text(TextPatch {
                width: Some(width),
                ..TextPatch::default()
            }),
        )
    }

    pub fn set_image_size(&mut self, id: ElementId, width: f64, height: f64) -> bool {
        if !width.is_finite() || !height.is_finite() {
            return false;
        }
        self.document.update(
            id,
            ElementPatch::Image(ImagePatch {
                width: Some(width),
                height: Some(height),
            }),
        )
    }

    /// Place an image on the current page and select it.
    ///
    /// Returns `Ok(None)` for a MIME type that is not `image/*`.
    pub fn add_image(&mut self, mime: &str, bytes: Vec<u8>) -> Result<Option<ElementId>, StampError> {
        if !mime.trim().to_ascii_lowercase().starts_with("image/") {
            tracing::debug!(mime, "ignoring non-image file");
            return Ok(None);
        }
        if self.source.is_none() {
            return Err(StampError::NoDocument);
        }

        let payload = ImagePayload::sniffed(bytes)?;
        let natural = payload.natural_size()?;
        let defaults = &self.config.defaults;
        let size = fit_natural_size(
            natural,
            defaults.image_max_side,
            self.config.limits.min_image_side,
        );
        let id = self.document.create(NewElement::image(
            self.current_page,
            DocPoint::new(defaults.image_x, defaults.image_y),
            payload,
            size,
        ));
        self.selected = Some(id);
        tracing::debug!(element = %id, width = size.width, height = size.height, "image element placed");
        Ok(Some(id))
    }

    /// Snapshot of everything the save needs.
    pub fn save_request(&self) -> Result<SaveRequest, StampError> {
        let source = self.source.as_ref().ok_or(StampError::NoDocument)?;
        tracing::info!(
            name = %source.name,
            elements = self.document.len(),
            "preparing save"
        );
        Ok(SaveRequest::new(
            &source.name,
            Arc::clone(&source.bytes),
            self.document.elements().to_vec(),
            self.config.fonts.clone(),
        ))
    }

    pub async fn save<F: FontFetcher>(&self, fetcher: &F) -> Result<SavedPdf, StampError> {
        self.save_request()?.execute(fetcher).await
    }
}
