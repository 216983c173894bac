//! Overlay editing and flattening for PDF documents
//!
//! Users place text labels and stamp images over the pages of a loaded PDF,
//! move and resize them, and save a copy with the overlays drawn into the
//! page content.
//!
//! - [`geometry`]: screen/document coordinate math, drag and resize rules
//! - [`elements`]: the overlay document model
//! - [`controller`]: selection and pointer/keyboard state machine
//! - [`flatten`]: writes the overlays into the PDF using lopdf

pub mod config;
pub mod controller;
pub mod elements;
pub mod error;
pub mod flatten;
pub mod fonts;
pub mod geometry;
pub mod images;
pub mod page;
pub mod session;
pub mod text_layout;

pub use config::{EditorConfig, FontConfig, FontSource};
pub use controller::{
    EditorController, EditorKey, EditorMode, Effect, KeyFocus, OverlayView, PointerTarget,
    RenderStatus,
};
pub use elements::{Element, ElementBody, ElementId, ImagePayload, OverlayDocument};
pub use error::{FontFetchError, StampError};
pub use flatten::{flatten, SaveRequest, SavedPdf};
pub use fonts::{FallbackFont, FontFetcher};
pub use geometry::{DocPoint, DocRect, DocSize, Handle, ScreenPoint};
pub use page::{page_count, PageInfo};
pub use session::{NoCapture, PointerCapture};
