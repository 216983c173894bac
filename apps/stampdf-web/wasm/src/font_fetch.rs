//! Fallback font download through the browser's `fetch`
//!
//! Each attempt gets its own `AbortController`; a window timer aborts the
//! request once the configured timeout elapses.

use js_sys::Uint8Array;
use stampdf_core::{FontFetchError, FontFetcher, FontSource};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{AbortController, Request, RequestInit, RequestMode, Response};

#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserFontFetcher;

impl FontFetcher for BrowserFontFetcher {
    async fn fetch(&self, source: &FontSource, timeout_ms: u32) -> Result<Vec<u8>, FontFetchError> {
        let url = source.url.as_str();
        let network = |e: JsValue| FontFetchError::Network {
            url: url.to_string(),
            message: js_message(&e),
        };

        let window = web_sys::window().ok_or_else(|| FontFetchError::Network {
            url: url.to_string(),
            message: "no window".to_string(),
        })?;
        let controller = AbortController::new().map_err(network)?;
        let signal = controller.signal();

        let opts = RequestInit::new();
        opts.set_method("GET");
        opts.set_mode(RequestMode::Cors);
        opts.set_signal(Some(&signal));
        let request = Request::new_with_str_and_init(url, &opts).map_err(network)?;

        let on_timeout = Closure::<dyn FnMut()>::once(move || controller.abort());
        let timer = window
            .set_timeout_with_callback_and_timeout_and_arguments_0(
                on_timeout.as_ref().unchecked_ref(),
                i32::try_from(timeout_ms).unwrap_or(i32::MAX),
            )
            .map_err(network)?;

        let result = read_body(&window, &request, url).await;
        window.clear_timeout_with_handle(timer);
        drop(on_timeout);

        match result {
            Err(FontFetchError::Network { .. }) if signal.aborted() => Err(FontFetchError::Timeout {
                url: url.to_string(),
                timeout_ms,
            }),
            other => other,
        }
    }
}

async fn read_body(
    window: &web_sys::Window,
    request: &Request,
    url: &str,
) -> Result<Vec<u8>, FontFetchError> {
    let network = |e: JsValue| FontFetchError::Network {
        url: url.to_string(),
        message: js_message(&e),
    };

    let response = JsFuture::from(window.fetch_with_request(request))
        .await
        .map_err(network)?;
    let response: Response = response.dyn_into().map_err(network)?;

    if !response.ok() {
        return Err(FontFetchError::Status {
            url: url.to_string(),
            status: response.status(),
        });
    }

    let buffer = JsFuture::from(response.array_buffer().map_err(network)?)
        .await
        .map_err(network)?;
    Ok(Uint8Array::new(&buffer).to_vec())
}

/// Best-effort text for a thrown JS value.
fn js_message(value: &JsValue) -> String {
    if let Some(s) = value.as_string() {
        return s;
    }
    value
        .dyn_ref::<js_sys::Error>()
        .map(|e| String::from(e.message()))
        .unwrap_or_else(|| format!("{:?}", value))
}
