//! Image XObjects for stamp images
//!
//! JPEG data is embedded as-is behind `DCTDecode`. Everything else goes
//! through the PNG decoder: pixels are expanded to 8-bit, alpha is split into a
//! soft mask, and both streams are Flate-compressed.

use std::io::{Cursor, Write};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

use crate::elements::{ImageKind, ImagePayload};
use crate::error::StampError;

/// Add `payload` to `doc` as an image XObject and return its id.
pub fn embed_image(doc: &mut Document, payload: &ImagePayload) -> Result<ObjectId, StampError> {
    match payload.kind() {
        ImageKind::Jpeg => embed_jpeg(doc, payload.bytes()),
        ImageKind::Png | ImageKind::Other => embed_png(doc, payload.bytes()),
    }
}

fn embed_jpeg(doc: &mut Document, bytes: &[u8]) -> Result<ObjectId, StampError> {
    let frame = read_jpeg_frame(bytes)?;
    let color_space = match frame.components {
        1 => "DeviceGray",
        3 => "DeviceRGB",
        4 => "DeviceCMYK",
        n => {
            return Err(StampError::ImageDecode(format!(
                "unsupported JPEG component count {n}"
            )))
        }
    };

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => i64::from(frame.width),
        "Height" => i64::from(frame.height),
        "ColorSpace" => color_space,
        "BitsPerComponent" => i64::from(frame.precision),
        "Filter" => "DCTDecode",
    };
    // Adobe-written CMYK stores inverted ink values.
    if frame.components == 4 && frame.adobe {
        dict.set(
            "Decode",
            [1, 0, 1, 0, 1, 0, 1, 0]
                .iter()
                .map(|v| Object::Integer(*v))
                .collect::<Vec<_>>(),
        );
    }

    tracing::debug!(
        width = frame.width,
        height = frame.height,
        components = frame.components,
        "embedded JPEG image"
    );
    Ok(doc.add_object(Stream::new(dict, bytes.to_vec())))
}

/// Fields of a JPEG's start-of-frame header that the image dictionary needs.
#[derive(Debug, Clone, Copy, PartialEq)]
struct JpegFrame {
    width: u16,
    height: u16,
    precision: u8,
    components: u8,
    /// An `APP14` "Adobe" segment precedes the frame.
    adobe: bool,
}

/// Walk the marker segments up to the first SOF header.
///
/// The decoder in `image` reports CMYK files as RGB because it converts them,
/// so the component count has to come from the file itself.
fn read_jpeg_frame(bytes: &[u8]) -> Result<JpegFrame, StampError> {
    let invalid = |what: &str| StampError::ImageDecode(format!("invalid JPEG: {what}"));

    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return Err(invalid("missing SOI marker"));
    }

    let mut pos = 2;
    let mut adobe = false;
    loop {
        // Fill bytes may precede a marker.
        while bytes.get(pos) == Some(&0xFF) && bytes.get(pos + 1) == Some(&0xFF) {
            pos += 1;
        }
        let (Some(&0xFF), Some(&marker)) = (bytes.get(pos), bytes.get(pos + 1)) else {
            return Err(invalid("no frame header"));
        };
        pos += 2;

        // Markers without a length field.
        if marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            continue;
        }
        if marker == 0xD9 || marker == 0xDA {
            return Err(invalid("no frame header"));
        }

        let length = match bytes.get(pos..pos + 2) {
            Some(len) => usize::from(u16::from_be_bytes([len[0], len[1]])),
            None => return Err(invalid("truncated segment")),
        };
        let segment = bytes
            .get(pos + 2..pos + length)
            .ok_or_else(|| invalid("truncated segment"))?;

        match marker {
            0xEE if segment.starts_with(b"Adobe") => adobe = true,
            // SOF0..SOF15, minus DHT (C4), JPG (C8) and DAC (CC).
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                if segment.len() < 6 {
                    return Err(invalid("short frame header"));
                }
                return Ok(JpegFrame {
                    precision: segment[0],
                    height: u16::from_be_bytes([segment[1], segment[2]]),
                    width: u16::from_be_bytes([segment[3], segment[4]]),
                    components: segment[5],
                    adobe,
                });
            }
            _ => {}
        }
        pos += length;
    }
}

/// Decoded 8-bit pixels with alpha separated out.
struct DecodedPng {
    width: u32,
    height: u32,
    color_space: &'static str,
    pixels: Vec<u8>,
    alpha: Option<Vec<u8>>,
}

fn decode_png(bytes: &[u8]) -> Result<DecodedPng, StampError> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder
        .read_info()
        .map_err(|e| StampError::ImageDecode(e.to_string()))?;

    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader
        .next_frame(&mut buf)
        .map_err(|e| StampError::ImageDecode(e.to_string()))?;
    buf.truncate(info.buffer_size());

    let (color_space, channels, has_alpha) = match info.color_type {
        png::ColorType::Grayscale => ("DeviceGray", 1, false),
        png::ColorType::GrayscaleAlpha => ("DeviceGray", 2, true),
        png::ColorType::Rgb => ("DeviceRGB", 3, false),
        png::ColorType::Rgba => ("DeviceRGB", 4, true),
        png::ColorType::Indexed => {
            return Err(StampError::ImageDecode(
                "palette was not expanded".to_string(),
            ))
        }
    };

    if !has_alpha {
        return Ok(DecodedPng {
            width: info.width,
            height: info.height,
            color_space,
            pixels: buf,
            alpha: None,
        });
    }

    let color_channels = channels - 1;
    let pixel_count = (info.width as usize) * (info.height as usize);
    let mut pixels = Vec::with_capacity(pixel_count * color_channels);
    let mut alpha = Vec::with_capacity(pixel_count);
    for px in buf.chunks_exact(channels) {
        pixels.extend_from_slice(&px[..color_channels]);
        alpha.push(px[color_channels]);
    }

    // Fully opaque images don't need a mask.
    let alpha = if alpha.iter().all(|a| *a == u8::MAX) {
        None
    } else {
        Some(alpha)
    };

    Ok(DecodedPng {
        width: info.width,
        height: info.height,
        color_space,
        pixels,
        alpha,
    })
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, StampError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| StampError::OperationError(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| StampError::OperationError(e.to_string()))
}

fn embed_png(doc: &mut Document, bytes: &[u8]) -> Result<ObjectId, StampError> {
    let decoded = decode_png(bytes)?;

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => i64::from(decoded.width),
        "Height" => i64::from(decoded.height),
        "ColorSpace" => decoded.color_space,
        "BitsPerComponent" => 8,
        "Filter" => "FlateDecode",
    };

    if let Some(alpha) = &decoded.alpha {
        let mask = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(decoded.width),
                "Height" => i64::from(decoded.height),
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            deflate(alpha)?,
        );
        let mask_id = doc.add_object(mask);
        dict.set("SMask", Object::Reference(mask_id));
    }

    let id = doc.add_object(Stream::new(dict, deflate(&decoded.pixels)?));
    tracing::debug!(
        width = decoded.width,
        height = decoded.height,
        masked = decoded.alpha.is_some(),
        "embedded PNG image"
    );
    Ok(id)
}
