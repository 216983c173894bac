//! Fallback font acquisition and embedding
//!
//! The standard Helvetica face only covers Latin text. When any text element
//! contains a character outside Basic Latin, a TrueType face is fetched from
//! the configured sources (in order) and embedded once into the output as a
//! Type0 / Identity-H composite font with a `ToUnicode` map, so the text stays
//! searchable and copyable.

use std::collections::BTreeMap;
use std::future::Future;
use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use ttf_parser::{name_id, Face, GlyphId};

use crate::config::{FontConfig, FontSource};
use crate::error::{FontFetchError, StampError};
use crate::text_layout::GlyphMetrics;

/// True when `text` contains anything the standard Latin face cannot draw.
pub fn needs_fallback(text: &str) -> bool {
    !text.is_ascii()
}

/// Retrieves raw font bytes from one source.
///
/// Implementations must give up after `timeout_ms` and report
/// [`FontFetchError::Timeout`].
pub trait FontFetcher {
    fn fetch(
        &self,
        source: &FontSource,
        timeout_ms: u32,
    ) -> impl Future<Output = Result<Vec<u8>, FontFetchError>>;
}

/// Try each configured source in order until one yields a usable face.
///
/// Every failed attempt is logged and recorded; if none succeeds the error
/// lists all of them.
pub async fn acquire_fallback_font<F: FontFetcher>(
    config: &FontConfig,
    fetcher: &F,
) -> Result<FallbackFont, StampError> {
    let mut attempts = Vec::with_capacity(config.sources.len());

    for source in &config.sources {
        match fetcher.fetch(source, config.timeout_ms).await {
            Ok(bytes) => match FallbackFont::from_bytes(bytes, &source.url) {
                Ok(font) => {
                    tracing::info!(url = %source.url, name = %font.postscript_name(), "fallback font loaded");
                    return Ok(font);
                }
                Err(e) => {
                    tracing::warn!(url = %source.url, error = %e, "fallback font source unusable");
                    attempts.push(format!("{} ({})", source.url, e));
                }
            },
            Err(e) => {
                tracing::warn!(url = %source.url, error = %e, "fallback font fetch failed");
                attempts.push(e.to_string());
            }
        }
    }

    Err(StampError::FontUnavailable { attempts })
}

/// Face metrics in 1/1000 em, read once at load time.
#[derive(Debug, Clone, PartialEq)]
struct FaceMetrics {
    postscript_name: String,
    units_per_em: u16,
    ascent: i64,
    descent: i64,
    cap_height: i64,
    bbox: [i64; 4],
}

/// A parsed TrueType face ready to be embedded.
#[derive(Debug, Clone)]
pub struct FallbackFont {
    data: Vec<u8>,
    source_url: String,
    metrics: FaceMetrics,
}

impl FallbackFont {
    /// Validate `data` as a TrueType face.
    ///
    /// CFF-flavoured OpenType is refused: CID-keyed CFF fonts do not map CIDs
    /// to glyph ids, which Identity-H encoding depends on.
    pub fn from_bytes(data: Vec<u8>, source_url: &str) -> Result<Self, StampError> {
        let face = Face::parse(&data, 0).map_err(|e| StampError::FontError(e.to_string()))?;

        if face.tables().glyf.is_none() {
            return Err(StampError::FontError(
                "face has no TrueType outlines".to_string(),
            ));
        }
        let upem = face.units_per_em();
        if upem == 0 {
            return Err(StampError::FontError("units per em is zero".to_string()));
        }

        let to_thousandths = |v: i16| i64::from(v) * 1000 / i64::from(upem);
        let bbox = face.global_bounding_box();
        let ascent = to_thousandths(face.ascender());
        let metrics = FaceMetrics {
            postscript_name: postscript_name(&face),
            units_per_em: upem,
            ascent,
            descent: to_thousandths(face.descender()),
            cap_height: face.capital_height().map(to_thousandths).unwrap_or(ascent),
            bbox: [
                to_thousandths(bbox.x_min),
                to_thousandths(bbox.y_min),
                to_thousandths(bbox.x_max),
                to_thousandths(bbox.y_max),
            ],
        };

        Ok(Self {
            data,
            source_url: source_url.to_string(),
            metrics,
        })
    }

    pub fn postscript_name(&self) -> &str {
        &self.metrics.postscript_name
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    fn face(&self) -> Result<Face<'_>, StampError> {
        Face::parse(&self.data, 0).map_err(|e| StampError::FontError(e.to_string()))
    }
}

fn postscript_name(face: &Face<'_>) -> String {
    let raw = face
        .names()
        .into_iter()
        .filter(|name| name.name_id == name_id::POST_SCRIPT_NAME)
        .find_map(|name| name.to_string())
        .unwrap_or_default();
    sanitize_font_name(&raw)
}

/// Reduce a name to characters that are safe in a PDF name object.
fn sanitize_font_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if cleaned.is_empty() {
        "StampFallback".to_string()
    } else {
        cleaned
    }
}

/// Per-document embedding of a [`FallbackFont`].
///
/// The font object id is reserved up front so content streams can refer to it;
/// the objects themselves are written by [`FallbackEmbedding::finish`] once all
/// text has been encoded and the set of used glyphs is known.
pub struct FallbackEmbedding<'a> {
    font: &'a FallbackFont,
    face: Face<'a>,
    font_id: ObjectId,
    /// glyph id -> (advance in 1/1000 em, first character drawn with it)
    used: BTreeMap<u16, (i64, Option<char>)>,
}

impl<'a> FallbackEmbedding<'a> {
    pub fn new(doc: &mut Document, font: &'a FallbackFont) -> Result<Self, StampError> {
        Ok(Self {
            font,
            face: font.face()?,
            font_id: doc.new_object_id(),
            used: BTreeMap::new(),
        })
    }

    pub fn font_id(&self) -> ObjectId {
        self.font_id
    }

    fn glyph(&self, c: char) -> GlyphId {
        self.face.glyph_index(c).unwrap_or(GlyphId(0))
    }

    fn glyph_advance(&self, glyph: GlyphId) -> i64 {
        let advance = self.face.glyph_hor_advance(glyph).unwrap_or(0);
        i64::from(advance) * 1000 / i64::from(self.font.metrics.units_per_em)
    }

    /// Encode `text` as big-endian glyph ids for an Identity-H string.
    pub fn encode(&mut self, text: &str) -> Object {
        let mut bytes = Vec::with_capacity(text.len() * 2);
        for c in text.chars() {
            let glyph = self.glyph(c);
            if glyph.0 == 0 {
                tracing::warn!(character = %c, font = %self.font.postscript_name(), "no glyph in fallback font");
            }
            let advance = self.glyph_advance(glyph);
            self.used
                .entry(glyph.0)
                .or_insert((advance, (glyph.0 != 0).then_some(c)));
            bytes.extend_from_slice(&glyph.0.to_be_bytes());
        }
        Object::String(bytes, StringFormat::Hexadecimal)
    }

    /// Write the font program, descriptor, CID font, ToUnicode map and the
    /// Type0 font at the reserved id.
    pub fn finish(self, doc: &mut Document) -> Result<(), StampError> {
        let metrics = &self.font.metrics;
        let name = metrics.postscript_name.as_bytes().to_vec();

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&self.font.data)
            .map_err(|e| StampError::FontError(e.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|e| StampError::FontError(e.to_string()))?;
        let file_id = doc.add_object(Stream::new(
            dictionary! {
                "Length1" => self.font.data.len() as i64,
                "Filter" => "FlateDecode",
            },
            compressed,
        ));

        let descriptor_id = doc.add_object(dictionary! {
            "Type" => "FontDescriptor",
            "FontName" => Object::Name(name.clone()),
            "Flags" => 4,
            "FontBBox" => metrics.bbox.iter().map(|v| Object::Integer(*v)).collect::<Vec<_>>(),
            "ItalicAngle" => 0,
            "Ascent" => metrics.ascent,
            "Descent" => metrics.descent,
            "CapHeight" => metrics.cap_height,
            "StemV" => 80,
            "FontFile2" => file_id,
        });

        let cid_font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "CIDFontType2",
            "BaseFont" => Object::Name(name.clone()),
            "CIDSystemInfo" => dictionary! {
                "Registry" => Object::string_literal("Adobe"),
                "Ordering" => Object::string_literal("Identity"),
                "Supplement" => 0,
            },
            "FontDescriptor" => descriptor_id,
            "DW" => 1000,
            "W" => width_array(&self.used),
            "CIDToGIDMap" => "Identity",
        });

        let to_unicode_id = doc.add_object(Stream::new(
            Dictionary::new(),
            to_unicode_cmap(&self.used).into_bytes(),
        ));

        let type0: Dictionary = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => Object::Name(name),
            "Encoding" => "Identity-H",
            "DescendantFonts" => vec![Object::Reference(cid_font_id)],
            "ToUnicode" => to_unicode_id,
        };
        doc.objects.insert(self.font_id, Object::Dictionary(type0));

        tracing::debug!(glyphs = self.used.len(), font = %metrics.postscript_name, "embedded fallback font");
        Ok(())
    }
}

impl GlyphMetrics for FallbackEmbedding<'_> {
    fn advance(&self, c: char) -> f64 {
        self.glyph_advance(self.glyph(c)) as f64
    }
}

/// `W` entries of the form `gid [width]`.
fn width_array(used: &BTreeMap<u16, (i64, Option<char>)>) -> Vec<Object> {
    let mut widths = Vec::with_capacity(used.len() * 2);
    for (gid, (advance, _)) in used {
        widths.push(Object::Integer(i64::from(*gid)));
        widths.push(Object::Array(vec![Object::Integer(*advance)]));
    }
    widths
}

fn to_unicode_cmap(used: &BTreeMap<u16, (i64, Option<char>)>) -> String {
    let mappings: Vec<(u16, char)> = used
        .iter()
        .filter_map(|(gid, (_, c))| c.map(|c| (*gid, c)))
        .collect();

    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n\
         /CMapType 2 def\n\
         1 begincodespacerange\n\
         <0000> <FFFF>\n\
         endcodespacerange\n",
    );

    // At most 100 entries per bfchar block.
    for chunk in mappings.chunks(100) {
        cmap.push_str(&format!("{} beginbfchar\n", chunk.len()));
        for (gid, c) in chunk {
            let mut units = [0u16; 2];
            let utf16: String = c
                .encode_utf16(&mut units)
                .iter()
                .map(|u| format!("{u:04X}"))
                .collect();
            cmap.push_str(&format!("<{gid:04X}> <{utf16}>\n"));
        }
        cmap.push_str("endbfchar\n");
    }

    cmap.push_str(
        "endcmap\n\
         CMapName currentdict /CMap defineresource pop\n\
         end\n\
         end\n",
    );
    cmap
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    /// DejaVu Sans Mono: TrueType outlines, covers Greek and Cyrillic.
    pub(crate) const TRUETYPE_FACE: &[u8] = include_bytes!("../tests/fixtures/DejaVuSansMono.ttf");

    /// An OpenType face with CFF outlines: the required tables plus a bare
    /// `CFF ` header.
    pub(crate) fn cff_face() -> Vec<u8> {
        let mut head = vec![0u8; 54];
        head[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes());
        head[12..16].copy_from_slice(&0x5F0F_3CF5u32.to_be_bytes());
        head[18..20].copy_from_slice(&1000u16.to_be_bytes());

        let mut hhea = vec![0u8; 36];
        hhea[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes());
        hhea[4..6].copy_from_slice(&800i16.to_be_bytes());
        hhea[6..8].copy_from_slice(&(-200i16).to_be_bytes());
        hhea[34..36].copy_from_slice(&1u16.to_be_bytes());

        let mut maxp = 0x0000_5000u32.to_be_bytes().to_vec();
        maxp.extend_from_slice(&1u16.to_be_bytes());

        // Table records must be sorted by tag.
        let tables: [(&[u8; 4], Vec<u8>); 4] = [
            (b"CFF ", vec![1, 0, 4, 1]),
            (b"head", head),
            (b"hhea", hhea),
            (b"maxp", maxp),
        ];
        let directory_len = 12 + 16 * tables.len();

        let mut out = b"OTTO".to_vec();
        out.extend_from_slice(&(tables.len() as u16).to_be_bytes());
        out.extend_from_slice(&[0; 6]);
        let mut data = Vec::new();
        for (tag, table) in &tables {
            out.extend_from_slice(*tag);
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&((directory_len + data.len()) as u32).to_be_bytes());
            out.extend_from_slice(&(table.len() as u32).to_be_bytes());
            data.extend_from_slice(table);
            while data.len() % 4 != 0 {
                data.push(0);
            }
        }
        out.extend(data);
        out
    }

    /// Serves canned responses per URL and records the order of requests.
    #[derive(Default)]
    struct MockFetcher {
        responses: BTreeMap<String, Result<Vec<u8>, FontFetchError>>,
        requested: RefCell<Vec<String>>,
    }

    impl FontFetcher for MockFetcher {
        async fn fetch(&self, source: &FontSource, _timeout_ms: u32) -> Result<Vec<u8>, FontFetchError> {
            self.requested.borrow_mut().push(source.url.clone());
            self.responses
                .get(&source.url)
                .cloned()
                .unwrap_or_else(|| {
                    Err(FontFetchError::Status {
                        url: source.url.clone(),
                        status: 404,
                    })
                })
        }
    }

    fn config(urls: &[&str]) -> FontConfig {
        FontConfig {
            sources: urls.iter().map(|u| FontSource::new(*u)).collect(),
            timeout_ms: 50,
        }
    }

    #[test]
    fn test_needs_fallback() {
        assert!(!needs_fallback("Hello, world! 123"));
        assert!(!needs_fallback(""));
        assert!(needs_fallback("合計"));
        assert!(needs_fallback("café"));
    }

    #[test]
    fn test_all_sources_failing_reports_every_attempt() {
        let mut fetcher = MockFetcher::default();
        fetcher.responses.insert(
            "/fonts/a.ttf".to_string(),
            Err(FontFetchError::Timeout {
                url: "/fonts/a.ttf".to_string(),
                timeout_ms: 50,
            }),
        );
        let cfg = config(&["/fonts/a.ttf", "https://cdn.example/b.ttf"]);

        let err = futures::executor::block_on(acquire_fallback_font(&cfg, &fetcher)).unwrap_err();

        assert_eq!(
            *fetcher.requested.borrow(),
            vec!["/fonts/a.ttf".to_string(), "https://cdn.example/b.ttf".to_string()]
        );
        match err {
            StampError::FontUnavailable { attempts } => {
                assert_eq!(attempts.len(), 2);
                assert!(attempts[0].contains("timed out"));
                assert!(attempts[1].contains("404"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unparseable_bytes_count_as_failed_attempt() {
        let mut fetcher = MockFetcher::default();
        fetcher
            .responses
            .insert("/fonts/a.ttf".to_string(), Ok(b"<html>not a font</html>".to_vec()));
        let cfg = config(&["/fonts/a.ttf"]);

        let err = futures::executor::block_on(acquire_fallback_font(&cfg, &fetcher)).unwrap_err();
        match err {
            StampError::FontUnavailable { attempts } => {
                assert_eq!(attempts.len(), 1);
                assert!(attempts[0].starts_with("/fonts/a.ttf ("));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_source_list_fails_without_fetching() {
        let fetcher = MockFetcher::default();
        let err = futures::executor::block_on(acquire_fallback_font(&config(&[]), &fetcher)).unwrap_err();
        assert!(matches!(err, StampError::FontUnavailable { attempts } if attempts.is_empty()));
        assert!(fetcher.requested.borrow().is_empty());
    }

    #[test]
    fn test_sanitize_font_name() {
        assert_eq!(sanitize_font_name("NotoSansJP-Regular"), "NotoSansJP-Regular");
        assert_eq!(sanitize_font_name("Noto Sans (JP)"), "NotoSansJP");
        assert_eq!(sanitize_font_name(""), "StampFallback");
    }

    #[test]
    fn test_width_array_layout() {
        let mut used = BTreeMap::new();
        used.insert(36u16, (600i64, Some('A')));
        used.insert(3u16, (250i64, Some(' ')));
        assert_eq!(
            width_array(&used),
            vec![
                Object::Integer(3),
                Object::Array(vec![Object::Integer(250)]),
                Object::Integer(36),
                Object::Array(vec![Object::Integer(600)]),
            ]
        );
    }

    #[test]
    fn test_to_unicode_maps_glyphs_and_chunks() {
        let mut used = BTreeMap::new();
        used.insert(0u16, (0i64, None));
        for gid in 1..=150u16 {
            used.insert(gid, (1000, char::from_u32(0x4E00 + u32::from(gid))));
        }
        used.insert(200u16, (1000, Some('😀')));

        let cmap = to_unicode_cmap(&used);
        assert!(cmap.contains("100 beginbfchar"));
        assert!(cmap.contains("51 beginbfchar"));
        assert!(cmap.contains("<0001> <4E01>"));
        assert!(cmap.contains("<00C8> <D83DDE00>"));
        // Only the codespace range mentions glyph 0; .notdef gets no mapping.
        assert_eq!(cmap.matches("<0000> ").count(), 1);
    }

    #[test]
    fn test_truetype_face_loads() {
        let font = FallbackFont::from_bytes(TRUETYPE_FACE.to_vec(), "/fonts/mono.ttf").unwrap();
        assert_eq!(font.postscript_name(), "DejaVuSansMono");
        assert_eq!(font.source_url(), "/fonts/mono.ttf");
        assert_eq!(font.metrics.units_per_em, 2048);
        assert!(font.metrics.ascent > 0 && font.metrics.descent < 0);
    }

    #[test]
    fn test_cff_face_is_refused() {
        let err = FallbackFont::from_bytes(cff_face(), "/fonts/cff.otf").unwrap_err();
        assert!(matches!(err, StampError::FontError(ref msg) if msg.contains("TrueType outlines")));
    }

    #[test]
    fn test_cff_source_is_skipped_for_next_source() {
        let mut fetcher = MockFetcher::default();
        fetcher.responses.insert("/fonts/cff.otf".to_string(), Ok(cff_face()));
        fetcher
            .responses
            .insert("https://cdn.example/mono.ttf".to_string(), Ok(TRUETYPE_FACE.to_vec()));
        let cfg = config(&["/fonts/cff.otf", "https://cdn.example/mono.ttf"]);

        let font = futures::executor::block_on(acquire_fallback_font(&cfg, &fetcher)).unwrap();
        assert_eq!(font.source_url(), "https://cdn.example/mono.ttf");
        assert_eq!(fetcher.requested.borrow().len(), 2);
    }

    #[test]
    fn test_embedding_encodes_glyph_ids_and_writes_font_once() {
        let font = FallbackFont::from_bytes(TRUETYPE_FACE.to_vec(), "/fonts/mono.ttf").unwrap();
        let mut doc = Document::with_version("1.7");
        let mut embedding = FallbackEmbedding::new(&mut doc, &font).unwrap();
        let font_id = embedding.font_id();

        // Σ -> 753, ο -> 781
        assert_eq!(
            embedding.encode("Σο"),
            Object::String(vec![0x02, 0xF1, 0x03, 0x0D], StringFormat::Hexadecimal)
        );
        embedding.encode("οΣ");
        assert_eq!(embedding.advance('Σ'), 602.0);
        embedding.finish(&mut doc).unwrap();

        let type0 = doc.get_dictionary(font_id).unwrap();
        assert_eq!(type0.get(b"Subtype").unwrap().as_name().unwrap(), b"Type0");
        assert_eq!(type0.get(b"Encoding").unwrap().as_name().unwrap(), b"Identity-H");

        let descendants = type0.get(b"DescendantFonts").unwrap().as_array().unwrap();
        let cid_font = doc.get_dictionary(descendants[0].as_reference().unwrap()).unwrap();
        assert_eq!(cid_font.get(b"Subtype").unwrap().as_name().unwrap(), b"CIDFontType2");
        assert_eq!(
            cid_font.get(b"W").unwrap().as_array().unwrap(),
            &vec![
                Object::Integer(753),
                Object::Array(vec![Object::Integer(602)]),
                Object::Integer(781),
                Object::Array(vec![Object::Integer(602)]),
            ]
        );

        let to_unicode = type0.get(b"ToUnicode").unwrap().as_reference().unwrap();
        match doc.get_object(to_unicode).unwrap() {
            Object::Stream(stream) => {
                let cmap = String::from_utf8(stream.content.clone()).unwrap();
                assert!(cmap.contains("<02F1> <03A3>"));
                assert!(cmap.contains("<030D> <03BF>"));
            }
            other => panic!("expected stream, got {other:?}"),
        }
    }
}
