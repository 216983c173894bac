//! Line breaking for flattened text boxes

/// Advance widths in 1/1000 em.
pub trait GlyphMetrics {
    fn advance(&self, c: char) -> f64;

    /// Width of `text` at `font_size` points.
    fn string_width(&self, text: &str, font_size: f64) -> f64 {
        text.chars().map(|c| self.advance(c)).sum::<f64>() * font_size / 1000.0
    }
}

/// Line advance as a multiple of the font size.
pub const LINE_HEIGHT_FACTOR: f64 = 1.2;

/// Standard Helvetica, printable ASCII (from the Adobe core font metrics).
#[derive(Debug, Clone, Copy, Default)]
pub struct Helvetica;

const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // '0'..'9'
    278, 278, 584, 584, 584, 556, 1015, // ':'..'@'
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // 'A'..'M'
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // 'N'..'Z'
    278, 278, 278, 469, 556, 333, // '['..'`'
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // 'a'..'m'
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // 'n'..'z'
    334, 260, 334, 584, // '{'..'~'
];

impl GlyphMetrics for Helvetica {
    fn advance(&self, c: char) -> f64 {
        let code = c as u32;
        if (32..=126).contains(&code) {
            f64::from(HELVETICA_WIDTHS[(code - 32) as usize])
        } else {
            556.0
        }
    }
}

/// Break `text` into lines no wider than `max_width` points.
///
/// Explicit newlines always break. Within a paragraph, words are packed
/// greedily; a word wider than the box (including unspaced CJK runs) is split
/// at character boundaries. Never returns an empty vector.
pub fn wrap_lines(text: &str, max_width: f64, font_size: f64, metrics: &dyn GlyphMetrics) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        wrap_paragraph(paragraph.trim_end_matches('\r'), max_width, font_size, metrics, &mut lines);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

fn wrap_paragraph(
    paragraph: &str,
    max_width: f64,
    font_size: f64,
    metrics: &dyn GlyphMetrics,
    lines: &mut Vec<String>,
) {
    let space_width = metrics.string_width(" ", font_size);
    let mut current = String::new();
    let mut current_width = 0.0;

    for word in paragraph.split_whitespace() {
        let word_width = metrics.string_width(word, font_size);

        if word_width > max_width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let mut chunk = String::new();
            let mut chunk_width = 0.0;
            for c in word.chars() {
                let char_width = metrics.advance(c) * font_size / 1000.0;
                if chunk_width + char_width > max_width && !chunk.is_empty() {
                    lines.push(std::mem::take(&mut chunk));
                    chunk_width = 0.0;
                }
                chunk.push(c);
                chunk_width += char_width;
            }
            current = chunk;
            current_width = chunk_width;
            continue;
        }

        if current.is_empty() {
            current = word.to_string();
            current_width = word_width;
        } else if current_width + space_width + word_width <= max_width {
            current.push(' ');
            current.push_str(word);
            current_width += space_width + word_width;
        } else {
            lines.push(std::mem::replace(&mut current, word.to_string()));
            current_width = word_width;
        }
    }

    lines.push(current);
}
