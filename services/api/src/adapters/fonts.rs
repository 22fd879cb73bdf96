//! services/api/src/adapters/fonts.rs
//!
//! Glyph advances for the fonts the renderer can set text in: the PDF
//! built-in Helvetica (standard AFM widths) or a TrueType file loaded at
//! startup.

use ab_glyph::{Font, FontVec};
use std::path::Path;
use std::sync::Arc;
use storyforge_core::layout::GlyphMetrics;
use storyforge_core::ports::{PortError, PortResult};

/// Helvetica advance widths per 1000 em for ASCII 32..=126.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0..9
    278, 278, 584, 584, 584, 556, 1015, // :..@
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // A..M
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // N..Z
    278, 278, 278, 469, 556, 333, // [..`
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // a..m
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // n..z
    334, 260, 334, 584, // {..~
];

const HELVETICA_DEFAULT_WIDTH: u16 = 556;

#[derive(Debug, Clone, Copy, Default)]
pub struct HelveticaMetrics;

impl GlyphMetrics for HelveticaMetrics {
    fn advance(&self, c: char, size: f32) -> f32 {
        let code = c as u32;
        let width = if (32..=126).contains(&code) {
            HELVETICA_WIDTHS[(code - 32) as usize]
        } else {
            HELVETICA_DEFAULT_WIDTH
        };
        width as f32 / 1000.0 * size
    }
}

/// Maps typographic punctuation onto the ASCII the built-in font encodes;
/// anything outside Latin-1 becomes `?`.
pub fn builtin_safe(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => '\'',
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' => '"',
            '\u{2013}' | '\u{2014}' | '\u{2212}' => '-',
            '\u{2026}' => '.',
            '\u{00A0}' => ' ',
            c if (c as u32) < 0x100 => c,
            _ => '?',
        })
        .collect()
}

/// Advances measured from a TrueType font's horizontal metrics.
#[derive(Clone)]
pub struct TtfMetrics {
    font: Arc<FontVec>,
    units_per_em: f32,
}

impl TtfMetrics {
    pub fn from_bytes(bytes: Vec<u8>) -> PortResult<Self> {
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| PortError::Validation(format!("unreadable font: {}", e)))?;
        let units_per_em = font.units_per_em().unwrap_or(1000.0);
        Ok(Self {
            font: Arc::new(font),
            units_per_em,
        })
    }
}

impl GlyphMetrics for TtfMetrics {
    fn advance(&self, c: char, size: f32) -> f32 {
        let id = self.font.glyph_id(c);
        self.font.h_advance_unscaled(id) / self.units_per_em * size
    }
}

/// The face used for story text and the cover title.
#[derive(Clone)]
pub enum TextFace {
    Helvetica,
    Embedded { bytes: Arc<Vec<u8>>, metrics: TtfMetrics },
}

impl TextFace {
    pub fn load(path: Option<&Path>) -> PortResult<Self> {
        let Some(path) = path else {
            return Ok(Self::Helvetica);
        };
        let bytes = std::fs::read(path).map_err(|e| {
            PortError::Validation(format!("cannot read font {}: {}", path.display(), e))
        })?;
        let metrics = TtfMetrics::from_bytes(bytes.clone())?;
        Ok(Self::Embedded {
            bytes: Arc::new(bytes),
            metrics,
        })
    }

    pub fn metrics(&self) -> &dyn GlyphMetrics {
        match self {
            Self::Helvetica => &HelveticaMetrics,
            Self::Embedded { metrics, .. } => metrics,
        }
    }

    /// Text as it will actually be drawn with this face.
    pub fn prepare(&self, text: &str) -> String {
        match self {
            Self::Helvetica => builtin_safe(text),
            Self::Embedded { .. } => text.to_string(),
        }
    }
}
