//! crates/storyforge_core/src/layout.rs
//!
//! Physical page geometry for print, the page sequence of the interior
//! document, and text fitting against real glyph advances.
//!
//! Lengths are kept in thousandths of an inch so pixel sizes come out exact.

use crate::domain::{Book, Page};
use uuid::Uuid;

pub const DPI: u32 = 300;
pub const TRIM_MILS: u32 = 8_500;
pub const BLEED_MILS: u32 = 125;

/// One interior page including bleed on both edges: 8.75in.
pub const PAGE_MILS: u32 = TRIM_MILS + 2 * BLEED_MILS;
/// Saddle-stitch cover: back and front trim side by side, bleed outside, no spine.
pub const COVER_WIDTH_MILS: u32 = 2 * TRIM_MILS + 2 * BLEED_MILS;
pub const COVER_HEIGHT_MILS: u32 = PAGE_MILS;

pub const POINTS_PER_INCH: f32 = 72.0;
pub const MM_PER_INCH: f32 = 25.4;

pub fn mils_to_px(mils: u32) -> u32 {
    mils * DPI / 1_000
}

pub fn mils_to_mm(mils: u32) -> f32 {
    mils as f32 / 1_000.0 * MM_PER_INCH
}

pub fn mils_to_pt(mils: u32) -> f32 {
    mils as f32 / 1_000.0 * POINTS_PER_INCH
}

/// Pixel canvas of one interior page (2625 x 2625 at 300 DPI).
pub fn page_canvas_px() -> (u32, u32) {
    (mils_to_px(PAGE_MILS), mils_to_px(PAGE_MILS))
}

/// Pixel canvas of the cover spread (5175 x 2625 at 300 DPI).
pub fn cover_canvas_px() -> (u32, u32) {
    (mils_to_px(COVER_WIDTH_MILS), mils_to_px(COVER_HEIGHT_MILS))
}

//=========================================================================================
// Interior Sequence
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteriorSheet {
    /// A full-bleed illustration. `image_url` is `None` when a page has no image at all.
    Illustration {
        page_id: Uuid,
        image_url: Option<String>,
    },
    /// A text page with the story text centered.
    Text { page_id: Uuid, text: String },
}

/// Title page becomes one illustration; every other page becomes a text
/// page followed by its illustration.
pub fn plan_interior(pages: &[Page]) -> Vec<InteriorSheet> {
    let mut ordered: Vec<&Page> = pages.iter().collect();
    ordered.sort_by_key(|p| p.index);

    let mut sheets = Vec::with_capacity(ordered.len() * 2);
    for page in ordered {
        let illustration = InteriorSheet::Illustration {
            page_id: page.id,
            image_url: page.display_image_url().map(str::to_string),
        };
        if !page.is_title_page {
            sheets.push(InteriorSheet::Text {
                page_id: page.id,
                text: page.text.clone().unwrap_or_default(),
            });
        }
        sheets.push(illustration);
    }
    sheets
}

pub fn interior_page_count(pages: &[Page]) -> u32 {
    let story = pages.iter().filter(|p| !p.is_title_page).count() as u32;
    let title = pages.iter().filter(|p| p.is_title_page).count() as u32;
    title + 2 * story
}

/// What goes on the two panels of the cover spread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverSpread {
    pub title: String,
    pub front_image_url: Option<String>,
    pub back_brand_line: String,
}

pub const BRAND_LINE: &str = "Made with love at Storyforge";

pub fn plan_cover(book: &Book, pages: &[Page]) -> CoverSpread {
    let front_image_url = pages
        .iter()
        .find(|p| p.is_title_page)
        .and_then(|p| p.display_image_url())
        .map(str::to_string);
    CoverSpread {
        title: book.title.clone(),
        front_image_url,
        back_brand_line: BRAND_LINE.to_string(),
    }
}

/// Every distinct image URL the documents embed, in first-use order.
pub fn referenced_images(pages: &[Page]) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for sheet in plan_interior(pages) {
        if let InteriorSheet::Illustration {
            image_url: Some(url),
            ..
        } = sheet
        {
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
    }
    urls
}

//=========================================================================================
// Text Fitting
//=========================================================================================

/// Horizontal advance of glyphs in a concrete font.
pub trait GlyphMetrics {
    /// Advance width of `c` in points at `size` points.
    fn advance(&self, c: char, size: f32) -> f32;

    fn text_width(&self, text: &str, size: f32) -> f32 {
        text.chars().map(|c| self.advance(c, size)).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FittedText {
    pub font_size: f32,
    pub line_height: f32,
    pub lines: Vec<String>,
}

impl FittedText {
    pub fn block_height(&self) -> f32 {
        self.line_height * self.lines.len() as f32
    }
}

pub const MAX_FONT_PT: f32 = 40.0;
pub const MIN_FONT_PT: f32 = 12.0;
pub const LINE_SPACING: f32 = 1.35;

/// Greedy word wrap at `size`. Words wider than the box are broken by character.
pub fn wrap_text(text: &str, metrics: &dyn GlyphMetrics, size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if line.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", line, word)
            };
            if metrics.text_width(&candidate, size) <= max_width {
                line = candidate;
                continue;
            }
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            if metrics.text_width(word, size) <= max_width {
                line = word.to_string();
            } else {
                for c in word.chars() {
                    let mut next = line.clone();
                    next.push(c);
                    if !line.is_empty() && metrics.text_width(&next, size) > max_width {
                        lines.push(std::mem::take(&mut line));
                        line.push(c);
                    } else {
                        line = next;
                    }
                }
            }
        }
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}

/// Picks the largest font size (in half-point steps) whose wrapped text fits
/// the box; falls back to the minimum size when nothing fits.
pub fn fit_text(
    text: &str,
    metrics: &dyn GlyphMetrics,
    max_width: f32,
    max_height: f32,
) -> FittedText {
    let mut size = MAX_FONT_PT;
    while size >= MIN_FONT_PT {
        let lines = wrap_text(text, metrics, size, max_width);
        let line_height = size * LINE_SPACING;
        if line_height * lines.len() as f32 <= max_height {
            return FittedText {
                font_size: size,
                line_height,
                lines,
            };
        }
        size -= 0.5;
    }
    FittedText {
        font_size: MIN_FONT_PT,
        line_height: MIN_FONT_PT * LINE_SPACING,
        lines: wrap_text(text, metrics, MIN_FONT_PT, max_width),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seeded_book, FixedAdvance};

    #[test]
    fn page_canvas_is_exact() {
        assert_eq!(PAGE_MILS, 8_750);
        assert_eq!(page_canvas_px(), (2625, 2625));
        assert_eq!(COVER_WIDTH_MILS, 17_250);
        assert_eq!(cover_canvas_px(), (5175, 2625));
    }

    #[test]
    fn interior_has_title_then_text_illustration_pairs() {
        let (_, pages) = seeded_book(8);
        let sheets = plan_interior(&pages);
        assert_eq!(sheets.len(), 15);
        assert_eq!(interior_page_count(&pages), 15);
        assert!(matches!(sheets[0], InteriorSheet::Illustration { .. }));
        for pair in sheets[1..].chunks(2) {
            assert!(matches!(pair[0], InteriorSheet::Text { .. }));
            assert!(matches!(pair[1], InteriorSheet::Illustration { .. }));
        }
    }

    #[test]
    fn interior_follows_index_not_storage_order() {
        let (_, mut pages) = seeded_book(3);
        pages.reverse();
        let sheets = plan_interior(&pages);
        let first_id = match &sheets[0] {
            InteriorSheet::Illustration { page_id, .. } => *page_id,
            other => panic!("unexpected first sheet {:?}", other),
        };
        assert_eq!(first_id, pages[2].id);
    }

    #[test]
    fn wrap_breaks_on_measured_width() {
        // 10pt per glyph at size 10.
        let metrics = FixedAdvance(1.0);
        let lines = wrap_text("aaa bbb ccc", &metrics, 10.0, 70.0);
        assert_eq!(lines, vec!["aaa bbb".to_string(), "ccc".to_string()]);
    }

    #[test]
    fn wrap_splits_overlong_words() {
        let metrics = FixedAdvance(1.0);
        let lines = wrap_text("abcdefgh", &metrics, 10.0, 30.0);
        assert_eq!(lines, vec!["abc", "def", "gh"]);
    }

    #[test]
    fn fit_shrinks_until_text_fits() {
        let metrics = FixedAdvance(0.5);
        let text = "Once upon a time a small fox found a shiny red kite in the meadow.";
        let fitted = fit_text(text, &metrics, 300.0, 120.0);
        assert!(fitted.font_size < MAX_FONT_PT);
        assert!(fitted.block_height() <= 120.0);
        for line in &fitted.lines {
            assert!(metrics.text_width(line, fitted.font_size) <= 300.0);
        }
    }
}
