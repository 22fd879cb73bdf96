//! services/api/src/adapters/renderer.rs
//!
//! Print-ready PDF rendering with `printpdf`. Every image a document embeds is
//! fetched concurrently and decoded onto its exact pixel canvas before the
//! first page is laid out. Output is pinned (document id, dates, trailer id)
//! so identical inputs always produce identical bytes.

use crate::adapters::fonts::TextFace;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::try_join_all;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb as Pixel, RgbImage};
use printpdf::{
    BuiltinFont, Color, CustomPdfConformance, Image, ImageTransform, IndirectFontRef, Mm,
    OffsetDateTime, PdfConformance, PdfDocument, PdfDocumentReference, PdfLayerReference, Pt, Rgb,
};
use std::collections::HashMap;
use std::sync::Arc;
use storyforge_core::domain::{Book, Page};
use storyforge_core::layout::{
    cover_canvas_px, fit_text, mils_to_mm, mils_to_pt, page_canvas_px, plan_cover, plan_interior,
    referenced_images, InteriorSheet, BLEED_MILS, COVER_HEIGHT_MILS, COVER_WIDTH_MILS, DPI,
    PAGE_MILS, POINTS_PER_INCH,
};
use storyforge_core::ports::{AssetStore, PageRenderer, PortError, PortResult};
use tracing::debug;
use uuid::Uuid;

/// Distance from the page edge to the text box: bleed plus a 0.75in safe area.
const TEXT_INSET_MILS: u32 = BLEED_MILS + 750;
/// Height of the title band at the top of the front cover.
const TITLE_BAND_MILS: u32 = 1_900;
const TITLE_MAX_HEIGHT_MILS: u32 = 1_300;
const BRAND_LINE_PT: f32 = 14.0;

const COVER_BACKGROUND: [u8; 3] = [250, 246, 238];
const TITLE_BAND: [u8; 3] = [255, 255, 255];

fn render_error(e: impl std::fmt::Display) -> PortError {
    PortError::Unexpected(format!("pdf rendering failed: {}", e))
}

fn px_to_pt(px: u32) -> f32 {
    px as f32 / DPI as f32 * POINTS_PER_INCH
}

//=========================================================================================
// Image Preparation
//=========================================================================================

/// Decodes and crops an image to cover exactly `width` x `height` pixels.
pub fn prepare_image(bytes: &[u8], width: u32, height: u32) -> PortResult<DynamicImage> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| PortError::Unexpected(format!("undecodable image: {}", e)))?;
    let filled = decoded.resize_to_fill(width, height, FilterType::CatmullRom);
    Ok(DynamicImage::ImageRgb8(filled.to_rgb8()))
}

/// Back panel in a flat color, front panel covered by the title-page image,
/// and a light band across the top of the front for the title.
pub fn compose_cover(front: Option<&DynamicImage>) -> RgbImage {
    let (width, height) = cover_canvas_px();
    let back_width = width / 2;
    let front_width = width - back_width;
    let mut canvas = RgbImage::from_pixel(width, height, Pixel(COVER_BACKGROUND));
    if let Some(front) = front {
        imageops::overlay(&mut canvas, &front.to_rgb8(), back_width as i64, 0);
    }
    let band_height = TITLE_BAND_MILS * DPI / 1_000;
    let band = RgbImage::from_pixel(front_width, band_height, Pixel(TITLE_BAND));
    imageops::overlay(&mut canvas, &band, back_width as i64, 0);
    canvas
}

//=========================================================================================
// Document Assembly
//=========================================================================================

fn pinned_document(title: &str, width: Mm, height: Mm, document_id: &str) -> (PdfDocumentReference, PdfLayerReference) {
    let (doc, page, layer) = PdfDocument::new(title, width, height, "Layer 1");
    let doc = doc
        .with_document_id(document_id.to_string())
        .with_creation_date(OffsetDateTime::UNIX_EPOCH)
        .with_mod_date(OffsetDateTime::UNIX_EPOCH)
        .with_metadata_date(OffsetDateTime::UNIX_EPOCH)
        .with_conformance(PdfConformance::Custom(CustomPdfConformance {
            requires_xmp_metadata: false,
            ..Default::default()
        }));
    let layer = doc.get_page(page).get_layer(layer);
    (doc, layer)
}

fn add_face(doc: &PdfDocumentReference, face: &TextFace) -> PortResult<IndirectFontRef> {
    match face {
        TextFace::Helvetica => doc.add_builtin_font(BuiltinFont::Helvetica).map_err(render_error),
        TextFace::Embedded { bytes, .. } => doc
            .add_external_font(bytes.as_slice())
            .map_err(render_error),
    }
}

/// Replaces the random file identifiers in the trailer with ones derived
/// from `seed`, keeping every byte offset unchanged.
pub fn pin_trailer_id(pdf: &mut [u8], seed: Uuid) {
    let Some(start) = find_last(pdf, b"/ID") else {
        return;
    };
    let Some(open) = pdf[start..].iter().position(|b| *b == b'[').map(|i| start + i) else {
        return;
    };
    let Some(close) = pdf[open..].iter().position(|b| *b == b']').map(|i| open + i) else {
        return;
    };
    let seed = seed.simple().to_string().into_bytes();
    let mut n = 0;
    let mut inside = false;
    for byte in &mut pdf[open + 1..close] {
        match *byte {
            b'<' | b'(' => inside = true,
            b'>' | b')' => inside = false,
            _ if inside && byte.is_ascii_alphanumeric() => {
                *byte = seed[n % seed.len()];
                n += 1;
            }
            _ => {}
        }
    }
}

fn find_last(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

fn finish(doc: PdfDocumentReference, seed: Uuid) -> PortResult<Vec<u8>> {
    let mut bytes = doc.save_to_bytes().map_err(render_error)?;
    pin_trailer_id(&mut bytes, seed);
    Ok(bytes)
}

/// Places a canvas-sized image at the page origin at print resolution.
fn place_full_bleed(image: &DynamicImage, layer: PdfLayerReference) {
    Image::from_dynamic_image(image).add_to_layer(
        layer,
        ImageTransform {
            translate_x: Some(Mm(0.0)),
            translate_y: Some(Mm(0.0)),
            dpi: Some(DPI as f32),
            ..Default::default()
        },
    );
}

/// A rectangle in points, origin at the bottom-left of the page.
#[derive(Debug, Clone, Copy)]
struct TextBox {
    left: f32,
    bottom: f32,
    width: f32,
    height: f32,
}

/// Fits `text` into the box and draws it centered line by line.
fn draw_centered_text(
    layer: &PdfLayerReference,
    font: &IndirectFontRef,
    face: &TextFace,
    text: &str,
    area: TextBox,
) {
    let text = face.prepare(text);
    let fitted = fit_text(&text, face.metrics(), area.width, area.height);
    let top = area.bottom + area.height / 2.0 + fitted.block_height() / 2.0;
    layer.set_fill_color(Color::Rgb(Rgb::new(0.13, 0.13, 0.18, None)));
    for (i, line) in fitted.lines.iter().enumerate() {
        let line_width = face.metrics().text_width(line, fitted.font_size);
        let x = area.left + (area.width - line_width) / 2.0;
        let baseline = top - fitted.line_height * i as f32 - fitted.font_size;
        layer.use_text(line.clone(), fitted.font_size, Pt(x).into(), Pt(baseline).into(), font);
    }
}

/// A finished document and the number of pages it holds.
pub struct RenderedPdf {
    pub bytes: Vec<u8>,
    pub page_count: usize,
}

pub fn build_interior(
    book: &Book,
    sheets: &[InteriorSheet],
    images: &HashMap<String, DynamicImage>,
    face: &TextFace,
) -> PortResult<RenderedPdf> {
    if sheets.is_empty() {
        return Err(PortError::Validation(format!("book {} has no pages to print", book.id)));
    }
    let side = Mm(mils_to_mm(PAGE_MILS));
    let (doc, first_layer) = pinned_document(&book.title, side, side, &book.id.simple().to_string());
    let font = add_face(&doc, face)?;

    let side_pt = mils_to_pt(PAGE_MILS);
    let inset = mils_to_pt(TEXT_INSET_MILS);
    let text_area = TextBox {
        left: inset,
        bottom: inset,
        width: side_pt - 2.0 * inset,
        height: side_pt - 2.0 * inset,
    };

    let mut first = Some(first_layer);
    for sheet in sheets {
        let layer = match first.take() {
            Some(layer) => layer,
            None => {
                let (page, layer) = doc.add_page(side, side, "Layer 1");
                doc.get_page(page).get_layer(layer)
            }
        };
        match sheet {
            InteriorSheet::Illustration { image_url: Some(url), page_id } => {
                let image = images.get(url).ok_or_else(|| {
                    PortError::Unexpected(format!("image for page {} was not prefetched", page_id))
                })?;
                place_full_bleed(image, layer);
            }
            InteriorSheet::Illustration { image_url: None, .. } => {}
            InteriorSheet::Text { text, .. } => {
                draw_centered_text(&layer, &font, face, text, text_area);
            }
        }
    }

    Ok(RenderedPdf {
        bytes: finish(doc, book.id)?,
        page_count: sheets.len(),
    })
}

pub fn build_cover(book: &Book, pages: &[Page], front: Option<&DynamicImage>, face: &TextFace) -> PortResult<RenderedPdf> {
    let spread = plan_cover(book, pages);
    let width = Mm(mils_to_mm(COVER_WIDTH_MILS));
    let height = Mm(mils_to_mm(COVER_HEIGHT_MILS));
    let document_id = format!("{}c", book.id.simple());
    let (doc, layer) = pinned_document(&spread.title, width, height, &document_id);
    let font = add_face(&doc, face)?;

    let canvas = DynamicImage::ImageRgb8(compose_cover(front));
    place_full_bleed(&canvas, layer.clone());

    let (canvas_w, canvas_h) = cover_canvas_px();
    let back_w = px_to_pt(canvas_w / 2);
    let front_w = px_to_pt(canvas_w - canvas_w / 2);
    let page_h = px_to_pt(canvas_h);
    let inset = mils_to_pt(TEXT_INSET_MILS);
    let band = mils_to_pt(TITLE_BAND_MILS);

    draw_centered_text(
        &layer,
        &font,
        face,
        &spread.title,
        TextBox {
            left: back_w + inset,
            bottom: page_h - band + (band - mils_to_pt(TITLE_MAX_HEIGHT_MILS)) / 2.0,
            width: front_w - 2.0 * inset,
            height: mils_to_pt(TITLE_MAX_HEIGHT_MILS),
        },
    );

    let brand = face.prepare(&spread.back_brand_line);
    let brand_w = face.metrics().text_width(&brand, BRAND_LINE_PT);
    layer.use_text(
        brand,
        BRAND_LINE_PT,
        Pt((back_w - brand_w) / 2.0).into(),
        Pt(inset).into(),
        &font,
    );

    Ok(RenderedPdf {
        bytes: finish(doc, book.id)?,
        page_count: 1,
    })
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct PdfRenderer {
    assets: Arc<dyn AssetStore>,
    face: TextFace,
}

impl PdfRenderer {
    pub fn new(assets: Arc<dyn AssetStore>, face: TextFace) -> Self {
        Self { assets, face }
    }

    /// Fetches every url concurrently, then decodes them all off the async runtime.
    async fn prefetch(&self, urls: Vec<String>, width: u32, height: u32) -> PortResult<HashMap<String, DynamicImage>> {
        let fetches = urls.into_iter().map(|url| async move {
            let bytes = self.assets.fetch(&url).await?;
            Ok::<_, PortError>((url, bytes))
        });
        let fetched: Vec<(String, Bytes)> = try_join_all(fetches).await?;
        debug!(images = fetched.len(), width, height, "images fetched for rendering");

        tokio::task::spawn_blocking(move || {
            fetched
                .into_iter()
                .map(|(url, bytes)| Ok((url, prepare_image(&bytes, width, height)?)))
                .collect::<PortResult<HashMap<_, _>>>()
        })
        .await
        .map_err(render_error)?
    }
}

#[async_trait]
impl PageRenderer for PdfRenderer {
    async fn render_interior(&self, book: &Book, pages: &[Page]) -> PortResult<Bytes> {
        let (width, height) = page_canvas_px();
        let images = self.prefetch(referenced_images(pages), width, height).await?;
        let sheets = plan_interior(pages);
        let book = book.clone();
        let face = self.face.clone();

        let rendered = tokio::task::spawn_blocking(move || build_interior(&book, &sheets, &images, &face))
            .await
            .map_err(render_error)??;
        debug!(pages = rendered.page_count, bytes = rendered.bytes.len(), "interior rendered");
        Ok(Bytes::from(rendered.bytes))
    }

    async fn render_cover(&self, book: &Book, pages: &[Page]) -> PortResult<Bytes> {
        let (canvas_w, canvas_h) = cover_canvas_px();
        let front_w = canvas_w - canvas_w / 2;
        let front_url = plan_cover(book, pages).front_image_url;
        let mut images = self
            .prefetch(front_url.clone().into_iter().collect(), front_w, canvas_h)
            .await?;
        let front = front_url.and_then(|url| images.remove(&url));
        let book = book.clone();
        let pages = pages.to_vec();
        let face = self.face.clone();

        let rendered = tokio::task::spawn_blocking(move || build_cover(&book, &pages, front.as_ref(), &face))
            .await
            .map_err(render_error)??;
        Ok(Bytes::from(rendered.bytes))
    }
}
