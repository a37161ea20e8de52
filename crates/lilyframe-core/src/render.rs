//! Text-to-PNG rendering.
//!
//! Multi-line text (typically ASCII art) is laid out on a fixed-style
//! canvas, emitted as SVG, then rasterized with `resvg`. Layout is a pure
//! function of the text and aspect ratio; only the final raster depends on
//! which fonts are installed.

use std::fmt::Write as _;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

pub const FONT_SIZE: f64 = 14.0;
pub const LINE_HEIGHT: f64 = FONT_SIZE + 6.0;
pub const PADDING: f64 = 20.0;
pub const MIN_WIDTH: f64 = 800.0;
pub const MIN_X: f64 = 10.0;
/// Average advance of a monospace glyph relative to the font size.
pub const CHAR_WIDTH_FACTOR: f64 = 0.6;

/// Largest canvas edge we are willing to allocate a pixmap for.
const MAX_DIM: u32 = 16_384;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unsupported aspect ratio {0}; expected 1.91 or 1")]
    UnsupportedAspectRatio(f64),

    #[error("canvas size too large: {width}x{height} (max {max}x{max})", max = MAX_DIM)]
    CanvasTooLarge { width: u32, height: u32 },

    #[error("parse svg: {0}")]
    Svg(#[from] usvg::Error),

    #[error("failed to allocate {width}x{height} pixmap")]
    Pixmap { width: u32, height: u32 },

    #[error("encode png: {0}")]
    Encode(#[from] image::ImageError),
}

/// Canvas shapes supported by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum AspectRatio {
    /// 1.91:1, the frame preview shape.
    #[default]
    Landscape,
    Square,
}

impl AspectRatio {
    pub fn value(self) -> f64 {
        match self {
            AspectRatio::Landscape => 1.91,
            AspectRatio::Square => 1.0,
        }
    }
}

impl TryFrom<f64> for AspectRatio {
    type Error = RenderError;

    fn try_from(ratio: f64) -> Result<Self, Self::Error> {
        if ratio == 1.91 {
            Ok(AspectRatio::Landscape)
        } else if ratio == 1.0 {
            Ok(AspectRatio::Square)
        } else {
            Err(RenderError::UnsupportedAspectRatio(ratio))
        }
    }
}

/// Escape the five XML-reserved characters.
pub fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            other => out.push(other),
        }
    }
    out
}

/// Canvas geometry for one piece of text.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub lines: Vec<String>,
    pub width: f64,
    pub height: f64,
    /// Left edge shared by every line, centering the widest one.
    pub x: f64,
}

impl Layout {
    pub fn compute(text: &str, ratio: AspectRatio) -> Self {
        // Some tool output carries the two-character `\n` marker instead of a line feed.
        let lines: Vec<String> = text
            .split('\n')
            .flat_map(|l| l.split("\\n"))
            .map(|l| l.strip_suffix('\r').unwrap_or(l).to_owned())
            .collect();

        let text_height = lines.len() as f64 * LINE_HEIGHT + PADDING * 2.0;
        let (width, height) = match ratio {
            AspectRatio::Landscape => ((text_height * ratio.value()).max(MIN_WIDTH), text_height),
            AspectRatio::Square => {
                let side = text_height.max(MIN_WIDTH);
                (side, side)
            }
        };

        // Measured on the escaped text, entities included.
        let max_chars = lines
            .iter()
            .map(|l| escape_xml(l).chars().count())
            .max()
            .unwrap_or(0);
        let text_width = max_chars as f64 * FONT_SIZE * CHAR_WIDTH_FACTOR;
        let x = ((width - text_width) / 2.0).max(MIN_X);

        Self {
            lines,
            width,
            height,
            x,
        }
    }

    /// Pixel dimensions of the raster canvas.
    pub fn pixel_size(&self) -> (u32, u32) {
        (self.width.ceil() as u32, self.height.ceil() as u32)
    }

    pub fn to_svg(&self) -> String {
        let mut svg = String::new();
        let _ = write!(
            svg,
            r#"<svg width="{w}" height="{h}" viewBox="0 0 {w} {h}" xmlns="http://www.w3.org/2000/svg">"#,
            w = self.width,
            h = self.height,
        );
        svg.push_str(r#"<rect width="100%" height="100%" fill="white"/>"#);
        let _ = write!(
            svg,
            r#"<text x="{x}" y="{PADDING}" font-family="monospace" font-size="{FONT_SIZE}" fill="black" xml:space="preserve">"#,
            x = self.x,
        );
        for (i, line) in self.lines.iter().enumerate() {
            let dy = if i == 0 { 0.0 } else { LINE_HEIGHT };
            let _ = write!(
                svg,
                r#"<tspan x="{x}" dy="{dy}">{line}</tspan>"#,
                x = self.x,
                line = escape_xml(line),
            );
        }
        svg.push_str("</text></svg>");
        svg
    }
}

/// Rasterizes text layouts against a shared font database.
#[derive(Clone)]
pub struct TextRenderer {
    fontdb: Arc<usvg::fontdb::Database>,
}

impl std::fmt::Debug for TextRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TextRenderer({} font faces)", self.fontdb.len())
    }
}

impl Default for TextRenderer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl TextRenderer {
    /// Load system fonts, plus any `.ttf`/`.otf` files under `font_dir`.
    pub fn new(font_dir: Option<&Path>) -> Self {
        let mut db = usvg::fontdb::Database::new();
        db.load_system_fonts();
        if let Some(dir) = font_dir {
            db.load_fonts_dir(dir);
        }

        // Point the generic `monospace` family at a face that is actually installed.
        let mono = db
            .faces()
            .find(|face| face.monospaced)
            .and_then(|face| face.families.first())
            .map(|(name, _)| name.clone());
        if let Some(family) = mono {
            debug!(family = %family, "using monospace font family");
            db.set_monospace_family(family);
        }

        Self {
            fontdb: Arc::new(db),
        }
    }

    pub fn render(&self, text: &str, ratio: AspectRatio) -> Result<Vec<u8>, RenderError> {
        let layout = Layout::compute(text, ratio);
        self.rasterize(&layout)
    }

    pub fn rasterize(&self, layout: &Layout) -> Result<Vec<u8>, RenderError> {
        let (width, height) = layout.pixel_size();
        if width > MAX_DIM || height > MAX_DIM {
            return Err(RenderError::CanvasTooLarge { width, height });
        }

        let opts = usvg::Options {
            fontdb: Arc::clone(&self.fontdb),
            ..Default::default()
        };
        let tree = usvg::Tree::from_str(&layout.to_svg(), &opts)?;

        let mut pixmap = resvg::tiny_skia::Pixmap::new(width, height)
            .ok_or(RenderError::Pixmap { width, height })?;
        pixmap.fill(resvg::tiny_skia::Color::WHITE);
        resvg::render(&tree, resvg::tiny_skia::Transform::identity(), &mut pixmap.as_mut());

        // The canvas is fully opaque, so premultiplied and straight alpha agree.
        let image = image::RgbaImage::from_raw(width, height, pixmap.take())
            .ok_or(RenderError::Pixmap { width, height })?;
        let mut png = Vec::new();
        image::DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;

        debug!(width, height, lines = layout.lines.len(), bytes = png.len(), "rendered text to png");
        Ok(png)
    }
}
