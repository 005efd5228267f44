use std::io::Cursor;
use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use memebot_contracts::error::BotError;
use rusttype::{point, Font, Scale};

/// Every template and every render is normalized to this canvas width.
pub const OUTPUT_WIDTH: u32 = 500;
pub const FONT_SIZE: f32 = 40.0;

/// Caption block geometry: bottom line sits this far above the bottom edge,
/// and the wrap budget leaves this much horizontal padding in total.
const CAPTION_BOTTOM_MARGIN: f32 = 30.0;
const WRAP_SIDE_PADDING: f32 = 20.0;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// One-pixel ring used to fake a stroked outline around the white fill.
const OUTLINE_OFFSETS: &[(f32, f32)] = &[
    (-1.0, -1.0),
    (0.0, -1.0),
    (1.0, -1.0),
    (-1.0, 0.0),
    (1.0, 0.0),
    (-1.0, 1.0),
    (0.0, 1.0),
    (1.0, 1.0),
];

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub output_width: u32,
    pub font_size: f32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            output_width: OUTPUT_WIDTH,
            font_size: FONT_SIZE,
        }
    }
}

/// Greedy word wrap against a pixel budget.
///
/// Words accumulate into a candidate line (single space separated, with
/// the trailing space included in the measurement); when the
/// measured candidate overflows and the line already holds something, the
/// line is emitted and the word starts the next one. A single word wider
/// than the budget is never split; it lands alone on its own line.
pub fn wrap_text(text: &str, max_width: f32, measure: impl Fn(&str) -> f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();

    for word in text.split_whitespace() {
        let candidate = format!("{line}{word} ");
        if measure(&candidate) > max_width && !line.is_empty() {
            lines.push(line.trim_end().to_string());
            line = format!("{word} ");
        } else {
            line = candidate;
        }
    }
    if !line.is_empty() {
        lines.push(line.trim_end().to_string());
    }
    lines
}

/// Uniform scale to the fixed output width, aspect preserved.
pub fn scaled_dimensions(width: u32, height: u32, output_width: u32) -> (u32, u32) {
    let scaled = (height as f64 * output_width as f64 / width as f64).round() as u32;
    (output_width, scaled.max(1))
}

/// Baseline y for each caption line, bottom-up: line `i` of `k` sits at
/// `canvas_height - font_size * (k - 1 - i) - 30`.
pub fn caption_baselines(line_count: usize, font_size: f32, canvas_height: u32) -> Vec<f32> {
    (0..line_count)
        .map(|i| {
            canvas_height as f32 - font_size * (line_count - 1 - i) as f32 - CAPTION_BOTTOM_MARGIN
        })
        .collect()
}

pub fn scale_to_width(image: &DynamicImage, output_width: u32) -> RgbaImage {
    let (width, height) = scaled_dimensions(image.width(), image.height(), output_width);
    image::imageops::resize(image, width, height, FilterType::Triangle)
}

/// The caption typeface plus the measurement the wrapper needs.
pub struct CaptionFont {
    font: Font<'static>,
}

impl CaptionFont {
    pub fn load(path: &Path) -> Result<Self, BotError> {
        let bytes = std::fs::read(path)
            .map_err(|err| BotError::Font(format!("{}: {err}", path.display())))?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, BotError> {
        let font = Font::try_from_vec(bytes)
            .ok_or_else(|| BotError::Font("unparseable font data".to_string()))?;
        Ok(Self { font })
    }

    /// Advance width of `text` at `font_size`, kerning included. Trailing
    /// spaces count, as with canvas `measureText`.
    pub fn line_width(&self, text: &str, font_size: f32) -> f32 {
        let scale = Scale::uniform(font_size);
        self.font
            .layout(text, scale, point(0.0, 0.0))
            .last()
            .map(|glyph| glyph.position().x + glyph.unpositioned().h_metrics().advance_width)
            .unwrap_or(0.0)
    }
}

/// Composite `text` onto `image_bytes`: scale the base to the output width,
/// wrap the caption to the width budget, draw each line bottom-anchored and
/// centered as white-on-black-outline, return PNG bytes.
pub fn render_caption(
    image_bytes: &[u8],
    text: &str,
    font: &CaptionFont,
    options: &RenderOptions,
) -> Result<Vec<u8>, BotError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(BotError::EmptyInput);
    }

    let decoded = image::load_from_memory(image_bytes)
        .map_err(|err| BotError::UnsupportedImage(err.to_string()))?;
    let mut canvas = scale_to_width(&decoded, options.output_width);
    let (width, height) = canvas.dimensions();

    let budget = options.output_width as f32 - WRAP_SIDE_PADDING;
    let lines = wrap_text(text, budget, |candidate| {
        font.line_width(candidate, options.font_size)
    });
    let baselines = caption_baselines(lines.len(), options.font_size, height);

    for (line, baseline) in lines.iter().zip(&baselines) {
        let line_width = font.line_width(line, options.font_size);
        let x = (width as f32 - line_width) / 2.0;
        for (dx, dy) in OUTLINE_OFFSETS {
            draw_line(&mut canvas, font, options.font_size, x + dx, baseline + dy, line, BLACK);
        }
        draw_line(&mut canvas, font, options.font_size, x, *baseline, line, WHITE);
    }

    encode_png(&canvas)
}

pub fn encode_png(canvas: &RgbaImage) -> Result<Vec<u8>, BotError> {
    let mut cursor = Cursor::new(Vec::new());
    canvas
        .write_to(&mut cursor, ImageFormat::Png)
        .map_err(|err| BotError::Persist(std::io::Error::other(err.to_string())))?;
    Ok(cursor.into_inner())
}

fn draw_line(
    canvas: &mut RgbaImage,
    font: &CaptionFont,
    font_size: f32,
    x: f32,
    baseline_y: f32,
    text: &str,
    color: Rgba<u8>,
) {
    let scale = Scale::uniform(font_size);
    for glyph in font.font.layout(text, scale, point(x, baseline_y)) {
        let Some(bounds) = glyph.pixel_bounding_box() else {
            continue;
        };
        glyph.draw(|gx, gy, coverage| {
            let px = gx as i32 + bounds.min.x;
            let py = gy as i32 + bounds.min.y;
            if px < 0 || py < 0 {
                return;
            }
            let (px, py) = (px as u32, py as u32);
            if px >= canvas.width() || py >= canvas.height() {
                return;
            }
            let alpha = coverage.clamp(0.0, 1.0);
            if alpha <= 0.0 {
                return;
            }
            let inverse = 1.0 - alpha;
            let pixel = canvas.get_pixel_mut(px, py);
            for channel in 0..3 {
                pixel.0[channel] =
                    (color.0[channel] as f32 * alpha + pixel.0[channel] as f32 * inverse) as u8;
            }
            pixel.0[3] = 255;
        });
    }
}
