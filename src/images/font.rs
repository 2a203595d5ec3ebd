// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Glyph atlases and text layout.

A [`FontProvider`] supplies an alpha-only atlas plus per-character metrics.  [`layout_text`]
turns a string into [`Sprite`]s against that atlas; the sprites are drawn with
[`SpriteKind::Glyph`](crate::images::sprites::SpriteKind::Glyph), which multiplies atlas coverage
into alpha.

[`DebugFont`] is a built-in provider that draws every printable ASCII character as an outlined
cell.  It needs no font files and is what the engine uses when no provider is given.
*/

use crate::images::sprites::Sprite;

/// Where a character sits in the atlas and how it is placed, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Glyph {
    /// `[x, y, width, height]` in the atlas.
    pub atlas: [u32; 4],
    /// Offset of the glyph's top left from the pen position.
    pub draw_offset: (i32, i32),
    pub advance: i32,
}

/// Single-channel coverage, one byte per texel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontAtlas {
    pub width: u32,
    pub height: u32,
    pub coverage: Vec<u8>,
}

pub trait FontProvider: std::fmt::Debug {
    fn atlas(&self) -> &FontAtlas;
    fn glyph(&self, c: char) -> Option<Glyph>;
    fn line_height(&self) -> u32;
}

const CELL_WIDTH: u32 = 8;
const CELL_HEIGHT: u32 = 12;
const COLUMNS: u32 = 16;
const FIRST: u32 = 0x20;
const LAST: u32 = 0x7e;

/// Outlined cells for printable ASCII.
#[derive(Debug, Clone)]
pub struct DebugFont {
    atlas: FontAtlas,
}

impl DebugFont {
    pub fn new() -> DebugFont {
        let count = LAST - FIRST + 1;
        let rows = count.div_ceil(COLUMNS);
        let width = COLUMNS * CELL_WIDTH;
        let height = rows * CELL_HEIGHT;
        let mut coverage = vec![0u8; (width * height) as usize];
        // space stays empty
        for code in FIRST + 1..=LAST {
            let [x0, y0, w, h] = Self::cell(code);
            for y in y0 + 1..y0 + h - 1 {
                for x in x0 + 1..x0 + w - 1 {
                    let edge = y == y0 + 1 || y == y0 + h - 2 || x == x0 + 1 || x == x0 + w - 2;
                    if edge {
                        coverage[(y * width + x) as usize] = 255;
                    }
                }
            }
        }
        DebugFont {
            atlas: FontAtlas {
                width,
                height,
                coverage,
            },
        }
    }

    fn cell(code: u32) -> [u32; 4] {
        let i = code - FIRST;
        [(i % COLUMNS) * CELL_WIDTH, (i / COLUMNS) * CELL_HEIGHT, CELL_WIDTH, CELL_HEIGHT]
    }
}

impl Default for DebugFont {
    fn default() -> Self {
        DebugFont::new()
    }
}

impl FontProvider for DebugFont {
    fn atlas(&self) -> &FontAtlas {
        &self.atlas
    }

    fn glyph(&self, c: char) -> Option<Glyph> {
        let code = c as u32;
        (FIRST..=LAST).contains(&code).then(|| Glyph {
            atlas: Self::cell(code),
            draw_offset: (0, 0),
            advance: CELL_WIDTH as i32,
        })
    }

    fn line_height(&self) -> u32 {
        CELL_HEIGHT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

/// A darker copy drawn underneath the text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DropShadow {
    /// In glyph pixels, before scaling.
    pub offset: (i32, i32),
    /// Multiplies the text color.
    pub color_mod: f32,
    /// Multiplies the text alpha.
    pub alpha: f32,
}

impl Default for DropShadow {
    fn default() -> Self {
        DropShadow {
            offset: (-2, -2),
            color_mod: 0.3,
            alpha: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    /// Pen start, normalized to the target with the origin at the top left.
    pub x: f32,
    pub y: f32,
    pub scale: f32,
    pub color: [f32; 4],
    pub align: TextAlign,
    pub shadow: Option<DropShadow>,
}

impl Default for TextStyle {
    fn default() -> Self {
        TextStyle {
            x: 0.05,
            y: 0.05,
            scale: 1.0,
            color: [1.0, 1.0, 0.0, 1.0],
            align: TextAlign::Left,
            shadow: None,
        }
    }
}

fn line_width(font: &dyn FontProvider, line: &str) -> i32 {
    line.chars()
        .filter_map(|c| font.glyph(c).or_else(|| font.glyph('?')))
        .map(|g| g.advance)
        .sum()
}

fn emit_line(
    font: &dyn FontProvider,
    line: &str,
    origin: (f32, f32),
    scale: f32,
    color: [f32; 4],
    target: (f32, f32),
    out: &mut Vec<Sprite>,
) {
    let atlas = font.atlas();
    let (aw, ah) = (atlas.width.max(1) as f32, atlas.height.max(1) as f32);
    let mut pen = 0i32;
    for c in line.chars() {
        let Some(glyph) = font.glyph(c).or_else(|| font.glyph('?')) else {
            continue;
        };
        let [gx, gy, gw, gh] = glyph.atlas;
        if gw > 0 && gh > 0 {
            let x = origin.0 + (pen + glyph.draw_offset.0) as f32 * scale;
            let y = origin.1 + glyph.draw_offset.1 as f32 * scale;
            out.push(Sprite::new(
                [
                    x / target.0,
                    y / target.1,
                    gw as f32 * scale / target.0,
                    gh as f32 * scale / target.1,
                ],
                [gx as f32 / aw, gy as f32 / ah, gw as f32 / aw, gh as f32 / ah],
                color,
            ));
        }
        pen += glyph.advance;
    }
}

/**
Lays `text` out as glyph sprites for a target of `target` pixels.

Characters the font lacks are drawn as `?`, or skipped when the font lacks that too.  Lines
split on `\n` and advance by the font's line height.  Alignment is relative to the pen start
and uses each line's full advance.  Shadow sprites come first so the text draws over them.
*/
pub fn layout_text(font: &dyn FontProvider, text: &str, style: &TextStyle, target: (u32, u32)) -> Vec<Sprite> {
    let target = (target.0.max(1) as f32, target.1.max(1) as f32);
    let line_height = font.line_height() as f32 * style.scale;
    let mut lines = Vec::new();
    for (i, line) in text.split('\n').enumerate() {
        let width = line_width(font, line) as f32 * style.scale;
        let x = style.x * target.0
            - match style.align {
                TextAlign::Left => 0.0,
                TextAlign::Center => width / 2.0,
                TextAlign::Right => width,
            };
        lines.push((line, (x, style.y * target.1 + line_height * i as f32)));
    }

    let mut out = Vec::new();
    if let Some(shadow) = style.shadow {
        let [r, g, b, a] = style.color;
        let m = shadow.color_mod;
        let color = [r * m, g * m, b * m, a * shadow.alpha];
        let dx = shadow.offset.0 as f32 * style.scale;
        let dy = shadow.offset.1 as f32 * style.scale;
        for (line, (x, y)) in &lines {
            emit_line(font, line, (x - dx, y - dy), style.scale, color, target, &mut out);
        }
    }
    for (line, origin) in &lines {
        emit_line(font, line, *origin, style.scale, style.color, target, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    fn style(align: TextAlign) -> TextStyle {
        TextStyle {
            x: 0.5,
            y: 0.0,
            align,
            ..TextStyle::default()
        }
    }

    #[test]
    fn missing_characters_fall_back_to_question_mark() {
        let font = DebugFont::new();
        let sprites = layout_text(&font, "é", &style(TextAlign::Left), (160, 120));
        let question = layout_text(&font, "?", &style(TextAlign::Left), (160, 120));
        assert_eq!(sprites.len(), 1);
        assert_eq!(sprites[0].coords, question[0].coords);
    }

    #[test]
    fn alignment_uses_the_whole_line_width() {
        let font = DebugFont::new();
        let left = layout_text(&font, "ab", &style(TextAlign::Left), (160, 120));
        let center = layout_text(&font, "ab", &style(TextAlign::Center), (160, 120));
        let right = layout_text(&font, "ab", &style(TextAlign::Right), (160, 120));
        assert_eq!(left[0].pos[0], 0.5);
        assert!(close(center[0].pos[0], 0.5 - 8.0 / 160.0));
        assert!(close(right[0].pos[0], 0.5 - 16.0 / 160.0));
    }

    #[test]
    fn lines_advance_by_line_height() {
        let font = DebugFont::new();
        let sprites = layout_text(&font, "a\nb", &style(TextAlign::Left), (160, 120));
        assert_eq!(sprites.len(), 2);
        assert!(close(sprites[1].pos[1] - sprites[0].pos[1], 12.0 / 120.0));
        assert_eq!(sprites[1].pos[0], sprites[0].pos[0]);
    }

    #[test]
    fn shadows_draw_first() {
        let font = DebugFont::new();
        let shadowed = TextStyle {
            shadow: Some(DropShadow::default()),
            ..style(TextAlign::Left)
        };
        let sprites = layout_text(&font, "a", &shadowed, (160, 120));
        assert_eq!(sprites.len(), 2);
        assert!(sprites[0].pos[0] > sprites[1].pos[0]);
    }

    #[test]
    fn spaces_advance_the_pen() {
        let font = DebugFont::new();
        let sprites = layout_text(&font, "a b", &style(TextAlign::Left), (160, 120));
        assert_eq!(sprites.len(), 3);
        assert!(close(sprites[2].pos[0] - sprites[0].pos[0], 16.0 / 160.0));
    }
}
