//! Line compositing: backgrounds, sprites, windows and colour effects.
//!
//! Every layer is first drawn into a line of 15-bit colours, with
//! `TRANSPARENT` where nothing is drawn. The compositor then picks the two
//! topmost visible layers per pixel and applies the blend unit.

use super::{Ppu, SCREEN_WIDTH, to_argb};
use crate::memory::{Memory, VRAM_OBJ_TILED, VRAM_SIZE};

const TRANSPARENT: u16 = 0x8000;

const LAYER_OBJ: usize = 4;
const LAYER_BACKDROP: usize = 5;

/// OBJ sizes in pixels by [shape][size].
const OBJ_SIZES: [[(i32, i32); 4]; 3] = [
    [(8, 8), (16, 16), (32, 32), (64, 64)],
    [(16, 8), (32, 8), (32, 16), (64, 32)],
    [(8, 16), (8, 32), (16, 32), (32, 64)],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BgKind {
    Text,
    Affine,
    /// Mode 3: 240x160, direct colour.
    Bitmap16,
    /// Mode 4: 240x160, paletted, two pages.
    Bitmap8,
    /// Mode 5: 160x128, direct colour, two pages.
    Bitmap16Small,
}

fn bg_kind(mode: u16, bg: usize) -> Option<BgKind> {
    match (mode, bg) {
        (0, _) | (1, 0 | 1) => Some(BgKind::Text),
        (1, 2) | (2, 2 | 3) => Some(BgKind::Affine),
        (3, 2) => Some(BgKind::Bitmap16),
        (4, 2) => Some(BgKind::Bitmap8),
        (5, 2) => Some(BgKind::Bitmap16Small),
        _ => None,
    }
}

fn palette_color(mem: &Memory, index: usize) -> u16 {
    let at = (index * 2) & 0x3FE;
    u16::from_le_bytes([mem.palette[at], mem.palette[at + 1]]) & 0x7FFF
}

fn vram_half(mem: &Memory, at: usize) -> u16 {
    let at = at % VRAM_SIZE & !1;
    u16::from_le_bytes([mem.vram[at], mem.vram[at + 1]])
}

/// Whether coordinate `p` lies inside a window span register (start in the
/// high byte, end exclusive in the low byte; start > end wraps).
fn inside_span(span: u16, p: usize) -> bool {
    let start = usize::from(span >> 8);
    let end = usize::from(span & 0xFF);
    if start <= end {
        p >= start && p < end
    } else {
        p >= start || p < end
    }
}

fn channels(c: u16) -> [u32; 3] {
    [u32::from(c & 0x1F), u32::from((c >> 5) & 0x1F), u32::from((c >> 10) & 0x1F)]
}

fn pack([r, g, b]: [u32; 3]) -> u16 {
    (r | (g << 5) | (b << 10)) as u16
}

fn alpha_blend(top: u16, below: u16, eva: u32, evb: u32) -> u16 {
    let (a, b) = (channels(top), channels(below));
    pack([0, 1, 2].map(|i| ((a[i] * eva + b[i] * evb) >> 4).min(31)))
}

fn brighten(c: u16, evy: u32) -> u16 {
    pack(channels(c).map(|v| v + (((31 - v) * evy) >> 4)))
}

fn darken(c: u16, evy: u32) -> u16 {
    pack(channels(c).map(|v| v - ((v * evy) >> 4)))
}

struct ObjLine {
    color: [u16; SCREEN_WIDTH],
    priority: [u8; SCREEN_WIDTH],
    semi_transparent: [bool; SCREEN_WIDTH],
    window: [bool; SCREEN_WIDTH],
}

impl ObjLine {
    fn new() -> Self {
        Self {
            color: [TRANSPARENT; SCREEN_WIDTH],
            priority: [4; SCREEN_WIDTH],
            semi_transparent: [false; SCREEN_WIDTH],
            window: [false; SCREEN_WIDTH],
        }
    }
}

impl Ppu {
    pub(super) fn render_line(&mut self, mem: &Memory, y: usize, out: &mut [u32; SCREEN_WIDTH]) {
        let dispcnt = self.regs.dispcnt;
        if dispcnt & 0x0080 != 0 {
            // Forced blank.
            out.fill(0xFFFF_FFFF);
            return;
        }

        let mode = dispcnt & 7;
        let mut bgs = [[TRANSPARENT; SCREEN_WIDTH]; 4];
        let mut enabled = [false; 4];
        for bg in 0..4 {
            if dispcnt & (0x0100 << bg) == 0 {
                continue;
            }
            let Some(kind) = bg_kind(mode, bg) else { continue };
            enabled[bg] = true;
            match kind {
                BgKind::Text => self.draw_text_bg(mem, bg, y, &mut bgs[bg]),
                BgKind::Affine => self.draw_affine_bg(mem, bg, &mut bgs[bg]),
                _ => self.draw_bitmap_bg(mem, kind, &mut bgs[bg]),
            }
        }

        let obj = if dispcnt & 0x1000 != 0 {
            self.draw_sprites(mem, y)
        } else {
            ObjLine::new()
        };
        self.compose(mem, y, &bgs, enabled, &obj, out);
    }

    fn bg_mosaic(&self, bgcnt: u16) -> (usize, usize) {
        if bgcnt & 0x40 == 0 {
            return (1, 1);
        }
        let m = self.regs.mosaic;
        (usize::from(m & 0xF) + 1, usize::from((m >> 4) & 0xF) + 1)
    }

    fn draw_text_bg(&mut self, mem: &Memory, bg: usize, y: usize, line: &mut [u16; SCREEN_WIDTH]) {
        let cnt = self.regs.bgcnt[bg];
        let char_base = usize::from((cnt >> 2) & 3) * 0x4000;
        let screen_base = usize::from((cnt >> 8) & 0x1F) * 0x800;
        let color256 = cnt & 0x80 != 0;
        let (width, height) = match cnt >> 14 {
            0 => (256, 256),
            1 => (512, 256),
            2 => (256, 512),
            _ => (512, 512),
        };
        let (mos_x, mos_y) = self.bg_mosaic(cnt);
        let line_y = y - y % mos_y;
        let sy = (line_y + usize::from(self.regs.bgvofs[bg] & 0x1FF)) % height;
        let hofs = usize::from(self.regs.bghofs[bg] & 0x1FF);

        for (x, pixel) in line.iter_mut().enumerate() {
            let sx = (x - x % mos_x + hofs) % width;
            let block = sx / 256 + (sy / 256) * (width / 256);
            let entry = vram_half(mem, screen_base + block * 0x800 + ((sy % 256) / 8) * 64 + ((sx % 256) / 8) * 2);
            let tile = usize::from(entry & 0x3FF);
            let col = if entry & 0x400 != 0 { 7 - sx % 8 } else { sx % 8 };
            let row = if entry & 0x800 != 0 { 7 - sy % 8 } else { sy % 8 };

            let base = char_base + tile * if color256 { 64 } else { 32 };
            if base >= VRAM_OBJ_TILED {
                continue;
            }
            let index = if color256 {
                usize::from(self.tiles.row_8bpp(&mem.vram, base, row)[col])
            } else {
                usize::from(self.tiles.row_4bpp(&mem.vram, base, row)[col])
            };
            if index != 0 {
                let palette_index = if color256 { index } else { usize::from(entry >> 12) * 16 + index };
                *pixel = palette_color(mem, palette_index);
            }
        }
    }

    fn draw_affine_bg(&mut self, mem: &Memory, bg: usize, line: &mut [u16; SCREEN_WIDTH]) {
        let cnt = self.regs.bgcnt[bg];
        let char_base = usize::from((cnt >> 2) & 3) * 0x4000;
        let screen_base = usize::from((cnt >> 8) & 0x1F) * 0x800;
        let size = 128i32 << (cnt >> 14);
        let wrap = cnt & 0x2000 != 0;
        let (mos_x, _) = self.bg_mosaic(cnt);
        let [pa, _, pc, _] = self.regs.bg_affine[bg - 2];
        let [ref_x, ref_y] = self.internal_ref[bg - 2];

        for (x, pixel) in line.iter_mut().enumerate() {
            let xm = (x - x % mos_x) as i32;
            let mut tx = (ref_x + i32::from(pa) * xm) >> 8;
            let mut ty = (ref_y + i32::from(pc) * xm) >> 8;
            if wrap {
                tx = tx.rem_euclid(size);
                ty = ty.rem_euclid(size);
            } else if tx < 0 || ty < 0 || tx >= size || ty >= size {
                continue;
            }
            let (tx, ty) = (tx as usize, ty as usize);
            let map_at = screen_base + (ty / 8) * (size as usize / 8) + tx / 8;
            let tile = usize::from(mem.vram[map_at % VRAM_SIZE]);
            let index = self.tiles.row_8bpp(&mem.vram, char_base + tile * 64, ty % 8)[tx % 8];
            if index != 0 {
                *pixel = palette_color(mem, usize::from(index));
            }
        }
    }

    fn draw_bitmap_bg(&self, mem: &Memory, kind: BgKind, line: &mut [u16; SCREEN_WIDTH]) {
        let page = if self.regs.dispcnt & 0x10 != 0 { 0xA000 } else { 0 };
        let (width, height) = match kind {
            BgKind::Bitmap16Small => (160, 128),
            _ => (240, 160),
        };
        let [pa, _, pc, _] = self.regs.bg_affine[0];
        let [ref_x, ref_y] = self.internal_ref[0];
        let (mos_x, _) = self.bg_mosaic(self.regs.bgcnt[2]);

        for (x, pixel) in line.iter_mut().enumerate() {
            let xm = (x - x % mos_x) as i32;
            let tx = (ref_x + i32::from(pa) * xm) >> 8;
            let ty = (ref_y + i32::from(pc) * xm) >> 8;
            if tx < 0 || ty < 0 || tx >= width || ty >= height {
                continue;
            }
            let at = (ty * width + tx) as usize;
            *pixel = match kind {
                BgKind::Bitmap16 => vram_half(mem, at * 2) & 0x7FFF,
                BgKind::Bitmap16Small => vram_half(mem, page + at * 2) & 0x7FFF,
                _ => match mem.vram[page + at] {
                    0 => TRANSPARENT,
                    index => palette_color(mem, usize::from(index)),
                },
            };
        }
    }

    fn draw_sprites(&mut self, mem: &Memory, y: usize) -> ObjLine {
        let mut obj = ObjLine::new();
        let dispcnt = self.regs.dispcnt;
        let one_dimensional = dispcnt & 0x40 != 0;
        let bitmap_mode = dispcnt & 7 >= 3;
        let mos_x = i32::from(self.regs.mosaic >> 8 & 0xF) + 1;
        let mos_y = usize::from(self.regs.mosaic >> 12 & 0xF) + 1;

        for entry in mem.oam.chunks_exact(8) {
            let attr0 = u16::from_le_bytes([entry[0], entry[1]]);
            let attr1 = u16::from_le_bytes([entry[2], entry[3]]);
            let attr2 = u16::from_le_bytes([entry[4], entry[5]]);

            let affine = attr0 & 0x100 != 0;
            if !affine && attr0 & 0x200 != 0 {
                continue;
            }
            let obj_mode = (attr0 >> 10) & 3;
            let shape = usize::from(attr0 >> 14);
            if obj_mode == 3 || shape == 3 {
                continue;
            }
            let (width, height) = OBJ_SIZES[shape][usize::from(attr1 >> 14)];
            let double = affine && attr0 & 0x200 != 0;
            let (box_w, box_h) = if double { (width * 2, height * 2) } else { (width, height) };

            let mosaic = attr0 & 0x1000 != 0;
            let line_y = if mosaic { y - y % mos_y } else { y };
            let dy = (line_y as i32 - i32::from(attr0 & 0xFF)).rem_euclid(256);
            if dy >= box_h {
                continue;
            }

            let tile = usize::from(attr2 & 0x3FF);
            if bitmap_mode && tile < 512 {
                continue;
            }
            let priority = ((attr2 >> 10) & 3) as u8;
            let palette_bank = usize::from(attr2 >> 12);
            let color256 = attr0 & 0x2000 != 0;
            let left = (i32::from(attr1 & 0x1FF) << 23) >> 23;

            let [pa, pb, pc, pd] = if affine {
                let group = usize::from((attr1 >> 9) & 0x1F) * 32;
                [6, 14, 22, 30].map(|o| i32::from(i16::from_le_bytes([mem.oam[group + o], mem.oam[group + o + 1]])))
            } else {
                [0x100, 0, 0, 0x100]
            };

            for sx in 0..box_w {
                let screen_x = left + sx;
                if !(0..SCREEN_WIDTH as i32).contains(&screen_x) {
                    continue;
                }
                let sx = if mosaic { (screen_x - screen_x % mos_x - left).max(0) } else { sx };
                let (tx, ty) = if affine {
                    let cx = sx - box_w / 2;
                    let cy = dy - box_h / 2;
                    let tx = ((pa * cx + pb * cy) >> 8) + width / 2;
                    let ty = ((pc * cx + pd * cy) >> 8) + height / 2;
                    if tx < 0 || ty < 0 || tx >= width || ty >= height {
                        continue;
                    }
                    (tx, ty)
                } else {
                    let tx = if attr1 & 0x1000 != 0 { width - 1 - sx } else { sx };
                    let ty = if attr1 & 0x2000 != 0 { height - 1 - dy } else { dy };
                    (tx, ty)
                };
                let (tx, ty) = (tx as usize, ty as usize);

                let index = if color256 {
                    let stride = if one_dimensional { width as usize / 8 * 2 } else { 32 };
                    let number = (tile + (ty / 8) * stride + (tx / 8) * 2) & 0x3FF;
                    let base = VRAM_OBJ_TILED + number * 32;
                    usize::from(self.tiles.row_8bpp(&mem.vram, base, ty % 8)[tx % 8])
                } else {
                    let stride = if one_dimensional { width as usize / 8 } else { 32 };
                    let number = (tile + (ty / 8) * stride + tx / 8) & 0x3FF;
                    let base = VRAM_OBJ_TILED + number * 32;
                    usize::from(self.tiles.row_4bpp(&mem.vram, base, ty % 8)[tx % 8])
                };
                if index == 0 {
                    continue;
                }

                let x = screen_x as usize;
                if obj_mode == 2 {
                    obj.window[x] = true;
                    continue;
                }
                if obj.color[x] != TRANSPARENT && obj.priority[x] <= priority {
                    continue;
                }
                let palette_index = if color256 { index } else { palette_bank * 16 + index };
                obj.color[x] = palette_color(mem, 256 + palette_index);
                obj.priority[x] = priority;
                obj.semi_transparent[x] = obj_mode == 1;
            }
        }
        obj
    }

    /// Layer-enable bits (BG0-3, OBJ, effects) for a pixel.
    fn window_mask(&self, x: usize, y: usize, in_obj_window: bool) -> u16 {
        let regs = &self.regs;
        for w in 0..2 {
            if regs.dispcnt & (0x2000 << w) != 0 && inside_span(regs.winh[w], x) && inside_span(regs.winv[w], y) {
                return (regs.winin >> (8 * w)) & 0x3F;
            }
        }
        if regs.dispcnt & 0x8000 != 0 && in_obj_window {
            return (regs.winout >> 8) & 0x3F;
        }
        regs.winout & 0x3F
    }

    fn compose(
        &self,
        mem: &Memory,
        y: usize,
        bgs: &[[u16; SCREEN_WIDTH]; 4],
        enabled: [bool; 4],
        obj: &ObjLine,
        out: &mut [u32; SCREEN_WIDTH],
    ) {
        let regs = &self.regs;
        let windows_on = regs.dispcnt & 0xE000 != 0;
        let first_target = regs.bldcnt & 0x3F;
        let second_target = (regs.bldcnt >> 8) & 0x3F;
        let effect = (regs.bldcnt >> 6) & 3;
        let eva = u32::from(regs.bldalpha & 0x1F).min(16);
        let evb = u32::from((regs.bldalpha >> 8) & 0x1F).min(16);
        let evy = u32::from(regs.bldy & 0x1F).min(16);
        let backdrop = palette_color(mem, 0);

        let mut order: Vec<usize> = (0..4).filter(|&bg| enabled[bg]).collect();
        order.sort_by_key(|&bg| (regs.bgcnt[bg] & 3, bg));

        for (x, pixel) in out.iter_mut().enumerate() {
            let mask = if windows_on { self.window_mask(x, y, obj.window[x]) } else { 0x3F };

            // Two topmost layers: (colour, layer id).
            let mut layers = [(backdrop, LAYER_BACKDROP); 2];
            let mut found = 0;
            'search: for priority in 0..4u16 {
                if mask & 0x10 != 0 && obj.color[x] != TRANSPARENT && u16::from(obj.priority[x]) == priority {
                    layers[found] = (obj.color[x], LAYER_OBJ);
                    found += 1;
                    if found == 2 {
                        break 'search;
                    }
                }
                for &bg in &order {
                    if regs.bgcnt[bg] & 3 == priority && mask & (1 << bg) != 0 && bgs[bg][x] != TRANSPARENT {
                        layers[found] = (bgs[bg][x], bg);
                        found += 1;
                        if found == 2 {
                            break 'search;
                        }
                    }
                }
            }

            let [(top, top_layer), (below, below_layer)] = layers;
            let is_first = first_target & (1 << top_layer) != 0;
            let is_second = second_target & (1 << below_layer) != 0;
            let effects = mask & 0x20 != 0;

            let color = if top_layer == LAYER_OBJ && obj.semi_transparent[x] && is_second {
                alpha_blend(top, below, eva, evb)
            } else if !effects || !is_first {
                top
            } else {
                match effect {
                    1 if is_second => alpha_blend(top, below, eva, evb),
                    2 => brighten(top, evy),
                    3 => darken(top, evy),
                    _ => top,
                }
            };
            *pixel = to_argb(color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: u16 = 0x001F;
    const GREEN: u16 = 0x03E0;
    const BLUE: u16 = 0x7C00;

    fn set_palette(mem: &mut Memory, index: usize, color: u16) {
        mem.palette[index * 2..index * 2 + 2].copy_from_slice(&color.to_le_bytes());
    }

    fn render(ppu: &mut Ppu, mem: &Memory, y: usize) -> [u32; SCREEN_WIDTH] {
        let mut out = [0; SCREEN_WIDTH];
        ppu.render_line(mem, y, &mut out);
        out
    }

    /// Mode 0, BG0 at screen block 8, char block 0, tile 1 filled with
    /// palette index 1 everywhere in the map.
    fn text_scene(mem: &mut Memory, ppu: &mut Ppu) {
        mem.vram[32..64].fill(0x11);
        for entry in 0..32 * 32 {
            let at = 8 * 0x800 + entry * 2;
            mem.vram[at..at + 2].copy_from_slice(&1u16.to_le_bytes());
        }
        set_palette(mem, 1, RED);
        ppu.regs.dispcnt = 0x0100;
        ppu.regs.bgcnt[0] = 8 << 8;
    }

    #[test]
    fn forced_blank_is_white() {
        let mem = Memory::new(&[]);
        let mut ppu = Ppu::new();
        ppu.regs.dispcnt = 0x0080;
        assert!(render(&mut ppu, &mem, 0).iter().all(|&p| p == 0xFFFF_FFFF));
    }

    #[test]
    fn backdrop_when_nothing_enabled() {
        let mut mem = Memory::new(&[]);
        set_palette(&mut mem, 0, BLUE);
        let mut ppu = Ppu::new();
        assert!(render(&mut ppu, &mem, 10).iter().all(|&p| p == to_argb(BLUE)));
    }

    #[test]
    fn mode3_reads_direct_colour() {
        let mut mem = Memory::new(&[]);
        let at = (5 * 240 + 7) * 2;
        mem.vram[at..at + 2].copy_from_slice(&GREEN.to_le_bytes());
        let mut ppu = Ppu::new();
        ppu.regs.dispcnt = 0x0403;
        // Reference point as it stands after five lines of identity transform.
        ppu.internal_ref[0][1] = 5 << 8;
        let line = render(&mut ppu, &mem, 5);
        assert_eq!(line[7], to_argb(GREEN));
        assert_eq!(line[8], to_argb(0));
    }

    #[test]
    fn mode4_index_zero_shows_backdrop() {
        let mut mem = Memory::new(&[]);
        set_palette(&mut mem, 0, BLUE);
        set_palette(&mut mem, 3, RED);
        mem.vram[1] = 3;
        let mut ppu = Ppu::new();
        ppu.regs.dispcnt = 0x0404;
        let line = render(&mut ppu, &mem, 0);
        assert_eq!(line[0], to_argb(BLUE));
        assert_eq!(line[1], to_argb(RED));
    }

    #[test]
    fn text_background_tiles() {
        let mut mem = Memory::new(&[]);
        let mut ppu = Ppu::new();
        text_scene(&mut mem, &mut ppu);
        assert!(render(&mut ppu, &mem, 42).iter().all(|&p| p == to_argb(RED)));
    }

    #[test]
    fn sprite_draws_over_background() {
        let mut mem = Memory::new(&[]);
        let mut ppu = Ppu::new();
        text_scene(&mut mem, &mut ppu);
        // 8x8 4bpp sprite at (16, 0) using OBJ tile 0, colour 2 of bank 0.
        mem.vram[VRAM_OBJ_TILED..VRAM_OBJ_TILED + 32].fill(0x22);
        set_palette(&mut mem, 256 + 2, GREEN);
        mem.oam[0..6].copy_from_slice(&[0, 0, 16, 0, 0, 0]);
        for entry in 1..128 {
            mem.oam[entry * 8 + 1] = 0x02; // disabled
        }
        ppu.regs.dispcnt |= 0x1040;
        let line = render(&mut ppu, &mem, 3);
        assert_eq!(line[15], to_argb(RED));
        assert_eq!(line[16], to_argb(GREEN));
        assert_eq!(line[23], to_argb(GREEN));
        assert_eq!(line[24], to_argb(RED));
    }

    #[test]
    fn window_hides_layer_outside() {
        let mut mem = Memory::new(&[]);
        set_palette(&mut mem, 0, BLUE);
        let mut ppu = Ppu::new();
        text_scene(&mut mem, &mut ppu);
        ppu.regs.dispcnt |= 0x2000;
        ppu.regs.winh[0] = (10 << 8) | 20;
        ppu.regs.winv[0] = 160;
        ppu.regs.winin = 0x01;
        ppu.regs.winout = 0x00;
        let line = render(&mut ppu, &mem, 0);
        assert_eq!(line[9], to_argb(BLUE));
        assert_eq!(line[10], to_argb(RED));
        assert_eq!(line[19], to_argb(RED));
        assert_eq!(line[20], to_argb(BLUE));
    }

    #[test]
    fn alpha_blend_with_backdrop() {
        let mut mem = Memory::new(&[]);
        set_palette(&mut mem, 0, BLUE);
        let mut ppu = Ppu::new();
        text_scene(&mut mem, &mut ppu);
        // BG0 first target, backdrop second, 8/16 each.
        ppu.regs.bldcnt = 0x0001 | (1 << 6) | (0x20 << 8);
        ppu.regs.bldalpha = 0x0808;
        let line = render(&mut ppu, &mem, 0);
        assert_eq!(line[0], to_argb(0x3C0F));
    }

    #[test]
    fn brightness_fade() {
        assert_eq!(brighten(0, 16), 0x7FFF);
        assert_eq!(darken(0x7FFF, 16), 0);
        assert_eq!(brighten(RED, 8), 0x3DFF);
    }
}
