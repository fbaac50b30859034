//! BGR555 to ARGB8888 conversion.

use std::sync::OnceLock;

static LUT: OnceLock<Box<[u32]>> = OnceLock::new();

fn expand(c: u32) -> u32 {
    (c << 3) | (c >> 2)
}

fn build() -> Box<[u32]> {
    (0..0x8000u32)
        .map(|c| {
            let r = expand(c & 0x1F);
            let g = expand((c >> 5) & 0x1F);
            let b = expand((c >> 10) & 0x1F);
            0xFF00_0000 | (r << 16) | (g << 8) | b
        })
        .collect()
}

/// Convert a 15-bit palette colour to opaque ARGB8888.
#[must_use]
pub fn to_argb(color: u16) -> u32 {
    LUT.get_or_init(build)[usize::from(color & 0x7FFF)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extremes() {
        assert_eq!(to_argb(0x0000), 0xFF00_0000);
        assert_eq!(to_argb(0x7FFF), 0xFFFF_FFFF);
    }

    #[test]
    fn channel_order() {
        assert_eq!(to_argb(0x001F), 0xFFFF_0000, "red is the low field");
        assert_eq!(to_argb(0x03E0), 0xFF00_FF00);
        assert_eq!(to_argb(0x7C00), 0xFF00_00FF);
        assert_eq!(to_argb(0x8000), 0xFF00_0000, "bit 15 ignored");
    }
}
