//! Read-only framebuffer access and post-processing filters.

/// A borrowed, read-only view of a completed frame.
#[derive(Debug, Clone, Copy)]
pub struct FramebufferView<'a> {
    pixels: &'a [u32],
    width: usize,
    height: usize,
}

impl<'a> FramebufferView<'a> {
    /// Wrap `pixels` (row-major ARGB8888). `pixels` must hold
    /// `width * height` entries; extra entries are not visible.
    #[must_use]
    pub fn new(pixels: &'a [u32], width: usize, height: usize) -> Self {
        let len = pixels.len().min(width * height);
        Self { pixels: &pixels[..len], width, height: len / width.max(1) }
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub fn pixels(&self) -> &'a [u32] {
        self.pixels
    }

    /// Row `y`, or `None` past the bottom.
    #[must_use]
    pub fn row(&self, y: usize) -> Option<&'a [u32]> {
        let start = y.checked_mul(self.width)?;
        self.pixels.get(start..start + self.width)
    }

    #[must_use]
    pub fn pixel(&self, x: usize, y: usize) -> Option<u32> {
        self.row(y)?.get(x).copied()
    }
}

/// A post-processing stage applied to a finished frame.
pub trait FrameFilter {
    /// Output dimensions for an input of `width` x `height`.
    fn output_size(&self, width: usize, height: usize) -> (usize, usize);

    /// Filter `input` into `output`, which is resized as needed.
    fn apply(&self, input: &FramebufferView<'_>, output: &mut Vec<u32>);
}

/// Integer upscaling by pixel replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NearestFilter {
    scale: usize,
}

impl NearestFilter {
    /// A filter enlarging by `scale` in both directions (at least 1).
    #[must_use]
    pub fn new(scale: usize) -> Self {
        Self { scale: scale.max(1) }
    }

    #[must_use]
    pub fn scale(&self) -> usize {
        self.scale
    }
}

impl Default for NearestFilter {
    fn default() -> Self {
        Self::new(2)
    }
}

impl FrameFilter for NearestFilter {
    fn output_size(&self, width: usize, height: usize) -> (usize, usize) {
        (width * self.scale, height * self.scale)
    }

    fn apply(&self, input: &FramebufferView<'_>, output: &mut Vec<u32>) {
        let (width, height) = self.output_size(input.width(), input.height());
        output.clear();
        output.reserve(width * height);
        for y in 0..input.height() {
            let Some(row) = input.row(y) else { break };
            let start = output.len();
            for &pixel in row {
                output.extend(std::iter::repeat_n(pixel, self.scale));
            }
            for _ in 1..self.scale {
                output.extend_from_within(start..start + width);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_and_pixels() {
        let pixels: Vec<u32> = (0..6).collect();
        let view = FramebufferView::new(&pixels, 3, 2);
        assert_eq!(view.row(1), Some(&[3, 4, 5][..]));
        assert_eq!(view.row(2), None);
        assert_eq!(view.pixel(2, 0), Some(2));
        assert_eq!(view.pixel(3, 0), None);
    }

    #[test]
    fn nearest_replicates_pixels() {
        let pixels = [1, 2, 3, 4];
        let view = FramebufferView::new(&pixels, 2, 2);
        let filter = NearestFilter::new(2);
        let mut out = Vec::new();
        filter.apply(&view, &mut out);
        assert_eq!(filter.output_size(2, 2), (4, 4));
        assert_eq!(
            out,
            [1, 1, 2, 2, 1, 1, 2, 2, 3, 3, 4, 4, 3, 3, 4, 4],
            "each pixel becomes a 2x2 block"
        );
    }

    #[test]
    fn scale_one_is_identity() {
        let pixels = [7, 8, 9];
        let view = FramebufferView::new(&pixels, 3, 1);
        let mut out = vec![0; 10];
        NearestFilter::new(0).apply(&view, &mut out);
        assert_eq!(out, pixels);
    }
}
