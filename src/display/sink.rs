//! Render sink: blit one color image onto a display surface.
//!
//! Stateless. The image is consumed on return whether or not a draw
//! happened; display is best-effort and never fails the pipeline.

use tracing::debug;

use crate::display::surface::DrawSurface;
use crate::pipeline::convert::ColorImage;

/// Background the target is wiped with before each blit.
const CLEAR_COLOR: [u8; 3] = [255, 255, 255];

/// Draw `image` centered and aspect-preserving onto `surface`.
pub fn render(image: ColorImage, surface: &mut dyn DrawSurface) {
    if !surface.is_valid() {
        debug!("surface not valid, dropping frame");
        return;
    }
    let Some(mut target) = surface.acquire_target() else {
        debug!("no draw target available, dropping frame");
        return;
    };

    target.fill(CLEAR_COLOR);

    if image.width > 0 && image.height > 0 && target.width > 0 && target.height > 0 {
        let scale = f64::min(
            f64::from(target.width) / f64::from(image.width),
            f64::from(target.height) / f64::from(image.height),
        );
        let dst_w = (f64::from(image.width) * scale).round() as u32;
        let dst_h = (f64::from(image.height) * scale).round() as u32;
        let left = (target.width - dst_w.min(target.width)) / 2;
        let top = (target.height - dst_h.min(target.height)) / 2;

        for dy in 0..dst_h.min(target.height) {
            let sy = ((f64::from(dy) / scale) as u32).min(image.height - 1);
            for dx in 0..dst_w.min(target.width) {
                let sx = ((f64::from(dx) / scale) as u32).min(image.width - 1);
                target.put_pixel(left + dx, top + dy, image.pixel(sx, sy));
            }
        }
    }

    surface.present(target);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::surface::DrawTarget;

    struct MockSurface {
        valid: bool,
        width: u32,
        height: u32,
        presented: Vec<DrawTarget>,
    }

    impl MockSurface {
        fn new(width: u32, height: u32) -> Self {
            Self {
                valid: true,
                width,
                height,
                presented: Vec::new(),
            }
        }
    }

    impl DrawSurface for MockSurface {
        fn is_valid(&self) -> bool {
            self.valid
        }

        fn acquire_target(&mut self) -> Option<DrawTarget> {
            Some(DrawTarget::new(self.width, self.height))
        }

        fn present(&mut self, target: DrawTarget) {
            self.presented.push(target);
        }
    }

    fn solid_image(width: u32, height: u32, rgb: [u8; 3]) -> ColorImage {
        let mut image = ColorImage::blank(width, height);
        for chunk in image.pixels.chunks_exact_mut(3) {
            chunk.copy_from_slice(&rgb);
        }
        image
    }

    #[test]
    fn invalid_surface_is_a_no_op() {
        let mut surface = MockSurface::new(4, 4);
        surface.valid = false;

        render(solid_image(2, 2, [10, 20, 30]), &mut surface);

        assert!(surface.presented.is_empty());
    }

    #[test]
    fn wide_image_is_letterboxed_vertically() {
        let mut surface = MockSurface::new(4, 4);

        // 2x1 image in a 4x4 surface: scale 2, blit occupies rows 1..3.
        render(solid_image(2, 1, [9, 9, 9]), &mut surface);

        let target = &surface.presented[0];
        for x in 0..4 {
            assert_eq!(target.pixel(x, 0), CLEAR_COLOR);
            assert_eq!(target.pixel(x, 1), [9, 9, 9]);
            assert_eq!(target.pixel(x, 2), [9, 9, 9]);
            assert_eq!(target.pixel(x, 3), CLEAR_COLOR);
        }
    }

    #[test]
    fn tall_image_is_pillarboxed_horizontally() {
        let mut surface = MockSurface::new(4, 4);

        // 1x2 image in a 4x4 surface: scale 2, blit occupies columns 1..3.
        render(solid_image(1, 2, [7, 7, 7]), &mut surface);

        let target = &surface.presented[0];
        for y in 0..4 {
            assert_eq!(target.pixel(0, y), CLEAR_COLOR);
            assert_eq!(target.pixel(1, y), [7, 7, 7]);
            assert_eq!(target.pixel(2, y), [7, 7, 7]);
            assert_eq!(target.pixel(3, y), CLEAR_COLOR);
        }
    }

    #[test]
    fn matching_aspect_fills_the_target() {
        let mut surface = MockSurface::new(4, 4);

        render(solid_image(2, 2, [5, 6, 7]), &mut surface);

        let target = &surface.presented[0];
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(target.pixel(x, y), [5, 6, 7]);
            }
        }
    }

    #[test]
    fn background_is_cleared_before_the_blit() {
        let mut surface = MockSurface::new(6, 2);

        // 1x1 image scaled to 2x2, centered; everything else is background.
        render(solid_image(1, 1, [1, 2, 3]), &mut surface);

        let target = &surface.presented[0];
        assert_eq!(target.pixel(0, 0), CLEAR_COLOR);
        assert_eq!(target.pixel(5, 1), CLEAR_COLOR);
        assert_eq!(target.pixel(2, 0), [1, 2, 3]);
        assert_eq!(target.pixel(3, 1), [1, 2, 3]);
    }
}
