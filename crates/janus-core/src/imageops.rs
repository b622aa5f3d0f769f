//! Shared RGB image operations for model preprocessing.

/// Resize a packed RGB image using bilinear interpolation.
///
/// `src` holds `src_w * src_h * 3` bytes; the result holds
/// `dst_w * dst_h * 3`. Sampling is center-aligned for sub-pixel accuracy.
pub fn resize_rgb_bilinear(
    src: &[u8],
    src_w: usize,
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
) -> Vec<u8> {
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return Vec::new();
    }

    let scale_x = src_w as f32 / dst_w as f32;
    let scale_y = src_h as f32 / dst_h as f32;
    let mut dst = vec![0u8; dst_w * dst_h * 3];

    for y in 0..dst_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, src_h as i32 - 1) as usize;
        let y1 = (y0 + 1).min(src_h - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..dst_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, src_w as i32 - 1) as usize;
            let x1 = (x0 + 1).min(src_w - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..3 {
                let tl = src[(y0 * src_w + x0) * 3 + c] as f32;
                let tr = src[(y0 * src_w + x1) * 3 + c] as f32;
                let bl = src[(y1 * src_w + x0) * 3 + c] as f32;
                let br = src[(y1 * src_w + x1) * 3 + c] as f32;

                let top = tl * (1.0 - fx) + tr * fx;
                let bot = bl * (1.0 - fx) + br * fx;
                let val = top * (1.0 - fy) + bot * fy;

                dst[(y * dst_w + x) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    dst
}

/// Copy a rectangular region out of a packed RGB image.
///
/// The region must lie within the source bounds.
pub fn crop_rgb(
    src: &[u8],
    src_w: usize,
    x0: usize,
    y0: usize,
    crop_w: usize,
    crop_h: usize,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(crop_w * crop_h * 3);
    for y in y0..y0 + crop_h {
        let row = (y * src_w + x0) * 3;
        out.extend_from_slice(&src[row..row + crop_w * 3]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_uniform_stays_uniform() {
        let src = vec![128u8; 16 * 16 * 3];
        let dst = resize_rgb_bilinear(&src, 16, 16, 32, 32);
        assert_eq!(dst.len(), 32 * 32 * 3);
        assert!(dst.iter().all(|&p| p == 128));
    }

    #[test]
    fn test_resize_identity_size() {
        let src: Vec<u8> = (0..4 * 4 * 3).map(|i| (i % 251) as u8).collect();
        let dst = resize_rgb_bilinear(&src, 4, 4, 4, 4);
        assert_eq!(dst, src);
    }

    #[test]
    fn test_resize_zero_dims() {
        assert!(resize_rgb_bilinear(&[], 0, 0, 10, 10).is_empty());
    }

    #[test]
    fn test_resize_preserves_channels() {
        // Red-only image must stay red-only through a resize.
        let mut src = vec![0u8; 8 * 8 * 3];
        for px in src.chunks_exact_mut(3) {
            px[0] = 200;
        }
        let dst = resize_rgb_bilinear(&src, 8, 8, 4, 4);
        for px in dst.chunks_exact(3) {
            assert_eq!(px[0], 200);
            assert_eq!(px[1], 0);
            assert_eq!(px[2], 0);
        }
    }

    #[test]
    fn test_crop_rgb() {
        // 4x2 image with pixel value = x index in the red channel.
        let mut src = vec![0u8; 4 * 2 * 3];
        for y in 0..2 {
            for x in 0..4 {
                src[(y * 4 + x) * 3] = x as u8;
            }
        }
        let crop = crop_rgb(&src, 4, 1, 0, 2, 2);
        assert_eq!(crop.len(), 2 * 2 * 3);
        assert_eq!(crop[0], 1); // (1,0) red
        assert_eq!(crop[3], 2); // (2,0) red
    }
}
