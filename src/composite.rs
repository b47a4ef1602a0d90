use crate::error::{ScrimError, ScrimResult};

pub type PremulRgba8 = [u8; 4];

/// How an offscreen buffer (or a single draw) lands on its destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendMode {
    SrcOver,
    /// Keep destination only where the source has coverage.
    DstIn,
    /// Erase destination where the source has coverage.
    DstOut,
}

pub fn src_over(dst: PremulRgba8, src: PremulRgba8, opacity: f32) -> PremulRgba8 {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || src[3] == 0 {
        return dst;
    }

    let op = ((opacity * 255.0).round() as i32).clamp(0, 255) as u16;
    let sa = mul_div255(u16::from(src[3]), op);
    if sa == 0 {
        return dst;
    }

    let inv = 255u16 - u16::from(sa);

    let mut out = [0u8; 4];
    out[3] = add_sat_u8(sa, mul_div255(u16::from(dst[3]), inv));

    for i in 0..3 {
        let sc = mul_div255(u16::from(src[i]), op);
        let dc = mul_div255(u16::from(dst[i]), inv);
        out[i] = add_sat_u8(sc, dc);
    }
    out
}

pub fn dst_in(dst: PremulRgba8, src: PremulRgba8, opacity: f32) -> PremulRgba8 {
    let opacity = opacity.clamp(0.0, 1.0);
    let op = ((opacity * 255.0).round() as i32).clamp(0, 255) as u16;
    let keep = mul_div255(u16::from(src[3]), op);

    let mut out = [0u8; 4];
    for i in 0..4 {
        out[i] = mul_div255(u16::from(dst[i]), u16::from(keep));
    }
    out
}

pub fn dst_out(dst: PremulRgba8, src: PremulRgba8, opacity: f32) -> PremulRgba8 {
    let opacity = opacity.clamp(0.0, 1.0);
    let op = ((opacity * 255.0).round() as i32).clamp(0, 255) as u16;
    let erase = mul_div255(u16::from(src[3]), op);
    let keep = 255u16 - u16::from(erase);

    let mut out = [0u8; 4];
    for i in 0..4 {
        out[i] = mul_div255(u16::from(dst[i]), keep);
    }
    out
}

pub fn blend(dst: PremulRgba8, src: PremulRgba8, mode: BlendMode, opacity: f32) -> PremulRgba8 {
    match mode {
        BlendMode::SrcOver => src_over(dst, src, opacity),
        BlendMode::DstIn => dst_in(dst, src, opacity),
        BlendMode::DstOut => dst_out(dst, src, opacity),
    }
}

/// Blend `src` onto `dst` in place across a pixel row range of each scanline.
/// Both buffers must be full `width * height * 4` rgba8 planes.
pub fn blend_region_in_place(
    dst: &mut [u8],
    src: &[u8],
    width: usize,
    region: PixelRegion,
    mode: BlendMode,
    opacity: f32,
) -> ScrimResult<()> {
    if dst.len() != src.len() || !dst.len().is_multiple_of(4) {
        return Err(ScrimError::render(
            "blend_region_in_place expects equal-length rgba8 buffers",
        ));
    }
    let height = if width == 0 { 0 } else { dst.len() / 4 / width };
    let region = region.clamped(width, height);
    if region.is_empty() {
        return Ok(());
    }

    for y in region.y0..region.y1 {
        let row = y * width;
        for x in region.x0..region.x1 {
            let i = (row + x) * 4;
            let d = [dst[i], dst[i + 1], dst[i + 2], dst[i + 3]];
            let s = [src[i], src[i + 1], src[i + 2], src[i + 3]];
            let out = blend(d, s, mode, opacity);
            dst[i..i + 4].copy_from_slice(&out);
        }
    }
    Ok(())
}

/// Half-open integer pixel rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRegion {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl PixelRegion {
    pub fn full(width: usize, height: usize) -> Self {
        Self {
            x0: 0,
            y0: 0,
            x1: width,
            y1: height,
        }
    }

    /// Conservative (outward-rounded) pixel cover of a float rect.
    pub fn from_rect(rect: kurbo::Rect) -> Self {
        Self {
            x0: rect.x0.floor().max(0.0) as usize,
            y0: rect.y0.floor().max(0.0) as usize,
            x1: rect.x1.ceil().max(0.0) as usize,
            y1: rect.y1.ceil().max(0.0) as usize,
        }
    }

    pub fn clamped(self, width: usize, height: usize) -> Self {
        Self {
            x0: self.x0.min(width),
            y0: self.y0.min(height),
            x1: self.x1.min(width),
            y1: self.y1.min(height),
        }
    }

    pub fn is_empty(self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}

fn add_sat_u8(a: u8, b: u8) -> u8 {
    a.saturating_add(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn src_over_opacity_0_is_noop() {
        let dst = [1, 2, 3, 4];
        let src = [200, 200, 200, 200];
        assert_eq!(src_over(dst, src, 0.0), dst);
    }

    #[test]
    fn src_over_opaque_replaces_dst() {
        let dst = [0, 0, 0, 255];
        let src = [255, 0, 0, 255];
        assert_eq!(src_over(dst, src, 1.0), src);
    }

    #[test]
    fn dst_in_keeps_only_covered_pixels() {
        let dst = [100, 110, 120, 255];
        assert_eq!(dst_in(dst, [0, 0, 0, 255], 1.0), dst);
        assert_eq!(dst_in(dst, [0, 0, 0, 0], 1.0), [0, 0, 0, 0]);
    }

    #[test]
    fn dst_in_scales_by_src_alpha() {
        let dst = [200, 200, 200, 200];
        let out = dst_in(dst, [0, 0, 0, 128], 1.0);
        assert!(out[3] > 98 && out[3] < 103, "alpha was {}", out[3]);
    }

    #[test]
    fn dst_out_erases_covered_pixels() {
        let dst = [100, 110, 120, 255];
        assert_eq!(dst_out(dst, [0, 0, 0, 255], 1.0), [0, 0, 0, 0]);
        assert_eq!(dst_out(dst, [0, 0, 0, 0], 1.0), dst);
    }

    #[test]
    fn dst_out_honors_opacity() {
        let dst = [0, 0, 0, 200];
        let out = dst_out(dst, [0, 0, 0, 255], 0.5);
        assert!(out[3] > 90 && out[3] < 110, "alpha was {}", out[3]);
    }

    #[test]
    fn blend_region_respects_bounds() {
        let width = 4usize;
        let mut dst = vec![0u8; width * 2 * 4];
        let src = vec![255u8; width * 2 * 4];
        let region = PixelRegion {
            x0: 1,
            y0: 0,
            x1: 3,
            y1: 1,
        };
        blend_region_in_place(&mut dst, &src, width, region, BlendMode::SrcOver, 1.0).unwrap();

        let alpha_at = |x: usize, y: usize| dst[(y * width + x) * 4 + 3];
        assert_eq!(alpha_at(0, 0), 0);
        assert_eq!(alpha_at(1, 0), 255);
        assert_eq!(alpha_at(2, 0), 255);
        assert_eq!(alpha_at(3, 0), 0);
        assert_eq!(alpha_at(1, 1), 0);
    }

    #[test]
    fn blend_region_rejects_mismatched_buffers() {
        let mut dst = vec![0u8; 16];
        let src = vec![0u8; 12];
        let err = blend_region_in_place(
            &mut dst,
            &src,
            2,
            PixelRegion::full(2, 2),
            BlendMode::SrcOver,
            1.0,
        );
        assert!(err.is_err());
    }
}
