//! Camera frame to packed RGB conversion for the preview surface

use jpeg_decoder::{Decoder, PixelFormat as JpegFormat};

use super::frame::{Frame, Orientation, PixelFormat, Plane};
use crate::error::DecodeError;

/// Packed 8-bit RGB image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RgbImage {
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.data[i], self.data[i + 1], self.data[i + 2]])
    }
}

/// Convert a frame to RGB, upright
pub fn decode_frame(frame: &Frame) -> Result<RgbImage, DecodeError> {
    let image = to_rgb(frame)?;
    Ok(rotate(image, frame.orientation()))
}

/// Convert a frame to RGB in sensor orientation
pub fn to_rgb(frame: &Frame) -> Result<RgbImage, DecodeError> {
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let format = frame.format();
    if frame.planes.len() < format.plane_count() {
        return Err(DecodeError::MissingPlanes {
            format,
            got: frame.planes.len(),
        });
    }
    if format != PixelFormat::Mjpeg && (w == 0 || h == 0) {
        return Err(DecodeError::EmptyFrame {
            width: frame.width(),
            height: frame.height(),
        });
    }
    let planes = &frame.planes;

    let data = match format {
        PixelFormat::Mjpeg => return decode_jpeg(&planes[0].data),
        PixelFormat::Rgb24 => packed(&planes[0], w, h, 3, |px| [px[0], px[1], px[2]])?,
        PixelFormat::Bgr24 => packed(&planes[0], w, h, 3, |px| [px[2], px[1], px[0]])?,
        PixelFormat::Rgba32 => packed(&planes[0], w, h, 4, |px| [px[0], px[1], px[2]])?,
        PixelFormat::Gray8 => packed(&planes[0], w, h, 1, |px| [px[0]; 3])?,
        PixelFormat::Yuyv4 => yuyv(&planes[0], w, h)?,
        PixelFormat::Nv12 => yuv420(&planes[0], &planes[1], &planes[1], 1, w, h)?,
        PixelFormat::Yuv420 => yuv420(&planes[0], &planes[1], &planes[2], 0, w, h)?,
    };
    Ok(RgbImage {
        width: w as u32,
        height: h as u32,
        data,
    })
}

fn decode_jpeg(data: &[u8]) -> Result<RgbImage, DecodeError> {
    let mut decoder = Decoder::new(data);
    let pixels = decoder.decode()?;
    let info = decoder.info().ok_or(DecodeError::Truncated)?;
    let data = match info.pixel_format {
        JpegFormat::RGB24 => pixels,
        JpegFormat::L8 => pixels.iter().flat_map(|&v| [v; 3]).collect(),
        other => return Err(DecodeError::UnsupportedJpeg(format!("{other:?}"))),
    };
    Ok(RgbImage {
        width: u32::from(info.width),
        height: u32::from(info.height),
        data,
    })
}

fn check(plane: &Plane, rows: usize, row_bytes: usize) -> Result<(), DecodeError> {
    if rows == 0 {
        return Ok(());
    }
    let needed = (rows - 1) * plane.row_stride + row_bytes;
    if plane.data.len() < needed || plane.row_stride < row_bytes {
        return Err(DecodeError::Truncated);
    }
    Ok(())
}

fn packed(
    plane: &Plane,
    w: usize,
    h: usize,
    bpp: usize,
    to_rgb: impl Fn(&[u8]) -> [u8; 3],
) -> Result<Vec<u8>, DecodeError> {
    check(plane, h, w * bpp)?;
    let mut out = Vec::with_capacity(w * h * 3);
    for row in plane.data.chunks(plane.row_stride).take(h) {
        for px in row[..w * bpp].chunks_exact(bpp) {
            out.extend_from_slice(&to_rgb(px));
        }
    }
    Ok(out)
}

fn yuyv(plane: &Plane, w: usize, h: usize) -> Result<Vec<u8>, DecodeError> {
    check(plane, h, w * 2)?;
    let mut out = Vec::with_capacity(w * h * 3);
    for row in plane.data.chunks(plane.row_stride).take(h) {
        for quad in row[..w * 2].chunks_exact(4) {
            let (u, v) = (quad[1], quad[3]);
            out.extend_from_slice(&yuv_to_rgb(quad[0], u, v));
            out.extend_from_slice(&yuv_to_rgb(quad[2], u, v));
        }
        // odd width leaves one luma sample without its pair
        if w % 2 == 1 {
            let i = (w - 1) * 2;
            out.extend_from_slice(&yuv_to_rgb(row[i], 128, 128));
        }
    }
    Ok(out)
}

/// 4:2:0 with chroma located by plane strides. `v_offset` is the byte
/// offset of V inside an interleaved chroma plane (NV12 keeps U and V in one).
fn yuv420(
    y_plane: &Plane,
    u_plane: &Plane,
    v_plane: &Plane,
    v_offset: usize,
    w: usize,
    h: usize,
) -> Result<Vec<u8>, DecodeError> {
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    check(y_plane, h, w)?;
    check(u_plane, ch, (cw - 1) * u_plane.pixel_stride + 1)?;
    check(v_plane, ch, (cw - 1) * v_plane.pixel_stride + 1 + v_offset)?;

    let mut out = Vec::with_capacity(w * h * 3);
    for y in 0..h {
        let luma = &y_plane.data[y * y_plane.row_stride..];
        let u_row = &u_plane.data[(y / 2) * u_plane.row_stride..];
        let v_row = &v_plane.data[(y / 2) * v_plane.row_stride + v_offset..];
        for x in 0..w {
            let u = u_row[(x / 2) * u_plane.pixel_stride];
            let v = v_row[(x / 2) * v_plane.pixel_stride];
            out.extend_from_slice(&yuv_to_rgb(luma[x], u, v));
        }
    }
    Ok(out)
}

/// BT.601 full-range, fixed point
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = i32::from(y);
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp(c + ((359 * e) >> 8)),
        clamp(c - ((88 * d + 183 * e) >> 8)),
        clamp(c + ((454 * d) >> 8)),
    ]
}

/// Rotate clockwise by `orientation`
pub fn rotate(image: RgbImage, orientation: Orientation) -> RgbImage {
    if orientation == Orientation::Deg0 {
        return image;
    }
    let (w, h) = (image.width as usize, image.height as usize);
    let (ow, oh) = if orientation.is_transposed() { (h, w) } else { (w, h) };
    let mut data = vec![0u8; image.data.len()];
    for y in 0..h {
        for x in 0..w {
            let (dx, dy) = match orientation {
                Orientation::Deg0 => (x, y),
                Orientation::Deg90 => (h - 1 - y, x),
                Orientation::Deg180 => (w - 1 - x, h - 1 - y),
                Orientation::Deg270 => (y, w - 1 - x),
            };
            let src = (y * w + x) * 3;
            let dst = (dy * ow + dx) * 3;
            data[dst..dst + 3].copy_from_slice(&image.data[src..src + 3]);
        }
    }
    RgbImage {
        width: ow as u32,
        height: oh as u32,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::FrameMetadata;
    use bytes::Bytes;

    fn frame(format: PixelFormat, w: u32, h: u32, planes: Vec<Plane>) -> Frame {
        Frame::new(
            planes,
            FrameMetadata {
                sequence: 0,
                width: w,
                height: h,
                format,
                orientation: Orientation::Deg0,
                device_timestamp: None,
            },
        )
    }

    #[test]
    fn bgr_is_swizzled_and_row_padding_skipped() {
        // 2x1 image, row stride 8 (2 bytes padding)
        let data = Bytes::from_static(&[1, 2, 3, 4, 5, 6, 0, 0]);
        let image = to_rgb(&frame(PixelFormat::Bgr24, 2, 1, vec![Plane::new(data, 8, 3)])).unwrap();
        assert_eq!(image.data, vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn neutral_chroma_is_gray() {
        let planes = vec![
            Plane::new(Bytes::from(vec![100; 4]), 2, 1),
            Plane::new(Bytes::from_static(&[128]), 1, 1),
            Plane::new(Bytes::from_static(&[128]), 1, 1),
        ];
        let image = to_rgb(&frame(PixelFormat::Yuv420, 2, 2, planes)).unwrap();
        assert!(image.data.iter().all(|&v| v == 100));

        let yuyv = Plane::new(Bytes::from_static(&[50, 128, 60, 128]), 4, 2);
        let image = to_rgb(&frame(PixelFormat::Yuyv4, 2, 1, vec![yuyv])).unwrap();
        assert_eq!(image.data, vec![50, 50, 50, 60, 60, 60]);
    }

    #[test]
    fn short_plane_is_rejected() {
        let data = Bytes::from_static(&[0; 5]);
        let err = to_rgb(&frame(PixelFormat::Rgb24, 2, 1, vec![Plane::new(data, 6, 3)])).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated));
    }

    #[test]
    fn zero_sized_frames_are_rejected() {
        let gray = Plane::new(Bytes::from_static(&[0; 4]), 4, 1);
        let err = to_rgb(&frame(PixelFormat::Gray8, 0, 4, vec![gray])).unwrap_err();
        assert!(matches!(err, DecodeError::EmptyFrame { width: 0, height: 4 }));

        let yuyv = Plane::new(Bytes::from_static(&[0; 4]), 4, 2);
        assert!(to_rgb(&frame(PixelFormat::Yuyv4, 0, 1, vec![yuyv])).is_err());

        let planes = vec![
            Plane::new(Bytes::from_static(&[0; 4]), 2, 1),
            Plane::new(Bytes::from_static(&[128]), 1, 1),
            Plane::new(Bytes::from_static(&[128]), 1, 1),
        ];
        let err = decode_frame(&frame(PixelFormat::Yuv420, 2, 0, planes)).unwrap_err();
        assert!(matches!(err, DecodeError::EmptyFrame { width: 2, height: 0 }));
    }

    #[test]
    fn quarter_turn_transposes() {
        // 2x1: red, green
        let image = RgbImage {
            width: 2,
            height: 1,
            data: vec![255, 0, 0, 0, 255, 0],
        };
        let rotated = rotate(image, Orientation::Deg90);
        assert_eq!((rotated.width, rotated.height), (1, 2));
        assert_eq!(rotated.pixel(0, 0), Some([255, 0, 0]));
        assert_eq!(rotated.pixel(0, 1), Some([0, 255, 0]));
    }
}
