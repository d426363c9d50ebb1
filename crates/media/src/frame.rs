use crate::mocap::MOCAP_COLUMNS;

/// One rendered unit of media. Video frames are RGBA8; mocap frames are a
/// normalized row of 22 body segments times 6 floats.
#[derive(Debug, Clone)]
pub enum Frame {
    Video(image::RgbaImage),
    Mocap(Vec<f32>),
}

impl Frame {
    /// Black placeholder shown when a scrubbed-to video frame cannot be
    /// decoded.
    pub fn blank_video(width: u32, height: u32) -> Self {
        Frame::Video(image::RgbaImage::new(width.max(1), height.max(1)))
    }

    pub fn blank_mocap() -> Self {
        Frame::Mocap(vec![0.0; MOCAP_COLUMNS])
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Frame::Video(img) => img.pixels().all(|p| p.0 == [0, 0, 0, 0]),
            Frame::Mocap(row) => row.iter().all(|v| *v == 0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_constructors_are_blank() {
        assert!(Frame::blank_video(4, 4).is_blank());
        assert!(Frame::blank_mocap().is_blank());
        let mut img = image::RgbaImage::new(2, 2);
        img.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        assert!(!Frame::Video(img).is_blank());
    }

    #[test]
    fn blank_video_never_has_zero_size() {
        let Frame::Video(img) = Frame::blank_video(0, 0) else {
            unreachable!()
        };
        assert_eq!(img.dimensions(), (1, 1));
    }
}
