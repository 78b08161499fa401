//! Single-shot enrollment: one captured frame becomes `<images_dir>/<key>.jpg`.

use crate::identity::IdentityKey;
use crate::session::FrameSource;
use image::ImageFormat;
use rollcall_hw::{CameraError, FrameError};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("capture failed: {0}")]
    Capture(#[from] CameraError),
    #[error("frame conversion failed: {0}")]
    Frame(#[from] FrameError),
    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Capture one frame after `warmup` and save it as the reference photo for `key`.
///
/// `images_dir` is created if missing. An existing photo for the same key is
/// replaced. Nothing is written when the capture fails.
pub fn enroll(
    source: &mut dyn FrameSource,
    images_dir: &Path,
    key: &IdentityKey,
    warmup: Duration,
) -> Result<PathBuf, EnrollError> {
    std::fs::create_dir_all(images_dir).map_err(|source| EnrollError::CreateDir {
        path: images_dir.to_path_buf(),
        source,
    })?;

    if !warmup.is_zero() {
        tracing::debug!(?warmup, "waiting for camera to settle");
        std::thread::sleep(warmup);
    }

    let frame = source.next_frame()?;
    let rgb = frame.to_rgb()?;

    let mut jpeg = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)?;

    let path = key.reference_path(images_dir);
    std::fs::write(&path, &jpeg).map_err(|source| EnrollError::Write {
        path: path.clone(),
        source,
    })?;

    tracing::info!(key = %key, path = %path.display(), bytes = jpeg.len(), "reference photo saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_hw::{ChannelOrder, Frame};

    struct OneShot(Option<Frame>);

    impl FrameSource for OneShot {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            self.0
                .take()
                .ok_or_else(|| CameraError::CaptureFailed("no frame".into()))
        }
    }

    fn centre(path: &Path) -> [u8; 3] {
        let img = image::open(path).unwrap().to_rgb8();
        img.get_pixel(img.width() / 2, img.height() / 2).0
    }

    fn close(a: [u8; 3], b: [u8; 3]) -> bool {
        a.iter().zip(b).all(|(&x, y)| x.abs_diff(y) <= 12)
    }

    #[test]
    fn test_enroll_writes_jpeg_named_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        let key = IdentityKey::normalize("  Alice ").unwrap();

        let path = enroll(
            &mut OneShot(Some(Frame::solid(64, 48, [200, 40, 40]))),
            &images,
            &key,
            Duration::ZERO,
        )
        .unwrap();

        assert_eq!(path, images.join("alice.jpg"));
        assert_eq!(image::image_dimensions(&path).unwrap(), (64, 48));
        assert!(close(centre(&path), [200, 40, 40]));
    }

    #[test]
    fn test_enroll_overwrites_previous_photo() {
        let dir = tempfile::tempdir().unwrap();
        let key = IdentityKey::normalize("bob").unwrap();

        let red = Frame::solid(32, 32, [200, 40, 40]);
        let blue = Frame::solid(32, 32, [40, 40, 200]);
        enroll(&mut OneShot(Some(red)), dir.path(), &key, Duration::ZERO).unwrap();
        let path = enroll(&mut OneShot(Some(blue)), dir.path(), &key, Duration::ZERO).unwrap();

        assert!(close(centre(&path), [40, 40, 200]));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_bgr_frame_saved_as_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let key = IdentityKey::normalize("carol").unwrap();
        let bgr = [40u8, 40, 200].repeat(32 * 32);
        let frame = Frame::new(bgr, 32, 32, ChannelOrder::Bgr).unwrap();

        let path = enroll(&mut OneShot(Some(frame)), dir.path(), &key, Duration::ZERO).unwrap();
        assert!(close(centre(&path), [200, 40, 40]));
    }

    #[test]
    fn test_failed_capture_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        let key = IdentityKey::normalize("dave").unwrap();

        let err = enroll(&mut OneShot(None), &images, &key, Duration::ZERO).unwrap_err();

        assert!(matches!(err, EnrollError::Capture(_)));
        assert!(images.is_dir());
        assert_eq!(std::fs::read_dir(&images).unwrap().count(), 0);
    }
}
