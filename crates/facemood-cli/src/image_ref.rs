//! What gets stored as an observation's image reference.

use base64::Engine;
use std::io;
use std::path::{Path, PathBuf};

/// The image's absolute path, or the image inlined as a `data:` URL.
pub fn image_ref(path: &Path, embed: bool) -> io::Result<String> {
    if embed {
        let bytes = std::fs::read(path)?;
        data_url(&bytes)
    } else {
        Ok(std::fs::canonicalize(path)?.display().to_string())
    }
}

/// Encode image bytes as `data:<mime>;base64,...`.
pub fn data_url(bytes: &[u8]) -> io::Result<String> {
    let format = image::guess_format(bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{};base64,{encoded}", format.to_mime_type()))
}

/// Image files directly inside `dir`, sorted by path.
pub fn list_images(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && image::ImageFormat::from_path(&path).is_ok() {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_SIGNATURE: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

    #[test]
    fn test_data_url_png() {
        let url = data_url(PNG_SIGNATURE).unwrap();
        assert!(url.starts_with("data:image/png;base64,"), "{url}");
    }

    #[test]
    fn test_data_url_rejects_non_image() {
        let err = data_url(b"plain text").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_list_images_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.jpg", "a.png", "notes.txt", "c.json"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.jpg")).unwrap();

        let images = list_images(dir.path()).unwrap();
        let names: Vec<_> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, ["a.png", "b.jpg"]);
    }

    #[test]
    fn test_path_reference_is_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(&path, b"x").unwrap();
        let reference = image_ref(&path, false).unwrap();
        assert!(Path::new(&reference).is_absolute());
    }
}
