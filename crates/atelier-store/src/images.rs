use std::path::{Path, PathBuf};

use tracing::{debug, info};

use atelier_core::ids::GenerationId;
use atelier_core::image::ImageData;

use crate::error::StoreError;

/// Filesystem-backed image storage.
///
/// References are bare file names (`gen_..._.png`), stable across restarts
/// and safe to embed as HTTP path segments. Anything that is not a plain
/// file name is rejected before it touches the filesystem.
pub struct ImageStore {
    base_dir: PathBuf,
}

impl ImageStore {
    pub fn open(base_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(base_dir)
            .map_err(|e| StoreError::Io(format!("create image dir: {e}")))?;
        info!(path = %base_dir.display(), "image store opened");
        Ok(Self {
            base_dir: base_dir.to_owned(),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Persist a rendered image, returning its opaque reference.
    pub fn save(&self, image: &ImageData, id: &GenerationId) -> Result<String, StoreError> {
        let reference = format!("{id}.png");
        let path = self.resolve(&reference)?;
        std::fs::write(&path, image.png_bytes())
            .map_err(|e| StoreError::Io(format!("write image: {e}")))?;
        debug!(reference = %reference, bytes = image.png_bytes().len(), "image saved");
        Ok(reference)
    }

    /// Create and persist a square thumbnail for a stored image, returning
    /// the thumbnail's reference.
    pub fn save_thumbnail(
        &self,
        image: &ImageData,
        id: &GenerationId,
        size: u32,
    ) -> Result<String, StoreError> {
        let reference = format!("{id}_thumb.jpg");
        let path = self.resolve(&reference)?;
        let jpeg = image.thumbnail_jpeg(size)?;
        std::fs::write(&path, jpeg)
            .map_err(|e| StoreError::Io(format!("write thumbnail: {e}")))?;
        Ok(reference)
    }

    /// Load an image back by reference.
    pub fn load(&self, reference: &str) -> Result<ImageData, StoreError> {
        let bytes = self.read_bytes(reference)?;
        Ok(ImageData::from_png_bytes(bytes)?)
    }

    /// Raw file bytes for a reference (used when serving over HTTP, where
    /// re-decoding would be wasted work).
    pub fn read_bytes(&self, reference: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(reference)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("image {reference}")))
            }
            Err(e) => Err(StoreError::Io(format!("read image: {e}"))),
        }
    }

    pub fn exists(&self, reference: &str) -> bool {
        self.resolve(reference).map(|p| p.exists()).unwrap_or(false)
    }

    /// Validate a reference and resolve it inside the base directory.
    fn resolve(&self, reference: &str) -> Result<PathBuf, StoreError> {
        if reference.is_empty()
            || reference.starts_with('.')
            || !reference
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(StoreError::InvalidReference(reference.to_string()));
        }
        Ok(self.base_dir.join(reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (ImageStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("atelier-images-test-{}", uuid::Uuid::now_v7()));
        let store = ImageStore::open(&dir).unwrap();
        (store, dir)
    }

    #[test]
    fn save_and_load_roundtrip() {
        let (store, dir) = temp_store();
        let img = ImageData::solid(32, 32, [9, 9, 9]);
        let id = GenerationId::new();

        let reference = store.save(&img, &id).unwrap();
        assert!(reference.ends_with(".png"));
        assert!(reference.starts_with("gen_"));

        let loaded = store.load(&reference).unwrap();
        assert_eq!(loaded.width(), 32);
        assert_eq!(loaded.height(), 32);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn thumbnail_reference_is_distinct() {
        let (store, dir) = temp_store();
        let img = ImageData::solid(64, 64, [1, 2, 3]);
        let id = GenerationId::new();
        store.save(&img, &id).unwrap();
        let thumb_ref = store.save_thumbnail(&img, &id, 16).unwrap();
        assert!(thumb_ref.ends_with("_thumb.jpg"));
        assert!(store.exists(&thumb_ref));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn load_missing_reference_is_not_found() {
        let (store, dir) = temp_store();
        let result = store.load("gen_does_not_exist.png");
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn traversal_references_rejected() {
        let (store, dir) = temp_store();
        for bad in ["../secret.png", "..", "a/b.png", "", ".hidden", "a\\b.png"] {
            let result = store.read_bytes(bad);
            assert!(
                matches!(result, Err(StoreError::InvalidReference(_))),
                "expected rejection for {bad:?}"
            );
        }
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn exists_reflects_saved_images() {
        let (store, dir) = temp_store();
        let id = GenerationId::new();
        let reference = format!("{id}.png");
        assert!(!store.exists(&reference));
        store.save(&ImageData::solid(8, 8, [0, 0, 0]), &id).unwrap();
        assert!(store.exists(&reference));
        let _ = std::fs::remove_dir_all(dir);
    }
}
