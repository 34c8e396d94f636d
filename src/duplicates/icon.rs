//! Perceptual icons: a gradient hash plus the aspect ratio of a frame, used
//! to decide whether two frames show the same picture despite re-encoding.

use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig, ImageHash};

/// Hash edge length; hashes are `HASH_SIZE * HASH_SIZE` bits.
pub const HASH_SIZE: u32 = 8;

/// Largest Hamming distance still counted as the same picture.
const MAX_HASH_DISTANCE: u32 = 10;
const MAX_ASPECT_DIFFERENCE: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct Icon {
    hash: ImageHash,
    aspect: f64,
}

impl Icon {
    pub fn new(img: &DynamicImage) -> Self {
        let aspect = if img.height() == 0 {
            0.0
        } else {
            img.width() as f64 / img.height() as f64
        };
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Gradient)
            .hash_size(HASH_SIZE, HASH_SIZE)
            .to_hasher();

        Self {
            hash: hasher.hash_image(img),
            aspect,
        }
    }

    pub fn aspect(&self) -> f64 {
        self.aspect
    }

    /// Hamming distance between the two hashes.
    pub fn distance(&self, other: &Icon) -> u32 {
        self.hash.dist(&other.hash)
    }

    /// Whether two icons most likely come from the same picture.
    pub fn similar(&self, other: &Icon) -> bool {
        let wider = self.aspect.max(other.aspect);
        if wider <= 0.0 || (self.aspect - other.aspect).abs() / wider > MAX_ASPECT_DIFFERENCE {
            return false;
        }
        self.distance(other) <= MAX_HASH_DISTANCE
    }
}
