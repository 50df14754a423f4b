use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use parking_lot::Mutex;

use crate::error::StoreError;

/// Extensions accepted by the filesystem store (compared case-insensitively)
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Source and sink of the images being aligned, addressed by name.
///
/// Shared across worker threads; `save` may be called concurrently.
pub trait ImageStore: Send + Sync {
    /// Image names in processing order; the first is the reference.
    fn names(&self) -> Result<Vec<String>, StoreError>;
    fn load(&self, name: &str) -> Result<DynamicImage, StoreError>;
    fn save(&self, name: &str, image: &DynamicImage) -> Result<(), StoreError>;
    /// Read back an image persisted by `save`.
    fn load_output(&self, name: &str) -> Result<DynamicImage, StoreError>;
}

/// Resolution reduction applied while loading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sampling {
    #[default]
    Full,
    Half,
    Quarter,
}

impl Sampling {
    /// Parse the optional command-line factor; anything but 1, 2 or 4 means full resolution.
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg.map(str::trim) {
            None | Some("1") => Sampling::Full,
            Some("2") => {
                tracing::info!("downscaling by factor 2");
                Sampling::Half
            }
            Some("4") => {
                tracing::info!("downscaling by factor 4");
                Sampling::Quarter
            }
            Some(other) => {
                tracing::warn!(factor = other, "unsupported sampling factor, no downscaling");
                Sampling::Full
            }
        }
    }

    pub fn factor(self) -> u32 {
        match self {
            Sampling::Full => 1,
            Sampling::Half => 2,
            Sampling::Quarter => 4,
        }
    }

    /// Reduce `image` by the factor, rounding dimensions up
    pub fn apply(self, image: DynamicImage) -> DynamicImage {
        let f = self.factor();
        if f == 1 {
            return image;
        }
        let (w, h) = image.dimensions();
        image.resize_exact(w.div_ceil(f).max(1), h.div_ceil(f).max(1), FilterType::Triangle)
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// Directory-backed store: reads from `input`, writes under `output` with the same file names
#[derive(Debug, Clone)]
pub struct FsImageStore {
    input: PathBuf,
    output: PathBuf,
    sampling: Sampling,
}

impl FsImageStore {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            sampling: Sampling::Full,
        }
    }

    pub fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn input_dir(&self) -> &Path {
        &self.input
    }

    pub fn output_dir(&self) -> &Path {
        &self.output
    }

    pub fn sampling(&self) -> Sampling {
        self.sampling
    }
}

impl ImageStore for FsImageStore {
    fn names(&self) -> Result<Vec<String>, StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.input.clone(),
            source,
        };

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.input).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if !path.is_file() || !has_image_extension(&path) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn load(&self, name: &str) -> Result<DynamicImage, StoreError> {
        let path = self.input.join(name);
        if !path.is_file() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        tracing::debug!(name, "reading");
        let image = image::open(&path).map_err(|source| StoreError::Image {
            name: name.to_string(),
            source,
        })?;
        Ok(self.sampling.apply(image))
    }

    fn save(&self, name: &str, image: &DynamicImage) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.output).map_err(|source| StoreError::Io {
            path: self.output.clone(),
            source,
        })?;
        let path = self.output.join(name);
        tracing::info!(path = %path.display(), "writing");
        image.save(&path).map_err(|source| StoreError::Image {
            name: name.to_string(),
            source,
        })
    }

    fn load_output(&self, name: &str) -> Result<DynamicImage, StoreError> {
        let path = self.output.join(name);
        if !path.is_file() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        image::open(&path).map_err(|source| StoreError::Image {
            name: name.to_string(),
            source,
        })
    }
}

/// In-memory store; inputs are listed in name order, outputs are kept for inspection
#[derive(Debug, Default)]
pub struct MemoryImageStore {
    inputs: BTreeMap<String, DynamicImage>,
    outputs: Mutex<BTreeMap<String, DynamicImage>>,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, name: impl Into<String>, image: DynamicImage) -> Self {
        self.insert(name, image);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, image: DynamicImage) {
        self.inputs.insert(name.into(), image);
    }

    /// Image persisted under `name`, if any
    pub fn output(&self, name: &str) -> Option<DynamicImage> {
        self.outputs.lock().get(name).cloned()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs.lock().keys().cloned().collect()
    }
}

impl ImageStore for MemoryImageStore {
    fn names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.inputs.keys().cloned().collect())
    }

    fn load(&self, name: &str) -> Result<DynamicImage, StoreError> {
        self.inputs
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn save(&self, name: &str, image: &DynamicImage) -> Result<(), StoreError> {
        self.outputs.lock().insert(name.to_string(), image.clone());
        Ok(())
    }

    fn load_output(&self, name: &str) -> Result<DynamicImage, StoreError> {
        self.output(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }
}
