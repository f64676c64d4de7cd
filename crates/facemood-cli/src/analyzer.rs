//! Reads face inference results produced by the external model runner.
//!
//! For `photos/beach.jpg` the runner writes `<inference_dir>/beach.json`:
//!
//! ```json
//! {"detections": [{"descriptor": [0.01, ...], "expressions": {"happy": 0.93, "neutral": 0.05}}]}
//! ```

use facemood_core::{AnalyzerError, Detection, FaceAnalyzer};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct InferenceOutput {
    #[serde(default)]
    detections: Vec<Detection>,
}

#[derive(Debug, Clone)]
pub struct SidecarAnalyzer {
    dir: PathBuf,
}

impl SidecarAnalyzer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn sidecar_path(&self, image: &str) -> Option<PathBuf> {
        let stem = Path::new(image).file_stem()?;
        let mut name = stem.to_os_string();
        name.push(".json");
        Some(self.dir.join(name))
    }
}

impl FaceAnalyzer for SidecarAnalyzer {
    fn analyze(&mut self, image: &str) -> Result<Option<Detection>, AnalyzerError> {
        if !self.dir.is_dir() {
            return Err(AnalyzerError::ModelUnavailable(format!(
                "inference output directory {} does not exist",
                self.dir.display()
            )));
        }

        let sidecar = self
            .sidecar_path(image)
            .ok_or_else(|| AnalyzerError::Failed(format!("{image} has no file name")))?;

        let text = match std::fs::read_to_string(&sidecar) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AnalyzerError::ModelUnavailable(format!(
                    "no inference output for {image} (expected {})",
                    sidecar.display()
                )))
            }
            Err(e) => {
                return Err(AnalyzerError::Failed(format!("{}: {e}", sidecar.display())));
            }
        };

        let output: InferenceOutput = serde_json::from_str(&text)
            .map_err(|e| AnalyzerError::Failed(format!("{}: {e}", sidecar.display())))?;

        if output.detections.len() > 1 {
            tracing::debug!(
                image,
                faces = output.detections.len(),
                "multiple faces in image; using the first"
            );
        }

        Ok(output.detections.into_iter().next())
    }
}
