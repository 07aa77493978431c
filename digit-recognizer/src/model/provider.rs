use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use log::{info, warn};
use prost::Message;

use crate::{onnx_format::ModelProto, service::RecognitionError};

use super::{Config, ModelLoadError, ModelProvider, OnnxModel};

#[derive(Clone, Debug)]
enum ModelSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// Acquires an [`OnnxModel`] from a file or from an in-memory artifact.
///
/// ```no_run
/// use digit_recognizer::model::{Config, ModelProvider, OnnxModelProvider};
///
/// let model = OnnxModelProvider::from_path("models/mnist.onnx")
///     .config(Config { num_threads: 4 })
///     .acquire()?;
/// # Ok::<(), digit_recognizer::service::RecognitionError>(())
/// ```
#[derive(Clone, Debug)]
pub struct OnnxModelProvider {
    source: ModelSource,
    config: Config,
}

impl OnnxModelProvider {
    pub fn from_path<P: AsRef<Path>>(model_path: P) -> Self {
        Self {
            source: ModelSource::Path(model_path.as_ref().to_path_buf()),
            config: Config::default(),
        }
    }

    /// Uses an artifact bundled with the application, for example through `include_bytes!`.
    pub fn from_bytes(artifact: impl Into<Vec<u8>>) -> Self {
        Self {
            source: ModelSource::Bytes(artifact.into()),
            config: Config::default(),
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    fn load(&self) -> Result<OnnxModel, ModelLoadError> {
        let model_proto = match &self.source {
            ModelSource::Path(path) => {
                info!("Reading model from {}", path.display());
                read_model_proto(path)?
            }
            ModelSource::Bytes(bytes) => ModelProto::decode(bytes.as_slice())?,
        };
        OnnxModel::new(model_proto, self.config.clone())
    }
}

impl ModelProvider for OnnxModelProvider {
    type Model = OnnxModel;

    fn acquire(&self) -> Result<OnnxModel, RecognitionError> {
        self.load().map_err(|e| {
            warn!("Model acquisition failed: {}", e);
            RecognitionError::ModelLoad(e)
        })
    }
}

/// Read an ONNX model from the given path.
pub fn read_model_proto<P>(path: P) -> Result<ModelProto, ModelLoadError>
where
    P: AsRef<Path>,
{
    let mut buffer = Vec::new();
    let mut file = File::open(path)?;
    file.read_to_end(&mut buffer)?;

    Ok(ModelProto::decode(buffer.as_slice())?)
}
