use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::debug;
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};

use crate::{error::ConversionErr, marshal::ShapeEntry, model::is_float};

pub const MODEL_JSON: &str = "model.json";
pub const SHARD_FILE: &str = "group1-shard1of1.bin";

/// What a successful conversion produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    /// Directory holding the serving artifact.
    pub output_path: PathBuf,
    /// The model's tensor shapes, in the order the flat weights follow.
    pub manifest: Vec<ShapeEntry>,
}

/// Turns a persisted model binary into a servable artifact.
///
/// Implementations must not keep state between calls, every call owns and
/// releases whatever it opens before returning.
pub trait Converter {
    /// Converts the model at `model_path`, writing the artifact into `out_dir`.
    ///
    /// # Args
    /// * `model_path` - The model binary to convert.
    /// * `out_dir` - An existing, empty directory for the serving artifact.
    ///
    /// # Returns
    /// The artifact location and the model's shape manifest.
    fn convert(&self, model_path: &Path, out_dir: &Path) -> Result<Conversion, ConversionErr>;
}

impl<C: Converter + ?Sized> Converter for Box<C> {
    fn convert(&self, model_path: &Path, out_dir: &Path) -> Result<Conversion, ConversionErr> {
        (**self).convert(model_path, out_dir)
    }
}

/// The `model.json` written next to the weight shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServingManifest {
    pub format: String,
    pub generated_by: String,
    pub weights_manifest: Vec<WeightGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightGroup {
    pub paths: Vec<String>,
    pub weights: Vec<WeightSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSpec {
    #[serde(flatten)]
    pub entry: ShapeEntry,
    pub dtype: String,
}

impl ServingManifest {
    pub fn read(dir: &Path) -> Result<Self, ConversionErr> {
        let path = dir.join(MODEL_JSON);
        let file = File::open(&path)?;

        serde_json::from_reader(BufReader::new(file)).map_err(|e| ConversionErr::InvalidModel {
            path,
            reason: e.to_string(),
        })
    }

    /// Every tensor shape of the first weight group, integer buffers
    /// included.
    pub fn shapes(&self) -> Vec<ShapeEntry> {
        self.weights_manifest
            .first()
            .map(|group| group.weights.iter().map(|w| w.entry.clone()).collect())
            .unwrap_or_default()
    }
}

/// Converts safetensors models into a single-shard serving layout:
/// `model.json` describing every tensor plus one binary shard holding the raw
/// tensor data back to back, tensors ordered by name. The returned manifest
/// only lists floating point tensors.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShardConverter;

impl ShardConverter {
    pub fn new() -> Self {
        Self
    }
}

impl Converter for ShardConverter {
    fn convert(&self, model_path: &Path, out_dir: &Path) -> Result<Conversion, ConversionErr> {
        let invalid = |reason: String| ConversionErr::InvalidModel {
            path: model_path.to_path_buf(),
            reason,
        };

        let bytes = fs::read(model_path)?;
        let tensors = SafeTensors::deserialize(&bytes).map_err(|e| invalid(e.to_string()))?;

        let mut named = tensors.tensors();
        named.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut shard = BufWriter::new(File::create(out_dir.join(SHARD_FILE))?);
        let mut weights = Vec::with_capacity(named.len());
        let mut manifest = Vec::with_capacity(named.len());

        for (name, view) in named {
            let entry = ShapeEntry::new(name, view.shape().to_vec());
            if is_float(view.dtype()) {
                entry.size().map_err(|e| invalid(e.to_string()))?;
                manifest.push(entry.clone());
            }

            shard.write_all(view.data())?;
            weights.push(WeightSpec {
                entry,
                dtype: format!("{:?}", view.dtype()).to_lowercase(),
            });
        }
        shard.flush()?;

        let serving = ServingManifest {
            format: "flat-shards".into(),
            generated_by: concat!("coordinator ", env!("CARGO_PKG_VERSION")).into(),
            weights_manifest: vec![WeightGroup {
                paths: vec![SHARD_FILE.into()],
                weights,
            }],
        };

        let mut file = BufWriter::new(File::create(out_dir.join(MODEL_JSON))?);
        serde_json::to_writer_pretty(&mut file, &serving).map_err(std::io::Error::from)?;
        file.flush()?;

        debug!("converted {} into {}", model_path.display(), out_dir.display());

        Ok(Conversion {
            output_path: out_dir.to_path_buf(),
            manifest,
        })
    }
}
