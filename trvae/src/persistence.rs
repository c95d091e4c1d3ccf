use crate::config::TrvaeConfig;
use crate::model::Trvae;

use candle_core::{Device, Tensor};
use log::info;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";
pub const MODEL_FILE: &str = "mmd_cvae.safetensors";
pub const ENCODER_FILE: &str = "encoder.safetensors";
pub const DECODER_FILE: &str = "decoder.safetensors";

/// The artifacts of a model directory
pub fn model_files(dir: &Path) -> [PathBuf; 4] {
    [CONFIG_FILE, MODEL_FILE, ENCODER_FILE, DECODER_FILE].map(|f| dir.join(f))
}

impl Trvae {
    fn require_model_path(&self) -> anyhow::Result<&Path> {
        self.model_path()
            .ok_or_else(|| anyhow::anyhow!("no model directory was given"))
    }

    /// Parameters whose names start with `prefix`
    fn named_tensors(&self, prefix: &str) -> anyhow::Result<HashMap<String, Tensor>> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|e| anyhow::anyhow!("parameter lock: {}", e))?;
        Ok(data
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect())
    }

    /// Write the configuration, the full parameter set and the encoder
    /// and decoder parameters into the model directory
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = self.require_model_path()?;
        std::fs::create_dir_all(dir)?;
        let [config_file, model_file, encoder_file, decoder_file] = model_files(dir);

        let writer = std::io::BufWriter::new(std::fs::File::create(&config_file)?);
        serde_json::to_writer_pretty(writer, &self.config)?;

        self.varmap.save(&model_file)?;
        candle_core::safetensors::save(&self.named_tensors("encoder.")?, &encoder_file)?;
        candle_core::safetensors::save(&self.named_tensors("decoder.")?, &decoder_file)?;

        info!("saved the model to {}", dir.display());
        Ok(())
    }

    /// Overwrite the parameters by the ones stored in the model
    /// directory. Every artifact must exist and match the parameter
    /// layout; nothing is changed otherwise.
    pub fn restore(&mut self) -> anyhow::Result<()> {
        let dir = self.require_model_path()?.to_path_buf();

        if let Some(missing) = model_files(&dir).iter().find(|f| !f.exists()) {
            return Err(anyhow::anyhow!("missing model file {}", missing.display()));
        }
        let [_, model_file, encoder_file, decoder_file] = model_files(&dir);

        let stored = candle_core::safetensors::load(&model_file, &self.device)?;
        let enc_names = candle_core::safetensors::load(&encoder_file, &Device::Cpu)?;
        let dec_names = candle_core::safetensors::load(&decoder_file, &Device::Cpu)?;

        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|e| anyhow::anyhow!("parameter lock: {}", e))?;

        for (name, var) in data.iter() {
            let value = stored
                .get(name)
                .ok_or_else(|| anyhow::anyhow!("{}: no parameter {}", model_file.display(), name))?;
            if value.dims() != var.dims() {
                return Err(anyhow::anyhow!(
                    "{}: {} has shape {:?}, but expected {:?}",
                    model_file.display(),
                    name,
                    value.dims(),
                    var.dims()
                ));
            }
            let part = if name.starts_with("encoder.") {
                &enc_names
            } else {
                &dec_names
            };
            if !part.contains_key(name) {
                return Err(anyhow::anyhow!("{} missing from the encoder/decoder files", name));
            }
        }

        for (name, var) in data.iter() {
            if let Some(value) = stored.get(name) {
                var.set(&value.to_dtype(var.dtype())?)?;
            }
        }

        info!("restored {} parameters from {}", data.len(), dir.display());
        Ok(())
    }

    /// Rebuild a model from its directory
    pub fn load(dir: &Path, device: &Device) -> anyhow::Result<Self> {
        let config_file = dir.join(CONFIG_FILE);
        let reader = std::io::BufReader::new(std::fs::File::open(&config_file).map_err(|e| {
            anyhow::anyhow!("failed to open {}: {}", config_file.display(), e)
        })?);
        let config: TrvaeConfig = serde_json::from_reader(reader)?;

        let mut model = Self::new(config, Some(dir), device)?;
        model.restore()?;
        Ok(model)
    }
}
