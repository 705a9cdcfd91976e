//! Top-level model configuration.
//!
//! One JSON document describes a whole model: feature count, flow layout with its spline
//! settings, the GLM family and the training schedule. Omitted sections take their defaults.

use burn_core as burn;

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use crate::diglm::Diglm;
use crate::glm::Glm;
use crate::nsf::{NeuralSplineFlow, NeuralSplineFlowConfig};
use crate::train::DiglmTrainConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiglmConfig {
    pub num_features: usize,
    pub flow: NeuralSplineFlowConfig,
    #[serde(default)]
    pub glm: Glm,
    #[serde(default)]
    pub train: DiglmTrainConfig,
    /// Seeds the backend RNG before the networks are initialized. The backend RNG is
    /// process-wide, so concurrent `init` calls share it.
    #[serde(default)]
    pub init_seed: Option<u64>,
}

impl DiglmConfig {
    pub fn new(num_features: usize, flow: NeuralSplineFlowConfig) -> Self {
        Self {
            num_features,
            flow,
            glm: Glm::default(),
            train: DiglmTrainConfig::default(),
            init_seed: None,
        }
    }

    pub fn with_init_seed(mut self, seed: u64) -> Self {
        self.init_seed = Some(seed);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks that need no device: layout, masks, spline settings and training schedule.
    pub fn validate(&self) -> Result<()> {
        if self.num_features < 2 {
            return Err(Error::Config(format!(
                "coupling flows need num_features >= 2, got {}",
                self.num_features
            )));
        }
        self.flow.layout()?.masks(self.num_features)?;
        self.flow.spline.validate()?;
        self.train.validate()
    }

    /// Build the flow and wrap it in a `Diglm`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Diglm<B>> {
        self.validate()?;
        if let Some(seed) = self.init_seed {
            B::seed(device, seed);
        }
        let flow = NeuralSplineFlow::new(&self.flow, self.num_features, device)?;
        Diglm::new(flow, self.glm, self.num_features, device)
    }
}
