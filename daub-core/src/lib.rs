#[cfg(feature = "accelerate")]
extern crate accelerate_src;
#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

pub mod device_map;
pub mod display;
pub mod generation;
pub mod loader;
mod loader_factory;
pub mod precision;
mod util;

mod stable_diffusion;

pub use device_map::*;
pub use display::*;
pub use generation::*;
use image::DynamicImage;
pub use loader::*;
pub use loader_factory::*;
pub use precision::*;
use serde::{Deserialize, Serialize};
pub use stable_diffusion::{
    GenerationSettings, StableDiffusionLoader, StableDiffusionModel, StableDiffusionVariant,
};
pub(crate) use util::*;
pub use util::tensor_to_image;

/// A single text-to-image request. Unset fields fall back to the model
/// variant's defaults.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, PartialOrd, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub steps: Option<usize>,
    pub guidance: Option<f64>,
    pub seed: Option<u64>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

pub trait ModelLike {
    fn run(&mut self, request: GenerationRequest) -> anyhow::Result<DynamicImage>;
}
