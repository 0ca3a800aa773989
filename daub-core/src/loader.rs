use anyhow::Result;
use hf_hub::api::sync::Api;

use crate::{DeviceMap, ModelLike, ModelVariant, Precision, WeightVariant};

/// How a checkpoint is materialised on the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub precision: Precision,
    pub variant: WeightVariant,
    pub device_map: DeviceMap,
    pub use_flash_attn: bool,
}

pub trait Loader {
    type Model: ModelLike;

    fn load(
        model_id: &str,
        variant: ModelVariant,
        api: &Api,
        options: LoadOptions,
    ) -> Result<Self::Model>
    where
        Self: Sized;
}
