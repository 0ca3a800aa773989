use anyhow::{anyhow, Context, Result};
use hf_hub::api::sync::Api;
use serde::Deserialize;
use tracing::{debug, info};

use crate::{LoadOptions, Loader, ModelLike, StableDiffusionLoader, StableDiffusionVariant};

/// Enum of supported model types
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModelType {
    StableDiffusion,
}

impl ModelType {
    /// Detect model type from model name
    pub fn from_name(model_name: &str) -> Option<Self> {
        let name_upper = model_name.to_uppercase();

        if name_upper.contains("STABLE-DIFFUSION")
            || name_upper.contains("SDXL")
            || name_upper.split(['/', '-', '_', '.']).any(|part| part == "SD")
        {
            Some(ModelType::StableDiffusion)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModelVariant {
    StableDiffusion(StableDiffusionVariant),
}

impl ModelVariant {
    /// Detect model variant from model name
    ///
    /// Stable Diffusion 2.x `-base` checkpoints (epsilon prediction, 512px) are
    /// an error: the 2.1 config is v-prediction at 768px.
    pub fn from_name(model_name: &str) -> Result<Option<Self>> {
        if ModelType::from_name(model_name).is_none() {
            return Ok(None);
        }
        let name_upper = model_name.to_uppercase();

        let variant = if name_upper.contains("XL") {
            if name_upper.contains("TURBO") {
                StableDiffusionVariant::XlTurbo
            } else {
                StableDiffusionVariant::Xl
            }
        } else if is_sd2(&name_upper) {
            if name_upper.contains("BASE") {
                anyhow::bail!("Unsupported model variant: {model_name} (2.x base checkpoint)");
            }
            StableDiffusionVariant::V2_1
        } else {
            // Default to 1.5 if no specific version is found
            StableDiffusionVariant::V1_5
        };
        Ok(Some(ModelVariant::StableDiffusion(variant)))
    }

    /// Detect model variant from the pipeline class recorded in a diffusers
    /// `model_index.json`.
    pub fn from_model_index(model_index: &str) -> Result<Option<Self>> {
        #[derive(Deserialize)]
        struct ModelIndex {
            #[serde(rename = "_class_name")]
            class_name: String,
        }

        let index: ModelIndex =
            serde_json::from_str(model_index).context("failed to parse model_index.json")?;
        let variant = match index.class_name.as_str() {
            "StableDiffusionXLPipeline" => Some(StableDiffusionVariant::Xl),
            "StableDiffusionPipeline" => Some(StableDiffusionVariant::V1_5),
            _ => None,
        };
        Ok(variant.map(ModelVariant::StableDiffusion))
    }

    fn from_hub(model_name: &str, api: &Api) -> Result<Option<Self>> {
        let path = api
            .model(model_name.to_string())
            .get("model_index.json")
            .with_context(|| format!("failed to get model_index.json for {model_name}"))?;
        let model_index = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_model_index(&model_index)
    }
}

fn is_sd2(name_upper: &str) -> bool {
    ["2-1", "2.1", "2-0", "2.0"]
        .iter()
        .any(|version| name_upper.contains(version))
        || name_upper.split(['/', '-', '_', '.']).any(|part| part == "2" || part == "V2")
}

/// Load a model based on its name, automatically detecting the appropriate loader
pub fn load_model(
    model_name: &str,
    api: &Api,
    options: LoadOptions,
) -> Result<Box<dyn ModelLike>> {
    let model_variant = match ModelVariant::from_name(model_name)? {
        Some(variant) => variant,
        None => {
            debug!("no variant in name {model_name}, checking model_index.json");
            ModelVariant::from_hub(model_name, api)?
                .ok_or_else(|| anyhow!("Unsupported model type: {}", model_name))?
        }
    };

    info!(
        "loading model: {} (detected variant: {:?})",
        model_name, model_variant
    );

    match model_variant {
        ModelVariant::StableDiffusion(_) => {
            let model = StableDiffusionLoader::load(model_name, model_variant, api, options)?;
            Ok(Box::new(model))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(name: &str) -> Option<StableDiffusionVariant> {
        ModelVariant::from_name(name)
            .expect("name should not be rejected")
            .map(|ModelVariant::StableDiffusion(v)| v)
    }

    #[test]
    fn detects_variants_from_names() {
        assert_eq!(
            variant("stabilityai/stable-diffusion-xl-base-1.0"),
            Some(StableDiffusionVariant::Xl)
        );
        assert_eq!(
            variant("stabilityai/sdxl-turbo"),
            Some(StableDiffusionVariant::XlTurbo)
        );
        assert_eq!(
            variant("stabilityai/stable-diffusion-2-1"),
            Some(StableDiffusionVariant::V2_1)
        );
        assert_eq!(
            variant("runwayml/stable-diffusion-v1-5"),
            Some(StableDiffusionVariant::V1_5)
        );
        assert_eq!(
            variant("someone/my-sd-finetune"),
            Some(StableDiffusionVariant::V1_5)
        );
    }

    #[test]
    fn sd2_names_use_the_2_1_config() {
        assert_eq!(
            variant("stabilityai/stable-diffusion-2"),
            Some(StableDiffusionVariant::V2_1)
        );
        assert_eq!(
            variant("someone/sd-v2.0-finetune"),
            Some(StableDiffusionVariant::V2_1)
        );
        // a 1.0 release tag is not a 2.x model
        assert_eq!(
            variant("someone/stable-diffusion-v1-5-1.0"),
            Some(StableDiffusionVariant::V1_5)
        );
    }

    #[test]
    fn sd2_base_checkpoints_are_rejected() {
        for name in [
            "stabilityai/stable-diffusion-2-base",
            "stabilityai/stable-diffusion-2-1-base",
        ] {
            let err = ModelVariant::from_name(name).unwrap_err();
            assert!(err.to_string().contains("base"), "{name}: {err}");
        }
    }

    #[test]
    fn rejects_unrelated_models() {
        assert_eq!(ModelType::from_name("black-forest-labs/FLUX.1-schnell"), None);
        assert_eq!(variant("openai/clip-vit-large-patch14"), None);
        // "sd" must be a whole name segment, not a substring
        assert_eq!(variant("someone/wisdom-model"), None);
    }

    #[test]
    fn detects_variant_from_model_index() -> Result<()> {
        let xl = r#"{"_class_name": "StableDiffusionXLPipeline", "_diffusers_version": "0.19.0"}"#;
        assert_eq!(
            ModelVariant::from_model_index(xl)?,
            Some(ModelVariant::StableDiffusion(StableDiffusionVariant::Xl))
        );

        let flux = r#"{"_class_name": "FluxPipeline"}"#;
        assert_eq!(ModelVariant::from_model_index(flux)?, None);

        assert!(ModelVariant::from_model_index("not json").is_err());
        Ok(())
    }
}
