use anyhow::Result;
use candle_transformers::models::stable_diffusion::{clip, StableDiffusionConfig};

use crate::{GenerationRequest, Precision, WeightVariant};

/// Request fields with variant defaults filled in and checked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub width: usize,
    pub height: usize,
    pub steps: usize,
    pub guidance: f64,
}

impl GenerationSettings {
    /// Classifier-free guidance only changes the prediction above a scale of 1.
    pub fn use_guidance(&self) -> bool {
        self.guidance > 1.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StableDiffusionVariant {
    V1_5,
    V2_1,
    Xl,
    XlTurbo,
}

impl StableDiffusionVariant {
    pub fn config(&self) -> StableDiffusionConfig {
        match self {
            Self::V1_5 => StableDiffusionConfig::v1_5(None, None, None),
            Self::V2_1 => StableDiffusionConfig::v2_1(None, None, None),
            Self::Xl => StableDiffusionConfig::sdxl(None, None, None),
            Self::XlTurbo => StableDiffusionConfig::sdxl_turbo(None, None, None),
        }
    }

    /// (width, height) the checkpoint was trained at.
    pub fn default_size(&self) -> (usize, usize) {
        match self {
            Self::V1_5 | Self::XlTurbo => (512, 512),
            Self::V2_1 => (768, 768),
            Self::Xl => (1024, 1024),
        }
    }

    pub fn settings(&self, request: &GenerationRequest) -> Result<GenerationSettings> {
        let (default_width, default_height) = self.default_size();
        let width = request.width.unwrap_or(default_width);
        let height = request.height.unwrap_or(default_height);
        if width < 8 || height < 8 || width % 8 != 0 || height % 8 != 0 {
            anyhow::bail!("width and height must be non-zero multiples of 8, got {width}x{height}");
        }
        let steps = request.steps.unwrap_or(self.default_steps());
        if steps == 0 {
            anyhow::bail!("the number of denoising steps must be at least 1");
        }
        let guidance = request.guidance.unwrap_or(self.default_guidance());
        if !guidance.is_finite() {
            anyhow::bail!("guidance must be a finite number, got {guidance}");
        }
        Ok(GenerationSettings {
            width,
            height,
            steps,
            guidance,
        })
    }

    pub fn is_xl(&self) -> bool {
        matches!(self, Self::Xl | Self::XlTurbo)
    }

    pub fn default_steps(&self) -> usize {
        match self {
            Self::V1_5 | Self::V2_1 => 30,
            Self::Xl => 50,
            Self::XlTurbo => 1,
        }
    }

    pub fn default_guidance(&self) -> f64 {
        match self {
            Self::V1_5 | Self::V2_1 => 7.5,
            Self::Xl => 5.0,
            Self::XlTurbo => 0.0,
        }
    }

    /// Latent scaling factor the VAE was trained with.
    pub fn vae_scale(&self) -> f64 {
        if self.is_xl() {
            0.13025
        } else {
            0.18215
        }
    }

    /// Text encoder configs, in the order their embeddings are concatenated.
    pub fn clip_configs<'a>(&self, config: &'a StableDiffusionConfig) -> Vec<&'a clip::Config> {
        std::iter::once(&config.clip)
            .chain(config.clip2.as_ref())
            .collect()
    }

    pub fn text_encoder_files(&self, weights: WeightVariant) -> Vec<(WeightFile, WeightFile)> {
        let mut files = vec![(
            WeightFile::tokenizer(self, 0),
            WeightFile::in_checkpoint("text_encoder/model.safetensors", weights),
        )];
        if self.is_xl() {
            files.push((
                WeightFile::tokenizer(self, 1),
                WeightFile::in_checkpoint("text_encoder_2/model.safetensors", weights),
            ));
        }
        files
    }

    pub fn unet_file(&self, weights: WeightVariant) -> WeightFile {
        WeightFile::in_checkpoint("unet/diffusion_pytorch_model.safetensors", weights)
    }

    pub fn vae_file(&self, weights: WeightVariant, precision: Precision) -> WeightFile {
        // The stock SDXL VAE overflows in half precision.
        if self.is_xl() && precision == Precision::F16 {
            WeightFile::External {
                repo: "madebyollin/sdxl-vae-fp16-fix",
                filename: "diffusion_pytorch_model.safetensors".to_string(),
            }
        } else {
            WeightFile::in_checkpoint("vae/diffusion_pytorch_model.safetensors", weights)
        }
    }
}

/// A file to fetch: either from the checkpoint repository being loaded or
/// from a fixed companion repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightFile {
    Checkpoint(String),
    External {
        repo: &'static str,
        filename: String,
    },
}

impl WeightFile {
    fn in_checkpoint(filename: &str, weights: WeightVariant) -> Self {
        Self::Checkpoint(weights.apply(filename))
    }

    fn tokenizer(variant: &StableDiffusionVariant, index: usize) -> Self {
        let repo = match (variant.is_xl(), index) {
            (false, _) => "openai/clip-vit-base-patch32",
            (true, 0) => "openai/clip-vit-large-patch14",
            (true, _) => "laion/CLIP-ViT-bigG-14-laion2B-39B-b160k",
        };
        Self::External {
            repo,
            filename: "tokenizer.json".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xl_uses_two_text_encoders() {
        let files = StableDiffusionVariant::Xl.text_encoder_files(WeightVariant::Fp16);
        assert_eq!(files.len(), 2);
        assert_eq!(
            files[1].1,
            WeightFile::Checkpoint("text_encoder_2/model.fp16.safetensors".to_string())
        );
        assert_eq!(
            files[1].0,
            WeightFile::External {
                repo: "laion/CLIP-ViT-bigG-14-laion2B-39B-b160k",
                filename: "tokenizer.json".to_string(),
            }
        );
    }

    #[test]
    fn v1_5_uses_one_text_encoder() {
        let files = StableDiffusionVariant::V1_5.text_encoder_files(WeightVariant::Default);
        assert_eq!(
            files,
            vec![(
                WeightFile::External {
                    repo: "openai/clip-vit-base-patch32",
                    filename: "tokenizer.json".to_string(),
                },
                WeightFile::Checkpoint("text_encoder/model.safetensors".to_string()),
            )]
        );
    }

    #[test]
    fn half_precision_xl_swaps_vae() {
        let variant = StableDiffusionVariant::Xl;
        assert!(matches!(
            variant.vae_file(WeightVariant::Fp16, Precision::F16),
            WeightFile::External { repo: "madebyollin/sdxl-vae-fp16-fix", .. }
        ));
        assert_eq!(
            variant.vae_file(WeightVariant::Fp16, Precision::F32),
            WeightFile::Checkpoint("vae/diffusion_pytorch_model.fp16.safetensors".to_string())
        );
    }

    #[test]
    fn xl_defaults() {
        let variant = StableDiffusionVariant::Xl;
        let config = variant.config();
        assert_eq!((config.width, config.height), variant.default_size());
        assert_eq!(variant.clip_configs(&config).len(), 2);
        assert_eq!(variant.default_steps(), 50);
        assert_eq!(variant.default_guidance(), 5.0);
    }

    #[test]
    fn turbo_runs_without_guidance() {
        let variant = StableDiffusionVariant::XlTurbo;
        assert_eq!(variant.default_steps(), 1);
        assert!(variant.default_guidance() <= 1.0);
    }

    #[test]
    fn default_sizes_match_candle_configs() {
        for variant in [
            StableDiffusionVariant::V1_5,
            StableDiffusionVariant::V2_1,
            StableDiffusionVariant::XlTurbo,
        ] {
            let config = variant.config();
            assert_eq!((config.width, config.height), variant.default_size());
        }
    }

    #[test]
    fn empty_request_takes_variant_defaults() -> Result<()> {
        let settings = StableDiffusionVariant::Xl.settings(&GenerationRequest::new("hello world"))?;
        assert_eq!(
            settings,
            GenerationSettings {
                width: 1024,
                height: 1024,
                steps: 50,
                guidance: 5.0,
            }
        );
        assert!(settings.use_guidance());
        Ok(())
    }

    #[test]
    fn request_overrides_defaults() -> Result<()> {
        let request = GenerationRequest {
            width: Some(640),
            height: Some(384),
            steps: Some(12),
            guidance: Some(1.0),
            ..GenerationRequest::new("a red fox")
        };
        let settings = StableDiffusionVariant::V1_5.settings(&request)?;
        assert_eq!((settings.width, settings.height), (640, 384));
        assert_eq!(settings.steps, 12);
        // a scale of exactly 1 is the conditional prediction alone
        assert!(!settings.use_guidance());
        Ok(())
    }

    #[test]
    fn turbo_defaults_skip_guidance() -> Result<()> {
        let settings = StableDiffusionVariant::XlTurbo.settings(&GenerationRequest::new("x"))?;
        assert_eq!(settings.steps, 1);
        assert!(!settings.use_guidance());
        Ok(())
    }

    #[test]
    fn rejects_sizes_that_are_not_positive_multiples_of_8() {
        let variant = StableDiffusionVariant::V1_5;
        for (width, height) in [(0, 512), (512, 0), (0, 0), (513, 512), (512, 4)] {
            let request = GenerationRequest {
                width: Some(width),
                height: Some(height),
                ..GenerationRequest::new("a red fox")
            };
            assert!(
                variant.settings(&request).is_err(),
                "{width}x{height} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_zero_steps() {
        let request = GenerationRequest {
            steps: Some(0),
            ..GenerationRequest::new("a red fox")
        };
        let err = StableDiffusionVariant::Xl.settings(&request).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn rejects_non_finite_guidance() {
        let request = GenerationRequest {
            guidance: Some(f64::NAN),
            ..GenerationRequest::new("a red fox")
        };
        assert!(StableDiffusionVariant::V2_1.settings(&request).is_err());
    }
}
