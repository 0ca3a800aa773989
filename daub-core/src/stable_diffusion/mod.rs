use std::path::PathBuf;

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use candle_transformers::models::stable_diffusion::{
    self, clip, unet_2d::UNet2DConditionModel, vae::AutoEncoderKL, StableDiffusionConfig,
};
use hf_hub::api::sync::{Api, ApiRepo};
use image::DynamicImage;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

mod sampling;
mod variant;

use sampling::{PromptTokenizer, TextEncoder};
pub use variant::{GenerationSettings, StableDiffusionVariant};
use variant::WeightFile;

use crate::{
    select_best_device, tensor_to_image, GenerationRequest, LoadOptions, Loader, ModelLike,
    ModelVariant,
};

pub struct StableDiffusionModel {
    device: Device,
    dtype: DType,
    variant: StableDiffusionVariant,
    sd_config: StableDiffusionConfig,
    text_encoders: Vec<TextEncoder>,
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
}

impl StableDiffusionModel {
    pub fn variant(&self) -> StableDiffusionVariant {
        self.variant
    }
}

impl ModelLike for StableDiffusionModel {
    fn run(&mut self, request: GenerationRequest) -> Result<DynamicImage> {
        let settings = self.variant.settings(&request)?;
        let use_guidance = settings.use_guidance();

        if let Some(seed) = request.seed {
            if let Err(e) = self.device.set_seed(seed) {
                warn!("seed {seed} ignored: {e}");
            }
        }

        let text_embeddings = sampling::text_embeddings(
            &self.text_encoders,
            &request.prompt,
            request.negative_prompt.as_deref().unwrap_or(""),
            use_guidance,
            &self.device,
            self.dtype,
        )?;
        debug!("text embeddings: {text_embeddings:?}");

        let mut scheduler = self
            .sd_config
            .build_scheduler(settings.steps)
            .context("failed to build scheduler")?;
        let latents = sampling::denoise(
            &self.unet,
            scheduler.as_mut(),
            &text_embeddings,
            &settings,
            &self.device,
            self.dtype,
        )?;
        info!("generated latent image");

        let image = sampling::decode(&self.vae, &latents, self.variant.vae_scale())?;
        info!("decoded image");

        tensor_to_image(&image)
    }
}

pub struct StableDiffusionLoader;

impl Loader for StableDiffusionLoader {
    type Model = StableDiffusionModel;

    fn load(
        model_id: &str,
        variant: ModelVariant,
        api: &Api,
        options: LoadOptions,
    ) -> Result<Self::Model> {
        let ModelVariant::StableDiffusion(variant) = variant;

        let device = select_best_device(options.device_map).context("failed to set up device")?;
        let dtype = options.precision.dtype();
        if device.is_cpu() && dtype != DType::F32 {
            warn!("{} on CPU is slow and may be unsupported, consider f32", options.precision);
        }
        info!(
            "loading {model_id} ({} weights) as {} on {device:?}",
            options.variant, options.precision
        );

        let checkpoint = api.repo(hf_hub::Repo::model(model_id.to_string()));
        let fetch = |file: &WeightFile| fetch_file(api, &checkpoint, file);

        let sd_config = variant.config();

        // --- Load tokenizers and text encoders ---
        let mut text_encoders = Vec::new();
        for ((tokenizer_file, clip_file), clip_config) in variant
            .text_encoder_files(options.variant)
            .iter()
            .zip(variant.clip_configs(&sd_config))
        {
            let tokenizer = Tokenizer::from_file(fetch(tokenizer_file)?)
                .map_err(anyhow::Error::msg)
                .context("failed to load tokenizer")?;
            let pad_id = pad_id(&tokenizer, clip_config)?;
            // Text encoders always run in f32, their embeddings are cast afterwards.
            let model = stable_diffusion::build_clip_transformer(
                clip_config,
                fetch(clip_file)?,
                &device,
                DType::F32,
            )
            .context("failed to load text encoder")?;
            text_encoders.push(TextEncoder {
                tokenizer: PromptTokenizer {
                    tokenizer,
                    max_tokens: clip_config.max_position_embeddings,
                    pad_id,
                },
                model,
            });
        }

        // --- Load UNet ---
        let unet = sd_config
            .build_unet(
                fetch(&variant.unet_file(options.variant))?,
                &device,
                4,
                options.use_flash_attn,
                dtype,
            )
            .context("failed to load unet")?;

        // --- Load VAE ---
        let vae = sd_config
            .build_vae(
                fetch(&variant.vae_file(options.variant, options.precision))?,
                &device,
                dtype,
            )
            .context("failed to load vae")?;

        Ok(StableDiffusionModel {
            device,
            dtype,
            variant,
            sd_config,
            text_encoders,
            unet,
            vae,
        })
    }
}

fn fetch_file(api: &Api, checkpoint: &ApiRepo, file: &WeightFile) -> Result<PathBuf> {
    match file {
        WeightFile::Checkpoint(filename) => checkpoint
            .get(filename)
            .with_context(|| format!("failed to get {filename}")),
        WeightFile::External { repo, filename } => api
            .model(repo.to_string())
            .get(filename)
            .with_context(|| format!("failed to get {filename} from {repo}")),
    }
}

fn pad_id(tokenizer: &Tokenizer, clip_config: &clip::Config) -> Result<u32> {
    let pad_token = clip_config.pad_with.as_deref().unwrap_or("<|endoftext|>");
    tokenizer
        .get_vocab(true)
        .get(pad_token)
        .copied()
        .with_context(|| format!("tokenizer has no {pad_token} token"))
}
