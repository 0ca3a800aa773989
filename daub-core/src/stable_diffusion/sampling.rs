use anyhow::{Error, Result};
use candle_core::{DType, Device, IndexOp, Module, Tensor, D};
use candle_transformers::models::stable_diffusion::{
    clip::ClipTextTransformer, schedulers::Scheduler, unet_2d::UNet2DConditionModel,
    vae::AutoEncoderKL,
};
use tokenizers::Tokenizer;
use tracing::warn;

use super::GenerationSettings;
use crate::step_progress;

/// Turns prompts into fixed-length id windows for one CLIP text encoder.
pub struct PromptTokenizer {
    pub tokenizer: Tokenizer,
    pub max_tokens: usize,
    pub pad_id: u32,
}

impl PromptTokenizer {
    /// Prompts longer than the window are cut down to it, keeping the final
    /// (end of text) token last. Shorter ones are padded with `pad_id`.
    pub fn ids(&self, prompt: &str) -> Result<Vec<u32>> {
        let mut tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        if tokens.len() > self.max_tokens {
            warn!(
                "prompt has {} tokens, truncating to the first {}",
                tokens.len(),
                self.max_tokens
            );
            let last = tokens[tokens.len() - 1];
            tokens.truncate(self.max_tokens);
            if let Some(end) = tokens.last_mut() {
                *end = last;
            }
        }
        tokens.resize(self.max_tokens, self.pad_id);
        Ok(tokens)
    }
}

pub struct TextEncoder {
    pub tokenizer: PromptTokenizer,
    pub model: ClipTextTransformer,
}

impl TextEncoder {
    fn embed(&self, prompt: &str, device: &Device) -> Result<Tensor> {
        let tokens = self.tokenizer.ids(prompt)?;
        let tokens = Tensor::new(tokens.as_slice(), device)?.unsqueeze(0)?;
        Ok(self.model.forward(&tokens)?)
    }
}

/// Encodes the prompt with every text encoder.
///
/// With guidance the negative prompt's embedding is stacked first on the
/// batch axis. Multiple encoders are joined on the feature axis.
pub fn text_embeddings(
    encoders: &[TextEncoder],
    prompt: &str,
    negative_prompt: &str,
    use_guidance: bool,
    device: &Device,
    dtype: DType,
) -> Result<Tensor> {
    let per_encoder = encoders
        .iter()
        .map(|encoder| {
            let cond = encoder.embed(prompt, device)?;
            if use_guidance {
                let uncond = encoder.embed(negative_prompt, device)?;
                Ok(Tensor::cat(&[uncond, cond], 0)?)
            } else {
                Ok(cond)
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Tensor::cat(&per_encoder, D::Minus1)?.to_dtype(dtype)?)
}

pub fn denoise(
    unet: &UNet2DConditionModel,
    scheduler: &mut dyn Scheduler,
    text_embeddings: &Tensor,
    settings: &GenerationSettings,
    device: &Device,
    dtype: DType,
) -> Result<Tensor> {
    let latents = Tensor::randn(
        0f32,
        1f32,
        (1, 4, settings.height / 8, settings.width / 8),
        device,
    )?;
    // scale the initial noise by the standard deviation required by the scheduler
    let mut latents = (latents * scheduler.init_noise_sigma())?.to_dtype(dtype)?;

    let timesteps = scheduler.timesteps().to_vec();
    let bar = step_progress(timesteps.len(), "Denoise loop")?;
    for timestep in timesteps {
        let latent_model_input = if settings.use_guidance() {
            Tensor::cat(&[&latents, &latents], 0)?
        } else {
            latents.clone()
        };
        let latent_model_input = scheduler.scale_model_input(latent_model_input, timestep)?;
        let noise_pred = unet.forward(&latent_model_input, timestep as f64, text_embeddings)?;

        let noise_pred = if settings.use_guidance() {
            let noise_pred = noise_pred.chunk(2, 0)?;
            let (uncond, text) = (&noise_pred[0], &noise_pred[1]);
            (uncond + ((text - uncond)? * settings.guidance)?)?
        } else {
            noise_pred
        };
        latents = scheduler.step(&noise_pred, timestep, &latents)?;
        bar.inc(1);
    }
    bar.finish();
    Ok(latents)
}

/// Decodes latents into a (3, height, width) u8 tensor on the CPU.
pub fn decode(vae: &AutoEncoderKL, latents: &Tensor, vae_scale: f64) -> Result<Tensor> {
    let image = vae.decode(&(latents / vae_scale)?)?;
    let image = ((image / 2.)? + 0.5)?.to_device(&Device::Cpu)?;
    let image = (image.clamp(0f32, 1f32)? * 255.)?.to_dtype(DType::U8)?;
    Ok(image.i(0)?)
}
