use anyhow::Result;
use clap::Parser;
use daub_core::{
    load_model, run_request, DeviceMap, GenerationRequest, LoadOptions, Precision, SystemViewer,
    WeightVariant,
};
use hf_hub::api::sync::ApiBuilder;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// Define command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Generate an image from a prompt and open it in the system viewer")]
struct Args {
    /// The prompt to be used for image generation.
    #[arg(long, default_value = "hello world", value_parser = non_empty)]
    prompt: String,

    /// What the image should not contain. Only used when guidance is enabled.
    #[arg(long)]
    negative_prompt: Option<String>,

    /// Checkpoint to load, as a Hugging Face model id
    #[arg(long, default_value = "stabilityai/stable-diffusion-xl-base-1.0")]
    model: String,

    /// Precision the model runs in: f16, bf16 or f32
    #[arg(long, default_value_t = Precision::F32)]
    precision: Precision,

    /// Stored weights to download: default or fp16
    #[arg(long, default_value_t = WeightVariant::Fp16)]
    variant: WeightVariant,

    /// Use CPU instead of GPU
    #[arg(long)]
    cpu: bool,

    /// Use flash attention in the UNet (requires the `flash-attn` feature)
    #[arg(long)]
    use_flash_attn: bool,

    /// Number of denoising steps. Defaults to the model's recommendation.
    #[arg(long)]
    steps: Option<usize>,

    /// Classifier-free guidance scale. Defaults to the model's recommendation.
    #[arg(long)]
    guidance: Option<f64>,

    /// The width in pixels of the generated image, a multiple of 8.
    #[arg(long)]
    width: Option<usize>,

    /// The height in pixels of the generated image, a multiple of 8.
    #[arg(long)]
    height: Option<usize>,

    /// Random seed for the initial latents
    #[arg(long)]
    seed: Option<u64>,
}

fn non_empty(s: &str) -> Result<String, String> {
    if s.trim().is_empty() {
        Err("prompt must not be empty".to_string())
    } else {
        Ok(s.to_string())
    }
}

impl Args {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            precision: self.precision,
            variant: self.variant,
            device_map: DeviceMap::from_cpu_flag(self.cpu),
            use_flash_attn: self.use_flash_attn,
        }
    }

    fn request(&self) -> GenerationRequest {
        GenerationRequest {
            prompt: self.prompt.clone(),
            negative_prompt: self.negative_prompt.clone(),
            width: self.width,
            height: self.height,
            steps: self.steps,
            guidance: self.guidance,
            seed: self.seed,
        }
    }
}

fn run(args: Args) -> Result<()> {
    let api = ApiBuilder::from_env().with_progress(true).build()?;
    let mut model = load_model(&args.model, &api, args.load_options())?;
    run_request(model.as_mut(), &SystemViewer, args.request())
}

fn main() -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    run(Args::parse())
}
