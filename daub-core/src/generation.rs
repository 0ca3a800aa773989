use std::time::Instant;

use anyhow::Result;
use image::GenericImageView;
use tracing::info;

use crate::{GenerationRequest, ImageViewer, ModelLike};

/// Generates one image for `prompt` and hands it to `viewer`.
pub fn run_generation(
    model: &mut dyn ModelLike,
    viewer: &dyn ImageViewer,
    prompt: &str,
) -> Result<()> {
    run_request(model, viewer, GenerationRequest::new(prompt))
}

/// Like [`run_generation`], with every request field under caller control.
///
/// Model errors are returned as-is and the viewer is not invoked.
pub fn run_request(
    model: &mut dyn ModelLike,
    viewer: &dyn ImageViewer,
    request: GenerationRequest,
) -> Result<()> {
    info!("running with prompt \"{}\"", request.prompt);
    let start = Instant::now();
    let image = model.run(request)?;
    let (width, height) = image.dimensions();
    info!(
        "generated {width}x{height} image in {:.2}s",
        start.elapsed().as_secs_f32()
    );
    viewer.show(&image)
}
