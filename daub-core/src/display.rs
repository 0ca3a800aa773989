use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use image::DynamicImage;
use tracing::debug;

/// Somewhere a generated image can be shown.
pub trait ImageViewer {
    fn show(&self, image: &DynamicImage) -> Result<()>;
}

/// Opens images in the platform's default image viewer.
///
/// The image is written as a PNG into the temp directory so the viewer has a
/// file to open. The launching shell removes it once the viewer has had time
/// to read it. Neither process is waited on.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemViewer;

impl ImageViewer for SystemViewer {
    fn show(&self, image: &DynamicImage) -> Result<()> {
        let path = write_temp_png(image, &std::env::temp_dir())?;
        debug!("opening {}", path.display());
        opener_command(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to launch image viewer for {}", path.display()))?;
        Ok(())
    }
}

fn write_temp_png(image: &DynamicImage, dir: &Path) -> Result<PathBuf> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let path = dir.join(format!("daub-{}-{nanos}.png", std::process::id()));
    image
        .save_with_format(&path, image::ImageFormat::Png)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Seconds the temp PNG is kept after the viewer was launched.
const REMOVE_AFTER_SECS: u32 = 20;

fn opener_command(path: &Path) -> Command {
    if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", "start", "", "/WAIT"])
            .arg(path)
            .args(["&&", "ping", "-n", "4", "127.0.0.1", ">NUL", "&&", "del", "/f"])
            .arg(path);
        cmd
    } else {
        let opener = if cfg!(target_os = "macos") {
            "open"
        } else {
            "xdg-open"
        };
        // the path travels as $1 so it is never parsed by the shell
        let script = format!("{opener} \"$1\"; sleep {REMOVE_AFTER_SECS}; rm -f \"$1\"");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script).arg("daub").arg(path);
        cmd
    }
}
