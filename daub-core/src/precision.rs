use std::fmt::Display;

use candle_core::DType;
use serde::{Deserialize, Serialize};

/// Numeric precision the networks run in once loaded.
///
/// Weights are converted to this dtype when they are mmapped, so loading an
/// [`WeightVariant::Fp16`] checkpoint with [`Precision::F32`] upcasts it.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    #[serde(rename = "f16")]
    F16,
    #[serde(rename = "bf16")]
    BF16,
    #[default]
    #[serde(rename = "f32")]
    F32,
}

serde_plain::derive_fromstr_from_deserialize!(Precision);

impl Precision {
    pub fn dtype(self) -> DType {
        match self {
            Self::F16 => DType::F16,
            Self::BF16 => DType::BF16,
            Self::F32 => DType::F32,
        }
    }
}

impl Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::F16 => write!(f, "f16"),
            Self::BF16 => write!(f, "bf16"),
            Self::F32 => write!(f, "f32"),
        }
    }
}

/// Which set of stored weight files to fetch from the checkpoint repository.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightVariant {
    #[serde(rename = "default")]
    Default,
    #[default]
    #[serde(rename = "fp16")]
    Fp16,
}

serde_plain::derive_fromstr_from_deserialize!(WeightVariant);

impl WeightVariant {
    /// Inserts the variant tag before the extension, e.g.
    /// `unet/diffusion_pytorch_model.safetensors` becomes
    /// `unet/diffusion_pytorch_model.fp16.safetensors`.
    pub fn apply(self, filename: &str) -> String {
        match self {
            Self::Default => filename.to_string(),
            Self::Fp16 => match filename.rsplit_once('.') {
                Some((stem, extension)) => format!("{stem}.fp16.{extension}"),
                None => format!("{filename}.fp16"),
            },
        }
    }
}

impl Display for WeightVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Fp16 => write!(f, "fp16"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lowercase_names() -> Result<(), serde_plain::Error> {
        assert_eq!("bf16".parse::<Precision>()?, Precision::BF16);
        assert_eq!("f32".parse::<Precision>()?, Precision::F32);
        assert_eq!("fp16".parse::<WeightVariant>()?, WeightVariant::Fp16);
        assert_eq!(Precision::F16.to_string(), "f16");
        assert_eq!(WeightVariant::Default.to_string(), "default");
        Ok(())
    }

    #[test]
    fn rejects_unknown_precision() {
        assert!("f64".parse::<Precision>().is_err());
    }

    #[test]
    fn fp16_variant_tags_filename() {
        assert_eq!(
            WeightVariant::Fp16.apply("text_encoder/model.safetensors"),
            "text_encoder/model.fp16.safetensors"
        );
        assert_eq!(
            WeightVariant::Default.apply("vae/diffusion_pytorch_model.safetensors"),
            "vae/diffusion_pytorch_model.safetensors"
        );
    }

    #[test]
    fn defaults_load_half_weights_at_full_precision() {
        assert_eq!(Precision::default().dtype(), DType::F32);
        assert_eq!(WeightVariant::default(), WeightVariant::Fp16);
    }
}
