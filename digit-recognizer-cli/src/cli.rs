use std::path::PathBuf;

use clap::Parser;
use digit_recognizer::prepare::{ChannelReduction, Polarity};
use strum::{Display, EnumString};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Canvas snapshot path, a square image with the drawn digit.
    /// Example: --input /path/to/digit1.png --input /path/to/digit2.png
    #[arg(short, long, required = true)]
    pub input: Vec<PathBuf>,

    /// Path of the ONNX digit classifier.
    /// Its input must be [1, 28, 28, 1] or [1, 1, 28, 28] and its output 10 scores.
    /// No model ships with the tool: export one (e.g. a Keras or PyTorch MNIST classifier)
    /// to ONNX and place it at the default path, or pass its path here.
    #[arg(short, long, default_value = "models/mnist.onnx")]
    pub model: PathBuf,

    /// Number of threads to use for inference to parallelize a single operation. Must be greater than 0 and less than 65536.
    /// Example: --threads 8
    #[arg(short, long, default_value = "4", value_parser = clap::value_parser!(u16).range(1..))]
    pub threads: u16,

    /// Number of top ranked digits to show. Must be between 1 and 10.
    /// Example: --show 3
    #[arg(short, long, default_value = "3", value_parser = clap::value_parser!(u16).range(1..=10))]
    pub show: u16,

    /// Which of ink and background is bright in the snapshots.
    /// Supported values: bright (white ink on black), dark (black ink on white)
    #[arg(short, long, default_value_t = InkPolarity::Bright)]
    pub polarity: InkPolarity,

    /// How the pixel colors are reduced to a single intensity.
    /// Supported values: luminance, max, average, alpha
    #[arg(short, long, default_value_t = Reduction::Luminance)]
    pub reduction: Reduction,

    /// Apply a softmax to the model output, for models that emit logits.
    #[arg(long)]
    pub softmax: bool,

    /// Directory where the normalized 28x28 grids are saved as PNG images.
    #[arg(long)]
    pub dump_grid: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum InkPolarity {
    Bright,
    Dark,
}

impl From<InkPolarity> for Polarity {
    fn from(polarity: InkPolarity) -> Self {
        match polarity {
            InkPolarity::Bright => Polarity::InkIsBright,
            InkPolarity::Dark => Polarity::InkIsDark,
        }
    }
}

#[derive(Debug, Clone, Copy, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Reduction {
    Luminance,
    Max,
    Average,
    Alpha,
}

impl From<Reduction> for ChannelReduction {
    fn from(reduction: Reduction) -> Self {
        match reduction {
            Reduction::Luminance => ChannelReduction::Luminance,
            Reduction::Max => ChannelReduction::Max,
            Reduction::Average => ChannelReduction::Average,
            Reduction::Alpha => ChannelReduction::Alpha,
        }
    }
}
