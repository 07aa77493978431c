use std::path::{Path, PathBuf};

use clap::Parser;
use digit_recognizer::{
    canvas::RawCanvasFrame,
    model::{Config, OnnxModel, OnnxModelProvider},
    prepare::{prepare, PrepareConfig},
    service::{Postprocessing, Prediction, RecognitionError, Session, SessionConfig},
};
use log::info;

mod cli;
use cli::Args;
use thiserror::Error;

#[derive(Debug, Error)]
enum AppError {
    #[error("Could not load the model -> {0}")]
    InvalidModel(RecognitionError),
    #[error("Could not decode image {} -> {}", .0.display(), .1)]
    CouldNotDecodeImage(PathBuf, image::ImageError),
    #[error("Could not save the grid of {} -> {}", .0.display(), .1)]
    CouldNotSaveGrid(PathBuf, Box<dyn std::error::Error>),
    #[error("Recognition failure on {} -> {}", .0.display(), .1)]
    RecognitionFailure(PathBuf, RecognitionError),
}

fn main() {
    if let Err(e) = exec_program() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn exec_program() -> Result<(), AppError> {
    env_logger::init();

    let args = Args::parse();

    let num_threads = args.threads.into();
    let ranking_len = args.show.into();
    let session_config = SessionConfig {
        prepare: PrepareConfig {
            reduction: args.reduction.into(),
            polarity: args.polarity.into(),
        },
        postprocessing: if args.softmax {
            Postprocessing::Softmax
        } else {
            Postprocessing::AsIs
        },
    };

    info!("Input image paths: {:?}", args.input);
    info!("Model path: {}", args.model.display());
    info!("Number of top ranked digits to show: {}", ranking_len);
    info!("Session configuration: {:?}", session_config);

    let provider = OnnxModelProvider::from_path(&args.model).config(Config { num_threads });
    let session = Session::<OnnxModel>::new(session_config);
    session.load(&provider).map_err(AppError::InvalidModel)?;

    info!("Session created successfully");

    println!("Top {} predictions:", ranking_len);
    for (i, path) in args.input.iter().enumerate() {
        let frame = image::open(path)
            .map(RawCanvasFrame::from)
            .map_err(|e| AppError::CouldNotDecodeImage(path.clone(), e))?;

        if let Some(dir) = &args.dump_grid {
            dump_grid(&frame, &session_config.prepare, path, dir)?;
        }

        println!("  Image #{} ({})", i + 1, path.display());
        match session.recognize(&frame) {
            Ok(prediction) => print_prediction(&prediction, ranking_len),
            Err(RecognitionError::EmptyInputRejected) => println!("    nothing drawn"),
            Err(e) => return Err(AppError::RecognitionFailure(path.clone(), e)),
        }
    }

    Ok(())
}

fn dump_grid(
    frame: &RawCanvasFrame,
    config: &PrepareConfig,
    input_path: &Path,
    dir: &Path,
) -> Result<(), AppError> {
    let grid = prepare(frame, config)
        .map_err(|e| AppError::RecognitionFailure(input_path.to_path_buf(), e))?;
    let file_name = input_path
        .file_stem()
        .map(|stem| format!("{}_grid.png", stem.to_string_lossy()))
        .unwrap_or_else(|| String::from("grid.png"));
    let output_path = dir.join(file_name);

    std::fs::create_dir_all(dir)
        .map_err(|e| AppError::CouldNotSaveGrid(input_path.to_path_buf(), Box::new(e)))?;
    grid.to_luma_image()
        .save(&output_path)
        .map_err(|e| AppError::CouldNotSaveGrid(input_path.to_path_buf(), Box::new(e)))?;
    info!("Saved normalized grid to {}", output_path.display());
    Ok(())
}

fn print_prediction(prediction: &Prediction, k: usize) {
    println!(
        "    digit: {}, confidence: {} %",
        prediction.digit,
        prediction.confidence_display()
    );
    for (rank, (digit, score)) in prediction.top_k(k).into_iter().enumerate() {
        println!(
            "    {}. digit: {}, probability: {:.2} %",
            rank + 1,
            digit,
            score * 100_f32
        );
    }
}
