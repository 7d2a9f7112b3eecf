//! Classify one image from disk and print the result as JSON

use anyhow::{Context, Result};
use bristol_classifier::config::{Settings, RUST_LOG};
use bristol_classifier::pipeline::Classifier;
use bristol_classifier::upload::UploadField;
use bristol_classifier::util::init_tracing;
use std::path::PathBuf;
use std::{env, fs, process};

const USAGE: &str = "usage: ./classify <image> [config file]";

fn get_args() -> (PathBuf, Option<PathBuf>) {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        2 => (PathBuf::from(&args[1]), None),
        3 => (PathBuf::from(&args[1]), Some(PathBuf::from(&args[2]))),
        _ => {
            println!("{USAGE}");
            process::exit(1);
        }
    }
}

fn main() -> Result<()> {
    init_tracing(RUST_LOG);

    let (image, config_file) = get_args();
    let settings = Settings::load(config_file.as_deref())?;
    let classifier = Classifier::from_settings(&settings)?;

    let bytes = fs::read(&image).with_context(|| format!("cannot read {image:?}"))?;
    let field = UploadField {
        filename: image
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_owned),
        bytes,
    };
    let upload = classifier.gate().accept(Some(field))?;
    let response = classifier
        .classify_blocking(upload)
        .with_context(|| format!("failed to classify {}", image.display()))?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
