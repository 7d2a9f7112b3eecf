use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use bristol_classifier::config::{Settings, RUST_LOG};
use bristol_classifier::pipeline::Classifier;
use bristol_classifier::server::{self, AppState};
use bristol_classifier::util::init_tracing;
use std::path::PathBuf;
use std::{env, process};
use tracing::info;

const USAGE: &str = "usage: ./bristol [config file]";

fn get_args() -> Option<PathBuf> {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => None,
        2 => Some(PathBuf::from(&args[1])),
        _ => {
            println!("{USAGE}");
            process::exit(1);
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(RUST_LOG);

    let config_file = get_args();
    let settings = Settings::load(config_file.as_deref())?;
    let classifier = Classifier::from_settings(&settings).context("failed to start classifier")?;

    let max_upload_bytes = settings.server.max_upload_bytes();
    let state = web::Data::new(AppState {
        classifier,
        max_upload_bytes,
    });
    // base 64 grows the image by a third
    let json_limit = max_upload_bytes / 3 * 4 + 1024;

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    info!("listening on http://{addr}");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(web::JsonConfig::default().limit(json_limit))
            .wrap(middleware::Logger::default())
            .configure(server::configure)
    })
    .bind(&addr)?
    .run()
    .await?;

    Ok(())
}
