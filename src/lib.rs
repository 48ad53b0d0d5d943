use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{
    middleware::{NormalizePath, TrailingSlash},
    web::{Data, JsonConfig},
    App, HttpServer,
};
use config::Config;
use maintenance::Janitor;
use notifier::Notifier;
use tracing::level_filters::LevelFilter;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, FmtSubscriber};

pub mod api;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod maintenance;
pub mod message;
pub mod notifier;
pub mod payload;
pub mod retry;
pub mod service;
pub mod store;
pub mod worker;

/// Install the global tracing subscriber, filtered by `MAILROOM_LOG`.
pub fn init_tracing() -> eyre::Result<()> {
    let filter = EnvFilter::builder()
        .with_env_var("MAILROOM_LOG")
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    #[cfg(debug_assertions)]
    FmtSubscriber::builder()
        .pretty()
        .with_env_filter(filter)
        .finish()
        .try_init()?;

    #[cfg(not(debug_assertions))]
    FmtSubscriber::builder()
        .json()
        .with_env_filter(filter)
        .finish()
        .try_init()?;

    Ok(())
}

/// Returns a builder for the main application: the queue, its background
/// workers, and the operator HTTP API.
#[bon::builder(finish_fn = start)]
pub async fn run<N: Notifier>(notifier: N, config: Option<Config>) -> eyre::Result<()> {
    init_tracing()?;

    let config = match config {
        Some(config) => config,
        None => Config::load()?,
    };

    let service = Arc::new(service::Service::connect_with(config.clone()).await?);

    let dispatcher = service.dispatcher(notifier);
    let janitor = Janitor::new(Arc::clone(&service), &config);

    dispatcher.start().await;
    janitor.start().await;

    let data = Data::from(Arc::clone(&service));

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_header()
            .allow_any_method();

        let json_cfg = JsonConfig::default().content_type_required(false);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(NormalizePath::new(TrailingSlash::Trim))
            .wrap(cors)
            .service(api::queue::service())
            .app_data(data.clone())
            .app_data(json_cfg)
    })
    .bind(config.bind.as_str())?
    .run()
    .await;

    tracing::info!("HTTP server exited, stopping workers");

    dispatcher.stop().await;
    janitor.stop().await;

    server?;

    Ok(())
}
