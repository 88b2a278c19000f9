use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

mod catalog;
mod cli;
mod config;
mod embedding;
mod engine;
mod pipeline;
mod store;
#[cfg(test)]
mod tests;
mod web;

use catalog::CatalogItem;
use cli::{Command, ConfigAction};
use config::Config;
use embedding::{EmbeddingModel, FeatureExtractor, ImageLoader, ImageRef};
use engine::{SearchEngine, SearchOptions};
use pipeline::PrecomputeParams;
use store::{StoreError, VectorStore};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();
    let mut config = Config::load(args.config.as_deref())?;

    match args.command {
        Command::Config {
            action: ConfigAction::Init { path },
        } => {
            std::fs::write(&path, config.to_yaml()?)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("wrote {}", path.display());
            Ok(())
        }

        Command::Serve { catalog, addr } => {
            if let Some(addr) = addr {
                config.server.addr = addr;
            }
            let (extractor, model) = build_extractor(&config)?;
            let items = load_hydrated_catalog(&catalog, &config, &model)?;
            log::info!("serving {} catalog items", items.len());

            let state = web::ServerState {
                engine: SearchEngine::new(extractor, config.search.clone(), model.version()),
                catalog: tokio::sync::RwLock::new(items),
                dimensions: model.dimensions(),
                shutdown: CancellationToken::new(),
            };
            web::start_daemon(state, config.server.clone())
        }

        Command::Precompute { catalog } => {
            let (extractor, model) = build_extractor(&config)?;
            let mut items = load_hydrated_catalog(&catalog, &config, &model)?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;

            let bar = indicatif::ProgressBar::new(items.len() as u64);
            let params = PrecomputeParams {
                batch_size: config.search.batch_size,
                item_timeout_ms: config.search.item_timeout_ms,
            };
            let state = runtime.block_on(pipeline::precompute(
                &mut items,
                &extractor,
                model.version(),
                &params,
                &CancellationToken::new(),
                Some(&bar),
            ));
            bar.finish();

            let vectors = store::collect_vectors(&items, model.version(), model.dimensions());
            let vector_store = VectorStore::new(config.vectors_path.clone());
            vector_store.save(&vectors, &model.model_id_hash(), model.dimensions())?;

            println!(
                "{} processed, {} skipped, {} failed of {}",
                state.processed,
                state.skipped,
                state.failed_ids.len(),
                state.total
            );
            for id in &state.failed_ids {
                println!("failed: {id}");
            }
            Ok(())
        }

        Command::Search {
            image,
            catalog,
            limit,
            floor,
        } => {
            let (extractor, model) = build_extractor(&config)?;
            let items = load_hydrated_catalog(&catalog, &config, &model)?;

            let engine = SearchEngine::new(extractor, config.search.clone(), model.version());
            let opts = SearchOptions {
                limit: limit.unwrap_or(config.search.default_limit),
                floor: floor.unwrap_or(config.search.default_floor),
            };

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let hits = runtime.block_on(engine.search(
                &ImageRef::parse(&image),
                &items,
                &opts,
                &CancellationToken::new(),
            ))?;

            println!("{}", serde_json::to_string_pretty(&hits)?);
            Ok(())
        }
    }
}

fn build_extractor(config: &Config) -> anyhow::Result<(FeatureExtractor, Arc<EmbeddingModel>)> {
    let model = Arc::new(EmbeddingModel::load(&config.model)?);
    let loader = ImageLoader::new(&config.loader)?;
    Ok((FeatureExtractor::new(loader, Arc::clone(&model)), model))
}

/// Load the catalog and fold in any precomputed vectors that are still
/// valid for the active model.
fn load_hydrated_catalog(
    path: &Path,
    config: &Config,
    model: &EmbeddingModel,
) -> anyhow::Result<Vec<CatalogItem>> {
    let mut items = catalog::load_catalog(path)
        .with_context(|| format!("loading catalog {}", path.display()))?;

    let vector_store = VectorStore::new(config.vectors_path.clone());
    if vector_store.exists() {
        match vector_store.load(&model.model_id_hash(), model.dimensions()) {
            Ok(vectors) => {
                store::hydrate(&mut items, &vectors, model.version());
                log::info!("hydrated {} precomputed vectors", vectors.len());
            }
            Err(StoreError::ModelMismatch) => {
                log::warn!("stored vectors were built by a different model, discarding them");
                vector_store.delete()?;
            }
            Err(e) => {
                log::warn!("could not load stored vectors: {e}");
            }
        }
    }

    Ok(items)
}
