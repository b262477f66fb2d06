use wikiforge_api::app::{self, SweepSettings};
use wikiforge_api::config::ApiConfig;
use wikiforge_queue::{Sweeper, SweeperConfig};

#[tokio::main]
async fn main() {
    wikiforge_observability::init();

    let config = ApiConfig::from_env();
    let store = app::services::build_store(&config).await;

    // The handle must stay alive for the life of the process.
    let _sweeper = config.sweep_interval.map(|interval| {
        Sweeper::spawn(
            store.clone(),
            SweeperConfig {
                interval,
                stale_after: config.stale_after,
            },
        )
    });

    let router = app::build_app(
        store,
        SweepSettings {
            stale_after: config.stale_after,
        },
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind listen address");

    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, router).await.unwrap();
}
