use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use roomnet_common::config::{self, GameConfig};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomnet_game=info,roomnet_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let conf = match std::env::var("ROOMNET_CONFIG") {
        Ok(path) => config::load::<GameConfig>(&path)
            .map_err(|e| std::io::Error::other(e.to_string()))?,
        Err(_) => {
            tracing::warn!("ROOMNET_CONFIG not set, using defaults");
            GameConfig::default()
        }
    };

    roomnet_game::server::serve(conf).await
}
