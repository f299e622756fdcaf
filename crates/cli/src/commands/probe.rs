//! `chattermill probe` — one-shot backend health check.

use chattermill_config::AppConfig;
use chattermill_llm::{ChatBackend, HttpChatBackend};

pub async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    let backend = HttpChatBackend::new(config.llm.base_url.clone(), config.llm.model.clone());
    let keys = config.credentials.merged();
    let Some(key) = keys.first() else {
        eprintln!("no credentials configured");
        std::process::exit(1);
    };

    match backend.probe(key).await {
        Ok(()) => {
            println!("ok: {} reachable with the first configured key", config.llm.base_url);
            Ok(())
        }
        Err(e) => {
            eprintln!("probe failed: {e}");
            std::process::exit(1);
        }
    }
}
