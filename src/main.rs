use anyhow::Result;
use dialogue2speech::core::config::Config;
use dialogue2speech::services::tts::create_speech_client;
use dialogue2speech::services::workflow::BatchGenerator;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            return Err(e);
        }
    };

    // One client for the whole run.
    let client = create_speech_client(&config)?;
    info!("Using {} speech provider", client.name());

    let generator = BatchGenerator::new(config, client);
    let summary = generator.run().await?;

    println!("Speech generation complete: {}", summary);
    for failed in &summary.failed {
        eprintln!("  {}: {}", failed.identifier, failed.error);
    }

    Ok(())
}
