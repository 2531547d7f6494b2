//! `dentcoach serve`: start the HTTP API server.

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config()?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("DentCoach Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.model());
    println!("   Knowledge: {} ({})", config.knowledge.backend, config.knowledge.database_path().display());
    println!("   Pairing required: {}", config.gateway.require_pairing);

    dentcoach_gateway::start(config).await?;

    Ok(())
}
