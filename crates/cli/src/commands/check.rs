//! `dentcoach check`: diagnose configuration, store and provider.

use dentcoach_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("DentCoach Check");
    println!("===============\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!("  No config file, using defaults (run `dentcoach init` to create one)");
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  [ok] Config valid");
            config
        }
        Err(e) => {
            println!("  [!!] Config invalid: {e}");
            println!("\n  1 issue found.");
            return Ok(());
        }
    };

    if config.has_api_key() {
        println!("  [ok] API key configured");
    } else {
        println!("  [!!] No API key: add api_key to config.toml or set DENTCOACH_API_KEY");
        issues += 1;
    }

    println!("  Provider:  {} ({})", config.default_provider, config.model());
    if let Some(budget) = config.knowledge.context_budget() {
        println!("  Context:   up to ~{budget} tokens of knowledge per turn");
    } else {
        println!("  Context:   unlimited knowledge per turn");
    }

    match super::open_stores(&config).await {
        Ok(stores) => {
            let store = &stores.knowledge;
            match (store.count().await, store.list_active().await) {
                (Ok(total), Ok(active)) => {
                    println!("  [ok] Knowledge store: {total} entries, {} active", active.len());
                    if active.is_empty() {
                        println!("  [--] No active knowledge; replies will be ungrounded");
                    }
                }
                (Err(e), _) | (_, Err(e)) => {
                    println!("  [!!] Knowledge store unreadable: {e}");
                    issues += 1;
                }
            }
            match stores.resources.list_resources().await {
                Ok(resources) => println!("  [ok] Resources: {}", resources.len()),
                Err(e) => {
                    println!("  [!!] Resource catalog unreadable: {e}");
                    issues += 1;
                }
            }
        }
        Err(e) => {
            println!("  [!!] {e}");
            issues += 1;
        }
    }

    if config.has_api_key() {
        let router = dentcoach_providers::build_from_config(&config);
        match router.default_provider() {
            Some(provider) => match provider.health_check().await {
                Ok(true) => println!("  [ok] Provider '{}' reachable", provider.name()),
                Ok(false) => {
                    println!("  [!!] Provider '{}' reported unhealthy", provider.name());
                    issues += 1;
                }
                Err(e) => {
                    println!("  [!!] Provider '{}' unreachable: {e}", provider.name());
                    issues += 1;
                }
            },
            None => {
                println!("  [!!] No default provider configured");
                issues += 1;
            }
        }
    }

    println!();
    if issues == 0 {
        println!("  All checks passed!");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
