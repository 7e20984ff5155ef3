//! `apsync check-config`: validate the configuration offline.

use std::path::Path;

use anyhow::Result;
use apsync_core::PermissionCatalog;

use super::load_config;

pub fn run(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    PermissionCatalog::new()?;

    println!("Configuration OK: {}", config_path.display());
    println!("  role prefix:        {:?}", config.role_prefix);
    println!(
        "  policy prefixes:    mask {}, filter {}, share {}",
        config.mask_prefix, config.filter_prefix, config.share_prefix
    );
    println!("  excluded roles:     {}", config.excluded_roles.len());
    println!("  excluded owners:    {}", config.excluded_owners.len());
    println!("  excluded databases: {}", config.excluded_databases.len());
    println!("  database roles:     {}", on_off(config.import_database_roles));
    println!("  application roles:  {}", on_off(config.import_application_roles));
    println!("  future grants:      {}", on_off(config.create_future_grants));
    if config.connection.connection_url().is_err() {
        println!("  warning: no connection URL configured, pass --database-url");
    }
    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}
