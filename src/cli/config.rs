use crate::config::generate::generate_starter_config;
use std::fs;
use std::path::PathBuf;

/// Writes a starter config to stdout or the first writable config location.
pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    // Prefer ~/.config/auditfeed/config.yml, fall back to /etc
    let config_path = dirs::home_dir()
        .map(|home| home.join(".config/auditfeed/config.yml"))
        .filter(|path| match path.parent() {
            Some(parent) => match fs::create_dir_all(parent) {
                Ok(()) => true,
                Err(_) => {
                    eprintln!("Warning: Could not create directory {}", parent.display());
                    eprintln!("Falling back to /etc/auditfeed/config.yml");
                    false
                }
            },
            None => false,
        })
        .unwrap_or_else(|| PathBuf::from("/etc/auditfeed/config.yml"));

    if config_path.exists() {
        eprintln!(
            "Error: Config file already exists at {}",
            config_path.display()
        );
        eprintln!("Remove it first or use --stdout to print the config");
        std::process::exit(1);
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(&config_path, config_content)?;

    println!("Config file written to {}", config_path.display());
    Ok(())
}
