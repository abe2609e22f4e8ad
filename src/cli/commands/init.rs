use crate::config::Config;

pub fn cmd_init() -> anyhow::Result<()> {
    if Config::create_default_if_missing()? {
        println!("Created default config.toml");
        println!("Edit it to point the panel at your Plex server, then run: plexpanel daemon");
    } else {
        println!("config.toml already exists, nothing to do.");
    }
    Ok(())
}
