use std::path::Path;

use arbor_core::ArborConfig;

/// Print an arbor.toml scaffold rooted at `data_dir`.
pub fn init(data_dir: &Path) -> anyhow::Result<()> {
    let config = ArborConfig::scaffold(data_dir);
    print!("{}", config.to_toml_string()?);
    Ok(())
}
