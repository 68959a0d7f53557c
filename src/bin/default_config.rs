use mmscope::{config::Config, error::Result};

/// Print the default configuration as JSON.
fn main() -> Result<()> {
    let serialized = serde_json::to_string_pretty(&Config::default())?;
    println!("{serialized}");
    Ok(())
}
