use std::{fs, path::PathBuf};

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "openapi-export", about = "Write the pantry-api OpenAPI document to disk")]
struct Args {
    /// Output file
    #[arg(long, short, default_value = "openapi/pantry-api.v1.json")]
    output: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let json = pantry_api::openapi::openapi_json()?;

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(&args.output, json)?;

    println!("OpenAPI spec written to {}", args.output.display());
    Ok(())
}
