use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use squidjob_pdf::{
    CompressionRequest, CompressionResult, CompressionService, CompressionServiceImpl,
    CompressionSettings, CompressionTier,
};

/// Shrink a PDF toward the size target of a compression tier
#[derive(Parser, Debug)]
#[command(name = "squidjob-compress", version, about)]
struct Cli {
    /// PDF to compress
    input: PathBuf,

    /// Where to write the compressed PDF
    output: PathBuf,

    /// light, recommended or extreme
    #[arg(long, default_value = "recommended")]
    tier: CompressionTier,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    /// Never call Ghostscript
    #[arg(long)]
    no_external: bool,

    /// Ghostscript executable
    #[arg(long, env = "SQUIDJOB_GS_PATH")]
    gs_path: Option<String>,

    /// Seconds before a Ghostscript run is killed
    #[arg(long, env = "SQUIDJOB_TOOL_TIMEOUT_SECS")]
    tool_timeout_secs: Option<u64>,
}

fn print_summary(result: &CompressionResult) {
    println!("{}", result.output_path.display());
    println!(
        "  {:.1} KB -> {:.1} KB ({}% smaller, target {} KB {})",
        result.original_size_kb,
        result.compressed_size_kb,
        result.compression_ratio,
        result.target_size_kb,
        if result.target_reached { "reached" } else { "not reached" }
    );
    println!(
        "  method {}, {} iterations, {} ms",
        result.method_used.as_str(),
        result.iterations,
        result.duration_ms
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    squidjob_pdf::init_logging();

    let cli = Cli::parse();

    let mut settings = CompressionSettings::from_env();
    if let Some(path) = cli.gs_path {
        settings.ghostscript_path = path;
    }
    if let Some(secs) = cli.tool_timeout_secs {
        settings.tool_timeout_secs = secs;
    }
    if cli.no_external {
        settings.use_external_tool = false;
    }
    if let Err(e) = settings.validate() {
        eprintln!("Invalid configuration: {}", e);
        return ExitCode::from(2);
    }

    let service = CompressionServiceImpl::from_settings(settings);
    let request = CompressionRequest::new(cli.input, cli.output, cli.tier);

    match service.compress_pdf(request).await {
        Ok(result) => {
            if cli.json {
                match serde_json::to_string_pretty(&result) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        eprintln!("Could not serialize result: {}", e);
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                print_summary(&result);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            eprintln!("could not compress; original kept ({})", e);
            ExitCode::FAILURE
        }
    }
}
