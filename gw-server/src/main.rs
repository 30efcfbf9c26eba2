use clap::{Args, Parser};
use std::path::PathBuf;

#[derive(Parser)]
enum CliCommand {
    GatewayServer(GatewayServerArgs),
}

#[derive(Args, Debug)]
struct GatewayServerArgs {
    #[arg(long)]
    config_file_path: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = CliCommand::parse();

    match cli {
        CliCommand::GatewayServer(args) => {
            if let Err(error) = gw_server::run(&args.config_file_path).await {
                eprintln!("gw-server failed: {error}");
                std::process::exit(1);
            }
        }
    }
}
