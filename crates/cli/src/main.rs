use clap::Parser;
use trellis_cli::Cli;
use trellis_migrations::MigrationRegistry;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // The standalone binary has no compiled-in migrations; it can scaffold and
    // report status. Applications embed `trellis_cli::execute` with their own
    // registry to run and revert.
    match trellis_cli::execute(cli, MigrationRegistry::new()).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
