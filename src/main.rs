use clap::Parser;
use opscan::cli::{self, Cli};

fn main() {
    let args = Cli::parse();
    opscan::logging::init(args.verbose);

    let mut stdout = std::io::stdout().lock();
    if let Err(error) = cli::run(args.command, &mut stdout) {
        tracing::debug!(code = error.error_code(), "command failed");
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
