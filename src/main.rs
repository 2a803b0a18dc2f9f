use clap::Parser;

use depth_grayscale::cli::{self, Args, Command};
use depth_grayscale::config::Config;

fn main() {
    let args = Args::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let env = env_logger::Env::default().default_filter_or(config.logging.level.as_str());
    env_logger::Builder::from_env(env).init();

    let result = match &args.command {
        Command::Convert(convert_args) => {
            cli::convert(convert_args, &config).map(|summary| println!("{}", summary))
        }
        Command::Config { action } => cli::handle_config_action(action, args.config.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
