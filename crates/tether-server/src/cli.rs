use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "tether-server", about = "Tether chat server")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/tether.toml")]
    pub config: String,
}
