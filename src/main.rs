use clap::Parser;
use h2longpoll::config::DEFAULT_PORT;
use h2longpoll::{Server, ServerConfig};
use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "h2longpoll")]
#[command(about = "HTTP/2 multipart long-polling demo server", long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Port to listen on
    #[arg(long, short, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// PEM private key
    #[arg(long, value_name = "PATH", default_value = "./server.key")]
    key: PathBuf,

    /// PEM certificate
    #[arg(long, value_name = "PATH", default_value = "./server.crt")]
    cert: PathBuf,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}",
                buf.timestamp_millis(),
                record.args()
            )
        })
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        log::error!("server failed: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ServerConfig {
        bind_addr: cli.bind,
        port: cli.port,
        key_path: cli.key,
        cert_path: cli.cert,
        ..ServerConfig::default()
    };

    let server = Server::bind(config)?;
    server.serve()?;
    Ok(())
}
