use clap::Parser;
use peercall_lib::{CallConfig, PeerId};

#[derive(Debug, Parser)]
#[command(name = "peercall", version, about = "Peer-to-peer audio/video call client")]
struct Cli {
    /// Файл конфигурации (toml, json, yaml)
    #[arg(short, long, env = "PEERCALL_CONFIG")]
    config: Option<String>,

    /// Адрес сигнального сервера, например ws://127.0.0.1:8080/ws
    #[arg(short, long)]
    server: Option<String>,

    /// Сразу позвонить этому пиру
    #[arg(long)]
    call: Option<String>,

    #[arg(long)]
    auto_accept: bool,

    /// Ограничение видео-битрейта, кбит/с (0 = без ограничения)
    #[arg(long)]
    max_bitrate: Option<u32>,

    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = CallConfig::load(cli.config.as_deref())?;
    if let Some(server) = cli.server {
        config.signaling_url = Some(server);
    }
    if cli.auto_accept {
        config.auto_accept = true;
    }
    if let Some(kbps) = cli.max_bitrate {
        config.max_bitrate_kbps = kbps;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    peercall_lib::run(config, cli.call.map(PeerId::from)).await?;
    Ok(())
}
