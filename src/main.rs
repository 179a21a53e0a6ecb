use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use blesocks::config::Config;
use blesocks::management::interface::Controller;
use blesocks::{
    Advertiser, BleDialer, BluezCentral, BluezPeripheral, ChannelPublisher, Connector, DialTarget,
    ForwardDialer, L2capTransport, Radio,
};

#[derive(Parser)]
#[command(name = "blesocks", version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, global = true, env = "BLESOCKS_CONFIG")]
    config: Option<PathBuf>,

    /// Controller index, overriding the configuration.
    #[arg(long, global = true)]
    controller: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Wait for a proxy name, open a channel to that proxy and serve local
    /// TCP clients over it, one at a time.
    Forward {
        /// Skip the hand-off and connect to this proxy directly.
        #[arg(long)]
        proxy_name: Option<String>,

        /// Name to advertise while waiting for the hand-off.
        #[arg(long)]
        name: Option<String>,

        /// Local address accepting TCP clients.
        #[arg(long)]
        listen: Option<SocketAddr>,
    },

    /// Publish a channel and bridge every accepted channel to a TCP target.
    Publish {
        /// Name to advertise the channel under.
        #[arg(long)]
        name: String,

        /// Where accepted channels are bridged to, usually a SOCKS proxy.
        #[arg(long)]
        target: SocketAddr,

        /// Write `name` to this device's hand-off characteristic first.
        #[arg(long)]
        managed: Option<String>,
    },
}

fn shutdown_on_signals(token: CancellationToken) -> Result<()> {
    let mut interrupt = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("interrupted"),
            _ = terminate.recv() => info!("terminated"),
        }
        token.cancel();
    });
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path).context("loading configuration")?,
        None => Config::default(),
    };

    let token = CancellationToken::new();
    shutdown_on_signals(token.clone())?;

    match cli.command {
        Command::Forward {
            proxy_name,
            name,
            listen,
        } => forward(&config, cli.controller, &token, proxy_name, name, listen).await,
        Command::Publish {
            name,
            target,
            managed,
        } => publish(&config, cli.controller, &token, name, target, managed).await,
    }
}

async fn forward(
    config: &Config,
    controller: Option<u16>,
    token: &CancellationToken,
    proxy_name: Option<String>,
    name: Option<String>,
    listen: Option<SocketAddr>,
) -> Result<()> {
    let controller = controller.map(Controller).unwrap_or(config.radio.controller());
    let options = config.radio.socket_options();
    let radio = Radio::new(controller);

    let proxy_name = match proxy_name {
        Some(proxy_name) => proxy_name,
        None => {
            let name = match name {
                Some(name) => name,
                None => config.forward.advertised_name()?,
            };

            let mut advertiser = Advertiser::new(radio.clone(), BluezPeripheral::new(controller, options));
            advertiser
                .advertise(&name, config.gatt.service, config.gatt.handoff_characteristic)
                .await
                .context("advertising")?;

            let handed_off = advertiser.await_handoff(token).await;
            if let Err(err) = advertiser.stop_advertise().await {
                warn!("stopping advertising failed: {}", err);
            }
            handed_off.context("waiting for the proxy name")?
        }
    };
    info!(%proxy_name, "proxy name known");

    let connector = Connector::new(
        radio,
        BluezCentral::new(controller, options),
        L2capTransport::new(options),
    );
    let target = DialTarget {
        device_name: proxy_name,
        service: config.gatt.service,
        channel_characteristic: config.gatt.channel_characteristic,
    };
    let dialer = BleDialer::new(connector, target, token.clone());

    let listen = listen.unwrap_or(config.forward.listen);
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {}", listen))?;
    info!(%listen, "accepting tcp clients");

    loop {
        let (mut tcp, client) = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => accepted.context("accepting tcp client")?,
        };
        debug!(%client, "tcp client connected");

        let mut conn = match dialer.dial("tcp", &client.to_string()).await {
            Ok(conn) => conn,
            Err(_) if token.is_cancelled() => break,
            Err(err) => return Err(err).context("dialing over ble"),
        };

        tokio::select! {
            _ = token.cancelled() => {}
            copied = copy_bidirectional(&mut tcp, &mut conn) => match copied {
                Ok((up, down)) => info!(%client, up, down, "tcp client done"),
                Err(err) => warn!(%client, "bridging failed: {}", err),
            },
        }

        // every client gets a fresh channel
        if let Err(err) = conn.close() {
            debug!("closing ble connection: {}", err);
        }
    }

    Ok(())
}

async fn publish(
    config: &Config,
    controller: Option<u16>,
    token: &CancellationToken,
    name: String,
    target: SocketAddr,
    managed: Option<String>,
) -> Result<()> {
    let controller = controller.map(Controller).unwrap_or(config.radio.controller());
    let options = config.radio.socket_options();
    let radio = Radio::new(controller);

    if let Some(managed) = managed {
        let mut connector = Connector::new(
            radio.clone(),
            BluezCentral::new(controller, options),
            L2capTransport::new(options),
        );
        connector
            .deliver_name(
                token,
                &managed,
                config.gatt.service,
                config.gatt.handoff_characteristic,
                &name,
            )
            .await
            .with_context(|| format!("handing our name to {:?}", managed))?;
    }

    let publisher = ChannelPublisher::new(radio, BluezPeripheral::new(controller, options), options);

    loop {
        let (mut stream, peer) = match publisher
            .publish(
                token,
                &name,
                config.gatt.service,
                config.gatt.channel_characteristic,
            )
            .await
        {
            Ok(accepted) => accepted,
            Err(err) if err.is_cancellation() => break,
            Err(err) => return Err(err).context("publishing channel"),
        };

        match TcpStream::connect(target).await {
            Ok(mut tcp) => {
                tokio::select! {
                    _ = token.cancelled() => {}
                    copied = copy_bidirectional(&mut stream, &mut tcp) => match copied {
                        Ok((up, down)) => info!(%peer, up, down, "channel done"),
                        Err(err) => warn!(%peer, "bridging failed: {}", err),
                    },
                }
            }
            Err(err) => warn!(%target, "connecting to target failed: {}", err),
        }

        if let Err(err) = stream.close() {
            debug!("closing channel: {}", err);
        }
        if token.is_cancelled() {
            break;
        }
    }

    Ok(())
}
