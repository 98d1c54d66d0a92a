// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! OBEX client command line.

use anyhow::{anyhow, Context, Result};
use bluer::Address;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use obex_client::bluetooth::{BluezAdapterManager, RfcommConnector, SdpClient};
use obex_client::obex::StreamEngineFactory;
use obex_client::services::DriverRegistry;
use obex_client::session::LoggingAgentFactory;
use obex_client::{Backend, Client, Config, SessionRequest, TransferSpec};

#[derive(Parser)]
#[command(name = "obex-client", version, about = "Bluetooth OBEX client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Push a file with Object Push.
    Send {
        destination: String,
        file: PathBuf,
        /// Remote name; defaults to the file name.
        #[arg(long)]
        name: Option<String>,
    },
    /// Fetch an object.
    Get {
        destination: String,
        service: String,
        name: String,
        /// MIME type of the object.
        #[arg(long = "type")]
        mime_type: Option<String>,
        /// Local file; defaults to the download directory.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Connect and print session properties.
    Info {
        destination: String,
        service: String,
        /// Skip service discovery and use this RFCOMM channel.
        #[arg(long)]
        channel: Option<u8>,
    },
    /// Change the remote folder.
    Setpath {
        destination: String,
        service: String,
        folder: String,
    },
}

fn parse_address(s: &str) -> Result<Address> {
    s.parse()
        .map_err(|e| anyhow!("Invalid Bluetooth address '{}': {}", s, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("obex_client=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let config = Config::load()?;
    info!("Configuration loaded");

    let backend = Backend {
        adapters: Arc::new(BluezAdapterManager::new().await?),
        discovery: Arc::new(SdpClient::new()),
        connector: Arc::new(RfcommConnector::new()),
        engines: Arc::new(StreamEngineFactory::new(config.obex.mtu)),
        agents: Arc::new(LoggingAgentFactory),
        drivers: Arc::new(DriverRegistry::with_defaults()),
        security: config.bluetooth.security,
    };
    let client = Client::spawn(backend);

    let result = tokio::select! {
        result = run(&client, &config, cli.command) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Err(anyhow!("Interrupted"))
        }
    };

    client.close().await?;
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

fn request(config: &Config, destination: &str, service: &str) -> Result<SessionRequest> {
    let mut request = SessionRequest::new(parse_address(destination)?, service);
    if let Some(source) = config.bluetooth.source_address()? {
        request = request.source(source);
    }
    Ok(request)
}

async fn run(client: &Client, config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Send {
            destination,
            file,
            name,
        } => {
            let session = client.connect(request(config, &destination, "opp")?).await?;
            let ticket = session.send(&file, name.as_deref()).await?;
            let outcome = ticket.finished().await?;
            println!(
                "Sent {} as {} ({} bytes)",
                file.display(),
                outcome.name.unwrap_or_default(),
                outcome.size
            );
        }
        Command::Get {
            destination,
            service,
            name,
            mime_type,
            output,
        } => {
            let output = output.unwrap_or_else(|| config.transfers.download_dir.join(&name));
            let session = client.connect(request(config, &destination, &service)?).await?;

            let mut spec = TransferSpec::new().target_name(&name).filename(&output);
            spec.mime_type = mime_type;
            let outcome = session.get(spec).await?.finished().await?;
            println!("Saved {} to {} ({} bytes)", name, output.display(), outcome.size);
        }
        Command::Info {
            destination,
            service,
            channel,
        } => {
            let mut request = request(config, &destination, &service)?;
            if let Some(channel) = channel {
                request = request.channel(channel);
            }
            let session = client.connect(request).await?;
            let properties = session.properties().await?;
            println!("Source:      {}", properties.source);
            println!("Destination: {}", properties.destination);
            println!("Channel:     {}", properties.channel);
        }
        Command::Setpath {
            destination,
            service,
            folder,
        } => {
            let session = client.connect(request(config, &destination, &service)?).await?;
            session
                .set_path(&folder)
                .await
                .with_context(|| format!("Failed to change folder to {}", folder))?;
            println!("Now in {}", folder);
        }
    }
    Ok(())
}
