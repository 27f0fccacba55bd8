//! Runs one channel switch node over UDP.
//!
//! ```text
//! cargo run --example node -- [--config node.json] [--parent ADDR]
//!     [--child ADDR]... [--initiate CHANNEL]
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chswitch::network::{StaticTopology, UdpTransport};
use chswitch::{Channel, Config, Node};
use tokio::time::sleep;

struct Args {
    config: Config,
    parent: Option<SocketAddr>,
    children: Vec<SocketAddr>,
    initiate: Option<Channel>,
}

fn parse_args() -> Result<Args, Box<dyn std::error::Error>> {
    let mut args = Args {
        config: Config::default(),
        parent: None,
        children: Vec::new(),
        initiate: None,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(flag) = iter.next() {
        let value = iter.next().ok_or_else(|| format!("missing value for {}", flag))?;
        match flag.as_str() {
            "--config" => args.config = serde_json::from_str(&std::fs::read_to_string(value)?)?,
            "--parent" => args.parent = Some(value.parse()?),
            "--child" => args.children.push(value.parse()?),
            "--initiate" => args.initiate = Some(Channel(value.parse()?)),
            other => return Err(format!("unknown flag {}", other).into()),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = parse_args()?;
    let topology = StaticTopology::new();
    for child in &args.children {
        topology.add_route(*child, *child);
    }
    topology.set_parent(args.parent);

    let transport = UdpTransport::bind(args.config.bind_addr)?;
    println!("Listening on {}", transport.local_addr());
    let (inbound, receiver) = transport.spawn_receiver(args.config.event_queue);

    let node = Node::new(args.config, Arc::new(transport), Arc::new(topology))?.spawn(inbound);

    if let Some(channel) = args.initiate {
        // Give peers a moment to come up
        sleep(Duration::from_secs(1)).await;
        node.initiate(channel).await?;
    }

    tokio::signal::ctrl_c().await?;
    receiver.abort();
    node.shutdown().await;
    Ok(())
}
