use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use single_paxos::{Value, logger, run};

#[derive(Parser)]
#[clap(about = "Single-decree Paxos over a fixed cluster")]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one node of the cluster
    Node {
        #[clap(long)]
        node_id: u64,

        /// path to config file
        #[clap(long, default_value = "config.yaml")]
        config: PathBuf,
    },
    /// Run every configured node in this process
    Cluster {
        #[clap(long, default_value = "config.yaml")]
        config: PathBuf,
    },
    /// Ask a node to agree on a value
    Propose {
        /// host:port of the node
        #[clap(long)]
        target: String,

        /// defaults to the worst case of the run config in `--config`
        #[clap(long)]
        timeout_ms: Option<u64>,

        #[clap(long, default_value = "config.yaml")]
        config: PathBuf,

        value: String,
    },
    /// Print a node's agreed value
    Read {
        #[clap(long)]
        target: String,

        #[clap(long, default_value_t = 5_000)]
        timeout_ms: u64,
    },
    /// Contend for a value among three in-process nodes
    Simulate {
        #[clap(long, num_args = 1.., default_values = ["message_a", "message_b"])]
        values: Vec<String>,

        #[clap(long, default_value = "sim-state")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Node { node_id, config } => run::run_node(node_id, &config).await,
        Command::Cluster { config } => run::run_cluster(&config).await,
        Command::Propose {
            target,
            timeout_ms,
            config,
            value,
        } => {
            let timeout = match timeout_ms {
                Some(ms) => Duration::from_millis(ms),
                None => run::propose_deadline(&config),
            };
            let status = run::propose(&target, Value::from(value), timeout).await?;
            println!("{}", status);
            Ok(())
        }
        Command::Read { target, timeout_ms } => {
            match run::read(&target, Duration::from_millis(timeout_ms)).await? {
                Some(value) => println!("{}", value),
                None => println!("(no value committed)"),
            }
            Ok(())
        }
        Command::Simulate { values, data_dir } => {
            logger::init_tracing_with("info");
            let values = values.into_iter().map(Value::from).collect();
            let report = run::simulate(values, data_dir).await?;
            for (node_id, value, status) in &report.proposals {
                println!("node {} proposed '{}': {}", node_id, value, status);
            }
            for (node_id, stored) in &report.stored {
                match stored {
                    Some(value) => println!("node {} holds '{}'", node_id, value),
                    None => println!("node {} holds nothing", node_id),
                }
            }
            Ok(())
        }
    }
}
