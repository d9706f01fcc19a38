use clap::{Parser, Subcommand};
use cloudlab_models::{InstanceCommandType, InstanceId};

/// Cloudlab - compute instance lifecycle on Kubernetes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Output format (table or json)
    #[arg(short, long, global = true, default_value = "table")]
    pub output: String,

    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Mode {
    /// Provision the cluster workload of an instance
    Create {
        /// Instance id in the store
        id: InstanceId,
    },

    /// Refresh the stored status from the cluster
    State { id: InstanceId },

    /// Scale the instance back up
    Start { id: InstanceId },

    /// Scale the instance down to zero
    Shutdown { id: InstanceId },

    /// Shutdown followed by start
    Reboot { id: InstanceId },

    /// Remove the cluster workload and mark the instance deleted
    Delete { id: InstanceId },

    /// Show the live cluster view of a workload
    Get {
        /// Compute id (deployment name)
        compute_id: String,
    },

    /// List instances in the store
    List,

    /// List ready cluster nodes
    Nodes,
}

impl Mode {
    /// Lifecycle command carried by this mode, if any
    pub fn lifecycle(&self) -> Option<(InstanceCommandType, InstanceId)> {
        match *self {
            Mode::Create { id } => Some((InstanceCommandType::Create, id)),
            Mode::State { id } => Some((InstanceCommandType::State, id)),
            Mode::Start { id } => Some((InstanceCommandType::Start, id)),
            Mode::Shutdown { id } => Some((InstanceCommandType::Shutdown, id)),
            Mode::Reboot { id } => Some((InstanceCommandType::Reboot, id)),
            Mode::Delete { id } => Some((InstanceCommandType::Delete, id)),
            Mode::Get { .. } | Mode::List | Mode::Nodes => None,
        }
    }
}
