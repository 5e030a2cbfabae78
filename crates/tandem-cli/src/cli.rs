use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tandem_core::ResourceType;

#[derive(Parser)]
#[command(name = "tandem")]
#[command(about = "Inspect and edit synchronized resources from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a resource at version 0
    Init {
        #[arg(value_enum)]
        resource_type: ResourceKind,
        /// Resource ID
        id: String,
        /// Initial document as JSON (defaults to an empty object)
        #[arg(long, value_name = "JSON")]
        data: Option<String>,
        /// User recorded as the creator
        #[arg(long, value_name = "ID", default_value = "cli")]
        user: String,
    },
    /// Submit an operation
    Apply {
        /// Operation as JSON (read from --file or stdin when omitted)
        operation: Option<String>,
        /// Read the operation from a file
        #[arg(short, long, value_name = "PATH", conflicts_with = "operation")]
        file: Option<PathBuf>,
        /// Client connection ID attached to the broadcast event
        #[arg(long, value_name = "ID", default_value = "cli")]
        client: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a resource's current state
    Show {
        #[arg(value_enum)]
        resource_type: ResourceKind,
        /// Resource ID
        id: String,
    },
    /// Print a resource's current version
    Version {
        #[arg(value_enum)]
        resource_type: ResourceKind,
        /// Resource ID
        id: String,
    },
    /// List committed operations, newest first
    History {
        #[arg(value_enum)]
        resource_type: ResourceKind,
        /// Resource ID
        id: String,
        /// Number of operations to show (TANDEM_HISTORY_LIMIT when omitted)
        #[arg(short, long)]
        limit: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check that replaying the log reproduces the stored document
    Verify {
        #[arg(value_enum)]
        resource_type: ResourceKind,
        /// Resource ID
        id: String,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ResourceKind {
    Workflow,
    Conversation,
    Task,
}

impl From<ResourceKind> for ResourceType {
    fn from(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Workflow => Self::Workflow,
            ResourceKind::Conversation => Self::Conversation,
            ResourceKind::Task => Self::Task,
        }
    }
}
