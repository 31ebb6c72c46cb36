use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum WeightCommands {
    /// List stored model weights
    List,
    /// Set the model weight of one document
    Set {
        /// Document id
        id: String,
        /// Multiplier (used clamped to 0.5-2.0 when ranking)
        value: f64,
    },
}

#[derive(Parser)]
#[command(name = "quarry")]
#[command(about = "Quarry - conversational retrieval over an indexed knowledge base", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new config file
    Init {
        /// Path for new config file
        #[arg(default_value = "quarry.toml")]
        path: PathBuf,
    },
    /// Index a directory of text files
    Index {
        /// Root directory; document ids are paths relative to it
        dir: PathBuf,
    },
    /// Ask one question, streaming progress
    Ask {
        /// The question
        query: String,
        /// Conversation thread id (enables the thread context cache)
        #[arg(long)]
        thread: Option<String>,
    },
    /// Interactive chat; one thread per chat
    Chat,
    /// Start the HTTP/WebSocket gateway server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,
    },
    /// Inspect or change learned model weights
    Weights {
        #[command(subcommand)]
        action: WeightCommands,
    },
}
