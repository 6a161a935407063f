//! CLI argument parsing via clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tool-calling chat runtime for OpenAI-compatible APIs.
#[derive(Debug, Parser)]
#[command(name = "toolflow", version, long_version = toolflow::build_info::LONG_VERSION)]
pub struct Args {
    /// Path to config file (default: ./toolflow.toml or ~/.config/toolflow/toolflow.toml).
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<String>,

    /// Disable color output.
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Chat with the model. Without a prompt, starts an interactive loop.
    Chat(ChatArgs),
    /// Run a one-shot script file through `execute_code`.
    Run {
        file: PathBuf,
    },
    /// Compile a dynamic tool definition and print its diagnostics.
    Check {
        file: PathBuf,
        /// Tool name (default: the file stem).
        #[arg(long)]
        name: Option<String>,
    },
    /// List the tools the model can call.
    Tools,
    /// List saved sessions, most recent first.
    Sessions,
    /// Write the default config to ~/.config/toolflow/toolflow.toml.
    Init {
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Default, clap::Args)]
pub struct ChatArgs {
    /// Prompt to send. If provided, runs one turn and exits.
    pub prompt: Option<String>,

    /// Continue a saved session instead of starting a new one.
    #[arg(short = 's', long = "session")]
    pub session: Option<String>,

    /// Resume the session's interrupted turn before anything else.
    #[arg(long = "resume", requires = "session")]
    pub resume: bool,

    /// Override model name.
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_interactive_chat() {
        let args = Args::parse_from(["toolflow"]);
        assert!(args.command.is_none());
        assert!(!args.no_color);
    }

    #[test]
    fn chat_accepts_prompt_and_session() {
        let args = Args::parse_from(["toolflow", "chat", "hello", "--session", "abcd-1234", "--resume"]);
        let Some(Command::Chat(chat)) = args.command else {
            panic!("expected chat");
        };
        assert_eq!(chat.prompt.as_deref(), Some("hello"));
        assert_eq!(chat.session.as_deref(), Some("abcd-1234"));
        assert!(chat.resume);
    }

    #[test]
    fn resume_requires_a_session() {
        assert!(Args::try_parse_from(["toolflow", "chat", "--resume"]).is_err());
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let args = Args::parse_from(["toolflow", "check", "tool.tf", "--name", "spawn_row", "-c", "x.toml"]);
        assert_eq!(args.config.as_deref(), Some("x.toml"));
        let Some(Command::Check { file, name }) = args.command else {
            panic!("expected check");
        };
        assert_eq!(file, PathBuf::from("tool.tf"));
        assert_eq!(name.as_deref(), Some("spawn_row"));
    }
}
