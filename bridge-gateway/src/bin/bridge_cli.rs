//! Offline CLI wrapper around the converters (SPEC_FULL.md §1: named as an
//! external collaborator that still exists). Useful for inspecting what a
//! given Anthropic request or OpenAI response translates to without
//! standing up the gateway.

use std::io::{self, Read};
use std::process::ExitCode;

use bridge_core::anthropic::MessagesRequest;
use bridge_core::openai::ChatCompletionsResponse;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bridge-cli", about = "Inspect bridge-core request/response translations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Translate an Anthropic Messages request (read from stdin) into its
    /// OpenAI Chat Completions equivalent.
    Request {
        /// The upstream model name to stamp onto the translated request.
        #[arg(long)]
        upstream_model: String,
    },
    /// Translate an OpenAI Chat Completions response (read from stdin) into
    /// its Anthropic Messages equivalent.
    Response,
}

fn read_stdin() -> io::Result<String> {
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let input = match read_stdin() {
        Ok(input) => input,
        Err(err) => {
            eprintln!("failed to read stdin: {err}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Request { upstream_model } => run_request(&input, &upstream_model),
        Command::Response => run_response(&input),
    };

    match result {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run_request(input: &str, upstream_model: &str) -> Result<String, String> {
    let req: MessagesRequest = serde_json::from_str(input).map_err(|e| format!("invalid JSON: {e}"))?;
    let req = bridge_core::validate(req).map_err(|e| e.to_string())?;
    let upstream_req = bridge_core::request_xform(&req, upstream_model);
    serde_json::to_string_pretty(&upstream_req).map_err(|e| format!("failed to serialize: {e}"))
}

fn run_response(input: &str) -> Result<String, String> {
    let resp: ChatCompletionsResponse =
        serde_json::from_str(input).map_err(|e| format!("invalid JSON: {e}"))?;
    let anthropic_resp = bridge_core::response_xform(&resp).map_err(|e| e.to_string())?;
    serde_json::to_string_pretty(&anthropic_resp).map_err(|e| format!("failed to serialize: {e}"))
}
