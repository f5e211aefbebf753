mod cli;

use std::sync::Arc;

use aegis_agent::logs::RpcClearanceLogs;
use aegis_agent::poller::{Clearance, ClearancePoller};
use aegis_core::calldata::{
    CommitProtocol, encode_verdict_checked, parse_trade_id, request_audit_calldata, to_hex,
    trigger_swap_calldata,
};
use aegis_core::error::AuditError;
use aegis_core::risk::{RiskMask, decode_score, summarize};
use aegis_core::rpc_client::ChainRpcClient;
use aegis_core::wait::cancel_pair;
use alloy_primitives::Address;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{CalldataCommand, Cli, Command, WatchArgs};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error("{0}")]
    RpcTransport(String),

    #[error("{0}")]
    Interrupted(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::RpcTransport(_) => 4,
            Self::Interrupted(_) => 130,
        }
    }
}

impl From<AuditError> for CliError {
    fn from(value: AuditError) -> Self {
        match value {
            AuditError::Input { reason } => Self::Usage(reason),
            other => Self::RpcTransport(other.to_string()),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json_mode = cli.json;

    match run(cli).await {
        Ok(payload) => report(json_mode, Ok(&payload)),
        Err(err) => {
            let exit_code = err.exit_code();
            report(json_mode, Err((&err.to_string(), exit_code)));
            std::process::exit(exit_code);
        }
    }
}

async fn run(cli: Cli) -> Result<serde_json::Value, CliError> {
    match cli.command {
        Command::Calldata { command } => {
            let data = match command {
                CalldataCommand::RequestAudit { token } => {
                    request_audit_calldata(parse_address("token", &token)?)
                }
                CalldataCommand::TriggerSwap {
                    token,
                    amount_in,
                    amount_out_min,
                } => trigger_swap_calldata(
                    parse_address("token", &token)?,
                    parse_amount("amount-in", &amount_in)?,
                    parse_amount("amount-out-min", &amount_out_min)?,
                ),
            };
            Ok(serde_json::json!(to_hex(&data)))
        }
        Command::Verdict(args) => {
            let data = encode_verdict_checked(CommitProtocol::V1, &args.trade_id, args.risk_score)
                .map_err(|err| CliError::Usage(err.to_string()))?;
            Ok(serde_json::json!(to_hex(&data)))
        }
        Command::Risk { score } => Ok(serde_json::json!(decode_score(score))),
        Command::Watch(args) => watch(args).await,
    }
}

async fn watch(args: WatchArgs) -> Result<serde_json::Value, CliError> {
    let module = parse_address("module", &args.module)?;
    let token = parse_address("token", &args.token)?;
    let client = ChainRpcClient::new(&args.rpc_url, args.timeout)?;

    let start_block = match args.from_block {
        Some(block) => block,
        None => client.block_number().await?,
    };

    let poller = ClearancePoller::new(
        Arc::new(RpcClearanceLogs::new(client, module)),
        args.interval,
        args.attempts,
    );
    let (interrupt, cancel) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let outcome = poller.wait(token, start_block, &cancel).await;
    if let Clearance::Cancelled { attempts } = outcome {
        return Err(CliError::Interrupted(format!(
            "clearance wait interrupted after {attempts} attempts"
        )));
    }
    if let Clearance::Denied { risk_score } = outcome
        && let Ok(bits) = u8::try_from(risk_score)
    {
        return Ok(serde_json::json!({
            "clearance": outcome,
            "reasoning": summarize(RiskMask::new(bits)),
        }));
    }
    Ok(serde_json::json!({ "clearance": outcome }))
}

fn parse_address(flag: &str, raw: &str) -> Result<Address, CliError> {
    raw.trim()
        .parse()
        .map_err(|err| CliError::Usage(format!("--{flag}: invalid address '{raw}': {err}")))
}

fn parse_amount(flag: &str, raw: &str) -> Result<alloy_primitives::U256, CliError> {
    parse_trade_id(raw).map_err(|_| CliError::Usage(format!("--{flag}: '{raw}' is not a uint256")))
}

fn report(json_mode: bool, result: Result<&serde_json::Value, (&str, i32)>) {
    match (json_mode, result) {
        (true, Ok(payload)) => println!("{}", serde_json::json!({ "ok": true, "result": payload })),
        (true, Err((message, code))) => eprintln!(
            "{}",
            serde_json::json!({ "ok": false, "error": { "message": message, "code": code } })
        ),
        (false, Ok(serde_json::Value::String(text))) => println!("{text}"),
        (false, Ok(payload)) => match serde_json::to_string_pretty(payload) {
            Ok(rendered) => println!("{rendered}"),
            Err(_) => println!("{payload}"),
        },
        (false, Err((message, _))) => eprintln!("error: {message}"),
    }
}
