use std::time::Duration;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "aegis-agent",
    version,
    about = "Trading-agent helper for the Aegis audit protocol"
)]
pub struct Cli {
    /// Emit `{ "ok": .., "result": .. }` envelopes instead of plain output.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build calldata for the receiving contract's agent entry points.
    Calldata {
        #[command(subcommand)]
        command: CalldataCommand,
    },
    /// Encode an oracle verdict as `onReportDirect` calldata.
    Verdict(VerdictArgs),
    /// Decode a risk code into its named checks.
    Risk {
        #[arg(allow_negative_numbers = true)]
        score: i64,
    },
    /// Wait for the contract to approve or deny a token.
    Watch(WatchArgs),
}

#[derive(Debug, Subcommand)]
pub enum CalldataCommand {
    RequestAudit {
        #[arg(long)]
        token: String,
    },
    TriggerSwap {
        #[arg(long)]
        token: String,
        /// Input amount in base units.
        #[arg(long)]
        amount_in: String,
        #[arg(long, default_value = "1")]
        amount_out_min: String,
    },
}

#[derive(Debug, Args)]
pub struct VerdictArgs {
    #[arg(long)]
    pub trade_id: String,
    #[arg(long, allow_negative_numbers = true)]
    pub risk_score: i64,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    #[arg(long, env = "AEGIS_RPC_URL")]
    pub rpc_url: String,
    /// Receiving contract address.
    #[arg(long, env = "AEGIS_MODULE_ADDRESS")]
    pub module: String,
    #[arg(long)]
    pub token: String,
    /// Block to scan from; defaults to the current head.
    #[arg(long)]
    pub from_block: Option<u64>,
    #[arg(long, default_value_t = 120)]
    pub attempts: u32,
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub interval: Duration,
    /// Per-request RPC timeout.
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub timeout: Duration,
}

/// Durations like "500ms", "1s", "2m"; a bare number is seconds.
fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    let parsed = if let Some(n) = s.strip_suffix("ms") {
        n.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(n) = s.strip_suffix('s') {
        n.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(n) = s.strip_suffix('m') {
        n.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    };
    parsed.ok_or_else(|| format!("invalid duration: {input}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trigger_swap_with_default_minimum() {
        let cli = Cli::try_parse_from([
            "aegis-agent",
            "calldata",
            "trigger-swap",
            "--token",
            "0x4200000000000000000000000000000000000006",
            "--amount-in",
            "1000000000000000000",
        ])
        .expect("cli should parse");

        match cli.command {
            Command::Calldata {
                command: CalldataCommand::TriggerSwap { amount_out_min, .. },
            } => assert_eq!(amount_out_min, "1"),
            other => panic!("unexpected command parsed: {other:?}"),
        }
    }

    #[test]
    fn parses_watch_cadence() {
        let cli = Cli::try_parse_from([
            "aegis-agent",
            "watch",
            "--rpc-url",
            "http://127.0.0.1:8545",
            "--module",
            "0x1234567890123456789012345678901234567890",
            "--token",
            "0x4200000000000000000000000000000000000006",
            "--interval",
            "500ms",
            "--attempts",
            "3",
        ])
        .expect("cli should parse");

        match cli.command {
            Command::Watch(args) => {
                assert_eq!(args.interval, Duration::from_millis(500));
                assert_eq!(args.attempts, 3);
                assert_eq!(args.from_block, None);
            }
            other => panic!("unexpected command parsed: {other:?}"),
        }
    }

    #[test]
    fn duration_suffixes() {
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Ok(Duration::from_secs(10)));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn oversized_minutes_are_a_value_error() {
        assert!(parse_duration("307445734561825861m").is_err());
        assert_eq!(
            parse_duration("307445734561825860m"),
            Ok(Duration::from_secs(307_445_734_561_825_860 * 60))
        );

        let err = Cli::try_parse_from([
            "aegis-agent",
            "watch",
            "--rpc-url",
            "http://127.0.0.1:8545",
            "--module",
            "0x1234567890123456789012345678901234567890",
            "--token",
            "0x4200000000000000000000000000000000000006",
            "--interval",
            "307445734561825861m",
        ])
        .expect_err("overflowing interval");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
