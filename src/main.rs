use anyhow::{Context, Result};
use clap::Parser;
use query_guard::{
    AuditSink, CliArgs, Command, GuardConfig, LoggingConfig, ValidationRequest, build_audit_entry,
    escape_value, init_logging,
};
use serde_json::json;
use std::io::{self, Read};
use std::process::ExitCode;

/// Exit status when the query is rejected.
const EXIT_BLOCKED: u8 = 2;

fn main() -> Result<ExitCode> {
    let logging_config = LoggingConfig::from_env();
    let _guard = init_logging(logging_config)?;

    let cli = CliArgs::parse();

    if let Some(Command::Escape { value }) = &cli.command {
        println!("{}", escape_value(value.as_str()));
        return Ok(ExitCode::SUCCESS);
    }

    let config = GuardConfig::from_args(&cli)?;
    let query = match cli.query.clone() {
        Some(query) => query,
        None => read_stdin()?,
    };

    let validator = config.validator();
    let request = ValidationRequest::new(query, cli.dialect)
        .with_options(config.validation_options());
    let result = validator.validate(&request);

    let entry = build_audit_entry(
        &request.raw_query,
        request.dialect,
        cli.user.as_str(),
        cli.channel.as_str(),
        &result,
    );
    let sink = config.audit_sink()?;
    sink.record(&entry).context("failed to record audit entry")?;

    let output = if cli.audit {
        json!({ "result": result, "audit": entry })
    } else {
        serde_json::to_value(&result)?
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    if result.is_valid() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_BLOCKED))
    }
}

fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("failed to read query from stdin")?;
    Ok(buffer)
}
