use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use logging_timer::stimer;
use tracing::{error, info, warn};

use es_bulk_writer::audit_builder::Audit;
use es_bulk_writer::conf::Config;
use es_bulk_writer::error::JobError;
use es_bulk_writer::input::records_from_ndjson;
use es_bulk_writer::{BulkWriter, EsClient, IndexProvisioner};

/// Loads NDJSON documents into an Elasticsearch index.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Job config file (TOML or JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// NDJSON file with one document per line
    #[arg(short, long)]
    input: PathBuf,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    debug: bool,

    /// Log as JSON lines
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

fn init_tracing(debug: bool, json: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.debug, args.log_json);
    info!(
        "Args debug={:?}, config={:?}, input={:?}",
        args.debug, args.config, args.input
    );

    match run(&args).await {
        Ok(()) => {
            info!("Job finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Job failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> Result<(), JobError> {
    let config = Config::load(&args.config)?;
    let audit = match config.get_bulk().get_audit_file() {
        Some(file_name) => Audit::open(file_name).await,
        None => Audit::disabled(),
    };

    let client = EsClient::connect(config.get_connection()).await?;
    let result = run_job(&config, &client, audit, &args.input).await;
    client.close();
    result
}

async fn run_job(
    config: &Config,
    client: &EsClient,
    audit: Audit,
    input: &Path,
) -> Result<(), JobError> {
    let spec = config.get_index();
    let provisioner = IndexProvisioner::new(client.clone()).with_audit(audit.clone());
    if spec.is_delete_if_exists() {
        provisioner.delete_index(spec.get_name()).await?;
    }

    let provisioned = provisioner.ensure_index(spec).await?;
    if spec.is_wait_for_mapping() {
        provisioned.wait_for_mapping().await?;
    } else if provisioned.is_mapping_pending() {
        warn!(
            "Mapping of {} not confirmed yet, first writes may race with it",
            spec.get_name()
        );
    }

    let text = tokio::fs::read_to_string(input)
        .await
        .map_err(|source| JobError::Input {
            path: input.display().to_string(),
            source,
        })?;
    let records = records_from_ndjson(&text, config.get_bulk().get_id_field())?;
    info!("Read {} records from {:?}", records.len(), input);

    let writer = BulkWriter::with_config(client.clone(), config.get_bulk()).with_audit(audit);
    let outcome = {
        let _tmr = stimer!("BULK_INSERT");
        writer
            .insert_batched(spec.get_name(), spec.get_type_name(), &records)
            .await?
    };

    let failed = outcome.failures();
    if failed > 0 {
        return Err(JobError::RejectedRecords {
            failed,
            total: records.len(),
        });
    }
    info!(
        "Indexed {} records into {}",
        outcome.items().len(),
        spec.get_name()
    );
    Ok(())
}
