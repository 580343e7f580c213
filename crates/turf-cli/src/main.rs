use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing_subscriber::EnvFilter;
use turf_api::{parse_item_list, ReachRequest, RunRequest, SequenceRequest, TurfApi};
use turf_data::{export_run, export_workbook, load_selection, TurfConfig};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "turf")]
#[command(about = "Greedy TURF sequences over respondent spreadsheets")]
struct Cli {
    /// YAML config naming the data file, sheets, and item columns.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Respondent data file; overrides the config's `data_file`.
    #[arg(long, global = true)]
    data_file: Option<PathBuf>,
    /// Respondent sheet; overrides the config's `respondent_sheet`.
    #[arg(long, global = true)]
    sheet: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List catalog items in column order.
    Catalog,
    /// Reach of the union of the given items.
    Reach(ItemArgs),
    /// One greedy sequence, optionally seeded with a forced start.
    Sequence(SequenceArgs),
    /// Optimal sequence plus one forced-start sequence per selected item.
    Run(SelectionArgs),
    /// Write every sequence of a run as CSV sheets with a digest manifest, or as one workbook.
    Export(ExportArgs),
}

#[derive(Debug, Args)]
struct ItemArgs {
    /// Item identifier; repeat or separate with commas.
    #[arg(long = "item", required = true)]
    items: Vec<String>,
}

#[derive(Debug, Args)]
struct SequenceArgs {
    #[command(flatten)]
    selection: ItemArgs,
    #[arg(long)]
    forced_start: Option<String>,
}

#[derive(Debug, Args)]
struct SelectionArgs {
    /// Item identifier; without any, the configured selection table is used.
    #[arg(long = "item")]
    items: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Csv,
    Xlsx,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
    format: ExportFormat,
    #[command(flatten)]
    selection: SelectionArgs,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config =
        TurfConfig::resolve(cli.config.as_deref(), cli.data_file.as_deref(), cli.sheet.as_deref())?;
    let api = TurfApi::from_config(&config)?;

    match cli.command {
        Command::Catalog => emit_json(serde_json::to_value(api.catalog())?),
        Command::Reach(args) => run_reach(&api, &args),
        Command::Sequence(args) => run_sequence(&api, &args),
        Command::Run(args) => run_selection(&api, &config, &args),
        Command::Export(args) => run_export(&api, &config, &args),
    }
}

fn split_items(values: &[String]) -> Vec<String> {
    values.iter().flat_map(|value| parse_item_list(value)).collect()
}

/// Items named on the command line, or the flagged rows of the selection table.
fn selected_items(config: &TurfConfig, args: &SelectionArgs) -> Result<Vec<String>> {
    let items = split_items(&args.items);
    if items.is_empty() {
        load_selection(config)
    } else {
        Ok(items)
    }
}

fn run_reach(api: &TurfApi, args: &ItemArgs) -> Result<()> {
    let response = api.reach(&ReachRequest { items: split_items(&args.items) })?;
    emit_json(serde_json::to_value(response)?)
}

fn run_sequence(api: &TurfApi, args: &SequenceArgs) -> Result<()> {
    let request = SequenceRequest {
        items: split_items(&args.selection.items),
        forced_start: args.forced_start.clone(),
    };
    let response = api.sequence(&request)?;
    emit_json(serde_json::to_value(response)?)
}

fn run_selection(api: &TurfApi, config: &TurfConfig, args: &SelectionArgs) -> Result<()> {
    let request = RunRequest { items: selected_items(config, args)? };
    let run = api.run(&request)?;
    emit_json(serde_json::to_value(run)?)
}

fn run_export(api: &TurfApi, config: &TurfConfig, args: &ExportArgs) -> Result<()> {
    let request = RunRequest { items: selected_items(config, &args.selection)? };
    let run = api.run(&request)?;
    let out_dir = args.out.display().to_string();
    match args.format {
        ExportFormat::Csv => emit_json(serde_json::json!({
            "out_dir": out_dir,
            "format": "csv",
            "manifest": export_run(&run, &args.out)?
        })),
        ExportFormat::Xlsx => emit_json(serde_json::json!({
            "out_dir": out_dir,
            "format": "xlsx",
            "workbook": export_workbook(&run, &args.out)?
        })),
    }
}
