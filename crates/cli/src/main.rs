use larder_cli::{forecast_history, read_history, Args};
use larder_forecast::EngineSettings;

fn main() -> anyhow::Result<()> {
    larder_observability::init();

    let args = Args::parse(std::env::args().skip(1))?;
    let settings = EngineSettings::from_env()?;
    let records = read_history(&args.history_path)?;
    tracing::info!(records = records.len(), path = %args.history_path.display(), "history loaded");

    let result = forecast_history(records, args.ingredient_id, &settings)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
