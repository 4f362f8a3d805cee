use std::collections::HashSet;
use std::fs::File;
use std::io::Read;

use anyhow::bail;
use anyhow::Context;
use chrono::NaiveDate;
use csv::ReaderBuilder;
use csv::StringRecord;
use csv::Trim;
use etf_allocation::market::StaticPriceProvider;
use etf_allocation::quant::portfolio::OptimizerMethod;
use etf_allocation::quant::portfolio::PortfolioConfig;
use etf_allocation::quant::portfolio::PortfolioEngine;
use etf_allocation::quant::portfolio::PortfolioResult;

fn main() -> anyhow::Result<()> {
  let mut args = std::env::args().skip(1);
  let Some(path) = args.next() else {
    bail!("usage: etf-allocation <prices.csv> [method]");
  };
  let methods = match args.next() {
    Some(m) => vec![m.parse::<OptimizerMethod>()?],
    None => vec![
      OptimizerMethod::TargetReturn,
      OptimizerMethod::MonteCarlo,
      OptimizerMethod::MinVolatility,
      OptimizerMethod::MaxSharpe,
    ],
  };

  let file = File::open(&path).with_context(|| format!("opening {path}"))?;
  let (assets, columns) = read_prices(file).with_context(|| format!("reading {path}"))?;
  let mut provider = StaticPriceProvider::new();
  let mut start = NaiveDate::MAX;
  let mut end = NaiveDate::MIN;
  for (asset, points) in assets.iter().zip(columns) {
    if let (Some(first), Some(last)) = (points.first(), points.last()) {
      start = start.min(first.0);
      end = end.max(last.0);
    }
    provider = provider.with_series(asset.clone(), points);
  }

  let config = PortfolioConfig {
    assets,
    start,
    end,
    seed: Some(42),
    ..PortfolioConfig::default()
  };
  let engine = PortfolioEngine::new(config, provider)?;

  let stats = engine.statistics()?;
  println!("Observations: {}", stats.observations);
  for (i, asset) in stats.assets.iter().enumerate() {
    println!(
      "  {asset:>6}  mean {:>9.6}  std {:>9.6}",
      stats.mean[i], stats.std_dev[i]
    );
  }

  for method in methods {
    println!("\n{method:?}");
    match engine.optimize(method) {
      Ok(result) => print_result(&result),
      Err(e) => println!("  failed: {e}"),
    }
  }

  Ok(())
}

fn print_result(result: &PortfolioResult) {
  for (asset, w) in result.assets.iter().zip(result.weights.iter()) {
    println!("  {asset:>6}  {:>8.2}%", w * 100.0);
  }
  println!(
    "  Returns = {:.4}, Volatility = {:.4}, Sharpe = {:.4}",
    result.stats.expected_return, result.stats.volatility, result.stats.sharpe
  );
}

type Columns = Vec<Vec<(NaiveDate, f64)>>;

/// `date,ASSET1,ASSET2,...` with ISO dates; empty cells are missing quotes.
fn read_prices<R: Read>(reader: R) -> anyhow::Result<(Vec<String>, Columns)> {
  let mut reader = ReaderBuilder::new()
    .has_headers(true)
    .trim(Trim::All)
    .from_reader(reader);

  let header = reader.headers()?.clone();
  let mut cells = header.iter();
  let date_col = cells.next().unwrap_or_default().trim_start_matches('\u{feff}');
  if !date_col.eq_ignore_ascii_case("date") {
    bail!("first column must be `date`, found `{date_col}`");
  }
  let assets: Vec<String> = cells.map(str::to_string).collect();
  if assets.is_empty() {
    bail!("no asset columns");
  }
  let mut seen = HashSet::new();
  for asset in &assets {
    if asset.is_empty() || !seen.insert(asset.as_str()) {
      bail!("asset column `{asset}` is empty or repeated");
    }
  }

  let mut columns: Columns = vec![Vec::new(); assets.len()];
  let mut record = StringRecord::new();
  while reader.read_record(&mut record)? {
    let line = record.position().map(|p| p.line()).unwrap_or_default();
    let date = record.get(0).unwrap_or_default();
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
      .with_context(|| format!("line {line}: bad date `{date}`"))?;
    let quotes: StringRecord = record.iter().skip(1).collect();
    let quotes: Vec<Option<f64>> = quotes
      .deserialize(None)
      .with_context(|| format!("line {line}: bad price"))?;

    for (col, quote) in columns.iter_mut().zip(quotes) {
      if let Some(p) = quote {
        col.push((date, p));
      }
    }
  }

  Ok((assets, columns))
}
