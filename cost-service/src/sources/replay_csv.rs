use std::{fs::File, path::PathBuf, str::FromStr};

use csv::StringRecord;
use rust_decimal::Decimal;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// Which engine a replay file feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingKind {
    /// Cumulative energy counter readings.
    Energy,
    /// Instantaneous power samples.
    Power,
}

impl ReadingKind {
    fn column(self) -> &'static str {
        match self {
            Self::Energy => "energy",
            Self::Power => "power",
        }
    }
}

/// One replayed reading with the price in force at that time.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayRow {
    pub kind: ReadingKind,
    pub value: Decimal,
    pub price: Decimal,
    pub unit: Option<String>,
}

/// CSV source for offline replays.
///
/// Expected header columns (by name):
/// - ts (RFC3339 timestamp)
/// - energy or power, exactly one of them
/// - price
/// - unit (optional; `kW` or `W` for power files)
pub struct ReplayCsvSource {
    path: PathBuf,
}

impl ReplayCsvSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

fn reading_kind(headers: &StringRecord) -> Result<ReadingKind, PipelineError> {
    let has = |name: &str| headers.iter().any(|h| h.trim() == name);
    match (has("energy"), has("power")) {
        (true, false) => Ok(ReadingKind::Energy),
        (false, true) => Ok(ReadingKind::Power),
        (true, true) => Err(PipelineError::Source(
            "CSV has both 'energy' and 'power' columns".to_string(),
        )),
        (false, false) => Err(PipelineError::Source(
            "CSV needs an 'energy' or 'power' column".to_string(),
        )),
    }
}

fn parse_decimal(name: &str, raw: &str) -> Result<Decimal, PipelineError> {
    let trimmed = raw.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|e| PipelineError::Source(format!("invalid {name} '{raw}': {e}")))
}

fn record_to_row(
    record: &StringRecord,
    headers: &StringRecord,
    kind: ReadingKind,
) -> Result<(OffsetDateTime, ReplayRow), PipelineError> {
    let get = |name: &str| -> Result<&str, PipelineError> {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .and_then(|idx| record.get(idx))
            .ok_or_else(|| PipelineError::Source(format!("missing column '{name}' in CSV record")))
    };

    let ts_str = get("ts")?;
    let ts = OffsetDateTime::parse(ts_str.trim(), &Rfc3339)
        .map_err(|e| PipelineError::Source(format!("invalid ts '{ts_str}': {e}")))?;

    let value = parse_decimal(kind.column(), get(kind.column())?)?;
    let price = parse_decimal("price", get("price")?)?;
    let unit = get("unit")
        .ok()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string);

    Ok((ts, ReplayRow { kind, value, price, unit }))
}

#[async_trait::async_trait]
impl Source<ReplayRow> for ReplayCsvSource {
    async fn stream(&self) -> EnvelopeStream<ReplayRow> {
        let path = self.path.clone();
        let s = async_stream::try_stream! {
            let file = File::open(&path).map_err(|e| {
                PipelineError::Source(format!("failed to open CSV file {}: {e}", path.display()))
            })?;
            let mut rdr = csv::Reader::from_reader(file);
            let headers = rdr
                .headers()
                .map_err(|e| PipelineError::Source(format!("failed to read CSV headers: {e}")))?
                .clone();
            let kind = reading_kind(&headers)?;

            for result in rdr.records() {
                let record = result.map_err(|e| {
                    PipelineError::Source(format!("failed to read CSV record: {e}"))
                })?;

                let (observed_at, payload) = match record_to_row(&record, &headers, kind) {
                    Ok(row) => row,
                    Err(e) => {
                        metrics::counter!("replay_csv_parse_errors_total").increment(1);
                        Err(e)?
                    }
                };

                yield Envelope { payload, observed_at };
            }
        };

        Box::pin(s)
    }
}
