//! Historical price ledger: every accepted price update is appended to a
//! bounded per-series record list, indexed by last-update timestamp so the
//! periodic pruner can drop cold series without loading them.

use anyhow::{
    Context as _,
    Result,
};
use async_trait::async_trait;
use cnidarium::{
    StateRead,
    StateWrite,
};
use peridot_core::oracle::{
    set_last_price_timestamp,
    MetadataStatistics,
    OracleHistoryOptions,
    OracleInfo,
    OracleType,
    PriceRecord,
    SymbolPriceTimestamp,
    MAX_HISTORICAL_PRICE_RECORD_AGE,
    QUOTE_USD,
};
use rust_decimal::{
    Decimal,
    MathematicalOps as _,
};
use tracing::instrument;

const RECORDS_PREFIX: &str = "oracle/history/records";
const LAST_PRICE_TIMESTAMPS_KEY: &str = "oracle/history/lastts";

fn records_storage_key(oracle_type: OracleType, symbol: &str) -> String {
    format!("{RECORDS_PREFIX}/{oracle_type}/{symbol}")
}

/// Price at or before `timestamp`, forward-filled from the most recent
/// earlier record. `None` when the series has no record at or before it.
fn find_prev_price(records: &[PriceRecord], timestamp: i64) -> Option<Decimal> {
    records
        .iter()
        .rev()
        .find(|r| r.timestamp <= timestamp)
        .map(|r| r.price)
}

/// Trims a series for merging: all records at or after `from`, plus the
/// single record immediately before `from` so forward-fill can cover the
/// window start.
fn records_for_merge(records: &[PriceRecord], from: i64) -> &[PriceRecord] {
    let mut start = records.len();
    for (i, record) in records.iter().enumerate().rev() {
        start = i;
        if record.timestamp < from {
            break;
        }
    }
    &records[start..]
}

/// Merges a base and a quote series into a single base/quote series over
/// the union of their timestamps, forward-filling the leg that has no
/// record at a given timestamp. Timestamps where either leg has no earlier
/// value are skipped.
pub fn merge_price_records(
    base: &[PriceRecord],
    quote: &[PriceRecord],
    from: i64,
) -> Vec<PriceRecord> {
    let base = records_for_merge(base, from);
    let quote = records_for_merge(quote, from);

    let mut timestamps: Vec<i64> = base
        .iter()
        .chain(quote.iter())
        .map(|r| r.timestamp)
        .collect();
    timestamps.sort_unstable();
    timestamps.dedup();

    let mut merged = Vec::with_capacity(timestamps.len());
    for timestamp in timestamps {
        let Some(base_price) = find_prev_price(base, timestamp) else {
            continue;
        };
        let Some(quote_price) = find_prev_price(quote, timestamp) else {
            continue;
        };
        if quote_price <= Decimal::ZERO {
            continue;
        }
        merged.push(PriceRecord {
            timestamp,
            price: base_price / quote_price,
        });
    }
    merged.retain(|r| r.timestamp >= from);
    merged
}

/// Summary statistics over a chronologically ordered series. `None` for an
/// empty series.
pub fn calculate_statistics(records: &[PriceRecord]) -> Option<MetadataStatistics> {
    let first = records.first()?;
    let last = records.last()?;
    let count = Decimal::from(records.len());

    let mut sum = Decimal::ZERO;
    let mut min_price = first.price;
    let mut max_price = first.price;
    for record in records {
        sum += record.price;
        min_price = min_price.min(record.price);
        max_price = max_price.max(record.price);
    }
    let mean = sum / count;

    let mut variance = Decimal::ZERO;
    for record in records {
        let delta = record.price - mean;
        variance += delta * delta;
    }
    variance /= count;
    let std_dev = variance.sqrt().unwrap_or(Decimal::ZERO);

    let mut sorted: Vec<Decimal> = records.iter().map(|r| r.price).collect();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    let median_price = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / Decimal::TWO
    } else {
        sorted[mid]
    };

    let twap = if records.len() < 2 || last.timestamp == first.timestamp {
        Decimal::ZERO
    } else {
        let mut weighted = Decimal::ZERO;
        for pair in records.windows(2) {
            let elapsed = Decimal::from(pair[1].timestamp - pair[0].timestamp);
            weighted += pair[1].price * elapsed;
        }
        weighted / Decimal::from(last.timestamp - first.timestamp)
    };

    Some(MetadataStatistics {
        mean,
        min_price,
        max_price,
        median_price,
        first_timestamp: first.timestamp,
        last_timestamp: last.timestamp,
        records_sample_size: u32::try_from(records.len()).unwrap_or(u32::MAX),
        twap,
        std_dev,
    })
}

#[async_trait]
pub trait StateReadExt: StateRead {
    #[instrument(skip_all, fields(%oracle_type, symbol))]
    async fn get_price_records(
        &self,
        oracle_type: OracleType,
        symbol: &str,
    ) -> Result<Vec<PriceRecord>> {
        let Some(bytes) = self
            .get_raw(&records_storage_key(oracle_type, symbol))
            .await
            .context("failed reading price records from state")?
        else {
            return Ok(Vec::new());
        };
        serde_json::from_slice(&bytes).context("failed to deserialize price records")
    }

    #[instrument(skip_all)]
    async fn get_last_price_timestamps(&self) -> Result<Vec<SymbolPriceTimestamp>> {
        let Some(bytes) = self
            .get_raw(LAST_PRICE_TIMESTAMPS_KEY)
            .await
            .context("failed reading last price timestamps from state")?
        else {
            return Ok(Vec::new());
        };
        serde_json::from_slice(&bytes).context("failed to deserialize last price timestamps")
    }

    /// The merged base/quote series starting at `from`; a quote of `None`
    /// or the `USD` sentinel returns the base series filtered to the
    /// window.
    #[instrument(skip_all)]
    async fn get_mixed_price_records(
        &self,
        base: &OracleInfo,
        quote: Option<&OracleInfo>,
        from: i64,
    ) -> Result<Vec<PriceRecord>> {
        let base_records = self
            .get_price_records(base.oracle_type, &base.symbol)
            .await
            .context("failed to get base price records")?;
        let Some(quote) = quote.filter(|q| q.symbol != QUOTE_USD) else {
            let mut records = base_records;
            records.retain(|r| r.timestamp >= from);
            return Ok(records);
        };
        let quote_records = self
            .get_price_records(quote.oracle_type, &quote.symbol)
            .await
            .context("failed to get quote price records")?;
        Ok(merge_price_records(&base_records, &quote_records, from))
    }

    /// The volatility query surface: the merged series within
    /// `options.max_age`, optionally with summary statistics, optionally
    /// without the raw records.
    #[instrument(skip_all)]
    async fn get_historical_price_records(
        &self,
        base: &OracleInfo,
        quote: Option<&OracleInfo>,
        options: OracleHistoryOptions,
        now: i64,
    ) -> Result<(Vec<PriceRecord>, Option<MetadataStatistics>)> {
        let from = if options.max_age == 0 {
            0
        } else {
            now.saturating_sub(i64::try_from(options.max_age).unwrap_or(i64::MAX))
        };
        let records = self
            .get_mixed_price_records(base, quote, from)
            .await
            .context("failed to get mixed price records")?;
        let metadata = if options.include_metadata {
            calculate_statistics(&records)
        } else {
            None
        };
        let records = if options.include_raw_history {
            records
        } else {
            Vec::new()
        };
        Ok((records, metadata))
    }

    /// The population standard deviation of the merged series, alongside
    /// whatever `options` asked for. `None` when the window holds no
    /// records.
    #[instrument(skip_all)]
    async fn get_oracle_volatility(
        &self,
        base: &OracleInfo,
        quote: Option<&OracleInfo>,
        options: OracleHistoryOptions,
        now: i64,
    ) -> Result<(Option<Decimal>, Vec<PriceRecord>, Option<MetadataStatistics>)> {
        let from = if options.max_age == 0 {
            0
        } else {
            now.saturating_sub(i64::try_from(options.max_age).unwrap_or(i64::MAX))
        };
        let records = self
            .get_mixed_price_records(base, quote, from)
            .await
            .context("failed to get mixed price records")?;
        let statistics = calculate_statistics(&records);
        let volatility = statistics.as_ref().map(|s| s.std_dev);
        let metadata = if options.include_metadata {
            statistics
        } else {
            None
        };
        let records = if options.include_raw_history {
            records
        } else {
            Vec::new()
        };
        Ok((volatility, records, metadata))
    }
}

impl<T: StateRead + ?Sized> StateReadExt for T {}

#[async_trait]
pub trait StateWriteExt: StateWrite {
    #[instrument(skip_all, fields(%oracle_type, symbol))]
    fn put_price_records(
        &mut self,
        oracle_type: OracleType,
        symbol: &str,
        records: &[PriceRecord],
    ) -> Result<()> {
        let bytes = serde_json::to_vec(records).context("failed to serialize price records")?;
        self.put_raw(records_storage_key(oracle_type, symbol), bytes);
        Ok(())
    }

    #[instrument(skip_all)]
    fn put_last_price_timestamps(&mut self, timestamps: &[SymbolPriceTimestamp]) -> Result<()> {
        let bytes =
            serde_json::to_vec(timestamps).context("failed to serialize last price timestamps")?;
        self.put_raw(LAST_PRICE_TIMESTAMPS_KEY.to_string(), bytes);
        Ok(())
    }

    /// Appends one sample to a series, dropping records older than the
    /// retention window and overwriting the last record when the timestamp
    /// does not advance. Updates the last-update index.
    #[instrument(skip_all, fields(%oracle_type, symbol))]
    async fn append_price_record(
        &mut self,
        oracle_type: OracleType,
        symbol: &str,
        price: Decimal,
        timestamp: i64,
    ) -> Result<()> {
        let mut records = self
            .get_price_records(oracle_type, symbol)
            .await
            .context("failed to get price records")?;
        let cutoff = timestamp.saturating_sub(MAX_HISTORICAL_PRICE_RECORD_AGE);
        records.retain(|r| r.timestamp >= cutoff);
        match records.last_mut() {
            Some(last) if last.timestamp == timestamp => last.price = price,
            _ => records.push(PriceRecord {
                timestamp,
                price,
            }),
        }
        self.put_price_records(oracle_type, symbol, &records)
            .context("failed to put price records")?;

        let mut index = self
            .get_last_price_timestamps()
            .await
            .context("failed to get last price timestamps")?;
        set_last_price_timestamp(&mut index, oracle_type, symbol, timestamp);
        self.put_last_price_timestamps(&index)
            .context("failed to put last price timestamps")?;
        Ok(())
    }

    /// Drops series whose newest record fell out of the retention window,
    /// and re-filters warm series in place. Idempotent.
    #[instrument(skip_all)]
    async fn prune_historical_prices(&mut self, now: i64) -> Result<()> {
        let cutoff = now.saturating_sub(MAX_HISTORICAL_PRICE_RECORD_AGE);
        let index = self
            .get_last_price_timestamps()
            .await
            .context("failed to get last price timestamps")?;
        let mut retained = Vec::with_capacity(index.len());
        for entry in index {
            if entry.timestamp < cutoff {
                self.delete(records_storage_key(entry.oracle_type, &entry.symbol));
                continue;
            }
            let mut records = self
                .get_price_records(entry.oracle_type, &entry.symbol)
                .await
                .context("failed to get price records")?;
            let before = records.len();
            records.retain(|r| r.timestamp >= cutoff);
            if records.len() != before {
                self.put_price_records(entry.oracle_type, &entry.symbol, &records)
                    .context("failed to put pruned price records")?;
            }
            retained.push(entry);
        }
        self.put_last_price_timestamps(&retained)
            .context("failed to put last price timestamps")?;
        Ok(())
    }
}

impl<T: StateWrite + ?Sized> StateWriteExt for T {}

#[cfg(test)]
mod tests {
    use cnidarium::StateDelta;
    use rust_decimal_macros::dec;

    use super::*;

    fn record(timestamp: i64, price: Decimal) -> PriceRecord {
        PriceRecord {
            timestamp,
            price,
        }
    }

    #[test]
    fn merge_divides_and_forward_fills() {
        let base = vec![
            record(1, dec!(6)),
            record(2, dec!(8)),
            record(3, dec!(4)),
            record(4, dec!(5)),
        ];
        let quote = vec![record(1, dec!(3)), record(3, dec!(4)), record(4, dec!(2))];
        let merged = merge_price_records(&base, &quote, 1);
        assert_eq!(
            merged,
            vec![
                record(1, dec!(2)),
                record(2, dec!(8) / dec!(3)),
                record(3, dec!(1)),
                record(4, dec!(2.5)),
            ]
        );
    }

    #[test]
    fn merge_skips_timestamps_without_earlier_quote() {
        // quote starts after base; earliest base timestamps have no quote
        // value to fill from and are skipped.
        let base = vec![record(1, dec!(10)), record(2, dec!(20)), record(3, dec!(30))];
        let quote = vec![record(2, dec!(2)), record(3, dec!(3))];
        let merged = merge_price_records(&base, &quote, 1);
        assert_eq!(merged, vec![record(2, dec!(10)), record(3, dec!(10))]);
    }

    #[test]
    fn merge_window_keeps_one_earlier_record() {
        let base = vec![record(5, dec!(10)), record(20, dec!(12))];
        let quote = vec![record(5, dec!(2)), record(25, dec!(3))];
        let merged = merge_price_records(&base, &quote, 18);
        // the records at 5 seed forward-fill but are filtered from output
        assert_eq!(merged, vec![record(20, dec!(6)), record(25, dec!(4))]);
    }

    #[test]
    fn statistics_median_and_twap() {
        let records = vec![
            record(100, dec!(1)),
            record(200, dec!(3)),
            record(300, dec!(2)),
            record(400, dec!(4)),
        ];
        let stats = calculate_statistics(&records).unwrap();
        assert_eq!(stats.mean, dec!(2.5));
        assert_eq!(stats.min_price, dec!(1));
        assert_eq!(stats.max_price, dec!(4));
        assert_eq!(stats.median_price, dec!(2.5));
        assert_eq!(stats.records_sample_size, 4);
        // (3*100 + 2*100 + 4*100) / 300
        assert_eq!(stats.twap, dec!(3));
    }

    #[test]
    fn statistics_single_sample() {
        let stats = calculate_statistics(&[record(100, dec!(7))]).unwrap();
        assert_eq!(stats.mean, dec!(7));
        assert_eq!(stats.median_price, dec!(7));
        assert_eq!(stats.twap, Decimal::ZERO);
        assert_eq!(stats.std_dev, Decimal::ZERO);
    }

    #[test]
    fn statistics_empty_is_none() {
        assert!(calculate_statistics(&[]).is_none());
    }

    #[tokio::test]
    async fn append_overwrites_same_timestamp() {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let snapshot = storage.latest_snapshot();
        let mut state = StateDelta::new(snapshot);

        state
            .append_price_record(OracleType::Band, "ATOM", dec!(10), 100)
            .await
            .unwrap();
        state
            .append_price_record(OracleType::Band, "ATOM", dec!(11), 100)
            .await
            .unwrap();
        state
            .append_price_record(OracleType::Band, "ATOM", dec!(12), 150)
            .await
            .unwrap();

        let records = state
            .get_price_records(OracleType::Band, "ATOM")
            .await
            .unwrap();
        assert_eq!(records, vec![record(100, dec!(11)), record(150, dec!(12))]);

        let index = state.get_last_price_timestamps().await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].timestamp, 150);
    }

    #[tokio::test]
    async fn prune_drops_cold_series_and_is_idempotent() {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let snapshot = storage.latest_snapshot();
        let mut state = StateDelta::new(snapshot);

        let now = 10_000_000;
        let old = now - MAX_HISTORICAL_PRICE_RECORD_AGE - 10;
        state
            .append_price_record(OracleType::Band, "COLD", dec!(1), old)
            .await
            .unwrap();
        state
            .append_price_record(OracleType::Band, "WARM", dec!(2), old)
            .await
            .unwrap();
        state
            .append_price_record(OracleType::Band, "WARM", dec!(3), now)
            .await
            .unwrap();

        state.prune_historical_prices(now).await.unwrap();

        assert!(state
            .get_price_records(OracleType::Band, "COLD")
            .await
            .unwrap()
            .is_empty());
        let warm = state
            .get_price_records(OracleType::Band, "WARM")
            .await
            .unwrap();
        assert_eq!(warm, vec![record(now, dec!(3))]);
        let index = state.get_last_price_timestamps().await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].symbol, "WARM");

        // running again changes nothing
        state.prune_historical_prices(now).await.unwrap();
        assert_eq!(
            state
                .get_price_records(OracleType::Band, "WARM")
                .await
                .unwrap(),
            warm
        );
    }

    #[tokio::test]
    async fn usd_quote_leg_returns_the_base_series() {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let snapshot = storage.latest_snapshot();
        let mut state = StateDelta::new(snapshot);

        for (ts, price) in [(100, dec!(2)), (200, dec!(4))] {
            state
                .append_price_record(OracleType::Band, "ATOM", price, ts)
                .await
                .unwrap();
        }

        let base = OracleInfo {
            oracle_type: OracleType::Band,
            symbol: "ATOM".into(),
        };
        let usd = OracleInfo {
            oracle_type: OracleType::Band,
            symbol: "USD".into(),
        };
        let with_sentinel = state
            .get_mixed_price_records(&base, Some(&usd), 0)
            .await
            .unwrap();
        let without_quote = state.get_mixed_price_records(&base, None, 0).await.unwrap();
        assert_eq!(with_sentinel, without_quote);
        assert_eq!(with_sentinel, vec![record(100, dec!(2)), record(200, dec!(4))]);

        let (volatility, ..) = state
            .get_oracle_volatility(
                &base,
                Some(&usd),
                OracleHistoryOptions {
                    max_age: 0,
                    include_raw_history: false,
                    include_metadata: false,
                },
                200,
            )
            .await
            .unwrap();
        assert_eq!(volatility, Some(dec!(1)));
    }

    #[tokio::test]
    async fn volatility_is_returned_even_without_metadata() {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let snapshot = storage.latest_snapshot();
        let mut state = StateDelta::new(snapshot);

        for (ts, price) in [(100, dec!(1)), (200, dec!(3))] {
            state
                .append_price_record(OracleType::Pyth, "INJ", price, ts)
                .await
                .unwrap();
        }

        let base = OracleInfo {
            oracle_type: OracleType::Pyth,
            symbol: "INJ".into(),
        };
        let (volatility, records, metadata) = state
            .get_oracle_volatility(
                &base,
                None,
                OracleHistoryOptions {
                    max_age: 0,
                    include_raw_history: false,
                    include_metadata: false,
                },
                200,
            )
            .await
            .unwrap();
        // mean 2, deviations of 1 each
        assert_eq!(volatility, Some(dec!(1)));
        assert!(records.is_empty());
        assert!(metadata.is_none());

        let empty = OracleInfo {
            oracle_type: OracleType::Pyth,
            symbol: "NONE".into(),
        };
        let (volatility, ..) = state
            .get_oracle_volatility(
                &empty,
                None,
                OracleHistoryOptions {
                    max_age: 0,
                    include_raw_history: true,
                    include_metadata: true,
                },
                200,
            )
            .await
            .unwrap();
        assert_eq!(volatility, None);
    }
}
