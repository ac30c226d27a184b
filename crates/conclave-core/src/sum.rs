//! Reference additive-sum computation and its paired data source.
//!
//! This is the simplest useful instantiation of the [`Computation`] /
//! [`DataSource`] pair: inputs are numbers, shares are additive pieces, and
//! the final result is the sum of all inputs. The binaries register it under
//! the type name `"sum"` and the end-to-end tests are built on it.

use rand::Rng;
use serde_json::Value;
use tracing::warn;

use crate::computation::{Computation, ComputationError, DataSource, DataSourceError};
use crate::msg::Event;

/// Sums additive shares into a partial, and partials into the final result.
pub struct AdditiveSum;

impl Computation for AdditiveSum {
    fn combine(&self, shares: &[String], _metadata: &Value) -> Result<String, ComputationError> {
        let mut total = 0.0_f64;
        for share in shares {
            match share.parse::<f64>() {
                Ok(value) => total += value,
                Err(_) => warn!(%share, "skipping share that does not parse as a number"),
            }
        }
        // Partials are integers on the wire; rounding here absorbs the float
        // error accumulated while summing the random additive pieces.
        Ok((total.round() as i64).to_string())
    }

    fn aggregate(&self, partials: &[String], _metadata: &Value) -> Result<String, ComputationError> {
        let mut total = 0_i64;
        for partial in partials {
            match partial.parse::<i64>() {
                Ok(value) => total += value,
                Err(_) => warn!(%partial, "skipping partial that does not parse as an integer"),
            }
        }
        Ok(total.to_string())
    }
}

/// A data source contributing a fixed numeric value, split additively.
pub struct AdditiveSource {
    value: f64,
}

impl AdditiveSource {
    pub fn new(value: f64) -> Self {
        Self { value }
    }
}

impl DataSource for AdditiveSource {
    fn collect(&self, _event: &Event) -> Result<String, DataSourceError> {
        Ok(self.value.to_string())
    }

    fn shard(
        &self,
        value: &str,
        pieces: usize,
        _event: &Event,
    ) -> Result<Vec<String>, DataSourceError> {
        let value: f64 = value
            .parse()
            .map_err(|_| DataSourceError::Shard(format!("value {value:?} is not numeric")))?;
        if pieces <= 1 {
            return Ok(vec![value.to_string()]);
        }
        // n-1 uniform draws wide enough to hide small values, last piece
        // balances the sum so the shares reconstruct the input exactly.
        let range = value.abs() * 2.0 + 100.0;
        let mut rng = rand::rng();
        let mut shares = Vec::with_capacity(pieces);
        let mut drawn = 0.0_f64;
        for _ in 0..pieces - 1 {
            let piece: f64 = rng.random_range(-range..range);
            drawn += piece;
            shares.push(piece.to_string());
        }
        shares.push((value - drawn).to_string());
        Ok(shares)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{Event, EventKind, unix_millis};

    fn event() -> Event {
        Event {
            kind: EventKind::DataSubmission,
            event_id: "e-1".into(),
            computation_type: "sum".into(),
            participants: vec![],
            metadata: serde_json::json!({}),
            created_at: unix_millis(),
            coordinator_signature: String::new(),
        }
    }

    #[test]
    fn shares_reconstruct_the_value() {
        let source = AdditiveSource::new(42.0);
        let shares = source.shard("42", 5, &event()).unwrap();
        assert_eq!(shares.len(), 5);
        let total: f64 = shares.iter().map(|s| s.parse::<f64>().unwrap()).sum();
        assert!((total - 42.0).abs() < 1e-6);
    }

    #[test]
    fn single_piece_is_the_value_itself() {
        let source = AdditiveSource::new(7.0);
        assert_eq!(source.shard("7", 1, &event()).unwrap(), vec!["7"]);
    }

    #[test]
    fn combine_is_order_independent() {
        let sum = AdditiveSum;
        let metadata = serde_json::json!({});
        let shares = vec!["10.25".to_string(), "-3.5".to_string(), "13.25".to_string()];
        let mut reversed = shares.clone();
        reversed.reverse();
        assert_eq!(
            sum.combine(&shares, &metadata).unwrap(),
            sum.combine(&reversed, &metadata).unwrap()
        );
    }

    #[test]
    fn aggregate_sums_partials() {
        let sum = AdditiveSum;
        let partials = vec!["12".to_string(), "-2".to_string(), "50".to_string()];
        assert_eq!(sum.aggregate(&partials, &serde_json::json!({})).unwrap(), "60");
    }

    #[test]
    fn aggregate_of_nothing_is_zero() {
        let sum = AdditiveSum;
        assert_eq!(sum.aggregate(&[], &serde_json::json!({})).unwrap(), "0");
    }

    #[test]
    fn sharded_then_combined_inputs_sum_up() {
        let metadata = serde_json::json!({});
        let sum = AdditiveSum;
        let values = [10.0, 20.0, 30.0];
        let sources: Vec<_> = values.iter().map(|v| AdditiveSource::new(*v)).collect();
        // Each participant shards its value; participant i combines the i-th
        // share of every source, exactly as the protocol routes them.
        let all_shares: Vec<_> = sources
            .iter()
            .map(|s| s.shard(&s.collect(&event()).unwrap(), 3, &event()).unwrap())
            .collect();
        let partials: Vec<_> = (0..3)
            .map(|i| {
                let column: Vec<_> = all_shares.iter().map(|shares| shares[i].clone()).collect();
                sum.combine(&column, &metadata).unwrap()
            })
            .collect();
        assert_eq!(sum.aggregate(&partials, &metadata).unwrap(), "60");
    }
}
