//! Straddle resolution against a [`ReadingStore`].
//!
//! A straddle is the tightest pair of readings around a target instant for one
//! field. Interpolation never extrapolates: a target outside the readings of
//! a source is `OutOfRange`.

use chrono::{DateTime, Utc};
use meterline_store::{ReadingStore, ReadingWindow};
use meterline_types::{EngineError, EngineResult, ReadingField, SourceId, Straddle};

/// Find the readings bracketing `target` for `field`.
pub async fn resolve(
    store: &dyn ReadingStore,
    source: &SourceId,
    target: DateTime<Utc>,
    field: ReadingField,
) -> EngineResult<Straddle> {
    let before = store.nearest_before(source, target, field).await?;

    if let Some(reading) = &before {
        if reading.timestamp == target {
            return Ok(Straddle::exact(field, reading.clone()));
        }
    }

    let after = store.nearest_after(source, target, field).await?;
    match (before, after) {
        (Some(before), Some(after)) => Straddle::new(field, before, after, target),
        (None, None) => Err(EngineError::NoData {
            source_id: source.clone(),
            field,
        }),
        _ => Err(EngineError::OutOfRange {
            source_id: source.clone(),
            at: target,
        }),
    }
}

/// Resolve and interpolate in one step.
pub async fn interpolate_at(
    store: &dyn ReadingStore,
    source: &SourceId,
    target: DateTime<Utc>,
    field: ReadingField,
) -> EngineResult<f64> {
    resolve(store, source, target, field).await?.interpolate()
}

/// Straddles for an ordered list of targets on one source's timeline.
#[derive(Debug, Clone)]
pub struct StraddleList {
    source: SourceId,
    field: ReadingField,
    straddles: Vec<Straddle>,
}

impl StraddleList {
    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn field(&self) -> ReadingField {
        self.field
    }

    pub fn len(&self) -> usize {
        self.straddles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.straddles.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Straddle> {
        self.straddles.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Straddle> {
        self.straddles.iter()
    }

    /// Interpolated value for every target, in request order.
    pub fn values(&self) -> EngineResult<Vec<f64>> {
        self.straddles.iter().map(Straddle::interpolate).collect()
    }

    pub fn into_vec(self) -> Vec<Straddle> {
        self.straddles
    }
}

/// Resolve straddles for `targets`, which must be non-decreasing.
///
/// One range scan between the outermost brackets serves every target.
pub async fn resolve_list(
    store: &dyn ReadingStore,
    source: &SourceId,
    targets: &[DateTime<Utc>],
    field: ReadingField,
) -> EngineResult<StraddleList> {
    let mut list = StraddleList {
        source: source.clone(),
        field,
        straddles: Vec::with_capacity(targets.len()),
    };

    let (Some(&first), Some(&last)) = (targets.first(), targets.last()) else {
        return Ok(list);
    };

    if targets.windows(2).any(|pair| pair[1] < pair[0]) {
        return Err(EngineError::BadInterval(
            "straddle targets must be in non-decreasing order".to_string(),
        ));
    }

    let Some(lower) = store.nearest_before(source, first, field).await? else {
        return Err(missing_bracket(store, source, first, field).await);
    };
    let Some(upper) = store.nearest_after(source, last, field).await? else {
        return Err(missing_bracket(store, source, last, field).await);
    };

    let readings = store
        .range(
            source,
            ReadingWindow::inclusive(lower.timestamp, upper.timestamp),
            field,
        )
        .await?;
    if readings.is_empty() {
        return Err(EngineError::Storage(format!(
            "range scan for {} returned no readings between known brackets",
            source
        )));
    }

    let mut idx = 0;
    for &target in targets {
        while idx + 1 < readings.len() && readings[idx + 1].timestamp <= target {
            idx += 1;
        }
        let before = &readings[idx];
        let straddle = if before.timestamp == target {
            Straddle::exact(field, before.clone())
        } else {
            let after = readings.get(idx + 1).ok_or_else(|| EngineError::OutOfRange {
                source_id: source.clone(),
                at: target,
            })?;
            Straddle::new(field, before.clone(), after.clone(), target)?
        };
        list.straddles.push(straddle);
    }

    Ok(list)
}

/// Classify a missing bracket: no data at all, or data that does not reach.
async fn missing_bracket(
    store: &dyn ReadingStore,
    source: &SourceId,
    at: DateTime<Utc>,
    field: ReadingField,
) -> EngineError {
    match store
        .nearest_after(source, DateTime::<Utc>::MIN_UTC, field)
        .await
    {
        Ok(Some(_)) => EngineError::OutOfRange {
            source_id: source.clone(),
            at,
        },
        Ok(None) => EngineError::NoData {
            source_id: source.clone(),
            field,
        },
        Err(err) => err.into(),
    }
}
