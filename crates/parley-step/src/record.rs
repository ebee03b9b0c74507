use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::trace;

use crate::error::{Failure, StepResult};
use crate::step::Step;

/// Ordered, named set of steps over a common input.
///
/// Built with [`Extraction::field`]; consumed by
/// [`Step::extract_all`] and [`Step::extract_first`].
pub struct Extraction<R, V> {
    entries: Vec<(String, Step<R, V>)>,
}

impl<R, V> Default for Extraction<R, V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<R, V> Extraction<R, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named entry. Later entries with the same key are kept
    /// separately; lookups on the resulting [`Record`] return the first.
    pub fn field(mut self, key: impl Into<String>, step: Step<R, V>) -> Self {
        self.entries.push((key.into(), step));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<R, V> Extraction<R, V>
where
    R: Clone + Send + Sync + 'static,
    V: Send + 'static,
{
    /// A step that runs every entry concurrently and succeeds only if all do.
    pub fn all(self) -> Step<R, Record<V>> {
        let entries = Arc::new(self.entries);
        Step::new(move |input: R| {
            let runs: Vec<_> = entries
                .iter()
                .map(|(key, step)| {
                    let key = key.clone();
                    let run = step.run(input.clone());
                    async move { (key, run.await) }
                })
                .collect();
            async move {
                let settled = join_all(runs).await;
                let mut fields = Vec::with_capacity(settled.len());
                for (key, outcome) in settled {
                    fields.push((key, outcome?));
                }
                Ok(Record { fields })
            }
        })
    }

    /// A step that tries entries in order and keeps the first success.
    pub fn first(self) -> Step<R, Record<V>> {
        let entries = Arc::new(self.entries);
        Step::new(move |input: R| {
            let entries = Arc::clone(&entries);
            async move {
                for (key, step) in entries.iter() {
                    match step.run(input.clone()).await {
                        Ok(value) => return Ok(Record::single(key.clone(), value)),
                        Err(failure) => trace!(key = %key, %failure, "extraction candidate missed"),
                    }
                }
                Err::<Record<V>, Failure>(Failure::silent())
            }
        })
    }
}

/// Ordered key/value result of an extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<V> {
    fields: Vec<(String, V)>,
}

impl<V> Record<V> {
    fn single(key: String, value: V) -> Self {
        Self {
            fields: vec![(key, value)],
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Move a value out of the record.
    pub fn take(&mut self, key: &str) -> StepResult<V> {
        let index = self
            .fields
            .iter()
            .position(|(k, _)| k == key)
            .ok_or_else(Failure::silent)?;
        Ok(self.fields.remove(index).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_map(self) -> BTreeMap<String, V> {
        self.fields.into_iter().collect()
    }
}

impl<V> IntoIterator for Record<V> {
    type Item = (String, V);
    type IntoIter = std::vec::IntoIter<(String, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}
