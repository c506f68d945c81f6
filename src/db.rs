use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::payload::Value;
use crate::{Address, Error, Result};

pub const PARTICIPANTS_KEY: &str = "participants";

type PeriodData = im::OrdMap<String, im::Vector<Value>>;

/// Versioned application state.
///
/// Each period maps keys to the ordered history of values written to them.
/// Updates never touch `self`: they return a new db sharing structure with the
/// old one, so any snapshot handed out earlier stays valid.
#[derive(Debug, Clone, PartialEq)]
pub struct AbciAppDb {
    setup_data: im::OrdMap<String, Value>,
    periods: im::OrdMap<u64, PeriodData>,
    period_count: u64,
}

impl AbciAppDb {
    pub fn new(setup_data: BTreeMap<String, Value>) -> Self {
        let setup_data: im::OrdMap<String, Value> = setup_data.into_iter().collect();
        let first_period = Self::seed_period(&setup_data);
        Self {
            setup_data,
            periods: im::ordmap! { 0 => first_period },
            period_count: 0,
        }
    }

    fn seed_period(setup_data: &im::OrdMap<String, Value>) -> PeriodData {
        setup_data
            .iter()
            .map(|(k, v)| (k.clone(), im::vector![v.clone()]))
            .collect()
    }

    fn current(&self) -> Option<&PeriodData> {
        self.periods.get(&self.period_count)
    }

    pub fn setup_data(&self) -> &im::OrdMap<String, Value> {
        &self.setup_data
    }

    pub fn period_count(&self) -> u64 {
        self.period_count
    }

    /// Periods still held, oldest first.
    pub fn periods(&self) -> impl Iterator<Item = u64> + '_ {
        self.periods.keys().copied()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.current()
            .and_then(|period| period.get(key))
            .and_then(|history| history.last())
    }

    pub fn get_strict(&self, key: &str) -> Result<&Value> {
        self.get(key)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    pub fn history(&self, key: &str) -> Option<&im::Vector<Value>> {
        self.current().and_then(|period| period.get(key))
    }

    /// Latest value of every key in the current period.
    pub fn latest(&self) -> BTreeMap<String, Value> {
        self.current()
            .map(|period| {
                period
                    .iter()
                    .filter_map(|(k, h)| h.last().map(|v| (k.clone(), v.clone())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn update<K, I>(&self, updates: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut period = self.current().cloned().unwrap_or_default();
        for (key, value) in updates {
            period
                .entry(key.into())
                .or_insert_with(im::Vector::new)
                .push_back(value);
        }

        let mut next = self.clone();
        next.periods.insert(self.period_count, period);
        next
    }

    /// Opens the next period. It starts from the setup data, overlaid with the
    /// latest values of `cross_period_keys` from the current period.
    pub fn create(&self, cross_period_keys: &[&str]) -> Self {
        let mut period = Self::seed_period(&self.setup_data);
        for key in cross_period_keys {
            if let Some(value) = self.get(key) {
                period.insert(key.to_string(), im::vector![value.clone()]);
            }
        }

        let mut next = self.clone();
        next.period_count += 1;
        next.periods.insert(next.period_count, period);
        debug!(
            "[DB] opened period {} carrying {:?}",
            next.period_count, cross_period_keys
        );
        next
    }

    /// Keeps the latest `period_depth` periods (always at least the current one)
    /// and, when `history_depth` is given, trims every key of the current period
    /// down to its latest `history_depth` values.
    pub fn cleanup(&self, period_depth: usize, history_depth: Option<usize>) -> Self {
        let keep_from = self
            .period_count
            .saturating_sub(period_depth.max(1) as u64 - 1);

        let mut next = self.clone();
        next.periods = self
            .periods
            .iter()
            .filter(|(period, _)| **period >= keep_from)
            .map(|(period, data)| (*period, data.clone()))
            .collect();

        if let Some(depth) = history_depth {
            let depth = depth.max(1);
            if let Some(period) = next.periods.get_mut(&self.period_count) {
                *period = period
                    .iter()
                    .map(|(key, history)| {
                        let trimmed = if history.len() > depth {
                            history.skip(history.len() - depth)
                        } else {
                            history.clone()
                        };
                        (key.clone(), trimmed)
                    })
                    .collect();
            }
        }
        next
    }
}

/// The view of the db that rounds read and hand on to their successor.
#[derive(Debug, Clone, PartialEq)]
pub struct SynchronizedData {
    db: AbciAppDb,
}

impl From<AbciAppDb> for SynchronizedData {
    fn from(db: AbciAppDb) -> Self {
        Self { db }
    }
}

impl SynchronizedData {
    pub fn new(db: AbciAppDb) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &AbciAppDb {
        &self.db
    }

    pub fn period_count(&self) -> u64 {
        self.db.period_count()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.db.get(key)
    }

    pub fn get_strict(&self, key: &str) -> Result<&Value> {
        self.db.get_strict(key)
    }

    pub fn participants(&self) -> Result<BTreeSet<Address>> {
        let unexpected = || Error::UnexpectedValue {
            key: PARTICIPANTS_KEY.to_string(),
            expected: "a list of addresses",
        };
        self.get_strict(PARTICIPANTS_KEY)?
            .as_list()
            .ok_or_else(unexpected)?
            .iter()
            .map(|v| v.as_text().map(Address::from).ok_or_else(unexpected))
            .collect()
    }

    pub fn update<K, I>(&self, updates: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self {
            db: self.db.update(updates),
        }
    }

    pub fn create(&self, cross_period_keys: &[&str]) -> Self {
        Self {
            db: self.db.create(cross_period_keys),
        }
    }

    pub fn cleanup(&self, period_depth: usize, history_depth: Option<usize>) -> Self {
        Self {
            db: self.db.cleanup(period_depth, history_depth),
        }
    }
}

pub fn participants_value<'a>(participants: impl IntoIterator<Item = &'a Address>) -> Value {
    Value::List(
        participants
            .into_iter()
            .map(|p| Value::Text(p.clone()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(participants: &[&str]) -> AbciAppDb {
        let participants: BTreeSet<Address> = participants.iter().map(|p| p.to_string()).collect();
        let mut setup = BTreeMap::new();
        setup.insert(PARTICIPANTS_KEY.to_string(), participants_value(&participants));
        AbciAppDb::new(setup)
    }

    #[test]
    fn test_update_keeps_old_snapshot() {
        let db = setup(&["a", "b"]);
        let updated = db.update([("estimate", Value::from(1.5))]);

        assert_eq!(updated.get("estimate"), Some(&Value::Float(1.5)));
        assert_eq!(db.get("estimate"), None);

        let again = updated.update([("estimate", Value::from(2.5))]);
        assert_eq!(again.get("estimate"), Some(&Value::Float(2.5)));
        assert_eq!(updated.get("estimate"), Some(&Value::Float(1.5)));
        assert_eq!(again.history("estimate").map(|h| h.len()), Some(2));
    }

    #[test]
    fn test_unset_key_is_an_error() {
        let db = setup(&["a"]);
        assert!(matches!(db.get_strict("nope"), Err(Error::KeyNotFound(k)) if k == "nope"));
    }

    #[test]
    fn test_participants_round_trip() {
        let data = SynchronizedData::new(setup(&["b", "a", "c"]));
        let participants = data.participants().unwrap();
        assert_eq!(
            participants.into_iter().collect::<Vec<_>>(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn test_participants_wrong_type() {
        let data = SynchronizedData::new(setup(&["a"])).update([(PARTICIPANTS_KEY, Value::Int(4))]);
        assert!(matches!(data.participants(), Err(Error::UnexpectedValue { .. })));
    }

    #[test]
    fn test_create_keeps_only_cross_period_keys() {
        let db = setup(&["a"])
            .update([("estimate", Value::from(1.0))])
            .update([("observations", Value::from("x"))]);

        let next = db.create(&["estimate"]);
        assert_eq!(next.period_count(), 1);
        assert_eq!(next.get("estimate"), Some(&Value::Float(1.0)));
        assert_eq!(next.get("observations"), None);
        assert!(next.get(PARTICIPANTS_KEY).is_some());
        assert_eq!(db.period_count(), 0);
    }

    #[test]
    fn test_cleanup() {
        let mut db = setup(&["a"]);
        for i in 0..5 {
            db = db.update([("n", Value::Int(i))]).create(&["n"]);
        }
        db = db
            .update([("n", Value::Int(10))])
            .update([("n", Value::Int(11))]);
        assert_eq!(db.periods().count(), 6);

        let cleaned = db.cleanup(2, Some(1));
        assert_eq!(cleaned.periods().collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(cleaned.history("n").map(|h| h.len()), Some(1));
        assert_eq!(cleaned.get("n"), Some(&Value::Int(11)));
    }
}
