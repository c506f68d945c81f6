use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display};

use log::debug;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::Rejection;
use crate::{Address, Error, Result};

/// Dynamically typed attribute value, as carried by payload data and the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Value::UInt(u) => Some(*u),
            Value::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::UInt(u) => write!(f, "{}", u),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "{}", hex::encode(b)),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u64> for Value {
    fn from(i: u64) -> Self {
        Value::UInt(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(o: Option<T>) -> Self {
        o.map(Into::into).unwrap_or(Value::None)
    }
}

pub trait TransactionKind:
    Copy + Ord + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}
impl<T> TransactionKind for T where
    T: Copy + Ord + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// A closed set of payloads an application accepts.
///
/// Every variant maps to exactly one transaction kind and exposes its
/// attributes by name, so rounds can validate payloads without knowing the
/// concrete type.
pub trait Payload: Clone + PartialEq + Debug + Serialize + DeserializeOwned {
    type Kind: TransactionKind;

    fn transaction_type(&self) -> Self::Kind;

    fn data(&self) -> BTreeMap<&'static str, Value>;

    /// Every kind this payload type can carry, with its attribute layout.
    fn shapes() -> Vec<(Self::Kind, PayloadShape)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadShape {
    pub name: &'static str,
    pub attributes: &'static [&'static str],
}

impl PayloadShape {
    pub const fn new(name: &'static str, attributes: &'static [&'static str]) -> Self {
        Self { name, attributes }
    }

    pub fn check(
        &self,
        data: &BTreeMap<&'static str, Value>,
    ) -> std::result::Result<(), Rejection> {
        let mut expected = self.attributes.to_vec();
        expected.sort_unstable();
        let actual: Vec<&'static str> = data.keys().copied().collect();

        if expected == actual {
            Ok(())
        } else {
            Err(Rejection::MalformedAttributes {
                shape: self.name,
                expected,
                actual,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction<P> {
    pub sender: Address,
    pub payload: P,
}

impl<P: Payload> Transaction<P> {
    pub fn new(sender: impl Into<Address>, payload: P) -> Self {
        Self {
            sender: sender.into(),
            payload,
        }
    }

    pub fn transaction_type(&self) -> P::Kind {
        self.payload.transaction_type()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Transaction kind to payload layout. Built once per application and then
/// shared read-only with every round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadRegistry<K> {
    shapes: BTreeMap<K, PayloadShape>,
}

impl<K: TransactionKind> Default for PayloadRegistry<K> {
    fn default() -> Self {
        Self {
            shapes: Default::default(),
        }
    }
}

impl<K: TransactionKind> PayloadRegistry<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bootstrap<P: Payload<Kind = K>>() -> Result<Self> {
        let mut registry = Self::new();
        for (kind, shape) in P::shapes() {
            registry.register(kind, shape)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, kind: K, shape: PayloadShape) -> Result<()> {
        match self.shapes.get(&kind) {
            Some(existing) if *existing == shape => Ok(()),
            Some(existing) => Err(Error::DuplicateRegistration {
                tx_type: kind.to_string(),
                existing: existing.name,
                new: shape.name,
            }),
            None => {
                debug!("[REGISTRY] {} -> {}", kind, shape.name);
                self.shapes.insert(kind, shape);
                Ok(())
            }
        }
    }

    pub fn resolve(&self, kind: K) -> Result<&PayloadShape> {
        self.shapes
            .get(&kind)
            .ok_or_else(|| Error::UnknownTransactionType(kind.to_string()))
    }

    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    pub fn restore(&mut self, snapshot: Self) {
        *self = snapshot;
    }

    pub fn clear(&mut self) {
        self.shapes.clear();
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}
