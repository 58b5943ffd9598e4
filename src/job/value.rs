//! Values produced by jobs and the dependency union

use super::Job;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Result of a job, or a plain input handed to one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    /// Strings double as file paths
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Stable string form, folded into cache keys
    pub fn identity(&self) -> String {
        self.to_string()
    }

    /// Leaf values in order, with lists expanded
    pub fn flatten(&self) -> Vec<&Value> {
        match self {
            Self::List(items) => items.iter().flat_map(Value::flatten).collect(),
            other => vec![other],
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => write!(f, "()"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Str(s) => write!(f, "{}", s),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
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

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<&Path> for Value {
    fn from(p: &Path) -> Self {
        Self::Str(p.to_string_lossy().into_owned())
    }
}

impl From<PathBuf> for Value {
    fn from(p: PathBuf) -> Self {
        Self::from(p.as_path())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

/// One entry of a dependency list: already resolved, or a job to resolve
#[derive(Debug, Clone)]
pub enum Dep {
    Value(Value),
    Job(Job),
}

impl Dep {
    pub fn as_job(&self) -> Option<&Job> {
        match self {
            Self::Job(job) => Some(job),
            Self::Value(_) => None,
        }
    }
}

impl From<Job> for Dep {
    fn from(job: Job) -> Self {
        Self::Job(job)
    }
}

impl From<&Job> for Dep {
    fn from(job: &Job) -> Self {
        Self::Job(job.clone())
    }
}

impl From<Value> for Dep {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for Dep {
    fn from(s: &str) -> Self {
        Self::Value(s.into())
    }
}

impl From<String> for Dep {
    fn from(s: String) -> Self {
        Self::Value(s.into())
    }
}

impl From<PathBuf> for Dep {
    fn from(p: PathBuf) -> Self {
        Self::Value(p.into())
    }
}

impl From<i64> for Dep {
    fn from(i: i64) -> Self {
        Self::Value(i.into())
    }
}
