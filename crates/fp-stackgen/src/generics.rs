use std::collections::{HashSet, VecDeque};
use std::fmt::{Display, Formatter};

use fp_core::thir::{FunctionId, Ty};
use itertools::Itertools;

use crate::error::GenError;

/// A function specialised against one concrete binding of its type
/// parameters. Concrete functions use an empty argument list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    pub function: FunctionId,
    pub type_args: Vec<Ty>,
}

impl InstanceKey {
    pub fn concrete(function: FunctionId) -> Self {
        Self {
            function,
            type_args: Vec::new(),
        }
    }

    pub fn new(function: FunctionId, type_args: Vec<Ty>) -> Self {
        Self {
            function,
            type_args,
        }
    }
}

impl Display for InstanceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.type_args.is_empty() {
            write!(f, "fn#{}", self.function)
        } else {
            write!(
                f,
                "fn#{}<{}>",
                self.function,
                self.type_args.iter().map(|arg| arg.to_string()).join(", ")
            )
        }
    }
}

/// FIFO of generic instances waiting to be generated. Each distinct key is
/// accepted once; draining more than `limit` instances is fatal.
#[derive(Debug)]
pub struct InstantiationQueue {
    pending: VecDeque<InstanceKey>,
    seen: HashSet<InstanceKey>,
    drained: usize,
    limit: usize,
}

impl InstantiationQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            seen: HashSet::new(),
            drained: 0,
            limit,
        }
    }

    /// Returns `true` when the key was not requested before.
    pub fn request(&mut self, key: InstanceKey) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        self.seen.insert(key.clone());
        self.pending.push_back(key);
        true
    }

    pub fn next(&mut self) -> Result<Option<InstanceKey>, GenError> {
        let Some(key) = self.pending.pop_front() else {
            return Ok(None);
        };
        if self.drained >= self.limit {
            return Err(GenError::InstantiationLimit {
                limit: self.limit,
                function: key.to_string(),
            });
        }
        self.drained += 1;
        Ok(Some(key))
    }

    pub fn drained(&self) -> usize {
        self.drained
    }
}
