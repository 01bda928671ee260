//! Fresh-name generation with explicitly owned counters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Counters = HashMap<(String, String), u64>;

/// Owner of the counters behind every [`Gensym`] it hands out.
///
/// Handles with the same stem from the same table share counters, so two
/// renderers working on one page never produce the same name.
#[derive(Debug, Clone, Default)]
pub struct GensymTable {
    counters: Arc<Mutex<Counters>>,
}

impl GensymTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gensym(&self, stem: &str) -> Gensym {
        Gensym {
            stem: stem.to_string(),
            counters: Arc::clone(&self.counters),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Gensym {
    stem: String,
    counters: Arc<Mutex<Counters>>,
}

impl Gensym {
    /// `stem + prefix + hex(n)`, with `n` counting from 0 per prefix.
    pub fn next(&self, prefix: &str) -> String {
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let counter = counters
            .entry((self.stem.clone(), prefix.to_string()))
            .or_insert(0);
        let name = format!("{}{}{:x}", self.stem, prefix, counter);
        *counter += 1;
        name
    }
}
