use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub addr: u32,
    /// 1-based source line of the definition.
    pub line: usize,
    /// Assembler pass that last assigned `addr`.
    pub pass: u8,
}

/// Labels by name (forward references) and by address (disassembly).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelTable {
    by_name: HashMap<String, Label>,
    by_addr: BTreeMap<u32, String>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a label; on a duplicate name returns the line of the first
    /// definition and leaves the table untouched.
    pub fn define(&mut self, name: &str, addr: u32, line: usize, pass: u8) -> Result<(), usize> {
        if let Some(prev) = self.by_name.get(name) {
            return Err(prev.line);
        }
        self.by_name.insert(
            name.to_string(),
            Label { name: name.to_string(), addr, line, pass },
        );
        // first label at an address wins for display
        self.by_addr.entry(addr).or_insert_with(|| name.to_string());
        Ok(())
    }

    /// Moves an existing label, returning its previous address.
    pub fn update(&mut self, name: &str, addr: u32, pass: u8) -> Option<u32> {
        let label = self.by_name.get_mut(name)?;
        let old = label.addr;
        label.addr = addr;
        label.pass = pass;
        if old != addr {
            if self.by_addr.get(&old).is_some_and(|n| n == name) {
                self.by_addr.remove(&old);
            }
            self.by_addr.entry(addr).or_insert_with(|| name.to_string());
        }
        Some(old)
    }

    pub fn get(&self, name: &str) -> Option<&Label> {
        self.by_name.get(name)
    }

    pub fn addr_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).map(|l| l.addr)
    }

    pub fn name_at(&self, addr: u32) -> Option<&str> {
        self.by_addr.get(&addr).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Labels in address order.
    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        let mut all: Vec<&Label> = self.by_name.values().collect();
        all.sort_by(|a, b| (a.addr, &a.name).cmp(&(b.addr, &b.name)));
        all.into_iter()
    }
}

/// `name = value` and `.equ` constants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolTable {
    values: HashMap<String, i64>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Redefinition with the same value is accepted; a different value
    /// returns the existing one.
    pub fn define(&mut self, name: &str, value: i64) -> Result<(), i64> {
        match self.values.get(name) {
            Some(&old) if old != value => Err(old),
            _ => {
                self.values.insert(name.to_string(), value);
                Ok(())
            }
        }
    }

    /// Unconditional assignment, for re-evaluating a definition in place.
    pub fn set(&mut self, name: &str, value: i64) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.values.get(name).copied()
    }

    /// Names and values, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        let mut all: Vec<(&str, i64)> = self.values.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        all.sort();
        all.into_iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
}
